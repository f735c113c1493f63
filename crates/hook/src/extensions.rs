//! Native functions injected into every new runtime instance
//!
//! An [`ExtensionSet`] maps global names to C functions. The construction
//! interceptor binds each one with `lua_pushcclosure` + `lua_setfield` on the
//! globals pseudo-index, which is the only way the embedding API offers to add
//! a function to the global namespace.
//!
//! The standard set provides `pcall`, `dofile` and `log`. `dohttpreq` needs a
//! network client and is bound by whoever embeds the hooks.

use std::ffi::{CStr, CString};

use libc::c_int;
use tracing::{info, warn};

use crate::{
    api::LuaApi,
    context::HookContext,
    error::{HookError, HookResult},
    lua::{LuaCFunction, LuaState, LUA_GLOBALSINDEX, LUA_MULTRET, LUA_OK},
    registry::InstanceHandle,
};

/// Name → native function bindings, in binding order
#[derive(Clone, Default)]
pub struct ExtensionSet {
    bindings: Vec<(CString, LuaCFunction)>,
}

impl std::fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.bindings.iter().map(|(name, _)| name))
            .finish()
    }
}

impl ExtensionSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// `pcall`, `dofile` and `log`
    pub fn standard() -> Self {
        let mut set = Self::new();
        set.bindings.push((c"pcall".to_owned(), protected_call));
        set.bindings.push((c"dofile".to_owned(), do_file));
        set.bindings.push((c"log".to_owned(), log_message));
        set
    }

    /// Bind `name` to `function`, replacing any existing binding of that name
    pub fn add(&mut self, name: &str, function: LuaCFunction) -> HookResult<()> {
        let name = CString::new(name).map_err(|_| HookError::InvalidExtensionName {
            name: name.to_string(),
        })?;

        match self.bindings.iter_mut().find(|(existing, _)| *existing == name) {
            Some(binding) => binding.1 = function,
            None => self.bindings.push((name, function)),
        }
        Ok(())
    }

    /// Builder form of [`ExtensionSet::add`]
    pub fn with(mut self, name: &str, function: LuaCFunction) -> HookResult<Self> {
        self.add(name, function)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<LuaCFunction> {
        self.bindings
            .iter()
            .find(|(existing, _)| existing.as_bytes() == name.as_bytes())
            .map(|(_, function)| *function)
    }

    pub fn names(&self) -> impl Iterator<Item = &CStr> {
        self.bindings.iter().map(|(name, _)| name.as_c_str())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind every extension into the globals of `state`
    ///
    /// Returns the number of bindings applied. If the stack does not end where
    /// it started, the binding sequence misbehaved: the stack is reset and a
    /// warning logged.
    ///
    /// # Safety
    ///
    /// `state` must be a live instance of the runtime `api` was resolved from.
    pub unsafe fn bind(&self, api: &LuaApi, state: *mut LuaState) -> usize {
        let top = (api.lua_gettop)(state);

        for (name, function) in &self.bindings {
            (api.lua_pushcclosure)(state, *function, 0);
            (api.lua_setfield)(state, LUA_GLOBALSINDEX, name.as_ptr());
        }

        let after = (api.lua_gettop)(state);
        if after != top {
            warn!(
                instance = ?InstanceHandle::from_ptr(state),
                expected = top,
                actual = after,
                "stack unbalanced after binding extensions"
            );
            (api.lua_settop)(state, top);
        }

        self.bindings.len()
    }
}

fn api() -> Option<&'static LuaApi> {
    HookContext::published().map(HookContext::api)
}

/// `pcall(f, ...)`: `true, results...` or `false, message`
unsafe extern "C" fn protected_call(state: *mut LuaState) -> c_int {
    let Some(api) = api() else {
        return 0;
    };

    let nargs = (api.lua_gettop)(state) - 1;
    if nargs < 0 {
        (api.lua_pushboolean)(state, 0);
        api.push_str(state, "bad argument #1 to 'pcall' (value expected)");
        return 2;
    }

    let status = (api.lua_pcall)(state, nargs, LUA_MULTRET, 0);
    (api.lua_pushboolean)(state, c_int::from(status == LUA_OK));
    (api.lua_insert)(state, 1);
    (api.lua_gettop)(state)
}

/// `dofile(path)`: load and run a script file, returning its results
unsafe extern "C" fn do_file(state: *mut LuaState) -> c_int {
    let Some(api) = api() else {
        return 0;
    };

    let base = (api.lua_gettop)(state);
    let path = (api.lua_tolstring)(state, 1, std::ptr::null_mut());
    if path.is_null() {
        warn!("dofile called without a path");
        return 0;
    }
    let shown = CStr::from_ptr(path).to_string_lossy().into_owned();

    let status = (api.luaL_loadfile)(state, path);
    if status != LUA_OK {
        let message = api.to_string_lossy(state, -1).unwrap_or_default();
        warn!(path = %shown, status, %message, "failed to load script");
        (api.lua_settop)(state, base);
        return 0;
    }

    let status = (api.lua_pcall)(state, 0, LUA_MULTRET, 0);
    if status != LUA_OK {
        let message = api.to_string_lossy(state, -1).unwrap_or_default();
        warn!(path = %shown, status, %message, "script raised an error");
        (api.lua_settop)(state, base);
        return 0;
    }

    (api.lua_gettop)(state) - base
}

/// `log(message)`: forward a script message to the host log
unsafe extern "C" fn log_message(state: *mut LuaState) -> c_int {
    let Some(api) = api() else {
        return 0;
    };

    if let Some(message) = api.to_string_lossy(state, 1) {
        info!(target: "lua", "{message}");
    }
    0
}
