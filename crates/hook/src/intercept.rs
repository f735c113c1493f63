//! Replacement functions written over the runtime and host entry points
//!
//! Each interceptor has exactly the signature of the function it replaces.
//! They reach the original by removing their own detour for the duration of
//! one call; without that, calling the original address would land back here.

use std::{ffi::c_void, ptr};

use tracing::{error, info};

use crate::{
    context::HookContext,
    lua::{LuaAlloc, LuaState},
    registry::InstanceHandle,
};

/// Replacement for `lua_newstate`
pub(crate) unsafe extern "C" fn new_state_interceptor(
    allocator: LuaAlloc,
    user_data: *mut c_void,
) -> *mut LuaState {
    match HookContext::published() {
        Some(context) => context.construct_state(allocator, user_data),
        None => {
            error!("lua_newstate intercepted before hooks were installed");
            ptr::null_mut()
        }
    }
}

/// Replacement for the host update routine
pub(crate) unsafe extern "C" fn update_interceptor(this: *mut c_void) -> *mut c_void {
    match HookContext::published() {
        Some(context) => context.run_update(this),
        None => {
            error!("update routine intercepted before hooks were installed");
            ptr::null_mut()
        }
    }
}

/// Replacement for `lua_close`
pub(crate) unsafe extern "C" fn close_interceptor(state: *mut LuaState) {
    match HookContext::published() {
        Some(context) => context.close_state(state),
        None => error!("lua_close intercepted before hooks were installed"),
    }
}

impl HookContext {
    /// Create an instance through the original `lua_newstate`, register it
    /// and bind the extensions into its globals
    ///
    /// A null result from the original is returned untouched.
    ///
    /// # Safety
    ///
    /// Arguments are forwarded verbatim to the runtime's `lua_newstate`.
    pub unsafe fn construct_state(&self, allocator: LuaAlloc, user_data: *mut c_void) -> *mut LuaState {
        let lua_newstate = self.api().lua_newstate;
        let state = match self
            .new_state
            .call_original(|| lua_newstate(allocator, user_data))
        {
            Ok(state) => state,
            Err(e) => {
                error!(error = %e, "cannot reach the original lua_newstate");
                return ptr::null_mut();
            }
        };

        if state.is_null() {
            return state;
        }

        let handle = InstanceHandle::from_ptr(state);
        self.registry().add(handle);

        let stack_size = (self.api().lua_gettop)(state);
        info!(instance = ?handle, stack_size, "new lua state");

        self.extensions().bind(self.api(), state);

        state
    }

    /// Forward one call to the original host update routine
    ///
    /// # Safety
    ///
    /// `this` is forwarded verbatim to the host routine.
    pub unsafe fn run_update(&self, this: *mut c_void) -> *mut c_void {
        let Some(update) = &self.update else {
            error!("update interceptor reached without an update hook");
            return ptr::null_mut();
        };

        let original = update.original;
        match update.detour.call_original(|| original(this)) {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "cannot reach the original update routine");
                ptr::null_mut()
            }
        }
    }

    /// Forget `state` and close it through the original `lua_close`
    ///
    /// # Safety
    ///
    /// `state` is forwarded verbatim to the runtime's `lua_close`.
    pub unsafe fn close_state(&self, state: *mut LuaState) {
        self.registry().remove(InstanceHandle::from_ptr(state));

        let lua_close = self.api().lua_close;
        let result = match &self.close {
            Some(detour) => detour.call_original(|| lua_close(state)),
            None => {
                lua_close(state);
                Ok(())
            }
        };
        if let Err(e) = result {
            error!(error = %e, "cannot reach the original lua_close");
        }
    }

    /// Whether `state` was created through the construction interceptor and
    /// has not been closed
    pub fn manages(&self, state: *const LuaState) -> bool {
        self.registry().contains(InstanceHandle::from_ptr(state))
    }
}
