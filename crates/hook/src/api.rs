//! Resolved function table of the runtime module
//!
//! `LuaApi` is the late-bound equivalent of linking against the runtime: one
//! typed function pointer per entry point the hooks call through. A value of
//! this type only exists when every slot resolved.

use std::ffi::c_void;

use libc::{c_char, c_double, c_int, ptrdiff_t, size_t};

use crate::{
    error::{HookError, HookResult},
    lua::{LuaAlloc, LuaCFunction, LuaLReg, LuaReader, LuaState},
    symbols::{SymbolSource, SymbolTable},
};

/// Signature of the host's update routine (`this` is the only argument)
pub type UpdateFn = unsafe extern "C" fn(this: *mut c_void) -> *mut c_void;

macro_rules! lua_api {
    ($( $name:ident : fn($($arg:ty),* $(,)?) $(-> $ret:ty)? ;)*) => {
        /// Typed function table resolved from the runtime module
        #[allow(non_snake_case)]
        #[derive(Clone, Copy)]
        pub struct LuaApi {
            $( pub $name: unsafe extern "C" fn($($arg),*) $(-> $ret)?, )*
        }

        impl LuaApi {
            /// Exported names of every slot, in table order
            pub const SYMBOLS: &'static [&'static str] = &[$(stringify!($name)),*];

            /// Build the table from a resolution result
            ///
            /// Fails with every missing name when any slot is null.
            pub fn from_table(table: &SymbolTable) -> HookResult<Self> {
                let missing = table.missing();
                if !missing.is_empty() {
                    return Err(HookError::MissingSymbols { symbols: missing });
                }

                Ok(Self {
                    $(
                        $name: {
                            let address = table.get(stringify!($name)).ok_or_else(|| {
                                HookError::MissingSymbols {
                                    symbols: vec![stringify!($name).to_string()],
                                }
                            })?;
                            // Safety: the exported symbol is the runtime's C entry
                            // point with exactly this signature.
                            unsafe {
                                std::mem::transmute::<
                                    *mut c_void,
                                    unsafe extern "C" fn($($arg),*) $(-> $ret)?,
                                >(address.as_ptr())
                            }
                        },
                    )*
                })
            }
        }

        impl std::fmt::Debug for LuaApi {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct("LuaApi")
                    $( .field(stringify!($name), &(self.$name as *const c_void)) )*
                    .finish()
            }
        }
    };
}

lua_api! {
    lua_call: fn(*mut LuaState, c_int, c_int);
    lua_pcall: fn(*mut LuaState, c_int, c_int, c_int) -> c_int;
    lua_gettop: fn(*mut LuaState) -> c_int;
    lua_settop: fn(*mut LuaState, c_int);
    lua_tolstring: fn(*mut LuaState, c_int, *mut size_t) -> *const c_char;
    luaL_loadfile: fn(*mut LuaState, *const c_char) -> c_int;
    lua_load: fn(*mut LuaState, LuaReader, *mut c_void, *const c_char) -> c_int;
    lua_setfield: fn(*mut LuaState, c_int, *const c_char);
    lua_createtable: fn(*mut LuaState, c_int, c_int);
    lua_insert: fn(*mut LuaState, c_int);
    lua_newstate: fn(LuaAlloc, *mut c_void) -> *mut LuaState;
    lua_close: fn(*mut LuaState);
    lua_rawset: fn(*mut LuaState, c_int);
    lua_settable: fn(*mut LuaState, c_int);
    lua_pushnumber: fn(*mut LuaState, c_double);
    lua_pushinteger: fn(*mut LuaState, ptrdiff_t);
    lua_pushboolean: fn(*mut LuaState, c_int);
    lua_pushcclosure: fn(*mut LuaState, LuaCFunction, c_int);
    lua_pushlstring: fn(*mut LuaState, *const c_char, size_t);
    luaL_openlib: fn(*mut LuaState, *const c_char, *const LuaLReg, c_int);
    luaL_ref: fn(*mut LuaState, c_int) -> c_int;
    lua_rawgeti: fn(*mut LuaState, c_int, c_int);
    luaL_unref: fn(*mut LuaState, c_int, c_int);
    luaL_newstate: fn(c_char, c_char, c_int) -> *mut LuaState;
}

impl LuaApi {
    /// Resolve every runtime entry point from `source`
    pub fn resolve<S: SymbolSource + ?Sized>(source: &S) -> HookResult<Self> {
        Self::from_table(&SymbolTable::resolve(source, Self::SYMBOLS))
    }

    /// Read the string at `index` on the stack of `state`
    ///
    /// Returns `None` when the value is not a string or number.
    ///
    /// # Safety
    ///
    /// `state` must be a live instance created by this runtime.
    pub unsafe fn to_string_lossy(&self, state: *mut LuaState, index: c_int) -> Option<String> {
        let mut len: size_t = 0;
        let data = (self.lua_tolstring)(state, index, &mut len);
        if data.is_null() {
            return None;
        }
        let bytes = std::slice::from_raw_parts(data.cast::<u8>(), len);
        Some(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Push `value` as a Lua string
    ///
    /// # Safety
    ///
    /// `state` must be a live instance created by this runtime.
    pub unsafe fn push_str(&self, state: *mut LuaState, value: &str) {
        (self.lua_pushlstring)(state, value.as_ptr().cast::<c_char>(), value.len());
    }
}

/// Resolve the host's update routine by its mangled name
pub fn resolve_update_routine<S: SymbolSource + ?Sized>(
    source: &S,
    symbol: &str,
) -> HookResult<UpdateFn> {
    let address = source.require(symbol)?;
    // Safety: the configured symbol names a member function taking only `this`.
    Ok(unsafe { std::mem::transmute::<*mut c_void, UpdateFn>(address.as_ptr()) })
}
