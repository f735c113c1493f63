//! C ABI of the embedded Lua runtime
//!
//! Only the pieces the interceptors and standard extensions touch. The layout
//! follows the Lua 5.1 / LuaJIT embedding API.

use libc::{c_char, c_int, c_void, size_t};

/// Opaque runtime instance (`lua_State`)
#[repr(C)]
pub struct LuaState {
    _private: [u8; 0],
}

/// Allocator callback passed to `lua_newstate`
pub type LuaAlloc = Option<
    unsafe extern "C" fn(ud: *mut c_void, ptr: *mut c_void, osize: size_t, nsize: size_t) -> *mut c_void,
>;

/// Native function callable from scripts
///
/// Receives the instance as its only argument and returns the number of values
/// it pushed onto that instance's stack.
pub type LuaCFunction = unsafe extern "C" fn(state: *mut LuaState) -> c_int;

/// Chunk reader used by `lua_load`
pub type LuaReader =
    unsafe extern "C" fn(state: *mut LuaState, data: *mut c_void, size: *mut size_t) -> *const c_char;

/// Entry of a `luaL_openlib` registration array
#[repr(C)]
pub struct LuaLReg {
    pub name: *const c_char,
    pub func: Option<LuaCFunction>,
}

/// Pseudo-index of the registry table
pub const LUA_REGISTRYINDEX: c_int = -10000;

/// Pseudo-index of the globals table
pub const LUA_GLOBALSINDEX: c_int = -10002;

/// Return every result from a call
pub const LUA_MULTRET: c_int = -1;

/// Status code of a successful call or load
pub const LUA_OK: c_int = 0;
