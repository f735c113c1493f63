//! In-process stand-in for the Lua runtime
//!
//! Implements just enough of the C API for the hooks and the standard
//! extensions: a value stack with call frames, a globals table and chunks that
//! evaluate to their file contents. Every entry point is a real `extern "C"`
//! function so the hooks resolve, call and patch them like the real thing.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    ffi::{c_void, CStr, CString},
    hint::black_box,
    sync::atomic::{AtomicI32, AtomicUsize, Ordering},
};

use hook::{
    lua::{LuaAlloc, LuaCFunction, LuaLReg, LuaReader, LuaState, LUA_GLOBALSINDEX, LUA_MULTRET, LUA_REGISTRYINDEX},
    HookConfig, SymbolMap,
};
use libc::{c_char, c_double, c_int, ptrdiff_t, size_t};

/// Mangled name the fake host exports its update routine under
pub const UPDATE_SYMBOL: &str = "_ZN4Host6updateEv";

/// `user_data` that makes `fake_newstate` create a second state from inside
pub const NESTED_USER_DATA: usize = 0x1;

const LUA_ERRRUN: c_int = 2;
const LUA_ERRFILE: c_int = 6;

pub static NEWSTATE_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static CLOSE_CALLS: AtomicUsize = AtomicUsize::new(0);
pub static LAST_NESTED_STATE: AtomicUsize = AtomicUsize::new(0);
pub static LAST_UPDATE_THIS: AtomicUsize = AtomicUsize::new(0);
static NEXT_REF: AtomicI32 = AtomicI32::new(1);

pub type NewStateFn = unsafe extern "C" fn(LuaAlloc, *mut c_void) -> *mut LuaState;
pub type CloseFn = unsafe extern "C" fn(*mut LuaState);
pub type HostUpdateFn = unsafe extern "C" fn(*mut c_void) -> *mut c_void;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Integer(isize),
    Str(CString),
    Function(LuaCFunction),
    Chunk(Vec<u8>),
    Table,
}

pub struct FakeState {
    pub stack: Vec<Value>,
    /// Index of the first slot of the running C function's frame
    base: usize,
    pub globals: HashMap<String, Value>,
}

impl FakeState {
    fn new() -> Self {
        Self {
            stack: Vec::new(),
            base: 0,
            globals: HashMap::new(),
        }
    }

    fn slot(&self, index: c_int) -> Option<usize> {
        if index > 0 {
            let i = self.base + index as usize - 1;
            (i < self.stack.len()).then_some(i)
        } else if index < 0 && index > LUA_REGISTRYINDEX {
            let i = self.stack.len() as isize + index as isize;
            (i >= self.base as isize).then_some(i as usize)
        } else {
            None
        }
    }

    fn top(&self) -> c_int {
        (self.stack.len() - self.base) as c_int
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        if self.stack.len() > self.base {
            self.stack.pop().unwrap_or(Value::Nil)
        } else {
            Value::Nil
        }
    }

    fn push_results(&mut self, mut results: Vec<Value>, nresults: c_int) {
        if nresults != LUA_MULTRET {
            results.resize(nresults as usize, Value::Nil);
        }
        self.stack.extend(results);
    }
}

/// Borrow the fake state behind a runtime handle
///
/// # Safety
///
/// `state` must come from `fake_newstate` and not be closed. The borrow must
/// not be held across a call back into a C function.
pub unsafe fn state<'a>(state: *mut LuaState) -> &'a mut FakeState {
    &mut *state.cast::<FakeState>()
}

/// Push global `name` (or nil) onto the stack
pub unsafe fn push_global(l: *mut LuaState, name: &str) {
    let s = state(l);
    let value = s.globals.get(name).cloned().unwrap_or(Value::Nil);
    s.push(value);
}

pub unsafe extern "C" fn fake_alloc(
    _ud: *mut c_void,
    ptr: *mut c_void,
    _osize: size_t,
    nsize: size_t,
) -> *mut c_void {
    if nsize == 0 {
        libc::free(ptr);
        std::ptr::null_mut()
    } else {
        libc::realloc(ptr, nsize)
    }
}

#[inline(never)]
pub unsafe extern "C" fn fake_newstate(allocator: LuaAlloc, user_data: *mut c_void) -> *mut LuaState {
    NEWSTATE_CALLS.fetch_add(1, Ordering::SeqCst);
    if black_box(allocator).is_none() {
        return std::ptr::null_mut();
    }

    if black_box(user_data) as usize == NESTED_USER_DATA {
        let newstate = black_box(fake_newstate as NewStateFn);
        let inner = newstate(allocator, std::ptr::null_mut());
        LAST_NESTED_STATE.store(inner as usize, Ordering::SeqCst);
    }

    Box::into_raw(Box::new(FakeState::new())).cast::<LuaState>()
}

#[inline(never)]
pub unsafe extern "C" fn fake_close(l: *mut LuaState) {
    CLOSE_CALLS.fetch_add(1, Ordering::SeqCst);
    if !black_box(l).is_null() {
        drop(Box::from_raw(l.cast::<FakeState>()));
    }
}

/// Host update routine: `this` points at an `AtomicUsize` tick counter
#[inline(never)]
pub unsafe extern "C" fn fake_update(this: *mut c_void) -> *mut c_void {
    LAST_UPDATE_THIS.store(black_box(this) as usize, Ordering::SeqCst);
    let counter = &*black_box(this).cast::<AtomicUsize>();
    counter.fetch_add(black_box(1), Ordering::SeqCst);
    black_box(this)
}

unsafe extern "C" fn fake_gettop(l: *mut LuaState) -> c_int {
    state(l).top()
}

unsafe extern "C" fn fake_settop(l: *mut LuaState, index: c_int) {
    let s = state(l);
    if index >= 0 {
        let len = s.base + index as usize;
        s.stack.resize(len, Value::Nil);
    } else {
        let len = (s.stack.len() as isize + index as isize + 1).max(s.base as isize) as usize;
        s.stack.truncate(len);
    }
}

unsafe extern "C" fn fake_tolstring(l: *mut LuaState, index: c_int, len: *mut size_t) -> *const c_char {
    let s = state(l);
    let Some(i) = s.slot(index) else {
        return std::ptr::null();
    };

    let converted = match &s.stack[i] {
        Value::Integer(n) => Some(n.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    };
    if let Some(text) = converted {
        s.stack[i] = Value::Str(CString::new(text).unwrap_or_default());
    }

    match &s.stack[i] {
        Value::Str(text) => {
            if !len.is_null() {
                *len = text.as_bytes().len();
            }
            text.as_ptr()
        }
        _ => std::ptr::null(),
    }
}

unsafe extern "C" fn fake_pcall(l: *mut LuaState, nargs: c_int, nresults: c_int, _errfunc: c_int) -> c_int {
    let (func_index, callee, saved_base) = {
        let s = state(l);
        let func_index = s.stack.len() - nargs as usize - 1;
        (func_index, s.stack[func_index].clone(), s.base)
    };

    match callee {
        Value::Function(function) => {
            state(l).base = func_index + 1;
            let n = function(l) as usize;
            let s = state(l);
            let results = s.stack.split_off(s.stack.len() - n);
            s.stack.truncate(func_index);
            s.base = saved_base;
            s.push_results(results, nresults);
            0
        }
        Value::Chunk(contents) => {
            let s = state(l);
            s.stack.truncate(func_index);
            s.push_results(vec![Value::Str(CString::new(contents).unwrap_or_default())], nresults);
            0
        }
        other => {
            let s = state(l);
            s.stack.truncate(func_index);
            let message = format!("attempt to call a {other:?} value");
            s.push(Value::Str(CString::new(message).unwrap_or_default()));
            LUA_ERRRUN
        }
    }
}

unsafe extern "C" fn fake_call(l: *mut LuaState, nargs: c_int, nresults: c_int) {
    fake_pcall(l, nargs, nresults, 0);
}

unsafe extern "C" fn fake_loadfile(l: *mut LuaState, path: *const c_char) -> c_int {
    let path = CStr::from_ptr(path).to_string_lossy().into_owned();
    let s = state(l);
    match std::fs::read(&path) {
        Ok(contents) => {
            s.push(Value::Chunk(contents));
            0
        }
        Err(e) => {
            let message = format!("cannot open {path}: {e}");
            s.push(Value::Str(CString::new(message).unwrap_or_default()));
            LUA_ERRFILE
        }
    }
}

unsafe extern "C" fn fake_load(l: *mut LuaState, _reader: LuaReader, _data: *mut c_void, _name: *const c_char) -> c_int {
    state(l).push(Value::Chunk(Vec::new()));
    0
}

unsafe extern "C" fn fake_setfield(l: *mut LuaState, index: c_int, key: *const c_char) {
    let s = state(l);
    let value = s.pop();
    if index == LUA_GLOBALSINDEX {
        let key = CStr::from_ptr(key).to_string_lossy().into_owned();
        s.globals.insert(key, value);
    }
}

unsafe extern "C" fn fake_createtable(l: *mut LuaState, _narr: c_int, _nrec: c_int) {
    state(l).push(Value::Table);
}

unsafe extern "C" fn fake_insert(l: *mut LuaState, index: c_int) {
    let s = state(l);
    if let Some(i) = s.slot(index) {
        let value = s.pop();
        s.stack.insert(i, value);
    }
}

unsafe extern "C" fn fake_rawset(l: *mut LuaState, _index: c_int) {
    let s = state(l);
    s.pop();
    s.pop();
}

unsafe extern "C" fn fake_settable(l: *mut LuaState, _index: c_int) {
    let s = state(l);
    let _value = s.pop();
    let _key = s.pop();
}

unsafe extern "C" fn fake_pushnumber(l: *mut LuaState, n: c_double) {
    state(l).push(Value::Number(n));
}

unsafe extern "C" fn fake_pushinteger(l: *mut LuaState, n: ptrdiff_t) {
    state(l).push(Value::Integer(n));
}

unsafe extern "C" fn fake_pushboolean(l: *mut LuaState, b: c_int) {
    state(l).push(Value::Boolean(b != 0));
}

unsafe extern "C" fn fake_pushcclosure(l: *mut LuaState, function: LuaCFunction, upvalues: c_int) {
    let s = state(l);
    for _ in 0..upvalues {
        s.pop();
    }
    s.push(Value::Function(function));
}

unsafe extern "C" fn fake_pushlstring(l: *mut LuaState, data: *const c_char, len: size_t) {
    let bytes = std::slice::from_raw_parts(data.cast::<u8>(), len).to_vec();
    state(l).push(Value::Str(CString::new(bytes).unwrap_or_default()));
}

unsafe extern "C" fn fake_openlib(_l: *mut LuaState, _name: *const c_char, _lib: *const LuaLReg, _nup: c_int) {
    black_box(());
}

unsafe extern "C" fn fake_ref(l: *mut LuaState, _table: c_int) -> c_int {
    state(l).pop();
    NEXT_REF.fetch_add(1, Ordering::SeqCst)
}

unsafe extern "C" fn fake_rawgeti(l: *mut LuaState, _index: c_int, _n: c_int) {
    state(l).push(Value::Nil);
}

unsafe extern "C" fn fake_unref(_l: *mut LuaState, _table: c_int, reference: c_int) {
    black_box(reference);
}

unsafe extern "C" fn fake_lual_newstate(_a: c_char, _b: c_char, _c: c_int) -> *mut LuaState {
    let newstate = black_box(fake_newstate as NewStateFn);
    newstate(Some(fake_alloc), std::ptr::null_mut())
}

/// Symbol map of the fake runtime and host
pub fn fake_module() -> SymbolMap {
    SymbolMap::new()
        .with("lua_call", fake_call as *const c_void)
        .with("lua_pcall", fake_pcall as *const c_void)
        .with("lua_gettop", fake_gettop as *const c_void)
        .with("lua_settop", fake_settop as *const c_void)
        .with("lua_tolstring", fake_tolstring as *const c_void)
        .with("luaL_loadfile", fake_loadfile as *const c_void)
        .with("lua_load", fake_load as *const c_void)
        .with("lua_setfield", fake_setfield as *const c_void)
        .with("lua_createtable", fake_createtable as *const c_void)
        .with("lua_insert", fake_insert as *const c_void)
        .with("lua_newstate", fake_newstate as *const c_void)
        .with("lua_close", fake_close as *const c_void)
        .with("lua_rawset", fake_rawset as *const c_void)
        .with("lua_settable", fake_settable as *const c_void)
        .with("lua_pushnumber", fake_pushnumber as *const c_void)
        .with("lua_pushinteger", fake_pushinteger as *const c_void)
        .with("lua_pushboolean", fake_pushboolean as *const c_void)
        .with("lua_pushcclosure", fake_pushcclosure as *const c_void)
        .with("lua_pushlstring", fake_pushlstring as *const c_void)
        .with("luaL_openlib", fake_openlib as *const c_void)
        .with("luaL_ref", fake_ref as *const c_void)
        .with("lua_rawgeti", fake_rawgeti as *const c_void)
        .with("luaL_unref", fake_unref as *const c_void)
        .with("luaL_newstate", fake_lual_newstate as *const c_void)
        .with(UPDATE_SYMBOL, fake_update as *const c_void)
}

pub fn fake_config() -> HookConfig {
    HookConfig {
        update_symbol: UPDATE_SYMBOL.to_string(),
        ..HookConfig::default()
    }
}

/// Create a state through the (possibly patched) construction entry point
pub unsafe fn new_state(user_data: usize) -> *mut LuaState {
    let newstate = black_box(fake_newstate as NewStateFn);
    newstate(Some(fake_alloc), user_data as *mut c_void)
}

/// Close a state through the (possibly patched) teardown entry point
pub unsafe fn close_state(l: *mut LuaState) {
    let close = black_box(fake_close as CloseFn);
    close(l);
}
