// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Inline interception of an embedded Lua runtime
//!
//! This crate extends a Lua runtime that a host application loads dynamically:
//! every new `lua_State` gets extra native functions in its globals, and the
//! set of live states is tracked.
//!
//! # Overview
//!
//! The crate handles:
//! - Resolving the runtime's C entry points from an already-loaded module
//! - Patching `lua_newstate`, `lua_close` and the host's update routine with
//!   absolute jumps to replacement functions
//! - Calling the originals from inside the replacements by temporarily
//!   restoring their entry bytes
//! - Binding extension functions into each new state
//!
//! # Architecture
//!
//! ```text
//! LoadedModule / SymbolMap  (SymbolSource)
//!      ↓ resolve
//! LuaApi + update routine
//!      ↓
//! HookContext ── InstanceRegistry
//!      │      └─ ExtensionSet
//!      ↓ enable
//! Detour × 3  ──>  intercept::{new_state, update, close}
//! ```
//!
//! # Re-entering the original
//!
//! A detour overwrites the target's first bytes. To run the original, the
//! interceptor takes a [`ScopedRemove`] guard, which writes the saved bytes
//! back; dropping the guard writes the jump again. Calls made while the guard
//! is held, including recursive ones, see the unpatched function.
//!
//! # Platform Support
//!
//! Unix on x86_64 and aarch64.
//!
//! # Thread Safety
//!
//! Each detour's remove/reinstall bracket is serialized by its own reentrant
//! lock and all code writes share a process-wide lock. While one thread holds
//! a removal, other threads entering the same function run the original
//! directly.

mod api;
mod config;
mod context;
mod detour;
mod error;
mod extensions;
mod intercept;
mod loader;
pub mod logging;
pub mod lua;
mod patch;
mod registry;
mod symbols;

pub use api::{resolve_update_routine, LuaApi, UpdateFn};
pub use config::{HookConfig, CONFIG_ENV, DEFAULT_UPDATE_SYMBOL, LOG_ENV, UPDATE_SYMBOL_ENV};
pub use context::HookContext;
pub use detour::{Detour, DetourState, ScopedRemove};
pub use error::{HookError, HookResult};
pub use extensions::ExtensionSet;
pub use loader::LoadedModule;
pub use patch::PATCH_LEN;
pub use registry::{InstanceHandle, InstanceRegistry};
pub use symbols::{SymbolMap, SymbolSource, SymbolTable};
