//! Process-wide hook state
//!
//! The interceptors are plain C functions with the runtime's signatures, so
//! everything they need lives in one `HookContext` published before any
//! detour is enabled:
//!
//! ```text
//! SymbolSource ──resolve──> LuaApi ─┐
//!                                   ├─> HookContext (published) ──> enable detours ──> installed
//! HookConfig + ExtensionSet ────────┘
//! ```
//!
//! A context only counts as installed once every detour is enabled. If
//! enabling fails and every detour could be rolled back, the context is
//! withdrawn and `install` may be retried. Contexts are leaked: an interceptor
//! that was already running keeps a valid reference.

use std::{
    ffi::c_void,
    ptr,
    sync::atomic::{AtomicBool, AtomicPtr, Ordering},
};

use parking_lot::{const_mutex, Mutex};
use tracing::{error, info};

use crate::{
    api::{resolve_update_routine, LuaApi, UpdateFn},
    config::HookConfig,
    detour::Detour,
    error::{HookError, HookResult},
    extensions::ExtensionSet,
    intercept,
    patch::ensure_disjoint,
    registry::InstanceRegistry,
    symbols::SymbolSource,
};

static CONTEXT: AtomicPtr<HookContext> = AtomicPtr::new(ptr::null_mut());
static INSTALLED: AtomicBool = AtomicBool::new(false);
static INSTALL_LOCK: Mutex<()> = const_mutex(());

/// The host update routine and the detour over it
#[derive(Debug)]
pub(crate) struct UpdateHook {
    pub(crate) original: UpdateFn,
    pub(crate) detour: Detour,
}

/// Everything the interceptors share
#[derive(Debug)]
pub struct HookContext {
    api: LuaApi,
    registry: InstanceRegistry,
    extensions: ExtensionSet,
    pub(crate) new_state: Detour,
    pub(crate) close: Option<Detour>,
    pub(crate) update: Option<UpdateHook>,
}

impl HookContext {
    /// Resolve the runtime, publish the context and enable every detour
    ///
    /// All symbols are resolved before anything is patched, so a module missing
    /// an export leaves the process untouched.
    ///
    /// # Safety
    ///
    /// `source` must describe the runtime module actually running in this
    /// process: every resolved address is patched or called.
    pub unsafe fn install<S: SymbolSource + ?Sized>(
        source: &S,
        config: &HookConfig,
        extensions: ExtensionSet,
    ) -> HookResult<&'static HookContext> {
        let _guard = INSTALL_LOCK.lock();
        if Self::published().is_some() {
            return Err(HookError::AlreadyInstalled);
        }
        config.validate()?;

        info!("setting up lua function access");
        let api = LuaApi::resolve(source)?;

        let original_update = if config.intercept_update {
            Some(resolve_update_routine(source, &config.update_symbol)?)
        } else {
            None
        };

        let mut targets = Vec::with_capacity(3);
        if let Some(original) = original_update {
            targets.push((config.update_symbol.as_str(), original as usize));
        }
        targets.push(("lua_newstate", api.lua_newstate as usize));
        if config.track_teardown {
            targets.push(("lua_close", api.lua_close as usize));
        }
        ensure_disjoint(&targets)?;

        let update = match original_update {
            Some(original) => Some(UpdateHook {
                original,
                detour: Detour::new(
                    original as *const c_void,
                    intercept::update_interceptor as *const c_void,
                )?,
            }),
            None => None,
        };

        let new_state = Detour::new(
            api.lua_newstate as *const c_void,
            intercept::new_state_interceptor as *const c_void,
        )?;

        let close = if config.track_teardown {
            Some(Detour::new(
                api.lua_close as *const c_void,
                intercept::close_interceptor as *const c_void,
            )?)
        } else {
            None
        };

        let context: &'static HookContext = Box::leak(Box::new(Self {
            api,
            registry: InstanceRegistry::new(),
            extensions,
            new_state,
            close,
            update,
        }));

        CONTEXT.store(ptr::from_ref(context).cast_mut(), Ordering::Release);
        if let Err(e) = context.enable_all() {
            // Live detours still need the context to reach their originals
            if !matches!(e, HookError::RollbackFailed { .. }) {
                CONTEXT.store(ptr::null_mut(), Ordering::Release);
            }
            return Err(e);
        }
        INSTALLED.store(true, Ordering::Release);

        info!(
            extensions = context.extensions.len(),
            update = context.update.is_some(),
            teardown = context.close.is_some(),
            "lua hooks installed"
        );
        Ok(context)
    }

    /// The installed context, if any
    ///
    /// `None` until every detour of a successful `install` is enabled.
    pub fn get() -> Option<&'static HookContext> {
        if INSTALLED.load(Ordering::Acquire) {
            Self::published()
        } else {
            None
        }
    }

    /// The context the interceptors run against, installed or still enabling
    pub(crate) fn published() -> Option<&'static HookContext> {
        // Safety: only ever set from a leaked box, so the pointee is never freed.
        unsafe { CONTEXT.load(Ordering::Acquire).as_ref() }
    }

    /// Enable every detour, or none of them
    ///
    /// On failure the detours enabled so far are disabled again. Any that
    /// cannot be are reported through `RollbackFailed`.
    fn enable_all(&self) -> HookResult<()> {
        let detours = self.detours();
        for (i, detour) in detours.iter().enumerate() {
            let Err(cause) = detour.enable() else {
                continue;
            };

            let mut active = Vec::new();
            for enabled in &detours[..i] {
                if let Err(e) = enabled.disable() {
                    error!(address = ?enabled.target_ptr(), error = %e, "failed to roll back detour");
                    active.push(enabled.target_ptr() as usize);
                }
            }
            if active.is_empty() {
                return Err(cause);
            }
            return Err(HookError::RollbackFailed {
                cause: Box::new(cause),
                active,
            });
        }
        Ok(())
    }

    fn detours(&self) -> Vec<&Detour> {
        let mut detours = Vec::with_capacity(3);
        detours.extend(self.update_detour());
        detours.push(&self.new_state);
        detours.extend(self.close_detour());
        detours
    }

    pub fn api(&self) -> &LuaApi {
        &self.api
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    /// Detour over `lua_newstate`
    pub fn new_state_detour(&self) -> &Detour {
        &self.new_state
    }

    /// Detour over `lua_close`, when teardown tracking is enabled
    pub fn close_detour(&self) -> Option<&Detour> {
        self.close.as_ref()
    }

    /// Detour over the host update routine, when enabled
    pub fn update_detour(&self) -> Option<&Detour> {
        self.update.as_ref().map(|update| &update.detour)
    }
}
