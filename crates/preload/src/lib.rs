// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Host-facing entry point
//!
//! Built as a shared object and loaded into the host next to its Lua runtime.
//! Whatever loads the runtime module passes its `dlopen` handle to
//! [`hook_init`], which reads the configuration from the environment,
//! resolves the runtime and installs the detours.

use std::ffi::c_void;

use hook::{ExtensionSet, HookConfig, HookContext, HookResult, LoadedModule};
use libc::c_int;
use tracing::{error, info};

/// Install the hooks over the runtime behind `module_handle`
///
/// Returns 0 on success and -1 on failure; failures are logged. Calling it
/// again after a success fails without touching the existing hooks.
///
/// # Safety
///
/// `module_handle` must be a live `dlopen` handle of the Lua runtime the host
/// is using, kept open for the life of the process.
#[no_mangle]
pub unsafe extern "C" fn hook_init(module_handle: *mut c_void) -> c_int {
    match init(module_handle) {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "failed to install lua hooks");
            -1
        }
    }
}

unsafe fn init(module_handle: *mut c_void) -> HookResult<()> {
    let config = HookConfig::from_env()?;
    hook::logging::init(&config.log_filter);

    let module = LoadedModule::from_raw(module_handle)?;
    info!(module = module.label(), "installing lua hooks");

    HookContext::install(&module, &config, ExtensionSet::standard())?;
    Ok(())
}
