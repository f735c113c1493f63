//! Access to shared modules already mapped into the process
//!
//! Provides a wrapper around libloading for the runtime module the host
//! loaded and for modules opened by path (probe tooling).

use std::{ffi::c_void, fmt, mem::ManuallyDrop, path::Path, ptr::NonNull};

use libloading::os::unix::Library;

use crate::{
    error::{HookError, HookResult},
    symbols::SymbolSource,
};

/// A shared module symbols are resolved from
///
/// Modules adopted with [`LoadedModule::from_raw`] or [`LoadedModule::this`]
/// are borrowed from the host and are never closed by this wrapper.
pub struct LoadedModule {
    library: ManuallyDrop<Library>,
    owned: bool,
    label: String,
}

impl fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModule")
            .field("label", &self.label)
            .field("owned", &self.owned)
            .finish_non_exhaustive()
    }
}

impl LoadedModule {
    /// Adopt a handle returned by the platform's `dlopen`
    ///
    /// # Safety
    ///
    /// `handle` must be a live handle obtained from `dlopen` that stays open
    /// for as long as any symbol resolved through this module is used.
    pub unsafe fn from_raw(handle: *mut c_void) -> HookResult<Self> {
        if handle.is_null() {
            return Err(HookError::LoadError {
                path: "<raw handle>".into(),
                reason: "module handle is null".into(),
            });
        }

        Ok(Self {
            library: ManuallyDrop::new(Library::from_raw(handle)),
            owned: false,
            label: format!("{handle:p}"),
        })
    }

    /// Resolve from the main program and everything loaded globally
    pub fn this() -> Self {
        Self {
            library: ManuallyDrop::new(Library::this()),
            owned: false,
            label: "<process>".into(),
        }
    }

    /// Load a module by path
    ///
    /// The module is closed when the returned value drops.
    pub fn open<P: AsRef<Path>>(path: P) -> HookResult<Self> {
        let path = path.as_ref();
        // Safety: loading runs the module's initializers; the caller picked
        // the path and accepts that.
        let library = unsafe { Library::new(path) }.map_err(|e| HookError::LoadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            library: ManuallyDrop::new(library),
            owned: true,
            label: path.display().to_string(),
        })
    }

    /// Human-readable origin of this module
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl SymbolSource for LoadedModule {
    fn lookup(&self, name: &str) -> Option<NonNull<c_void>> {
        // Safety: the symbol is only read as an address, never called here.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(symbol.into_raw())
    }
}

impl Drop for LoadedModule {
    fn drop(&mut self) {
        // Safety: `library` is not touched again after this point.
        let library = unsafe { ManuallyDrop::take(&mut self.library) };
        if self.owned {
            drop(library);
        } else {
            let _ = library.into_raw();
        }
    }
}
