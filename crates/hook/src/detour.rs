//! Inline detours with scoped removal
//!
//! A `Detour` overwrites the first bytes of a target function with an absolute
//! jump to a replacement. There is no relocated copy of the original prologue:
//! the only way to run the original is to put its bytes back for the duration
//! of the call, which is what [`ScopedRemove`] does.
//!
//! # State machine
//!
//! ```text
//! Removed --enable--> Installed --scoped_remove--> Removed --drop--> Installed
//! ```
//!
//! Removal and reinstallation of one descriptor are serialized by a reentrant
//! lock. A thread inside a scoped removal blocks other threads from toggling
//! the same detour, while nested guards on the owning thread are allowed and
//! only the outermost one reinstalls.

use std::{cell::Cell, ffi::c_void, fmt};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, error};

use crate::{
    error::{HookError, HookResult},
    patch::{encode_jump, read_entry, write_code, EntryBytes},
};

/// Whether the redirect is currently written at the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetourState {
    Removed,
    Installed,
}

/// Descriptor of one intercepted entry point
pub struct Detour {
    target: usize,
    replacement: usize,
    /// Entry bytes the redirect overwrites
    original: EntryBytes,
    /// Redirect written while installed
    jump: EntryBytes,
    state: ReentrantMutex<Cell<DetourState>>,
}

impl fmt::Debug for Detour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detour")
            .field("target", &(self.target as *const c_void))
            .field("replacement", &(self.replacement as *const c_void))
            .field("state", &self.state())
            .finish()
    }
}

impl Detour {
    /// Prepare a detour without patching anything
    ///
    /// # Safety
    ///
    /// - `target` must be the entry of a function at least
    ///   [`PATCH_LEN`](crate::patch::PATCH_LEN) bytes long
    /// - `replacement` must have the same signature and calling convention
    /// - the descriptor must outlive every call into the patched target
    pub unsafe fn new(target: *const c_void, replacement: *const c_void) -> HookResult<Self> {
        let (target, replacement) = (target as usize, replacement as usize);

        if target == 0 || replacement == 0 {
            return Err(HookError::Patch {
                address: target,
                reason: "detour target and replacement must be non-null".into(),
            });
        }
        if target == replacement {
            return Err(HookError::Patch {
                address: target,
                reason: "detour would redirect a function to itself".into(),
            });
        }

        Ok(Self {
            target,
            replacement,
            original: read_entry(target),
            jump: encode_jump(replacement),
            state: ReentrantMutex::new(Cell::new(DetourState::Removed)),
        })
    }

    /// Prepare and immediately enable a detour
    ///
    /// # Safety
    ///
    /// Same requirements as [`Detour::new`].
    pub unsafe fn install(target: *const c_void, replacement: *const c_void) -> HookResult<Self> {
        let detour = Self::new(target, replacement)?;
        detour.enable()?;
        Ok(detour)
    }

    /// Write the redirect (no-op when already installed)
    pub fn enable(&self) -> HookResult<()> {
        let state = self.state.lock();
        if state.get() == DetourState::Installed {
            return Ok(());
        }

        // Safety: `new` established that target is a patchable entry point.
        unsafe { write_code(self.target, &self.jump) }?;
        state.set(DetourState::Installed);
        debug!(address = ?self.target_ptr(), replacement = ?self.replacement_ptr(), "detour installed");
        Ok(())
    }

    /// Restore the original entry bytes (no-op when already removed)
    pub fn disable(&self) -> HookResult<()> {
        let state = self.state.lock();
        if state.get() == DetourState::Removed {
            return Ok(());
        }

        // Safety: the saved bytes came from this very address.
        unsafe { write_code(self.target, &self.original) }?;
        state.set(DetourState::Removed);
        debug!(address = ?self.target_ptr(), "detour removed");
        Ok(())
    }

    pub fn state(&self) -> DetourState {
        self.state.lock().get()
    }

    pub fn is_installed(&self) -> bool {
        self.state() == DetourState::Installed
    }

    pub fn target_ptr(&self) -> *const c_void {
        self.target as *const c_void
    }

    pub fn replacement_ptr(&self) -> *const c_void {
        self.replacement as *const c_void
    }

    /// Remove the redirect until the returned guard drops
    ///
    /// The redirect is put back when the guard leaves scope, including during
    /// unwinding. When the detour was not installed on entry the guard leaves
    /// it removed.
    pub fn scoped_remove(&self) -> HookResult<ScopedRemove<'_>> {
        let guard = self.state.lock();

        let restore = if guard.get() == DetourState::Installed {
            // Safety: the saved bytes came from this very address.
            unsafe { write_code(self.target, &self.original) }?;
            guard.set(DetourState::Removed);
            true
        } else {
            false
        };

        Ok(ScopedRemove {
            detour: self,
            guard,
            restore,
        })
    }

    /// Run `f` with the redirect removed
    pub fn call_original<R>(&self, f: impl FnOnce() -> R) -> HookResult<R> {
        let _removed = self.scoped_remove()?;
        Ok(f())
    }
}

impl Drop for Detour {
    fn drop(&mut self) {
        if let Err(e) = self.disable() {
            error!(address = ?self.target_ptr(), error = %e, "failed to remove detour on drop");
        }
    }
}

/// Guard returned by [`Detour::scoped_remove`]
#[must_use = "the detour is reinstalled as soon as the guard drops"]
pub struct ScopedRemove<'a> {
    detour: &'a Detour,
    guard: ReentrantMutexGuard<'a, Cell<DetourState>>,
    /// Whether this guard performed the removal and owes the reinstall
    restore: bool,
}

impl Drop for ScopedRemove<'_> {
    fn drop(&mut self) {
        if !self.restore {
            return;
        }

        // Safety: `Detour::new` established that target is a patchable entry point.
        match unsafe { write_code(self.detour.target, &self.detour.jump) } {
            Ok(()) => self.guard.set(DetourState::Installed),
            Err(e) => error!(
                address = ?self.detour.target_ptr(),
                error = %e,
                "failed to reinstall detour; interception is now inactive"
            ),
        }
    }
}
