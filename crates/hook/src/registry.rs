//! Registry of live runtime instances
//!
//! Tracks which `lua_State` handles were created through the construction
//! interceptor and have not been closed yet. Handles are identifiers only: the
//! registry never dereferences, owns or destroys an instance.

use std::fmt;

use parking_lot::Mutex;

use crate::lua::LuaState;

/// Opaque, pointer-sized identifier of a runtime instance
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceHandle(usize);

impl InstanceHandle {
    pub fn from_ptr(state: *const LuaState) -> Self {
        Self(state as usize)
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

impl From<usize> for InstanceHandle {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceHandle({:#x})", self.0)
    }
}

/// Unordered collection of live instance handles
///
/// Insertion order carries no meaning; the only query is membership.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    handles: Mutex<Vec<InstanceHandle>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` (no de-duplication)
    pub fn add(&self, handle: InstanceHandle) {
        self.handles.lock().push(handle);
    }

    pub fn remove(&self, handle: InstanceHandle) {
        self.handles.lock().retain(|h| *h != handle);
    }

    /// Whether `handle` is one we manage
    pub fn contains(&self, handle: InstanceHandle) -> bool {
        self.handles.lock().iter().any(|h| *h == handle)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Copy of the current handles, for diagnostics
    pub fn snapshot(&self) -> Vec<InstanceHandle> {
        self.handles.lock().clone()
    }
}
