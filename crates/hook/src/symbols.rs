//! Symbol lookup abstraction
//!
//! Provides a trait for resolving addresses by name from various sources:
//! - A shared module mapped into the process (`LoadedModule`)
//! - In-memory maps (testing, embedders that already hold the addresses)

use std::{collections::HashMap, ffi::c_void, ptr::NonNull};

use tracing::debug;

use crate::error::{HookError, HookResult};

/// Anything that can turn a symbol name into an address
pub trait SymbolSource {
    /// Look up `name`, returning `None` when it is not exported
    fn lookup(&self, name: &str) -> Option<NonNull<c_void>>;

    /// Look up `name`, failing with `SymbolNotFound` when it is not exported
    fn require(&self, name: &str) -> HookResult<NonNull<c_void>> {
        self.lookup(name).ok_or_else(|| HookError::SymbolNotFound {
            symbol: name.to_string(),
        })
    }
}

impl<S: SymbolSource + ?Sized> SymbolSource for &S {
    fn lookup(&self, name: &str) -> Option<NonNull<c_void>> {
        (**self).lookup(name)
    }
}

/// In-memory symbol source
#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    symbols: HashMap<String, usize>,
}

impl SymbolMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, address: *const c_void) {
        self.symbols.insert(name.into(), address as usize);
    }

    /// Builder form of [`SymbolMap::insert`]
    pub fn with(mut self, name: impl Into<String>, address: *const c_void) -> Self {
        self.insert(name, address);
        self
    }

    pub fn remove(&mut self, name: &str) {
        self.symbols.remove(name);
    }
}

impl SymbolSource for SymbolMap {
    fn lookup(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|&address| NonNull::new(address as *mut c_void))
    }
}

/// Raw result of resolving a list of names
///
/// Every requested name has a slot. Names the source did not export keep a
/// null slot, which `missing` reports.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    slots: Vec<(String, Option<NonNull<c_void>>)>,
}

impl SymbolTable {
    /// Resolve every name in `names` against `source`
    pub fn resolve<S: SymbolSource + ?Sized>(source: &S, names: &[&str]) -> Self {
        let slots = names
            .iter()
            .map(|&name| {
                let address = source.lookup(name);
                debug!(symbol = name, address = ?address, "resolved runtime symbol");
                (name.to_string(), address)
            })
            .collect();

        Self { slots }
    }

    /// Address stored for `name`, if it resolved
    pub fn get(&self, name: &str) -> Option<NonNull<c_void>> {
        self.slots
            .iter()
            .find(|(slot, _)| slot == name)
            .and_then(|(_, address)| *address)
    }

    /// Names whose slot is still null
    pub fn missing(&self) -> Vec<String> {
        self.slots
            .iter()
            .filter(|(_, address)| address.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(|(_, address)| address.is_some())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<NonNull<c_void>>)> {
        self.slots.iter().map(|(name, address)| (name.as_str(), *address))
    }
}
