//! Identity → connection bindings used for direct messaging.
//!
//! A binding is single valued: the newest registration for an identity wins.
//! Disconnect cleanup only removes a binding that still points at the closing
//! connection, so a late disconnect of an old tab cannot evict a newer one.

use log::debug;
use std::collections::HashMap;

pub trait IdentityStore {
    fn get(&self, identity: &str) -> Option<String>;
    fn set(&mut self, identity: &str, client_id: &str);
    fn delete(&mut self, identity: &str);
}

#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    bindings: HashMap<String, String>,
}

impl IdentityStore for MemoryIdentityStore {
    fn get(&self, identity: &str) -> Option<String> {
        self.bindings.get(identity).cloned()
    }

    fn set(&mut self, identity: &str, client_id: &str) {
        self.bindings.insert(identity.to_string(), client_id.to_string());
    }

    fn delete(&mut self, identity: &str) {
        self.bindings.remove(identity);
    }
}

pub struct IdentityBindings<S = MemoryIdentityStore> {
    store: S,
}

impl Default for IdentityBindings<MemoryIdentityStore> {
    fn default() -> Self {
        Self::new(MemoryIdentityStore::default())
    }
}

impl<S: IdentityStore> IdentityBindings<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Binds `identity` to `client_id`, superseding any earlier connection.
    pub fn register(&mut self, identity: &str, client_id: &str) {
        if let Some(previous) = self.store.get(identity) {
            if previous != client_id {
                debug!("Identity {} moved from {} to {}", identity, previous, client_id);
            }
        }
        self.store.set(identity, client_id);
    }

    pub fn lookup(&self, identity: &str) -> Option<String> {
        self.store.get(identity)
    }

    /// Removes the binding only if it still belongs to `client_id`.
    /// Returns whether anything was removed.
    pub fn release(&mut self, identity: &str, client_id: &str) -> bool {
        match self.store.get(identity) {
            Some(current) if current == client_id => {
                self.store.delete(identity);
                true
            }
            _ => false,
        }
    }
}
