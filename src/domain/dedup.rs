use crate::domain::models::PeripheralIdentity;
use std::collections::HashSet;
use std::sync::Mutex;

/// Addresses already handed off for exploration.
///
/// Keyed by the normalised address alone, so a peripheral reported once as
/// public and once as random is still explored only once. Entries are never
/// removed.
#[derive(Debug, Default)]
pub struct SeenAddressSet {
    seen: Mutex<HashSet<String>>,
}

impl SeenAddressSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup and insert in one step. Returns `true` only for the first claim.
    pub fn try_claim(&self, identity: &PeripheralIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.address.clone())
    }

    /// Whether the address has been claimed, whatever its type
    pub fn contains(&self, identity: &PeripheralIdentity) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&identity.address)
    }

    /// Number of claimed addresses
    pub fn len(&self) -> usize {
        self.seen.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
