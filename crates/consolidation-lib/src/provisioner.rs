//! Capacity ledger for one resource on one host or VM
//!
//! Allocation is all-or-nothing. Allocating for a guest that already holds
//! an entry replaces it, so the previous amount counts as free during the
//! check.

use crate::models::GuestId;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceProvisioner {
    capacity: f64,
    ledger: BTreeMap<GuestId, f64>,
}

impl ResourceProvisioner {
    pub fn new(capacity: f64) -> Self {
        Self {
            capacity: capacity.max(0.0),
            ledger: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Sum of all ledger entries, always recomputed in id order.
    pub fn total_allocated(&self) -> f64 {
        self.ledger.values().sum()
    }

    pub fn available(&self) -> f64 {
        self.capacity - self.total_allocated()
    }

    pub fn allocated_for(&self, guest: GuestId) -> f64 {
        self.ledger.get(&guest).copied().unwrap_or(0.0)
    }

    pub fn holds(&self, guest: GuestId) -> bool {
        self.ledger.contains_key(&guest)
    }

    /// Pure capacity check for `amount` on behalf of `guest`
    pub fn is_suitable(&self, guest: GuestId, amount: f64) -> bool {
        if amount.is_nan() || amount < 0.0 {
            return false;
        }
        let others: f64 = self
            .ledger
            .iter()
            .filter(|(id, _)| **id != guest)
            .map(|(_, v)| v)
            .sum();
        amount <= self.capacity - others
    }

    /// Record `amount` for `guest` if it fits. Returns whether it did.
    pub fn allocate(&mut self, guest: GuestId, amount: f64) -> bool {
        if !self.is_suitable(guest, amount) {
            return false;
        }
        self.ledger.insert(guest, amount);
        true
    }

    /// Drop the entry for `guest`; absent entries are ignored.
    pub fn deallocate(&mut self, guest: GuestId) {
        self.ledger.remove(&guest);
    }

    pub fn clear(&mut self) {
        self.ledger.clear();
    }

    pub fn guests(&self) -> impl Iterator<Item = GuestId> + '_ {
        self.ledger.keys().copied()
    }
}
