/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The set of addresses allowed to produce and co-sign blocks.
//!
//! `ValidatorSet` maintains validators as an ordered list; the per-height schedule is a
//! deterministic permutation of this list, so every node must hold the validators in the same
//! order. Order is insertion order, which is in turn fixed by the order of `addValidator`
//! side effects in applied blocks.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::bytes::Address;

/// Minimum number of validators required to produce and sign a block: one producer plus
/// `MIN_VALIDATORS - 1` co-signers.
pub const MIN_VALIDATORS: usize = 4;

#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct ValidatorSet {
    validators: Vec<Address>,
}

impl ValidatorSet {
    pub fn new() -> ValidatorSet {
        ValidatorSet {
            validators: Vec::new(),
        }
    }

    /// Append a validator, keeping the set duplicate-free. Returns whether the set changed.
    pub fn put(&mut self, validator: Address) -> bool {
        if self.contains(&validator) {
            return false;
        }
        self.validators.push(validator);
        true
    }

    /// Remove a validator, shifting later validators down one position. Returns whether the set
    /// changed.
    pub fn remove(&mut self, validator: &Address) -> bool {
        match self.position(validator) {
            Some(position) => {
                self.validators.remove(position);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, validator: &Address) -> bool {
        self.validators.contains(validator)
    }

    /// The index of a validator in the set's canonical order.
    pub fn position(&self, validator: &Address) -> Option<usize> {
        self.validators.iter().position(|v| v == validator)
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.validators.iter()
    }

    pub fn to_vec(&self) -> Vec<Address> {
        self.validators.clone()
    }

    /// Whether the set is large enough to elect a producer and its co-signers.
    pub fn can_produce_blocks(&self) -> bool {
        self.validators.len() >= MIN_VALIDATORS
    }

    /// Storage records: `(index: u64 big-endian under Borsh ‖ address: 20 bytes)` per validator.
    pub fn to_records(&self) -> Vec<(u64, Address)> {
        self.validators
            .iter()
            .enumerate()
            .map(|(index, address)| (index as u64, *address))
            .collect()
    }

    /// Rebuild a set from storage records, restoring the persisted order.
    pub fn from_records(mut records: Vec<(u64, Address)>) -> ValidatorSet {
        records.sort_by_key(|(index, _)| *index);
        ValidatorSet {
            validators: records.into_iter().map(|(_, address)| address).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(n: u8) -> Address {
        Address::new([n; 20])
    }

    #[test]
    fn put_is_idempotent_and_ordered() {
        let mut set = ValidatorSet::new();
        assert!(set.put(address(1)));
        assert!(set.put(address(2)));
        assert!(!set.put(address(1)));
        assert_eq!(set.len(), 2);
        assert_eq!(set.position(&address(2)), Some(1));
    }

    #[test]
    fn remove_shifts_positions() {
        let mut set = ValidatorSet::new();
        for n in 1..=4 {
            set.put(address(n));
        }
        assert!(set.can_produce_blocks());
        assert!(set.remove(&address(2)));
        assert!(!set.remove(&address(2)));
        assert_eq!(set.position(&address(3)), Some(1));
        assert!(!set.can_produce_blocks());
    }

    #[test]
    fn record_round_trip_preserves_order() {
        let mut set = ValidatorSet::new();
        for n in [9, 3, 7, 1] {
            set.put(address(n));
        }
        let restored = ValidatorSet::from_records(set.to_records());
        assert_eq!(restored, set);
    }
}
