/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The two pools of admitted-but-not-yet-applied transactions.
//!
//! User transactions are held in insertion order, and that order is exactly the inclusion order
//! the producer uses when assembling a block; there is no fee-based reordering in this design.
//! Validator transactions (the commit/reveal beacon and validator set changes) are held
//! unordered, since a block orders them canonically by schedule index.
//!
//! A transaction hash lives in at most one of the two pools. Duplicate inserts are refused, which
//! is also how at-least-once network delivery gets de-duplicated.
//!
//! When both internal locks are taken, the user pool's lock is taken first.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::bytes::Hash;
use crate::types::transaction::Transaction;

/// Which pool a transaction hash was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    User,
    Validator,
}

pub struct Mempool {
    user: RwLock<IndexMap<Hash, Transaction>>,
    validator: RwLock<HashMap<Hash, Transaction>>,
}

impl Mempool {
    pub fn new() -> Mempool {
        Mempool {
            user: RwLock::new(IndexMap::new()),
            validator: RwLock::new(HashMap::new()),
        }
    }

    /// Which pool, if any, holds this hash.
    pub fn locate(&self, hash: &Hash) -> Option<Pool> {
        if self.user.read().unwrap().contains_key(hash) {
            return Some(Pool::User);
        }
        if self.validator.read().unwrap().contains_key(hash) {
            return Some(Pool::Validator);
        }
        None
    }

    /// Insert into the user pool. Returns `false` if the hash already lives in either pool.
    pub fn insert_user(&self, tx: Transaction) -> bool {
        let mut user = self.user.write().unwrap();
        if user.contains_key(&tx.hash()) || self.validator.read().unwrap().contains_key(&tx.hash())
        {
            return false;
        }
        user.insert(tx.hash(), tx);
        true
    }

    /// Insert into the validator pool. Returns `false` if the hash already lives in either pool.
    pub fn insert_validator(&self, tx: Transaction) -> bool {
        let user = self.user.read().unwrap();
        if user.contains_key(&tx.hash()) {
            return false;
        }
        let mut validator = self.validator.write().unwrap();
        if validator.contains_key(&tx.hash()) {
            return false;
        }
        validator.insert(tx.hash(), tx);
        true
    }

    /// The user pool's transactions, in insertion order.
    pub fn user_snapshot(&self) -> Vec<Transaction> {
        self.user.read().unwrap().values().cloned().collect()
    }

    /// The validator pool's transactions, in no particular order.
    pub fn validator_snapshot(&self) -> Vec<Transaction> {
        self.validator.read().unwrap().values().cloned().collect()
    }

    pub fn user_len(&self) -> usize {
        self.user.read().unwrap().len()
    }

    pub fn validator_len(&self) -> usize {
        self.validator.read().unwrap().len()
    }

    /// Clear both pools. Called when a block is applied.
    pub fn clear(&self) {
        self.user.write().unwrap().clear();
        self.validator.write().unwrap().clear();
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Mempool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::ChainId;
    use crate::types::bytes::Address;
    use crate::types::crypto::Keypair;
    use ethereum_types::U256;

    fn tx(keypair: &Keypair, nonce: u32) -> Transaction {
        Transaction::new(
            Address::new([0x55; 20]),
            U256::from(1),
            vec![],
            ChainId::new(8848),
            nonce,
            U256::one(),
            U256::from(21000),
            keypair,
        )
    }

    #[test]
    fn user_pool_preserves_insertion_order() {
        let keypair = Keypair::random();
        let mempool = Mempool::new();
        let txs: Vec<Transaction> = (0..5).map(|n| tx(&keypair, n)).collect();
        for t in txs.iter().rev() {
            assert!(mempool.insert_user(t.clone()));
        }
        let snapshot = mempool.user_snapshot();
        let expected: Vec<Hash> = txs.iter().rev().map(|t| t.hash()).collect();
        let got: Vec<Hash> = snapshot.iter().map(|t| t.hash()).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn a_hash_lives_in_at_most_one_pool() {
        let keypair = Keypair::random();
        let mempool = Mempool::new();
        let t = tx(&keypair, 0);
        assert!(mempool.insert_user(t.clone()));
        assert!(!mempool.insert_user(t.clone()));
        assert!(!mempool.insert_validator(t.clone()));
        assert_eq!(mempool.locate(&t.hash()), Some(Pool::User));

        let v = tx(&keypair, 1);
        assert!(mempool.insert_validator(v.clone()));
        assert!(!mempool.insert_user(v.clone()));
        assert_eq!(mempool.locate(&v.hash()), Some(Pool::Validator));
    }

    #[test]
    fn clear_empties_both_pools() {
        let keypair = Keypair::random();
        let mempool = Mempool::new();
        mempool.insert_user(tx(&keypair, 0));
        mempool.insert_validator(tx(&keypair, 1));
        mempool.clear();
        assert_eq!(mempool.user_len(), 0);
        assert_eq!(mempool.validator_len(), 0);
    }
}
