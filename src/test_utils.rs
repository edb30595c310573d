/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Shared fixtures for the crate's unit tests: a volatile in-memory [`KVStore`] and builders for
//! funded accounts, validator sets, and beacon transactions.

use ethereum_types::U256;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::rdpos::types::ValidatorPayload;
use crate::state::kv_store::{KVGet, KVStore, WriteBatch};
use crate::types::basic::{BlockHeight, ChainId};
use crate::types::bytes::Address;
use crate::types::crypto::Keypair;
use crate::types::transaction::Transaction;
use crate::types::validator_set::ValidatorSet;

pub(crate) const TEST_CHAIN: ChainId = ChainId::new(8848);

/// An in-memory implementation of [`KVStore`].
#[derive(Clone)]
pub(crate) struct MemDB(Arc<Mutex<HashMap<Vec<u8>, Vec<u8>>>>);

impl MemDB {
    pub(crate) fn new() -> MemDB {
        MemDB(Arc::new(Mutex::new(HashMap::new())))
    }
}

impl KVStore for MemDB {
    type WriteBatch = MemWriteBatch;
    type Snapshot<'a> = MemDBSnapshot<'a>;

    fn write(&mut self, wb: Self::WriteBatch) {
        let mut map = self.0.lock().unwrap();
        for (key, value) in wb.insertions {
            map.insert(key, value);
        }
        for key in wb.deletions {
            map.remove(&key);
        }
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().clear();
    }

    fn snapshot<'b>(&'b self) -> MemDBSnapshot<'b> {
        MemDBSnapshot(self.0.lock().unwrap())
    }
}

impl KVGet for MemDB {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.lock().unwrap().get(key).cloned()
    }

    fn get_batch(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan_prefix(&self.0.lock().unwrap(), prefix)
    }
}

pub(crate) struct MemWriteBatch {
    insertions: HashMap<Vec<u8>, Vec<u8>>,
    deletions: HashSet<Vec<u8>>,
}

impl WriteBatch for MemWriteBatch {
    fn new() -> Self {
        MemWriteBatch {
            insertions: HashMap::new(),
            deletions: HashSet::new(),
        }
    }

    fn set(&mut self, key: &[u8], value: &[u8]) {
        let _ = self.deletions.remove(key);
        self.insertions.insert(key.to_vec(), value.to_vec());
    }

    fn delete(&mut self, key: &[u8]) {
        let _ = self.insertions.remove(key);
        self.deletions.insert(key.to_vec());
    }
}

pub(crate) struct MemDBSnapshot<'a>(MutexGuard<'a, HashMap<Vec<u8>, Vec<u8>>>);

impl KVGet for MemDBSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }

    fn get_batch(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        scan_prefix(&self.0, prefix)
    }
}

fn scan_prefix(map: &HashMap<Vec<u8>, Vec<u8>>, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut entries: Vec<(Vec<u8>, Vec<u8>)> = map
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key[prefix.len()..].to_vec(), value.clone()))
        .collect();
    entries.sort();
    entries
}

/// `count` keypairs and the validator set of their addresses, in order.
pub(crate) fn validator_fixture(count: usize) -> (Vec<Keypair>, ValidatorSet) {
    let keypairs: Vec<Keypair> = (0..count).map(|_| Keypair::random()).collect();
    let mut set = ValidatorSet::new();
    for keypair in &keypairs {
        set.put(keypair.address());
    }
    (keypairs, set)
}

pub(crate) fn keypair_for<'a>(keypairs: &'a [Keypair], address: &Address) -> &'a Keypair {
    keypairs
        .iter()
        .find(|kp| kp.address() == *address)
        .expect("no keypair for address")
}

/// A signed transfer on the test chain.
pub(crate) fn transfer(keypair: &Keypair, to: Address, value: u64, nonce: u32) -> Transaction {
    Transaction::new(
        to,
        U256::from(value),
        Vec::new(),
        TEST_CHAIN,
        nonce,
        U256::one(),
        U256::from(21000),
        keypair,
    )
}

/// A signed validator transaction carrying `payload`.
pub(crate) fn validator_tx(
    keypair: &Keypair,
    payload: ValidatorPayload,
    height: BlockHeight,
) -> Transaction {
    Transaction::new(
        Address::default(),
        U256::zero(),
        payload.encode(),
        TEST_CHAIN,
        height.int() as u32,
        U256::zero(),
        U256::zero(),
        keypair,
    )
}
