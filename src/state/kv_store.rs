/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`KVStore`] trait, which specifies the interface this library requires of the key-value
//! store provided by the user, and typed getters over the [tables](super::paths) the node keeps
//! in it.
//!
//! Writes always go through a [`WriteBatch`]; a batch is applied atomically or not at all.
//! Reads go through [`KVGet`], which both the store itself and its snapshots implement.

use std::fmt::{self, Display, Formatter};

use crate::state::paths::{self, combine};
use crate::state::Account;
use crate::types::basic::BlockHeight;
use crate::types::block::Block;
use crate::types::bytes::{Address, Hash};
use crate::types::transaction::Transaction;
use crate::types::validator_set::ValidatorSet;

pub trait KVStore: KVGet + Clone + Send + Sync + 'static {
    type WriteBatch: WriteBatch;
    type Snapshot<'a>: 'a + KVGet;

    /// Atomically apply a batch of writes.
    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All `(key, value)` pairs whose key starts with `prefix`, with the prefix stripped from the
    /// returned keys. Order follows the underlying store's key order.
    fn get_batch(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    fn has(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// The keys under `prefix` that fall in the inclusive range `[from, to]`, prefix stripped.
    fn get_keys(&self, prefix: &[u8], from: &[u8], to: &[u8]) -> Vec<Vec<u8>> {
        self.get_batch(prefix)
            .into_iter()
            .map(|(key, _)| key)
            .filter(|key| key.as_slice() >= from && key.as_slice() <= to)
            .collect()
    }

    /* ↓↓↓ Accounts ↓↓↓ */

    fn account(&self, address: &Address) -> Result<Option<Account>, StorageError> {
        match self.get(&combine(&paths::NATIVE_ACCOUNTS, &address.bytes())) {
            Some(bytes) => Account::from_bytes(&bytes)
                .map(Some)
                .ok_or(StorageError::CorruptRecord),
            None => Ok(None),
        }
    }

    fn accounts(&self) -> Result<Vec<(Address, Account)>, StorageError> {
        self.get_batch(&paths::NATIVE_ACCOUNTS)
            .into_iter()
            .map(|(key, value)| {
                if key.len() != Address::LEN {
                    return Err(StorageError::CorruptRecord);
                }
                let mut address = [0u8; 20];
                address.copy_from_slice(&key);
                let account = Account::from_bytes(&value).ok_or(StorageError::CorruptRecord)?;
                Ok((Address::new(address), account))
            })
            .collect()
    }

    /* ↓↓↓ Blocks ↓↓↓ */

    fn block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        match self.get(&combine(&paths::BLOCKS, &hash.bytes())) {
            Some(bytes) => Block::from_rlp(&bytes)
                .map(Some)
                .map_err(|_| StorageError::CorruptRecord),
            None => Ok(None),
        }
    }

    fn block_hash_at_height(&self, height: BlockHeight) -> Result<Option<Hash>, StorageError> {
        match self.get(&combine(&paths::BLOCK_HEIGHT_MAPS, &height.to_be_bytes())) {
            Some(bytes) => read_hash(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /* ↓↓↓ Transactions ↓↓↓ */

    fn transaction(&self, hash: &Hash) -> Result<Option<Transaction>, StorageError> {
        match self.get(&combine(&paths::TRANSACTIONS, &hash.bytes())) {
            Some(bytes) => Transaction::from_rlp(&bytes)
                .map(Some)
                .map_err(|_| StorageError::CorruptRecord),
            None => Ok(None),
        }
    }

    fn block_hash_for_transaction(&self, tx_hash: &Hash) -> Result<Option<Hash>, StorageError> {
        match self.get(&combine(&paths::TX_TO_BLOCKS, &tx_hash.bytes())) {
            Some(bytes) => read_hash(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /* ↓↓↓ Validators ↓↓↓ */

    fn validator_set(&self) -> Result<ValidatorSet, StorageError> {
        let records = self
            .get_batch(&paths::VALIDATORS)
            .into_iter()
            .map(|(key, value)| {
                if key.len() != 8 || value.len() != Address::LEN {
                    return Err(StorageError::CorruptRecord);
                }
                let mut index = [0u8; 8];
                index.copy_from_slice(&key);
                let mut address = [0u8; 20];
                address.copy_from_slice(&value);
                Ok((u64::from_be_bytes(index), Address::new(address)))
            })
            .collect::<Result<Vec<(u64, Address)>, StorageError>>()?;
        Ok(ValidatorSet::from_records(records))
    }
}

fn read_hash(bytes: &[u8]) -> Result<Hash, StorageError> {
    if bytes.len() != Hash::LEN {
        return Err(StorageError::CorruptRecord);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(bytes);
    Ok(Hash::new(hash))
}

/// Storage failures. [`CorruptRecord`](StorageError::CorruptRecord) during block application is
/// treated as fatal by the caller: the node aborts, leaving the on-disk state recoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    IoFailure,
    CorruptRecord,
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::IoFailure => write!(f, "storage I/O failure"),
            StorageError::CorruptRecord => write!(f, "corrupt storage record"),
        }
    }
}
