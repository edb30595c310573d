/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Persistence and querying of the events contracts emit during block application.
//!
//! Events are stored under the [`EVENTS`](crate::state::paths::EVENTS) prefix keyed by
//! `(block height ‖ log index)`, both big-endian, so a batch read returns them in chain order.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::state::kv_store::{KVGet, KVStore, StorageError, WriteBatch};
use crate::state::paths::{self, combine};
use crate::types::basic::BlockHeight;
use crate::types::bytes::{Address, Hash};

/// One event emitted by a contract, as persisted.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct EventRecord {
    pub address: Address,
    pub block_height: u64,
    pub tx_hash: Hash,
    pub log_index: u64,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// Append a block's events to the store in one batch.
pub fn append_events<K: KVStore>(
    kv: &mut K,
    events: &[EventRecord],
) -> Result<(), StorageError> {
    if events.is_empty() {
        return Ok(());
    }
    let mut batch = K::WriteBatch::new();
    for event in events {
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&event.block_height.to_be_bytes());
        key.extend_from_slice(&event.log_index.to_be_bytes());
        let value = event.try_to_vec().map_err(|_| StorageError::IoFailure)?;
        batch.set(&combine(&paths::EVENTS, &key), &value);
    }
    kv.write(batch);
    Ok(())
}

/// Query events by inclusive block range, optionally filtered by emitting address.
/// A record matches the range iff `from_block <= e.block_height && e.block_height <= to_block`.
pub fn events_in_range<K: KVGet>(
    kv: &K,
    from_block: BlockHeight,
    to_block: BlockHeight,
    address: Option<Address>,
) -> Result<Vec<EventRecord>, StorageError> {
    let mut matches = Vec::new();
    for (_, value) in kv.get_batch(&paths::EVENTS) {
        let event =
            EventRecord::try_from_slice(&value).map_err(|_| StorageError::CorruptRecord)?;
        if from_block.int() <= event.block_height && event.block_height <= to_block.int() {
            if address.map_or(true, |a| a == event.address) {
                matches.push(event);
            }
        }
    }
    Ok(matches)
}
