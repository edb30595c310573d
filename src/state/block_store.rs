/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persistent chain of blocks and its lookup indexes.
//!
//! The chain is linear: rdPoS elects a unique producer per height and a quorum signs its block,
//! so there is no fork choice and blocks are only ever appended (or, when preparing a manual
//! rollback, popped from the back). The store owns recent blocks in a deque; the indexes map
//! hashes and heights, never owning a block themselves. Blocks evicted from the deque remain on
//! disk and are re-read through a bounded LRU cache.

use std::collections::{HashMap, VecDeque};

use crate::state::kv_store::{KVGet, KVStore, StorageError, WriteBatch};
use crate::state::paths::{self, combine};
use crate::types::basic::BlockHeight;
use crate::types::block::Block;
use crate::types::bytes::Hash;
use crate::types::transaction::Transaction;

/// How many of the newest blocks are kept in memory.
const RECENT_BLOCKS: usize = 1024;

/// How many disk-loaded blocks the cache holds.
const CACHE_CAPACITY: usize = 64;

pub struct BlockStore<K: KVStore> {
    kv: K,
    /// The newest blocks, oldest at the front. Contiguous heights.
    chain: VecDeque<Block>,
    hash_to_height: HashMap<Hash, BlockHeight>,
    height_to_hash: HashMap<BlockHeight, Hash>,
    tx_to_block: HashMap<Hash, Hash>,
    cache: BlockCache,
}

impl<K: KVStore> BlockStore<K> {
    /// Open the store, rebuilding the indexes from storage and pulling the newest blocks into
    /// memory, in height order.
    pub fn open(kv: K) -> Result<BlockStore<K>, StorageError> {
        let mut store = BlockStore {
            kv,
            chain: VecDeque::new(),
            hash_to_height: HashMap::new(),
            height_to_hash: HashMap::new(),
            tx_to_block: HashMap::new(),
            cache: BlockCache::new(CACHE_CAPACITY),
        };
        store.load()?;
        Ok(store)
    }

    fn load(&mut self) -> Result<(), StorageError> {
        for (key, value) in self.kv.get_batch(&paths::BLOCK_HEIGHT_MAPS) {
            if key.len() != 8 || value.len() != Hash::LEN {
                return Err(StorageError::CorruptRecord);
            }
            let mut height = [0u8; 8];
            height.copy_from_slice(&key);
            let height = BlockHeight::new(u64::from_be_bytes(height));
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&value);
            let hash = Hash::new(hash);
            self.height_to_hash.insert(height, hash);
            self.hash_to_height.insert(hash, height);
        }
        for (key, value) in self.kv.get_batch(&paths::TX_TO_BLOCKS) {
            if key.len() != Hash::LEN || value.len() != Hash::LEN {
                return Err(StorageError::CorruptRecord);
            }
            let mut tx_hash = [0u8; 32];
            tx_hash.copy_from_slice(&key);
            let mut block_hash = [0u8; 32];
            block_hash.copy_from_slice(&value);
            self.tx_to_block.insert(Hash::new(tx_hash), Hash::new(block_hash));
        }

        if let Some(tip) = self.height_to_hash.keys().max().copied() {
            let first = BlockHeight::new(tip.int().saturating_sub(RECENT_BLOCKS as u64 - 1));
            for height in first.int()..=tip.int() {
                let hash = self
                    .height_to_hash
                    .get(&BlockHeight::new(height))
                    .ok_or(StorageError::CorruptRecord)?;
                let block = self.kv.block(hash)?.ok_or(StorageError::CorruptRecord)?;
                self.chain.push_back(block);
            }
        }
        Ok(())
    }

    /// The newest block, or `None` on an uninitialized store.
    pub fn latest(&self) -> Option<&Block> {
        self.chain.back()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.hash_to_height.contains_key(hash)
    }

    pub fn height_of(&self, hash: &Hash) -> Option<BlockHeight> {
        self.hash_to_height.get(hash).copied()
    }

    /// Append a block and persist it, its height mapping, and its transaction indexes in one
    /// atomic batch.
    pub fn push_back(&mut self, block: Block) -> Result<(), StorageError> {
        let mut batch = K::WriteBatch::new();
        batch.set(&combine(&paths::BLOCKS, &block.hash().bytes()), &block.to_rlp());
        batch.set(
            &combine(&paths::BLOCK_HEIGHT_MAPS, &block.height().to_be_bytes()),
            &block.hash().bytes(),
        );
        for tx in block.transactions().iter().chain(block.validator_transactions()) {
            batch.set(
                &combine(&paths::TRANSACTIONS, &tx.hash().bytes()),
                &tx.rlp_serialize(true),
            );
            batch.set(
                &combine(&paths::TX_TO_BLOCKS, &tx.hash().bytes()),
                &block.hash().bytes(),
            );
            self.tx_to_block.insert(tx.hash(), block.hash());
        }
        self.kv.write(batch);

        self.hash_to_height.insert(block.hash(), block.height());
        self.height_to_hash.insert(block.height(), block.hash());
        self.chain.push_back(block);
        if self.chain.len() > RECENT_BLOCKS {
            // The evicted block stays on disk; only the in-memory owner changes.
            self.chain.pop_front();
        }
        Ok(())
    }

    /// Remove the newest block from the chain and from storage. Not used by the consensus path
    /// (the chain is linear); kept for manual rollback tooling.
    pub fn pop_back(&mut self) -> Result<Option<Block>, StorageError> {
        let block = match self.chain.pop_back() {
            Some(block) => block,
            None => return Ok(None),
        };
        let mut batch = K::WriteBatch::new();
        batch.delete(&combine(&paths::BLOCKS, &block.hash().bytes()));
        batch.delete(&combine(&paths::BLOCK_HEIGHT_MAPS, &block.height().to_be_bytes()));
        for tx in block.transactions().iter().chain(block.validator_transactions()) {
            batch.delete(&combine(&paths::TRANSACTIONS, &tx.hash().bytes()));
            batch.delete(&combine(&paths::TX_TO_BLOCKS, &tx.hash().bytes()));
            self.tx_to_block.remove(&tx.hash());
        }
        self.kv.write(batch);
        self.hash_to_height.remove(&block.hash());
        self.height_to_hash.remove(&block.height());
        self.cache.remove(&block.hash());
        Ok(Some(block))
    }

    pub fn block_by_hash(&mut self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        if let Some(height) = self.hash_to_height.get(hash) {
            if let Some(block) = self.block_in_chain(*height) {
                return Ok(Some(block.clone()));
            }
        }
        if let Some(block) = self.cache.get(hash) {
            return Ok(Some(block.clone()));
        }
        match self.kv.block(hash)? {
            Some(block) => {
                self.cache.put(block.clone());
                Ok(Some(block))
            }
            None => Ok(None),
        }
    }

    pub fn block_by_height(&mut self, height: BlockHeight) -> Result<Option<Block>, StorageError> {
        match self.height_to_hash.get(&height).copied() {
            Some(hash) => self.block_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Look up a transaction and the hash of the block that contains it.
    pub fn transaction_by_hash(
        &mut self,
        tx_hash: &Hash,
    ) -> Result<Option<(Transaction, Hash)>, StorageError> {
        let block_hash = match self.tx_to_block.get(tx_hash).copied() {
            Some(hash) => hash,
            None => return Ok(None),
        };
        let block = self
            .block_by_hash(&block_hash)?
            .ok_or(StorageError::CorruptRecord)?;
        let tx = block
            .transactions()
            .iter()
            .chain(block.validator_transactions())
            .find(|tx| tx.hash() == *tx_hash)
            .cloned()
            .ok_or(StorageError::CorruptRecord)?;
        Ok(Some((tx, block_hash)))
    }

    fn block_in_chain(&self, height: BlockHeight) -> Option<&Block> {
        let front = self.chain.front()?.height();
        if height < front {
            return None;
        }
        self.chain.get((height - front) as usize)
    }
}

/// A bounded LRU of blocks loaded back from disk. Entries own their blocks.
struct BlockCache {
    capacity: usize,
    order: VecDeque<Hash>,
    blocks: HashMap<Hash, Block>,
}

impl BlockCache {
    fn new(capacity: usize) -> BlockCache {
        BlockCache {
            capacity,
            order: VecDeque::new(),
            blocks: HashMap::new(),
        }
    }

    fn get(&mut self, hash: &Hash) -> Option<&Block> {
        if self.blocks.contains_key(hash) {
            self.touch(hash);
        }
        self.blocks.get(hash)
    }

    fn put(&mut self, block: Block) {
        let hash = block.hash();
        if self.blocks.insert(hash, block).is_none() {
            self.order.push_back(hash);
            if self.order.len() > self.capacity {
                if let Some(evicted) = self.order.pop_front() {
                    self.blocks.remove(&evicted);
                }
            }
        } else {
            self.touch(&hash);
        }
    }

    fn remove(&mut self, hash: &Hash) {
        self.blocks.remove(hash);
        self.order.retain(|h| h != hash);
    }

    fn touch(&mut self, hash: &Hash) {
        self.order.retain(|h| h != hash);
        self.order.push_back(*hash);
    }
}
