/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The rdPoS engine: validator set bookkeeping, the commit/reveal randomness beacon, producer
//! election, and the consensus half of block verification and application.
//!
//! ## Seeds and schedules
//!
//! For every height `h` there is a 32-byte seed. The schedule for `h` is a Fisher–Yates shuffle
//! of the validator set keyed solely by `seed[h]`: index 0 produces the block, indexes
//! `1..MIN_VALIDATORS` co-sign it, and those same `MIN_VALIDATORS` validators each commit
//! `keccak(sᵢ)` and later reveal `sᵢ` inside the block's validator transactions. The next seed is
//! `seed[h+1] = keccak(s₀ ‖ … ‖ s_{k−1})`, ordered by schedule index, so no validator can predict
//! the schedule more than one block ahead and none can steer it unilaterally.
//!
//! A committed hash whose reveal never arrives contributes 32 zero bytes to the next seed; the
//! commit itself still counts. A reveal that does not match its commit invalidates the whole
//! block.
//!
//! If the elected producer stays silent past its timeout, every node re-shuffles with
//! `keccak(seed[h] ‖ "skip")` and the fallback schedule takes over.
//!
//! The engine persists the validator set under the
//! [`VALIDATORS`](crate::state::paths::VALIDATORS) prefix as `(index ‖ address)` records. The
//! seed is not persisted: it is a pure function of the latest block's validator transactions and
//! is re-derived on startup.

use std::sync::{Arc, RwLock};

use crate::state::kv_store::{KVGet, KVStore, StorageError, WriteBatch};
use crate::state::mempool::Mempool;
use crate::state::paths::{self, combine};
use crate::types::basic::ChainId;
use crate::types::block::Block;
use crate::types::bytes::{Address, Hash};
use crate::types::crypto::{keccak256, recover_signer};
use crate::types::transaction::Transaction;
use crate::types::validator_set::{ValidatorSet, MIN_VALIDATORS};

use super::types::{Schedule, ValidatorPayload};

/// Suffix mixed into the seed when deriving a fallback schedule after a producer timeout.
const FALLBACK_SUFFIX: &[u8] = b"skip";

pub struct RdPos<K: KVStore> {
    kv: RwLock<K>,
    chain_id: ChainId,
    validators: RwLock<ValidatorSet>,
    /// The seed for the next block to be produced.
    seed: RwLock<Hash>,
    mempool: Arc<Mempool>,
}

impl<K: KVStore> RdPos<K> {
    /// Open the engine: load the validator set from storage and re-derive the current seed from
    /// the latest block's validator transactions (the zero seed on a fresh chain).
    pub fn open(
        kv: K,
        chain_id: ChainId,
        mempool: Arc<Mempool>,
        latest_block: Option<&Block>,
    ) -> Result<RdPos<K>, StorageError> {
        let validators = kv.validator_set()?;
        let seed = match latest_block {
            Some(block) => Self::derive_seed(block),
            None => Hash::ZERO,
        };
        Ok(RdPos {
            kv: RwLock::new(kv),
            chain_id,
            validators: RwLock::new(validators),
            seed: RwLock::new(seed),
            mempool,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    /// The seed the next block's schedule derives from.
    pub fn current_seed(&self) -> Hash {
        *self.seed.read().unwrap()
    }

    pub fn validator_set(&self) -> ValidatorSet {
        self.validators.read().unwrap().clone()
    }

    pub fn is_validator(&self, address: &Address) -> bool {
        self.validators.read().unwrap().contains(address)
    }

    /// The schedule for the next block. Refuses with
    /// [`InsufficientValidators`](ConsensusError::InsufficientValidators) when the set is smaller
    /// than [`MIN_VALIDATORS`].
    pub fn schedule(&self) -> Result<Schedule, ConsensusError> {
        self.schedule_for_seed(self.current_seed())
    }

    /// The schedule used after the elected producer missed its timeout: a re-shuffle keyed by
    /// `keccak(seed ‖ "skip")`.
    pub fn fallback_schedule(&self) -> Result<Schedule, ConsensusError> {
        let seed = self.current_seed();
        let mut preimage = Vec::with_capacity(32 + FALLBACK_SUFFIX.len());
        preimage.extend_from_slice(&seed.bytes());
        preimage.extend_from_slice(FALLBACK_SUFFIX);
        self.schedule_for_seed(keccak256(&preimage))
    }

    fn schedule_for_seed(&self, seed: Hash) -> Result<Schedule, ConsensusError> {
        let validators = self.validators.read().unwrap();
        if !validators.can_produce_blocks() {
            return Err(ConsensusError::InsufficientValidators {
                have: validators.len(),
                need: MIN_VALIDATORS,
            });
        }
        Ok(Schedule::derive(&validators, seed))
    }

    /// Admit a validator transaction into the validator mempool. Returns whether it was newly
    /// inserted (`false` on duplicate).
    pub fn add_validator_tx(&self, tx: Transaction) -> Result<bool, ConsensusError> {
        if !tx.matches_chain(self.chain_id) {
            return Err(ConsensusError::InvalidPayload);
        }
        if ValidatorPayload::from_transaction(&tx).is_none() {
            return Err(ConsensusError::InvalidPayload);
        }
        if !self.is_validator(&tx.from()) {
            return Err(ConsensusError::ValidatorNotInSet(tx.from()));
        }
        Ok(self.mempool.insert_validator(tx))
    }

    /// Assemble the canonical validator transaction list for a block under `schedule`: the
    /// `randomHash` commit of each contributor in schedule order, the matching `randomSeed`
    /// reveals in the same order, and finally any pending `addValidator`/`removeValidator`
    /// transactions (ordered by hash, so re-assembly is deterministic).
    pub fn assemble_validator_transactions(
        &self,
        schedule: &Schedule,
    ) -> Result<Vec<Transaction>, ConsensusError> {
        let pool = self.mempool.validator_snapshot();
        let mut commits = Vec::with_capacity(MIN_VALIDATORS);
        let mut reveals = Vec::with_capacity(MIN_VALIDATORS);
        for contributor in schedule.contributors() {
            let commit = pool
                .iter()
                .find(|tx| {
                    tx.from() == *contributor
                        && matches!(
                            ValidatorPayload::from_transaction(tx),
                            Some(ValidatorPayload::RandomHash(_))
                        )
                })
                .ok_or(ConsensusError::MissingRandomness(*contributor))?;
            let committed = match ValidatorPayload::from_transaction(commit) {
                Some(ValidatorPayload::RandomHash(hash)) => hash,
                _ => unreachable!(),
            };
            let reveal = pool
                .iter()
                .find(|tx| {
                    tx.from() == *contributor
                        && match ValidatorPayload::from_transaction(tx) {
                            Some(ValidatorPayload::RandomSeed(secret)) => {
                                keccak256(&secret.bytes()) == committed
                            }
                            _ => false,
                        }
                })
                .ok_or(ConsensusError::MissingRandomness(*contributor))?;
            commits.push(commit.clone());
            reveals.push(reveal.clone());
        }
        commits.extend(reveals);

        let mut management: Vec<Transaction> = pool
            .iter()
            .filter(|tx| {
                matches!(
                    ValidatorPayload::from_transaction(tx),
                    Some(ValidatorPayload::AddValidator(_))
                        | Some(ValidatorPayload::RemoveValidator(_))
                )
            })
            .cloned()
            .collect();
        management.sort_by_key(|tx| tx.hash());
        commits.extend(management);
        Ok(commits)
    }

    /// Whether every contributor's `randomHash` commit is in the validator mempool.
    pub fn commits_present(&self, schedule: &Schedule) -> bool {
        let pool = self.mempool.validator_snapshot();
        schedule.contributors().iter().all(|contributor| {
            pool.iter().any(|tx| {
                tx.from() == *contributor
                    && matches!(
                        ValidatorPayload::from_transaction(tx),
                        Some(ValidatorPayload::RandomHash(_))
                    )
            })
        })
    }

    /// Whether every contributor's matching `randomSeed` reveal is in the validator mempool.
    pub fn reveals_present(&self, schedule: &Schedule) -> bool {
        let pool = self.mempool.validator_snapshot();
        schedule.contributors().iter().all(|contributor| {
            let committed = pool.iter().find_map(|tx| {
                if tx.from() != *contributor {
                    return None;
                }
                match ValidatorPayload::from_transaction(tx) {
                    Some(ValidatorPayload::RandomHash(hash)) => Some(hash),
                    _ => None,
                }
            });
            let committed = match committed {
                Some(hash) => hash,
                None => return false,
            };
            pool.iter().any(|tx| {
                tx.from() == *contributor
                    && match ValidatorPayload::from_transaction(tx) {
                        Some(ValidatorPayload::RandomSeed(secret)) => {
                            keccak256(&secret.bytes()) == committed
                        }
                        _ => false,
                    }
            })
        })
    }

    /// The checks a co-signer runs on a proposal that does not carry its co-signature set yet:
    /// the producer signature and the beacon content and ordering.
    pub fn verify_proposal(&self, block: &Block, schedule: &Schedule) -> Result<(), ConsensusError> {
        let producer = recover_signer(&block.hash(), &block.producer_signature())
            .map_err(|_| ConsensusError::WrongProducer)?;
        if producer != schedule.producer() {
            return Err(ConsensusError::WrongProducer);
        }
        self.verify_randomness(block, schedule)
    }

    /// The consensus half of block validation, against the given (primary or fallback) schedule:
    /// producer and co-signer signatures, and the commit/reveal content and ordering of the
    /// block's validator transactions.
    pub fn verify_block(&self, block: &Block, schedule: &Schedule) -> Result<(), ConsensusError> {
        self.verify_proposal(block, schedule)?;

        // Co-signers, in schedule order. Order implies the k signers are distinct.
        let cosigners = schedule.cosigners();
        if block.validator_signatures().len() != cosigners.len() {
            return Err(ConsensusError::MissingCoSignature);
        }
        for (signature, expected) in block.validator_signatures().iter().zip(cosigners) {
            let signer = recover_signer(&block.hash(), signature)
                .map_err(|_| ConsensusError::MissingCoSignature)?;
            if signer != *expected {
                return Err(ConsensusError::ScheduleMismatch);
            }
        }
        Ok(())
    }

    /// Check the block's validator transactions: `MIN_VALIDATORS` commits then as many reveals,
    /// both ordered by schedule index, every signer a set member, every reveal matching its
    /// commit. Anything after the beacon must be a validator set change signed by a set member.
    fn verify_randomness(&self, block: &Block, schedule: &Schedule) -> Result<(), ConsensusError> {
        let validator_txs = block.validator_transactions();
        if validator_txs.len() < 2 * MIN_VALIDATORS {
            return Err(ConsensusError::MissingCoSignature);
        }
        let (beacon, management) = validator_txs.split_at(2 * MIN_VALIDATORS);
        let (commits, reveals) = beacon.split_at(MIN_VALIDATORS);

        for tx in management {
            if !self.is_validator(&tx.from()) {
                return Err(ConsensusError::ValidatorNotInSet(tx.from()));
            }
            if !tx.matches_chain(self.chain_id) {
                return Err(ConsensusError::ScheduleMismatch);
            }
            match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::AddValidator(_))
                | Some(ValidatorPayload::RemoveValidator(_)) => (),
                _ => return Err(ConsensusError::ScheduleMismatch),
            }
        }

        let mut committed = Vec::with_capacity(MIN_VALIDATORS);
        for (tx, contributor) in commits.iter().zip(schedule.contributors()) {
            if !self.is_validator(&tx.from()) {
                return Err(ConsensusError::ValidatorNotInSet(tx.from()));
            }
            if tx.from() != *contributor || !tx.matches_chain(self.chain_id) {
                return Err(ConsensusError::ScheduleMismatch);
            }
            match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::RandomHash(hash)) => committed.push(hash),
                _ => return Err(ConsensusError::ScheduleMismatch),
            }
        }
        for ((tx, contributor), committed_hash) in
            reveals.iter().zip(schedule.contributors()).zip(&committed)
        {
            if !self.is_validator(&tx.from()) {
                return Err(ConsensusError::ValidatorNotInSet(tx.from()));
            }
            if tx.from() != *contributor || !tx.matches_chain(self.chain_id) {
                return Err(ConsensusError::ScheduleMismatch);
            }
            match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::RandomSeed(secret)) => {
                    if keccak256(&secret.bytes()) != *committed_hash {
                        return Err(ConsensusError::CommitRevealMismatch);
                    }
                }
                _ => return Err(ConsensusError::ScheduleMismatch),
            }
        }
        Ok(())
    }

    /// Apply a validated block's consensus side effects: validator set changes, then the
    /// derivation of the next seed. Returns the new seed.
    pub fn process_block(&self, block: &Block) -> Result<Hash, StorageError> {
        let mut validators = self.validators.write().unwrap();
        let mut changed = false;
        for tx in block.validator_transactions() {
            match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::AddValidator(address)) => {
                    changed |= validators.put(address);
                }
                Some(ValidatorPayload::RemoveValidator(address)) => {
                    changed |= validators.remove(&address);
                }
                _ => (),
            }
        }
        if changed {
            Self::save_validators(&mut self.kv.write().unwrap(), &validators)?;
        }
        drop(validators);

        let seed = Self::derive_seed(block);
        *self.seed.write().unwrap() = seed;
        Ok(seed)
    }

    /// Derive the next seed from a block's reveals: the keccak-256 digest of the revealed
    /// secrets concatenated in block order, substituting 32 zero bytes for any commit whose
    /// reveal is absent. A block with no commits (the genesis block) derives the zero seed.
    pub fn derive_seed(block: &Block) -> Hash {
        let commits: Vec<(Address, Hash)> = block
            .validator_transactions()
            .iter()
            .filter_map(|tx| match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::RandomHash(hash)) => Some((tx.from(), hash)),
                _ => None,
            })
            .collect();
        if commits.is_empty() {
            return Hash::ZERO;
        }

        let reveals: Vec<(Address, Hash)> = block
            .validator_transactions()
            .iter()
            .filter_map(|tx| match ValidatorPayload::from_transaction(tx) {
                Some(ValidatorPayload::RandomSeed(secret)) => Some((tx.from(), secret)),
                _ => None,
            })
            .collect();

        let mut preimage = Vec::with_capacity(32 * commits.len());
        for (committer, committed_hash) in &commits {
            let reveal = reveals.iter().find(|(revealer, secret)| {
                revealer == committer && keccak256(&secret.bytes()) == *committed_hash
            });
            match reveal {
                Some((_, secret)) => preimage.extend_from_slice(&secret.bytes()),
                None => preimage.extend_from_slice(&[0u8; 32]),
            }
        }
        keccak256(&preimage)
    }

    /// Record the genesis validator set into a fresh store's batch.
    pub fn initialize_validators(
        batch: &mut K::WriteBatch,
        validators: &ValidatorSet,
    ) {
        for (index, address) in validators.to_records() {
            batch.set(
                &combine(&paths::VALIDATORS, &index.to_be_bytes()),
                &address.bytes(),
            );
        }
    }

    fn save_validators(kv: &mut K, validators: &ValidatorSet) -> Result<(), StorageError> {
        // Rewrite the whole table: indexes shift when a validator is removed.
        let mut batch = K::WriteBatch::new();
        for (key, _) in kv.get_batch(&paths::VALIDATORS) {
            batch.delete(&combine(&paths::VALIDATORS, &key));
        }
        for (index, address) in validators.to_records() {
            batch.set(
                &combine(&paths::VALIDATORS, &index.to_be_bytes()),
                &address.bytes(),
            );
        }
        kv.write(batch);
        Ok(())
    }
}

/// Why a block (or validator transaction) fails rdPoS's consensus rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsensusError {
    /// The producer signature does not recover to the scheduled producer.
    WrongProducer,
    /// Fewer co-signatures (or beacon transactions) than the protocol requires.
    MissingCoSignature,
    /// A revealed secret does not hash to the committed value.
    CommitRevealMismatch,
    /// Signatures or beacon transactions are not in schedule order.
    ScheduleMismatch,
    /// The signer is not a member of the validator set.
    ValidatorNotInSet(Address),
    /// The validator set is smaller than the protocol minimum.
    InsufficientValidators { have: usize, need: usize },
    /// The transaction does not carry a well-formed validator payload for this chain.
    InvalidPayload,
    /// A contributor's commit or matching reveal is not in the validator mempool yet.
    MissingRandomness(Address),
}

impl std::fmt::Display for ConsensusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsensusError::WrongProducer => write!(f, "block not signed by the scheduled producer"),
            ConsensusError::MissingCoSignature => write!(f, "missing co-signatures or beacon transactions"),
            ConsensusError::CommitRevealMismatch => write!(f, "revealed seed does not match its commitment"),
            ConsensusError::ScheduleMismatch => write!(f, "validator transactions out of schedule order"),
            ConsensusError::ValidatorNotInSet(address) => {
                write!(f, "signer {} is not in the validator set", address)
            }
            ConsensusError::InsufficientValidators { have, need } => {
                write!(f, "validator set has {} members, need {}", have, need)
            }
            ConsensusError::InvalidPayload => write!(f, "malformed validator transaction payload"),
            ConsensusError::MissingRandomness(address) => {
                write!(f, "no commit/reveal pair from {} yet", address)
            }
        }
    }
}
