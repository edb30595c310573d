/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The account state machine: transaction admission into the mempool, whole-block validation
//! against the pre-block state, block application, and new-block assembly.
//!
//! ## Locking
//!
//! One writer-preference lock guards the account table; the mempool guards itself. When more
//! than one table is locked the canonical order is `chain → accounts → mempool → validator set`:
//! block application is entered with the chain store's lock held, takes the account lock for the
//! whole application, and touches the mempool and validator set last. Admission takes the
//! account lock only for reads and the mempool lock only for the insert. Balance and nonce
//! queries are plain readers.

use ethereum_types::U256;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::app::{ExecutionHost, StateView};
use crate::rdpos::protocol::{ConsensusError, RdPos};
use crate::rdpos::types::Schedule;
use crate::state::block_store::BlockStore;
use crate::state::event_log::{self, EventRecord};
use crate::state::kv_store::{KVGet, KVStore, StorageError, WriteBatch};
use crate::state::mempool::Mempool;
use crate::state::paths::{self, combine};
use crate::state::Account;
use crate::types::basic::{ChainId, Timestamp};
use crate::types::block::{Block, StructuralError};
use crate::types::bytes::{Address, Hash};
use crate::types::transaction::Transaction;

pub struct ChainState<K: KVStore> {
    kv: RwLock<K>,
    chain_id: ChainId,
    accounts: RwLock<HashMap<Address, Account>>,
    mempool: Arc<Mempool>,
}

impl<K: KVStore> ChainState<K> {
    /// Open the state machine, loading the account table from storage.
    pub fn open(kv: K, chain_id: ChainId, mempool: Arc<Mempool>) -> Result<ChainState<K>, StorageError> {
        let accounts = kv.accounts()?.into_iter().collect();
        Ok(ChainState {
            kv: RwLock::new(kv),
            chain_id,
            accounts: RwLock::new(accounts),
            mempool,
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn balance(&self, address: &Address) -> U256 {
        self.accounts
            .read()
            .unwrap()
            .get(address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    pub fn nonce(&self, address: &Address) -> u32 {
        self.accounts
            .read()
            .unwrap()
            .get(address)
            .map(|account| account.nonce)
            .unwrap_or_default()
    }

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.accounts.read().unwrap().get(address).copied()
    }

    /// Admit a transaction into the user mempool, as called from the RPC (and gossip) ingress.
    ///
    /// On success the transaction sits in the mempool and the caller is expected to relay it to
    /// peers. On failure nothing changed and nothing must be relayed; in particular a
    /// [`Duplicate`](ValidationError::Duplicate) is not re-broadcast. A `Transaction` value is
    /// signature-verified by construction, so the signature check here is the chain id match.
    pub fn validate_for_rpc(&self, tx: Transaction) -> Result<(), ValidationError> {
        if !tx.matches_chain(self.chain_id) {
            return Err(ValidationError::BadSignature);
        }
        if self.mempool.locate(&tx.hash()).is_some() {
            return Err(ValidationError::Duplicate);
        }

        {
            let accounts = self.accounts.read().unwrap();
            let account = accounts
                .get(&tx.from())
                .ok_or(ValidationError::UnknownSender)?;
            let mut rejection = None;
            if account.balance < tx.cost() {
                rejection = Some(ValidationError::InsufficientBalance {
                    required: tx.cost(),
                    available: account.balance,
                });
            }
            if account.nonce != tx.nonce() {
                rejection = Some(ValidationError::InvalidNonce {
                    expected: account.nonce,
                    got: tx.nonce(),
                });
            }
            if let Some(rejection) = rejection {
                log::info!("Transaction rejected: {}", rejection);
                return Err(rejection);
            }
        }

        if !self.mempool.insert_user(tx) {
            return Err(ValidationError::Duplicate);
        }
        Ok(())
    }

    /// Validate a whole block against the chain head and the pre-block state snapshot, including
    /// the rdPoS consensus checks under `schedule`.
    pub fn validate_block(
        &self,
        block: &Block,
        latest: &Block,
        rdpos: &RdPos<K>,
        schedule: &Schedule,
    ) -> Result<(), BlockValidationError> {
        self.validate_block_contents(block, latest)?;
        rdpos.verify_block(block, schedule)?;
        Ok(())
    }

    /// The consensus-free part of block validation: chain linkage, Merkle commitments, and every
    /// user transaction's admission invariants against the *pre-block* state snapshot.
    pub fn validate_block_contents(
        &self,
        block: &Block,
        latest: &Block,
    ) -> Result<(), BlockValidationError> {
        if block.prev_hash() != latest.hash() {
            return Err(StructuralError::BadPrevHash.into());
        }
        if block.height() != latest.height() + 1 {
            return Err(StructuralError::BadHeight.into());
        }
        block.verify_structure()?;

        {
            let accounts = self.accounts.read().unwrap();
            for tx in block.transactions() {
                if !tx.matches_chain(self.chain_id) {
                    return Err(ValidationError::BadSignature.into());
                }
                let account = accounts
                    .get(&tx.from())
                    .ok_or(ValidationError::UnknownSender)?;
                if account.balance < tx.cost() {
                    return Err(ValidationError::InsufficientBalance {
                        required: tx.cost(),
                        available: account.balance,
                    }
                    .into());
                }
                if account.nonce != tx.nonce() {
                    return Err(ValidationError::InvalidNonce {
                        expected: account.nonce,
                        got: tx.nonce(),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Apply a validated block: transfer balances and bump nonces in order, run call data
    /// through the execution host, apply validator side effects and derive the next seed, append
    /// the block to the store, and clear both mempools. Returns the new seed.
    ///
    /// Storage failures here are fatal to the caller: the on-disk state stays consistent (the
    /// block batch is atomic) and the node must halt rather than continue from a half-applied
    /// view.
    pub fn process_block<H: ExecutionHost>(
        &self,
        block: &Block,
        store: &mut BlockStore<K>,
        rdpos: &RdPos<K>,
        host: &mut H,
    ) -> Result<Hash, StorageError> {
        let mut events = Vec::new();
        let mut deltas: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        {
            let mut accounts = self.accounts.write().unwrap();
            for tx in block.transactions() {
                if !tx.data().is_empty() {
                    let outcome = host.execute(tx, &AccountsView(&accounts));
                    deltas.extend(outcome.state_delta);
                    for log in outcome.logs {
                        events.push(EventRecord {
                            address: log.address,
                            block_height: block.height().int(),
                            tx_hash: tx.hash(),
                            log_index: events.len() as u64,
                            topics: log.topics,
                            data: log.data,
                        });
                    }
                }
                Self::apply_transfer(&mut accounts, tx);
            }
        }

        let seed = rdpos.process_block(block)?;
        store.push_back(block.clone())?;

        {
            let mut kv = self.kv.write().unwrap();
            if !deltas.is_empty() {
                let mut batch = K::WriteBatch::new();
                for (key, value) in &deltas {
                    batch.set(key, value);
                }
                kv.write(batch);
            }
            event_log::append_events(&mut *kv, &events)?;
        }

        self.mempool.clear();
        log::info!(
            "Applied block {} at height {}: {} txs, {} validator txs",
            block.hash(),
            block.height(),
            block.transactions().len(),
            block.validator_transactions().len()
        );
        Ok(seed)
    }

    fn apply_transfer(accounts: &mut HashMap<Address, Account>, tx: &Transaction) {
        let fee = tx.gas().saturating_mul(tx.gas_price());
        {
            let sender = accounts.entry(tx.from()).or_default();
            sender.balance = sender.balance.saturating_sub(tx.value()).saturating_sub(fee);
            sender.nonce += 1;
        }
        let recipient = accounts.entry(tx.to()).or_default();
        recipient.balance = recipient.balance.saturating_add(tx.value());
    }

    /// Assemble an unsigned block proposal: the user mempool snapshot in insertion order, and
    /// the canonical validator transaction list under `schedule`.
    pub fn create_block_proposal(
        &self,
        latest: &Block,
        timestamp: Timestamp,
        rdpos: &RdPos<K>,
        schedule: &Schedule,
    ) -> Result<Block, ConsensusError> {
        let transactions = self.mempool.user_snapshot();
        let validator_transactions = rdpos.assemble_validator_transactions(schedule)?;
        Ok(Block::assemble(
            latest.hash(),
            timestamp,
            latest.height() + 1,
            transactions,
            validator_transactions,
        ))
    }

    /// Persist the account table. Called on shutdown.
    pub fn save(&self) -> Result<(), StorageError> {
        let accounts = self.accounts.read().unwrap();
        let mut batch = K::WriteBatch::new();
        for (address, account) in accounts.iter() {
            batch.set(
                &combine(&paths::NATIVE_ACCOUNTS, &address.bytes()),
                &account.to_bytes(),
            );
        }
        self.kv.write().unwrap().write(batch);
        Ok(())
    }

    /// Record genesis account balances into a fresh store's batch.
    pub fn initialize_accounts(batch: &mut K::WriteBatch, balances: &[(Address, U256)]) {
        for (address, balance) in balances {
            let account = Account {
                balance: *balance,
                nonce: 0,
            };
            batch.set(
                &combine(&paths::NATIVE_ACCOUNTS, &address.bytes()),
                &account.to_bytes(),
            );
        }
    }
}

struct AccountsView<'a>(&'a HashMap<Address, Account>);

impl StateView for AccountsView<'_> {
    fn balance(&self, address: &Address) -> U256 {
        self.0.get(address).map(|a| a.balance).unwrap_or_default()
    }

    fn nonce(&self, address: &Address) -> u32 {
        self.0.get(address).map(|a| a.nonce).unwrap_or_default()
    }
}

/// Why a transaction was refused admission. Admission errors return to the caller with the
/// JSON-RPC code from [`json_rpc_code`](ValidationError::json_rpc_code) and leave no side
/// effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// The signature does not verify for this chain.
    BadSignature,
    InvalidNonce { expected: u32, got: u32 },
    InsufficientBalance { required: U256, available: U256 },
    /// The hash already sits in a mempool. Not really a failure: reported with code 0 and simply
    /// not re-broadcast.
    Duplicate,
    /// The sender has no account, so it cannot cover any fee.
    UnknownSender,
}

impl ValidationError {
    /// Standard Ethereum JSON-RPC error code conventions.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            ValidationError::InvalidNonce { .. } => -32001,
            ValidationError::InsufficientBalance { .. } => -32002,
            ValidationError::BadSignature | ValidationError::UnknownSender => -32003,
            ValidationError::Duplicate => 0,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::BadSignature => write!(f, "transaction signature not verified"),
            ValidationError::InvalidNonce { expected, got } => {
                write!(f, "invalid nonce: expected {}, got {}", expected, got)
            }
            ValidationError::InsufficientBalance {
                required,
                available,
            } => write!(
                f,
                "insufficient balance - required: {} available: {}",
                required, available
            ),
            ValidationError::Duplicate => write!(f, "NAN, Transaction already exists in mempool"),
            ValidationError::UnknownSender => {
                write!(f, "unknown sender: no balance to pay fees, available: 0")
            }
        }
    }
}

/// Why a proposed block was rejected. The node logs the rejection and continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockValidationError {
    Structural(StructuralError),
    Validation(ValidationError),
    Consensus(ConsensusError),
}

impl From<StructuralError> for BlockValidationError {
    fn from(err: StructuralError) -> BlockValidationError {
        BlockValidationError::Structural(err)
    }
}

impl From<ValidationError> for BlockValidationError {
    fn from(err: ValidationError) -> BlockValidationError {
        BlockValidationError::Validation(err)
    }
}

impl From<ConsensusError> for BlockValidationError {
    fn from(err: ConsensusError) -> BlockValidationError {
        BlockValidationError::Consensus(err)
    }
}

impl std::fmt::Display for BlockValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockValidationError::Structural(err) => write!(f, "{}", err),
            BlockValidationError::Validation(err) => write!(f, "{}", err),
            BlockValidationError::Consensus(err) => write!(f, "{}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::NoopHost;
    use crate::test_utils::{transfer, MemDB, TEST_CHAIN};
    use crate::types::basic::BlockHeight;
    use crate::types::crypto::Keypair;

    const FUNDS: u64 = 10_000_000;

    /// A store holding a genesis block and one funded account.
    fn setup(keypair: &Keypair) -> (ChainState<MemDB>, BlockStore<MemDB>, RdPos<MemDB>) {
        let mut kv = MemDB::new();
        let genesis = Block::assemble(
            Hash::ZERO,
            Timestamp::new(0),
            BlockHeight::new(0),
            Vec::new(),
            Vec::new(),
        );
        let mut batch = <MemDB as KVStore>::WriteBatch::new();
        batch.set(
            &combine(&paths::BLOCKS, &genesis.hash().bytes()),
            &genesis.to_rlp(),
        );
        batch.set(
            &combine(&paths::BLOCK_HEIGHT_MAPS, &genesis.height().to_be_bytes()),
            &genesis.hash().bytes(),
        );
        ChainState::<MemDB>::initialize_accounts(
            &mut batch,
            &[(keypair.address(), U256::from(FUNDS))],
        );
        kv.write(batch);

        let mempool = Arc::new(Mempool::new());
        let store = BlockStore::open(kv.clone()).unwrap();
        let rdpos = RdPos::open(kv.clone(), TEST_CHAIN, mempool.clone(), store.latest()).unwrap();
        let state = ChainState::open(kv, TEST_CHAIN, mempool).unwrap();
        (state, store, rdpos)
    }

    fn recipient() -> Address {
        Address::new([0x77; 20])
    }

    #[test]
    fn admission_rejects_unknown_senders() {
        let alice = Keypair::random();
        let (state, _, _) = setup(&alice);
        let stranger = Keypair::random();
        let tx = transfer(&stranger, recipient(), 100, 0);
        let err = state.validate_for_rpc(tx).unwrap_err();
        assert_eq!(err, ValidationError::UnknownSender);
        assert_eq!(err.json_rpc_code(), -32003);
    }

    #[test]
    fn admission_rejects_a_skipped_nonce() {
        let alice = Keypair::random();
        let (state, _, _) = setup(&alice);
        let tx = transfer(&alice, recipient(), 100, 1);
        let err = state.validate_for_rpc(tx).unwrap_err();
        assert_eq!(err, ValidationError::InvalidNonce { expected: 0, got: 1 });
        assert_eq!(err.json_rpc_code(), -32001);
    }

    #[test]
    fn admission_rejects_an_uncovered_cost() {
        let alice = Keypair::random();
        let (state, _, _) = setup(&alice);
        let tx = transfer(&alice, recipient(), FUNDS, 0); // value + fee > FUNDS
        let err = state.validate_for_rpc(tx).unwrap_err();
        assert!(matches!(err, ValidationError::InsufficientBalance { .. }));
        assert_eq!(err.json_rpc_code(), -32002);
    }

    #[test]
    fn resubmitting_reports_a_duplicate_with_code_zero() {
        let alice = Keypair::random();
        let (state, _, _) = setup(&alice);
        let tx = transfer(&alice, recipient(), 100, 0);
        state.validate_for_rpc(tx.clone()).unwrap();
        let err = state.validate_for_rpc(tx).unwrap_err();
        assert_eq!(err, ValidationError::Duplicate);
        assert_eq!(err.json_rpc_code(), 0);
        assert_eq!(err.to_string(), "NAN, Transaction already exists in mempool");
    }

    #[test]
    fn wrong_chain_transactions_are_refused() {
        let alice = Keypair::random();
        let (state, _, _) = setup(&alice);
        let tx = Transaction::new(
            recipient(),
            U256::from(100),
            Vec::new(),
            ChainId::new(1),
            0,
            U256::one(),
            U256::from(21000),
            &alice,
        );
        assert_eq!(state.validate_for_rpc(tx), Err(ValidationError::BadSignature));
    }

    #[test]
    fn proposals_carry_the_mempool_in_insertion_order() {
        let alice = Keypair::random();
        let (state, store, _rdpos) = setup(&alice);
        // Same-nonce transactions to distinct recipients: admission sees the same pre-state.
        let first = transfer(&alice, Address::new([1; 20]), 100, 0);
        let second = transfer(&alice, Address::new([2; 20]), 100, 0);
        state.validate_for_rpc(first.clone()).unwrap();
        state.validate_for_rpc(second.clone()).unwrap();

        // No beacon in this fixture; only the user transaction list matters here.
        let latest = store.latest().unwrap().clone();
        let block = Block::assemble(
            latest.hash(),
            Timestamp::new(1),
            latest.height() + 1,
            state.mempool.user_snapshot(),
            Vec::new(),
        );
        let hashes: Vec<Hash> = block.transactions().iter().map(|tx| tx.hash()).collect();
        assert_eq!(hashes, vec![first.hash(), second.hash()]);
    }

    #[test]
    fn applying_a_block_moves_value_and_advances_nonces() {
        let alice = Keypair::random();
        let (state, mut store, rdpos) = setup(&alice);
        let txs = vec![
            transfer(&alice, recipient(), 1_000, 0),
            transfer(&alice, recipient(), 2_000, 1),
        ];
        let latest = store.latest().unwrap().clone();
        let block = Block::assemble(
            latest.hash(),
            Timestamp::new(1),
            latest.height() + 1,
            txs.clone(),
            Vec::new(),
        );

        let total_before = state.balance(&alice.address()) + state.balance(&recipient());
        state
            .process_block(&block, &mut store, &rdpos, &mut NoopHost)
            .unwrap();

        assert_eq!(state.nonce(&alice.address()), 2);
        assert_eq!(state.balance(&recipient()), U256::from(3_000));
        let fees: U256 = txs.iter().fold(U256::zero(), |acc, tx| {
            acc + tx.gas() * tx.gas_price()
        });
        let total_after = state.balance(&alice.address()) + state.balance(&recipient());
        // Fees are deducted, never minted anywhere.
        assert_eq!(total_before - total_after, fees);

        // The block landed in the store and the mempool is empty.
        assert_eq!(store.latest().unwrap().hash(), block.hash());
        assert_eq!(state.mempool.user_len(), 0);
    }

    #[test]
    fn blocks_must_extend_the_chain_head() {
        let alice = Keypair::random();
        let (state, store, _) = setup(&alice);
        let latest = store.latest().unwrap().clone();

        let stray = Block::assemble(
            Hash::random(),
            Timestamp::new(1),
            latest.height() + 1,
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(
            state.validate_block_contents(&stray, &latest),
            Err(BlockValidationError::Structural(StructuralError::BadPrevHash))
        ));

        let skipped = Block::assemble(
            latest.hash(),
            Timestamp::new(1),
            latest.height() + 2,
            Vec::new(),
            Vec::new(),
        );
        assert!(matches!(
            state.validate_block_contents(&skipped, &latest),
            Err(BlockValidationError::Structural(StructuralError::BadHeight))
        ));
    }
}
