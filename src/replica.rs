/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that [initialize](Replica::initialize) and [start](ReplicaSpec::start) a node, the
//! [type](Replica) that keeps it alive, and the read-only [camera](ChainCamera) over its state.
//!
//! A running replica is four threads: the network poller, the rdPoS worker, the sync server, and
//! (when any handler is registered) the event bus. Dropping the `Replica` shuts them down in
//! reverse dependency order and persists the account table.
//!
//! Every node holds the same code; whether it *acts* as a validator is decided by whether a
//! keypair is configured and whether that keypair's address is in the validator set. Nodes
//! without either simply follow the chain.

use ethereum_types::U256;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::algorithm::start_algorithm;
use crate::app::ExecutionHost;
use crate::block_sync::start_sync_server;
use crate::event_bus::{start_event_bus, EventHandlers, HandlerPtr};
use crate::events::*;
use crate::messages::Message;
use crate::networking::{start_polling, Network};
use crate::rdpos::protocol::RdPos;
use crate::state::block_store::BlockStore;
use crate::state::event_log::{self, EventRecord};
use crate::state::kv_store::{KVStore, WriteBatch};
use crate::state::mempool::Mempool;
use crate::state::paths::{self, combine};
use crate::state::state_machine::{ChainState, ValidationError};
use crate::types::basic::{BlockHeight, ChainId, Timestamp};
use crate::types::block::Block;
use crate::types::bytes::{Address, Hash};
use crate::types::crypto::Keypair;
use crate::types::transaction::Transaction;
use crate::types::validator_set::ValidatorSet;

/// Tunable parameters of a replica. All timeouts bound a suspension point of the worker loop,
/// so shutdown latency is bounded by the largest of them.
#[derive(Clone, TypedBuilder)]
pub struct Configuration {
    pub chain_id: ChainId,
    /// How long a contributor waits for all `randomHash` commits of its height.
    #[builder(default = Duration::from_millis(2000))]
    pub commit_timeout: Duration,
    /// How long a contributor waits for all `randomSeed` reveals of its height.
    #[builder(default = Duration::from_millis(2000))]
    pub reveal_timeout: Duration,
    /// How long everyone waits for the elected producer's block before re-shuffling.
    #[builder(default = Duration::from_millis(4000))]
    pub producer_timeout: Duration,
    /// How long the producer waits for its co-signature quorum.
    #[builder(default = Duration::from_millis(2000))]
    pub cosign_timeout: Duration,
    /// How long the sync client waits for a peer's answer to one block request.
    #[builder(default = Duration::from_millis(3000))]
    pub sync_response_timeout: Duration,
    /// Register the default CSV logging handlers for every event.
    #[builder(default = true)]
    pub log_events: bool,
}

/// The genesis content a fresh chain starts from.
#[derive(Clone)]
pub struct Genesis {
    pub timestamp: Timestamp,
    pub initial_balances: Vec<(Address, U256)>,
    pub initial_validators: ValidatorSet,
}

/// Specification of a replica: its collaborators, configuration, and event handlers. Build one
/// with [`ReplicaSpec::builder`], then call [`start`](Self::start).
#[derive(TypedBuilder)]
pub struct ReplicaSpec<K: KVStore, N: Network, H: ExecutionHost> {
    kv_store: K,
    network: N,
    execution_host: H,
    configuration: Configuration,
    /// The identity this node signs with, if it may act as a validator.
    #[builder(default, setter(strip_option))]
    keypair: Option<Keypair>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&StartHeightEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<StartHeightEvent>)))]
    on_start_height: Option<HandlerPtr<StartHeightEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&CommitRandomnessEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<CommitRandomnessEvent>)))]
    on_commit_randomness: Option<HandlerPtr<CommitRandomnessEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&RevealRandomnessEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<RevealRandomnessEvent>)))]
    on_reveal_randomness: Option<HandlerPtr<RevealRandomnessEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&ProposeEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<ProposeEvent>)))]
    on_propose: Option<HandlerPtr<ProposeEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&ReceiveProposalEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<ReceiveProposalEvent>)))]
    on_receive_proposal: Option<HandlerPtr<ReceiveProposalEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&CoSignEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<CoSignEvent>)))]
    on_co_sign: Option<HandlerPtr<CoSignEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&CollectCoSignaturesEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<CollectCoSignaturesEvent>)))]
    on_collect_co_signatures: Option<HandlerPtr<CollectCoSignaturesEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&BroadcastBlockEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<BroadcastBlockEvent>)))]
    on_broadcast_block: Option<HandlerPtr<BroadcastBlockEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&ProducerTimeoutEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<ProducerTimeoutEvent>)))]
    on_producer_timeout: Option<HandlerPtr<ProducerTimeoutEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&AdmitTransactionEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<AdmitTransactionEvent>)))]
    on_admit_transaction: Option<HandlerPtr<AdmitTransactionEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&ApplyBlockEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<ApplyBlockEvent>)))]
    on_apply_block: Option<HandlerPtr<ApplyBlockEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&UpdateValidatorSetEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<UpdateValidatorSetEvent>)))]
    on_update_validator_set: Option<HandlerPtr<UpdateValidatorSetEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&StartSyncEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<StartSyncEvent>)))]
    on_start_sync: Option<HandlerPtr<StartSyncEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&EndSyncEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<EndSyncEvent>)))]
    on_end_sync: Option<HandlerPtr<EndSyncEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&ReceiveSyncRequestEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<ReceiveSyncRequestEvent>)))]
    on_receive_sync_request: Option<HandlerPtr<ReceiveSyncRequestEvent>>,
    #[builder(default, setter(transform =
        |handler: impl Fn(&SendSyncResponseEvent) + Send + 'static|
            Some(Box::new(handler) as HandlerPtr<SendSyncResponseEvent>)))]
    on_send_sync_response: Option<HandlerPtr<SendSyncResponseEvent>>,
}

impl<K: KVStore, N: Network, H: ExecutionHost> ReplicaSpec<K, N, H> {
    /// Start the replica: open the stores, hand the validator set to the networking provider,
    /// and spawn the threads.
    ///
    /// # Panics
    /// Panics if the key-value store was never [initialized](Replica::initialize) or holds
    /// corrupt records.
    pub fn start(self) -> Replica<K, N> {
        let configuration = self.configuration;
        let mut network = self.network;

        let block_store =
            BlockStore::open(self.kv_store.clone()).expect("Failed to open the block store.");
        assert!(
            block_store.latest().is_some(),
            "The key-value store was not initialized with a genesis state."
        );
        let mempool = Arc::new(Mempool::new());
        let rdpos = Arc::new(
            RdPos::open(
                self.kv_store.clone(),
                configuration.chain_id,
                mempool.clone(),
                block_store.latest(),
            )
            .expect("Failed to open the rdPoS engine."),
        );
        let state = Arc::new(
            ChainState::open(self.kv_store.clone(), configuration.chain_id, mempool)
                .expect("Failed to open the state machine."),
        );
        let block_store = Arc::new(RwLock::new(block_store));

        network.init_validator_set(rdpos.validator_set());

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_start_height,
            self.on_commit_randomness,
            self.on_reveal_randomness,
            self.on_propose,
            self.on_receive_proposal,
            self.on_co_sign,
            self.on_collect_co_signatures,
            self.on_broadcast_block,
            self.on_producer_timeout,
            self.on_admit_transaction,
            self.on_apply_block,
            self.on_update_validator_set,
            self.on_start_sync,
            self.on_end_sync,
            self.on_receive_sync_request,
            self.on_send_sync_response,
        );

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, consensus_receiver, gossip_receiver, sync_requests, sync_answers) =
            start_polling(network.clone(), poller_shutdown_receiver);

        let (event_publisher, event_bus, event_bus_shutdown) = if event_handlers.is_empty() {
            (None, None, None)
        } else {
            let (event_publisher, event_subscriber) = mpsc::channel();
            let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
            let event_bus = start_event_bus(
                event_handlers,
                event_subscriber,
                event_bus_shutdown_receiver,
            );
            (Some(event_publisher), Some(event_bus), Some(event_bus_shutdown))
        };

        let (sync_server_shutdown, sync_server_shutdown_receiver) = mpsc::channel();
        let sync_server = start_sync_server(
            block_store.clone(),
            network.clone(),
            sync_requests,
            sync_server_shutdown_receiver,
            event_publisher.clone(),
        );

        let (algorithm_shutdown, algorithm_shutdown_receiver) = mpsc::channel();
        let algorithm = start_algorithm(
            configuration.clone(),
            self.keypair,
            state.clone(),
            block_store.clone(),
            rdpos.clone(),
            Arc::new(Mutex::new(self.execution_host)),
            network.clone(),
            consensus_receiver,
            gossip_receiver,
            sync_answers,
            algorithm_shutdown_receiver,
            event_publisher,
        );

        Replica {
            block_store,
            state,
            rdpos,
            network: Mutex::new(network),
            kv_store: self.kv_store,
            poller: Some(poller),
            poller_shutdown,
            algorithm: Some(algorithm),
            algorithm_shutdown,
            sync_server: Some(sync_server),
            sync_server_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

pub struct Replica<K: KVStore, N: Network> {
    block_store: Arc<RwLock<BlockStore<K>>>,
    state: Arc<ChainState<K>>,
    rdpos: Arc<RdPos<K>>,
    network: Mutex<N>,
    kv_store: K,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    algorithm: Option<JoinHandle<()>>,
    algorithm_shutdown: Sender<()>,
    sync_server: Option<JoinHandle<()>>,
    sync_server_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, N: Network> Replica<K, N> {
    /// Write the genesis state into a fresh key-value store: the genesis block at height 0, the
    /// initial account balances, and the initial validator set, in one atomic batch.
    pub fn initialize(mut kv_store: K, genesis: Genesis) {
        let genesis_block = Block::assemble(
            Hash::ZERO,
            genesis.timestamp,
            BlockHeight::new(0),
            Vec::new(),
            Vec::new(),
        );
        let mut batch = K::WriteBatch::new();
        batch.set(
            &combine(&paths::BLOCKS, &genesis_block.hash().bytes()),
            &genesis_block.to_rlp(),
        );
        batch.set(
            &combine(&paths::BLOCK_HEIGHT_MAPS, &genesis_block.height().to_be_bytes()),
            &genesis_block.hash().bytes(),
        );
        ChainState::<K>::initialize_accounts(&mut batch, &genesis.initial_balances);
        RdPos::<K>::initialize_validators(&mut batch, &genesis.initial_validators);
        kv_store.write(batch);
    }

    /// Admit a transaction through the RPC ingress path and, on success, relay it to peers.
    /// A [`Duplicate`](ValidationError::Duplicate) is reported but never re-broadcast.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<(), ValidationError> {
        let encoded = tx.rlp_serialize(true);
        self.state.validate_for_rpc(tx)?;
        self.network
            .lock()
            .unwrap()
            .broadcast(Message::BroadcastTransaction(encoded));
        Ok(())
    }

    /// Announce a validator transaction (a beacon contribution or a validator set change) into
    /// the validator mempool and to peers. The signer must be a member of the validator set.
    pub fn submit_validator_transaction(
        &self,
        tx: Transaction,
    ) -> Result<bool, crate::rdpos::protocol::ConsensusError> {
        let encoded = tx.rlp_serialize(true);
        let inserted = self.rdpos.add_validator_tx(tx)?;
        if inserted {
            self.network
                .lock()
                .unwrap()
                .broadcast(Message::BroadcastValidatorTransaction(encoded));
        }
        Ok(inserted)
    }

    /// A cloneable read-only handle over this replica's chain and state.
    pub fn camera(&self) -> ChainCamera<K> {
        ChainCamera {
            block_store: self.block_store.clone(),
            state: self.state.clone(),
            rdpos: self.rdpos.clone(),
            kv_store: self.kv_store.clone(),
        }
    }
}

impl<K: KVStore, N: Network> Drop for Replica<K, N> {
    fn drop(&mut self) {
        // The order of thread shutdown is important: the worker and sync server threads receive
        // messages from the poller and assume the poller outlives them; the event bus merely
        // drops whatever arrives after it stopped.
        if let (Some(shutdown), Some(thread)) =
            (self.event_bus_shutdown.take(), self.event_bus.take())
        {
            let _ = shutdown.send(());
            let _ = thread.join();
        }

        let _ = self.algorithm_shutdown.send(());
        let _ = self.algorithm.take().unwrap().join();

        let _ = self.sync_server_shutdown.send(());
        let _ = self.sync_server.take().unwrap().join();

        let _ = self.poller_shutdown.send(());
        let _ = self.poller.take().unwrap().join();

        if let Err(err) = self.state.save() {
            log::error!("Failed to persist the account table on shutdown: {}", err);
        }
    }
}

/// Read-only access to a replica's chain, accounts, validator set, and event log, for RPC-style
/// queries. Clones share the same underlying node.
pub struct ChainCamera<K: KVStore> {
    block_store: Arc<RwLock<BlockStore<K>>>,
    state: Arc<ChainState<K>>,
    rdpos: Arc<RdPos<K>>,
    kv_store: K,
}

impl<K: KVStore> Clone for ChainCamera<K> {
    fn clone(&self) -> Self {
        ChainCamera {
            block_store: self.block_store.clone(),
            state: self.state.clone(),
            rdpos: self.rdpos.clone(),
            kv_store: self.kv_store.clone(),
        }
    }
}

impl<K: KVStore> ChainCamera<K> {
    pub fn balance(&self, address: &Address) -> U256 {
        self.state.balance(address)
    }

    pub fn nonce(&self, address: &Address) -> u32 {
        self.state.nonce(address)
    }

    pub fn latest_block(&self) -> Block {
        self.block_store
            .read()
            .unwrap()
            .latest()
            .expect("a started replica always has a chain head")
            .clone()
    }

    pub fn block_number(&self) -> BlockHeight {
        self.latest_block().height()
    }

    pub fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.block_store.write().unwrap().block_by_hash(hash).ok().flatten()
    }

    pub fn block_by_height(&self, height: BlockHeight) -> Option<Block> {
        self.block_store.write().unwrap().block_by_height(height).ok().flatten()
    }

    /// A transaction and the hash of the block that contains it.
    pub fn transaction_by_hash(&self, tx_hash: &Hash) -> Option<(Transaction, Hash)> {
        self.block_store
            .write()
            .unwrap()
            .transaction_by_hash(tx_hash)
            .ok()
            .flatten()
    }

    pub fn validator_set(&self) -> ValidatorSet {
        self.rdpos.validator_set()
    }

    pub fn current_seed(&self) -> Hash {
        self.rdpos.current_seed()
    }

    /// Contract events within an inclusive block range, optionally filtered by emitter.
    pub fn events_in_range(
        &self,
        from_block: BlockHeight,
        to_block: BlockHeight,
        address: Option<Address>,
    ) -> Vec<EventRecord> {
        event_log::events_in_range(&self.kv_store, from_block, to_block, address)
            .unwrap_or_default()
    }
}
