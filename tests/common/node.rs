//! One in-process node: a `Replica` over a [`MemDB`] and a [`NetworkStub`], plus convenience
//! accessors over its camera.

use std::time::Duration;

use ethereum_types::U256;
use rdpos_rs::{
    replica::{ChainCamera, Configuration, Genesis, Replica, ReplicaSpec},
    state::state_machine::ValidationError,
    types::{
        basic::{BlockHeight, ChainId},
        bytes::Address,
        crypto::Keypair,
        transaction::Transaction,
        validator_set::ValidatorSet,
    },
    NoopHost,
};

use crate::common::{mem_db::MemDB, network::NetworkStub};

pub(crate) const TEST_CHAIN: ChainId = ChainId::new(8848);

pub(crate) struct Node {
    address: Address,
    camera: ChainCamera<MemDB>,
    replica: Replica<MemDB, NetworkStub>,
}

impl Node {
    /// Initialize a fresh store with `genesis` and start a validator node on it.
    pub(crate) fn new(keypair: Keypair, network: NetworkStub, genesis: Genesis) -> Node {
        let kv_store = MemDB::new();
        Replica::<MemDB, NetworkStub>::initialize(kv_store.clone(), genesis);

        let configuration = Configuration::builder()
            .chain_id(TEST_CHAIN)
            .commit_timeout(Duration::from_millis(1000))
            .reveal_timeout(Duration::from_millis(1000))
            .producer_timeout(Duration::from_millis(3000))
            .cosign_timeout(Duration::from_millis(1500))
            .sync_response_timeout(Duration::from_millis(1000))
            .log_events(false)
            .build();

        let address = keypair.address();
        let replica = ReplicaSpec::builder()
            .kv_store(kv_store)
            .network(network)
            .execution_host(NoopHost)
            .configuration(configuration)
            .keypair(keypair)
            .on_apply_block(|event| {
                log::debug!("Applied block at height {}", event.height)
            })
            .build()
            .start();

        Node {
            address,
            camera: replica.camera(),
            replica,
        }
    }

    pub(crate) fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn submit_transaction(&self, tx: Transaction) -> Result<(), ValidationError> {
        self.replica.submit_transaction(tx)
    }

    pub(crate) fn submit_validator_transaction(&self, tx: Transaction) -> bool {
        self.replica.submit_validator_transaction(tx).unwrap_or(false)
    }

    pub(crate) fn balance(&self, address: &Address) -> U256 {
        self.camera.balance(address)
    }

    pub(crate) fn nonce(&self, address: &Address) -> u32 {
        self.camera.nonce(address)
    }

    pub(crate) fn height(&self) -> BlockHeight {
        self.camera.block_number()
    }

    pub(crate) fn validator_set(&self) -> ValidatorSet {
        self.camera.validator_set()
    }
}
