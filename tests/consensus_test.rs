//! Integration tests that run whole validator networks in one process.
//!
//! Every node uses a mock [network](common::network::NetworkStub) built from channels and a mock
//! [key-value store](common::mem_db::MemDB) built from a hashmap, so the tests leave no
//! artifacts. There are three tests:
//!
//! 1. [`transfers_commit_across_the_network`]: four validators produce blocks from the genesis
//!    beacon onwards, commit a submitted transfer on every node, and keep rotating producers.
//! 2. [`rpc_admission_reports_standard_error_codes`]: a lone node (whose peers are silent, so no
//!    blocks are ever produced) exercises every admission outcome deterministically.
//! 3. [`add_validator_expands_the_set`]: a running network votes a fifth validator in through an
//!    `addValidator` transaction, and the grown set keeps producing.

mod common;

use std::time::{Duration, Instant};

use ethereum_types::U256;
use log::LevelFilter;
use rdpos_rs::{
    rdpos::types::ValidatorPayload,
    replica::Genesis,
    state::state_machine::ValidationError,
    types::{
        basic::{BlockHeight, Timestamp},
        bytes::Address,
        crypto::Keypair,
        transaction::Transaction,
        validator_set::ValidatorSet,
    },
};

use common::logging::setup_logger;
use common::network::mock_network;
use common::node::{Node, TEST_CHAIN};

const FUNDS: u64 = 1_000_000_000;

fn transfer(keypair: &Keypair, to: Address, value: u64, nonce: u32) -> Transaction {
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

fn validator_payload_tx(keypair: &Keypair, payload: ValidatorPayload) -> Transaction {
    Transaction::new(
        Address::default(),
        U256::zero(),
        payload.encode(),
        TEST_CHAIN,
        0,
        U256::zero(),
        U256::zero(),
        keypair,
    )
}

fn genesis(alice: &Keypair, validators: &[Keypair]) -> Genesis {
    let mut initial_validators = ValidatorSet::new();
    for validator in validators {
        initial_validators.put(validator.address());
    }
    Genesis {
        timestamp: Timestamp::new(0),
        initial_balances: vec![(alice.address(), U256::from(FUNDS))],
        initial_validators,
    }
}

/// Poll `done` every 200ms until it holds, panicking after `timeout`.
fn poll_until(timeout: Duration, what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for: {}", what);
        std::thread::sleep(Duration::from_millis(200));
    }
}

#[test]
fn transfers_commit_across_the_network() {
    setup_logger(LevelFilter::Info);

    let alice = Keypair::random();
    let bob = Address::new([0xb0; 20]);
    let validators: Vec<Keypair> = (0..4).map(|_| Keypair::random()).collect();
    let network_stubs = mock_network(validators.iter().map(|kp| kp.address()));
    let genesis = genesis(&alice, &validators);

    let nodes: Vec<Node> = validators
        .iter()
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair.clone(), network, genesis.clone()))
        .collect();

    // Applying a block clears the whole mempool, so a transaction admitted after the producer's
    // snapshot is dropped with it. Clients resubmit until their transaction lands; so does this
    // test. Resubmissions after commitment are rejected (stale nonce) and ignored.
    let tx = transfer(&alice, bob, 12_345, 0);
    poll_until(Duration::from_secs(60), "the transfer to commit everywhere", || {
        let _ = nodes[0].submit_transaction(tx.clone());
        nodes
            .iter()
            .all(|node| node.balance(&bob) == U256::from(12_345) && node.nonce(&alice.address()) == 1)
    });

    // The chain keeps producing empty blocks past the transfer.
    let reached = nodes[0].height();
    poll_until(Duration::from_secs(60), "the chain to keep growing", || {
        nodes.iter().all(|node| node.height() > reached + 2)
    });
}

#[test]
fn rpc_admission_reports_standard_error_codes() {
    setup_logger(LevelFilter::Info);

    let alice = Keypair::random();
    let validators: Vec<Keypair> = (0..4).map(|_| Keypair::random()).collect();
    // Only one node runs: its peers stay silent, so the beacon never completes and the mempool
    // is never cleared by block production.
    let network_stubs = mock_network(validators.iter().map(|kp| kp.address()));
    let node = Node::new(
        validators[0].clone(),
        network_stubs.into_iter().next().unwrap(),
        genesis(&alice, &validators),
    );
    let bob = Address::new([0xb0; 20]);

    // Admitted.
    let tx = transfer(&alice, bob, 1_000, 0);
    node.submit_transaction(tx.clone()).unwrap();

    // Duplicate: code 0, "not really a failure", not re-broadcast.
    let duplicate = node.submit_transaction(tx).unwrap_err();
    assert_eq!(duplicate, ValidationError::Duplicate);
    assert_eq!(duplicate.json_rpc_code(), 0);
    assert_eq!(
        duplicate.to_string(),
        "NAN, Transaction already exists in mempool"
    );

    // Skipped nonce: -32001.
    let bad_nonce = node
        .submit_transaction(transfer(&alice, bob, 1_000, 1))
        .unwrap_err();
    assert_eq!(bad_nonce.json_rpc_code(), -32001);

    // More than the account can cover, at the correct nonce: -32002.
    let too_much = node
        .submit_transaction(transfer(&alice, bob, FUNDS, 0))
        .unwrap_err();
    assert_eq!(too_much.json_rpc_code(), -32002);

    // Unknown sender: -32003.
    let stranger = Keypair::random();
    let unknown = node
        .submit_transaction(transfer(&stranger, bob, 1, 0))
        .unwrap_err();
    assert_eq!(unknown, ValidationError::UnknownSender);
    assert_eq!(unknown.json_rpc_code(), -32003);
}

#[test]
fn add_validator_expands_the_set() {
    setup_logger(LevelFilter::Info);

    let alice = Keypair::random();
    let all_keypairs: Vec<Keypair> = (0..5).map(|_| Keypair::random()).collect();
    let initial_validators = &all_keypairs[..4];
    let newcomer = &all_keypairs[4];

    // The mock network must know every address up front, including the newcomer's.
    let network_stubs = mock_network(all_keypairs.iter().map(|kp| kp.address()));
    let genesis = genesis(&alice, initial_validators);

    let nodes: Vec<Node> = all_keypairs
        .iter()
        .zip(network_stubs)
        .map(|(keypair, network)| Node::new(keypair.clone(), network, genesis.clone()))
        .collect();

    // Wait for the chain to start moving, then announce the newcomer from a seated validator.
    // Block application clears the validator mempool, so keep announcing until the set grows.
    poll_until(Duration::from_secs(60), "the first block", || {
        nodes.iter().all(|node| node.height() >= BlockHeight::new(1))
    });
    let announcement = validator_payload_tx(
        &initial_validators[0],
        ValidatorPayload::AddValidator(newcomer.address()),
    );
    poll_until(Duration::from_secs(60), "the validator set to grow to 5", || {
        let _ = nodes[0].submit_validator_transaction(announcement.clone());
        nodes.iter().all(|node| node.validator_set().len() == 5)
    });

    // The grown set keeps producing blocks.
    let reached = nodes[4].height();
    poll_until(Duration::from_secs(60), "the chain to grow under the new set", || {
        nodes.iter().all(|node| node.height() > reached + 2)
    });
}
