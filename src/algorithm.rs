/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The worker thread that drives rdPoS forward, height by height.
//!
//! Each iteration of the [`execute`](Algorithm::execute) loop works on the height directly above
//! the current chain head and goes through up to three phases:
//!
//! 1. **Contribute.** If this node is one of the height's randomness contributors, it commits
//!    `keccak(secret)` and, once every expected commit has arrived, reveals the secret; both
//!    travel the network as validator transactions.
//! 2. **Role.** The elected producer waits for the full commit/reveal set, assembles and signs a
//!    block, collects co-signatures, broadcasts the finalized block and applies it. A co-signer
//!    validates the producer's proposal and returns its signature. Everyone else just waits for
//!    the finalized block.
//! 3. **Fallback.** If no block lands within the producer timeout, every node re-shuffles the
//!    schedule with `keccak(seed ‖ "skip")` and the phase repeats under the fallback schedule.
//!
//! Between suspension points the loop polls its shutdown signal, drains transaction and block
//! gossip into the mempools, and applies any finalized block that arrives — including blocks
//! fetched by the sync client when a height gap reveals that this node fell behind. Block
//! application completes before the next iteration observes the chain head, so the loop always
//! works on top of fully applied state.

use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use crate::app::ExecutionHost;
use crate::block_sync::BlockSyncClient;
use crate::events::*;
use crate::messages::{ConsensusMessage, Message, RequestId};
use crate::networking::{
    drain_gossip, ConsensusMessageStub, Network, ReceiveError, SenderHandle,
    ValidatorSetUpdateHandle,
};
use crate::rdpos::protocol::{ConsensusError, RdPos};
use crate::rdpos::types::{CoSignatureCollector, Schedule, ValidatorPayload};
use crate::replica::Configuration;
use crate::state::block_store::BlockStore;
use crate::state::kv_store::KVStore;
use crate::state::state_machine::{BlockValidationError, ChainState};
use crate::types::basic::{BlockHeight, Timestamp};
use crate::types::block::Block;
use crate::types::bytes::{Address, Hash};
use crate::types::crypto::{keccak256, Keypair};
use crate::types::transaction::Transaction;
use ethereum_types::U256;

pub(crate) struct Algorithm<K: KVStore, N: Network, H: ExecutionHost> {
    config: Configuration,
    keypair: Option<Keypair>,
    state: Arc<ChainState<K>>,
    block_store: Arc<RwLock<BlockStore<K>>>,
    rdpos: Arc<RdPos<K>>,
    host: Arc<Mutex<H>>,
    sender: SenderHandle<N>,
    validator_set_update_handle: ValidatorSetUpdateHandle<N>,
    consensus_stub: ConsensusMessageStub,
    gossip: Receiver<(Address, Message)>,
    sync_client: BlockSyncClient<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
    /// `(height, secret, revealed)` of this node's beacon contribution in flight.
    contribution: Option<(BlockHeight, Hash, bool)>,
    /// A peer that gossiped a block from the future; worth syncing from.
    sync_candidate: Option<(Address, BlockHeight)>,
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn start_algorithm<K: KVStore, N: Network, H: ExecutionHost>(
    config: Configuration,
    keypair: Option<Keypair>,
    state: Arc<ChainState<K>>,
    block_store: Arc<RwLock<BlockStore<K>>>,
    rdpos: Arc<RdPos<K>>,
    host: Arc<Mutex<H>>,
    network: N,
    consensus_receiver: Receiver<(Address, ConsensusMessage)>,
    gossip: Receiver<(Address, Message)>,
    sync_answers: Receiver<(Address, Message)>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
) -> JoinHandle<()> {
    let sync_client = BlockSyncClient::new(
        network.clone(),
        sync_answers,
        config.sync_response_timeout,
    );
    let mut algorithm = Algorithm {
        config,
        keypair,
        state,
        block_store,
        rdpos,
        host,
        sender: SenderHandle::new(network.clone()),
        validator_set_update_handle: ValidatorSetUpdateHandle::new(network),
        consensus_stub: ConsensusMessageStub::new(consensus_receiver),
        gossip,
        sync_client,
        shutdown_signal,
        event_publisher,
        contribution: None,
        sync_candidate: None,
    };
    thread::spawn(move || algorithm.execute())
}

impl<K: KVStore, N: Network, H: ExecutionHost> Algorithm<K, N, H> {
    fn execute(&mut self) {
        let mut announced_height = None;

        'next_height: loop {
            if self.should_shut_down() {
                return;
            }
            self.handle_gossip();
            if let Some((peer, _)) = self.sync_candidate.take() {
                self.sync_from(peer);
            }

            let latest = self.latest_block();
            let height = latest.height() + 1;
            if announced_height != Some(height) {
                announced_height = Some(height);
                Event::StartHeight(StartHeightEvent {
                    timestamp: SystemTime::now(),
                    height,
                })
                .publish(&self.event_publisher);
            }

            let schedule = match self.rdpos.schedule() {
                Ok(schedule) => schedule,
                Err(err) => {
                    // Too few validators to elect anyone. Wait for gossip (a sync could grow
                    // the set) and check again.
                    log::warn!("Cannot derive a schedule: {}", err);
                    self.idle(Duration::from_millis(500));
                    continue 'next_height;
                }
            };

            // Work the height under the primary schedule, then once more under the fallback
            // schedule if the producer timed out. Each attempt starts with the beacon
            // contribution phase, since the fallback schedule may expect contributions from
            // validators the primary schedule left out.
            let mut active = schedule;
            for attempt in 0..2 {
                if self.should_shut_down() {
                    return;
                }
                if let Some(my_address) = self.my_address() {
                    if active.contributors().contains(&my_address) {
                        if !self.contribute(&active, height) {
                            continue 'next_height;
                        }
                    }
                }
                let deadline = Instant::now() + self.config.producer_timeout;
                let progressed = match self.my_address() {
                    Some(me) if me == active.producer() => {
                        self.produce(&active, &latest, deadline)
                    }
                    Some(me) if active.cosigners().contains(&me) => {
                        self.follow(&active, deadline, true)
                    }
                    _ => self.follow(&active, deadline, false),
                };
                if progressed {
                    continue 'next_height;
                }
                if attempt == 0 {
                    Event::ProducerTimeout(ProducerTimeoutEvent {
                        timestamp: SystemTime::now(),
                        height,
                        producer: active.producer(),
                    })
                    .publish(&self.event_publisher);
                    active = match self.rdpos.fallback_schedule() {
                        Ok(fallback) => fallback,
                        Err(_) => continue 'next_height,
                    };
                }
            }
        }
    }

    /* ↓↓↓ Beacon contribution ↓↓↓ */

    /// Commit, then (once all commits are in) reveal this node's randomness for `height`.
    /// Returns `false` if a phase timed out or the chain moved, in which case the caller
    /// restarts the height.
    fn contribute(&mut self, schedule: &Schedule, height: BlockHeight) -> bool {
        let secret = match self.contribution {
            Some((h, secret, _)) if h == height => secret,
            _ => {
                let secret = Hash::random();
                let commitment = keccak256(&secret.bytes());
                self.broadcast_validator_tx(ValidatorPayload::RandomHash(commitment), height);
                self.contribution = Some((height, secret, false));
                Event::CommitRandomness(CommitRandomnessEvent {
                    timestamp: SystemTime::now(),
                    height,
                    commitment,
                })
                .publish(&self.event_publisher);
                secret
            }
        };

        let commit_deadline = Instant::now() + self.config.commit_timeout;
        let rdpos = self.rdpos.clone();
        let all_commits =
            self.wait_until(commit_deadline, height, |_| rdpos.commits_present(schedule));
        if all_commits != WaitOutcome::Satisfied {
            return false;
        }

        if let Some((h, _, revealed)) = self.contribution {
            if h == height && !revealed {
                self.broadcast_validator_tx(ValidatorPayload::RandomSeed(secret), height);
                self.contribution = Some((height, secret, true));
                Event::RevealRandomness(RevealRandomnessEvent {
                    timestamp: SystemTime::now(),
                    height,
                })
                .publish(&self.event_publisher);
            }
        }

        let reveal_deadline = Instant::now() + self.config.reveal_timeout;
        let rdpos = self.rdpos.clone();
        self.wait_until(reveal_deadline, height, |_| rdpos.reveals_present(schedule))
            == WaitOutcome::Satisfied
    }

    fn broadcast_validator_tx(&mut self, payload: ValidatorPayload, height: BlockHeight) {
        let keypair = self.keypair.as_ref().expect("contributors hold a keypair");
        let tx = Transaction::new(
            Address::default(),
            U256::zero(),
            payload.encode(),
            self.config.chain_id,
            height.int() as u32,
            U256::zero(),
            U256::zero(),
            keypair,
        );
        let encoded = tx.rlp_serialize(true);
        if let Err(err) = self.rdpos.add_validator_tx(tx) {
            log::warn!("Own validator transaction refused: {}", err);
            return;
        }
        self.sender
            .broadcast(Message::BroadcastValidatorTransaction(encoded));
    }

    /* ↓↓↓ Producer role ↓↓↓ */

    /// Assemble, sign, gather co-signatures for, broadcast, and apply a block. Returns whether
    /// the chain progressed.
    fn produce(&mut self, schedule: &Schedule, latest: &Block, deadline: Instant) -> bool {
        // The beacon may still be filling in; keep trying to assemble until the deadline.
        let mut proposal = loop {
            match self.state.create_block_proposal(
                latest,
                Timestamp::now(),
                &self.rdpos,
                schedule,
            ) {
                Ok(proposal) => break proposal,
                Err(ConsensusError::MissingRandomness(who)) => {
                    let rdpos = self.rdpos.clone();
                    let waited = self.wait_until(deadline, latest.height() + 1, |_| {
                        rdpos.reveals_present(schedule)
                    });
                    match waited {
                        WaitOutcome::Satisfied => continue,
                        WaitOutcome::ChainMoved => return true,
                        WaitOutcome::TimedOut => {
                            log::warn!("Gave up assembling: no commit/reveal from {}", who);
                            return false;
                        }
                    }
                }
                Err(err) => {
                    log::warn!("Could not assemble a block: {}", err);
                    return false;
                }
            }
        };

        let keypair = self.keypair.as_ref().expect("the producer holds a keypair");
        proposal.sign_as_producer(keypair);
        Event::Propose(ProposeEvent {
            timestamp: SystemTime::now(),
            block_hash: proposal.hash(),
            height: proposal.height(),
            transactions: proposal.transactions().len(),
        })
        .publish(&self.event_publisher);

        let request_id = RequestId::random();
        let proposal_rlp = proposal.to_rlp();
        for cosigner in schedule.cosigners() {
            self.sender.send(
                *cosigner,
                ConsensusMessage::CoSignatureRequest {
                    request_id,
                    block: proposal_rlp.clone(),
                },
            );
        }

        let mut collector =
            CoSignatureCollector::new(proposal.hash(), schedule.cosigners().to_vec());
        let cosign_deadline = Instant::now() + self.config.cosign_timeout;
        let signatures = loop {
            match self.consensus_stub.recv(cosign_deadline.min(deadline)) {
                Ok((
                    _,
                    ConsensusMessage::CoSignatureResponse {
                        request_id: answer_id,
                        block_hash,
                        signature,
                    },
                )) => {
                    if answer_id != request_id || block_hash != proposal.hash() {
                        continue;
                    }
                    if let Some(signatures) = collector.collect(signature) {
                        break signatures;
                    }
                }
                Ok(_) => continue,
                Err(ReceiveError::Timeout) => {
                    log::warn!(
                        "Timed out collecting co-signatures for block {}",
                        proposal.hash()
                    );
                    return false;
                }
                Err(ReceiveError::Disconnected) => return false,
            }
        };

        for signature in signatures {
            proposal.add_validator_signature(signature);
        }
        Event::CollectCoSignatures(CollectCoSignaturesEvent {
            timestamp: SystemTime::now(),
            block_hash: proposal.hash(),
            signatures: proposal.validator_signatures().len(),
        })
        .publish(&self.event_publisher);

        self.sender
            .broadcast(Message::BroadcastBlock(proposal.to_rlp()));
        Event::BroadcastBlock(BroadcastBlockEvent {
            timestamp: SystemTime::now(),
            block_hash: proposal.hash(),
            height: proposal.height(),
        })
        .publish(&self.event_publisher);

        self.try_apply_block(proposal)
    }

    /* ↓↓↓ Co-signer and listener roles ↓↓↓ */

    /// Wait for the height to complete: co-sign an incoming proposal when `cosign` is set, and
    /// apply the finalized block when it arrives. Returns whether the chain progressed.
    fn follow(&mut self, schedule: &Schedule, deadline: Instant, cosign: bool) -> bool {
        let start_height = self.latest_block().height();
        while Instant::now() < deadline {
            if self.should_shut_down() {
                return true;
            }
            self.handle_gossip();
            if self.latest_block().height() > start_height {
                return true;
            }
            if let Some((peer, _)) = self.sync_candidate.take() {
                self.sync_from(peer);
                continue;
            }

            let slice = Instant::now() + Duration::from_millis(50);
            match self.consensus_stub.recv(slice.min(deadline)) {
                Ok((origin, ConsensusMessage::CoSignatureRequest { request_id, block })) => {
                    if cosign {
                        self.answer_cosignature_request(schedule, origin, request_id, &block);
                    }
                }
                Ok(_) => (),
                Err(ReceiveError::Timeout) => (),
                Err(ReceiveError::Disconnected) => return true,
            }
        }
        false
    }

    /// Re-validate a proposed block end to end and, if sound, return a signature over its hash.
    fn answer_cosignature_request(
        &mut self,
        schedule: &Schedule,
        origin: Address,
        request_id: RequestId,
        encoded: &[u8],
    ) {
        let block = match Block::from_rlp(encoded) {
            Ok(block) => block,
            Err(err) => {
                log::warn!("Malformed proposal from {}: {}", origin, err);
                return;
            }
        };
        Event::ReceiveProposal(ReceiveProposalEvent {
            timestamp: SystemTime::now(),
            origin,
            block_hash: block.hash(),
            height: block.height(),
        })
        .publish(&self.event_publisher);

        let latest = self.latest_block();
        // The proposal carries no co-signatures yet, so check everything but the signature set:
        // chain linkage, structure, per-transaction admission invariants, the beacon content,
        // and that the proposal is signed by the producer this schedule elected.
        let consensus_check = self
            .validate_proposal_header(&block, schedule)
            .and_then(|()| self.state.validate_block_contents(&block, &latest));
        if let Err(err) = consensus_check {
            log::warn!("Refusing to co-sign block {}: {}", block.hash(), err);
            return;
        }

        let keypair = self.keypair.as_ref().expect("co-signers hold a keypair");
        let signature = keypair.sign(&block.hash());
        self.sender.send(
            origin,
            ConsensusMessage::CoSignatureResponse {
                request_id,
                block_hash: block.hash(),
                signature,
            },
        );
        Event::CoSign(CoSignEvent {
            timestamp: SystemTime::now(),
            block_hash: block.hash(),
        })
        .publish(&self.event_publisher);
    }

    fn validate_proposal_header(
        &self,
        block: &Block,
        schedule: &Schedule,
    ) -> Result<(), BlockValidationError> {
        self.rdpos
            .verify_proposal(block, schedule)
            .map_err(BlockValidationError::from)
    }

    /* ↓↓↓ Gossip, application, sync ↓↓↓ */

    /// Drain pending gossip: admit transactions, apply finalized blocks, and note peers that are
    /// ahead of us.
    fn handle_gossip(&mut self) {
        let mut incoming_txs = Vec::new();
        let mut incoming_validator_txs = Vec::new();
        let mut incoming_blocks = Vec::new();
        let drained = drain_gossip(&self.gossip, |origin, msg| match msg {
            Message::BroadcastTransaction(encoded) => incoming_txs.push(encoded),
            Message::BroadcastValidatorTransaction(encoded) => {
                incoming_validator_txs.push(encoded)
            }
            Message::BroadcastBlock(encoded) => incoming_blocks.push((origin, encoded)),
            _ => (),
        });
        if drained.is_err() {
            return;
        }

        for encoded in incoming_txs {
            match Transaction::from_rlp(&encoded) {
                Ok(tx) => {
                    let tx_hash = tx.hash();
                    let from = tx.from();
                    if self.state.validate_for_rpc(tx).is_ok() {
                        Event::AdmitTransaction(AdmitTransactionEvent {
                            timestamp: SystemTime::now(),
                            tx_hash,
                            from,
                        })
                        .publish(&self.event_publisher);
                    }
                }
                Err(err) => log::debug!("Dropping malformed gossiped transaction: {}", err),
            }
        }

        for encoded in incoming_validator_txs {
            match Transaction::from_rlp(&encoded) {
                Ok(tx) => {
                    let tx_hash = tx.hash();
                    let from = tx.from();
                    match self.rdpos.add_validator_tx(tx) {
                        Ok(true) => {
                            Event::AdmitTransaction(AdmitTransactionEvent {
                                timestamp: SystemTime::now(),
                                tx_hash,
                                from,
                            })
                            .publish(&self.event_publisher);
                        }
                        Ok(false) => (),
                        Err(err) => log::debug!("Dropping validator transaction: {}", err),
                    }
                }
                Err(err) => log::debug!("Dropping malformed validator transaction: {}", err),
            }
        }

        for (origin, encoded) in incoming_blocks {
            match Block::from_rlp(&encoded) {
                Ok(block) => {
                    let latest_height = self.latest_block().height();
                    if block.height() > latest_height + 1 {
                        self.sync_candidate = Some((origin, block.height()));
                    } else if block.height() == latest_height + 1 {
                        self.try_apply_block(block);
                    }
                }
                Err(err) => log::debug!("Dropping malformed gossiped block: {}", err),
            }
        }
    }

    /// Validate a finalized block against the primary schedule (or, failing on the producer,
    /// the fallback schedule) and apply it. Returns whether the chain progressed.
    fn try_apply_block(&mut self, block: Block) -> bool {
        let mut store = self.block_store.write().unwrap();
        let latest = match store.latest() {
            Some(latest) => latest.clone(),
            None => return false,
        };
        if block.height() != latest.height() + 1 {
            return false;
        }

        let schedule = match self.rdpos.schedule() {
            Ok(schedule) => schedule,
            Err(err) => {
                log::warn!("Rejecting block {}: {}", block.hash(), err);
                return false;
            }
        };
        let mut verdict = self.state.validate_block(&block, &latest, &self.rdpos, &schedule);
        if matches!(
            verdict,
            Err(BlockValidationError::Consensus(ConsensusError::WrongProducer))
        ) {
            match self.rdpos.fallback_schedule() {
                Ok(fallback) => {
                    verdict = self
                        .state
                        .validate_block(&block, &latest, &self.rdpos, &fallback);
                }
                Err(_) => (),
            }
        }
        if let Err(err) = verdict {
            log::warn!("Rejecting block {}: {}", block.hash(), err);
            return false;
        }

        let validators_before = self.rdpos.validator_set();
        let mut host = self.host.lock().unwrap();
        match self
            .state
            .process_block(&block, &mut store, &self.rdpos, &mut *host)
        {
            Ok(_) => (),
            Err(err) => {
                // A storage failure mid-application is unrecoverable at runtime; the on-disk
                // state is still consistent, so abort and let the operator restart.
                panic!("Storage failure while applying block {}: {}", block.hash(), err)
            }
        }
        drop(host);
        drop(store);

        Event::ApplyBlock(ApplyBlockEvent {
            timestamp: SystemTime::now(),
            block_hash: block.hash(),
            height: block.height(),
            transactions: block.transactions().len(),
        })
        .publish(&self.event_publisher);

        let validators_after = self.rdpos.validator_set();
        if validators_after != validators_before {
            self.validator_set_update_handle
                .update_validator_set(validators_after.clone());
            Event::UpdateValidatorSet(UpdateValidatorSetEvent {
                timestamp: SystemTime::now(),
                cause_block: block.hash(),
                validators: validators_after.len(),
            })
            .publish(&self.event_publisher);
        }
        self.contribution = None;
        true
    }

    /// Catch up from `peer`, fetching and applying one block at a time.
    fn sync_from(&mut self, peer: Address) {
        Event::StartSync(StartSyncEvent {
            timestamp: SystemTime::now(),
            peer,
        })
        .publish(&self.event_publisher);

        let mut blocks_synced = 0u64;
        loop {
            if self.should_shut_down() {
                break;
            }
            let next_height = self.latest_block().height() + 1;
            match self.sync_client.fetch_block(peer, next_height) {
                Ok(Some(block)) => {
                    if !self.try_apply_block(block) {
                        break;
                    }
                    blocks_synced += 1;
                }
                Ok(None) => break,
                Err(err) => {
                    log::debug!("Sync from {} stopped: {:?}", peer, err);
                    break;
                }
            }
        }

        Event::EndSync(EndSyncEvent {
            timestamp: SystemTime::now(),
            peer,
            blocks_synced,
        })
        .publish(&self.event_publisher);
    }

    /* ↓↓↓ Loop plumbing ↓↓↓ */

    fn my_address(&self) -> Option<Address> {
        let address = self.keypair.as_ref().map(|kp| kp.address())?;
        if self.rdpos.is_validator(&address) {
            Some(address)
        } else {
            None
        }
    }

    fn latest_block(&self) -> Block {
        self.block_store
            .read()
            .unwrap()
            .latest()
            .expect("the replica was started on an uninitialized store")
            .clone()
    }

    fn should_shut_down(&self) -> bool {
        match self.shutdown_signal.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Disconnected) => {
                panic!("Worker thread disconnected from main thread")
            }
        }
    }

    /// Process gossip until `predicate` holds, the chain head moves past `height - 1`, or the
    /// deadline passes.
    fn wait_until(
        &mut self,
        deadline: Instant,
        height: BlockHeight,
        predicate: impl Fn(&Self) -> bool,
    ) -> WaitOutcome {
        loop {
            if self.should_shut_down() {
                return WaitOutcome::ChainMoved;
            }
            self.handle_gossip();
            if self.latest_block().height() + 1 != height {
                return WaitOutcome::ChainMoved;
            }
            if predicate(self) {
                return WaitOutcome::Satisfied;
            }
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn idle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while Instant::now() < deadline && !self.should_shut_down() {
            self.handle_gossip();
            thread::sleep(Duration::from_millis(50));
        }
    }
}

#[derive(PartialEq, Eq)]
enum WaitOutcome {
    Satisfied,
    ChainMoved,
    TimedOut,
}
