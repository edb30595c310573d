/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, as well as the internal
//! plumbing threads use to interact with the network.
//!
//! Networking is modular: each peer is reachable by its [`Address`], and providers plug in
//! through the five methods of the [`Network`] trait. The [poller](start_polling) thread drains
//! the provider and fans messages out into per-consumer channels:
//!
//! 1. Consensus messages, consumed by the worker loop's current role.
//! 2. Gossip (transactions and finalized blocks), consumed by the worker loop between phases.
//! 3. Sync requests, consumed by the [sync server](crate::block_sync) thread.
//! 4. Sync answers, consumed by the [sync client](crate::block_sync) inside the worker loop.
//!
//! Handlers never touch the state machine directly; everything flows through these channels.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::messages::{ConsensusMessage, Message};
use crate::types::bytes::Address;
use crate::types::validator_set::ValidatorSet;

pub trait Network: Clone + Send + 'static {
    /// Informs the network provider of the validator set on wake-up.
    fn init_validator_set(&mut self, validator_set: ValidatorSet);

    /// Informs the networking provider of updates to the validator set.
    fn update_validator_set(&mut self, validator_set: ValidatorSet);

    /// Send a message to all peers (including listeners) without blocking.
    fn broadcast(&mut self, message: Message);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: Address, message: Message);

    /// Receive a message from any peer. Returns immediately with `None` if no message is
    /// available now.
    fn recv(&mut self) -> Option<(Address, Message)>;
}

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into
/// receivers for consensus messages, gossip, sync requests, and sync answers.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(Address, ConsensusMessage)>,
    Receiver<(Address, Message)>,
    Receiver<(Address, Message)>,
    Receiver<(Address, Message)>,
) {
    let (to_consensus, consensus_receiver) = mpsc::channel();
    let (to_gossip, gossip_receiver) = mpsc::channel();
    let (to_sync_requests, sync_request_receiver) = mpsc::channel();
    let (to_sync_answers, sync_answer_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => panic!("Poller thread disconnected from main thread"),
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::Consensus(consensus_msg) => {
                    let _ = to_consensus.send((origin, consensus_msg));
                }
                Message::BroadcastTransaction(_)
                | Message::BroadcastValidatorTransaction(_)
                | Message::BroadcastBlock(_) => {
                    let _ = to_gossip.send((origin, msg));
                }
                Message::Ping(_) | Message::RequestNodes(_) | Message::RequestBlock(_, _) => {
                    let _ = to_sync_requests.send((origin, msg));
                }
                Message::Pong(_) | Message::AnswerNodes(_, _) | Message::AnswerBlock(_, _) => {
                    let _ = to_sync_answers.send((origin, msg));
                }
            }
        } else {
            thread::yield_now()
        }
    });

    (
        poller_thread,
        consensus_receiver,
        gossip_receiver,
        sync_request_receiver,
        sync_answer_receiver,
    )
}

/// Handle for sending and broadcasting messages to the [`Network`]. Usable with any message type
/// that converts [`Into<Message>`].
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<Message>>(&mut self, peer: Address, msg: S) {
        self.network.send(peer, msg.into())
    }

    pub(crate) fn broadcast<S: Into<Message>>(&mut self, msg: S) {
        self.network.broadcast(msg.into())
    }
}

/// Handle for informing the network provider about validator set changes.
#[derive(Clone)]
pub(crate) struct ValidatorSetUpdateHandle<N: Network> {
    network: N,
}

impl<N: Network> ValidatorSetUpdateHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn update_validator_set(&mut self, validator_set: ValidatorSet) {
        self.network.update_validator_set(validator_set)
    }
}

/// A receiving end for consensus messages with deadline-bounded blocking receives.
pub(crate) struct ConsensusMessageStub {
    receiver: Receiver<(Address, ConsensusMessage)>,
}

impl ConsensusMessageStub {
    pub(crate) fn new(receiver: Receiver<(Address, ConsensusMessage)>) -> ConsensusMessageStub {
        ConsensusMessageStub { receiver }
    }

    /// Receive the next consensus message, waiting until `deadline` at the latest.
    pub(crate) fn recv(
        &self,
        deadline: Instant,
    ) -> Result<(Address, ConsensusMessage), ReceiveError> {
        while Instant::now() < deadline {
            match self.receiver.recv_timeout(deadline - Instant::now()) {
                Ok(origin_and_msg) => return Ok(origin_and_msg),
                Err(RecvTimeoutError::Timeout) => thread::yield_now(),
                Err(RecvTimeoutError::Disconnected) => return Err(ReceiveError::Disconnected),
            }
        }
        Err(ReceiveError::Timeout)
    }
}

#[derive(Debug)]
pub(crate) enum ReceiveError {
    Timeout,
    Disconnected,
}

/// Forward every pending gossip message into `handler`, without blocking.
pub(crate) fn drain_gossip(
    receiver: &Receiver<(Address, Message)>,
    mut handler: impl FnMut(Address, Message),
) -> Result<(), ReceiveError> {
    loop {
        match receiver.try_recv() {
            Ok((origin, msg)) => handler(origin, msg),
            Err(TryRecvError::Empty) => return Ok(()),
            Err(TryRecvError::Disconnected) => return Err(ReceiveError::Disconnected),
        }
    }
}
