/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Notifications that are emitted when significant things happen in the local node.
//!
//! Each variant of the [event enum](Event) wraps an inner struct holding a timestamp taken when
//! the occurrence completed, plus whatever identifies it. Library users can register one handler
//! closure per event type when building the node; enabling logging in the configuration
//! additionally registers the CSV loggers from [logging](crate::logging). Events are emitted
//! **after** the occurrence is complete: `ApplyBlock`, for example, fires only once the block
//! has been persisted.

use std::sync::mpsc::Sender;
use std::time::SystemTime;

use crate::types::basic::BlockHeight;
use crate::types::bytes::{Address, Hash};

/// Enumerates all events defined for this library.
pub enum Event {
    // Progress of the block production loop.
    StartHeight(StartHeightEvent),
    CommitRandomness(CommitRandomnessEvent),
    RevealRandomness(RevealRandomnessEvent),
    Propose(ProposeEvent),
    ReceiveProposal(ReceiveProposalEvent),
    CoSign(CoSignEvent),
    CollectCoSignatures(CollectCoSignaturesEvent),
    BroadcastBlock(BroadcastBlockEvent),
    ProducerTimeout(ProducerTimeoutEvent),

    // Events that change persistent state.
    AdmitTransaction(AdmitTransactionEvent),
    ApplyBlock(ApplyBlockEvent),
    UpdateValidatorSet(UpdateValidatorSetEvent),

    // Sync mode events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
}

impl Event {
    /// Publish this event on the event publisher channel, if one is configured.
    pub fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// The worker loop began working on a new height.
pub struct StartHeightEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
}

/// This validator broadcast its `randomHash` commitment for the current height.
pub struct CommitRandomnessEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub commitment: Hash,
}

/// This validator broadcast its `randomSeed` reveal for the current height.
pub struct RevealRandomnessEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
}

/// This node, as producer, sent its assembled block to the co-signers.
pub struct ProposeEvent {
    pub timestamp: SystemTime,
    pub block_hash: Hash,
    pub height: BlockHeight,
    pub transactions: usize,
}

/// A proposed block arrived from the producer for co-signing.
pub struct ReceiveProposalEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub block_hash: Hash,
    pub height: BlockHeight,
}

/// This node co-signed a valid proposed block and returned its signature.
pub struct CoSignEvent {
    pub timestamp: SystemTime,
    pub block_hash: Hash,
}

/// The producer collected the full co-signature set for its block.
pub struct CollectCoSignaturesEvent {
    pub timestamp: SystemTime,
    pub block_hash: Hash,
    pub signatures: usize,
}

/// A finalized block was broadcast to all peers.
pub struct BroadcastBlockEvent {
    pub timestamp: SystemTime,
    pub block_hash: Hash,
    pub height: BlockHeight,
}

/// The elected producer stayed silent past its timeout; the fallback schedule takes over.
pub struct ProducerTimeoutEvent {
    pub timestamp: SystemTime,
    pub height: BlockHeight,
    pub producer: Address,
}

/// A transaction from gossip or RPC was admitted into a mempool.
pub struct AdmitTransactionEvent {
    pub timestamp: SystemTime,
    pub tx_hash: Hash,
    pub from: Address,
}

/// A validated block was applied: balances moved, nonces advanced, chain head moved up.
pub struct ApplyBlockEvent {
    pub timestamp: SystemTime,
    pub block_hash: Hash,
    pub height: BlockHeight,
    pub transactions: usize,
}

/// Applying a block changed the validator set.
pub struct UpdateValidatorSetEvent {
    pub timestamp: SystemTime,
    pub cause_block: Hash,
    pub validators: usize,
}

/// The node noticed it is behind and started fetching blocks from a peer.
pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub peer: Address,
}

/// The node finished catching up from a peer.
pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub peer: Address,
    pub blocks_synced: u64,
}

/// A peer asked for a block.
pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: Address,
    pub height: BlockHeight,
}

/// This node answered a peer's block request.
pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: Address,
    pub height: BlockHeight,
    pub found: bool,
}
