/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The node logs using the [log](https://docs.rs/log/latest/log/) crate; to see these messages,
//! set up a logging implementation and enable logging in the replica's configuration.
//!
//! ## Log message format
//!
//! Log messages are CSVs with at least two values. The first two are always the event's name in
//! PascalCase and the time it was emitted (seconds since the Unix Epoch). The rest differ per
//! event; hashes and addresses are rendered as the first seven characters of their Base64
//! encoding.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;

pub const START_HEIGHT: &str = "StartHeight";
pub const COMMIT_RANDOMNESS: &str = "CommitRandomness";
pub const REVEAL_RANDOMNESS: &str = "RevealRandomness";
pub const PROPOSE: &str = "Propose";
pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const CO_SIGN: &str = "CoSign";
pub const COLLECT_CO_SIGNATURES: &str = "CollectCoSignatures";
pub const BROADCAST_BLOCK: &str = "BroadcastBlock";
pub const PRODUCER_TIMEOUT: &str = "ProducerTimeout";
pub const ADMIT_TRANSACTION: &str = "AdmitTransaction";
pub const APPLY_BLOCK: &str = "ApplyBlock";
pub const UPDATE_VALIDATOR_SET: &str = "UpdateValidatorSet";
pub const START_SYNC: &str = "StartSync";
pub const END_SYNC: &str = "EndSync";
pub const RECEIVE_SYNC_REQUEST: &str = "ReceiveSyncRequest";
pub const SEND_SYNC_RESPONSE: &str = "SendSyncResponse";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for StartHeightEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartHeightEvent| {
            log::info!(
                "{}, {}, {}",
                START_HEIGHT,
                secs_since_unix_epoch(event.timestamp),
                event.height
            )
        })
    }
}

impl Logger for CommitRandomnessEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CommitRandomnessEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_RANDOMNESS,
                secs_since_unix_epoch(event.timestamp),
                event.height,
                first_seven_base64_chars(&event.commitment.bytes())
            )
        })
    }
}

impl Logger for RevealRandomnessEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &RevealRandomnessEvent| {
            log::info!(
                "{}, {}, {}",
                REVEAL_RANDOMNESS,
                secs_since_unix_epoch(event.timestamp),
                event.height
            )
        })
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_hash.bytes()),
                event.height,
                event.transactions
            )
        })
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.origin.bytes()),
                first_seven_base64_chars(&event.block_hash.bytes()),
                event.height
            )
        })
    }
}

impl Logger for CoSignEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CoSignEvent| {
            log::info!(
                "{}, {}, {}",
                CO_SIGN,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_hash.bytes())
            )
        })
    }
}

impl Logger for CollectCoSignaturesEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CollectCoSignaturesEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COLLECT_CO_SIGNATURES,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_hash.bytes()),
                event.signatures
            )
        })
    }
}

impl Logger for BroadcastBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &BroadcastBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                BROADCAST_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_hash.bytes()),
                event.height
            )
        })
    }
}

impl Logger for ProducerTimeoutEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ProducerTimeoutEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PRODUCER_TIMEOUT,
                secs_since_unix_epoch(event.timestamp),
                event.height,
                first_seven_base64_chars(&event.producer.bytes())
            )
        })
    }
}

impl Logger for AdmitTransactionEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &AdmitTransactionEvent| {
            log::info!(
                "{}, {}, {}, {}",
                ADMIT_TRANSACTION,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.tx_hash.bytes()),
                first_seven_base64_chars(&event.from.bytes())
            )
        })
    }
}

impl Logger for ApplyBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ApplyBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                APPLY_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.block_hash.bytes()),
                event.height,
                event.transactions
            )
        })
    }
}

impl Logger for UpdateValidatorSetEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &UpdateValidatorSetEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_VALIDATOR_SET,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.cause_block.bytes()),
                event.validators
            )
        })
    }
}

impl Logger for StartSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &StartSyncEvent| {
            log::info!(
                "{}, {}, {}",
                START_SYNC,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.bytes())
            )
        })
    }
}

impl Logger for EndSyncEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &EndSyncEvent| {
            log::info!(
                "{}, {}, {}, {}",
                END_SYNC,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.bytes()),
                event.blocks_synced
            )
        })
    }
}

impl Logger for ReceiveSyncRequestEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveSyncRequestEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_SYNC_REQUEST,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.bytes()),
                event.height
            )
        })
    }
}

impl Logger for SendSyncResponseEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SendSyncResponseEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_SYNC_RESPONSE,
                secs_since_unix_epoch(event.timestamp),
                first_seven_base64_chars(&event.peer.bytes()),
                event.height,
                event.found
            )
        })
    }
}

// Get a more readable representation of a byte sequence by base64-encoding it and taking the
// first 7 characters.
fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
