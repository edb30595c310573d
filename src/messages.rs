/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The messages peers exchange.
//!
//! Every request kind carries a 16-byte [`RequestId`] so answers can be matched to the request
//! they serve. Transactions and blocks travel inside messages as their RLP encodings; message
//! envelopes themselves are Borsh-serialized by the networking provider.
//!
//! Delivery is at-least-once: duplicated broadcasts are harmless because mempools de-duplicate
//! by transaction hash and block application is keyed by height.

use borsh::{BorshDeserialize, BorshSerialize};
use rand::RngCore;

use crate::types::bytes::{Hash, Signature};

/// Correlates an answer with the request that prompted it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct RequestId([u8; 16]);

impl RequestId {
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn random() -> RequestId {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        RequestId(bytes)
    }

    pub const fn bytes(&self) -> [u8; 16] {
        self.0
    }
}

/// A peer's advertised identity and dialable endpoint.
#[derive(Clone, Debug, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct PeerInfo {
    pub node_id: Hash,
    pub endpoint: String,
}

#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub enum Message {
    Ping(RequestId),
    Pong(RequestId),
    RequestNodes(RequestId),
    AnswerNodes(RequestId, Vec<PeerInfo>),
    /// A user transaction, as signed RLP.
    BroadcastTransaction(Vec<u8>),
    /// A validator transaction, as signed RLP.
    BroadcastValidatorTransaction(Vec<u8>),
    /// A finalized block, as RLP.
    BroadcastBlock(Vec<u8>),
    RequestBlock(RequestId, u64),
    /// The requested block's RLP, or `None` if the peer does not have it.
    AnswerBlock(RequestId, Option<Vec<u8>>),
    Consensus(ConsensusMessage),
}

impl From<ConsensusMessage> for Message {
    fn from(msg: ConsensusMessage) -> Message {
        Message::Consensus(msg)
    }
}

/// Messages of the block production protocol itself.
#[derive(Clone, Debug, BorshDeserialize, BorshSerialize)]
pub enum ConsensusMessage {
    /// Producer → co-signer: the proposed block (RLP), to be validated and co-signed.
    CoSignatureRequest {
        request_id: RequestId,
        block: Vec<u8>,
    },
    /// Co-signer → producer: a signature over the proposed block's hash.
    CoSignatureResponse {
        request_id: RequestId,
        block_hash: Hash,
        signature: Signature,
    },
}
