/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of **rdPoS** — randomized deterministic Proof of Stake — together with
//! the EVM-compatible account state machine it secures.
//!
//! rdPoS replicates a chain of blocks across a permissioned validator set. Every height, a seed
//! that the validators themselves produced one block earlier (through a commit/reveal exchange
//! embedded in ordinary transactions) deterministically elects a block producer and its
//! co-signers; the produced block carries the randomness for the next height. No validator can
//! predict the schedule more than one block ahead, and none can steer it alone.
//!
//! The library is host-agnostic. Users plug in:
//! - a [networking provider](crate::networking::Network),
//! - a [key-value store](crate::state::kv_store::KVStore), and
//! - an optional [contract execution environment](crate::app::ExecutionHost),
//!
//! then [initialize](crate::replica::Replica::initialize) a genesis state and
//! [start](crate::replica::ReplicaSpec::start) a replica. Transactions enter through
//! [`Replica::submit_transaction`](crate::replica::Replica::submit_transaction) or peer gossip;
//! reads go through the [`ChainCamera`](crate::replica::ChainCamera).

pub mod abi;

pub mod app;

pub(crate) mod block_sync;

pub mod event_bus;

pub mod events;

pub mod logging;

pub mod merkle;

pub mod messages;

pub mod networking;

pub mod rdpos;

pub mod replica;

pub mod state;

pub mod types;

pub(crate) mod algorithm;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports of the types most library users touch.
pub use app::{ExecutionHost, NoopHost};
pub use networking::Network;
pub use replica::{ChainCamera, Configuration, Genesis, Replica, ReplicaSpec};
pub use state::kv_store::{KVGet, KVStore, WriteBatch};
