/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](ExecutionHost) for the pluggable contract execution environment.
//!
//! Consensus treats execution as opaque: when an applied transaction carries call data, the host
//! is handed the transaction and a read-only view of the pre-state, and returns a state delta,
//! the logs it emitted, and the gas it consumed. The delta is committed only as part of block
//! application, never speculatively.
//!
//! Implementors are expected to be *deterministic*: the same transaction over the same view must
//! produce the same outcome on every node.

use ethereum_types::U256;

use crate::types::bytes::{Address, Hash};
use crate::types::transaction::Transaction;

/// A read-only view of account balances and nonces at the point of execution.
pub trait StateView {
    fn balance(&self, address: &Address) -> U256;
    fn nonce(&self, address: &Address) -> u32;
}

/// One log emitted during execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

/// The result of executing one transaction's call data.
pub struct ExecutionOutcome {
    /// Raw key-value writes to commit with the block. Keys are already namespaced by the host.
    pub state_delta: Vec<(Vec<u8>, Vec<u8>)>,
    pub logs: Vec<LogEntry>,
    pub gas_used: U256,
}

impl ExecutionOutcome {
    /// An outcome that changes nothing.
    pub fn empty() -> ExecutionOutcome {
        ExecutionOutcome {
            state_delta: Vec::new(),
            logs: Vec::new(),
            gas_used: U256::zero(),
        }
    }
}

pub trait ExecutionHost: Send + 'static {
    fn execute(&mut self, tx: &Transaction, view: &dyn StateView) -> ExecutionOutcome;
}

/// A host that executes nothing. Suitable for networks that only move native balance.
pub struct NoopHost;

impl ExecutionHost for NoopHost {
    fn execute(&mut self, _tx: &Transaction, _view: &dyn StateView) -> ExecutionOutcome {
        ExecutionOutcome::empty()
    }
}
