/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The persisted node state: the storage adapter traits, the chain of blocks and its indexes,
//! the two mempools, the account table with transaction admission and block application, and the
//! contract event log.

pub mod kv_store;

pub mod paths;

pub mod block_store;

pub mod mempool;

pub mod state_machine;

pub mod event_log;

use ethereum_types::U256;

/// A native account: spendable balance and the nonce of the next acceptable transaction.
/// Accounts are created lazily on first credit and never deleted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub balance: U256,
    pub nonce: u32,
}

impl Account {
    /// Storage encoding: 32 big-endian balance bytes followed by 4 big-endian nonce bytes.
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        self.balance.to_big_endian(&mut bytes[0..32]);
        bytes[32..36].copy_from_slice(&self.nonce.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Account> {
        if bytes.len() != 36 {
            return None;
        }
        let mut nonce = [0u8; 4];
        nonce.copy_from_slice(&bytes[32..36]);
        Some(Account {
            balance: U256::from_big_endian(&bytes[0..32]),
            nonce: u32::from_be_bytes(nonce),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_record_round_trip() {
        let account = Account {
            balance: U256::from_dec_str("100000000000000000000").unwrap(),
            nonce: 7,
        };
        assert_eq!(Account::from_bytes(&account.to_bytes()), Some(account));
        assert_eq!(Account::from_bytes(&[0u8; 35]), None);
    }
}
