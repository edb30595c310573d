/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Namespace prefixes under which each table lives in the user-provided key-value store.
//!
//! Every key is formed as `prefix ‖ key` with [`combine`]. The prefixes are four ASCII digits:
//!
//! | prefix | key                      | value                                |
//! |--------|--------------------------|--------------------------------------|
//! | `0001` | block hash               | block RLP                            |
//! | `0002` | block height (be u64)    | block hash                           |
//! | `0003` | tx hash                  | transaction RLP                      |
//! | `0004` | address (20 bytes)       | balance (32 bytes) ‖ nonce (4 bytes) |
//! | `0005` | (reserved)               | ERC-20 token state                   |
//! | `0006` | (reserved)               | ERC-721 token state                  |
//! | `0007` | tx hash                  | containing block hash                |
//! | `0008` | validator index (be u64) | validator address (20 bytes)         |
//! | `0009` | height ‖ log index       | event record (Borsh)                 |

pub const BLOCKS: [u8; 4] = *b"0001";
pub const BLOCK_HEIGHT_MAPS: [u8; 4] = *b"0002";
pub const TRANSACTIONS: [u8; 4] = *b"0003";
pub const NATIVE_ACCOUNTS: [u8; 4] = *b"0004";
pub const ERC20: [u8; 4] = *b"0005";
pub const ERC721: [u8; 4] = *b"0006";
pub const TX_TO_BLOCKS: [u8; 4] = *b"0007";
pub const VALIDATORS: [u8; 4] = *b"0008";
pub const EVENTS: [u8; 4] = *b"0009";

/// Concatenate a prefix and a key into one storage key.
pub fn combine(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
