/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fixed-width byte strings: [`Address`] (20 bytes), [`Hash`] (32 bytes) and [`Signature`]
//! (65 bytes, `r ‖ s ‖ v`).
//!
//! Every address is held internally in raw byte form, exactly 20 bytes. Hex is a presentation
//! concern only: [`Address::hex`] renders lowercase hex, [`Address::to_checksum`] renders the
//! EIP-55 mixed-case form, and the `from_hex` constructors accept either, validating the checksum
//! whenever the input mixes upper- and lowercase letters.

use borsh::{BorshDeserialize, BorshSerialize};
use ethereum_types::U256;
use rand::RngCore;
use std::fmt::{self, Debug, Display, Formatter};

use crate::types::crypto::keccak256;

/// A 20-byte account identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const LEN: usize = 20;

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 20] {
        self.0
    }

    /// Parse an address from a hex string, with or without the `0x` prefix. If the string mixes
    /// upper- and lowercase hex digits, its EIP-55 checksum is verified.
    pub fn from_hex(hex_str: &str) -> Result<Address, HexParseError> {
        let stripped = strip_hex_prefix(hex_str);
        let bytes = decode_hex_fixed::<20>(stripped)?;
        let address = Address(bytes);
        let has_upper = stripped.chars().any(|c| c.is_ascii_uppercase());
        let has_lower = stripped.chars().any(|c| c.is_ascii_lowercase());
        if has_upper && has_lower && stripped != address.to_checksum() {
            return Err(HexParseError::BadChecksum);
        }
        Ok(address)
    }

    /// Render as lowercase hex with the `0x` prefix.
    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Render in checksummed form as per [EIP-55](https://eips.ethereum.org/EIPS/eip-55),
    /// without the `0x` prefix.
    pub fn to_checksum(&self) -> String {
        let lower = hex::encode(self.0);
        let digest = keccak256(lower.as_bytes());
        lower
            .char_indices()
            .map(|(i, c)| {
                let nibble = (digest.bytes()[i / 2] >> (if i % 2 == 0 { 4 } else { 0 })) & 0x0f;
                if nibble >= 8 {
                    c.to_ascii_uppercase()
                } else {
                    c
                }
            })
            .collect()
    }

    /// Check whether a hex string is a correctly checksummed rendering of an address.
    pub fn is_checksum(hex_str: &str) -> bool {
        let stripped = strip_hex_prefix(hex_str);
        match decode_hex_fixed::<20>(stripped) {
            Ok(bytes) => Address(bytes).to_checksum() == stripped,
            Err(_) => false,
        }
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

/// A 32-byte value, usually a keccak-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize, Default)]
pub struct Hash([u8; 32]);

impl Hash {
    pub const LEN: usize = 32;

    /// The all-zeroes hash. Previous-hash of the genesis block, root of an empty Merkle tree, and
    /// the initial randomness seed.
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn from_hex(hex_str: &str) -> Result<Hash, HexParseError> {
        Ok(Hash(decode_hex_fixed::<32>(strip_hex_prefix(hex_str))?))
    }

    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Interpret the 32 bytes as a big-endian 256-bit unsigned integer.
    pub fn to_u256(&self) -> U256 {
        U256::from_big_endian(&self.0)
    }

    /// The big-endian 32-byte representation of a 256-bit unsigned integer.
    pub fn from_u256(int: U256) -> Hash {
        let mut bytes = [0u8; 32];
        int.to_big_endian(&mut bytes);
        Hash(bytes)
    }

    /// Generate a hash from the operating system's CSPRNG.
    pub fn random() -> Hash {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Hash(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Debug for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

/// A 65-byte recoverable ECDSA signature over secp256k1: `r` (32 bytes) ‖ `s` (32 bytes) ‖ `v`
/// (1 byte). `v` is a recovery id in `{0, 1}` or its legacy `{27, 28}` form.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct Signature([u8; 65]);

impl Signature {
    pub const LEN: usize = 65;

    pub const fn new(bytes: [u8; 65]) -> Self {
        Self(bytes)
    }

    pub const fn bytes(&self) -> [u8; 65] {
        self.0
    }

    pub fn from_rsv(r: U256, s: U256, v: u8) -> Signature {
        let mut bytes = [0u8; 65];
        r.to_big_endian(&mut bytes[0..32]);
        s.to_big_endian(&mut bytes[32..64]);
        bytes[64] = v;
        Signature(bytes)
    }

    /// The first half of the signature.
    pub fn r(&self) -> U256 {
        U256::from_big_endian(&self.0[0..32])
    }

    /// The second half of the signature.
    pub fn s(&self) -> U256 {
        U256::from_big_endian(&self.0[32..64])
    }

    /// The recovery id byte.
    pub fn v(&self) -> u8 {
        self.0[64]
    }

    /// The recovery id normalized to `{0, 1}` from either encoding of `v`.
    pub fn recovery_id(&self) -> u8 {
        match self.0[64] {
            27 | 28 => self.0[64] - 27,
            v => v,
        }
    }

    pub fn hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Display for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

impl Debug for Signature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hex())
    }
}

/// Why a hex string failed to parse into a fixed-width byte string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexParseError {
    WrongLength { expected: usize, got: usize },
    InvalidCharacter,
    BadChecksum,
}

impl Display for HexParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            HexParseError::WrongLength { expected, got } => {
                write!(f, "expected {} hex bytes, got {}", expected, got)
            }
            HexParseError::InvalidCharacter => write!(f, "invalid hex character"),
            HexParseError::BadChecksum => write!(f, "address checksum mismatch"),
        }
    }
}

/// Strip a leading `0x` or `0X`, if present. A string is prefix-valid iff it starts with either
/// spelling; everything else is treated as bare hex digits.
fn strip_hex_prefix(hex_str: &str) -> &str {
    if hex_str.starts_with("0x") || hex_str.starts_with("0X") {
        &hex_str[2..]
    } else {
        hex_str
    }
}

fn decode_hex_fixed<const N: usize>(stripped: &str) -> Result<[u8; N], HexParseError> {
    if stripped.len() != N * 2 {
        return Err(HexParseError::WrongLength {
            expected: N,
            got: stripped.len() / 2,
        });
    }
    let decoded = hex::decode(stripped).map_err(|_| HexParseError::InvalidCharacter)?;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&decoded);
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_round_trip() {
        let address = Address::new([0xab; 20]);
        assert_eq!(Address::from_hex(&address.hex()).unwrap(), address);
        assert_eq!(Address::from_hex("0xabab"), Err(HexParseError::WrongLength { expected: 20, got: 2 }));
    }

    #[test]
    fn eip55_checksum_vector() {
        // Vector from the EIP-55 specification.
        let address = Address::from_hex("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert_eq!(address.to_checksum(), "5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert!(Address::is_checksum("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"));
        assert!(!Address::is_checksum("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1Beaed"));
        assert!(Address::from_hex("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").is_ok());
    }

    #[test]
    fn hash_u256_round_trip() {
        let int = U256::from(1_000_000_007u64);
        assert_eq!(Hash::from_u256(int).to_u256(), int);
        assert_eq!(Hash::from_u256(U256::zero()), Hash::ZERO);
    }

    #[test]
    fn signature_field_access() {
        let sig = Signature::from_rsv(U256::from(7), U256::from(9), 27);
        assert_eq!(sig.r(), U256::from(7));
        assert_eq!(sig.s(), U256::from(9));
        assert_eq!(sig.v(), 27);
        assert_eq!(sig.recovery_id(), 0);
    }
}
