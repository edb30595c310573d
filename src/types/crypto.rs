/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives: keccak-256 hashing, and ECDSA over secp256k1 with public key
//! recovery.
//!
//! An account's address is the rightmost 20 bytes of the keccak-256 digest of its uncompressed
//! public key, minus the leading `0x04` SEC1 tag byte. Secret key material lives inside
//! [`k256::ecdsa::SigningKey`], which compares in constant time and zeroizes on drop.

use ethereum_types::U256;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};
use std::fmt::{self, Display, Formatter};

use crate::types::bytes::{Address, Hash, Signature};

/// The keccak-256 digest of a byte string.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::new(hasher.finalize().into())
}

/// The order of the secp256k1 curve. `r` and `s` of a valid signature lie in `[1, n)`.
pub fn secp256k1_order() -> U256 {
    U256::from_dec_str(
        "115792089237316195423570985008687907852837564279074904382605163141518161494337",
    )
    .unwrap()
}

/// A secp256k1 keypair used to sign transactions and blocks.
#[derive(Clone)]
pub struct Keypair(SigningKey);

impl Keypair {
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Generate a keypair from the operating system's CSPRNG.
    pub fn random() -> Keypair {
        Keypair(SigningKey::random(&mut OsRng))
    }

    pub fn from_slice(secret: &[u8]) -> Result<Keypair, CryptoError> {
        Ok(Keypair(
            SigningKey::from_slice(secret).map_err(|_| CryptoError::InvalidSecretKey)?,
        ))
    }

    /// Sign a 32-byte digest, producing a recoverable signature with `v` in `{0, 1}`.
    pub fn sign(&self, digest: &Hash) -> Signature {
        let (signature, recovery_id) = self
            .0
            .sign_prehash_recoverable(&digest.bytes())
            .expect("signing a 32-byte digest with a valid key cannot fail");
        let mut bytes = [0u8; 65];
        bytes[0..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();
        Signature::new(bytes)
    }

    /// The address derived from this keypair's public key.
    pub fn address(&self) -> Address {
        address_of(self.0.verifying_key())
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.0.verifying_key()
    }
}

/// Derive the address of a public key: the rightmost 20 bytes of the keccak-256 digest of the
/// uncompressed SEC1 point without its `0x04` tag.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let point = verifying_key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.bytes()[12..32]);
    Address::new(bytes)
}

/// Recover the address that produced `signature` over `digest`.
pub fn recover_signer(digest: &Hash, signature: &Signature) -> Result<Address, CryptoError> {
    if !is_canonical(signature) {
        return Err(CryptoError::NonCanonicalSignature);
    }
    let recovery_id = RecoveryId::from_byte(signature.recovery_id())
        .ok_or(CryptoError::InvalidRecoveryId)?;
    let ecdsa_signature = EcdsaSignature::from_slice(&signature.bytes()[0..64])
        .map_err(|_| CryptoError::InvalidSignature)?;
    let verifying_key =
        VerifyingKey::recover_from_prehash(&digest.bytes(), &ecdsa_signature, recovery_id)
            .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(address_of(&verifying_key))
}

/// Check the component-local signature invariants: `r, s ∈ [1, n)` and `v ∈ {0, 1, 27, 28}`.
pub fn is_canonical(signature: &Signature) -> bool {
    let order = secp256k1_order();
    let r = signature.r();
    let s = signature.s();
    !r.is_zero()
        && !s.is_zero()
        && r < order
        && s < order
        && matches!(signature.v(), 0 | 1 | 27 | 28)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    InvalidSecretKey,
    InvalidSignature,
    InvalidRecoveryId,
    NonCanonicalSignature,
    RecoveryFailed,
}

impl Display for CryptoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidSecretKey => write!(f, "invalid secret key"),
            CryptoError::InvalidSignature => write!(f, "malformed signature"),
            CryptoError::InvalidRecoveryId => write!(f, "invalid recovery id"),
            CryptoError::NonCanonicalSignature => write!(f, "signature components out of range"),
            CryptoError::RecoveryFailed => write!(f, "public key recovery failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keccak256_empty_input() {
        assert_eq!(
            keccak256(b"").hex(),
            "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn address_of_known_secret() {
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let keypair = Keypair::from_slice(&secret).unwrap();
        assert_eq!(
            keypair.address(),
            Address::from_hex("0x7e5f4552091a69125d5dfcb7b8c2659029395bdf").unwrap()
        );
    }

    #[test]
    fn sign_then_recover() {
        let keypair = Keypair::random();
        let digest = keccak256(b"a message");
        let signature = keypair.sign(&digest);
        assert!(is_canonical(&signature));
        assert_eq!(recover_signer(&digest, &signature).unwrap(), keypair.address());

        let other_digest = keccak256(b"another message");
        assert_ne!(
            recover_signer(&other_digest, &signature).ok(),
            Some(keypair.address())
        );
    }
}
