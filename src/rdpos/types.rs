/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types internal to the rdPoS protocol: the tagged payloads validator transactions carry, the
//! deterministic generator behind schedule shuffling, the per-height schedule itself, and the
//! collector that gathers co-signatures for a block in flight.

use ethereum_types::U256;

use crate::types::bytes::{Address, Hash, Signature};
use crate::types::crypto::{keccak256, recover_signer};
use crate::types::transaction::Transaction;
use crate::types::validator_set::{ValidatorSet, MIN_VALIDATORS};

/// The payload of a validator transaction: a tag byte followed by 32 bytes.
///
/// Tags: `0x01` addValidator, `0x02` removeValidator, `0x03` randomHash, `0x04` randomSeed.
/// Addresses are left-padded into the 32 bytes; `randomHash` carries `keccak(secret)` and
/// `randomSeed` later reveals the 32-byte secret itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidatorPayload {
    AddValidator(Address),
    RemoveValidator(Address),
    RandomHash(Hash),
    RandomSeed(Hash),
}

impl ValidatorPayload {
    pub const LEN: usize = 33;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::LEN);
        match self {
            ValidatorPayload::AddValidator(address) => {
                out.push(0x01);
                out.extend_from_slice(&[0u8; 12]);
                out.extend_from_slice(&address.bytes());
            }
            ValidatorPayload::RemoveValidator(address) => {
                out.push(0x02);
                out.extend_from_slice(&[0u8; 12]);
                out.extend_from_slice(&address.bytes());
            }
            ValidatorPayload::RandomHash(hash) => {
                out.push(0x03);
                out.extend_from_slice(&hash.bytes());
            }
            ValidatorPayload::RandomSeed(seed) => {
                out.push(0x04);
                out.extend_from_slice(&seed.bytes());
            }
        }
        out
    }

    pub fn decode(data: &[u8]) -> Option<ValidatorPayload> {
        if data.len() != Self::LEN {
            return None;
        }
        let word: [u8; 32] = data[1..33].try_into().unwrap();
        match data[0] {
            0x01 | 0x02 => {
                if word[0..12] != [0u8; 12] {
                    return None;
                }
                let mut address = [0u8; 20];
                address.copy_from_slice(&word[12..32]);
                if data[0] == 0x01 {
                    Some(ValidatorPayload::AddValidator(Address::new(address)))
                } else {
                    Some(ValidatorPayload::RemoveValidator(Address::new(address)))
                }
            }
            0x03 => Some(ValidatorPayload::RandomHash(Hash::new(word))),
            0x04 => Some(ValidatorPayload::RandomSeed(Hash::new(word))),
            _ => None,
        }
    }

    /// Classify a transaction's `data` field. `None` means the transaction is an ordinary user
    /// transaction.
    pub fn from_transaction(tx: &Transaction) -> Option<ValidatorPayload> {
        ValidatorPayload::decode(tx.data())
    }
}

/// A deterministic generator keyed solely by a 32-byte seed: each draw returns the current state
/// as a big-endian integer and advances the state to its keccak-256 digest. Every node holding
/// the same seed draws the same sequence.
pub struct RandomGen {
    state: Hash,
}

impl RandomGen {
    pub fn new(seed: Hash) -> RandomGen {
        RandomGen { state: seed }
    }

    pub fn next_u256(&mut self) -> U256 {
        let out = self.state.to_u256();
        self.state = keccak256(&self.state.bytes());
        out
    }

    /// In-place Fisher–Yates shuffle driven by this generator.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = (self.next_u256() % U256::from(i as u64 + 1)).as_usize();
            items.swap(i, j);
        }
    }
}

/// The per-height permutation of the validator set.
///
/// Index 0 is the block producer; indexes `1..MIN_VALIDATORS` are the co-signers. The first
/// `MIN_VALIDATORS` validators together contribute the commit/reveal randomness for the height.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    order: Vec<Address>,
}

impl Schedule {
    /// Shuffle the validator set with a generator keyed solely by `seed`.
    pub fn derive(validator_set: &ValidatorSet, seed: Hash) -> Schedule {
        let mut order = validator_set.to_vec();
        RandomGen::new(seed).shuffle(&mut order);
        Schedule { order }
    }

    pub fn producer(&self) -> Address {
        self.order[0]
    }

    /// The `MIN_VALIDATORS - 1` validators expected to co-sign the block.
    pub fn cosigners(&self) -> &[Address] {
        &self.order[1..MIN_VALIDATORS]
    }

    /// The validators that contribute commit/reveal randomness this height: the producer and the
    /// co-signers.
    pub fn contributors(&self) -> &[Address] {
        &self.order[0..MIN_VALIDATORS]
    }

    pub fn position(&self, validator: &Address) -> Option<usize> {
        self.order.iter().position(|v| v == validator)
    }

    pub fn as_slice(&self) -> &[Address] {
        &self.order
    }
}

/// Collects co-signatures over a block hash from the scheduled co-signers. Yields the full,
/// schedule-ordered signature list once every co-signer has signed.
pub struct CoSignatureCollector {
    block_hash: Hash,
    cosigners: Vec<Address>,
    signatures: Vec<Option<Signature>>,
}

impl CoSignatureCollector {
    pub fn new(block_hash: Hash, cosigners: Vec<Address>) -> CoSignatureCollector {
        let len = cosigners.len();
        CoSignatureCollector {
            block_hash,
            cosigners,
            signatures: vec![None; len],
        }
    }

    /// Verify and store one co-signature. Returns the complete ordered set once all expected
    /// co-signers have contributed, consuming nothing on invalid or duplicate input.
    pub fn collect(&mut self, signature: Signature) -> Option<Vec<Signature>> {
        let signer = recover_signer(&self.block_hash, &signature).ok()?;
        let position = self.cosigners.iter().position(|c| *c == signer)?;
        if self.signatures[position].is_none() {
            self.signatures[position] = Some(signature);
        }
        if self.signatures.iter().all(|s| s.is_some()) {
            Some(self.signatures.iter().map(|s| s.unwrap()).collect())
        } else {
            None
        }
    }

    pub fn block_hash(&self) -> Hash {
        self.block_hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::crypto::Keypair;

    #[test]
    fn payload_encoding_round_trip() {
        let payloads = [
            ValidatorPayload::AddValidator(Address::new([0x11; 20])),
            ValidatorPayload::RemoveValidator(Address::new([0x22; 20])),
            ValidatorPayload::RandomHash(keccak256(b"commit")),
            ValidatorPayload::RandomSeed(Hash::new([0x44; 32])),
        ];
        for payload in payloads {
            let encoded = payload.encode();
            assert_eq!(encoded.len(), ValidatorPayload::LEN);
            assert_eq!(ValidatorPayload::decode(&encoded), Some(payload));
        }
        assert_eq!(ValidatorPayload::decode(&[0x05; 33]), None);
        assert_eq!(ValidatorPayload::decode(&[0x01; 32]), None);
    }

    #[test]
    fn random_gen_is_deterministic() {
        let seed = keccak256(b"seed");
        let mut a = RandomGen::new(seed);
        let mut b = RandomGen::new(seed);
        for _ in 0..8 {
            assert_eq!(a.next_u256(), b.next_u256());
        }
        assert_ne!(RandomGen::new(seed).next_u256(), RandomGen::new(keccak256(b"other")).next_u256());
    }

    #[test]
    fn schedule_is_a_permutation() {
        let mut set = ValidatorSet::new();
        for n in 1..=6u8 {
            set.put(Address::new([n; 20]));
        }
        let schedule = Schedule::derive(&set, keccak256(b"height seed"));
        assert_eq!(schedule.as_slice().len(), set.len());
        for validator in set.iter() {
            assert!(schedule.position(validator).is_some());
        }
        // Same seed, same permutation on every node.
        assert_eq!(Schedule::derive(&set, keccak256(b"height seed")), schedule);
    }

    #[test]
    fn collector_requires_every_cosigner() {
        let keypairs: Vec<Keypair> = (0..3).map(|_| Keypair::random()).collect();
        let block_hash = keccak256(b"block");
        let cosigners: Vec<Address> = keypairs.iter().map(|kp| kp.address()).collect();
        let mut collector = CoSignatureCollector::new(block_hash, cosigners.clone());

        assert!(collector.collect(keypairs[0].sign(&block_hash)).is_none());
        // A duplicate and a signature from an outsider change nothing.
        assert!(collector.collect(keypairs[0].sign(&block_hash)).is_none());
        assert!(collector.collect(Keypair::random().sign(&block_hash)).is_none());
        assert!(collector.collect(keypairs[2].sign(&block_hash)).is_none());

        let complete = collector.collect(keypairs[1].sign(&block_hash)).unwrap();
        assert_eq!(complete.len(), 3);
        for (signature, expected) in complete.iter().zip(&cosigners) {
            assert_eq!(recover_signer(&block_hash, signature).unwrap(), *expected);
        }
    }
}
