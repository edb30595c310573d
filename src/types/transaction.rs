/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The signed transaction type and its Ethereum legacy RLP wire format.
//!
//! A transaction travels as the RLP list `[nonce, gasPrice, gas, to, value, data, v, r, s]`. The
//! signer is never part of the wire format: it is recovered from `(r, s, v)` over the keccak-256
//! digest of the unsigned RLP, which includes the chain id in its
//! [EIP-155](https://eips.ethereum.org/EIPS/eip-155) form (`v = 35 + 2 * chainId + recid`), or the
//! legacy `v ∈ {27, 28}` form when the chain id is zero.
//!
//! Parsing is total: [`Transaction::from_rlp`] either yields a transaction whose signer was
//! successfully recovered, or a [`TransactionError`]. A `Transaction` value in hand is therefore
//! always signature-verified.

use ethereum_types::U256;
use rlp::{Rlp, RlpStream};
use std::fmt::{self, Display, Formatter};

use crate::types::basic::ChainId;
use crate::types::bytes::{Address, Hash, Signature};
use crate::types::crypto::{keccak256, recover_signer, CryptoError, Keypair};

#[derive(Clone, PartialEq, Eq)]
pub struct Transaction {
    to: Address,
    value: U256,
    data: Vec<u8>,
    chain_id: u64,
    nonce: u32,
    gas_price: U256,
    gas: U256,
    v: u64,
    r: U256,
    s: U256,
    // Derived on construction and cached.
    hash: Hash,
    from: Address,
}

impl Transaction {
    /// Construct and sign a transaction with the given keypair.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        to: Address,
        value: U256,
        data: Vec<u8>,
        chain_id: ChainId,
        nonce: u32,
        gas_price: U256,
        gas: U256,
        keypair: &Keypair,
    ) -> Transaction {
        let mut tx = Transaction {
            to,
            value,
            data,
            chain_id: chain_id.int(),
            nonce,
            gas_price,
            gas,
            v: 0,
            r: U256::zero(),
            s: U256::zero(),
            hash: Hash::ZERO,
            from: keypair.address(),
        };
        let signature = keypair.sign(&tx.signing_hash());
        tx.r = signature.r();
        tx.s = signature.s();
        tx.v = if tx.chain_id == 0 {
            27 + signature.recovery_id() as u64
        } else {
            35 + 2 * tx.chain_id + signature.recovery_id() as u64
        };
        tx.hash = keccak256(&tx.rlp_serialize(true));
        tx
    }

    /// Parse a transaction from its signed RLP encoding and recover its signer.
    pub fn from_rlp(encoded: &[u8]) -> Result<Transaction, TransactionError> {
        let rlp = Rlp::new(encoded);
        if !rlp.is_list() || rlp.item_count()? != 9 {
            return Err(TransactionError::Malformed);
        }
        let nonce: u32 = rlp.val_at(0)?;
        let gas_price: U256 = rlp.val_at(1)?;
        let gas: U256 = rlp.val_at(2)?;
        let to_bytes: Vec<u8> = rlp.val_at(3)?;
        if to_bytes.len() != Address::LEN {
            return Err(TransactionError::Malformed);
        }
        let mut to = [0u8; 20];
        to.copy_from_slice(&to_bytes);
        let value: U256 = rlp.val_at(4)?;
        let data: Vec<u8> = rlp.val_at(5)?;
        let v: u64 = rlp.val_at(6)?;
        let r: U256 = rlp.val_at(7)?;
        let s: U256 = rlp.val_at(8)?;

        let (chain_id, recovery_id) = match v {
            27 | 28 => (0, (v - 27) as u8),
            v if v >= 35 => ((v - 35) / 2, ((v - 35) % 2) as u8),
            _ => return Err(TransactionError::InvalidV(v)),
        };

        let mut tx = Transaction {
            to: Address::new(to),
            value,
            data,
            chain_id,
            nonce,
            gas_price,
            gas,
            v,
            r,
            s,
            hash: Hash::ZERO,
            from: Address::default(),
        };
        tx.from = recover_signer(&tx.signing_hash(), &Signature::from_rsv(r, s, recovery_id))?;
        tx.hash = keccak256(encoded);
        Ok(tx)
    }

    /// Serialize to RLP. With `include_signature`, produces the 9-item signed wire form;
    /// without it, the unsigned form whose keccak-256 digest is what gets signed.
    pub fn rlp_serialize(&self, include_signature: bool) -> Vec<u8> {
        let mut stream = RlpStream::new();
        if include_signature {
            stream.begin_list(9);
        } else if self.chain_id != 0 {
            stream.begin_list(9);
        } else {
            stream.begin_list(6);
        }
        stream.append(&self.nonce);
        stream.append(&self.gas_price);
        stream.append(&self.gas);
        stream.append(&self.to.bytes().to_vec());
        stream.append(&self.value);
        stream.append(&self.data);
        if include_signature {
            stream.append(&self.v);
            stream.append(&self.r);
            stream.append(&self.s);
        } else if self.chain_id != 0 {
            stream.append(&self.chain_id);
            stream.append(&0u8);
            stream.append(&0u8);
        }
        stream.out().to_vec()
    }

    /// The digest that the sender signs: keccak-256 of the unsigned RLP.
    pub fn signing_hash(&self) -> Hash {
        keccak256(&self.rlp_serialize(false))
    }

    /// keccak-256 of the signed RLP. Identifies the transaction in mempools and indexes.
    pub fn hash(&self) -> Hash {
        self.hash
    }

    /// The recovered signer.
    pub fn from(&self) -> Address {
        self.from
    }

    pub fn to(&self) -> Address {
        self.to
    }

    pub fn value(&self) -> U256 {
        self.value
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub fn gas_price(&self) -> U256 {
        self.gas_price
    }

    pub fn gas(&self) -> U256 {
        self.gas
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn signature(&self) -> Signature {
        let recovery_id = if self.v >= 35 {
            ((self.v - 35) % 2) as u8
        } else {
            (self.v - 27) as u8
        };
        Signature::from_rsv(self.r, self.s, recovery_id)
    }

    /// Whether this transaction was signed for the given chain.
    pub fn matches_chain(&self, chain_id: ChainId) -> bool {
        self.chain_id == chain_id.int()
    }

    /// The full amount admission requires the sender to cover: `value + gas × gasPrice`.
    pub fn cost(&self) -> U256 {
        self.gas
            .saturating_mul(self.gas_price)
            .saturating_add(self.value)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("hash", &self.hash)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("nonce", &self.nonce)
            .field("value", &self.value)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionError {
    /// The RLP is not a 9-item list of well-formed fields.
    Malformed,
    /// `v` is neither legacy (27/28) nor an EIP-155 encoding.
    InvalidV(u64),
    /// Signer recovery failed.
    BadSignature(CryptoError),
}

impl From<rlp::DecoderError> for TransactionError {
    fn from(_: rlp::DecoderError) -> TransactionError {
        TransactionError::Malformed
    }
}

impl From<CryptoError> for TransactionError {
    fn from(err: CryptoError) -> TransactionError {
        TransactionError::BadSignature(err)
    }
}

impl Display for TransactionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TransactionError::Malformed => write!(f, "malformed transaction RLP"),
            TransactionError::InvalidV(v) => write!(f, "invalid signature v value: {}", v),
            TransactionError::BadSignature(err) => write!(f, "signer recovery failed: {}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tx(keypair: &Keypair, nonce: u32) -> Transaction {
        Transaction::new(
            Address::new([0x22; 20]),
            U256::from(1000),
            vec![],
            ChainId::new(8848),
            nonce,
            U256::from(1),
            U256::from(21000),
            keypair,
        )
    }

    #[test]
    fn rlp_round_trip_recovers_signer() {
        let keypair = Keypair::random();
        let tx = dummy_tx(&keypair, 0);
        let decoded = Transaction::from_rlp(&tx.rlp_serialize(true)).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.from(), keypair.address());
        assert_eq!(decoded.hash(), tx.hash());
        assert!(decoded.matches_chain(ChainId::new(8848)));
        assert!(!decoded.matches_chain(ChainId::new(1)));
    }

    #[test]
    fn legacy_v_round_trip() {
        let keypair = Keypair::random();
        let tx = Transaction::new(
            Address::new([0x33; 20]),
            U256::from(5),
            b"hello".to_vec(),
            ChainId::new(0),
            7,
            U256::from(2),
            U256::from(21000),
            &keypair,
        );
        let decoded = Transaction::from_rlp(&tx.rlp_serialize(true)).unwrap();
        assert!(matches!(decoded.signature().v(), 0 | 1));
        assert_eq!(decoded.from(), keypair.address());
    }

    #[test]
    fn tampered_payload_changes_signer() {
        let keypair = Keypair::random();
        let tx = dummy_tx(&keypair, 0);
        let mut encoded = tx.rlp_serialize(true);
        // Flip a byte inside the `to` field.
        let position = encoded.len() / 2;
        encoded[position] ^= 0x01;
        match Transaction::from_rlp(&encoded) {
            Ok(tampered) => assert_ne!(tampered.from(), keypair.address()),
            Err(_) => (),
        }
    }

    #[test]
    fn truncated_rlp_is_rejected() {
        let keypair = Keypair::random();
        let encoded = dummy_tx(&keypair, 0).rlp_serialize(true);
        assert!(Transaction::from_rlp(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn cost_covers_value_and_gas() {
        let keypair = Keypair::random();
        let tx = dummy_tx(&keypair, 0);
        assert_eq!(tx.cost(), U256::from(1000) + U256::from(21000));
    }
}
