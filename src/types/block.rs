/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block type: a header committing to two ordered transaction lists, signed by the elected
//! producer and co-signed by the other scheduled validators.
//!
//! A block's hash is the keccak-256 digest of
//! `prevHash ‖ timestamp_be_u64 ‖ height_be_u64 ‖ txRoot ‖ validatorTxRoot`. The signature set is
//! deliberately *not* part of the hash: the producer signature and every co-signature are made
//! over the same digest, and collecting them does not change the block's identity.
//!
//! On the wire a block is the RLP list
//! `[prevHash, timestamp, height, txRoot, validatorTxRoot, producerSig, [validatorSigs…],
//! [txs…], [validatorTxs…]]`.

use rlp::{Rlp, RlpStream};
use std::fmt::{self, Display, Formatter};

use crate::merkle::MerkleTree;
use crate::types::basic::{BlockHeight, Timestamp};
use crate::types::bytes::{Hash, Signature};
use crate::types::crypto::{keccak256, Keypair};
use crate::types::transaction::Transaction;

#[derive(Clone)]
pub struct Block {
    prev_hash: Hash,
    timestamp: Timestamp,
    height: BlockHeight,
    tx_root: Hash,
    validator_tx_root: Hash,
    producer_signature: Signature,
    validator_signatures: Vec<Signature>,
    transactions: Vec<Transaction>,
    validator_transactions: Vec<Transaction>,
    hash: Hash,
}

impl Block {
    /// Assemble an unsigned block from its parent's hash and the two ordered transaction lists.
    /// Merkle roots and the block hash are computed here; signatures are attached afterwards
    /// with [`sign_as_producer`](Block::sign_as_producer) and
    /// [`add_validator_signature`](Block::add_validator_signature).
    pub fn assemble(
        prev_hash: Hash,
        timestamp: Timestamp,
        height: BlockHeight,
        transactions: Vec<Transaction>,
        validator_transactions: Vec<Transaction>,
    ) -> Block {
        let tx_root = MerkleTree::from_transactions(&transactions).root();
        let validator_tx_root = MerkleTree::from_transactions(&validator_transactions).root();
        let hash = Block::hash_fields(prev_hash, timestamp, height, tx_root, validator_tx_root);
        Block {
            prev_hash,
            timestamp,
            height,
            tx_root,
            validator_tx_root,
            producer_signature: Signature::new([0u8; 65]),
            validator_signatures: Vec::new(),
            transactions,
            validator_transactions,
            hash,
        }
    }

    /// The block hash as a function of the canonical header fields only.
    pub fn hash_fields(
        prev_hash: Hash,
        timestamp: Timestamp,
        height: BlockHeight,
        tx_root: Hash,
        validator_tx_root: Hash,
    ) -> Hash {
        let mut preimage = Vec::with_capacity(32 + 8 + 8 + 32 + 32);
        preimage.extend_from_slice(&prev_hash.bytes());
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(&height.to_be_bytes());
        preimage.extend_from_slice(&tx_root.bytes());
        preimage.extend_from_slice(&validator_tx_root.bytes());
        keccak256(&preimage)
    }

    /// Sign the block hash as its producer.
    pub fn sign_as_producer(&mut self, keypair: &Keypair) {
        self.producer_signature = keypair.sign(&self.hash);
    }

    /// Attach one co-signature over the block hash.
    pub fn add_validator_signature(&mut self, signature: Signature) {
        self.validator_signatures.push(signature);
    }

    /// Check that the Merkle roots in the header commit to the carried transaction lists.
    pub fn verify_structure(&self) -> Result<(), StructuralError> {
        if MerkleTree::from_transactions(&self.transactions).root() != self.tx_root {
            return Err(StructuralError::BadMerkleRoot);
        }
        if MerkleTree::from_transactions(&self.validator_transactions).root()
            != self.validator_tx_root
        {
            return Err(StructuralError::BadMerkleRoot);
        }
        Ok(())
    }

    pub fn from_rlp(encoded: &[u8]) -> Result<Block, StructuralError> {
        let rlp = Rlp::new(encoded);
        if !rlp.is_list() || rlp.item_count()? != 9 {
            return Err(StructuralError::TruncatedPayload);
        }
        let prev_hash = read_hash(&rlp, 0)?;
        let timestamp = Timestamp::new(rlp.val_at(1)?);
        let height = BlockHeight::new(rlp.val_at(2)?);
        let tx_root = read_hash(&rlp, 3)?;
        let validator_tx_root = read_hash(&rlp, 4)?;
        let producer_signature = read_signature_bytes(rlp.val_at::<Vec<u8>>(5)?)?;

        let mut validator_signatures = Vec::new();
        for item in rlp.at(6)?.iter() {
            validator_signatures.push(read_signature_bytes(item.as_val::<Vec<u8>>()?)?);
        }
        let transactions = read_transactions(&rlp.at(7)?)?;
        let validator_transactions = read_transactions(&rlp.at(8)?)?;

        let hash = Block::hash_fields(prev_hash, timestamp, height, tx_root, validator_tx_root);
        Ok(Block {
            prev_hash,
            timestamp,
            height,
            tx_root,
            validator_tx_root,
            producer_signature,
            validator_signatures,
            transactions,
            validator_transactions,
            hash,
        })
    }

    pub fn to_rlp(&self) -> Vec<u8> {
        let mut stream = RlpStream::new();
        stream.begin_list(9);
        stream.append(&self.prev_hash.bytes().to_vec());
        stream.append(&self.timestamp.int());
        stream.append(&self.height.int());
        stream.append(&self.tx_root.bytes().to_vec());
        stream.append(&self.validator_tx_root.bytes().to_vec());
        stream.append(&self.producer_signature.bytes().to_vec());
        stream.begin_list(self.validator_signatures.len());
        for signature in &self.validator_signatures {
            stream.append(&signature.bytes().to_vec());
        }
        stream.begin_list(self.transactions.len());
        for tx in &self.transactions {
            stream.append_raw(&tx.rlp_serialize(true), 1);
        }
        stream.begin_list(self.validator_transactions.len());
        for tx in &self.validator_transactions {
            stream.append_raw(&tx.rlp_serialize(true), 1);
        }
        stream.out().to_vec()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn prev_hash(&self) -> Hash {
        self.prev_hash
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn height(&self) -> BlockHeight {
        self.height
    }

    pub fn tx_root(&self) -> Hash {
        self.tx_root
    }

    pub fn validator_tx_root(&self) -> Hash {
        self.validator_tx_root
    }

    pub fn producer_signature(&self) -> Signature {
        self.producer_signature
    }

    pub fn validator_signatures(&self) -> &[Signature] {
        &self.validator_signatures
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn validator_transactions(&self) -> &[Transaction] {
        &self.validator_transactions
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("hash", &self.hash)
            .field("height", &self.height)
            .field("prev_hash", &self.prev_hash)
            .field("txs", &self.transactions.len())
            .field("validator_txs", &self.validator_transactions.len())
            .finish()
    }
}

fn read_hash(rlp: &Rlp, index: usize) -> Result<Hash, StructuralError> {
    let bytes: Vec<u8> = rlp.val_at(index)?;
    if bytes.len() != Hash::LEN {
        return Err(StructuralError::TruncatedPayload);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes);
    Ok(Hash::new(hash))
}

fn read_signature_bytes(bytes: Vec<u8>) -> Result<Signature, StructuralError> {
    if bytes.len() != Signature::LEN {
        return Err(StructuralError::TruncatedPayload);
    }
    let mut signature = [0u8; 65];
    signature.copy_from_slice(&bytes);
    Ok(Signature::new(signature))
}

fn read_transactions(list: &Rlp) -> Result<Vec<Transaction>, StructuralError> {
    let mut transactions = Vec::new();
    for item in list.iter() {
        transactions
            .push(Transaction::from_rlp(item.as_raw()).map_err(|_| StructuralError::TruncatedPayload)?);
    }
    Ok(transactions)
}

/// Why a block's shape (independent of consensus rules) is unacceptable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralError {
    /// The block does not extend the current chain head.
    BadPrevHash,
    /// The block's height is not `chain head height + 1`.
    BadHeight,
    /// A Merkle root in the header does not commit to the carried transactions.
    BadMerkleRoot,
    /// The encoding ended early or a field has the wrong width.
    TruncatedPayload,
}

impl From<rlp::DecoderError> for StructuralError {
    fn from(_: rlp::DecoderError) -> StructuralError {
        StructuralError::TruncatedPayload
    }
}

impl Display for StructuralError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            StructuralError::BadPrevHash => write!(f, "previous block hash does not match chain head"),
            StructuralError::BadHeight => write!(f, "block height is not chain head height + 1"),
            StructuralError::BadMerkleRoot => write!(f, "merkle root does not match transactions"),
            StructuralError::TruncatedPayload => write!(f, "truncated or malformed block payload"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::basic::ChainId;
    use crate::types::bytes::Address;
    use ethereum_types::U256;

    fn sample_tx(keypair: &Keypair, nonce: u32) -> Transaction {
        Transaction::new(
            Address::new([0x44; 20]),
            U256::from(10),
            vec![],
            ChainId::new(8848),
            nonce,
            U256::one(),
            U256::from(21000),
            keypair,
        )
    }

    #[test]
    fn rlp_round_trip() {
        let producer = Keypair::random();
        let cosigner = Keypair::random();
        let txs = vec![sample_tx(&producer, 0), sample_tx(&producer, 1)];
        let mut block =
            Block::assemble(Hash::random(), Timestamp::new(1_000), BlockHeight::new(1), txs, vec![]);
        block.sign_as_producer(&producer);
        block.add_validator_signature(cosigner.sign(&block.hash()));

        let decoded = Block::from_rlp(&block.to_rlp()).unwrap();
        assert_eq!(decoded.hash(), block.hash());
        assert_eq!(decoded.producer_signature(), block.producer_signature());
        assert_eq!(decoded.validator_signatures(), block.validator_signatures());
        assert_eq!(decoded.transactions().len(), 2);
        assert!(decoded.verify_structure().is_ok());
    }

    #[test]
    fn hash_ignores_signatures() {
        let producer = Keypair::random();
        let mut block =
            Block::assemble(Hash::ZERO, Timestamp::new(42), BlockHeight::new(1), vec![], vec![]);
        let unsigned_hash = block.hash();
        block.sign_as_producer(&producer);
        block.add_validator_signature(producer.sign(&block.hash()));
        assert_eq!(block.hash(), unsigned_hash);
    }

    #[test]
    fn empty_tx_lists_commit_to_zero_roots() {
        let block =
            Block::assemble(Hash::ZERO, Timestamp::new(42), BlockHeight::new(1), vec![], vec![]);
        assert_eq!(block.tx_root(), Hash::ZERO);
        assert_eq!(block.validator_tx_root(), Hash::ZERO);
    }

    #[test]
    fn producer_signature_recovers_over_block_hash() {
        let producer = Keypair::random();
        let mut block =
            Block::assemble(Hash::ZERO, Timestamp::new(42), BlockHeight::new(1), vec![], vec![]);
        block.sign_as_producer(&producer);
        let recovered =
            crate::types::crypto::recover_signer(&block.hash(), &block.producer_signature()).unwrap();
        assert_eq!(recovered, producer.address());
    }
}
