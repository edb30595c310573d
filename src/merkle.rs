/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Hash commitment structures: a binary [Merkle tree](MerkleTree) committing to an ordered list
//! of transactions, and a 16-way [Patricia trie](PatriciaTree) indexing values by the nibbles of
//! a key hash.

use crate::types::bytes::Hash;
use crate::types::crypto::keccak256;
use crate::types::transaction::Transaction;

/// A binary Merkle tree. Layer zero is the leaves; each higher layer is the pairwise keccak-256
/// of the layer below, duplicating the last node of an odd-sized layer.
pub struct MerkleTree {
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<Hash>) -> MerkleTree {
        let mut layers = vec![leaves];
        while layers.last().unwrap().len() > 1 {
            let next = Self::next_layer(layers.last().unwrap());
            layers.push(next);
        }
        MerkleTree { layers }
    }

    /// Commit to a list of transactions in order, by their hashes.
    pub fn from_transactions(transactions: &[Transaction]) -> MerkleTree {
        Self::from_leaves(transactions.iter().map(|tx| tx.hash()).collect())
    }

    /// The root commitment. An empty list of leaves commits to the all-zeroes hash.
    pub fn root(&self) -> Hash {
        match self.layers.last().unwrap().first() {
            Some(root) => *root,
            None => Hash::ZERO,
        }
    }

    /// The sibling hash at each layer on the path from `leaf_index` to the root, bottom-up.
    /// Returns `None` if `leaf_index` is out of range.
    pub fn proof(&self, leaf_index: usize) -> Option<Vec<Hash>> {
        if leaf_index >= self.layers[0].len() {
            return None;
        }
        let mut proof = Vec::new();
        let mut position = leaf_index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = if position % 2 == 0 { position + 1 } else { position - 1 };
            // An odd layer duplicates its last node, so the sibling of a final lone node
            // is the node itself.
            proof.push(*layer.get(sibling).unwrap_or(&layer[position]));
            position /= 2;
        }
        Some(proof)
    }

    fn next_layer(layer: &[Hash]) -> Vec<Hash> {
        layer
            .chunks(2)
            .map(|pair| {
                let left = pair[0];
                let right = *pair.get(1).unwrap_or(&pair[0]);
                let mut concat = [0u8; 64];
                concat[..32].copy_from_slice(&left.bytes());
                concat[32..].copy_from_slice(&right.bytes());
                keccak256(&concat)
            })
            .collect()
    }
}

/// A 16-way radix tree over the nibbles of a 32-byte key hash. Leaves hold opaque byte values.
/// Deleting clears the value at the leaf; interior nodes are never removed.
pub struct PatriciaTree {
    root: PatriciaNode,
}

struct PatriciaNode {
    children: [Option<Box<PatriciaNode>>; 16],
    value: Option<Vec<u8>>,
}

impl PatriciaNode {
    fn new() -> PatriciaNode {
        PatriciaNode {
            children: Default::default(),
            value: None,
        }
    }
}

impl PatriciaTree {
    pub fn new() -> PatriciaTree {
        PatriciaTree {
            root: PatriciaNode::new(),
        }
    }

    /// Insert a value at the 64-nibble path of `key`, replacing any previous value.
    pub fn add_leaf(&mut self, key: &Hash, value: Vec<u8>) {
        let mut node = &mut self.root;
        for nibble in nibbles(key) {
            node = node.children[nibble as usize].get_or_insert_with(|| Box::new(PatriciaNode::new()));
        }
        node.value = Some(value);
    }

    /// The value stored at the path of `key`, if any.
    pub fn get_leaf(&self, key: &Hash) -> Option<&[u8]> {
        let mut node = &self.root;
        for nibble in nibbles(key) {
            node = node.children[nibble as usize].as_deref()?;
        }
        node.value.as_deref()
    }

    /// Clear the value at the path of `key`. Returns whether a value was present.
    pub fn del_leaf(&mut self, key: &Hash) -> bool {
        let mut node = &mut self.root;
        for nibble in nibbles(key) {
            match node.children[nibble as usize].as_deref_mut() {
                Some(child) => node = child,
                None => return false,
            }
        }
        node.value.take().is_some()
    }
}

impl Default for PatriciaTree {
    fn default() -> Self {
        PatriciaTree::new()
    }
}

fn nibbles(key: &Hash) -> impl Iterator<Item = u8> + '_ {
    key.bytes()
        .into_iter()
        .flat_map(|byte| [byte >> 4, byte & 0x0f])
        .collect::<Vec<u8>>()
        .into_iter()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> Hash {
        keccak256(&[n])
    }

    #[test]
    fn empty_tree_has_zero_root() {
        assert_eq!(MerkleTree::from_leaves(vec![]).root(), Hash::ZERO);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let tree = MerkleTree::from_leaves(vec![leaf(1)]);
        assert_eq!(tree.root(), leaf(1));
    }

    #[test]
    fn root_changes_under_any_perturbation() {
        let leaves: Vec<Hash> = (0..5).map(leaf).collect();
        let root = MerkleTree::from_leaves(leaves.clone()).root();
        for i in 0..leaves.len() {
            let mut perturbed = leaves.clone();
            perturbed[i] = leaf(100 + i as u8);
            assert_ne!(MerkleTree::from_leaves(perturbed).root(), root);
        }
        // Same sequence, same root.
        assert_eq!(MerkleTree::from_leaves(leaves).root(), root);
    }

    #[test]
    fn proofs_reconstruct_the_root() {
        let leaves: Vec<Hash> = (0..7).map(leaf).collect();
        let tree = MerkleTree::from_leaves(leaves.clone());
        for (i, l) in leaves.iter().enumerate() {
            let proof = tree.proof(i).unwrap();
            let mut acc = *l;
            let mut position = i;
            for sibling in proof {
                let mut concat = [0u8; 64];
                if position % 2 == 0 {
                    concat[..32].copy_from_slice(&acc.bytes());
                    concat[32..].copy_from_slice(&sibling.bytes());
                } else {
                    concat[..32].copy_from_slice(&sibling.bytes());
                    concat[32..].copy_from_slice(&acc.bytes());
                }
                acc = keccak256(&concat);
                position /= 2;
            }
            assert_eq!(acc, tree.root());
        }
        assert!(tree.proof(7).is_none());
    }

    #[test]
    fn patricia_add_get_del() {
        let mut trie = PatriciaTree::new();
        let key_a = leaf(1);
        let key_b = leaf(2);
        trie.add_leaf(&key_a, b"alpha".to_vec());
        trie.add_leaf(&key_b, b"beta".to_vec());
        assert_eq!(trie.get_leaf(&key_a), Some(b"alpha".as_slice()));
        assert_eq!(trie.get_leaf(&key_b), Some(b"beta".as_slice()));
        assert_eq!(trie.get_leaf(&leaf(3)), None);

        trie.add_leaf(&key_a, b"gamma".to_vec());
        assert_eq!(trie.get_leaf(&key_a), Some(b"gamma".as_slice()));

        assert!(trie.del_leaf(&key_a));
        assert!(!trie.del_leaf(&key_a));
        assert_eq!(trie.get_leaf(&key_a), None);
        assert_eq!(trie.get_leaf(&key_b), Some(b"beta".as_slice()));
    }
}
