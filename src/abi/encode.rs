/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Packing of [`AbiValue`]s into Solidity ABI call data.

use ethereum_types::U256;

use crate::types::bytes::Address;
use crate::types::crypto::keccak256;

use super::types::{parse_signature, AbiValue, CodecError};

/// The 4-byte function selector of a canonical signature: the first four bytes of
/// `keccak256("name(type1,type2,…)")`. Validates the signature's syntax.
pub fn selector(signature: &str) -> Result<[u8; 4], CodecError> {
    parse_signature(signature)?;
    let digest = keccak256(signature.as_bytes());
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&digest.bytes()[0..4]);
    Ok(bytes)
}

/// Encode an argument tuple: the head words, then the dynamic tails.
pub fn encode(values: &[AbiValue]) -> Vec<u8> {
    let head_len = 32 * values.len();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();
    for value in values {
        if value.abi_type().is_dynamic() {
            head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
            tail.extend_from_slice(&encode_tail(value));
        } else {
            head.extend_from_slice(&static_word(value));
        }
    }
    head.extend_from_slice(&tail);
    head
}

/// Encode a full contract call: selector followed by the encoded arguments. The values are
/// checked against the signature's declared types.
pub fn encode_call(signature: &str, values: &[AbiValue]) -> Result<Vec<u8>, CodecError> {
    let (_, types) = parse_signature(signature)?;
    if types.len() != values.len() {
        return Err(CodecError::TypeArityMismatch {
            expected: types.len(),
            got: values.len(),
        });
    }
    for (position, (declared, value)) in types.iter().zip(values).enumerate() {
        if *declared != value.abi_type() {
            return Err(CodecError::TypeValueMismatch { position });
        }
    }
    let mut out = selector(signature)?.to_vec();
    out.extend_from_slice(&encode(values));
    Ok(out)
}

/// The single 32-byte word of a static value.
fn static_word(value: &AbiValue) -> [u8; 32] {
    match value {
        AbiValue::Uint256(int) => u256_word(*int),
        AbiValue::Address(address) => address_word(address),
        AbiValue::Bool(b) => uint_word(*b as u64),
        _ => unreachable!("dynamic values are encoded in the tail"),
    }
}

/// The tail payload of a dynamic value.
fn encode_tail(value: &AbiValue) -> Vec<u8> {
    match value {
        AbiValue::Bytes(bytes) => encode_byte_payload(bytes),
        AbiValue::String(string) => encode_byte_payload(string.as_bytes()),
        AbiValue::Uint256Array(ints) => {
            let mut out = uint_word(ints.len() as u64).to_vec();
            for int in ints {
                out.extend_from_slice(&u256_word(*int));
            }
            out
        }
        AbiValue::AddressArray(addresses) => {
            let mut out = uint_word(addresses.len() as u64).to_vec();
            for address in addresses {
                out.extend_from_slice(&address_word(address));
            }
            out
        }
        AbiValue::BoolArray(bools) => {
            let mut out = uint_word(bools.len() as u64).to_vec();
            for b in bools {
                out.extend_from_slice(&uint_word(*b as u64));
            }
            out
        }
        AbiValue::BytesArray(elements) => {
            encode_dynamic_array(elements.iter().map(|e| e.as_slice()))
        }
        AbiValue::StringArray(elements) => {
            encode_dynamic_array(elements.iter().map(|e| e.as_bytes()))
        }
        _ => unreachable!("static values are encoded in the head"),
    }
}

/// Length word, then per-element offsets measured from just after the length word, then each
/// element as a length-prefixed, word-aligned block.
fn encode_dynamic_array<'a>(elements: impl ExactSizeIterator<Item = &'a [u8]>) -> Vec<u8> {
    let count = elements.len();
    let mut out = uint_word(count as u64).to_vec();
    let mut blocks: Vec<u8> = Vec::new();
    for element in elements {
        out.extend_from_slice(&uint_word((32 * count + blocks.len()) as u64));
        blocks.extend_from_slice(&encode_byte_payload(element));
    }
    out.extend_from_slice(&blocks);
    out
}

/// Length word followed by the data, right-padded to a multiple of 32 bytes.
fn encode_byte_payload(data: &[u8]) -> Vec<u8> {
    let mut out = uint_word(data.len() as u64).to_vec();
    out.extend_from_slice(data);
    let remainder = data.len() % 32;
    if remainder != 0 {
        out.extend_from_slice(&vec![0u8; 32 - remainder]);
    }
    out
}

fn u256_word(int: U256) -> [u8; 32] {
    let mut word = [0u8; 32];
    int.to_big_endian(&mut word);
    word
}

fn uint_word(int: u64) -> [u8; 32] {
    u256_word(U256::from(int))
}

fn address_word(address: &Address) -> [u8; 32] {
    let mut word = [0u8; 32];
    word[12..32].copy_from_slice(&address.bytes());
    word
}
