/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Unpacking of Solidity ABI call data back into [`AbiValue`]s.

use ethereum_types::U256;

use crate::types::bytes::Address;

use super::types::{AbiType, AbiValue, CodecError};

/// Decode an argument region (without selector) against an ordered list of expected types.
pub fn decode(types: &[AbiType], data: &[u8]) -> Result<Vec<AbiValue>, CodecError> {
    let mut values = Vec::with_capacity(types.len());
    for (index, abi_type) in types.iter().enumerate() {
        let head_position = 32 * index;
        let value = match abi_type {
            AbiType::Uint256 => AbiValue::Uint256(read_u256(data, head_position)?),
            AbiType::Address => AbiValue::Address(read_address(data, head_position)?),
            AbiType::Bool => AbiValue::Bool(read_bool(data, head_position)?),
            dynamic => {
                let offset = read_offset(data, head_position)?;
                match dynamic {
                    AbiType::Bytes => AbiValue::Bytes(read_byte_payload(data, offset)?),
                    AbiType::String => AbiValue::String(
                        String::from_utf8(read_byte_payload(data, offset)?)
                            .map_err(|_| CodecError::TypeValueMismatch { position: index })?,
                    ),
                    AbiType::Uint256Array => {
                        AbiValue::Uint256Array(read_static_array(data, offset, read_u256)?)
                    }
                    AbiType::AddressArray => {
                        AbiValue::AddressArray(read_static_array(data, offset, read_address)?)
                    }
                    AbiType::BoolArray => {
                        AbiValue::BoolArray(read_static_array(data, offset, read_bool)?)
                    }
                    AbiType::BytesArray => AbiValue::BytesArray(read_dynamic_array(data, offset)?),
                    AbiType::StringArray => AbiValue::StringArray(
                        read_dynamic_array(data, offset)?
                            .into_iter()
                            .map(|e| {
                                String::from_utf8(e)
                                    .map_err(|_| CodecError::TypeValueMismatch { position: index })
                            })
                            .collect::<Result<Vec<String>, CodecError>>()?,
                    ),
                    _ => unreachable!(),
                }
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn read_word(data: &[u8], position: usize) -> Result<[u8; 32], CodecError> {
    if position + 32 > data.len() {
        return Err(CodecError::TruncatedData);
    }
    let mut word = [0u8; 32];
    word.copy_from_slice(&data[position..position + 32]);
    Ok(word)
}

fn read_u256(data: &[u8], position: usize) -> Result<U256, CodecError> {
    Ok(U256::from_big_endian(&read_word(data, position)?))
}

fn read_address(data: &[u8], position: usize) -> Result<Address, CodecError> {
    let word = read_word(data, position)?;
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&word[12..32]);
    Ok(Address::new(bytes))
}

fn read_bool(data: &[u8], position: usize) -> Result<bool, CodecError> {
    Ok(read_word(data, position)?[31] == 0x01)
}

/// Read an offset word and bound it so that at least a length word fits behind it.
fn read_offset(data: &[u8], position: usize) -> Result<usize, CodecError> {
    let offset = read_u256(data, position)?;
    if offset > U256::from(data.len()) {
        return Err(CodecError::TruncatedData);
    }
    Ok(offset.as_usize())
}

/// Read a length word at `position` followed by that many payload bytes.
fn read_byte_payload(data: &[u8], position: usize) -> Result<Vec<u8>, CodecError> {
    let length = read_length(data, position)?;
    if position + 32 + length > data.len() {
        return Err(CodecError::TruncatedData);
    }
    Ok(data[position + 32..position + 32 + length].to_vec())
}

/// Read a length word, bounded by the input size so later arithmetic cannot overflow.
fn read_length(data: &[u8], position: usize) -> Result<usize, CodecError> {
    let length = read_u256(data, position)?;
    if length > U256::from(data.len()) {
        return Err(CodecError::TruncatedData);
    }
    Ok(length.as_usize())
}

fn read_static_array<T>(
    data: &[u8],
    position: usize,
    read_element: fn(&[u8], usize) -> Result<T, CodecError>,
) -> Result<Vec<T>, CodecError> {
    let length = read_length(data, position)?;
    if length
        .checked_mul(32)
        .and_then(|bytes| (position + 32).checked_add(bytes))
        .map_or(true, |end| end > data.len())
    {
        return Err(CodecError::TruncatedData);
    }
    let mut elements = Vec::with_capacity(length);
    for i in 0..length {
        elements.push(read_element(data, position + 32 + 32 * i)?);
    }
    Ok(elements)
}

/// Read an array of per-element offsets (relative to just after the array's length word),
/// dereferencing each into a length-prefixed payload.
fn read_dynamic_array(data: &[u8], position: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    let length = read_length(data, position)?;
    if length
        .checked_mul(32)
        .and_then(|bytes| (position + 32).checked_add(bytes))
        .map_or(true, |end| end > data.len())
    {
        return Err(CodecError::TruncatedData);
    }
    let base = position + 32;
    let mut elements = Vec::with_capacity(length);
    for i in 0..length {
        let relative = read_offset(data, base + 32 * i)?;
        if base + relative > data.len() {
            return Err(CodecError::TruncatedData);
        }
        elements.push(read_byte_payload(data, base + relative)?);
    }
    Ok(elements)
}
