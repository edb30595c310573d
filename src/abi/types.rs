/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The supported Solidity types, their value counterparts, and the codec's error kind.

use ethereum_types::U256;
use std::fmt::{self, Display, Formatter};

use crate::types::bytes::Address;

/// The Solidity types this codec supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbiType {
    Uint256,
    Address,
    Bool,
    Bytes,
    String,
    Uint256Array,
    AddressArray,
    BoolArray,
    BytesArray,
    StringArray,
}

impl AbiType {
    /// Whether values of this type are encoded in the tail, behind an offset word.
    pub fn is_dynamic(&self) -> bool {
        !matches!(self, AbiType::Uint256 | AbiType::Address | AbiType::Bool)
    }

    /// Parse one canonical Solidity type token.
    pub(crate) fn parse(token: &str) -> Result<AbiType, CodecError> {
        match token {
            "uint256" => Ok(AbiType::Uint256),
            "address" => Ok(AbiType::Address),
            "bool" => Ok(AbiType::Bool),
            "bytes" => Ok(AbiType::Bytes),
            "string" => Ok(AbiType::String),
            "uint256[]" => Ok(AbiType::Uint256Array),
            "address[]" => Ok(AbiType::AddressArray),
            "bool[]" => Ok(AbiType::BoolArray),
            "bytes[]" => Ok(AbiType::BytesArray),
            "string[]" => Ok(AbiType::StringArray),
            _ => Err(CodecError::InvalidSelectorSyntax),
        }
    }
}

/// A value of one of the supported [`AbiType`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AbiValue {
    Uint256(U256),
    Address(Address),
    Bool(bool),
    Bytes(Vec<u8>),
    String(String),
    Uint256Array(Vec<U256>),
    AddressArray(Vec<Address>),
    BoolArray(Vec<bool>),
    BytesArray(Vec<Vec<u8>>),
    StringArray(Vec<String>),
}

impl AbiValue {
    pub fn abi_type(&self) -> AbiType {
        match self {
            AbiValue::Uint256(_) => AbiType::Uint256,
            AbiValue::Address(_) => AbiType::Address,
            AbiValue::Bool(_) => AbiType::Bool,
            AbiValue::Bytes(_) => AbiType::Bytes,
            AbiValue::String(_) => AbiType::String,
            AbiValue::Uint256Array(_) => AbiType::Uint256Array,
            AbiValue::AddressArray(_) => AbiType::AddressArray,
            AbiValue::BoolArray(_) => AbiType::BoolArray,
            AbiValue::BytesArray(_) => AbiType::BytesArray,
            AbiValue::StringArray(_) => AbiType::StringArray,
        }
    }
}

/// Why an encode or decode operation failed. Propagated to the caller; never matched by string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The function signature is missing its parentheses, or names an empty or unknown type.
    InvalidSelectorSyntax,
    /// The number of values does not match the number of types in the signature.
    TypeArityMismatch { expected: usize, got: usize },
    /// The value at `position` is not of the type the signature declares there.
    TypeValueMismatch { position: usize },
    /// The input ended before a head word, offset target, or payload could be read in full.
    TruncatedData,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::InvalidSelectorSyntax => write!(f, "invalid function signature"),
            CodecError::TypeArityMismatch { expected, got } => {
                write!(f, "signature declares {} arguments, got {}", expected, got)
            }
            CodecError::TypeValueMismatch { position } => {
                write!(f, "value at position {} does not match its declared type", position)
            }
            CodecError::TruncatedData => write!(f, "input data too short"),
        }
    }
}

/// Split `name(type1,type2,…)` into the function name and its argument types.
pub(crate) fn parse_signature(signature: &str) -> Result<(&str, Vec<AbiType>), CodecError> {
    let open = signature.find('(').ok_or(CodecError::InvalidSelectorSyntax)?;
    if !signature.ends_with(')') || open == 0 {
        return Err(CodecError::InvalidSelectorSyntax);
    }
    let name = &signature[..open];
    let args = &signature[open + 1..signature.len() - 1];
    let types = args
        .split(',')
        .map(AbiType::parse)
        .collect::<Result<Vec<AbiType>, CodecError>>()?;
    Ok((name, types))
}
