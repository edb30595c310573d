/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Bidirectional codec for Solidity's contract ABI, restricted to the types this chain's
//! contracts use: `uint256`, `address`, `bool`, `bytes`, `string`, and one-dimensional arrays of
//! each.
//!
//! Encoding is bit-exact with Solidity ABI v2: static values occupy one left-padded 32-byte word
//! in the head; dynamic values leave a byte offset in the head and append a length-prefixed,
//! 32-byte-aligned payload to the tail. [`encode_call`] prepends the 4-byte function selector,
//! the first four bytes of the keccak-256 digest of the canonical signature
//! (`name(type1,type2,…)`, no spaces).
//!
//! Decoding walks the same layout in reverse and fails with a typed [`CodecError`] instead of
//! panicking: every offset dereference checks `offset + 32 + length` against the input size.

mod types;
pub use types::{AbiType, AbiValue, CodecError};

mod encode;
pub use encode::{encode, encode_call, selector};

mod decode;
pub use decode::decode;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::bytes::Address;
    use ethereum_types::U256;

    #[test]
    fn transfer_selector() {
        assert_eq!(
            selector("transfer(address,uint256)").unwrap(),
            [0xa9, 0x05, 0x9c, 0xbb]
        );
    }

    #[test]
    fn transfer_call_encoding() {
        let mut to = [0u8; 20];
        to[19] = 0x01;
        let encoded = encode_call(
            "transfer(address,uint256)",
            &[
                AbiValue::Address(Address::new(to)),
                AbiValue::Uint256(U256::from(1000)),
            ],
        )
        .unwrap();

        assert_eq!(encoded.len(), 4 + 64);
        assert_eq!(&encoded[0..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        let mut expected_to = [0u8; 32];
        expected_to[31] = 0x01;
        assert_eq!(&encoded[4..36], &expected_to);
        let mut expected_value = [0u8; 32];
        expected_value[30] = 0x03;
        expected_value[31] = 0xe8;
        assert_eq!(&encoded[36..68], &expected_value);
    }

    #[test]
    fn selector_syntax_is_validated() {
        assert!(matches!(
            selector("transfer"),
            Err(CodecError::InvalidSelectorSyntax)
        ));
        assert!(matches!(
            selector("transfer(address,uint42)"),
            Err(CodecError::InvalidSelectorSyntax)
        ));
        assert!(matches!(
            selector("transfer()"),
            Err(CodecError::InvalidSelectorSyntax)
        ));
    }

    #[test]
    fn static_values_round_trip() {
        let values = vec![
            AbiValue::Uint256(U256::MAX),
            AbiValue::Address(Address::new([0xaa; 20])),
            AbiValue::Bool(true),
            AbiValue::Bool(false),
        ];
        let types = [AbiType::Uint256, AbiType::Address, AbiType::Bool, AbiType::Bool];
        assert_eq!(decode(&types, &encode(&values)).unwrap(), values);
    }

    #[test]
    fn dynamic_values_round_trip() {
        let values = vec![
            AbiValue::Bytes(b"0123456789012345678901234567890123456789".to_vec()),
            AbiValue::String("hello world".to_string()),
            AbiValue::Uint256(U256::from(7)),
            AbiValue::Bytes(vec![]),
        ];
        let types = [AbiType::Bytes, AbiType::String, AbiType::Uint256, AbiType::Bytes];
        assert_eq!(decode(&types, &encode(&values)).unwrap(), values);
    }

    #[test]
    fn arrays_round_trip() {
        let values = vec![
            AbiValue::Uint256Array(vec![U256::from(1), U256::from(2), U256::from(3)]),
            AbiValue::AddressArray(vec![Address::new([1; 20]), Address::new([2; 20])]),
            AbiValue::BoolArray(vec![true, false, true]),
            AbiValue::StringArray(vec!["one".into(), "a much longer string that spans more than one word".into()]),
            AbiValue::BytesArray(vec![vec![0xde, 0xad], vec![], vec![0xbe; 40]]),
        ];
        let types = [
            AbiType::Uint256Array,
            AbiType::AddressArray,
            AbiType::BoolArray,
            AbiType::StringArray,
            AbiType::BytesArray,
        ];
        assert_eq!(decode(&types, &encode(&values)).unwrap(), values);
    }

    #[test]
    fn bytes_array_elements_pad_to_word_multiples() {
        // A 40-byte element must occupy two words after its length word.
        let encoded = encode(&[AbiValue::BytesArray(vec![vec![0xbe; 40]])]);
        // head word + array length + element offset + element length + 2 data words
        assert_eq!(encoded.len(), 32 * 6);
        assert_eq!(encoded[32 * 5 + 8], 0x00); // padding after the 40th byte
    }

    #[test]
    fn arity_and_type_mismatches() {
        assert!(matches!(
            encode_call("transfer(address,uint256)", &[AbiValue::Bool(true)]),
            Err(CodecError::TypeArityMismatch { expected: 2, got: 1 })
        ));
        assert!(matches!(
            encode_call(
                "transfer(address,uint256)",
                &[AbiValue::Bool(true), AbiValue::Uint256(U256::zero())]
            ),
            Err(CodecError::TypeValueMismatch { position: 0 })
        ));
    }

    #[test]
    fn truncated_inputs_are_rejected() {
        let encoded = encode(&[AbiValue::Bytes(b"some payload".to_vec())]);
        for cut in [1, 32, encoded.len() - 1] {
            assert!(matches!(
                decode(&[AbiType::Bytes], &encoded[..cut]),
                Err(CodecError::TruncatedData)
            ));
        }
        // An offset pointing past the end of the input.
        let mut forged = vec![0u8; 32];
        forged[31] = 0xff;
        assert!(matches!(
            decode(&[AbiType::Bytes], &forged),
            Err(CodecError::TruncatedData)
        ));
    }
}
