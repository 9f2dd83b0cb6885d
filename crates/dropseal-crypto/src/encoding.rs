//! URL-safe, unpadded base64 for every binary field that crosses a text boundary
//! (JSON records, query strings, cookies).
//!
//! Decoding is strict: padding, the `+`/`/` alphabet, and non-canonical
//! trailing bits are all rejected rather than silently tolerated.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

pub fn encode(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

pub fn decode(s: &str) -> CryptoResult<Vec<u8>> {
    decode_field(s, "base64 value")
}

/// Decode, naming `field` in the error.
pub fn decode_field(s: &str, field: &'static str) -> CryptoResult<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(s).map_err(|e| CryptoError::Encoding {
        field,
        reason: e.to_string(),
    })
}

/// Decode into a fixed-size array, rejecting any other length.
pub fn decode_array<const N: usize>(s: &str, field: &'static str) -> CryptoResult<[u8; N]> {
    let bytes = decode_field(s, field)?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| CryptoError::Encoding {
        field,
        reason: format!("expected {N} bytes, got {actual}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_roundtrip() {
        assert_eq!(encode(b""), "");
        assert_eq!(decode("").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn url_safe_alphabet() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet
        let encoded = encode(&[0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
    }

    #[test]
    fn rejects_padding_and_standard_alphabet() {
        assert!(decode("-_8=").is_err());
        assert!(decode("+/8").is_err());
    }

    #[test]
    fn rejects_non_canonical_trailing_bits() {
        // "-_8" is canonical for [0xfb, 0xff]; "-_9" sets unused low bits
        assert!(decode("-_9").is_err());
    }

    #[test]
    fn rejects_impossible_length() {
        // one leftover symbol can never encode a whole byte
        assert!(decode("A").is_err());
    }

    #[test]
    fn decode_array_checks_length() {
        let s = encode(&[1u8; 12]);
        assert_eq!(decode_array::<12>(&s, "baseNonceB64").unwrap(), [1u8; 12]);

        let err = decode_array::<16>(&s, "unlockSaltB64").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unlockSaltB64") && msg.contains("expected 16"));
    }

    proptest! {
        #[test]
        fn encode_decode_inverse(data in proptest::collection::vec(any::<u8>(), 0..=512)) {
            let text = encode(&data);
            prop_assert!(text.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'));
            prop_assert_eq!(decode(&text).unwrap(), data);
        }
    }
}
