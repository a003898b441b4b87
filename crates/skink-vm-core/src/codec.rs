//! Buffer codecs
//!
//! Byte/text codecs exposed on the buffer surface: utf8, hex, base64 and
//! base64url. Decoding rejects malformed input with `TypeError`.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

use crate::error::{VmError, VmResult};

/// Supported buffer encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// UTF-8 text
    Utf8,
    /// Lowercase hex digits
    Hex,
    /// RFC 4648 base64 with padding
    Base64,
    /// URL-safe base64 without padding
    Base64Url,
}

impl Encoding {
    /// Parse an encoding name
    pub fn from_name(name: &str) -> VmResult<Self> {
        match name {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "hex" => Ok(Self::Hex),
            "base64" => Ok(Self::Base64),
            "base64url" => Ok(Self::Base64Url),
            other => Err(VmError::type_error(format!("unknown encoding \"{other}\""))),
        }
    }

    /// The canonical name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Hex => "hex",
            Self::Base64 => "base64",
            Self::Base64Url => "base64url",
        }
    }
}

/// Encode bytes to text in the given encoding
pub fn encode(bytes: &[u8], encoding: Encoding) -> String {
    match encoding {
        Encoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        Encoding::Hex => hex::encode(bytes),
        Encoding::Base64 => STANDARD.encode(bytes),
        Encoding::Base64Url => URL_SAFE_NO_PAD.encode(bytes),
    }
}

/// Decode text to bytes in the given encoding
pub fn decode(text: &str, encoding: Encoding) -> VmResult<Vec<u8>> {
    match encoding {
        Encoding::Utf8 => Ok(text.as_bytes().to_vec()),
        Encoding::Hex => {
            hex::decode(text).map_err(|e| VmError::type_error(format!("invalid hex string: {e}")))
        }
        Encoding::Base64 => STANDARD
            .decode(text)
            .map_err(|e| VmError::type_error(format!("invalid base64 string: {e}"))),
        Encoding::Base64Url => URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(|e| VmError::type_error(format!("invalid base64url string: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENCODINGS: [Encoding; 4] = [
        Encoding::Utf8,
        Encoding::Hex,
        Encoding::Base64,
        Encoding::Base64Url,
    ];

    #[test]
    fn test_roundtrip_all_encodings() {
        let samples: [&[u8]; 4] = [b"", b"f", b"hello world", &[0u8, 255, 128, 7]];
        for encoding in ENCODINGS {
            for sample in samples {
                if encoding == Encoding::Utf8 && std::str::from_utf8(sample).is_err() {
                    continue; // utf8 is only total over valid text
                }
                let text = encode(sample, encoding);
                assert_eq!(
                    decode(&text, encoding).unwrap(),
                    sample,
                    "roundtrip failed for {}",
                    encoding.name()
                );
            }
        }
    }

    #[test]
    fn test_hex_lowercase() {
        assert_eq!(encode(&[0xAB, 0x01], Encoding::Hex), "ab01");
        assert_eq!(decode("AB01", Encoding::Hex).unwrap(), vec![0xAB, 0x01]);
    }

    #[test]
    fn test_base64url_no_padding() {
        let text = encode(&[251, 255], Encoding::Base64Url);
        assert!(!text.contains('='));
        assert!(!text.contains('+'));
        assert!(!text.contains('/'));
    }

    #[test]
    fn test_invalid_input_rejected() {
        assert!(decode("zz!", Encoding::Hex).is_err());
        assert!(decode("not base64!!!", Encoding::Base64).is_err());
    }

    #[test]
    fn test_unknown_encoding_name() {
        assert!(Encoding::from_name("latin1").is_err());
        assert_eq!(Encoding::from_name("utf-8").unwrap(), Encoding::Utf8);
    }
}
