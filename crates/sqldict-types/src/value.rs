//! The typed value pipeline.
//!
//! Dictionary values and bound pattern segments travel as strings; each SQL
//! column declares one of five value kinds that controls how the string is
//! parsed into a bind parameter and how a result column is rendered back into
//! a string. Binary columns always render as lowercase hex.

use std::fmt;

use sqldict_error::{DictError, Result};
use uuid::Uuid;

/// The SQL value kinds a map column may declare.
///
/// `Uint` is a 64-bit integer that rejects a leading minus; it still binds
/// through the signed 64-bit parameter slot, so the usable range is
/// `0..=i64::MAX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlValueType {
    /// Free-form text.
    String,
    /// 64-bit signed integer.
    Int,
    /// 64-bit unsigned integer (leading `-` rejected).
    Uint,
    /// IEEE 754 double.
    Double,
    /// UUID, canonical 8-4-4-4-12 form.
    Uuid,
    /// Even-length hex string encoding raw bytes.
    HexBlob,
}

impl Default for SqlValueType {
    fn default() -> Self {
        Self::String
    }
}

impl SqlValueType {
    /// Human description used in type-error messages.
    pub const fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Int => "64bit signed integer",
            Self::Uint => "64bit unsigned integer",
            Self::Double => "a double",
            Self::Uuid => "an uuid",
            Self::HexBlob => "hexblob",
        }
    }

    /// Parse `value` into a bind parameter of this kind.
    ///
    /// `suffix` supports LIKE patterns: for `String` it is concatenated onto
    /// the text, for `HexBlob` it is appended as raw text *after* the decoded
    /// bytes. Every other kind rejects a non-empty suffix, since appending
    /// `/%` to a number is never meaningful.
    ///
    /// `field_name` and `pattern` only feed the error message.
    pub fn encode(
        self,
        field_name: &str,
        value: &str,
        suffix: &str,
        pattern: &str,
    ) -> Result<SqlParam> {
        let type_error = || DictError::ValueType {
            field: field_name.to_owned(),
            expected: self.describe(),
            value: format!("{value}{suffix}"),
            pattern: pattern.to_owned(),
        };
        match self {
            Self::String => {
                if suffix.is_empty() {
                    Ok(SqlParam::Text(value.to_owned()))
                } else {
                    Ok(SqlParam::Text(format!("{value}{suffix}")))
                }
            }
            Self::Int => {
                if !suffix.is_empty() {
                    return Err(type_error());
                }
                value
                    .parse::<i64>()
                    .map(SqlParam::Int64)
                    .map_err(|_| type_error())
            }
            Self::Uint => {
                if !suffix.is_empty() || value.starts_with('-') {
                    return Err(type_error());
                }
                value
                    .parse::<i64>()
                    .map(SqlParam::Int64)
                    .map_err(|_| type_error())
            }
            Self::Double => {
                if !suffix.is_empty() {
                    return Err(type_error());
                }
                value
                    .parse::<f64>()
                    .map(SqlParam::Double)
                    .map_err(|_| type_error())
            }
            Self::Uuid => {
                if !suffix.is_empty() {
                    return Err(type_error());
                }
                Uuid::try_parse(value)
                    .map(SqlParam::Uuid)
                    .map_err(|_| type_error())
            }
            Self::HexBlob => {
                let Some(mut bytes) = hex_to_bytes(value) else {
                    return Err(DictError::ValueType {
                        field: field_name.to_owned(),
                        expected: self.describe(),
                        value: value.to_owned(),
                        pattern: pattern.to_owned(),
                    });
                };
                bytes.extend_from_slice(suffix.as_bytes());
                Ok(SqlParam::Bytes(bytes))
            }
        }
    }

    /// Render a raw result column of this kind back into a string.
    ///
    /// SQL NULL renders as the empty string. UUIDs are re-emitted in
    /// canonical lowercase hyphenated form regardless of how the backend
    /// stored them; an unparsable UUID column is passed through unchanged.
    pub fn decode(self, raw: &RawValue) -> String {
        match self {
            Self::String | Self::Int | Self::Uint | Self::Double => match raw {
                RawValue::Null => String::new(),
                RawValue::Text(s) => s.clone(),
                RawValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            },
            Self::Uuid => match raw {
                RawValue::Null => String::new(),
                RawValue::Text(s) => match Uuid::try_parse(s) {
                    Ok(uuid) => uuid.as_hyphenated().to_string(),
                    Err(_) => s.clone(),
                },
                RawValue::Bytes(b) => match Uuid::from_slice(b) {
                    Ok(uuid) => uuid.as_hyphenated().to_string(),
                    Err(_) => bytes_to_hex(b),
                },
            },
            Self::HexBlob => match raw {
                RawValue::Null => String::new(),
                RawValue::Text(s) => bytes_to_hex(s.as_bytes()),
                RawValue::Bytes(b) => bytes_to_hex(b),
            },
        }
    }
}

impl fmt::Display for SqlValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Double => "double",
            Self::Uuid => "uuid",
            Self::HexBlob => "hexblob",
        };
        f.write_str(name)
    }
}

/// A typed parameter bound into a statement by column index.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    /// Text parameter.
    Text(String),
    /// 64-bit signed integer parameter (also carries `Uint` values).
    Int64(i64),
    /// Double parameter.
    Double(f64),
    /// UUID parameter (16 raw bytes on the wire).
    Uuid(Uuid),
    /// Binary parameter.
    Bytes(Vec<u8>),
}

/// A raw column value as produced by the SQL driver.
///
/// Drivers are free to surface a column as text or bytes; the value codec
/// accepts either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawValue {
    /// SQL NULL.
    Null,
    /// Text column data.
    Text(String),
    /// Binary column data.
    Bytes(Vec<u8>),
}

impl RawValue {
    /// Returns true if this is SQL NULL.
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// View the value as text, if it is textual.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Decode an even-length hex string into bytes.
///
/// Returns `None` on odd length or a non-hex digit.
pub fn hex_to_bytes(hex: &str) -> Option<Vec<u8>> {
    let hex = hex.as_bytes();
    if hex.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    for pair in hex.chunks_exact(2) {
        let hi = (pair[0] as char).to_digit(16)?;
        let lo = (pair[1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
    }
    Some(out)
}

/// Encode bytes as lowercase hex.
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_encode_concatenates_suffix() {
        let p = SqlValueType::String
            .encode("k", "alice", "/%", "shared/q/$")
            .expect("string with suffix should encode");
        assert_eq!(p, SqlParam::Text("alice/%".to_owned()));
    }

    #[test]
    fn int_encode_accepts_both_signs() {
        assert_eq!(
            SqlValueType::Int
                .encode("k", "-17", "", "p")
                .expect("negative int"),
            SqlParam::Int64(-17)
        );
        assert_eq!(
            SqlValueType::Int
                .encode("k", "17", "", "p")
                .expect("positive int"),
            SqlParam::Int64(17)
        );
    }

    #[test]
    fn int_encode_rejects_suffix() {
        let err = SqlValueType::Int
            .encode("quota", "5", "/%", "shared/q/$")
            .expect_err("int with suffix must fail");
        assert!(matches!(err, DictError::ValueType { .. }));
        assert_eq!(
            err.to_string(),
            "quota field's value isn't 64bit signed integer: 5/% (in pattern: shared/q/$)"
        );
    }

    #[test]
    fn uint_encode_rejects_leading_minus() {
        assert!(SqlValueType::Uint.encode("k", "-1", "", "p").is_err());
        assert_eq!(
            SqlValueType::Uint.encode("k", "42", "", "p").expect("uint"),
            SqlParam::Int64(42)
        );
    }

    #[test]
    fn double_encode() {
        assert_eq!(
            SqlValueType::Double
                .encode("k", "1.5", "", "p")
                .expect("double"),
            SqlParam::Double(1.5)
        );
        assert!(SqlValueType::Double.encode("k", "x", "", "p").is_err());
        assert!(SqlValueType::Double.encode("k", "1.5", "/%", "p").is_err());
    }

    #[test]
    fn uuid_encode_and_canonical_decode() {
        let p = SqlValueType::Uuid
            .encode("k", "6F2A7B40-93C1-4E0B-8D11-C2B5E0F7A912", "", "p")
            .expect("uuid should parse");
        let SqlParam::Uuid(u) = p else {
            panic!("expected uuid param");
        };
        // decode yields canonical lowercase no matter the input casing
        let decoded = SqlValueType::Uuid.decode(&RawValue::Text(
            "6F2A7B40-93C1-4E0B-8D11-C2B5E0F7A912".to_owned(),
        ));
        assert_eq!(decoded, u.as_hyphenated().to_string());
        assert_eq!(decoded, "6f2a7b40-93c1-4e0b-8d11-c2b5e0f7a912");
    }

    #[test]
    fn uuid_decode_from_raw_bytes() {
        let u = Uuid::try_parse("6f2a7b40-93c1-4e0b-8d11-c2b5e0f7a912").expect("uuid");
        let decoded = SqlValueType::Uuid.decode(&RawValue::Bytes(u.as_bytes().to_vec()));
        assert_eq!(decoded, "6f2a7b40-93c1-4e0b-8d11-c2b5e0f7a912");
    }

    #[test]
    fn hexblob_round_trip_lowercase() {
        let p = SqlValueType::HexBlob
            .encode("k", "DEADbeef", "", "p")
            .expect("hexblob");
        let SqlParam::Bytes(bytes) = p else {
            panic!("expected bytes param");
        };
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            SqlValueType::HexBlob.decode(&RawValue::Bytes(bytes)),
            "deadbeef"
        );
    }

    #[test]
    fn hexblob_suffix_appended_after_decoded_bytes() {
        let p = SqlValueType::HexBlob
            .encode("k", "cafe", "/%", "p")
            .expect("hexblob with suffix");
        let SqlParam::Bytes(bytes) = p else {
            panic!("expected bytes param");
        };
        assert_eq!(bytes, [&[0xca_u8, 0xfe_u8][..], b"/%"].concat());
    }

    #[test]
    fn hexblob_rejects_odd_length_and_non_hex() {
        assert!(SqlValueType::HexBlob.encode("k", "abc", "", "p").is_err());
        assert!(SqlValueType::HexBlob.encode("k", "zz", "", "p").is_err());
    }

    #[test]
    fn null_decodes_as_empty_string() {
        for ty in [
            SqlValueType::String,
            SqlValueType::Int,
            SqlValueType::Uuid,
            SqlValueType::HexBlob,
        ] {
            assert_eq!(ty.decode(&RawValue::Null), "");
        }
    }

    #[test]
    fn hex_helpers() {
        assert_eq!(hex_to_bytes("00ff10"), Some(vec![0x00, 0xff, 0x10]));
        assert_eq!(hex_to_bytes(""), Some(vec![]));
        assert_eq!(hex_to_bytes("0"), None);
        assert_eq!(hex_to_bytes("0g"), None);
        assert_eq!(bytes_to_hex(&[0x00, 0xff, 0x10]), "00ff10");
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest::proptest! {
            #[test]
            fn hex_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
                let hex = bytes_to_hex(&bytes);
                prop_assert_eq!(hex_to_bytes(&hex).expect("generated hex is valid"), bytes);
            }

            #[test]
            fn hexblob_encode_normalises_case(bytes in proptest::collection::vec(any::<u8>(), 0..32)) {
                let upper = bytes_to_hex(&bytes).to_uppercase();
                let p = SqlValueType::HexBlob.encode("k", &upper, "", "p").expect("hex");
                let SqlParam::Bytes(decoded) = p else { panic!("expected bytes") };
                prop_assert_eq!(
                    SqlValueType::HexBlob.decode(&RawValue::Bytes(decoded)),
                    upper.to_lowercase()
                );
            }

            #[test]
            fn int_round_trip(n in any::<i64>()) {
                let p = SqlValueType::Int.encode("k", &n.to_string(), "", "p").expect("int");
                prop_assert_eq!(p, SqlParam::Int64(n));
            }
        }
    }
}
