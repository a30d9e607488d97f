//! Value Codec Module
//!
//! Encodes values for the backing store and decodes them back, reporting
//! unreadable entries as an explicit branch instead of an error.

use std::fmt;
use std::str::FromStr;

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{CacheError, Result};

// == Codec ==
/// Wire format of stored values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    /// Human-inspectable JSON
    #[default]
    Json,
    /// Compact MessagePack, for deployments that never inspect raw entries
    MessagePack,
}

// == Decoded ==
/// Outcome of reading a stored entry.
#[derive(Debug, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    /// Bytes that no longer parse as the requested type; the caller evicts them
    Corrupt(String),
}

impl Codec {
    // == Encode ==
    /// Serializes a value for storage.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::Json => {
                serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
            }
            Codec::MessagePack => rmp_serde::to_vec_named(value)
                .map_err(|e| CacheError::Serialization(e.to_string())),
        }
    }

    // == Decode ==
    /// Deserializes stored bytes.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Decoded<T> {
        let result = match self {
            Codec::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
            Codec::MessagePack => rmp_serde::from_slice(bytes).map_err(|e| e.to_string()),
        };
        match result {
            Ok(value) => Decoded::Value(value),
            Err(reason) => Decoded::Corrupt(reason),
        }
    }

    /// Whether the value serializes to nothing worth caching (`null`/`None`).
    pub fn is_null<T: Serialize + ?Sized>(value: &T) -> bool {
        matches!(serde_json::to_value(value), Ok(serde_json::Value::Null))
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Codec::Json),
            "msgpack" | "messagepack" => Ok(Codec::MessagePack),
            other => Err(format!("unknown codec '{}'", other)),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Json => write!(f, "json"),
            Codec::MessagePack => write!(f, "msgpack"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Page {
        slug: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    }

    #[test]
    fn test_json_omits_null_fields() {
        let page = Page {
            slug: "about".to_string(),
            title: None,
        };
        let bytes = Codec::Json.encode(&page).unwrap();
        assert_eq!(bytes, br#"{"slug":"about"}"#);
    }

    #[test]
    fn test_msgpack_decodes_what_it_encodes() {
        let page = Page {
            slug: "home".to_string(),
            title: Some("Home".to_string()),
        };
        let bytes = Codec::MessagePack.encode(&page).unwrap();
        assert_eq!(Codec::MessagePack.decode::<Page>(&bytes), Decoded::Value(page));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let decoded = Codec::Json.decode::<Page>(b"{not json");
        assert!(matches!(decoded, Decoded::Corrupt(_)));
    }

    #[test]
    fn test_shape_mismatch_is_corrupt() {
        let decoded = Codec::Json.decode::<Page>(br#"{"title":"missing slug"}"#);
        assert!(matches!(decoded, Decoded::Corrupt(_)));
    }

    #[test]
    fn test_is_null() {
        assert!(Codec::is_null(&None::<u32>));
        assert!(Codec::is_null(&()));
        assert!(!Codec::is_null(&Some(0)));
        assert!(!Codec::is_null(""));
    }

    #[test]
    fn test_parse_codec() {
        assert_eq!("JSON".parse::<Codec>(), Ok(Codec::Json));
        assert_eq!("msgpack".parse::<Codec>(), Ok(Codec::MessagePack));
        assert!("xml".parse::<Codec>().is_err());
    }
}
