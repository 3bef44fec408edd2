//! Strong type definitions for the Lix engine.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::CoreError;

/// A 32-byte change identifier, computed as Blake3(domain || canonical content).
///
/// This is the content-address of a change. Two changes with the same
/// content (and lineage) have the same ChangeId.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeId(pub [u8; 32]);

impl ChangeId {
    /// Create a new ChangeId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, CoreError> {
        let bytes = hex::decode(s).map_err(|e| CoreError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidHex("expected 32 bytes".into()))?;
        Ok(Self(arr))
    }

    /// The zero change ID (used as a sentinel).
    pub const ZERO: Self = Self([0u8; 32]);
}

impl fmt::Debug for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ChangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ChangeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for ChangeId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for ChangeId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

// Ids travel as hex strings in every encoding (JSON bodies and container blobs).
impl Serialize for ChangeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ChangeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ChangeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable logical identity of a tracked entity (a row, a header).
    ///
    /// Derived from file content alone, never from position.
    EntityId
);

string_id!(
    /// Stable identifier of a file inside a Lix.
    FileId
);

string_id!(
    /// Identifier of a Lix container, stored under the `lix-id` key.
    LixId
);

impl FileId {
    /// Generate a random file ID.
    pub fn random() -> Self {
        Self(random_hex())
    }
}

impl LixId {
    /// Generate a random Lix ID.
    pub fn random() -> Self {
        Self(random_hex())
    }
}

fn random_hex() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Identifies the schema governing a change snapshot.
///
/// Well-formed keys look like `<name>_v<version>`, e.g. `csv_row_v1`.
/// Deserialization does not enforce the form so that foreign keys can be
/// carried through and rejected (or passed through) by validation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaKey(String);

impl SchemaKey {
    /// Parse a schema key, rejecting malformed input.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let key = Self(value.into());
        if key.is_well_formed() {
            Ok(key)
        } else {
            Err(CoreError::InvalidSchemaKey(key.0))
        }
    }

    /// Wrap a key without checking its form.
    ///
    /// For keys read back from storage or received from foreign plugins;
    /// validation decides what happens to them.
    pub fn new_unchecked(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check the `<name>_v<version>` form.
    pub fn is_well_formed(&self) -> bool {
        self.split().is_some()
    }

    /// The version suffix, if the key is well-formed.
    pub fn version(&self) -> Option<u32> {
        self.split().map(|(_, version)| version)
    }

    fn split(&self) -> Option<(&str, u32)> {
        let (name, version) = self.0.rsplit_once("_v")?;
        let name_ok = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_');
        let version_ok = !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit());
        if !name_ok || !version_ok {
            return None;
        }
        version.parse().ok().map(|v| (name, v))
    }
}

impl fmt::Debug for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SchemaKey({:?})", self.0)
    }
}

impl fmt::Display for SchemaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_id_hex_roundtrip() {
        let id = ChangeId::from_bytes([0x42; 32]);
        let recovered = ChangeId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_change_id_display() {
        let id = ChangeId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
    }

    #[test]
    fn test_change_id_rejects_short_hex() {
        assert!(ChangeId::from_hex("abcd").is_err());
        assert!(ChangeId::from_hex("zz").is_err());
    }

    #[test]
    fn test_change_id_serializes_as_hex() {
        let id = ChangeId::from_bytes([0x01; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "01".repeat(32)));
        let back: ChangeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_schema_key_forms() {
        assert!(SchemaKey::new("csv_row_v1").is_ok());
        assert_eq!(SchemaKey::new("csv_row_v12").unwrap().version(), Some(12));
        assert!(SchemaKey::new("csv_row").is_err());
        assert!(SchemaKey::new("_v1").is_err());
        assert!(SchemaKey::new("CSV_row_v1").is_err());
        assert!(SchemaKey::new("csv row_v1").is_err());
        assert!(SchemaKey::new("csv_row_vx").is_err());
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(FileId::random(), FileId::random());
        assert_eq!(LixId::random().as_str().len(), 32);
    }
}
