//! Structural shape signatures
//!
//! Providers share a prompt cache only across requests whose shape prefix
//! is byte-identical. A [`ShapeSignature`] is the explicit, caller-supplied
//! fingerprint of the output shape a branch will request, so that fork
//! execution can detect branches that would silently miss the cache.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Errors building a signature
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// Schema could not be encoded for hashing
    #[error("schema serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Blake3 digest of a structural descriptor plus a readable label
///
/// Two signatures are equal iff their digests are equal; the label is
/// only used in diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeSignature {
    #[serde(with = "digest_hex")]
    digest: [u8; 32],
    label: String,
}

impl ShapeSignature {
    /// Signature of a free-form structural descriptor
    ///
    /// The descriptor is hashed verbatim; callers are responsible for
    /// producing a canonical form.
    #[must_use]
    pub fn from_descriptor(descriptor: &str) -> Self {
        Self {
            digest: *blake3::hash(descriptor.as_bytes()).as_bytes(),
            label: descriptor.to_string(),
        }
    }

    /// Signature of a type's JSON schema
    ///
    /// # Errors
    /// Returns error if the generated schema cannot be serialized
    pub fn of<T: JsonSchema>() -> Result<Self, SignatureError> {
        let schema = schemars::schema_for!(T);
        let encoded = serde_json::to_vec(&schema)?;
        Ok(Self {
            digest: *blake3::hash(&encoded).as_bytes(),
            label: T::schema_name(),
        })
    }

    /// Override the diagnostic label
    #[inline]
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Diagnostic label
    #[inline]
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Raw digest bytes
    #[inline]
    #[must_use]
    pub const fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.digest[..8])
    }
}

impl PartialEq for ShapeSignature {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for ShapeSignature {}

impl std::hash::Hash for ShapeSignature {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl Display for ShapeSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.short())
    }
}

mod digest_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(digest: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(digest))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
            serde::de::Error::invalid_length(bytes.len(), &"32 bytes of hex-encoded digest")
        })
    }
}
