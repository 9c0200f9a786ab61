//! Version tags for stored payloads.

use crate::version::{Version, MAX_VERSION_LEN};

/// Magic byte identifying a version-tagged payload.
pub const MAGIC_BYTE: u8 = 0xCF;

/// Smallest possible envelope: magic, length and a one-byte version.
pub const MIN_ENVELOPE_SIZE: usize = 3;

/// A stored payload tagged with the schema version it was written at.
///
/// Binary format:
/// ```text
/// [MAGIC: 0xCF][VERSION_LEN: u8][VERSION: N bytes UTF-8][PAYLOAD: M bytes]
/// ```
///
/// The payload bytes are opaque to the envelope; the domain that owns the
/// record decides how they are encoded.
///
/// # Example
///
/// ```
/// use verchain::{Version, VersionedEnvelope};
///
/// let version = Version::new("20200923").unwrap();
/// let envelope = VersionedEnvelope::new(version.clone(), b"payload".to_vec());
///
/// let bytes = envelope.to_bytes();
/// assert_eq!(VersionedEnvelope::peek_version(&bytes).unwrap(), version);
/// assert_eq!(VersionedEnvelope::from_bytes(&bytes).unwrap(), envelope);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEnvelope {
    /// Schema version of the payload.
    pub version: Version,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// Error parsing a version envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    /// Data is too short to contain the declared header.
    #[error("data too short for version envelope")]
    TooShort,
    /// Missing or incorrect magic byte.
    #[error("invalid magic byte: 0x{0:02X}, expected 0xCF")]
    InvalidMagic(u8),
    /// The version bytes are not a valid version label.
    #[error("invalid version tag: {0}")]
    InvalidVersion(String),
}

impl VersionedEnvelope {
    /// Create a new envelope.
    pub fn new(version: Version, payload: Vec<u8>) -> Self {
        Self { version, payload }
    }

    /// Serialize the envelope to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let tag = self.version.as_str().as_bytes();
        debug_assert!(tag.len() <= MAX_VERSION_LEN);
        let mut bytes = Vec::with_capacity(2 + tag.len() + self.payload.len());
        bytes.push(MAGIC_BYTE);
        bytes.push(tag.len() as u8);
        bytes.extend_from_slice(tag);
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse an envelope from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, EnvelopeError> {
        let (version, header_len) = Self::read_header(data)?;
        Ok(Self {
            version,
            payload: data[header_len..].to_vec(),
        })
    }

    /// Read the version without copying the payload.
    pub fn peek_version(data: &[u8]) -> Result<Version, EnvelopeError> {
        Self::read_header(data).map(|(version, _)| version)
    }

    /// Check if bytes look like a versioned envelope (starts with magic byte).
    pub fn is_versioned(data: &[u8]) -> bool {
        data.first() == Some(&MAGIC_BYTE)
    }

    fn read_header(data: &[u8]) -> Result<(Version, usize), EnvelopeError> {
        if data.len() < MIN_ENVELOPE_SIZE {
            return Err(EnvelopeError::TooShort);
        }
        if data[0] != MAGIC_BYTE {
            return Err(EnvelopeError::InvalidMagic(data[0]));
        }
        let header_len = 2 + data[1] as usize;
        let tag = data.get(2..header_len).ok_or(EnvelopeError::TooShort)?;
        let label =
            core::str::from_utf8(tag).map_err(|e| EnvelopeError::InvalidVersion(e.to_string()))?;
        let version =
            Version::new(label).map_err(|e| EnvelopeError::InvalidVersion(e.to_string()))?;
        Ok((version, header_len))
    }
}
