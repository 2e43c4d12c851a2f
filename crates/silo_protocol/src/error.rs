//! Error taxonomy for the spooling protocol.

use thiserror::Error;

/// Errors surfaced by the protocol data model and the codec pipeline.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A required attribute is absent from the attribute bag.
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),

    /// An attribute exists but holds a value of a different semantic type.
    #[error("attribute {0} has unexpected type")]
    AttributeType(&'static str),

    /// A serialized attribute fragment could not be parsed.
    #[error("malformed attribute fragment: {0}")]
    MalformedAttribute(String),

    /// A metadata page did not satisfy the spooling sentinel shape.
    #[error("{0}")]
    MalformedMetadataPage(&'static str),

    /// Lookup of an encoding id that was never registered.
    #[error("unknown encoding id: {0}")]
    UnknownEncoding(String),

    /// An encoding id was registered twice. Fatal at startup.
    #[error("encoding {0} already registered")]
    DuplicateEncoding(String),

    /// Compressed or serialized payload bytes are truncated or corrupt.
    #[error("corrupted segment data: {0}")]
    Corruption(String),

    /// Ciphertext failed to authenticate or decrypt.
    #[error("segment decryption failed")]
    Decryption,

    /// Encryption key material is malformed.
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
