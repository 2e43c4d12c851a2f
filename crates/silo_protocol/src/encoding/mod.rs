//! Composable segment encoding pipeline.
//!
//! An encoding id names a base serialization format with an optional
//! compression suffix, e.g. `json` or `json+zstd`. Encoders and decoders are
//! layered wrappers with symmetric contracts: encryption wraps compression
//! wraps the base format, and decode inverts the layers exactly. Each stage
//! only sees a byte stream, so any format/compression/encryption combination
//! works without bespoke glue.

pub mod compression;
pub mod encryption;
pub mod json;
pub mod registry;

use std::io::{Read, Write};

use serde_json::Value;

use crate::attributes::DataAttributes;
use crate::error::ProtocolError;
use crate::page::Page;
use crate::session::Session;

pub use compression::Compression;
pub use registry::DecoderRegistry;

/// Finite, non-restartable sequence of decoded rows.
#[derive(Debug)]
pub struct Rows {
    inner: std::vec::IntoIter<Vec<Value>>,
}

impl Rows {
    pub(crate) fn new(rows: Vec<Vec<Value>>) -> Self {
        Self {
            inner: rows.into_iter(),
        }
    }

    pub fn into_vec(self) -> Vec<Vec<Value>> {
        self.inner.collect()
    }
}

impl Iterator for Rows {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        self.inner.next()
    }
}

/// Server-side segment encoder for one query response.
pub trait QueryDataEncoder: Send + Sync {
    /// Encoding id recorded on the response envelope.
    fn encoding_id(&self) -> String;

    /// Response-level attributes, attached to the first segment only.
    fn attributes(&self) -> DataAttributes {
        DataAttributes::empty()
    }

    /// Encode pages into `output` and return the per-segment attributes.
    /// Writes are flush-complete before returning.
    fn encode_to(
        &self,
        output: &mut dyn Write,
        pages: &[Page],
    ) -> Result<DataAttributes, ProtocolError>;
}

/// Creates encoders bound to a query session.
pub trait QueryDataEncoderFactory: Send + Sync {
    fn encoding_id(&self) -> String;

    fn create(&self, session: &Session, output_columns: usize) -> Box<dyn QueryDataEncoder>;
}

/// Client-side segment decoder.
pub trait QueryDataDecoder: Send + Sync {
    fn encoding_id(&self) -> String;

    /// Decode one segment's payload. Consumes the entire stream exactly
    /// once; the result is finite and non-restartable.
    fn decode(
        &self,
        input: &mut dyn Read,
        attributes: &DataAttributes,
    ) -> Result<Rows, ProtocolError>;
}

/// Creates decoders from the response-level attributes.
pub trait QueryDataDecoderFactory: Send + Sync {
    fn encoding_id(&self) -> String;

    fn create(
        &self,
        query_attributes: &DataAttributes,
    ) -> Result<Box<dyn QueryDataDecoder>, ProtocolError>;
}

/// Split an encoding id into its base format and optional compression
/// suffix. Ids are case-sensitive.
pub fn split_encoding_id(encoding_id: &str) -> (&str, Option<&str>) {
    match encoding_id.split_once('+') {
        Some((base, compression)) => (base, Some(compression)),
        None => (encoding_id, None),
    }
}
