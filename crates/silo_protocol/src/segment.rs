//! Segment variants and the encoded query-data envelope.

use serde_json::Value;

use crate::attributes::{DataAttribute, DataAttributes};

/// One unit of query-result data handed to the client.
///
/// Created once by the producer and immutable thereafter. Spooled segments
/// are consumed exactly once: read, then acknowledged. Inlined segments need
/// no acknowledgment.
#[derive(Clone, Debug, PartialEq)]
pub enum Segment {
    /// Encoded bytes embedded directly in the response.
    Inlined {
        data: Vec<u8>,
        attributes: DataAttributes,
    },
    /// Pointer at externally stored bytes, dereferenced by URI.
    Spooled {
        uri: String,
        attributes: DataAttributes,
    },
}

impl Segment {
    pub fn inlined(data: Vec<u8>, attributes: DataAttributes) -> Self {
        Segment::Inlined { data, attributes }
    }

    pub fn spooled(uri: impl Into<String>, attributes: DataAttributes) -> Self {
        Segment::Spooled {
            uri: uri.into(),
            attributes,
        }
    }

    pub fn attributes(&self) -> &DataAttributes {
        match self {
            Segment::Inlined { attributes, .. } => attributes,
            Segment::Spooled { attributes, .. } => attributes,
        }
    }

    /// Cumulative row offset assigned by the producer.
    pub fn row_offset(&self) -> Option<i64> {
        self.attributes().get_opt_i64(DataAttribute::RowOffset)
    }
}

/// Encoded response envelope: encoding id, once-only global attributes, and
/// the ordered segment list.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedQueryData {
    pub encoding: String,
    pub attributes: DataAttributes,
    pub segments: Vec<Segment>,
}

impl EncodedQueryData {
    pub fn builder(encoding: impl Into<String>) -> EncodedQueryDataBuilder {
        EncodedQueryDataBuilder {
            encoding: encoding.into(),
            attributes: DataAttributes::empty(),
            segments: Vec::new(),
        }
    }
}

/// Builder used by the producer while walking result pages.
#[derive(Debug)]
pub struct EncodedQueryDataBuilder {
    encoding: String,
    attributes: DataAttributes,
    segments: Vec<Segment>,
}

impl EncodedQueryDataBuilder {
    /// Attach the response-level attributes (emitted for the first segment
    /// only).
    pub fn with_attributes(mut self, attributes: DataAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn add_segment(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn build(self) -> EncodedQueryData {
        EncodedQueryData {
            encoding: self.encoding,
            attributes: self.attributes,
            segments: self.segments,
        }
    }
}

/// Query response payload: raw rows when spooling is not configured,
/// otherwise the encoded segment envelope.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryData {
    Raw(Vec<Vec<Value>>),
    Encoded(EncodedQueryData),
}
