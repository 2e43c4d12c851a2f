//! Compression stages wrapping a base encoder/decoder pair.
//!
//! A compression variant wraps the byte stream on both sides and suffixes
//! the encoding id (`json` -> `json+zstd`), leaving the base format and the
//! encryption stage untouched.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::attributes::DataAttributes;
use crate::encoding::{
    QueryDataDecoder, QueryDataDecoderFactory, QueryDataEncoder, QueryDataEncoderFactory, Rows,
};
use crate::error::ProtocolError;
use crate::page::Page;
use crate::session::Session;

/// Supported compression codecs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Zstd,
    Lz4,
    Snappy,
}

impl Compression {
    /// Encoding id suffix appended after `+`.
    pub fn suffix(&self) -> &'static str {
        match self {
            Compression::Zstd => "zstd",
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "zstd" => Some(Compression::Zstd),
            "lz4" => Some(Compression::Lz4),
            "snappy" => Some(Compression::Snappy),
            _ => None,
        }
    }
}

/// Encoder stage that compresses the delegate's output stream.
pub struct CompressedQueryDataEncoder {
    delegate: Box<dyn QueryDataEncoder>,
    compression: Compression,
}

impl CompressedQueryDataEncoder {
    pub fn new(delegate: Box<dyn QueryDataEncoder>, compression: Compression) -> Self {
        Self {
            delegate,
            compression,
        }
    }
}

impl QueryDataEncoder for CompressedQueryDataEncoder {
    fn encoding_id(&self) -> String {
        format!(
            "{}+{}",
            self.delegate.encoding_id(),
            self.compression.suffix()
        )
    }

    fn attributes(&self) -> DataAttributes {
        self.delegate.attributes()
    }

    fn encode_to(
        &self,
        output: &mut dyn Write,
        pages: &[Page],
    ) -> Result<DataAttributes, ProtocolError> {
        match self.compression {
            Compression::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(output, 0)?;
                let attributes = self.delegate.encode_to(&mut encoder, pages)?;
                encoder.finish()?;
                Ok(attributes)
            }
            Compression::Lz4 => {
                let mut encoder = lz4_flex::frame::FrameEncoder::new(output);
                let attributes = self.delegate.encode_to(&mut encoder, pages)?;
                encoder
                    .finish()
                    .map_err(|e| std::io::Error::other(format!("lz4 finish failed: {e}")))?;
                Ok(attributes)
            }
            Compression::Snappy => {
                let mut encoder = snap::write::FrameEncoder::new(output);
                let attributes = self.delegate.encode_to(&mut encoder, pages)?;
                encoder.into_inner().map_err(|e| e.into_error())?;
                Ok(attributes)
            }
        }
    }
}

/// Decoder stage that decompresses the stream before the delegate sees it.
pub struct CompressedQueryDataDecoder {
    delegate: Box<dyn QueryDataDecoder>,
    compression: Compression,
}

impl CompressedQueryDataDecoder {
    pub fn new(delegate: Box<dyn QueryDataDecoder>, compression: Compression) -> Self {
        Self {
            delegate,
            compression,
        }
    }
}

impl QueryDataDecoder for CompressedQueryDataDecoder {
    fn encoding_id(&self) -> String {
        format!(
            "{}+{}",
            self.delegate.encoding_id(),
            self.compression.suffix()
        )
    }

    fn decode(
        &self,
        input: &mut dyn Read,
        attributes: &DataAttributes,
    ) -> Result<Rows, ProtocolError> {
        match self.compression {
            Compression::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(input)
                    .map_err(|e| ProtocolError::Corruption(format!("malformed zstd frame: {e}")))?;
                self.delegate.decode(&mut decoder, attributes)
            }
            Compression::Lz4 => {
                let mut decoder = lz4_flex::frame::FrameDecoder::new(input);
                self.delegate.decode(&mut decoder, attributes)
            }
            Compression::Snappy => {
                let mut decoder = snap::read::FrameDecoder::new(input);
                self.delegate.decode(&mut decoder, attributes)
            }
        }
    }
}

/// Factory producing compressed variants of a base encoder factory.
pub struct CompressedQueryDataEncoderFactory {
    delegate: Arc<dyn QueryDataEncoderFactory>,
    compression: Compression,
}

impl CompressedQueryDataEncoderFactory {
    pub fn new(delegate: Arc<dyn QueryDataEncoderFactory>, compression: Compression) -> Self {
        Self {
            delegate,
            compression,
        }
    }
}

impl QueryDataEncoderFactory for CompressedQueryDataEncoderFactory {
    fn encoding_id(&self) -> String {
        format!("{}+{}", self.delegate.encoding_id(), self.compression.suffix())
    }

    fn create(&self, session: &Session, output_columns: usize) -> Box<dyn QueryDataEncoder> {
        Box::new(CompressedQueryDataEncoder::new(
            self.delegate.create(session, output_columns),
            self.compression,
        ))
    }
}

/// Factory producing compressed variants of a base decoder factory.
pub struct CompressedQueryDataDecoderFactory {
    delegate: Arc<dyn QueryDataDecoderFactory>,
    compression: Compression,
}

impl CompressedQueryDataDecoderFactory {
    pub fn new(delegate: Arc<dyn QueryDataDecoderFactory>, compression: Compression) -> Self {
        Self {
            delegate,
            compression,
        }
    }
}

impl QueryDataDecoderFactory for CompressedQueryDataDecoderFactory {
    fn encoding_id(&self) -> String {
        format!("{}+{}", self.delegate.encoding_id(), self.compression.suffix())
    }

    fn create(
        &self,
        query_attributes: &DataAttributes,
    ) -> Result<Box<dyn QueryDataDecoder>, ProtocolError> {
        Ok(Box::new(CompressedQueryDataDecoder::new(
            self.delegate.create(query_attributes)?,
            self.compression,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::json::{JsonQueryDataDecoder, JsonQueryDataEncoder, JSON_ENCODING_ID};
    use serde_json::json;

    fn round_trip(compression: Compression) {
        let pages = vec![Page::from_rows(&[
            vec![json!(1), json!("alpha")],
            vec![json!(2), json!("beta")],
        ])];
        let encoder = CompressedQueryDataEncoder::new(
            Box::new(JsonQueryDataEncoder::new(2)),
            compression,
        );
        assert_eq!(
            encoder.encoding_id(),
            format!("{JSON_ENCODING_ID}+{}", compression.suffix())
        );

        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages).unwrap();

        let decoder =
            CompressedQueryDataDecoder::new(Box::new(JsonQueryDataDecoder), compression);
        let rows = decoder
            .decode(&mut buf.as_slice(), &DataAttributes::empty())
            .unwrap()
            .into_vec();
        assert_eq!(
            rows,
            vec![vec![json!(1), json!("alpha")], vec![json!(2), json!("beta")]]
        );
    }

    #[test]
    fn zstd_round_trip() {
        round_trip(Compression::Zstd);
    }

    #[test]
    fn lz4_round_trip() {
        round_trip(Compression::Lz4);
    }

    #[test]
    fn snappy_round_trip() {
        round_trip(Compression::Snappy);
    }

    #[test]
    fn compressed_bytes_fail_plain_decoder() {
        let pages = vec![Page::from_rows(&[vec![json!(1)]])];
        let encoder = CompressedQueryDataEncoder::new(
            Box::new(JsonQueryDataEncoder::new(1)),
            Compression::Zstd,
        );
        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages).unwrap();

        // Skipping the decompression stage must surface a corruption error.
        let err = JsonQueryDataDecoder
            .decode(&mut buf.as_slice(), &DataAttributes::empty())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Corruption(_)));
    }

    #[test]
    fn truncated_frame_fails() {
        let pages = vec![Page::from_rows(&[vec![json!("payload payload payload")]])];
        let encoder = CompressedQueryDataEncoder::new(
            Box::new(JsonQueryDataEncoder::new(1)),
            Compression::Lz4,
        );
        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages).unwrap();
        buf.truncate(buf.len() / 2);

        let decoder =
            CompressedQueryDataDecoder::new(Box::new(JsonQueryDataDecoder), Compression::Lz4);
        let err = decoder
            .decode(&mut buf.as_slice(), &DataAttributes::empty())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Corruption(_)));
    }
}
