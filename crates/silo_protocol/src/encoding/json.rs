//! JSON base encoding: rows serialized as a JSON array of arrays.

use std::io::{Read, Write};

use serde_json::Value;

use crate::attributes::{DataAttribute, DataAttributes};
use crate::encoding::{
    QueryDataDecoder, QueryDataDecoderFactory, QueryDataEncoder, QueryDataEncoderFactory, Rows,
};
use crate::error::ProtocolError;
use crate::page::Page;
use crate::session::Session;

/// Base encoding id for the JSON array-of-arrays format.
pub const JSON_ENCODING_ID: &str = "json";

/// Counts bytes as they pass through to the underlying writer.
struct CountingWriter<'a> {
    inner: &'a mut dyn Write,
    count: u64,
}

impl Write for CountingWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Encodes the output channels of each page as JSON rows.
pub struct JsonQueryDataEncoder {
    output_columns: usize,
}

impl JsonQueryDataEncoder {
    pub fn new(output_columns: usize) -> Self {
        Self { output_columns }
    }
}

impl QueryDataEncoder for JsonQueryDataEncoder {
    fn encoding_id(&self) -> String {
        JSON_ENCODING_ID.to_string()
    }

    fn encode_to(
        &self,
        output: &mut dyn Write,
        pages: &[Page],
    ) -> Result<DataAttributes, ProtocolError> {
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for page in pages {
            rows.extend(page.rows(self.output_columns));
        }

        let mut counting = CountingWriter {
            inner: output,
            count: 0,
        };
        serde_json::to_writer(&mut counting, &rows)
            .map_err(|e| std::io::Error::other(format!("could not serialize to JSON: {e}")))?;
        counting.flush()?;

        Ok(DataAttributes::builder()
            .set_i64(DataAttribute::ByteSize, counting.count as i64)
            .build())
    }
}

/// Decodes a JSON array-of-arrays payload back into rows.
pub struct JsonQueryDataDecoder;

impl QueryDataDecoder for JsonQueryDataDecoder {
    fn encoding_id(&self) -> String {
        JSON_ENCODING_ID.to_string()
    }

    fn decode(
        &self,
        input: &mut dyn Read,
        _attributes: &DataAttributes,
    ) -> Result<Rows, ProtocolError> {
        let rows: Vec<Vec<Value>> = serde_json::from_reader(input)
            .map_err(|e| ProtocolError::Corruption(format!("malformed JSON payload: {e}")))?;
        Ok(Rows::new(rows))
    }
}

/// Factory for the plain `json` encoder.
pub struct JsonQueryDataEncoderFactory;

impl QueryDataEncoderFactory for JsonQueryDataEncoderFactory {
    fn encoding_id(&self) -> String {
        JSON_ENCODING_ID.to_string()
    }

    fn create(&self, _session: &Session, output_columns: usize) -> Box<dyn QueryDataEncoder> {
        Box::new(JsonQueryDataEncoder { output_columns })
    }
}

/// Factory for the plain `json` decoder.
pub struct JsonQueryDataDecoderFactory;

impl QueryDataDecoderFactory for JsonQueryDataDecoderFactory {
    fn encoding_id(&self) -> String {
        JSON_ENCODING_ID.to_string()
    }

    fn create(
        &self,
        _query_attributes: &DataAttributes,
    ) -> Result<Box<dyn QueryDataDecoder>, ProtocolError> {
        Ok(Box::new(JsonQueryDataDecoder))
    }
}
