//! Turns ordered result pages into the client-facing segment envelope.
//!
//! One producer lives for the whole query response. It owns the cumulative
//! row offset, stamps it on every segment, and emits the response-level
//! encoder attributes exactly once across all calls. Pages that were spooled
//! downstream arrive as sentinel metadata pages and pass through as spooled
//! segments; runs of ordinary pages are encoded and either inlined or
//! spooled here depending on size.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::bail;
use serde_json::Value;

use silo_protocol::encoding::{QueryDataEncoder, QueryDataEncoderFactory};
use silo_protocol::{
    DataAttribute, DataAttributes, EncodedQueryData, Page, QueryData, QueryResultRows, Segment,
    Session, SpooledBlock,
};

use crate::backend::SpoolingContext;
use crate::bridge::SpoolingManagerBridge;

/// Per-response producer of [`QueryData`].
pub struct QueryDataProducer {
    encoder_factory: Option<Arc<dyn QueryDataEncoderFactory>>,
    bridge: Arc<SpoolingManagerBridge>,
    current_offset: AtomicI64,
    metadata_written: AtomicBool,
}

impl QueryDataProducer {
    pub fn new(
        encoder_factory: Option<Arc<dyn QueryDataEncoderFactory>>,
        bridge: Arc<SpoolingManagerBridge>,
    ) -> Self {
        Self {
            encoder_factory,
            bridge,
            current_offset: AtomicI64::new(0),
            metadata_written: AtomicBool::new(false),
        }
    }

    /// Produce the next response payload from `rows`.
    ///
    /// Returns `None` when there is nothing to send or when production
    /// failed; failures are reported through `on_error` and never leave a
    /// partially built envelope behind.
    pub fn produce(
        &self,
        base_uri: &str,
        session: &Session,
        rows: QueryResultRows,
        on_error: &mut dyn FnMut(anyhow::Error),
    ) -> Option<QueryData> {
        if rows.is_empty() {
            return None;
        }
        let Some(factory) = &self.encoder_factory else {
            return Some(QueryData::Raw(flatten(&rows)));
        };
        match self.produce_encoded(factory.as_ref(), base_uri, session, &rows) {
            Ok(data) => Some(data),
            Err(error) => {
                on_error(error);
                None
            }
        }
    }

    fn produce_encoded(
        &self,
        factory: &dyn QueryDataEncoderFactory,
        base_uri: &str,
        session: &Session,
        rows: &QueryResultRows,
    ) -> anyhow::Result<QueryData> {
        let encoder = factory.create(session, rows.output_columns);
        let mut builder = EncodedQueryData::builder(encoder.encoding_id());
        // Response-level attributes ride on the first produced envelope only.
        if self
            .metadata_written
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            builder = builder.with_attributes(encoder.attributes());
        }

        let mut pending: Vec<Page> = Vec::new();
        for page in &rows.pages {
            if SpooledBlock::has_spooling_metadata(page, rows.output_columns) {
                if !pending.is_empty() {
                    let segment = self.encode_segment(
                        encoder.as_ref(),
                        session,
                        base_uri,
                        std::mem::take(&mut pending),
                    )?;
                    builder.add_segment(segment);
                }
                builder.add_segment(self.passthrough_segment(base_uri, page)?);
            } else if page.position_count() > 0 {
                pending.push(page.clone());
            }
        }
        if !pending.is_empty() {
            let segment =
                self.encode_segment(encoder.as_ref(), session, base_uri, pending)?;
            builder.add_segment(segment);
        }

        Ok(QueryData::Encoded(builder.build()))
    }

    /// Convert a sentinel page into a spooled segment, stamping the row
    /// offset and advancing it by the segment's row count.
    fn passthrough_segment(&self, base_uri: &str, page: &Page) -> anyhow::Result<Segment> {
        let block = SpooledBlock::deserialize(page)?;
        let rows_count = block.attributes.get_i64(DataAttribute::RowsCount)?;
        let attributes = self.stamp_offset(&block.attributes, rows_count);
        Ok(Segment::spooled(
            format!("{base_uri}/{}", block.identifier),
            attributes,
        ))
    }

    /// Encode a run of ordinary pages into one segment. Small segments are
    /// inlined; anything over the initial segment size is spooled. Encoded
    /// output over the maximum segment size is a caller error and fails the
    /// whole production.
    fn encode_segment(
        &self,
        encoder: &dyn QueryDataEncoder,
        session: &Session,
        base_uri: &str,
        pages: Vec<Page>,
    ) -> anyhow::Result<Segment> {
        let rows_count: i64 = pages
            .iter()
            .map(|page| page.position_count() as i64)
            .sum();
        let mut encoded = Vec::new();
        let segment_attributes = encoder.encode_to(&mut encoded, &pages)?;
        if encoded.len() as u64 > self.bridge.maximum_segment_size() {
            bail!(
                "encoded segment is {} bytes, over the maximum segment size of {}",
                encoded.len(),
                self.bridge.maximum_segment_size()
            );
        }
        let attributes = self.stamp_offset(&segment_attributes, rows_count);
        let attributes = attributes
            .to_builder()
            .set_i64(DataAttribute::RowsCount, rows_count)
            .build();

        let inline = self.bridge.use_inline_segments()
            && encoded.len() as u64 <= self.bridge.initial_segment_size();
        if inline {
            return Ok(Segment::inlined(encoded, attributes));
        }

        let context = SpoolingContext {
            query_id: session.query_id().to_string(),
            encoding: encoder.encoding_id(),
        };
        let handle = self.bridge.create(&context)?;
        let mut output = self.bridge.create_output_stream(&handle)?;
        output.write_all(&encoded)?;
        output.flush()?;
        drop(output);

        let identifier = self.bridge.handle_to_uri_identifier(&handle)?;
        Ok(Segment::spooled(
            format!("{base_uri}/{identifier}"),
            attributes,
        ))
    }

    fn stamp_offset(&self, attributes: &DataAttributes, rows_count: i64) -> DataAttributes {
        let offset = self.current_offset.fetch_add(rows_count, Ordering::AcqRel);
        attributes
            .to_builder()
            .set_i64(DataAttribute::RowOffset, offset)
            .build()
    }
}

/// Row-major passthrough used when no encoder is configured.
fn flatten(rows: &QueryResultRows) -> Vec<Vec<Value>> {
    rows.pages
        .iter()
        .flat_map(|page| page.rows(rows.output_columns))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde_json::json;
    use silo_protocol::encoding::json::JsonQueryDataEncoderFactory;
    use std::time::Duration;

    use crate::config::SpoolingConfig;
    use crate::filesystem::FileSystemSpoolingBackend;

    const BASE_URI: &str = "http://localhost:8080/v1/spooled/segments";

    fn bridge(root: &std::path::Path, inline: bool, initial_size: u64) -> Arc<SpoolingManagerBridge> {
        let config = SpoolingConfig {
            enabled: true,
            inline_segments: inline,
            initial_segment_size: initial_size,
            encryption_key: Some(STANDARD.encode([9u8; 32])),
            ..Default::default()
        };
        let backend = FileSystemSpoolingBackend::new(root, Duration::from_secs(60));
        Arc::new(SpoolingManagerBridge::new(&config, Some(Arc::new(backend))).unwrap())
    }

    fn producer(bridge: Arc<SpoolingManagerBridge>) -> QueryDataProducer {
        QueryDataProducer::new(Some(Arc::new(JsonQueryDataEncoderFactory)), bridge)
    }

    fn page(values: &[i64]) -> Page {
        Page::from_rows(&values.iter().map(|v| vec![json!(v)]).collect::<Vec<_>>())
    }

    fn no_errors() -> impl FnMut(anyhow::Error) {
        |error| panic!("unexpected production error: {error}")
    }

    #[test]
    fn empty_results_produce_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let producer = producer(bridge(dir.path(), true, 1024));
        let session = Session::new("query_1");
        let rows = QueryResultRows::new(1, vec![Page::from_rows(&[])]);
        assert!(producer
            .produce(BASE_URI, &session, rows, &mut no_errors())
            .is_none());
    }

    #[test]
    fn raw_passthrough_without_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let producer = QueryDataProducer::new(None, bridge(dir.path(), true, 1024));
        let session = Session::new("query_1");
        let rows = QueryResultRows::new(1, vec![page(&[1, 2]), page(&[3])]);
        let data = producer
            .produce(BASE_URI, &session, rows, &mut no_errors())
            .unwrap();
        assert_eq!(
            data,
            QueryData::Raw(vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]])
        );
    }

    #[test]
    fn row_offsets_are_monotonic_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let producer = producer(bridge(dir.path(), true, 1024));
        let session = Session::new("query_1");

        let mut offsets = Vec::new();
        for values in [&[1i64, 2, 3][..], &[4, 5][..], &[6][..]] {
            let rows = QueryResultRows::new(1, vec![page(values)]);
            let data = producer
                .produce(BASE_URI, &session, rows, &mut no_errors())
                .unwrap();
            let QueryData::Encoded(encoded) = data else {
                panic!("expected encoded data");
            };
            assert_eq!(encoded.segments.len(), 1);
            offsets.push(encoded.segments[0].row_offset().unwrap());
        }
        assert_eq!(offsets, vec![0, 3, 5]);
    }

    #[test]
    fn response_attributes_are_emitted_once() {
        let dir = tempfile::tempdir().unwrap();
        // Encryption makes the encoder carry a response-level key attribute.
        let session = Session::with_encryption("query_1");
        let factory = silo_protocol::encoding::encryption::EncryptingQueryDataEncoderFactory::new(
            Arc::new(JsonQueryDataEncoderFactory),
        );
        let producer =
            QueryDataProducer::new(Some(Arc::new(factory)), bridge(dir.path(), true, 1024));

        let first = producer
            .produce(
                BASE_URI,
                &session,
                QueryResultRows::new(1, vec![page(&[1])]),
                &mut no_errors(),
            )
            .unwrap();
        let second = producer
            .produce(
                BASE_URI,
                &session,
                QueryResultRows::new(1, vec![page(&[2])]),
                &mut no_errors(),
            )
            .unwrap();

        let QueryData::Encoded(first) = first else {
            panic!("expected encoded data");
        };
        let QueryData::Encoded(second) = second else {
            panic!("expected encoded data");
        };
        assert!(first
            .attributes
            .contains(DataAttribute::EncryptionKey));
        assert!(second.attributes.is_empty());
    }

    #[test]
    fn large_segments_are_spooled() {
        let dir = tempfile::tempdir().unwrap();
        // Tiny threshold forces spooling.
        let producer = producer(bridge(dir.path(), true, 4));
        let session = Session::new("query_1");
        let rows = QueryResultRows::new(1, vec![page(&[1, 2, 3, 4, 5])]);
        let data = producer
            .produce(BASE_URI, &session, rows, &mut no_errors())
            .unwrap();
        let QueryData::Encoded(encoded) = data else {
            panic!("expected encoded data");
        };
        assert!(matches!(&encoded.segments[0], Segment::Spooled { uri, .. }
            if uri.starts_with(BASE_URI)));
    }

    #[test]
    fn inline_disabled_always_spools() {
        let dir = tempfile::tempdir().unwrap();
        let producer = producer(bridge(dir.path(), false, 1024 * 1024));
        let session = Session::new("query_1");
        let rows = QueryResultRows::new(1, vec![page(&[1])]);
        let data = producer
            .produce(BASE_URI, &session, rows, &mut no_errors())
            .unwrap();
        let QueryData::Encoded(encoded) = data else {
            panic!("expected encoded data");
        };
        assert!(matches!(&encoded.segments[0], Segment::Spooled { .. }));
    }

    #[test]
    fn metadata_pages_pass_through_with_stamped_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let producer = producer(bridge(dir.path(), true, 1024));
        let session = Session::new("query_1");

        let attributes = DataAttributes::builder()
            .set_i64(DataAttribute::RowsCount, 7)
            .set_i64(DataAttribute::ByteSize, 128)
            .build();
        let sentinel = SpooledBlock::new("opaque-id", attributes).to_metadata_page(1);
        let rows = QueryResultRows::new(1, vec![page(&[1, 2]), sentinel, page(&[3])]);

        let data = producer
            .produce(BASE_URI, &session, rows, &mut no_errors())
            .unwrap();
        let QueryData::Encoded(encoded) = data else {
            panic!("expected encoded data");
        };
        assert_eq!(encoded.segments.len(), 3);

        assert_eq!(encoded.segments[0].row_offset(), Some(0));
        let Segment::Spooled { uri, attributes } = &encoded.segments[1] else {
            panic!("expected spooled passthrough segment");
        };
        assert_eq!(uri, &format!("{BASE_URI}/opaque-id"));
        assert_eq!(
            attributes.get_opt_i64(DataAttribute::RowOffset),
            Some(2)
        );
        // The next inline segment starts after the spooled segment's rows.
        assert_eq!(encoded.segments[2].row_offset(), Some(9));
    }

    #[test]
    fn oversized_segments_fail_production() {
        let dir = tempfile::tempdir().unwrap();
        let config = SpoolingConfig {
            enabled: true,
            inline_segments: true,
            initial_segment_size: 1024,
            maximum_segment_size: 8,
            encryption_key: Some(STANDARD.encode([9u8; 32])),
            ..Default::default()
        };
        let backend = FileSystemSpoolingBackend::new(dir.path(), Duration::from_secs(60));
        let bridge =
            Arc::new(SpoolingManagerBridge::new(&config, Some(Arc::new(backend))).unwrap());
        let producer = producer(bridge);
        let session = Session::new("query_1");

        let mut reported = Vec::new();
        let rows = QueryResultRows::new(1, vec![page(&[1, 2, 3, 4, 5])]);
        let result = producer.produce(BASE_URI, &session, rows, &mut |error| {
            reported.push(error.to_string());
        });
        assert!(result.is_none());
        assert_eq!(reported.len(), 1);
        assert!(
            reported[0].contains("maximum segment size"),
            "{}",
            reported[0]
        );
    }

    #[test]
    fn failures_are_reported_and_yield_nothing() {
        let config = SpoolingConfig {
            enabled: true,
            inline_segments: false,
            encryption_key: Some(STANDARD.encode([9u8; 32])),
            ..Default::default()
        };
        // No backend loaded: spooling must fail cleanly.
        let bridge = Arc::new(SpoolingManagerBridge::new(&config, None).unwrap());
        let producer = producer(bridge);
        let session = Session::new("query_1");

        let mut reported = Vec::new();
        let rows = QueryResultRows::new(1, vec![page(&[1])]);
        let result = producer.produce(BASE_URI, &session, rows, &mut |error| {
            reported.push(error.to_string());
        });
        assert!(result.is_none());
        assert_eq!(reported.len(), 1);
        assert!(reported[0].contains("not loaded"), "{}", reported[0]);
    }
}
