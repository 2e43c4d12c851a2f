use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::{json, Value};
use tempfile::TempDir;

use silo_client::SegmentLoader;
use silo_protocol::encoding::compression::CompressedQueryDataEncoderFactory;
use silo_protocol::encoding::encryption::EncryptingQueryDataEncoderFactory;
use silo_protocol::encoding::json::JsonQueryDataEncoderFactory;
use silo_protocol::encoding::{Compression, DecoderRegistry};
use silo_protocol::{
    DataAttribute, DataAttributes, Page, QueryData, QueryResultRows, Segment, Session,
};
use silo_server::http;
use silo_server::producer::QueryDataProducer;
use silo_server::resource::{SegmentResource, StaticClusterNodes};
use silo_server::{FileSystemSpoolingBackend, SpoolingConfig, SpoolingManagerBridge};

/// Spooling coordinator on an ephemeral port with filesystem storage.
struct Harness {
    _storage: TempDir,
    base_uri: String,
    producer: QueryDataProducer,
    session: Session,
}

impl Harness {
    async fn start() -> Result<Self> {
        let storage = TempDir::new()?;
        let config = SpoolingConfig {
            enabled: true,
            // Force every segment through storage.
            inline_segments: false,
            encryption_key: Some(STANDARD.encode([42u8; 32])),
            ..Default::default()
        };
        config.validate()?;

        let backend = Arc::new(FileSystemSpoolingBackend::new(
            storage.path(),
            Duration::from_secs(60),
        ));
        let bridge = Arc::new(SpoolingManagerBridge::new(&config, Some(backend))?);
        let resource = Arc::new(SegmentResource::new(
            bridge.clone(),
            Arc::new(StaticClusterNodes::coordinator_only()),
            false,
            false,
        ));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, http::router(resource)).await;
        });

        let encoder_factory = EncryptingQueryDataEncoderFactory::new(Arc::new(
            CompressedQueryDataEncoderFactory::new(
                Arc::new(JsonQueryDataEncoderFactory),
                Compression::Lz4,
            ),
        ));
        let producer = QueryDataProducer::new(Some(Arc::new(encoder_factory)), bridge);

        Ok(Self {
            _storage: storage,
            base_uri: format!("http://{addr}/v1/spooled/segments"),
            producer,
            session: Session::with_encryption("query_e2e"),
        })
    }

    fn produce(&self, page: Page) -> Result<(Segment, DataAttributes)> {
        let rows = QueryResultRows::new(2, vec![page]);
        let mut failures = Vec::new();
        let data = self
            .producer
            .produce(&self.base_uri, &self.session, rows, &mut |error| {
                failures.push(error.to_string())
            });
        if !failures.is_empty() {
            bail!("production failed: {}", failures.join("; "));
        }
        let Some(QueryData::Encoded(mut encoded)) = data else {
            bail!("expected encoded query data");
        };
        assert_eq!(encoded.encoding, "json+lz4");
        assert_eq!(encoded.segments.len(), 1);
        Ok((encoded.segments.remove(0), encoded.attributes))
    }
}

fn page(rows: std::ops::Range<i64>) -> Page {
    Page::from_rows(
        &rows
            .map(|id| vec![json!(id), json!(format!("row-{id}"))])
            .collect::<Vec<_>>(),
    )
}

async fn wait_for_not_found(uri: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = client.get(uri).send().await?.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if Instant::now() > deadline {
            bail!("segment at {uri} still answers {status}");
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn spool_fetch_decode_and_acknowledge() -> Result<()> {
    let harness = Harness::start().await?;

    // 10,000 rows across three pages.
    let pages = [page(0..4000), page(4000..8000), page(8000..10_000)];
    let mut segments = Vec::new();
    let mut query_attributes = DataAttributes::empty();
    for (index, page) in pages.into_iter().enumerate() {
        let (segment, attributes) = harness.produce(page)?;
        // The encryption key rides on the first response only.
        if index == 0 {
            assert!(attributes.contains(DataAttribute::EncryptionKey));
            query_attributes = attributes;
        } else {
            assert!(attributes.is_empty());
        }
        segments.push(segment);
    }

    let offsets: Vec<i64> = segments
        .iter()
        .map(|segment| segment.row_offset().context("missing row offset"))
        .collect::<Result<_>>()?;
    assert_eq!(offsets, vec![0, 4000, 8000]);

    let registry = DecoderRegistry::standard()?;
    let decoder = registry.get("json+lz4")?.create(&query_attributes)?;
    let loader = SegmentLoader::new();

    let mut rows: Vec<Vec<Value>> = Vec::new();
    let mut uris = Vec::new();
    for segment in &segments {
        let Segment::Spooled { uri, attributes } = segment else {
            bail!("expected a spooled segment");
        };
        let bytes = loader.load_bytes(uri).await?;
        rows.extend(decoder.decode(&mut Cursor::new(bytes), attributes)?);
        uris.push(uri.clone());
    }
    assert_eq!(rows.len(), 10_000);
    for (id, row) in rows.iter().enumerate() {
        assert_eq!(row, &vec![json!(id), json!(format!("row-{id}"))]);
    }

    // Closing each stream fired a delete; the segments must disappear.
    for uri in &uris {
        wait_for_not_found(uri).await?;
        let err = loader.load(uri).await.expect_err("segment must be gone");
        assert!(err.to_string().contains("404"), "{err}");
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn forged_identifier_is_not_found() -> Result<()> {
    let harness = Harness::start().await?;
    let loader = SegmentLoader::new();
    let err = loader
        .load(&format!("{}/bm90LXJlYWw", harness.base_uri))
        .await
        .expect_err("forged identifier must fail");
    assert!(err.to_string().contains("404"), "{err}");
    Ok(())
}
