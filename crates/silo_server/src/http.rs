//! HTTP surface for the segment resource.
//!
//! GET answers with a redirect or the raw segment bytes; DELETE acknowledges
//! the segment. Identifiers are opaque to clients, so every failure maps to
//! 404 rather than leaking why an identifier was rejected.

use std::io::Read;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use tracing::{debug, warn};

use crate::resource::{SegmentDownload, SegmentResource, SEGMENTS_PATH};

/// Router serving `GET`/`DELETE {SEGMENTS_PATH}/{{identifier}}`.
pub fn router(resource: Arc<SegmentResource>) -> Router {
    Router::new()
        .route(
            &format!("{SEGMENTS_PATH}/{{identifier}}"),
            get(download_segment).delete(acknowledge_segment),
        )
        .with_state(resource)
}

async fn download_segment(
    State(resource): State<Arc<SegmentResource>>,
    Path(identifier): Path<String>,
) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        match resource.download(&identifier)? {
            SegmentDownload::Redirect(uri) => Ok::<_, anyhow::Error>(Download::Redirect(uri)),
            SegmentDownload::Stream(mut stream) => {
                // Segments are bounded by the maximum segment size.
                let mut bytes = Vec::new();
                stream.read_to_end(&mut bytes)?;
                Ok(Download::Bytes(bytes))
            }
        }
    })
    .await;

    match result {
        Ok(Ok(Download::Redirect(uri))) => {
            debug!(uri, "redirecting segment download");
            Redirect::to(&uri).into_response()
        }
        Ok(Ok(Download::Bytes(bytes))) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Ok(Err(error)) => {
            warn!(%error, "segment download failed");
            StatusCode::NOT_FOUND.into_response()
        }
        Err(join_error) => {
            warn!(%join_error, "segment download task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

enum Download {
    Redirect(String),
    Bytes(Vec<u8>),
}

async fn acknowledge_segment(
    State(resource): State<Arc<SegmentResource>>,
    Path(identifier): Path<String>,
) -> StatusCode {
    let result =
        tokio::task::spawn_blocking(move || resource.acknowledge(&identifier)).await;
    match result {
        Ok(Ok(())) => StatusCode::OK,
        Ok(Err(error)) => {
            warn!(%error, "segment acknowledge failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(join_error) => {
            warn!(%join_error, "segment acknowledge task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
