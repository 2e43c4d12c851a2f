//! Storage backend seam for spooled segments.
//!
//! A backend mints handles, moves segment bytes, and owns the handle wire
//! layout. Handles are a tagged variant carried alongside a backend
//! identifier so the bridge can reject identifiers minted by a different
//! backend without runtime type inspection.

use std::io::{Read, Write};

use crate::filesystem::FileSystemSegmentHandle;

/// Wire tag for the filesystem backend.
pub const FILESYSTEM_BACKEND_TAG: u8 = 1;

/// Query context a segment is minted for.
#[derive(Clone, Debug)]
pub struct SpoolingContext {
    pub query_id: String,
    /// Encoding id the segment payload was produced with.
    pub encoding: String,
}

/// Backend-specific identity of a stored segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SegmentHandle {
    Filesystem(FileSystemSegmentHandle),
}

impl SegmentHandle {
    /// Wire tag identifying the owning backend.
    pub fn backend_tag(&self) -> u8 {
        match self {
            SegmentHandle::Filesystem(_) => FILESYSTEM_BACKEND_TAG,
        }
    }
}

/// Storage backend for spooled segments.
///
/// All mutating operations touch external storage and may block; callers
/// treat each call as a slow, cancellable I/O operation with no implicit
/// retry. `serialize`/`deserialize` are pure and must round-trip exactly.
pub trait SpoolingBackend: Send + Sync {
    /// Wire tag this backend stamps on its handles.
    fn backend_tag(&self) -> u8;

    /// Mint a new handle for this query context.
    fn create(&self, context: &SpoolingContext) -> SegmentHandle;

    /// Open the segment for writing. Writes must be flushed by the caller.
    fn create_output_stream(
        &self,
        handle: &SegmentHandle,
    ) -> anyhow::Result<Box<dyn Write + Send>>;

    /// Open the segment for reading.
    fn open_input_stream(&self, handle: &SegmentHandle) -> anyhow::Result<Box<dyn Read + Send>>;

    /// Permanently remove the segment.
    fn acknowledge(&self, handle: &SegmentHandle) -> anyhow::Result<()>;

    /// Serialize the handle to its backend wire layout (tag excluded).
    fn serialize(&self, handle: &SegmentHandle) -> anyhow::Result<Vec<u8>>;

    /// Exact inverse of [`SpoolingBackend::serialize`]; rejects truncated
    /// input.
    fn deserialize(&self, bytes: &[u8]) -> anyhow::Result<SegmentHandle>;

    /// Backend-native URI for coordinator bypass, when supported.
    fn direct_location(&self, _handle: &SegmentHandle) -> Option<String> {
        None
    }
}
