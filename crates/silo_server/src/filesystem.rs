//! Filesystem reference backend.
//!
//! Segments live under a root directory as `<query_id>/<random-id>` files.
//! Handles carry an expiration timestamp; every read/write/delete checks it
//! before touching storage, so an expired handle fails fast.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};

use crate::backend::{
    SegmentHandle, SpoolingBackend, SpoolingContext, FILESYSTEM_BACKEND_TAG,
};

/// Filesystem segment identity: object name plus expiration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSystemSegmentHandle {
    name: String,
    valid_until: SystemTime,
}

impl FileSystemSegmentHandle {
    /// Mint a random handle under the query's directory.
    pub fn random(context: &SpoolingContext, ttl: Duration) -> Self {
        Self {
            name: format!(
                "{}/{}",
                context.query_id,
                uuid::Uuid::new_v4().simple()
            ),
            valid_until: SystemTime::now() + ttl,
        }
    }

    pub fn new(name: impl Into<String>, valid_until: SystemTime) -> Self {
        Self {
            name: name.into(),
            valid_until,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn valid_until(&self) -> SystemTime {
        self.valid_until
    }

    fn expires_at_millis(&self) -> i64 {
        match self.valid_until.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_millis() as i64,
            Err(before) => -(before.duration().as_millis() as i64),
        }
    }

    /// Wire layout: `int64 expires_at_millis | int32 name_len | utf8 name`,
    /// big-endian.
    pub fn serialize(&self) -> Vec<u8> {
        let name = self.name.as_bytes();
        let mut out = Vec::with_capacity(12 + name.len());
        out.extend_from_slice(&self.expires_at_millis().to_be_bytes());
        out.extend_from_slice(&(name.len() as i32).to_be_bytes());
        out.extend_from_slice(name);
        out
    }

    /// Exact inverse of [`FileSystemSegmentHandle::serialize`].
    pub fn deserialize(bytes: &[u8]) -> anyhow::Result<Self> {
        if bytes.len() < 12 {
            bail!("truncated segment handle");
        }
        let expires_at_millis = i64::from_be_bytes(bytes[0..8].try_into()?);
        let name_len = i32::from_be_bytes(bytes[8..12].try_into()?);
        if name_len < 0 || bytes.len() != 12 + name_len as usize {
            bail!("truncated segment handle");
        }
        let name = std::str::from_utf8(&bytes[12..])
            .context("segment handle name is not valid UTF-8")?;
        let valid_until = if expires_at_millis >= 0 {
            UNIX_EPOCH + Duration::from_millis(expires_at_millis as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(expires_at_millis.unsigned_abs())
        };
        Ok(Self::new(name, valid_until))
    }
}

/// Filesystem-backed spooling storage.
pub struct FileSystemSpoolingBackend {
    root: PathBuf,
    ttl: Duration,
}

impl FileSystemSpoolingBackend {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    fn filesystem_handle<'a>(
        &self,
        handle: &'a SegmentHandle,
    ) -> anyhow::Result<&'a FileSystemSegmentHandle> {
        match handle {
            SegmentHandle::Filesystem(handle) => Ok(handle),
        }
    }

    /// Resolved storage path for a live handle. Checks expiration first so
    /// an expired handle never reaches storage I/O.
    fn segment_location(&self, handle: &FileSystemSegmentHandle) -> anyhow::Result<PathBuf> {
        check_expiration(handle)?;
        let name = safe_string(handle.name());
        // An absolute argument to `join` would replace the root wholesale.
        Ok(self.root.join(name.trim_start_matches('/')))
    }
}

impl SpoolingBackend for FileSystemSpoolingBackend {
    fn backend_tag(&self) -> u8 {
        FILESYSTEM_BACKEND_TAG
    }

    fn create(&self, context: &SpoolingContext) -> SegmentHandle {
        SegmentHandle::Filesystem(FileSystemSegmentHandle::random(context, self.ttl))
    }

    fn create_output_stream(
        &self,
        handle: &SegmentHandle,
    ) -> anyhow::Result<Box<dyn Write + Send>> {
        let location = self.segment_location(self.filesystem_handle(handle)?)?;
        if let Some(parent) = location.parent() {
            fs::create_dir_all(parent).context("create segment directory")?;
        }
        let file = File::create(&location)
            .with_context(|| format!("create segment file {}", location.display()))?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn open_input_stream(&self, handle: &SegmentHandle) -> anyhow::Result<Box<dyn Read + Send>> {
        let location = self.segment_location(self.filesystem_handle(handle)?)?;
        let file = File::open(&location)
            .with_context(|| format!("open segment file {}", location.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn acknowledge(&self, handle: &SegmentHandle) -> anyhow::Result<()> {
        let location = self.segment_location(self.filesystem_handle(handle)?)?;
        fs::remove_file(&location)
            .with_context(|| format!("delete segment file {}", location.display()))
    }

    fn serialize(&self, handle: &SegmentHandle) -> anyhow::Result<Vec<u8>> {
        Ok(self.filesystem_handle(handle)?.serialize())
    }

    fn deserialize(&self, bytes: &[u8]) -> anyhow::Result<SegmentHandle> {
        Ok(SegmentHandle::Filesystem(
            FileSystemSegmentHandle::deserialize(bytes)?,
        ))
    }
}

/// Replace anything outside `[A-Za-z0-9-_/]` so crafted names cannot
/// traverse outside the storage root.
fn safe_string(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '/') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn check_expiration(handle: &FileSystemSegmentHandle) -> anyhow::Result<()> {
    if handle.valid_until() < SystemTime::now() {
        bail!("segment has expired");
    }
    Ok(())
}
