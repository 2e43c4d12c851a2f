//! Spooling configuration with environment overrides.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Default initial spooled segment size (bytes).
const DEFAULT_INITIAL_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;
/// Default maximum spooled segment size (bytes).
const DEFAULT_MAXIMUM_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;
/// Default time-to-live for spooled segments.
const DEFAULT_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Server-side spooling protocol configuration.
#[derive(Clone, Debug)]
pub struct SpoolingConfig {
    /// Enable spooling client protocol support.
    pub enabled: bool,
    /// Redirect segment downloads to worker nodes.
    pub use_workers: bool,
    /// Redirect clients straight to the storage backend when it supports it.
    pub direct_storage_access: bool,
    /// Allow small segments to be inlined into the response.
    pub inline_segments: bool,
    /// Encrypt spooled segments with ephemeral per-query keys.
    pub encryption: bool,
    /// Initial size of spooled segments in bytes.
    pub initial_segment_size: u64,
    /// Maximum size of spooled segments in bytes.
    pub maximum_segment_size: u64,
    /// 256 bit, base64-encoded secret key securing segment identifiers.
    pub encryption_key: Option<String>,
    /// Expiration horizon for spooled segments.
    pub ttl: Duration,
}

impl Default for SpoolingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            use_workers: false,
            direct_storage_access: false,
            inline_segments: true,
            encryption: true,
            initial_segment_size: DEFAULT_INITIAL_SEGMENT_SIZE,
            maximum_segment_size: DEFAULT_MAXIMUM_SEGMENT_SIZE,
            encryption_key: None,
            ttl: DEFAULT_TTL,
        }
    }
}

impl SpoolingConfig {
    /// Apply `SILO_SPOOLING_*` environment overrides.
    pub fn apply_env(&mut self) {
        self.enabled = read_env_bool("SILO_SPOOLING_ENABLED", self.enabled);
        self.use_workers = read_env_bool("SILO_SPOOLING_WORKER_ACCESS", self.use_workers);
        self.direct_storage_access = read_env_bool(
            "SILO_SPOOLING_DIRECT_STORAGE_ACCESS",
            self.direct_storage_access,
        );
        self.inline_segments =
            read_env_bool("SILO_SPOOLING_INLINE_SEGMENTS", self.inline_segments);
        self.encryption = read_env_bool("SILO_SPOOLING_ENCRYPTION", self.encryption);
        self.initial_segment_size = read_env_u64(
            "SILO_SPOOLING_INITIAL_SEGMENT_SIZE",
            self.initial_segment_size,
        );
        self.maximum_segment_size = read_env_u64(
            "SILO_SPOOLING_MAXIMUM_SEGMENT_SIZE",
            self.maximum_segment_size,
        );
        if let Ok(key) = env::var("SILO_SPOOLING_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        self.ttl = Duration::from_secs(read_env_u64(
            "SILO_SPOOLING_TTL_SECS",
            self.ttl.as_secs(),
        ));
    }

    /// Validate startup invariants. Fatal on violation.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.encryption_key.is_none() {
            bail!("spooling encryption key must be set if spooling is enabled");
        }
        if self.encryption_key.is_some() {
            self.encryption_key_bytes()?;
        }
        Ok(())
    }

    /// Decode the configured identifier-encryption key.
    pub fn encryption_key_bytes(&self) -> anyhow::Result<[u8; 32]> {
        let encoded = self
            .encryption_key
            .as_deref()
            .context("spooling encryption key is not configured")?;
        let bytes = STANDARD
            .decode(encoded)
            .context("spooling encryption key is not valid base64")?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("spooling encryption key must be 256 bits long"))
    }
}

fn read_env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.trim(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn read_env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
