//! Per-query session context shared by the producer and the encoders.

use std::sync::OnceLock;

use rand::RngCore;

/// Length in bytes of the per-query AES-256 result encryption key.
pub const ENCRYPTION_KEY_LEN: usize = 32;

/// Context for one query response.
///
/// The result-encryption key is established lazily, at most once, the first
/// time an encrypting encoder is created for the session. Segments of one
/// response therefore always share a single key.
#[derive(Debug)]
pub struct Session {
    query_id: String,
    encryption_enabled: bool,
    encryption_key: OnceLock<[u8; ENCRYPTION_KEY_LEN]>,
}

impl Session {
    /// Session without result encryption.
    pub fn new(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            encryption_enabled: false,
            encryption_key: OnceLock::new(),
        }
    }

    /// Session that encrypts result segments with an ephemeral per-query key.
    pub fn with_encryption(query_id: impl Into<String>) -> Self {
        Self {
            query_id: query_id.into(),
            encryption_enabled: true,
            encryption_key: OnceLock::new(),
        }
    }

    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn encryption_enabled(&self) -> bool {
        self.encryption_enabled
    }

    /// Return the session's encryption key, generating it on first use.
    ///
    /// Returns `None` when encryption is disabled for this session.
    pub fn establish_encryption_key(&self) -> Option<&[u8; ENCRYPTION_KEY_LEN]> {
        if !self.encryption_enabled {
            return None;
        }
        Some(self.encryption_key.get_or_init(|| {
            let mut key = [0u8; ENCRYPTION_KEY_LEN];
            rand::thread_rng().fill_bytes(&mut key);
            key
        }))
    }
}
