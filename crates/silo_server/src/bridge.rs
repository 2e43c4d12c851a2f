//! Bridge between the protocol surface and the active storage backend.
//!
//! Clients carry segment identity as an opaque string in a URI path
//! segment. The bridge seals backend-serialized handles with a
//! per-deployment AES-256-GCM key and URL-safe base64, so clients can
//! neither forge nor inspect handle contents. Decode is the exact inverse;
//! re-encoding the same handle yields a different string because the nonce
//! is random.

use std::io::{Read, Write};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{anyhow, bail, Context};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

use crate::backend::{SegmentHandle, SpoolingBackend, SpoolingContext};
use crate::config::SpoolingConfig;

const NONCE_LEN: usize = 12;

/// Hides backend handle types behind encrypted URI identifiers and
/// delegates segment I/O to the active backend.
pub struct SpoolingManagerBridge {
    backend: Option<Arc<dyn SpoolingBackend>>,
    secret_key: [u8; 32],
    inline_segments: bool,
    initial_segment_size: u64,
    maximum_segment_size: u64,
}

impl SpoolingManagerBridge {
    pub fn new(
        config: &SpoolingConfig,
        backend: Option<Arc<dyn SpoolingBackend>>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            backend,
            secret_key: config.encryption_key_bytes()?,
            inline_segments: config.inline_segments,
            initial_segment_size: config.initial_segment_size,
            maximum_segment_size: config.maximum_segment_size,
        })
    }

    pub fn use_inline_segments(&self) -> bool {
        self.inline_segments
    }

    pub fn initial_segment_size(&self) -> u64 {
        self.initial_segment_size
    }

    pub fn maximum_segment_size(&self) -> u64 {
        self.maximum_segment_size
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }

    fn delegate(&self) -> anyhow::Result<&Arc<dyn SpoolingBackend>> {
        self.backend
            .as_ref()
            .ok_or_else(|| anyhow!("spooling backend is not loaded"))
    }

    /// Mint a new handle for this query context.
    pub fn create(&self, context: &SpoolingContext) -> anyhow::Result<SegmentHandle> {
        Ok(self.delegate()?.create(context))
    }

    pub fn create_output_stream(
        &self,
        handle: &SegmentHandle,
    ) -> anyhow::Result<Box<dyn Write + Send>> {
        self.delegate()?.create_output_stream(handle)
    }

    /// Open a segment for reading by its encrypted identifier.
    pub fn open_input_stream(&self, identifier: &str) -> anyhow::Result<Box<dyn Read + Send>> {
        let handle = self.decode_handle(identifier)?;
        self.delegate()?.open_input_stream(&handle)
    }

    /// Backend-native URI for the segment, when the backend supports
    /// coordinator bypass.
    pub fn direct_location(&self, identifier: &str) -> anyhow::Result<Option<String>> {
        let handle = self.decode_handle(identifier)?;
        Ok(self.delegate()?.direct_location(&handle))
    }

    /// Permanently remove the segment behind the identifier.
    pub fn drop_segment(&self, identifier: &str) -> anyhow::Result<()> {
        let handle = self.decode_handle(identifier)?;
        self.delegate()?.acknowledge(&handle)
    }

    /// Seal a handle into its opaque, URL-safe identifier.
    pub fn handle_to_uri_identifier(&self, handle: &SegmentHandle) -> anyhow::Result<String> {
        let mut plaintext = vec![handle.backend_tag()];
        plaintext.extend(self.delegate()?.serialize(handle)?);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.secret_key));
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow!("could not encrypt segment handle"))?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Decode an identifier back into a typed handle. Forged or tampered
    /// identifiers fail here, before any backend I/O.
    pub fn decode_handle(&self, identifier: &str) -> anyhow::Result<SegmentHandle> {
        let sealed = URL_SAFE_NO_PAD
            .decode(identifier)
            .context("invalid segment identifier")?;
        if sealed.len() < NONCE_LEN {
            bail!("invalid segment identifier");
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.secret_key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| anyhow!("could not decrypt segment handle"))?;

        let backend = self.delegate()?;
        let (tag, payload) = plaintext
            .split_first()
            .ok_or_else(|| anyhow!("invalid segment handle"))?;
        if *tag != backend.backend_tag() {
            bail!("segment handle belongs to an unknown backend: {tag}");
        }
        backend.deserialize(payload)
    }
}
