//! Encryption stage: the outermost layer of the encoding pipeline.
//!
//! Segments are sealed with an ephemeral per-query AES-256-GCM key. The key
//! is exported, base64-encoded, as a response-level attribute on the first
//! segment only, so a payload is unreadable without its own attributes. The
//! decrypting stage is a pass-through when no key attribute is present.

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

use crate::attributes::{DataAttribute, DataAttributes};
use crate::encoding::{
    QueryDataDecoder, QueryDataDecoderFactory, QueryDataEncoder, QueryDataEncoderFactory, Rows,
};
use crate::error::ProtocolError;
use crate::page::Page;
use crate::session::{Session, ENCRYPTION_KEY_LEN};

/// Cipher name recorded next to the exported key.
pub const CIPHER_NAME: &str = "AES-256-GCM";

const NONCE_LEN: usize = 12;

/// Export a key in its transport-safe text form.
pub fn serialize_key(key: &[u8; ENCRYPTION_KEY_LEN]) -> String {
    STANDARD.encode(key)
}

/// Reconstruct a key from its text form and declared cipher name.
pub fn deserialize_key(
    serialized: &str,
    cipher_name: &str,
) -> Result<[u8; ENCRYPTION_KEY_LEN], ProtocolError> {
    if cipher_name != CIPHER_NAME {
        return Err(ProtocolError::InvalidKey(format!(
            "unsupported cipher: {cipher_name}"
        )));
    }
    let bytes = STANDARD
        .decode(serialized)
        .map_err(|e| ProtocolError::InvalidKey(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| ProtocolError::InvalidKey(format!("expected {ENCRYPTION_KEY_LEN} bytes")))
}

/// Seal plaintext under `key`; the random nonce is prepended to the
/// ciphertext.
pub(crate) fn seal(
    key: &[u8; ENCRYPTION_KEY_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| ProtocolError::Corruption("could not encrypt segment".to_string()))?;
    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Inverse of [`seal`]. Authentication failure is a decryption error.
pub(crate) fn open(
    key: &[u8; ENCRYPTION_KEY_LEN],
    sealed: &[u8],
) -> Result<Vec<u8>, ProtocolError> {
    if sealed.len() < NONCE_LEN {
        return Err(ProtocolError::Decryption);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::Decryption)
}

/// Encoder stage that seals the delegate's output.
pub struct EncryptingQueryDataEncoder {
    delegate: Box<dyn QueryDataEncoder>,
    key: [u8; ENCRYPTION_KEY_LEN],
}

impl EncryptingQueryDataEncoder {
    pub fn new(delegate: Box<dyn QueryDataEncoder>, key: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self { delegate, key }
    }
}

impl QueryDataEncoder for EncryptingQueryDataEncoder {
    fn encoding_id(&self) -> String {
        self.delegate.encoding_id()
    }

    fn attributes(&self) -> DataAttributes {
        self.delegate
            .attributes()
            .to_builder()
            .set_str(DataAttribute::EncryptionKey, serialize_key(&self.key))
            .set_str(DataAttribute::EncryptionCipherName, CIPHER_NAME)
            .build()
    }

    fn encode_to(
        &self,
        output: &mut dyn Write,
        pages: &[Page],
    ) -> Result<DataAttributes, ProtocolError> {
        // GCM is not a streaming mode; segments are bounded by the maximum
        // segment size, so the plaintext is buffered and sealed in one shot.
        let mut buffer = Vec::new();
        let attributes = self.delegate.encode_to(&mut buffer, pages)?;
        let sealed = seal(&self.key, &buffer)?;
        output.write_all(&sealed)?;
        output.flush()?;
        Ok(attributes)
    }
}

/// Decoder stage that opens a sealed payload before the delegate sees it.
pub struct DecryptingQueryDataDecoder {
    delegate: Box<dyn QueryDataDecoder>,
    key: [u8; ENCRYPTION_KEY_LEN],
}

impl DecryptingQueryDataDecoder {
    pub fn new(delegate: Box<dyn QueryDataDecoder>, key: [u8; ENCRYPTION_KEY_LEN]) -> Self {
        Self { delegate, key }
    }
}

impl QueryDataDecoder for DecryptingQueryDataDecoder {
    fn encoding_id(&self) -> String {
        self.delegate.encoding_id()
    }

    fn decode(
        &self,
        input: &mut dyn Read,
        attributes: &DataAttributes,
    ) -> Result<Rows, ProtocolError> {
        let mut sealed = Vec::new();
        input.read_to_end(&mut sealed)?;
        let plaintext = open(&self.key, &sealed)?;
        self.delegate.decode(&mut Cursor::new(plaintext), attributes)
    }
}

/// Encoder factory wrapper activating encryption when the session carries a
/// result-encryption key.
pub struct EncryptingQueryDataEncoderFactory {
    delegate: Arc<dyn QueryDataEncoderFactory>,
}

impl EncryptingQueryDataEncoderFactory {
    pub fn new(delegate: Arc<dyn QueryDataEncoderFactory>) -> Self {
        Self { delegate }
    }
}

impl QueryDataEncoderFactory for EncryptingQueryDataEncoderFactory {
    fn encoding_id(&self) -> String {
        self.delegate.encoding_id()
    }

    fn create(&self, session: &Session, output_columns: usize) -> Box<dyn QueryDataEncoder> {
        let encoder = self.delegate.create(session, output_columns);
        match session.establish_encryption_key() {
            Some(key) => Box::new(EncryptingQueryDataEncoder::new(encoder, *key)),
            None => encoder,
        }
    }
}

/// Decoder factory wrapper activating decryption only when the segment
/// attributes declare an encryption key.
pub struct DecryptingQueryDataDecoderFactory {
    delegate: Arc<dyn QueryDataDecoderFactory>,
}

impl DecryptingQueryDataDecoderFactory {
    pub fn new(delegate: Arc<dyn QueryDataDecoderFactory>) -> Self {
        Self { delegate }
    }
}

impl QueryDataDecoderFactory for DecryptingQueryDataDecoderFactory {
    fn encoding_id(&self) -> String {
        self.delegate.encoding_id()
    }

    fn create(
        &self,
        query_attributes: &DataAttributes,
    ) -> Result<Box<dyn QueryDataDecoder>, ProtocolError> {
        let decoder = self.delegate.create(query_attributes)?;
        match query_attributes.get_opt_str(DataAttribute::EncryptionKey) {
            Some(serialized) => {
                let cipher_name = query_attributes.get_str(DataAttribute::EncryptionCipherName)?;
                let key = deserialize_key(serialized, cipher_name)?;
                Ok(Box::new(DecryptingQueryDataDecoder::new(decoder, key)))
            }
            None => Ok(decoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::json::{
        JsonQueryDataDecoderFactory, JsonQueryDataEncoder, JsonQueryDataEncoderFactory,
    };
    use serde_json::json;

    fn pages() -> Vec<Page> {
        vec![Page::from_rows(&[vec![json!(7), json!("row")]])]
    }

    #[test]
    fn sealed_round_trip() {
        let session = Session::with_encryption("q");
        let factory =
            EncryptingQueryDataEncoderFactory::new(Arc::new(JsonQueryDataEncoderFactory));
        let encoder = factory.create(&session, 2);

        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages()).unwrap();
        let query_attributes = encoder.attributes();

        let decoder_factory =
            DecryptingQueryDataDecoderFactory::new(Arc::new(JsonQueryDataDecoderFactory));
        let decoder = decoder_factory.create(&query_attributes).unwrap();
        let rows = decoder
            .decode(&mut buf.as_slice(), &query_attributes)
            .unwrap()
            .into_vec();
        assert_eq!(rows, vec![vec![json!(7), json!("row")]]);
    }

    #[test]
    fn wrong_key_fails_with_decryption_error() {
        let encoder = EncryptingQueryDataEncoder::new(Box::new(JsonQueryDataEncoder::new(2)), [1; 32]);
        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages()).unwrap();

        let err = open(&[2; 32], &buf).unwrap_err();
        assert!(matches!(err, ProtocolError::Decryption));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [3u8; 32];
        let mut sealed = seal(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(open(&key, &sealed), Err(ProtocolError::Decryption)));
    }

    #[test]
    fn passthrough_without_key_attribute() {
        let session = Session::new("q");
        let factory =
            EncryptingQueryDataEncoderFactory::new(Arc::new(JsonQueryDataEncoderFactory));
        let encoder = factory.create(&session, 2);
        // No key established: attributes carry no encryption material.
        assert!(encoder
            .attributes()
            .get_opt_str(DataAttribute::EncryptionKey)
            .is_none());

        let mut buf = Vec::new();
        encoder.encode_to(&mut buf, &pages()).unwrap();

        let decoder_factory =
            DecryptingQueryDataDecoderFactory::new(Arc::new(JsonQueryDataDecoderFactory));
        let decoder = decoder_factory.create(&DataAttributes::empty()).unwrap();
        let rows = decoder
            .decode(&mut buf.as_slice(), &DataAttributes::empty())
            .unwrap()
            .into_vec();
        assert_eq!(rows, vec![vec![json!(7), json!("row")]]);
    }

    #[test]
    fn key_text_round_trip() {
        let key = [9u8; ENCRYPTION_KEY_LEN];
        let serialized = serialize_key(&key);
        assert_eq!(deserialize_key(&serialized, CIPHER_NAME).unwrap(), key);
        assert!(matches!(
            deserialize_key(&serialized, "AES"),
            Err(ProtocolError::InvalidKey(_))
        ));
    }
}
