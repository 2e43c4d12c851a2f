//! Decoder registry keyed by encoding id.
//!
//! Built once at process start and passed by reference to consumers. Only
//! base formats are registered; compressed variants like `json+zstd` are
//! composed at lookup from the base factory and the suffix. Every factory
//! handed out is wrapped in the decrypting stage, which activates only when
//! the response attributes declare an encryption key.

use std::collections::HashMap;
use std::sync::Arc;

use crate::encoding::compression::{Compression, CompressedQueryDataDecoderFactory};
use crate::encoding::encryption::DecryptingQueryDataDecoderFactory;
use crate::encoding::json::JsonQueryDataDecoderFactory;
use crate::encoding::{split_encoding_id, QueryDataDecoderFactory};
use crate::error::ProtocolError;

/// Registry of base-format decoder factories, unique per encoding id.
pub struct DecoderRegistry {
    factories: HashMap<String, Arc<dyn QueryDataDecoderFactory>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the `json` base format.
    pub fn standard() -> Result<Self, ProtocolError> {
        let mut registry = Self::new();
        registry.register(Arc::new(JsonQueryDataDecoderFactory))?;
        Ok(registry)
    }

    /// Register a base-format factory. Duplicate ids are a startup-time
    /// fatal error.
    pub fn register(
        &mut self,
        factory: Arc<dyn QueryDataDecoderFactory>,
    ) -> Result<(), ProtocolError> {
        let encoding_id = factory.encoding_id();
        if self.factories.contains_key(&encoding_id) {
            return Err(ProtocolError::DuplicateEncoding(encoding_id));
        }
        self.factories.insert(encoding_id, factory);
        Ok(())
    }

    /// Look up the factory for an encoding id, composing the compression
    /// stage from the id's suffix and wrapping the result in the decrypting
    /// stage.
    pub fn get(
        &self,
        encoding_id: &str,
    ) -> Result<Arc<dyn QueryDataDecoderFactory>, ProtocolError> {
        let (base, suffix) = split_encoding_id(encoding_id);
        let base_factory = self
            .factories
            .get(base)
            .ok_or_else(|| ProtocolError::UnknownEncoding(encoding_id.to_string()))?
            .clone();
        let factory: Arc<dyn QueryDataDecoderFactory> = match suffix {
            None => base_factory,
            Some(suffix) => {
                let compression = Compression::from_suffix(suffix)
                    .ok_or_else(|| ProtocolError::UnknownEncoding(encoding_id.to_string()))?;
                Arc::new(CompressedQueryDataDecoderFactory::new(
                    base_factory,
                    compression,
                ))
            }
        };
        Ok(Arc::new(DecryptingQueryDataDecoderFactory::new(factory)))
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_serves_all_variants() {
        let registry = DecoderRegistry::standard().unwrap();
        for id in ["json", "json+zstd", "json+lz4", "json+snappy"] {
            let factory = registry.get(id).unwrap();
            assert_eq!(factory.encoding_id(), id);
        }
    }

    #[test]
    fn compressed_variants_compose_from_the_base_registration() {
        // One registered base is enough to serve every suffix.
        let mut registry = DecoderRegistry::new();
        registry
            .register(Arc::new(JsonQueryDataDecoderFactory))
            .unwrap();
        assert_eq!(registry.get("json+lz4").unwrap().encoding_id(), "json+lz4");
        assert_eq!(
            registry.get("json+snappy").unwrap().encoding_id(),
            "json+snappy"
        );
    }

    #[test]
    fn unknown_id_fails() {
        let registry = DecoderRegistry::standard().unwrap();
        // Unknown suffix on a known base.
        assert!(matches!(
            registry.get("json+brotli"),
            Err(ProtocolError::UnknownEncoding(_))
        ));
        // Unknown base with a known suffix.
        assert!(matches!(
            registry.get("csv+zstd"),
            Err(ProtocolError::UnknownEncoding(_))
        ));
        // Ids are case-sensitive.
        assert!(registry.get("JSON").is_err());
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = DecoderRegistry::standard().unwrap();
        let err = registry
            .register(Arc::new(JsonQueryDataDecoderFactory))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateEncoding(id) if id == "json"));
    }
}
