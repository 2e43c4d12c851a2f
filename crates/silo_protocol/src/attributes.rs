//! Typed key/value attribute bags attached to query-result segments.
//!
//! Attributes travel with every segment descriptor and, for spooled pages,
//! inside the sentinel metadata channel. The wire form is a comma-separated
//! list of `name:value` pairs with no escaping, so values must never contain
//! the delimiter characters.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::ProtocolError;

/// Well-known attribute names understood by both ends of the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataAttribute {
    /// Number of rows carried by the segment.
    RowsCount,
    /// Cumulative row count of all earlier segments in the response.
    RowOffset,
    /// Encoded payload size in bytes.
    ByteSize,
    /// Target segment size used when the segment was produced.
    SegmentSize,
    /// Transport-safe serialized per-query encryption key.
    EncryptionKey,
    /// Cipher the per-query key belongs to.
    EncryptionCipherName,
    /// Expiration horizon of the backing storage object.
    ExpiresAt,
}

impl DataAttribute {
    /// Wire name of the attribute.
    pub fn name(&self) -> &'static str {
        match self {
            DataAttribute::RowsCount => "rows_count",
            DataAttribute::RowOffset => "row_offset",
            DataAttribute::ByteSize => "byte_size",
            DataAttribute::SegmentSize => "segment_size",
            DataAttribute::EncryptionKey => "encryption_key",
            DataAttribute::EncryptionCipherName => "encryption_cipher_name",
            DataAttribute::ExpiresAt => "expires_at",
        }
    }

    /// Resolve a wire name back to the attribute, if known.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "rows_count" => Some(DataAttribute::RowsCount),
            "row_offset" => Some(DataAttribute::RowOffset),
            "byte_size" => Some(DataAttribute::ByteSize),
            "segment_size" => Some(DataAttribute::SegmentSize),
            "encryption_key" => Some(DataAttribute::EncryptionKey),
            "encryption_cipher_name" => Some(DataAttribute::EncryptionCipherName),
            "expires_at" => Some(DataAttribute::ExpiresAt),
            _ => None,
        }
    }

    /// Whether values of this attribute are numeric on the wire.
    fn is_numeric(&self) -> bool {
        matches!(
            self,
            DataAttribute::RowsCount
                | DataAttribute::RowOffset
                | DataAttribute::ByteSize
                | DataAttribute::SegmentSize
        )
    }
}

impl fmt::Display for DataAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
enum AttributeValue {
    Long(i64),
    Text(String),
}

/// Immutable mapping of well-known attribute names to typed values.
///
/// Values read back with the exact semantic type they were written with;
/// absent optional attributes yield `None` rather than failing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DataAttributes {
    values: BTreeMap<DataAttribute, AttributeValue>,
}

impl DataAttributes {
    /// Start building a new attribute bag.
    pub fn builder() -> DataAttributesBuilder {
        DataAttributesBuilder {
            values: BTreeMap::new(),
        }
    }

    /// Builder seeded with this bag's contents.
    pub fn to_builder(&self) -> DataAttributesBuilder {
        DataAttributesBuilder {
            values: self.values.clone(),
        }
    }

    /// An empty bag.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn contains(&self, attribute: DataAttribute) -> bool {
        self.values.contains_key(&attribute)
    }

    /// Fetch a numeric attribute, failing if absent or non-numeric.
    pub fn get_i64(&self, attribute: DataAttribute) -> Result<i64, ProtocolError> {
        match self.values.get(&attribute) {
            Some(AttributeValue::Long(value)) => Ok(*value),
            Some(AttributeValue::Text(_)) => Err(ProtocolError::AttributeType(attribute.name())),
            None => Err(ProtocolError::MissingAttribute(attribute.name())),
        }
    }

    /// Fetch a text attribute, failing if absent or non-text.
    pub fn get_str(&self, attribute: DataAttribute) -> Result<&str, ProtocolError> {
        match self.values.get(&attribute) {
            Some(AttributeValue::Text(value)) => Ok(value),
            Some(AttributeValue::Long(_)) => Err(ProtocolError::AttributeType(attribute.name())),
            None => Err(ProtocolError::MissingAttribute(attribute.name())),
        }
    }

    /// Fetch a numeric attribute if present.
    pub fn get_opt_i64(&self, attribute: DataAttribute) -> Option<i64> {
        match self.values.get(&attribute) {
            Some(AttributeValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    /// Fetch a text attribute if present.
    pub fn get_opt_str(&self, attribute: DataAttribute) -> Option<&str> {
        match self.values.get(&attribute) {
            Some(AttributeValue::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Serialize to the `name1:value1,name2:value2` wire form.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for (attribute, value) in &self.values {
            if !out.is_empty() {
                out.push(',');
            }
            out.push_str(attribute.name());
            out.push(':');
            match value {
                AttributeValue::Long(v) => out.push_str(&v.to_string()),
                AttributeValue::Text(v) => out.push_str(v),
            }
        }
        out
    }

    /// Parse the wire form. Unparseable fragments are a protocol error.
    pub fn deserialize(input: &str) -> Result<Self, ProtocolError> {
        let mut builder = Self::builder();
        for fragment in input.split(',') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            let (name, value) = fragment
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedAttribute(fragment.to_string()))?;
            let attribute = DataAttribute::from_name(name)
                .ok_or_else(|| ProtocolError::MalformedAttribute(fragment.to_string()))?;
            if attribute.is_numeric() {
                let parsed: i64 = value
                    .parse()
                    .map_err(|_| ProtocolError::MalformedAttribute(fragment.to_string()))?;
                builder = builder.set_i64(attribute, parsed);
            } else {
                builder = builder.set_str(attribute, value);
            }
        }
        Ok(builder.build())
    }
}

/// Builder producing an immutable [`DataAttributes`] snapshot.
#[derive(Clone, Debug, Default)]
pub struct DataAttributesBuilder {
    values: BTreeMap<DataAttribute, AttributeValue>,
}

impl DataAttributesBuilder {
    pub fn set_i64(mut self, attribute: DataAttribute, value: i64) -> Self {
        self.values.insert(attribute, AttributeValue::Long(value));
        self
    }

    pub fn set_str(mut self, attribute: DataAttribute, value: impl Into<String>) -> Self {
        let value = value.into();
        // The wire form has no escaping; a delimiter inside a value is a bug
        // at the call site, not something we can represent.
        debug_assert!(
            !value.contains(',') && !value.contains(':'),
            "attribute value must not contain ',' or ':'"
        );
        self.values.insert(attribute, AttributeValue::Text(value));
        self
    }

    /// Merge every attribute of `other`, overwriting on conflict.
    pub fn merge(mut self, other: &DataAttributes) -> Self {
        for (attribute, value) in &other.values {
            self.values.insert(*attribute, value.clone());
        }
        self
    }

    pub fn build(self) -> DataAttributes {
        DataAttributes {
            values: self.values,
        }
    }
}
