//! Columnar page collaborator types and the spooling metadata sentinel.
//!
//! The execution engine hands the protocol ordered pages of row data. A page
//! that was already spooled downstream travels as a sentinel: exactly one
//! position, every output channel null, and a trailing metadata channel
//! holding the serialized [`SpooledBlock`]. Violating that shape is
//! protocol-level corruption, not a recoverable condition.

use serde_json::{json, Value};

use crate::attributes::DataAttributes;
use crate::error::ProtocolError;

/// A minimal columnar result page: equally sized channels of nullable values.
#[derive(Clone, Debug, PartialEq)]
pub struct Page {
    channels: Vec<Vec<Value>>,
}

impl Page {
    /// Build a page from channels. All channels must share one length.
    pub fn new(channels: Vec<Vec<Value>>) -> Self {
        if let Some(first) = channels.first() {
            let positions = first.len();
            assert!(
                channels.iter().all(|channel| channel.len() == positions),
                "page channels must have equal position counts"
            );
        }
        Self { channels }
    }

    /// Build a page from row-major values.
    pub fn from_rows(rows: &[Vec<Value>]) -> Self {
        let channel_count = rows.first().map(Vec::len).unwrap_or(0);
        let mut channels = vec![Vec::with_capacity(rows.len()); channel_count];
        for row in rows {
            assert_eq!(row.len(), channel_count, "rows must have equal widths");
            for (channel, value) in channels.iter_mut().zip(row) {
                channel.push(value.clone());
            }
        }
        Self { channels }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn position_count(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Value at (channel, position). Nulls are `Value::Null`.
    pub fn value(&self, channel: usize, position: usize) -> &Value {
        &self.channels[channel][position]
    }

    /// Extract row-major values for the first `output_channels` channels.
    pub fn rows(&self, output_channels: usize) -> Vec<Vec<Value>> {
        let width = output_channels.min(self.channel_count());
        (0..self.position_count())
            .map(|position| {
                (0..width)
                    .map(|channel| self.channels[channel][position].clone())
                    .collect()
            })
            .collect()
    }

    /// Append a channel of nulls so the page lines up with metadata pages.
    pub fn append_null_metadata_channel(&self) -> Page {
        let mut channels = self.channels.clone();
        channels.push(vec![Value::Null; self.position_count()]);
        Page { channels }
    }
}

/// Ordered result pages for one query response.
#[derive(Clone, Debug)]
pub struct QueryResultRows {
    /// Number of client-visible output channels; pages may carry one extra
    /// trailing metadata channel.
    pub output_columns: usize,
    pub pages: Vec<Page>,
}

impl QueryResultRows {
    pub fn new(output_columns: usize, pages: Vec<Page>) -> Self {
        Self {
            output_columns,
            pages,
        }
    }

    /// True when no page carries any position.
    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|page| page.position_count() == 0)
    }
}

/// Coordinator-internal pointer at an already spooled segment, carried in the
/// trailing metadata channel of a sentinel page.
#[derive(Clone, Debug, PartialEq)]
pub struct SpooledBlock {
    /// Opaque segment identifier, resolvable against the segment resource.
    pub identifier: String,
    /// Attributes recorded when the segment was written.
    pub attributes: DataAttributes,
}

impl SpooledBlock {
    pub fn new(identifier: impl Into<String>, attributes: DataAttributes) -> Self {
        Self {
            identifier: identifier.into(),
            attributes,
        }
    }

    /// True when the page shape declares spooling metadata: one extra
    /// trailing channel, a single position, and a non-null metadata value.
    pub fn has_spooling_metadata(page: &Page, output_columns: usize) -> bool {
        page.channel_count() == output_columns + 1
            && page.position_count() == 1
            && !page.value(output_columns, 0).is_null()
    }

    /// Serialize into the metadata channel value.
    pub fn serialize(&self) -> Value {
        json!([self.identifier, self.attributes.serialize()])
    }

    /// Build a sentinel page: `output_columns` null channels plus the
    /// metadata channel, all with a single position.
    pub fn to_metadata_page(&self, output_columns: usize) -> Page {
        let mut channels = vec![vec![Value::Null]; output_columns];
        channels.push(vec![self.serialize()]);
        Page::new(channels)
    }

    /// Decode a sentinel page, enforcing the protocol shape invariants.
    pub fn deserialize(page: &Page) -> Result<Self, ProtocolError> {
        if page.position_count() != 1 {
            return Err(ProtocolError::MalformedMetadataPage(
                "spooling metadata block must have a single position",
            ));
        }
        let metadata_channel = page.channel_count() - 1;
        for channel in 0..metadata_channel {
            if !page.value(channel, 0).is_null() {
                return Err(ProtocolError::MalformedMetadataPage(
                    "spooling metadata block must have all but last channels null",
                ));
            }
        }

        let payload = page.value(metadata_channel, 0);
        let fields = payload.as_array().filter(|fields| fields.len() == 2);
        let (identifier, attributes) = match fields {
            Some(fields) => match (fields[0].as_str(), fields[1].as_str()) {
                (Some(identifier), Some(attributes)) => (identifier, attributes),
                _ => {
                    return Err(ProtocolError::MalformedMetadataPage(
                        "spooling metadata block has a malformed payload",
                    ))
                }
            },
            None => {
                return Err(ProtocolError::MalformedMetadataPage(
                    "spooling metadata block has a malformed payload",
                ))
            }
        };

        Ok(SpooledBlock {
            identifier: identifier.to_string(),
            attributes: DataAttributes::deserialize(attributes)?,
        })
    }
}
