//! Shared data model and codecs for the Silo spooled-result protocol.
//!
//! A query response is sliced into segments. Each segment either carries its
//! encoded bytes inline or points at externally stored bytes through an
//! opaque URI. This crate defines the attribute bag attached to every
//! segment, the columnar page collaborator types, and the composable
//! encoder/decoder pipeline (base format, compression, encryption) shared by
//! the coordinator and the client.

pub mod attributes;
pub mod encoding;
pub mod error;
pub mod page;
pub mod segment;
pub mod session;

pub use attributes::{DataAttribute, DataAttributes};
pub use error::ProtocolError;
pub use page::{Page, QueryResultRows, SpooledBlock};
pub use segment::{EncodedQueryData, QueryData, Segment};
pub use session::Session;
