//! Client-side loading of spooled result segments.
//!
//! A spooled segment is fetched by its opaque URI and read as a byte
//! stream. Closing the stream acknowledges the segment with a
//! fire-and-forget `DELETE`; segments are consumed exactly once.

pub mod loader;

pub use loader::{SegmentLoader, SegmentStream};
