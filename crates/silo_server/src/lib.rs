//! Coordinator-side spooling logic.
//!
//! The producer slices result pages into segments, the bridge hides
//! backend-specific handles behind encrypted URI identifiers, and the
//! segment resource serves the redirect/stream/acknowledge surface that
//! clients dereference handles against.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod filesystem;
pub mod http;
pub mod producer;
pub mod resource;

pub use backend::{SegmentHandle, SpoolingBackend, SpoolingContext};
pub use bridge::SpoolingManagerBridge;
pub use config::SpoolingConfig;
pub use filesystem::FileSystemSpoolingBackend;
pub use producer::QueryDataProducer;
pub use resource::{ClusterNodes, NodeLocation, SegmentDownload, SegmentResource};
