// mcache-common - Shared types for the MeshCache cluster
//
// This crate defines the error taxonomy, node identity, the command/response
// model exchanged with the wire layer, and the ring hash functions.

pub mod command;
pub mod error;
pub mod hash;
pub mod types;

// Re-export for convenience
pub use command::{Command, Payload, Response};
pub use error::{CacheError, CacheResult};
pub use hash::HashAlgorithm;
pub use types::{CacheNode, DataType, NodeStatus};
