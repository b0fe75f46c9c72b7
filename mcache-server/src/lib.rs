// mcache-server - MeshCache node server
//
// RESP2 TCP front end, HTTP health surface, and the wiring that turns CLI
// flags and environment variables into a running cluster node.

pub mod bootstrap;
pub mod config;
pub mod http;
pub mod protocol;
pub mod server;

pub use bootstrap::{build_node, Node};
pub use config::{ServerArgs, ServerConfig};
pub use server::{handle_connection, ServerContext};
