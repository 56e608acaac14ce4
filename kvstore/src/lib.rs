//! The concrete application built on top of the `raft` consensus core:
//! configuration, a TCP transport for both the peer and client RPC
//! surfaces, and a CLI binary that wires them together (SPEC_FULL.md §4.10,
//! §4.11).
//!
//! The consensus semantics live entirely in the `raft` crate; everything
//! here is the "external collaborators" layer spec.md explicitly calls out
//! as out of scope for the core itself, made concrete so the workspace
//! produces a runnable server.

pub mod config;
pub mod transport;

pub use config::NodeConfig;
pub use transport::ClientResponse;
pub use transport::ClientServer;
pub use transport::KvClient;
pub use transport::PeerServer;
pub use transport::TcpRaftNetwork;
