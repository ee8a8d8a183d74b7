//! The authoritative party/site catalog, and the replication primitives
//! every site uses to keep an eventually-consistent local view of it
//!.

pub mod client;
pub mod error;
pub mod objects;
pub mod replication;
pub mod store;

pub use client::RegistryClient;
pub use error::RegistryError;
pub use objects::{Party, RegisteredObject, Site};
pub use replication::{CanonicalStore, Event, Keyed, Op, Replica, ReplicationServer, UpdateSource, UpdatesResponse};
pub use store::Registry;
