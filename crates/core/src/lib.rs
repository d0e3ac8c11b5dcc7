//! Shared vocabulary for the ingestion and result gateways.
//!
//! Everything here is plain data: entity kinds, query/client identifiers,
//! the routing and EOF multiplicity tables, and the TOML configuration that
//! builds them. Networking lives in `ipc` and `gateway`.

pub mod config;
mod domain;
mod error;
pub mod routing;

pub use config::Config;
pub use domain::{ClientId, EntityKind, QueryId, queries};
pub use error::ConfigError;
pub use routing::{EofMultiplicity, RoutingTable};
