//! zrpc Registry
//!
//! The discovery side of zrpc: servers POST periodic heartbeats naming
//! the methods they host, clients GET a single picked server per call.
//! Selection is delegated to a named balancer strategy; stale servers
//! are evicted lazily when a lookup touches them.
//!
//! # Components
//!
//! - [`registry`] - Heartbeat tables and liveness-filtered lookup
//! - [`balancer`] - Selection strategies (random, round-robin,
//!   consistent hash) and the process-wide strategy set
//! - [`http`] - The `/registry` axum endpoint

pub mod balancer;
pub mod http;
pub mod registry;

pub use balancer::{default_balancer_set, Balancer, BalancerSet};
pub use registry::Registry;
