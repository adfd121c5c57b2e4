//! zrpc Client
//!
//! Two layers of client:
//!
//! - [`Client`] owns one connection and multiplexes concurrent calls
//!   over it, correlating responses by sequence number.
//! - [`XClient`] owns a pool of `Client`s keyed by `network@address`
//!   and resolves a target for every call from the registry.
//!
//! # Example
//!
//! ```no_run
//! use zrpc_client::XClient;
//! use zrpc_common::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i64, b: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> zrpc_common::Result<()> {
//! let xc = XClient::new(
//!     "http://127.0.0.1:9999/registry",
//!     "RoundRobin",
//!     Options::default(),
//!     None,
//! );
//! let sum: i64 = xc.call("Arith.Sum", &Args { a: 1, b: 2 }, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod xclient;

pub use client::{Call, Client};
pub use xclient::XClient;
