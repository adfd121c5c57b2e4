//! zrpc — a small RPC runtime.
//!
//! This umbrella crate re-exports the workspace members:
//!
//! - [`common`] — protocol types, error type, and the framed record codec
//! - [`server`] — service registration and the serving loop
//! - [`client`] — the single-connection multiplexer and the
//!   discovery-aware client pool
//! - [`registry`] — balancer strategies and the HTTP registry service
//!
//! # Example
//!
//! ```no_run
//! use zrpc::client::Client;
//! use zrpc::common::Options;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i64, b: i64 }
//!
//! # #[tokio::main]
//! # async fn main() -> zrpc::common::Result<()> {
//! let client = Client::dial("tcp", "127.0.0.1:9001", None, Options::default()).await?;
//! let sum: i64 = client.call("Arith.Sum", &Args { a: 1, b: 2 }, None).await?;
//! assert_eq!(sum, 3);
//! # Ok(())
//! # }
//! ```

pub use zrpc_client as client;
pub use zrpc_common as common;
pub use zrpc_registry as registry;
pub use zrpc_server as server;
