//! zrpc Server
//!
//! Registers services and serves framed RPC connections.
//!
//! A service is a named set of typed methods over a shared receiver;
//! the server dispatches `Service.Method` requests to them, runs each
//! request concurrently under the per-call timeout negotiated in the
//! handshake, and heartbeats its method list to the registry.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use serde::{Deserialize, Serialize};
//! use zrpc_server::{Server, Service};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i64, b: i64 }
//!
//! struct Arith;
//!
//! # #[tokio::main]
//! # async fn main() -> zrpc_common::Result<()> {
//! let service = Service::builder(Arith)?
//!     .method("Sum", |_arith: &Arith, args: Args| Ok(args.a + args.b))
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
//! let addr = format!("tcp@{}", listener.local_addr()?);
//! let server = Arc::new(Server::new("http://127.0.0.1:9999/registry", addr));
//! server.register(service)?;
//! server.listen(listener, None).await;
//! # Ok(())
//! # }
//! ```

mod heartbeat;
pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodDescriptor, Service, ServiceBuilder};
