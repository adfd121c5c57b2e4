//! Core protocol types: the connection handshake, the record header,
//! rpc addresses, and the wire constants shared by client, server, and
//! registry.

pub mod error;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use error::RpcError;

/// Marks the first record on a connection as a zrpc handshake.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Path a client CONNECTs to when tunnelling over HTTP.
pub const DEFAULT_RPC_PATH: &str = "/zrpc";

/// Response line the server answers a CONNECT with, terminated by a
/// blank line on the wire.
pub const CONNECTED: &str = "HTTP/1.0 200 Connected to Gee RPC";

/// Path the registry service is mounted at.
pub const REGISTRY_PATH: &str = "/registry";

/// Servers whose last heartbeat is older than this are considered stale.
pub const DEFAULT_REGISTRY_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single handler invocation unless the handshake says
/// otherwise.
pub const DEFAULT_MAX_CALL_TIME: Duration = Duration::from_secs(10);

/// Header carrying a server address, on heartbeat POSTs and discovery
/// responses.
pub const HEADER_SERVERS: &str = "X-Zrpc-Servers";

/// Header carrying one or more `Service.Method` names.
pub const HEADER_SERVICES: &str = "X-Zrpc-Services";

/// Header carrying the selection-strategy name on discovery GETs.
pub const HEADER_MODE: &str = "X-Zrpc-Mode";

/// Connection handshake, sent by the client as one JSON line before any
/// framed traffic.
///
/// The server rejects the connection outright when the magic number or
/// codec name is unknown; `max_call_time_ms` becomes the server's
/// per-request timeout for the connection (zero disables it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Options {
    pub magic: u32,
    pub codec: String,
    pub max_call_time_ms: u64,
}

impl Options {
    /// Handshake with the given per-request timeout and the default
    /// codec.
    pub fn with_max_call_time(max_call_time: Duration) -> Self {
        Self {
            max_call_time_ms: max_call_time.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn max_call_time(&self) -> Duration {
        Duration::from_millis(self.max_call_time_ms)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            magic: MAGIC_NUMBER,
            codec: crate::codec::CodecKind::Json.name().to_string(),
            max_call_time_ms: DEFAULT_MAX_CALL_TIME.as_millis() as u64,
        }
    }
}

/// Record header, paired with a body frame.
///
/// Requests carry an empty `error`; responses carry the failure text
/// there, with the body left undecoded by the receiver when it is
/// non-empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Header {
    pub service_method: String,
    pub seq: u64,
    #[serde(default)]
    pub error: String,
}

impl Header {
    pub fn request(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }
}

/// A `network@address` pair, e.g. `tcp@127.0.0.1:9001`.
///
/// The network selects the dial path: `tcp` is a plain connection,
/// `http` tunnels through a CONNECT upgrade first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RpcAddr {
    pub network: String,
    pub addr: String,
}

impl FromStr for RpcAddr {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('@') {
            Some((network, addr)) if !network.is_empty() && !addr.is_empty() => Ok(Self {
                network: network.to_string(),
                addr: addr.to_string(),
            }),
            _ => Err(RpcError::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for RpcAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.network, self.addr)
    }
}
