//! The `/registry` HTTP endpoint.
//!
//! Servers POST heartbeats (`X-Zrpc-Servers`: their address,
//! `X-Zrpc-Services`: comma-joined method names); clients GET a pick
//! for one method (`X-Zrpc-Services`, `X-Zrpc-Mode`), answered in the
//! `X-Zrpc-Servers` response header. The requester's socket address is
//! the consistent-hash key.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info};

use zrpc_common::protocol::{HEADER_MODE, HEADER_SERVERS, HEADER_SERVICES, REGISTRY_PATH};
use zrpc_common::Result;

use crate::registry::Registry;

/// Builds the registry router. Methods other than GET and POST on the
/// registry path are answered with 405.
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route(REGISTRY_PATH, get(handle_get).post(handle_post))
        .with_state(registry)
}

/// Serves the registry on an already-bound listener.
pub async fn serve(registry: Arc<Registry>, listener: TcpListener) -> Result<()> {
    info!("registry listening on {}", listener.local_addr()?);
    axum::serve(
        listener,
        router(registry).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

async fn handle_get(
    State(registry): State<Arc<Registry>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> (StatusCode, HeaderMap) {
    let method = header_str(&headers, HEADER_SERVICES);
    let mode = header_str(&headers, HEADER_MODE);

    let target = registry
        .pick(mode, method, &peer.to_string())
        .unwrap_or_default();
    debug!(%peer, method, mode, %target, "discovery lookup");

    let mut out = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&target) {
        out.insert(HeaderName::from_static("x-zrpc-servers"), value);
    }
    (StatusCode::OK, out)
}

async fn handle_post(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let addr = header_str(&headers, HEADER_SERVERS);
    if addr.is_empty() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    let methods: Vec<String> = header_str(&headers, HEADER_SERVICES)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    debug!(addr, count = methods.len(), "heartbeat");
    registry.put_server(addr, methods);
    StatusCode::OK
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
