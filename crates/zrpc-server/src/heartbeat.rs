//! Registry heartbeat.
//!
//! POSTs the server's address and method list to the registry, once at
//! startup and then on every period tick. The loop stops on the first
//! failed POST.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use zrpc_common::protocol::{DEFAULT_REGISTRY_TIMEOUT, HEADER_SERVERS, HEADER_SERVICES};
use zrpc_common::Result;

use crate::server::Server;

pub(crate) async fn run(server: Arc<Server>, period: Option<Duration>) {
    let period = period.unwrap_or_else(default_period);

    if let Err(e) = send_heartbeat(&server).await {
        warn!("rpc server: heartbeat error: {}", e);
        return;
    }

    let mut ticker = tokio::time::interval(period);
    ticker.tick().await; // the first tick completes immediately
    loop {
        ticker.tick().await;
        if let Err(e) = send_heartbeat(&server).await {
            warn!("rpc server: heartbeat error: {}", e);
            return;
        }
    }
}

/// Registry timeout minus a minute, clamped to stay positive.
fn default_period() -> Duration {
    DEFAULT_REGISTRY_TIMEOUT
        .checked_sub(Duration::from_secs(60))
        .filter(|period| !period.is_zero())
        .unwrap_or(Duration::from_secs(1))
}

async fn send_heartbeat(server: &Server) -> Result<()> {
    debug!(
        "{} send heartbeat to registry {}",
        server.self_addr(),
        server.register_addr()
    );
    let client = reqwest::Client::new();
    client
        .post(server.register_addr())
        .header(HEADER_SERVERS, server.self_addr())
        .header(HEADER_SERVICES, server.methods().join(","))
        .send()
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_period_stays_under_registry_timeout() {
        let period = default_period();
        assert!(!period.is_zero());
        assert!(period < DEFAULT_REGISTRY_TIMEOUT);
        assert_eq!(period, Duration::from_secs(4 * 60));
    }
}
