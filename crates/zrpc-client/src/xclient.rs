//! Discovery-aware client pool.
//!
//! Resolves a server for every call by asking the registry, then routes
//! the call through a pooled [`Client`] for that address. Pooled
//! clients that went unavailable are closed, evicted, and re-dialled.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::debug;

use zrpc_common::protocol::{HEADER_MODE, HEADER_SERVERS, HEADER_SERVICES};
use zrpc_common::{Options, Result, RpcAddr};

use crate::client::Client;

/// A pool of clients keyed by `network@address`, fronted by registry
/// discovery.
pub struct XClient {
    mode: String,
    options: Options,
    dial_timeout: Option<Duration>,
    registry_addr: String,
    http_client: reqwest::Client,
    clients: Mutex<HashMap<String, Client>>,
}

impl XClient {
    /// Creates a pool asking `registry_addr` (the registry URL) with
    /// selection strategy `mode` for every call.
    pub fn new(
        registry_addr: impl Into<String>,
        mode: impl Into<String>,
        options: Options,
        dial_timeout: Option<Duration>,
    ) -> Self {
        Self {
            mode: mode.into(),
            options,
            dial_timeout,
            registry_addr: registry_addr.into(),
            http_client: reqwest::Client::new(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Asks the registry for a server hosting `service_method`,
    /// returning its `network@address`. The answer is the registry's
    /// header value verbatim; an empty answer fails at dial time.
    pub async fn discover(&self, service_method: &str) -> Result<String> {
        let resp = self
            .http_client
            .get(&self.registry_addr)
            .header(HEADER_SERVICES, service_method)
            .header(HEADER_MODE, &self.mode)
            .send()
            .await?;
        let target = resp
            .headers()
            .get(HEADER_SERVERS)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        debug!(service_method, %target, "discovered");
        Ok(target)
    }

    /// Discovers a server and calls it.
    pub async fn call<A, Reply>(
        &self,
        service_method: &str,
        args: &A,
        timeout: Option<Duration>,
    ) -> Result<Reply>
    where
        A: Serialize,
        Reply: DeserializeOwned,
    {
        let rpc_addr = self.discover(service_method).await?;
        let client = self.client_for(&rpc_addr).await?;
        client.call(service_method, args, timeout).await
    }

    /// Closes every pooled client and empties the pool.
    pub async fn close(&self) -> Result<()> {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
        Ok(())
    }

    async fn client_for(&self, rpc_addr: &str) -> Result<Client> {
        let parsed: RpcAddr = rpc_addr.parse()?;
        let mut clients = self.clients.lock().await;

        if let Some(existing) = clients.get(rpc_addr) {
            if existing.is_available() {
                return Ok(existing.clone());
            }
            let stale = clients.remove(rpc_addr);
            if let Some(stale) = stale {
                let _ = stale.close().await;
            }
        }

        let client = Client::dial(
            &parsed.network,
            &parsed.addr,
            self.dial_timeout,
            self.options.clone(),
        )
        .await?;
        clients.insert(rpc_addr.to_string(), client.clone());
        Ok(client)
    }
}
