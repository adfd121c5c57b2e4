//! Heartbeat tables and liveness-filtered lookup.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use zrpc_common::protocol::DEFAULT_REGISTRY_TIMEOUT;

use crate::balancer::{default_balancer_set, BalancerSet};

/// A registered server and its last heartbeat.
struct ServerItem {
    last_heartbeat: Instant,
}

/// Registry tables. One lock guards all three; the invariant is that
/// `addr ∈ services[m]` iff `m ∈ server_to_services[addr]`.
struct Tables {
    servers: HashMap<String, ServerItem>,
    services: HashMap<String, HashSet<String>>,
    server_to_services: HashMap<String, Vec<String>>,
}

/// The service registry.
///
/// Servers POST heartbeats naming the methods they host; clients GET a
/// picked server for one method. A server whose heartbeat is older than
/// the timeout is stale, and is evicted the next time a lookup touches
/// a method it used to provide.
pub struct Registry {
    timeout: Duration,
    tables: Mutex<Tables>,
    balancers: &'static BalancerSet,
}

impl Registry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_REGISTRY_TIMEOUT)
    }

    /// A registry with a custom staleness timeout. Zero disables
    /// expiry.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            tables: Mutex::new(Tables {
                servers: HashMap::new(),
                services: HashMap::new(),
                server_to_services: HashMap::new(),
            }),
            balancers: default_balancer_set(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Registers a server or refreshes its heartbeat, replacing its
    /// service list and the reverse index with the provided one.
    pub fn put_server(&self, addr: &str, methods: Vec<String>) {
        let mut tables = self.tables.lock().unwrap();

        if let Some(old) = tables.server_to_services.remove(addr) {
            for method in old {
                let emptied = match tables.services.get_mut(&method) {
                    Some(set) => {
                        set.remove(addr);
                        set.is_empty()
                    }
                    None => false,
                };
                if emptied {
                    tables.services.remove(&method);
                }
            }
        }

        for method in &methods {
            tables
                .services
                .entry(method.clone())
                .or_default()
                .insert(addr.to_string());
        }
        tables.server_to_services.insert(addr.to_string(), methods);
        tables
            .servers
            .entry(addr.to_string())
            .and_modify(|s| s.last_heartbeat = Instant::now())
            .or_insert(ServerItem {
                last_heartbeat: Instant::now(),
            });
    }

    /// The sorted addresses hosting `method` whose heartbeat is within
    /// the timeout. Stale servers touched by the lookup are evicted
    /// from every table.
    pub fn alive_servers(&self, method: &str) -> Vec<String> {
        let mut tables = self.tables.lock().unwrap();
        let now = Instant::now();

        let candidates: Vec<String> = tables
            .services
            .get(method)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        let mut alive = Vec::new();
        for addr in candidates {
            let fresh = tables
                .servers
                .get(&addr)
                .map(|s| {
                    self.timeout.is_zero() || now.duration_since(s.last_heartbeat) < self.timeout
                })
                .unwrap_or(false);
            if fresh {
                alive.push(addr);
            } else {
                evict(&mut tables, &addr);
            }
        }
        alive.sort();
        alive
    }

    /// Resolves one server for a client: liveness filter, then the
    /// named balancer strategy.
    pub fn pick(&self, mode: &str, method: &str, client_addr: &str) -> Option<String> {
        let alive = self.alive_servers(method);
        if alive.is_empty() {
            return None;
        }
        self.balancers.pick(mode, method, client_addr, &alive)
    }

    /// Whether `addr` is present in the server table.
    pub fn contains_server(&self, addr: &str) -> bool {
        self.tables.lock().unwrap().servers.contains_key(addr)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

fn evict(tables: &mut Tables, addr: &str) {
    if let Some(methods) = tables.server_to_services.remove(addr) {
        for method in methods {
            let emptied = match tables.services.get_mut(&method) {
                Some(set) => {
                    set.remove(addr);
                    set.is_empty()
                }
                None => false,
            };
            if emptied {
                tables.services.remove(&method);
            }
        }
    }
    tables.servers.remove(addr);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn methods(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_put_and_lookup() {
        let registry = Registry::new();
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum", "Foo.Sleep"]));
        registry.put_server("tcp@s2:1", methods(&["Foo.Sum"]));

        assert_eq!(
            registry.alive_servers("Foo.Sum"),
            vec!["tcp@s1:1".to_string(), "tcp@s2:1".to_string()]
        );
        assert_eq!(registry.alive_servers("Foo.Sleep"), vec!["tcp@s1:1".to_string()]);
        assert!(registry.alive_servers("Foo.Missing").is_empty());
    }

    #[test]
    fn test_heartbeat_replaces_service_list() {
        let registry = Registry::new();
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum", "Foo.Sleep"]));
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));

        assert_eq!(registry.alive_servers("Foo.Sum"), vec!["tcp@s1:1".to_string()]);
        assert!(registry.alive_servers("Foo.Sleep").is_empty());
    }

    #[test]
    fn test_stale_server_is_evicted_lazily() {
        let registry = Registry::with_timeout(Duration::from_millis(20));
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));
        assert!(registry.contains_server("tcp@s1:1"));

        std::thread::sleep(Duration::from_millis(40));

        assert!(registry.alive_servers("Foo.Sum").is_empty());
        assert!(!registry.contains_server("tcp@s1:1"));
    }

    #[test]
    fn test_heartbeat_refresh_keeps_server_alive() {
        let registry = Registry::with_timeout(Duration::from_millis(60));
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));

        std::thread::sleep(Duration::from_millis(40));
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(registry.alive_servers("Foo.Sum"), vec!["tcp@s1:1".to_string()]);
    }

    #[test]
    fn test_zero_timeout_disables_expiry() {
        let registry = Registry::with_timeout(Duration::ZERO);
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(registry.alive_servers("Foo.Sum"), vec!["tcp@s1:1".to_string()]);
    }

    #[test]
    fn test_pick_with_no_servers() {
        let registry = Registry::new();
        assert_eq!(registry.pick("RandomSelect", "Foo.Sum", "client"), None);
    }

    #[test]
    fn test_pick_returns_alive_server() {
        let registry = Registry::new();
        registry.put_server("tcp@s1:1", methods(&["Foo.Sum"]));
        registry.put_server("tcp@s2:1", methods(&["Foo.Sum"]));

        let picked = registry.pick("RoundRobin", "Foo.Sum", "client").unwrap();
        assert!(["tcp@s1:1", "tcp@s2:1"].contains(&picked.as_str()));
    }
}
