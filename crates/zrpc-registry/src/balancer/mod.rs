//! Server-selection strategies.
//!
//! A strategy picks one address out of a candidate list for a
//! `(method, client)` pair. Strategies register by name in a
//! [`BalancerSet`], which assigns stable dense indices; the name is the
//! external identity, the index an internal detail. The process-wide
//! default set carries `RandomSelect`, `RoundRobin`, and
//! `ConsistentHash`.

pub mod consistent_hash;
pub mod random;
pub mod round_robin;

pub use consistent_hash::{ConsistentHashBalancer, Ring};
pub use random::RandomBalancer;
pub use round_robin::RoundRobinBalancer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// A single selection strategy.
///
/// `addrs` may be empty, in which case there is nothing to pick.
/// Implementations are internally synchronised and safe to share across
/// tasks.
pub trait Balancer: Send + Sync {
    fn pick(&self, method: &str, client_addr: &str, addrs: &[String]) -> Option<String>;
}

/// A named set of strategies.
pub struct BalancerSet {
    inner: Mutex<SetInner>,
}

struct SetInner {
    strategies: Vec<Arc<dyn Balancer>>,
    modes: HashMap<String, usize>,
}

impl BalancerSet {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SetInner {
                strategies: Vec::new(),
                modes: HashMap::new(),
            }),
        }
    }

    /// Registers a strategy under a mode name, returning its index.
    pub fn register(&self, name: &str, strategy: Arc<dyn Balancer>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.strategies.push(strategy);
        let idx = inner.strategies.len() - 1;
        inner.modes.insert(name.to_string(), idx);
        idx
    }

    /// Picks with the strategy registered under `mode`.
    ///
    /// An unknown mode name resolves to the first registered strategy.
    pub fn pick(
        &self,
        mode: &str,
        method: &str,
        client_addr: &str,
        addrs: &[String],
    ) -> Option<String> {
        let strategy = {
            let inner = self.inner.lock().unwrap();
            let idx = inner.modes.get(mode).copied().unwrap_or(0);
            inner.strategies.get(idx).cloned()?
        };
        strategy.pick(method, client_addr, addrs)
    }

    /// All registered mode names.
    pub fn modes(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut modes: Vec<String> = inner.modes.keys().cloned().collect();
        modes.sort();
        modes
    }
}

impl Default for BalancerSet {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared process-wide strategy set the registry delegates to.
pub fn default_balancer_set() -> &'static BalancerSet {
    static SET: OnceLock<BalancerSet> = OnceLock::new();
    SET.get_or_init(|| {
        let set = BalancerSet::new();
        set.register("RandomSelect", Arc::new(RandomBalancer));
        set.register("RoundRobin", Arc::new(RoundRobinBalancer::new()));
        set.register("ConsistentHash", Arc::new(ConsistentHashBalancer::new()));
        set
    })
}
