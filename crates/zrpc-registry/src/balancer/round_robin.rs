use std::collections::HashMap;
use std::sync::Mutex;

use super::Balancer;

/// Per-method round-robin.
///
/// Each method keeps its own monotonic counter; the pick is
/// `addrs[counter mod len]`. The counter is never reset when the
/// candidate set changes, so rotation is only approximate across
/// membership churn.
pub struct RoundRobinBalancer {
    counters: Mutex<HashMap<String, u64>>,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for RoundRobinBalancer {
    fn default() -> Self {
        Self::new()
    }
}

impl Balancer for RoundRobinBalancer {
    fn pick(&self, method: &str, _client_addr: &str, addrs: &[String]) -> Option<String> {
        if addrs.is_empty() {
            return None;
        }
        let mut counters = self.counters.lock().unwrap();
        let counter = counters.entry(method.to_string()).or_insert(0);
        let idx = (*counter % addrs.len() as u64) as usize;
        *counter = counter.wrapping_add(1);
        Some(addrs[idx].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_round_robin_cycles() {
        let rr = RoundRobinBalancer::new();
        let candidates = addrs(&["a", "b", "c"]);

        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("a".to_string()));
        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("b".to_string()));
        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("c".to_string()));
        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("a".to_string()));
    }

    #[test]
    fn test_counters_are_per_method() {
        let rr = RoundRobinBalancer::new();
        let candidates = addrs(&["a", "b"]);

        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("a".to_string()));
        assert_eq!(rr.pick("Foo.Sleep", "x", &candidates), Some("a".to_string()));
        assert_eq!(rr.pick("Foo.Sum", "x", &candidates), Some("b".to_string()));
    }

    #[test]
    fn test_round_robin_distributes_evenly() {
        let rr = RoundRobinBalancer::new();
        let candidates = addrs(&["a", "b", "c"]);

        let mut counts: HashMap<String, u32> = HashMap::new();
        for _ in 0..300 {
            let picked = rr.pick("Foo.Sum", "x", &candidates).unwrap();
            *counts.entry(picked).or_insert(0) += 1;
        }

        assert_eq!(counts["a"], 100);
        assert_eq!(counts["b"], 100);
        assert_eq!(counts["c"], 100);
    }

    #[test]
    fn test_counter_survives_membership_change() {
        let rr = RoundRobinBalancer::new();

        rr.pick("Foo.Sum", "x", &addrs(&["a", "b", "c"]));
        rr.pick("Foo.Sum", "x", &addrs(&["a", "b", "c"]));
        // Shrinking the set keeps the counter; selection stays modular.
        assert_eq!(rr.pick("Foo.Sum", "x", &addrs(&["a", "b"])), Some("a".to_string()));
    }

    #[test]
    fn test_round_robin_empty_candidates() {
        let rr = RoundRobinBalancer::new();
        assert_eq!(rr.pick("Foo.Sum", "x", &[]), None);
    }
}
