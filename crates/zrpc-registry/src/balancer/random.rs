use super::Balancer;

/// Uniform random pick. The client identity plays no part.
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(&self, _method: &str, _client_addr: &str, addrs: &[String]) -> Option<String> {
        if addrs.is_empty() {
            return None;
        }
        let idx = rand::random::<u64>() as usize % addrs.len();
        Some(addrs[idx].clone())
    }
}
