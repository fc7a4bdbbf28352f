//! Uniform random load balancing strategy.

use rand::Rng;
use std::sync::Arc;

use crate::registry::{instance::ServiceInstance, LoadBalancer};

/// Picks any eligible instance with equal probability.
#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl LoadBalancer for Random {
    fn next_instance(
        &self,
        _service: &str,
        candidates: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if candidates.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..candidates.len());
        candidates.get(index).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_covers_all_candidates() {
        let candidates: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|id| Arc::new(ServiceInstance::new(*id, "svc", "127.0.0.1", 8080)))
            .collect();

        let mut seen = HashSet::new();
        for _ in 0..500 {
            seen.insert(Random.next_instance("svc", &candidates).unwrap().id.clone());
        }
        assert_eq!(seen.len(), 3);
        assert!(Random.next_instance("svc", &[]).is_none());
    }
}
