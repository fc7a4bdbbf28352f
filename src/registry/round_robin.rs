//! Round-robin load balancing strategy.

use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::registry::{instance::ServiceInstance, LoadBalancer};

/// Round-robin selector.
/// Keeps one rotating cursor per service.
#[derive(Debug, Default)]
pub struct RoundRobin {
    cursors: DashMap<String, AtomicUsize>,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn next_instance(
        &self,
        service: &str,
        candidates: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        if candidates.is_empty() {
            return None;
        }

        let position = match self.cursors.get(service) {
            Some(cursor) => cursor.fetch_add(1, Ordering::Relaxed),
            None => self
                .cursors
                .entry(service.to_string())
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        candidates.get(position % candidates.len()).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inst(id: &str) -> Arc<ServiceInstance> {
        Arc::new(ServiceInstance::new(id, "svc", "127.0.0.1", 8080))
    }

    #[test]
    fn test_round_robin() {
        let lb = RoundRobin::new();
        let instances = vec![inst("a"), inst("b")];

        let s1 = lb.next_instance("svc", &instances).unwrap();
        assert_eq!(s1.id, "a");

        let s2 = lb.next_instance("svc", &instances).unwrap();
        assert_eq!(s2.id, "b");

        let s3 = lb.next_instance("svc", &instances).unwrap();
        assert_eq!(s3.id, "a");
    }

    #[test]
    fn test_cursors_are_per_service() {
        let lb = RoundRobin::new();
        let one = vec![inst("a"), inst("b")];
        let other = vec![inst("x"), inst("y")];

        assert_eq!(lb.next_instance("one", &one).unwrap().id, "a");
        assert_eq!(lb.next_instance("other", &other).unwrap().id, "x");
        assert_eq!(lb.next_instance("one", &one).unwrap().id, "b");
    }

    #[test]
    fn test_empty_candidates() {
        let lb = RoundRobin::new();
        assert!(lb.next_instance("svc", &[]).is_none());
    }
}
