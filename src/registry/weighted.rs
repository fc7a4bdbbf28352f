//! Weighted random load balancing strategy.

use rand::Rng;
use std::sync::Arc;

use crate::registry::{instance::ServiceInstance, LoadBalancer};

/// Samples proportionally to each instance's weight (default 1.0).
#[derive(Debug, Default, Clone, Copy)]
pub struct Weighted;

/// Selection weight; negative and non-finite weights count as zero.
fn weight_of(instance: &ServiceInstance) -> f64 {
    let weight = instance.effective_weight();
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

impl LoadBalancer for Weighted {
    fn next_instance(
        &self,
        _service: &str,
        candidates: &[Arc<ServiceInstance>],
    ) -> Option<Arc<ServiceInstance>> {
        let total: f64 = candidates.iter().map(|c| weight_of(c)).sum();
        if total <= 0.0 {
            // All weights zero: fall back to the first candidate.
            return candidates.first().cloned();
        }
        if !total.is_finite() {
            // Sum overflowed: pick uniformly among weighted candidates.
            let weighted: Vec<&Arc<ServiceInstance>> =
                candidates.iter().filter(|c| weight_of(c) > 0.0).collect();
            let idx = rand::thread_rng().gen_range(0..weighted.len());
            return Some(weighted[idx].clone());
        }

        let mut point = rand::thread_rng().gen_range(0.0..total);
        for candidate in candidates {
            let weight = weight_of(candidate);
            if point < weight {
                return Some(candidate.clone());
            }
            point -= weight;
        }
        // Float rounding can leave `point` just past the last bucket.
        candidates
            .iter()
            .rev()
            .find(|c| weight_of(c) > 0.0)
            .cloned()
    }
}
