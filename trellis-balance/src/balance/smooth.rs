use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{BalanceOptions, Instance, InstanceId, InstanceStatus, Result};

use super::traits::{discards_cached_bias, LoadBalancer, WeightMode};
use super::{decorrelation_draws, effective_weight, ensure_candidates, service_key};

/// 平滑加权轮询（nginx算法）
///
/// 每个实例维护一个流动权重：每轮全体加上各自的有效权重，
/// 流动权重最大者当选并减去本轮权重总和。高权重实例的名额
/// 被均匀摊开，不会连续霸占。
pub struct SmoothWeightedBalancer {
    options: BalanceOptions,
    current_weights: Mutex<HashMap<String, HashMap<InstanceId, i64>>>,
}

impl SmoothWeightedBalancer {
    pub fn new(options: BalanceOptions) -> Self {
        Self {
            options,
            current_weights: Mutex::new(HashMap::new()),
        }
    }

    fn pick(
        &self,
        namespace: &str,
        service: &str,
        key: &str,
        candidates: &[Arc<Instance>],
    ) -> Arc<Instance> {
        let mut table = self.current_weights.lock();
        let service_weights = table.entry(key.to_string()).or_default();

        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;
        for (index, instance) in candidates.iter().enumerate() {
            let weight = effective_weight(instance, self.options.dynamic_weight) as i64;
            let current = service_weights.entry(instance.id.clone()).or_insert(0);
            *current += weight;
            total += weight;
            match best {
                // 相同流动权重保留先出现的实例
                Some((_, best_weight)) if *current <= best_weight => {}
                _ => best = Some((index, *current)),
            }
        }

        let Some((index, best_weight)) = best else {
            unreachable!("smooth weighted round robin selected no instance for {namespace}.{service}");
        };
        let winner = &candidates[index];
        if let Some(current) = service_weights.get_mut(&winner.id) {
            *current = best_weight - total;
        }
        Arc::clone(winner)
    }
}

impl LoadBalancer for SmoothWeightedBalancer {
    fn name(&self) -> &'static str {
        "smooth_weighted_round_robin"
    }

    fn weight_mode(&self) -> WeightMode {
        WeightMode::Dynamic
    }

    fn choose(
        &self,
        namespace: &str,
        service: &str,
        candidates: &[Arc<Instance>],
        _routing_key: Option<&str>,
    ) -> Result<Arc<Instance>> {
        ensure_candidates(namespace, service, candidates)?;

        let key = service_key(namespace, service);
        let first_seen = {
            let mut table = self.current_weights.lock();
            if table.contains_key(&key) {
                false
            } else {
                table.insert(key.clone(), HashMap::new());
                true
            }
        };
        if first_seen {
            for _ in 0..decorrelation_draws(candidates.len()) {
                let _ = self.pick(namespace, service, &key, candidates);
            }
        }
        Ok(self.pick(namespace, service, &key, candidates))
    }

    fn on_status_change(
        &self,
        namespace: &str,
        service: &str,
        instance: &Instance,
        previous: InstanceStatus,
    ) {
        if !discards_cached_bias(previous, instance.status()) {
            return;
        }
        let key = service_key(namespace, service);
        if let Some(service_weights) = self.current_weights.lock().get_mut(&key) {
            service_weights.remove(&instance.id);
        }
    }

    fn on_instances_removed(&self, namespace: &str, service: &str, removed: &[InstanceId]) {
        let key = service_key(namespace, service);
        let mut table = self.current_weights.lock();
        if let Some(service_weights) = table.get_mut(&key) {
            for id in removed {
                service_weights.remove(id);
            }
            if service_weights.is_empty() {
                table.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_instances(weights: &[u32]) -> Vec<Arc<Instance>> {
        weights
            .iter()
            .enumerate()
            .map(|(index, weight)| {
                Arc::new(Instance::new(
                    format!("ins-{index}"),
                    "10.0.0.1",
                    8000 + index as u16,
                    *weight,
                ))
            })
            .collect()
    }

    fn pick_sequence(
        balancer: &SmoothWeightedBalancer,
        candidates: &[Arc<Instance>],
        rounds: usize,
    ) -> Vec<usize> {
        (0..rounds)
            .map(|_| {
                let picked = balancer
                    .choose("test", "svc", candidates, None)
                    .unwrap();
                candidates
                    .iter()
                    .position(|candidate| candidate.id == picked.id)
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_quota_per_cycle_matches_weights() {
        // 5:1:1 的周期长度为7，任意连续7次选择的名额都是 5/1/1
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[5, 1, 1]);
        let sequence = pick_sequence(&balancer, &candidates, 7);
        assert_eq!(sequence.iter().filter(|index| **index == 0).count(), 5);
        assert_eq!(sequence.iter().filter(|index| **index == 1).count(), 1);
        assert_eq!(sequence.iter().filter(|index| **index == 2).count(), 1);
    }

    #[test]
    fn test_heavy_instance_is_interleaved() {
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[5, 1, 1]);
        let sequence = pick_sequence(&balancer, &candidates, 21);
        let mut run = 0usize;
        let mut longest = 0usize;
        for index in &sequence {
            if *index == 0 {
                run += 1;
                longest = longest.max(run);
            } else {
                run = 0;
            }
        }
        assert!(longest < 5, "heavy instance monopolized {longest} rounds");
    }

    #[test]
    fn test_equal_weights_rotate() {
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[1, 1, 1]);
        let sequence = pick_sequence(&balancer, &candidates, 3);
        let mut seen = sequence.clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    fn test_recovery_transition_resets_bias() {
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[5, 1]);
        for _ in 0..4 {
            let _ = balancer.choose("test", "svc", &candidates, None).unwrap();
        }
        candidates[0].set_status(InstanceStatus::Normal);
        balancer.on_status_change("test", "svc", &candidates[0], InstanceStatus::Fused);
        let table = balancer.current_weights.lock();
        let service_weights = table.get("test.svc").unwrap();
        assert!(!service_weights.contains_key("ins-0"));
        assert!(service_weights.contains_key("ins-1"));
    }

    #[test]
    fn test_unrelated_transition_keeps_bias() {
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[5, 1]);
        let _ = balancer.choose("test", "svc", &candidates, None).unwrap();
        candidates[0].set_status(InstanceStatus::Fused);
        balancer.on_status_change("test", "svc", &candidates[0], InstanceStatus::Normal);
        let table = balancer.current_weights.lock();
        assert!(table.get("test.svc").unwrap().contains_key("ins-0"));
    }

    #[test]
    fn test_removed_instances_are_pruned() {
        let balancer = SmoothWeightedBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[1, 1]);
        let _ = balancer.choose("test", "svc", &candidates, None).unwrap();
        balancer.on_instances_removed(
            "test",
            "svc",
            &["ins-0".to_string(), "ins-1".to_string()],
        );
        assert!(!balancer.current_weights.lock().contains_key("test.svc"));
    }
}
