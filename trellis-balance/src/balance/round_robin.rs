use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{BalanceOptions, Instance, Result};

use super::traits::{LoadBalancer, WeightMode};
use super::{decorrelation_draws, effective_weight, ensure_candidates, service_key};

/// 加权轮询
///
/// 把有效权重按最大公约数约减后摊开成一个循环序列，用每个服务
/// 独立的调用计数在序列上步进。同一实例的配额在序列里是连续的，
/// 打散效果不如平滑加权轮询，胜在每次选择只读一个计数器。
pub struct WeightedRoundRobinBalancer {
    options: BalanceOptions,
    call_counts: Mutex<HashMap<String, u64>>,
}

impl WeightedRoundRobinBalancer {
    pub fn new(options: BalanceOptions) -> Self {
        Self {
            options,
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// 取出本次选择使用的序号并推进计数，返回是否为新服务
    fn take_count(&self, key: &str) -> (u64, bool) {
        let mut counts = self.call_counts.lock();
        match counts.get_mut(key) {
            Some(next) => {
                let current = *next;
                *next = next.wrapping_add(1);
                (current, false)
            }
            None => {
                counts.insert(key.to_string(), 1);
                (0, true)
            }
        }
    }

    fn pick(
        &self,
        namespace: &str,
        service: &str,
        count: u64,
        candidates: &[Arc<Instance>],
    ) -> Arc<Instance> {
        let weights: Vec<u64> = candidates
            .iter()
            .map(|instance| effective_weight(instance, self.options.dynamic_weight))
            .collect();
        match reduce_by_gcd(&weights) {
            Some(reduced) => {
                let total: u64 = reduced.iter().sum();
                let mut remaining = count % total;
                for (instance, weight) in candidates.iter().zip(&reduced) {
                    if remaining < *weight {
                        return Arc::clone(instance);
                    }
                    remaining -= *weight;
                }
                unreachable!("weighted round robin selected no instance for {namespace}.{service}");
            }
            None => {
                // 权重全为0，退化成按调用序号轮询
                let index = (count % candidates.len() as u64) as usize;
                Arc::clone(&candidates[index])
            }
        }
    }
}

impl LoadBalancer for WeightedRoundRobinBalancer {
    fn name(&self) -> &'static str {
        "weighted_round_robin"
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
        let (mut count, first_seen) = self.take_count(&key);
        if first_seen {
            // 新服务先空转随机次数，避免各客户端同相位起步
            for _ in 0..decorrelation_draws(candidates.len()) {
                let _ = self.pick(namespace, service, count, candidates);
                (count, _) = self.take_count(&key);
            }
        }
        Ok(self.pick(namespace, service, count, candidates))
    }
}

/// 按最大公约数约减权重，权重全为0时返回None
fn reduce_by_gcd(weights: &[u64]) -> Option<Vec<u64>> {
    let mut divisor = 0u64;
    for weight in weights {
        divisor = gcd(divisor, *weight);
    }
    if divisor == 0 {
        return None;
    }
    Some(weights.iter().map(|weight| weight / divisor).collect())
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ErrorCode;

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
        balancer: &WeightedRoundRobinBalancer,
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
    fn test_equal_weights_alternate_strictly() {
        let balancer = WeightedRoundRobinBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[1, 1]);
        let sequence = pick_sequence(&balancer, &candidates, 10);
        for window in sequence.windows(2) {
            assert_ne!(window[0], window[1], "sequence {sequence:?} not alternating");
        }
        let zeros = sequence.iter().filter(|index| **index == 0).count();
        assert_eq!(zeros, 5);
    }

    #[test]
    fn test_gcd_reduction_shortens_cycle() {
        // 100:50 约减为 2:1，任意300次连续选择恰好是100个完整周期
        let balancer = WeightedRoundRobinBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[100, 50]);
        let sequence = pick_sequence(&balancer, &candidates, 300);
        let heavy = sequence.iter().filter(|index| **index == 0).count();
        assert_eq!(heavy, 200);
        // 轻实例每周期只占一个名额，不会连续出现
        for window in sequence.windows(2) {
            assert!(
                !(window[0] == 1 && window[1] == 1),
                "light instance picked twice in a row"
            );
        }
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_round_robin() {
        let balancer = WeightedRoundRobinBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[0, 0, 0]);
        let sequence = pick_sequence(&balancer, &candidates, 9);
        for window in sequence.windows(2) {
            assert_ne!(window[0], window[1]);
        }
        for index in 0..3 {
            assert_eq!(sequence.iter().filter(|i| **i == index).count(), 3);
        }
    }

    #[test]
    fn test_services_keep_independent_counters() {
        let balancer = WeightedRoundRobinBalancer::new(BalanceOptions::default());
        let candidates = create_test_instances(&[1, 1]);
        for _ in 0..5 {
            let _ = balancer.choose("test", "svc-a", &candidates, None).unwrap();
        }
        let counts = balancer.call_counts.lock();
        assert!(counts.contains_key("test.svc-a"));
        assert!(!counts.contains_key("test.svc-b"));
    }

    #[test]
    fn test_empty_candidates_is_invalid_argument() {
        let balancer = WeightedRoundRobinBalancer::new(BalanceOptions::default());
        let err = balancer.choose("test", "svc", &[], None).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_gcd_helper() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 7), 7);
        assert_eq!(reduce_by_gcd(&[100, 50]), Some(vec![2, 1]));
        assert_eq!(reduce_by_gcd(&[0, 0]), None);
        assert_eq!(reduce_by_gcd(&[3, 0, 6]), Some(vec![1, 0, 2]));
    }
}
