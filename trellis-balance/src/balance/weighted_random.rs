use std::sync::Arc;

use trellis_core::{BalanceOptions, Instance, Result};

use super::traits::{LoadBalancer, WeightMode};
use super::{effective_weight, ensure_candidates};

/// 加权随机
///
/// 把有效权重视为区间长度拼成一条线段，取一个随机落点。
/// 完全无状态，权重为0的实例落选。
pub struct WeightedRandomBalancer {
    options: BalanceOptions,
}

impl WeightedRandomBalancer {
    pub fn new(options: BalanceOptions) -> Self {
        Self { options }
    }
}

impl LoadBalancer for WeightedRandomBalancer {
    fn name(&self) -> &'static str {
        "weighted_random"
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

        let weights: Vec<u64> = candidates
            .iter()
            .map(|instance| effective_weight(instance, self.options.dynamic_weight))
            .collect();
        let total_weight: u64 = weights.iter().sum();
        if total_weight == 0 {
            unreachable!("all candidate weights are zero for {namespace}.{service}");
        }

        let mut random_value = rand::random::<f64>() * total_weight as f64;
        for (instance, weight) in candidates.iter().zip(&weights) {
            random_value -= *weight as f64;
            if random_value <= 0.0 {
                return Ok(Arc::clone(instance));
            }
        }
        unreachable!("weighted random selected no instance for {namespace}.{service}");
    }
}
