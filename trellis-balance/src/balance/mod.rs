pub mod deadline;
pub mod hash_ring;
pub mod round_robin;
pub mod smooth;
pub mod traits;
pub mod weighted_random;

pub use deadline::EdfBalancer;
pub use hash_ring::HashRingBalancer;
pub use round_robin::WeightedRoundRobinBalancer;
pub use smooth::SmoothWeightedBalancer;
pub use traits::{LoadBalancer, WeightMode};
pub use weighted_random::WeightedRandomBalancer;

use rand::Rng;
use std::sync::Arc;
use trellis_core::{BalanceStrategy, CoreError, Instance, ResilienceSettings, Result};

/// 按配置的算法构造负载均衡器
pub fn create_balancer(
    strategy: BalanceStrategy,
    settings: &ResilienceSettings,
) -> Arc<dyn LoadBalancer> {
    match strategy {
        BalanceStrategy::WeightedRandom => {
            Arc::new(WeightedRandomBalancer::new(settings.balance.clone()))
        }
        BalanceStrategy::WeightedRoundRobin => {
            Arc::new(WeightedRoundRobinBalancer::new(settings.balance.clone()))
        }
        BalanceStrategy::SmoothWeightedRoundRobin => {
            Arc::new(SmoothWeightedBalancer::new(settings.balance.clone()))
        }
        BalanceStrategy::EarliestDeadlineFirst => {
            Arc::new(EdfBalancer::new(settings.balance.clone()))
        }
        BalanceStrategy::ConsistentHashRing => {
            Arc::new(HashRingBalancer::new(settings.hash_ring.clone()))
        }
    }
}

/// 计算实例的有效权重：静态权重，按需叠加动态权重
pub fn effective_weight(instance: &Instance, dynamic: bool) -> u64 {
    let mut weight = u64::from(instance.static_weight);
    if dynamic {
        weight += u64::from(instance.dynamic_weight());
    }
    weight
}

/// 有状态算法的服务级状态键
pub(crate) fn service_key(namespace: &str, service: &str) -> String {
    format!("{namespace}.{service}")
}

/// 新服务首次选择前的空转次数，上限为候选实例数
pub(crate) fn decorrelation_draws(pool_size: usize) -> usize {
    let mut rng = rand::rng();
    rng.random_range(0..pool_size)
}

pub(crate) fn ensure_candidates(
    namespace: &str,
    service: &str,
    candidates: &[Arc<Instance>],
) -> Result<()> {
    if candidates.is_empty() {
        return Err(CoreError::InvalidArgument(format!(
            "candidates is empty for {namespace}.{service}"
        )));
    }
    Ok(())
}
