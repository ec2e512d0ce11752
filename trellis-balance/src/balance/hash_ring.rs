use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use trellis_core::{CoreError, HashRingOptions, Instance, InstanceId, Result};

use super::traits::{LoadBalancer, WeightMode};
use super::{ensure_candidates, service_key};

/// 候选集签名和对应的哈希环
///
/// 环上的值是实例在候选集里的下标。签名由候选实例ID按序拼接，
/// 签名不变意味着下标含义不变，环可以复用。
struct RingState {
    signature: String,
    ring: BTreeMap<u64, usize>,
}

/// 一致性哈希环
///
/// 同一个路由键始终落到同一个实例；实例增减时只有环上相邻
/// 区段的键需要迁移。不使用权重，状态变化也不影响已建好的环。
pub struct HashRingBalancer {
    options: HashRingOptions,
    rings: Mutex<HashMap<String, RingState>>,
}

impl HashRingBalancer {
    pub fn new(options: HashRingOptions) -> Self {
        Self {
            options,
            rings: Mutex::new(HashMap::new()),
        }
    }

    fn build_ring(&self, candidates: &[Arc<Instance>]) -> BTreeMap<u64, usize> {
        let mut ring = BTreeMap::new();
        for (index, instance) in candidates.iter().enumerate() {
            let address = instance.address();
            for replica in 0..self.options.virtual_nodes {
                ring.insert(hash_point(format!("{address}#{replica}").as_bytes()), index);
            }
        }
        ring
    }
}

impl LoadBalancer for HashRingBalancer {
    fn name(&self) -> &'static str {
        "consistent_hash_ring"
    }

    fn weight_mode(&self) -> WeightMode {
        WeightMode::None
    }

    fn choose(
        &self,
        namespace: &str,
        service: &str,
        candidates: &[Arc<Instance>],
        routing_key: Option<&str>,
    ) -> Result<Arc<Instance>> {
        ensure_candidates(namespace, service, candidates)?;
        let Some(routing_key) = routing_key else {
            return Err(CoreError::InvalidArgument(format!(
                "consistent hash ring requires a routing key for {namespace}.{service}"
            )));
        };

        let signature = candidates
            .iter()
            .map(|instance| instance.id.as_str())
            .collect::<Vec<_>>()
            .join("|");
        let key = service_key(namespace, service);

        let mut rings = self.rings.lock();
        let state = rings.entry(key).or_insert_with(|| RingState {
            signature: String::new(),
            ring: BTreeMap::new(),
        });
        if state.signature != signature {
            state.ring = self.build_ring(candidates);
            state.signature = signature;
            debug!(
                "rebuilt hash ring for {}.{}: {} instances, {} points",
                namespace,
                service,
                candidates.len(),
                state.ring.len()
            );
        }

        let point = hash_point(routing_key.as_bytes());
        // 顺时针找第一个节点，越过最大点后绕回环首
        let index = state
            .ring
            .range(point..)
            .next()
            .or_else(|| state.ring.iter().next())
            .map(|(_, index)| *index);
        let Some(index) = index else {
            unreachable!("hash ring is empty for {namespace}.{service}");
        };
        Ok(Arc::clone(&candidates[index]))
    }

    fn on_instances_removed(&self, namespace: &str, service: &str, _removed: &[InstanceId]) {
        // 丢掉整个环，下次选择按新候选集重建
        self.rings.lock().remove(&service_key(namespace, service));
    }
}

/// 把任意字节串映射到环上的一个点
fn hash_point(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::ErrorCode;

    fn create_test_instances(count: usize) -> Vec<Arc<Instance>> {
        (0..count)
            .map(|index| {
                Arc::new(Instance::new(
                    format!("ins-{index}"),
                    format!("10.0.0.{}", index + 1),
                    8080,
                    100,
                ))
            })
            .collect()
    }

    #[test]
    fn test_same_key_is_sticky() {
        let balancer = HashRingBalancer::new(HashRingOptions::default());
        let candidates = create_test_instances(5);
        let first = balancer
            .choose("test", "svc", &candidates, Some("user-42"))
            .unwrap();
        for _ in 0..50 {
            let picked = balancer
                .choose("test", "svc", &candidates, Some("user-42"))
                .unwrap();
            assert_eq!(picked.id, first.id);
        }
    }

    #[test]
    fn test_keys_spread_across_instances() {
        let balancer = HashRingBalancer::new(HashRingOptions::default());
        let candidates = create_test_instances(5);
        let mut seen = std::collections::HashSet::new();
        for key in 0..100 {
            let picked = balancer
                .choose("test", "svc", &candidates, Some(&format!("key-{key}")))
                .unwrap();
            seen.insert(picked.id.clone());
        }
        assert!(seen.len() >= 2, "only {} instances hit", seen.len());
    }

    #[test]
    fn test_missing_routing_key_is_invalid_argument() {
        let balancer = HashRingBalancer::new(HashRingOptions::default());
        let candidates = create_test_instances(3);
        let err = balancer
            .choose("test", "svc", &candidates, None)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_removing_instance_relocates_minority() {
        let balancer = HashRingBalancer::new(HashRingOptions::default());
        let candidates = create_test_instances(10);
        let keys: Vec<String> = (0..200).map(|key| format!("key-{key}")).collect();

        let before: Vec<InstanceId> = keys
            .iter()
            .map(|key| {
                balancer
                    .choose("test", "svc", &candidates, Some(key))
                    .unwrap()
                    .id
                    .clone()
            })
            .collect();

        // 移除一个实例后重建环
        let mut shrunk = candidates.clone();
        let removed = shrunk.remove(3);
        balancer.on_instances_removed("test", "svc", &[removed.id.clone()]);

        let mut moved = 0usize;
        for (key, previous) in keys.iter().zip(&before) {
            let now = balancer
                .choose("test", "svc", &shrunk, Some(key))
                .unwrap();
            if now.id != *previous {
                moved += 1;
            }
            // 原先不在被移除实例上的键不应迁移
            if *previous != removed.id {
                assert_eq!(now.id, *previous, "key {key} moved unnecessarily");
            }
        }
        assert!(moved < 60, "{moved} of 200 keys relocated");
    }

    #[test]
    fn test_virtual_node_count_honored() {
        let options = HashRingOptions { virtual_nodes: 4 };
        let balancer = HashRingBalancer::new(options);
        let candidates = create_test_instances(3);
        let _ = balancer
            .choose("test", "svc", &candidates, Some("key"))
            .unwrap();
        let rings = balancer.rings.lock();
        assert_eq!(rings.get("test.svc").unwrap().ring.len(), 12);
    }

    #[test]
    fn test_ring_reused_when_candidates_unchanged() {
        let balancer = HashRingBalancer::new(HashRingOptions::default());
        let candidates = create_test_instances(3);
        let _ = balancer
            .choose("test", "svc", &candidates, Some("a"))
            .unwrap();
        let signature_before = balancer.rings.lock().get("test.svc").unwrap().signature.clone();
        let _ = balancer
            .choose("test", "svc", &candidates, Some("b"))
            .unwrap();
        let signature_after = balancer.rings.lock().get("test.svc").unwrap().signature.clone();
        assert_eq!(signature_before, signature_after);
        assert_eq!(signature_before, "ins-0|ins-1|ins-2");
    }
}
