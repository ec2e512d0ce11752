use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{BalanceOptions, Instance, InstanceId, InstanceStatus, Result};

use super::traits::{discards_cached_bias, LoadBalancer, WeightMode};
use super::{decorrelation_draws, effective_weight, ensure_candidates, service_key};

/// 每个服务独立的虚拟时钟和截止时间队列
struct EdfServiceState {
    current_time: f64,
    deadlines: HashMap<InstanceId, f64>,
}

/// 最早截止时间优先
///
/// 每个实例按权重倒数的间隔领取虚拟截止时间，时间最早者当选，
/// 当选后截止时间后移一个间隔，虚拟时钟跳到当选者原来的位置。
/// 长期看每个实例的当选频率正比于权重。
pub struct EdfBalancer {
    options: BalanceOptions,
    states: Mutex<HashMap<String, EdfServiceState>>,
}

impl EdfBalancer {
    pub fn new(options: BalanceOptions) -> Self {
        Self {
            options,
            states: Mutex::new(HashMap::new()),
        }
    }

    fn interval(&self, instance: &Instance) -> f64 {
        let weight = effective_weight(instance, self.options.dynamic_weight);
        if weight == 0 {
            // 权重为0的实例永远排不上队
            f64::INFINITY
        } else {
            1.0 / weight as f64
        }
    }

    fn pick(
        &self,
        namespace: &str,
        service: &str,
        key: &str,
        candidates: &[Arc<Instance>],
    ) -> Arc<Instance> {
        let mut states = self.states.lock();
        let state = states.entry(key.to_string()).or_insert_with(|| EdfServiceState {
            current_time: 0.0,
            deadlines: HashMap::new(),
        });

        let mut earliest = f64::INFINITY;
        let mut selected: Option<usize> = None;
        for (index, instance) in candidates.iter().enumerate() {
            let deadline = match state.deadlines.get(&instance.id) {
                Some(deadline) if *deadline >= state.current_time => *deadline,
                // 新实例，或截止时间已落后于虚拟时钟（例如实例下线后重新上线），重新入队
                _ => {
                    let fresh = state.current_time + self.interval(instance);
                    state.deadlines.insert(instance.id.clone(), fresh);
                    fresh
                }
            };
            if deadline < earliest {
                earliest = deadline;
                selected = Some(index);
            }
        }

        let Some(index) = selected else {
            unreachable!("edf selected no instance for {namespace}.{service}");
        };
        let winner = &candidates[index];
        state
            .deadlines
            .insert(winner.id.clone(), earliest + self.interval(winner));
        state.current_time = earliest;
        Arc::clone(winner)
    }
}

impl LoadBalancer for EdfBalancer {
    fn name(&self) -> &'static str {
        "earliest_deadline_first"
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
            let mut states = self.states.lock();
            if states.contains_key(&key) {
                false
            } else {
                states.insert(
                    key.clone(),
                    EdfServiceState {
                        current_time: 0.0,
                        deadlines: HashMap::new(),
                    },
                );
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
        if let Some(state) = self.states.lock().get_mut(&key) {
            state.deadlines.remove(&instance.id);
        }
    }

    fn on_instances_removed(&self, namespace: &str, service: &str, removed: &[InstanceId]) {
        let key = service_key(namespace, service);
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(&key) {
            for id in removed {
                state.deadlines.remove(id);
            }
            if state.deadlines.is_empty() {
                states.remove(&key);
            }
        }
    }
}
