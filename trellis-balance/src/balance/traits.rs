use std::sync::Arc;

use trellis_core::{Instance, InstanceId, InstanceStatus, Result};

/// 负载均衡器接口
///
/// 这个trait定义了实例选择的核心功能，五种算法都实现它。
/// 健康探测通过回调把状态变化和实例下线通知给有状态的实现，
/// 以便及时丢弃过期的累计值。
pub trait LoadBalancer: Send + Sync {
    /// 算法名称，用于日志和上报
    fn name(&self) -> &'static str;

    /// 算法参与计算的权重类型
    fn weight_mode(&self) -> WeightMode;

    /// 从候选实例中选出一个
    ///
    /// 候选集由调用方过滤好后传入，这里不再复查实例状态。
    /// 一致性哈希算法要求提供 `routing_key`，其余算法忽略该参数。
    /// 候选集为空返回参数错误；候选集非空却选不出实例属于内部
    /// 逻辑错误，直接panic。
    fn choose(
        &self,
        namespace: &str,
        service: &str,
        candidates: &[Arc<Instance>],
        routing_key: Option<&str>,
    ) -> Result<Arc<Instance>>;

    /// 实例状态变化通知
    ///
    /// 半开验证通过（HalfOpen -> HalfClose）和熔断恢复
    /// （Fused -> Normal）时，有状态算法丢弃该实例的累计值，
    /// 让它以干净状态重新参与选择。
    fn on_status_change(
        &self,
        _namespace: &str,
        _service: &str,
        _instance: &Instance,
        _previous: InstanceStatus,
    ) {
    }

    /// 实例下线通知，清理以实例ID为键的残留状态
    fn on_instances_removed(&self, _namespace: &str, _service: &str, _removed: &[InstanceId]) {}
}

/// 算法使用的权重类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightMode {
    /// 使用有效权重（静态叠加动态）
    Dynamic,
    /// 不使用权重
    None,
}

/// 判断一次状态变化是否应当清空实例在算法里的累计值
pub(crate) fn discards_cached_bias(previous: InstanceStatus, current: InstanceStatus) -> bool {
    matches!(
        (previous, current),
        (InstanceStatus::HalfOpen, InstanceStatus::HalfClose)
            | (InstanceStatus::Fused, InstanceStatus::Normal)
    )
}
