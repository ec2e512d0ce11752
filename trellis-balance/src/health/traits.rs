use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::Instance;

use super::changelog::ServiceChangelog;

/// 探测单个实例的结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    /// 实例确认可用
    Success,
    /// 实例确认不可用
    Failure,
    /// 无法判断，例如探测器不适用于该实例
    Other,
}

/// 本地注册中心的数据分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryCategory {
    /// 服务实例
    Instance,
    /// 路由规则
    Rule,
    /// 限流规则
    Ratelimit,
}

/// 一个服务当前的实例列表及其版本号
#[derive(Debug, Clone, Default)]
pub struct ServiceData {
    pub instances: Vec<Arc<Instance>>,
    pub revision: String,
}

/// 注册中心快照：namespace -> service -> 数据
pub type RegistrySnapshot = HashMap<String, HashMap<String, ServiceData>>;

/// 本地注册中心的只读视图
///
/// 探测循环每个周期同步读一次快照。实现方从本地缓存取数，
/// 这个调用本身不做任何IO。
pub trait Registry: Send + Sync {
    fn local(&self, category: RegistryCategory) -> RegistrySnapshot;
}

/// 实例探测器
///
/// 按注册顺序依次执行，第一个非Success的结论直接作为整体结论。
#[async_trait]
pub trait Detector: Send + Sync {
    /// 探测器名称，用于日志
    fn name(&self) -> &str;

    /// 探测一个实例
    ///
    /// 返回Err表示这次探测作废：监控器记一条日志，状态保持不变，
    /// 等下一个周期重试。
    async fn detect(&self, instance: &Instance) -> anyhow::Result<DetectOutcome>;
}

/// 状态变更上报器
#[async_trait]
pub trait Reporter: Send + Sync {
    /// 上报器名称，用于日志
    fn name(&self) -> &str;

    /// 是否消费变更记录
    ///
    /// 所有上报器都返回false时监控器不积累任何历史。
    fn wants_changelog(&self) -> bool {
        false
    }

    /// 接收一个服务攒批后的变更记录
    ///
    /// 投递是一次性的，失败只记日志不重试。
    async fn status_changelog(
        &self,
        namespace: &str,
        service: &str,
        changelog: ServiceChangelog,
    ) -> anyhow::Result<()>;
}
