use crate::location::Location;
use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

/// 实例ID，注册中心保证其在命名空间内唯一
pub type InstanceId = String;

/// 实例熔断状态机
///
/// 除 Fused -> HalfOpen 由健康探测驱动外，其余所有状态迁移都由
/// 外部熔断器通过 `HealthMonitor::change_status` 写入。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// 正常，可被选中
    Normal,
    /// 半开，放行少量请求验证恢复情况
    HalfOpen,
    /// 半闭，验证通过前的过渡态
    HalfClose,
    /// 熔断，不参与选择，等待健康探测
    Fused,
}

impl InstanceStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => InstanceStatus::Normal,
            1 => InstanceStatus::HalfOpen,
            2 => InstanceStatus::HalfClose,
            _ => InstanceStatus::Fused,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            InstanceStatus::Normal => 0,
            InstanceStatus::HalfOpen => 1,
            InstanceStatus::HalfClose => 2,
            InstanceStatus::Fused => 3,
        }
    }
}

/// 服务实例
///
/// 由注册中心创建并以 `Arc<Instance>` 共享。本库只写两个字段：
/// `status` 和 `dynamic_weight`，二者都是原子量，读写不需要加锁。
/// 其余字段在实例生命周期内保持不变。
#[derive(Debug)]
pub struct Instance {
    pub id: InstanceId,
    pub host: String,
    pub port: u16,
    /// 静态权重，来自注册中心
    pub static_weight: u32,
    /// 动态权重，由外部调节器按负载调整，默认0
    dynamic_weight: AtomicU32,
    status: AtomicU8,
    pub metadata: Metadata,
    pub location: Location,
    // 以下字段本库不解释，仅为路由等外部插件透传
    pub vpc_id: Option<String>,
    pub protocol: String,
    pub version: String,
    pub priority: u32,
    pub logic_set: String,
}

impl Instance {
    pub fn new(
        id: impl Into<InstanceId>,
        host: impl Into<String>,
        port: u16,
        static_weight: u32,
    ) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            static_weight,
            dynamic_weight: AtomicU32::new(0),
            status: AtomicU8::new(InstanceStatus::Normal.as_u8()),
            metadata: Metadata::new(),
            location: Location::default(),
            vpc_id: None,
            protocol: String::new(),
            version: String::new(),
            priority: 0,
            logic_set: String::new(),
        }
    }

    pub fn with_status(self, status: InstanceStatus) -> Self {
        self.status.store(status.as_u8(), Ordering::Relaxed);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = location;
        self
    }

    /// 当前熔断状态
    pub fn status(&self) -> InstanceStatus {
        InstanceStatus::from_u8(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: InstanceStatus) {
        self.status.store(status.as_u8(), Ordering::Relaxed);
    }

    pub fn dynamic_weight(&self) -> u32 {
        self.dynamic_weight.load(Ordering::Relaxed)
    }

    pub fn set_dynamic_weight(&self, weight: u32) {
        self.dynamic_weight.store(weight, Ordering::Relaxed);
    }

    /// `host:port`，哈希环以此作为实例的稳定标识
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 实例是否可参与选择（Normal 或 HalfOpen）
    ///
    /// 供调用方在构造候选集时过滤使用，负载均衡器本身不做过滤。
    pub fn is_choosable(&self) -> bool {
        matches!(
            self.status(),
            InstanceStatus::Normal | InstanceStatus::HalfOpen
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_defaults() {
        let instance = Instance::new("ins-1", "10.0.0.1", 8080, 100);
        assert_eq!(instance.status(), InstanceStatus::Normal);
        assert_eq!(instance.dynamic_weight(), 0);
        assert_eq!(instance.address(), "10.0.0.1:8080");
        assert!(instance.is_choosable());
    }

    #[test]
    fn test_status_round_trip() {
        let instance = Instance::new("ins-1", "10.0.0.1", 8080, 100);
        instance.set_status(InstanceStatus::Fused);
        assert_eq!(instance.status(), InstanceStatus::Fused);
        assert!(!instance.is_choosable());

        instance.set_status(InstanceStatus::HalfOpen);
        assert_eq!(instance.status(), InstanceStatus::HalfOpen);
        assert!(instance.is_choosable());

        instance.set_status(InstanceStatus::HalfClose);
        assert!(!instance.is_choosable());
    }

    #[test]
    fn test_dynamic_weight_update() {
        let instance = Instance::new("ins-1", "10.0.0.1", 8080, 100);
        instance.set_dynamic_weight(50);
        assert_eq!(instance.dynamic_weight(), 50);
        instance.set_dynamic_weight(0);
        assert_eq!(instance.dynamic_weight(), 0);
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&InstanceStatus::HalfOpen);
        assert!(json.is_ok());
        assert_eq!(json.unwrap(), "\"half_open\"");
    }
}
