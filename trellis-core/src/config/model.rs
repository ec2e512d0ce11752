use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// 弹性能力总配置
///
/// 各组件只接收自己的子配置，这里仅做聚合与整体校验，
/// 配置文件的读取由宿主程序完成。
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ResilienceSettings {
    #[serde(default)]
    pub health: HealthOptions,
    #[serde(default)]
    pub warmup: WarmUpOptions,
    #[serde(default)]
    pub balance: BalanceOptions,
    #[serde(default)]
    pub hash_ring: HashRingOptions,
}

/// 健康探测配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthOptions {
    /// 探测周期（秒），每个周期扫描一次全部熔断实例
    #[serde(default = "default_detect_interval")]
    pub detect_interval_seconds: u64,
    /// 探测结果未知时，延迟转入半开的等待时间（秒）
    #[serde(default = "default_fusing_timeout")]
    pub fusing_timeout_seconds: u64,
    /// 状态变更上报周期（秒）
    #[serde(default = "default_report_interval")]
    pub report_interval_seconds: u64,
    /// 待上报记录达到该条数时立即上报
    #[serde(default = "default_report_threshold")]
    pub report_threshold: usize,
}

/// 预热限流配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WarmUpOptions {
    /// 预热时长（秒），从冷速率爬升到稳定速率所需时间
    #[serde(default = "default_warm_time")]
    pub warm_time_seconds: u64,
    /// 冷却系数，稳定速率与冷速率之比，不得小于2
    #[serde(default = "default_warn_factor")]
    pub warn_factor: f64,
    /// 令牌桶满后多少个周期无消费则停掉补充定时器
    #[serde(default = "default_idle_period")]
    pub idle_period_ticks: u32,
}

/// 负载均衡配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BalanceOptions {
    /// 是否在静态权重上叠加动态权重
    #[serde(default = "default_true")]
    pub dynamic_weight: bool,
}

/// 一致性哈希环配置
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HashRingOptions {
    /// 每个实例的虚拟节点数
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: u32,
}

/// 负载均衡算法
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum BalanceStrategy {
    /// 加权随机（默认）
    #[default]
    WeightedRandom,
    /// 加权轮询，按最大公约数约减权重
    WeightedRoundRobin,
    /// 平滑加权轮询（nginx算法）
    SmoothWeightedRoundRobin,
    /// 最早截止时间优先
    EarliestDeadlineFirst,
    /// 一致性哈希环
    ConsistentHashRing,
}

/// 限流规则的资源维度
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitResource {
    /// 按每秒请求数限流（默认）
    #[default]
    Qps,
    /// 按并发数限流
    Concurrency,
}

/// 限流规则的生效范围
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    /// 全局配额，按分片数均分（默认）
    #[default]
    Global,
    /// 单机配额
    Local,
}

/// 限流配额档位：duration_seconds 秒内最多 amount 次
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct RateAmount {
    pub amount: u64,
    pub duration_seconds: u64,
}

/// 限流规则
///
/// 规则由外部规则源下发，id 在规则源内唯一，预热限流以 id 关联令牌桶。
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RateLimitRule {
    pub id: String,
    #[serde(default)]
    pub resource: LimitResource,
    #[serde(default)]
    pub limit_type: LimitType,
    pub amounts: Vec<RateAmount>,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            detect_interval_seconds: default_detect_interval(),
            fusing_timeout_seconds: default_fusing_timeout(),
            report_interval_seconds: default_report_interval(),
            report_threshold: default_report_threshold(),
        }
    }
}

impl Default for WarmUpOptions {
    fn default() -> Self {
        Self {
            warm_time_seconds: default_warm_time(),
            warn_factor: default_warn_factor(),
            idle_period_ticks: default_idle_period(),
        }
    }
}

impl Default for BalanceOptions {
    fn default() -> Self {
        Self {
            dynamic_weight: true,
        }
    }
}

impl Default for HashRingOptions {
    fn default() -> Self {
        Self {
            virtual_nodes: default_virtual_nodes(),
        }
    }
}

impl ResilienceSettings {
    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        self.health.validate()?;
        self.warmup.validate()?;
        self.hash_ring.validate()?;
        Ok(())
    }
}

impl HealthOptions {
    pub fn validate(&self) -> Result<()> {
        if self.detect_interval_seconds == 0 {
            return Err(CoreError::InvalidConfig(
                "detect_interval_seconds cannot be 0".to_string(),
            ));
        }
        if self.report_interval_seconds == 0 {
            return Err(CoreError::InvalidConfig(
                "report_interval_seconds cannot be 0".to_string(),
            ));
        }
        if self.report_threshold == 0 {
            return Err(CoreError::InvalidConfig(
                "report_threshold cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl WarmUpOptions {
    pub fn validate(&self) -> Result<()> {
        if self.warm_time_seconds == 0 {
            return Err(CoreError::InvalidConfig(
                "warm_time_seconds cannot be 0".to_string(),
            ));
        }
        if self.warn_factor < 2.0 {
            return Err(CoreError::InvalidConfig(format!(
                "warn_factor must be >= 2, got {}",
                self.warn_factor
            )));
        }
        Ok(())
    }
}

impl HashRingOptions {
    pub fn validate(&self) -> Result<()> {
        if self.virtual_nodes == 0 {
            return Err(CoreError::InvalidConfig(
                "virtual_nodes cannot be 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl RateLimitRule {
    /// 验证规则的有效性，规则源下发前调用
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(CoreError::InvalidConfig("rule has empty id".to_string()));
        }
        if self.amounts.is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "rule '{}' has no amounts defined",
                self.id
            )));
        }
        for amount in &self.amounts {
            if amount.amount == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "rule '{}' has zero amount",
                    self.id
                )));
            }
            if amount.duration_seconds == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "rule '{}' has zero duration",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_detect_interval() -> u64 {
    10
}

fn default_fusing_timeout() -> u64 {
    5
}

fn default_report_interval() -> u64 {
    300 // 5分钟上报一次
}

fn default_report_threshold() -> usize {
    10000
}

fn default_warm_time() -> u64 {
    10
}

fn default_warn_factor() -> f64 {
    3.0
}

fn default_idle_period() -> u32 {
    3
}

fn default_virtual_nodes() -> u32 {
    160
}
