use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use trellis_balance::{
    DetectOutcome, Detector, HealthMonitor, Registry, RegistryCategory, RegistrySnapshot,
    Reporter, ServiceChangelog, ServiceData, WeightedRandomBalancer,
};
use trellis_core::{BalanceOptions, HealthOptions, Instance, InstanceStatus};

/// 演示用的静态注册中心
struct DemoRegistry {
    snapshot: Mutex<RegistrySnapshot>,
}

impl DemoRegistry {
    fn new(namespace: &str, service: &str, instances: Vec<Arc<Instance>>) -> Arc<Self> {
        let mut snapshot = RegistrySnapshot::new();
        snapshot.entry(namespace.to_string()).or_default().insert(
            service.to_string(),
            ServiceData {
                instances,
                revision: "rev-1".to_string(),
            },
        );
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
        })
    }
}

impl Registry for DemoRegistry {
    fn local(&self, _category: RegistryCategory) -> RegistrySnapshot {
        self.snapshot.lock().clone()
    }
}

/// 前几次探测失败，之后一直成功
struct FlakyDetector {
    remaining_failures: AtomicUsize,
}

impl FlakyDetector {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: AtomicUsize::new(failures),
        })
    }
}

#[async_trait]
impl Detector for FlakyDetector {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn detect(&self, instance: &Instance) -> anyhow::Result<DetectOutcome> {
        let remaining = self.remaining_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.remaining_failures.store(remaining - 1, Ordering::SeqCst);
            info!("🔍 probe {} -> still down", instance.address());
            return Ok(DetectOutcome::Failure);
        }
        info!("🔍 probe {} -> alive", instance.address());
        Ok(DetectOutcome::Success)
    }
}

/// 把收到的变更记录打印成JSON
struct ConsoleReporter;

#[async_trait]
impl Reporter for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    fn wants_changelog(&self) -> bool {
        true
    }

    async fn status_changelog(
        &self,
        namespace: &str,
        service: &str,
        changelog: ServiceChangelog,
    ) -> anyhow::Result<()> {
        let pretty = serde_json::to_string_pretty(&changelog)?;
        info!("📨 changelog for {}.{}:\n{}", namespace, service, pretty);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("🚀 启动熔断实例健康监控演示");

    let first = Arc::new(Instance::new("ins-a", "10.0.0.1", 8080, 100));
    let second = Arc::new(Instance::new("ins-b", "10.0.0.2", 8080, 100));
    let third = Arc::new(Instance::new("ins-c", "10.0.0.3", 8080, 100));
    let registry = DemoRegistry::new(
        "prod",
        "orders",
        vec![first.clone(), second.clone(), third.clone()],
    );

    let options = HealthOptions {
        detect_interval_seconds: 2,
        fusing_timeout_seconds: 2,
        report_interval_seconds: 3,
        report_threshold: 10000,
    };
    let monitor = HealthMonitor::new(
        options,
        registry,
        Arc::new(WeightedRandomBalancer::new(BalanceOptions::default())),
        vec![FlakyDetector::new(1) as Arc<dyn Detector>],
        vec![Arc::new(ConsoleReporter) as Arc<dyn Reporter>],
    );

    // 演示1: 熔断器打开，实例退出流量
    info!("=== 演示1: 熔断 ===");
    second.set_dynamic_weight(40);
    monitor.change_status(
        "prod",
        "orders",
        &second,
        InstanceStatus::Fused,
        "circuit breaker opened after consecutive errors",
    );
    info!(
        "🔥 {} fused, choosable = {}",
        second.address(),
        second.is_choosable()
    );

    // 演示2: 探测循环找回实例
    info!("=== 演示2: 探测恢复 ===");
    info!("⏳ 第一轮探测会失败，第二轮确认可用...");
    sleep(Duration::from_secs(5)).await;
    info!(
        "📊 {} status = {:?}, dynamic weight = {}",
        second.address(),
        second.status(),
        second.dynamic_weight()
    );

    // 演示3: 半开实例通过放量验证，逐步回到正常
    info!("=== 演示3: 放量验证 ===");
    monitor.change_status(
        "prod",
        "orders",
        &second,
        InstanceStatus::HalfClose,
        "passive verification passed",
    );
    monitor.recover_all("prod", "orders", &[first, second.clone(), third]);
    monitor.change_status(
        "prod",
        "orders",
        &second,
        InstanceStatus::Normal,
        "fully recovered",
    );

    // 等一个上报周期，看攒批后的变更记录
    info!("⏳ 等待上报周期...");
    sleep(Duration::from_secs(4)).await;

    info!("🛑 停止监控");
    monitor.dispose();

    info!("🎉 演示完成");
    info!("  1. ✅ 熔断实例被探测循环自动找回");
    info!("  2. ✅ 状态迁移全程通知负载均衡器");
    info!("  3. ✅ 变更记录攒批后统一上报");
    Ok(())
}
