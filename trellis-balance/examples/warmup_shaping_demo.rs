use std::time::Duration;
use tokio::time::sleep;
use tracing::info;

use trellis_balance::WarmUpTrafficShaping;
use trellis_core::{LimitResource, LimitType, RateAmount, RateLimitRule, WarmUpOptions};

/// 每秒向限流器发起固定数量的请求，返回放行和拒绝数
async fn drive_one_second(
    shaping: &WarmUpTrafficShaping,
    rule: &RateLimitRule,
    partition: u32,
    attempts: u32,
) -> (u32, u32) {
    let mut admitted = 0;
    let mut rejected = 0;
    for _ in 0..attempts {
        if shaping.in_flow(rule, partition).await.is_ok() {
            admitted += 1;
        } else {
            rejected += 1;
        }
    }
    sleep(Duration::from_secs(1)).await;
    (admitted, rejected)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("🚀 启动预热限流演示");

    // 预热4秒，冷速率是稳定速率的一半，空闲2个周期后停表
    let options = WarmUpOptions {
        warm_time_seconds: 4,
        warn_factor: 2.0,
        idle_period_ticks: 2,
    };
    let shaping = WarmUpTrafficShaping::new(options);

    // 全局40 QPS，当前集群2个分片，本分片稳定速率20 QPS
    let rule = RateLimitRule {
        id: "orders-write".to_string(),
        resource: LimitResource::Qps,
        limit_type: LimitType::Global,
        amounts: vec![RateAmount {
            amount: 40,
            duration_seconds: 1,
        }],
    };

    info!("=== 演示1: 冷启动爬升 ===");
    info!("稳定速率20 QPS，冷启动从10 QPS开始，每秒打满30个请求：");
    for second in 1..=7 {
        let (admitted, rejected) = drive_one_second(&shaping, &rule, 2, 30).await;
        info!(
            "  第{}秒: 放行 {:2} 拒绝 {:2}",
            second, admitted, rejected
        );
    }

    info!("=== 演示2: 分片数变化 ===");
    info!("集群扩到4个分片，本分片稳定速率降到10 QPS：");
    for second in 1..=3 {
        let (admitted, rejected) = drive_one_second(&shaping, &rule, 4, 30).await;
        info!(
            "  第{}秒: 放行 {:2} 拒绝 {:2}",
            second, admitted, rejected
        );
    }

    info!("=== 演示3: 空闲回收 ===");
    info!("停止流量，令牌桶回满后补充任务自行停止...");
    sleep(Duration::from_secs(4)).await;

    info!("流量恢复，从冷启动速率重新爬升：");
    for second in 1..=3 {
        let (admitted, rejected) = drive_one_second(&shaping, &rule, 4, 30).await;
        info!(
            "  第{}秒: 放行 {:2} 拒绝 {:2}",
            second, admitted, rejected
        );
    }

    info!("🛑 销毁限流器");
    shaping.dispose();
    if let Err(err) = shaping.in_flow(&rule, 4).await {
        info!("销毁后的请求被拒绝: {}", err);
    }

    info!("🎉 演示完成");
    info!("  1. ✅ 冷启动速率逐秒爬升到稳定速率");
    info!("  2. ✅ 分片数变化时配额就地收紧");
    info!("  3. ✅ 空闲时补充任务自动停止，流量恢复后重新预热");
    Ok(())
}
