use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use trellis_core::{CoreError, RateLimitRule, Result, WarmUpOptions};

/// 单条规则的预热令牌桶
///
/// 与常规令牌桶相反，令牌存量越高说明实例越"冷"，当前可放行的
/// QPS 越低。流量持续消耗令牌后存量降到预警水位以下，放行速率
/// 便回到稳定速率。
#[derive(Debug)]
struct RateBucket {
    /// 全局配额均分到的分片数
    partition: u32,
    /// 稳定速率，取规则各档位换算后最小的QPS
    stable_qps: f64,
    /// 冷启动速率，stable_qps / warn_factor
    cold_qps: f64,
    /// 预警水位，令牌存量低于该值时按稳定速率放行
    warning_tokens: f64,
    /// 令牌存量上限
    max_tokens: f64,
    /// 预警水位以上 1/QPS 直线的斜率
    slope: f64,
    /// 当前令牌存量，始终处于 [0, max_tokens]
    remaining_tokens: f64,
    /// 本秒已放行的请求数
    used_qps: f64,
    /// 本秒剩余的放行额度
    remaining_qps: f64,
    /// 连续满桶的周期数
    sleep_period: u32,
    /// 补充任务是否在运行
    timer_running: bool,
}

impl RateBucket {
    fn build(rule: &RateLimitRule, partition: u32, options: &WarmUpOptions) -> Self {
        let warm_time = options.warm_time_seconds as f64;
        // 取规则各档位中最小的QPS作为稳定速率
        let stable_qps = rule
            .amounts
            .iter()
            .map(|tier| (tier.amount as f64 / partition as f64) / tier.duration_seconds as f64)
            .fold(f64::INFINITY, f64::min);
        let cold_qps = stable_qps / options.warn_factor;
        let warning_tokens = stable_qps * warm_time / (options.warn_factor - 1.0);
        let max_tokens = warning_tokens + 2.0 * warm_time / (1.0 / stable_qps + 1.0 / cold_qps);
        let slope = (1.0 / cold_qps - 1.0 / stable_qps) / (max_tokens - warning_tokens);
        Self {
            partition,
            stable_qps,
            cold_qps,
            warning_tokens,
            max_tokens,
            slope,
            remaining_tokens: max_tokens,
            used_qps: 0.0,
            remaining_qps: admitted_rate(slope, warning_tokens, max_tokens, stable_qps),
            sleep_period: 0,
            timer_running: false,
        }
    }

    /// 分片数变化时按新分片重建参数，保留本秒已放行的量
    fn rebuild(&mut self, rule: &RateLimitRule, partition: u32, options: &WarmUpOptions) {
        let fresh = RateBucket::build(rule, partition, options);
        self.partition = fresh.partition;
        self.stable_qps = fresh.stable_qps;
        self.cold_qps = fresh.cold_qps;
        self.warning_tokens = fresh.warning_tokens;
        self.max_tokens = fresh.max_tokens;
        self.slope = fresh.slope;
        self.remaining_tokens = fresh.remaining_tokens;
        // sleep_period 和 timer_running 保持原值
        self.remaining_qps = fresh.remaining_qps - self.used_qps;
        if self.remaining_qps < 0.0 {
            self.remaining_qps = 0.0;
            self.used_qps = fresh.remaining_qps;
        }
    }

    /// 消耗一个放行额度，额度不足时立即拒绝
    fn check_quota(&mut self, rule: &RateLimitRule) -> Result<()> {
        if self.remaining_qps >= 1.0 {
            self.remaining_qps -= 1.0;
            self.used_qps += 1.0;
            return Ok(());
        }
        Err(CoreError::State(format!(
            "quota is limited for rule '{}'",
            rule.id
        )))
    }

    /// 每秒补充令牌并结转上一秒的消费
    fn refill(&mut self) {
        // 处于"热"状态，或"冷"状态但上一秒的消费低于冷启动速率时补充
        if self.remaining_tokens <= self.warning_tokens || self.used_qps < self.cold_qps {
            self.remaining_tokens += self.stable_qps;
            if self.remaining_tokens > self.max_tokens {
                self.remaining_tokens = self.max_tokens;
            }
        }
        self.remaining_tokens = (self.remaining_tokens - self.used_qps).max(0.0);
        self.used_qps = 0.0;
        self.remaining_qps = admitted_rate(
            self.slope,
            self.warning_tokens,
            self.remaining_tokens,
            self.stable_qps,
        );
    }

    /// 记录一个周期的空闲情况，连续满桶超过 idle_period_ticks 时返回 true
    fn note_idle(&mut self, idle_period_ticks: u32) -> bool {
        if self.remaining_tokens == self.max_tokens {
            self.sleep_period += 1;
        } else {
            self.sleep_period = 0;
        }
        self.sleep_period > idle_period_ticks
    }
}

/// 由剩余令牌量换算当前一秒可放行的QPS
///
/// 预警水位以下恒为稳定速率，以上沿直线降速，桶满时恰好等于冷启动速率。
fn admitted_rate(slope: f64, warning_tokens: f64, remaining_tokens: f64, stable_qps: f64) -> f64 {
    if remaining_tokens <= warning_tokens {
        return stable_qps;
    }
    stable_qps / (1.0 + slope * stable_qps * (remaining_tokens - warning_tokens))
}

/// 令牌桶与其补充任务共享的句柄
#[derive(Debug)]
struct BucketHandle {
    state: Mutex<RateBucket>,
}

/// 预热限流器
///
/// 每条规则一个令牌桶，后台任务按秒补充令牌。刚建桶的实例以冷启动
/// 速率放行，流量持续到来时放行速率逐步爬升，约经过 warm_time 秒
/// 达到稳定速率。连续空闲若干个周期后补充任务自动停止，下次放行
/// 请求时重新启动。
pub struct WarmUpTrafficShaping {
    options: WarmUpOptions,
    /// 规则id到令牌桶的映射
    buckets: RwLock<HashMap<String, Arc<BucketHandle>>>,
    disposed: AtomicBool,
    cancel: CancellationToken,
}

impl WarmUpTrafficShaping {
    /// 创建预热限流器，配置需先通过 WarmUpOptions::validate 校验
    pub fn new(options: WarmUpOptions) -> Self {
        Self {
            options,
            buckets: RwLock::new(HashMap::new()),
            disposed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// 入流检查
    ///
    /// 放行时消耗一个额度立即返回，额度耗尽时立即拒绝，从不排队。
    /// partition 为该全局配额当前的分片数，变化时桶参数就地重建。
    pub async fn in_flow(&self, rule: &RateLimitRule, partition: u32) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(CoreError::State(
                "warmup traffic shaping already disposed".to_string(),
            ));
        }
        if partition == 0 {
            return Err(CoreError::InvalidArgument(
                "partition cannot be 0".to_string(),
            ));
        }
        if rule.amounts.is_empty() {
            return Err(CoreError::InvalidArgument(format!(
                "rule '{}' has no amounts defined",
                rule.id
            )));
        }

        let handle = {
            let mut buckets = self.buckets.write().await;
            Arc::clone(buckets.entry(rule.id.clone()).or_insert_with(|| {
                debug!("building warmup bucket for rule '{}'", rule.id);
                Arc::new(BucketHandle {
                    state: Mutex::new(RateBucket::build(rule, partition, &self.options)),
                })
            }))
        };

        let mut state = handle.state.lock();
        if state.partition != partition {
            debug!(
                "rule '{}' partition changed from {} to {}, rebuilding bucket",
                rule.id, state.partition, partition
            );
            state.rebuild(rule, partition, &self.options);
        }
        if !state.timer_running {
            state.timer_running = true;
            self.spawn_refill_task(rule.id.clone(), Arc::clone(&handle));
        }
        state.check_quota(rule)
    }

    /// 启动该桶的每秒补充任务，首次触发在一秒之后
    fn spawn_refill_task(&self, rule_id: String, handle: Arc<BucketHandle>) {
        let cancel = self.cancel.clone();
        let idle_period_ticks = self.options.idle_period_ticks;
        tokio::spawn(async move {
            let first_tick = tokio::time::Instant::now() + Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(first_tick, Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        handle.state.lock().timer_running = false;
                        break;
                    }
                    _ = ticker.tick() => {
                        let mut state = handle.state.lock();
                        state.refill();
                        if state.note_idle(idle_period_ticks) {
                            state.timer_running = false;
                            debug!("rule '{}' bucket idle, refill task stopped", rule_id);
                            break;
                        }
                    }
                }
            }
        });
    }

    /// 销毁限流器，停止全部补充任务，之后的入流检查直接拒绝
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        info!("warmup traffic shaping disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl Default for WarmUpTrafficShaping {
    fn default() -> Self {
        Self::new(WarmUpOptions::default())
    }
}
