pub mod changelog;
pub mod traits;

pub use changelog::{
    ChangeHistory, RecoveryRecord, ServiceChangelog, StatusChangeRecord, StatusIntersection,
};
pub use traits::{
    DetectOutcome, Detector, Registry, RegistryCategory, RegistrySnapshot, Reporter, ServiceData,
};

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use trellis_core::{
    metadata_intersection, HealthOptions, Instance, InstanceId, InstanceStatus,
};

use crate::balance::LoadBalancer;

/// 熔断实例健康监控
///
/// 周期性扫描注册中心里处于熔断态的实例，逐个探测并把确认可用的
/// 转入半开；其余状态迁移由外部熔断器通过 [`HealthMonitor::change_status`]
/// 写入。状态变更攒批后交给上报器。
///
/// 所有熔断实例共用一个探测周期。没有配置探测器时恢复走熔断超时
/// 兜底，最坏恢复时延为 detect_interval + fusing_timeout。
pub struct HealthMonitor {
    options: HealthOptions,
    registry: Arc<dyn Registry>,
    balancer: Arc<dyn LoadBalancer>,
    detectors: Vec<Arc<dyn Detector>>,
    reporters: Vec<Arc<dyn Reporter>>,
    /// 至少一个上报器消费变更记录时才积累历史
    need_report: bool,
    history: Mutex<ChangeHistory>,
    /// 探测中的实例ID，同一实例不会被两轮探测同时覆盖
    pending: Mutex<HashSet<InstanceId>>,
    report_timer: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    disposed: AtomicBool,
}

impl HealthMonitor {
    /// 创建监控器并立即启动探测循环
    pub fn new(
        options: HealthOptions,
        registry: Arc<dyn Registry>,
        balancer: Arc<dyn LoadBalancer>,
        detectors: Vec<Arc<dyn Detector>>,
        reporters: Vec<Arc<dyn Reporter>>,
    ) -> Arc<Self> {
        let need_report = reporters.iter().any(|reporter| reporter.wants_changelog());
        let monitor = Arc::new(Self {
            options,
            registry,
            balancer,
            detectors,
            reporters,
            need_report,
            history: Mutex::new(ChangeHistory::default()),
            pending: Mutex::new(HashSet::new()),
            report_timer: Mutex::new(None),
            cancel: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        });
        monitor.spawn_detect_loop();
        monitor
    }

    fn spawn_detect_loop(self: &Arc<Self>) {
        info!(
            "health monitor started, detect interval {}s, {} detectors, {} reporters",
            self.options.detect_interval_seconds,
            self.detectors.len(),
            self.reporters.len()
        );
        // 循环只持有弱引用，监控器被外部释放后循环自行退出
        let weak = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = Duration::from_secs(self.options.detect_interval_seconds);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(monitor) = weak.upgrade() else { break };
                        monitor.detect_now().await;
                    }
                }
            }
            debug!("health monitor detect loop exited");
        });
    }

    /// 立即执行一轮探测
    ///
    /// 探测循环每个周期调用一次，也可以手动触发。一轮探测在所有
    /// 实例的探测都落定后才结束。
    pub async fn detect_now(self: &Arc<Self>) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        let snapshot = self.registry.local(RegistryCategory::Instance);
        let mut probes = Vec::new();
        for (namespace, services) in &snapshot {
            for (service, data) in services {
                for instance in &data.instances {
                    if instance.status() != InstanceStatus::Fused {
                        continue;
                    }
                    if !self.pending.lock().insert(instance.id.clone()) {
                        // 上一轮对它的探测还没结束
                        continue;
                    }
                    instance.set_dynamic_weight(0);
                    probes.push(self.probe(
                        namespace.clone(),
                        service.clone(),
                        Arc::clone(instance),
                    ));
                }
            }
        }
        if probes.is_empty() {
            return;
        }
        debug!("probing {} fused instances", probes.len());
        join_all(probes).await;
    }

    async fn probe(self: &Arc<Self>, namespace: String, service: String, instance: Arc<Instance>) {
        match self.detect_instance(&instance).await {
            Ok(outcome) => self.apply_outcome(&namespace, &service, &instance, outcome),
            Err(err) => {
                // 探测器自身出错不迁移状态，等下一个周期重试
                error!("detect instance {} failed: {}", instance.id, err);
            }
        }
        self.pending.lock().remove(&instance.id);
    }

    /// 依次执行探测器，第一个非Success的结论即为整体结论
    async fn detect_instance(&self, instance: &Instance) -> anyhow::Result<DetectOutcome> {
        let mut succeeded = 0usize;
        for detector in &self.detectors {
            let outcome = detector.detect(instance).await?;
            match outcome {
                DetectOutcome::Success => succeeded += 1,
                other => {
                    debug!(
                        "detector {} returned {:?} for instance {}",
                        detector.name(),
                        other,
                        instance.id
                    );
                    return Ok(other);
                }
            }
        }
        if succeeded > 0 {
            Ok(DetectOutcome::Success)
        } else {
            // 没有配置任何探测器，结论视为未知
            Ok(DetectOutcome::Other)
        }
    }

    fn apply_outcome(
        self: &Arc<Self>,
        namespace: &str,
        service: &str,
        instance: &Arc<Instance>,
        outcome: DetectOutcome,
    ) {
        match outcome {
            DetectOutcome::Success => {
                if instance.status() == InstanceStatus::Fused {
                    let reason = format!(
                        "one of {} detectors reported the instance alive",
                        self.detectors.len()
                    );
                    self.change_status(
                        namespace,
                        service,
                        instance,
                        InstanceStatus::HalfOpen,
                        &reason,
                    );
                }
            }
            DetectOutcome::Failure => {
                debug!("instance {} still unavailable, stays fused", instance.id);
            }
            DetectOutcome::Other => {
                self.schedule_fusing_recovery(
                    namespace.to_string(),
                    service.to_string(),
                    Arc::clone(instance),
                );
            }
        }
    }

    /// 结论未知时的兜底：熔断超时后实例仍是熔断态就转半开
    fn schedule_fusing_recovery(
        self: &Arc<Self>,
        namespace: String,
        service: String,
        instance: Arc<Instance>,
    ) {
        let monitor = Arc::clone(self);
        let timeout = Duration::from_secs(self.options.fusing_timeout_seconds);
        tokio::spawn(async move {
            tokio::select! {
                _ = monitor.cancel.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    if instance.status() == InstanceStatus::Fused {
                        let reason = format!(
                            "fused for longer than the fusing timeout {}s",
                            monitor.options.fusing_timeout_seconds
                        );
                        monitor.change_status(
                            &namespace,
                            &service,
                            &instance,
                            InstanceStatus::HalfOpen,
                            &reason,
                        );
                    }
                }
            }
        });
    }

    /// 修改单个实例的状态
    ///
    /// 幂等：目标状态与当前相同时不记录、不通知。监控器销毁后为空操作。
    pub fn change_status(
        self: &Arc<Self>,
        namespace: &str,
        service: &str,
        instance: &Arc<Instance>,
        status: InstanceStatus,
        reason: &str,
    ) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        if self.perform_change(namespace, service, instance, status, reason) {
            self.schedule_report();
        }
    }

    /// 批量修改状态，全部应用后只调度一次上报
    pub fn change_status_batch(
        self: &Arc<Self>,
        namespace: &str,
        service: &str,
        changes: &[(Arc<Instance>, InstanceStatus, String)],
    ) {
        if self.disposed.load(Ordering::Relaxed) {
            return;
        }
        let mut changed = false;
        for (instance, status, reason) in changes {
            changed |= self.perform_change(namespace, service, instance, *status, reason);
        }
        if changed {
            self.schedule_report();
        }
    }

    fn perform_change(
        &self,
        namespace: &str,
        service: &str,
        instance: &Arc<Instance>,
        status: InstanceStatus,
        reason: &str,
    ) -> bool {
        let before = instance.status();
        if before == status {
            return false;
        }
        if self.need_report {
            self.history.lock().record_status(
                namespace,
                service,
                &instance.id,
                StatusChangeRecord {
                    time: Utc::now(),
                    before,
                    after: status,
                    reason: reason.to_string(),
                },
            );
        }
        instance.set_status(status);
        info!(
            "instance {} of {}.{} {:?} -> {:?}: {}",
            instance.id, namespace, service, before, status, reason
        );
        self.balancer
            .on_status_change(namespace, service, instance, before);
        true
    }

    /// 上报一组实例的批量恢复，归纳它们的共同位置和元数据
    ///
    /// 只统计当前不是Normal的实例；全部正常时不产生记录。
    pub fn recover_all(
        self: &Arc<Self>,
        namespace: &str,
        service: &str,
        instances: &[Arc<Instance>],
    ) {
        if self.disposed.load(Ordering::Relaxed) || !self.need_report {
            return;
        }
        let mut intersection: Option<StatusIntersection> = None;
        for instance in instances {
            if instance.status() == InstanceStatus::Normal {
                continue;
            }
            intersection = Some(match intersection {
                None => StatusIntersection {
                    location: instance.location.clone(),
                    metadata: instance.metadata.clone(),
                },
                Some(mut joined) => {
                    if !joined.location.is_empty() {
                        joined.location = joined.location.intersection(&instance.location);
                    }
                    if !joined.metadata.is_empty() {
                        joined.metadata = metadata_intersection(&joined.metadata, &instance.metadata);
                    }
                    joined
                }
            });
        }
        let Some(intersection) = intersection else {
            return;
        };
        self.history.lock().record_recovery(
            namespace,
            service,
            RecoveryRecord {
                time: Utc::now(),
                intersection,
            },
        );
        self.schedule_report();
    }

    /// 攒批上报：首条记录起等一个上报周期，攒够一批立即上报
    fn schedule_report(self: &Arc<Self>) {
        if !self.need_report {
            return;
        }
        let count = self.history.lock().count();
        if count == 0 {
            return;
        }
        if count >= self.options.report_threshold {
            if let Some(timer) = self.report_timer.lock().take() {
                timer.abort();
            }
            let monitor = Arc::clone(self);
            tokio::spawn(async move {
                monitor.report().await;
            });
            return;
        }
        let mut timer = self.report_timer.lock();
        if timer.is_some() {
            return;
        }
        let monitor = Arc::clone(self);
        let delay = Duration::from_secs(self.options.report_interval_seconds);
        *timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = monitor.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    monitor.report_timer.lock().take();
                    monitor.report().await;
                }
            }
        }));
    }

    /// 取走全部待上报记录并投递给上报器
    ///
    /// 先取走再投递，投递期间产生的新记录归入下一批。
    /// 每个上报器一个投递任务，互不影响，失败只记日志。
    async fn report(&self) {
        let drained = self.history.lock().take();
        if drained.is_empty() {
            return;
        }
        for (namespace, services) in drained {
            for (service, changelog) in services {
                if changelog.is_empty() {
                    continue;
                }
                for reporter in &self.reporters {
                    if !reporter.wants_changelog() {
                        continue;
                    }
                    let reporter = Arc::clone(reporter);
                    let namespace = namespace.clone();
                    let service = service.clone();
                    let changelog = changelog.clone();
                    let cancel = self.cancel.clone();
                    tokio::spawn(async move {
                        if let Err(err) = reporter
                            .status_changelog(&namespace, &service, changelog)
                            .await
                        {
                            // 销毁后投递失败不再打扰日志
                            if !cancel.is_cancelled() {
                                error!(
                                    "reporter {} failed on changelog of {}.{}: {}",
                                    reporter.name(),
                                    namespace,
                                    service,
                                    err
                                );
                            }
                        }
                    });
                }
            }
        }
    }

    /// 销毁监控器：停止探测循环，取消挂起的兜底恢复和上报定时器
    ///
    /// 销毁后 change_status / recover_all / detect_now 都是空操作。
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::Relaxed) {
            return;
        }
        self.cancel.cancel();
        if let Some(timer) = self.report_timer.lock().take() {
            timer.abort();
        }
        info!("health monitor disposed");
    }

    /// 是否已销毁
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Relaxed)
    }
}
