use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

use trellis_core::{InstanceId, InstanceStatus, Location, Metadata};

/// 一次实例状态迁移
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangeRecord {
    pub time: DateTime<Utc>,
    pub before: InstanceStatus,
    pub after: InstanceStatus,
    pub reason: String,
}

/// 一组异常实例的共同特征，位置逐级取交集，元数据取公共键值对
#[derive(Debug, Clone, Serialize)]
pub struct StatusIntersection {
    pub location: Location,
    pub metadata: Metadata,
}

/// 一次批量恢复
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryRecord {
    pub time: DateTime<Utc>,
    pub intersection: StatusIntersection,
}

/// 一个服务待上报的全部变更
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServiceChangelog {
    /// 按实例ID分组的状态迁移记录
    pub status: HashMap<InstanceId, Vec<StatusChangeRecord>>,
    /// 批量恢复记录
    pub recover: Vec<RecoveryRecord>,
}

impl ServiceChangelog {
    pub fn is_empty(&self) -> bool {
        self.status.is_empty() && self.recover.is_empty()
    }
}

/// 待上报记录的暂存区，按namespace、service两级分组
///
/// 上报时整体取走，投递期间新产生的记录自然归入下一批。
#[derive(Debug, Default)]
pub struct ChangeHistory {
    services: HashMap<String, HashMap<String, ServiceChangelog>>,
    count: usize,
}

impl ChangeHistory {
    pub fn record_status(
        &mut self,
        namespace: &str,
        service: &str,
        instance_id: &str,
        record: StatusChangeRecord,
    ) {
        self.changelog_mut(namespace, service)
            .status
            .entry(instance_id.to_string())
            .or_default()
            .push(record);
        self.count += 1;
    }

    pub fn record_recovery(&mut self, namespace: &str, service: &str, record: RecoveryRecord) {
        self.changelog_mut(namespace, service).recover.push(record);
        self.count += 1;
    }

    fn changelog_mut(&mut self, namespace: &str, service: &str) -> &mut ServiceChangelog {
        self.services
            .entry(namespace.to_string())
            .or_default()
            .entry(service.to_string())
            .or_default()
    }

    /// 待上报记录总条数
    pub fn count(&self) -> usize {
        self.count
    }

    /// 取走全部记录并清零计数
    pub fn take(&mut self) -> HashMap<String, HashMap<String, ServiceChangelog>> {
        self.count = 0;
        std::mem::take(&mut self.services)
    }
}
