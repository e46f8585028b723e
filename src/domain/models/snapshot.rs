// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 快照实体
///
/// 某目标在某时刻的一次已封存容器的版本化引用。
/// 同一目标的版本号严格递增、从不复用；对前一快照的引用
/// 是弱引用（仅存ID），删除前一快照不会级联删除本快照，
/// 只会使其差异基线失效。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// 快照唯一标识符
    pub id: Uuid,
    /// 所属目标的ID
    pub target_id: Uuid,
    /// 产生本快照的作业ID
    pub job_id: Uuid,
    /// 版本号，同一目标内严格递增
    pub version_number: u64,
    /// 已封存容器的存储定位符
    pub container_locator: String,
    /// 前一快照的ID（弱引用，仅用于差异基线）
    pub previous_snapshot_id: Option<Uuid>,
    /// 内容摘要（抽取文本的SHA-256）
    pub content_digest: String,
    /// 结构摘要（标记骨架的SHA-256）
    pub structure_digest: String,
    /// 捕获的页面数
    pub pages_captured: usize,
    /// 捕获的资源数
    pub resources_captured: usize,
    /// 是否为部分完成的捕获
    pub partial: bool,
    /// 捕获时间
    pub captured_at: DateTime<Utc>,
}

/// 快照登记处
///
/// 引擎自持的作业/快照记录（长期运营指标属于外部状态接收方）。
/// 版本号分配按目标严格串行化：内部锁保证并发作业下
/// 版本号不会竞争；配合调度器"每目标至多一个在途作业"的
/// 不变式，序列无间隙。
#[derive(Default)]
pub struct SnapshotRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// 每目标的最新版本号
    versions: HashMap<Uuid, u64>,
    /// 每目标的快照历史（按版本号升序）
    snapshots: HashMap<Uuid, Vec<Snapshot>>,
}

impl SnapshotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为目标分配下一个版本号
    ///
    /// # 返回值
    ///
    /// 严格递增的版本号，从1开始
    pub fn next_version(&self, target_id: Uuid) -> u64 {
        let mut inner = self.inner.lock();
        let version = inner.versions.entry(target_id).or_insert(0);
        *version += 1;
        *version
    }

    /// 登记一个新快照
    pub fn register(&self, snapshot: Snapshot) {
        let mut inner = self.inner.lock();
        inner
            .snapshots
            .entry(snapshot.target_id)
            .or_default()
            .push(snapshot);
    }

    /// 获取目标的最新快照
    pub fn latest(&self, target_id: Uuid) -> Option<Snapshot> {
        let inner = self.inner.lock();
        inner
            .snapshots
            .get(&target_id)
            .and_then(|v| v.last())
            .cloned()
    }

    /// 根据ID查找快照（弱引用解析）
    ///
    /// 差异基线通过这里按ID查找；被删除的快照返回None，
    /// 调用方将其视为"无基线"，而不是错误。
    pub fn find(&self, snapshot_id: Uuid) -> Option<Snapshot> {
        let inner = self.inner.lock();
        inner
            .snapshots
            .values()
            .flatten()
            .find(|s| s.id == snapshot_id)
            .cloned()
    }

    /// 删除一个快照
    ///
    /// 删除不会级联：后继快照保留，只是其差异基线失效。
    pub fn remove(&self, snapshot_id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        for list in inner.snapshots.values_mut() {
            if let Some(pos) = list.iter().position(|s| s.id == snapshot_id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// 目标的全部快照历史
    pub fn history(&self, target_id: Uuid) -> Vec<Snapshot> {
        let inner = self.inner.lock();
        inner.snapshots.get(&target_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(target_id: Uuid, version: u64) -> Snapshot {
        Snapshot {
            id: Uuid::new_v4(),
            target_id,
            job_id: Uuid::new_v4(),
            version_number: version,
            container_locator: format!("2025/08/29/{}/v{}.avcr", target_id, version),
            previous_snapshot_id: None,
            content_digest: String::new(),
            structure_digest: String::new(),
            pages_captured: 0,
            resources_captured: 0,
            partial: false,
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_versions_strictly_increase() {
        let registry = SnapshotRegistry::new();
        let target = Uuid::new_v4();

        let versions: Vec<u64> = (0..5).map(|_| registry.next_version(target)).collect();
        assert_eq!(versions, vec![1, 2, 3, 4, 5]);

        // A second target gets its own sequence
        let other = Uuid::new_v4();
        assert_eq!(registry.next_version(other), 1);
    }

    #[test]
    fn test_remove_does_not_cascade() {
        let registry = SnapshotRegistry::new();
        let target = Uuid::new_v4();

        let first = snapshot(target, registry.next_version(target));
        let first_id = first.id;
        registry.register(first);

        let mut second = snapshot(target, registry.next_version(target));
        second.previous_snapshot_id = Some(first_id);
        let second_id = second.id;
        registry.register(second);

        assert!(registry.remove(first_id));

        // Successor survives; only its diff baseline is gone
        let survivor = registry.find(second_id).unwrap();
        assert_eq!(survivor.version_number, 2);
        assert!(registry.find(first_id).is_none());

        // Version counter is not reset by deletion
        assert_eq!(registry.next_version(target), 3);
    }
}
