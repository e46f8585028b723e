// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::archive::record::ArchiveError;
use crate::archive::store::{ArchiveStore, StoreError};
use crate::config::settings::SchedulerSettings;
use crate::crawler::orchestrator::{CrawlError, CrawlOrchestrator, CrawlOutcome};
use crate::detector::change_detector::ChangeDetector;
use crate::detector::summary::SnapshotSummary;
use crate::archive::reader::ContainerReader;
use crate::domain::models::change::ChangeClass;
use crate::domain::models::schedule::{AdaptivePolicy, Schedule, ScheduleError, ScheduleState};
use crate::domain::models::snapshot::{Snapshot, SnapshotRegistry};
use crate::domain::models::target::{CrawlTarget, EngineKind};
use crate::domain::ports::ReanalysisSink;
use crate::index::indexer::{batch_index, IndexError, SnapshotIndex};

/// 调度层错误类型
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Unknown target: {0}")]
    UnknownTarget(Uuid),

    #[error("Schedule state error: {0}")]
    Schedule(#[from] ScheduleError),

    #[error("No engine registered for kind {0}")]
    NoEngine(EngineKind),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Crawl error: {0}")]
    Crawl(#[from] CrawlError),
}

/// 归档调度器
///
/// 每目标一条调度记录的自适应调度。到期队列是唯一的
/// 同步点；工作池用信号量封顶，超订的作业按优先级权重
/// 排队，同权重按到期先后。每目标至多一个在途作业由
/// 调度状态机保证。
pub struct ArchiveScheduler {
    settings: SchedulerSettings,
    policy: AdaptivePolicy,
    schedules: DashMap<Uuid, Schedule>,
    targets: DashMap<Uuid, CrawlTarget>,
    orchestrators: HashMap<EngineKind, Arc<CrawlOrchestrator>>,
    registry: Arc<SnapshotRegistry>,
    store: Arc<dyn ArchiveStore>,
    detector: ChangeDetector,
    reanalysis_sink: Arc<dyn ReanalysisSink>,
    pool: Arc<Semaphore>,
    index: Arc<Mutex<SnapshotIndex>>,
    index_path: PathBuf,
    cancel_tx: watch::Sender<bool>,
}

impl ArchiveScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SchedulerSettings,
        orchestrators: HashMap<EngineKind, Arc<CrawlOrchestrator>>,
        registry: Arc<SnapshotRegistry>,
        store: Arc<dyn ArchiveStore>,
        detector: ChangeDetector,
        reanalysis_sink: Arc<dyn ReanalysisSink>,
        index_path: PathBuf,
    ) -> Arc<Self> {
        let (cancel_tx, _) = watch::channel(false);
        let policy = AdaptivePolicy {
            escalation_factor: settings.escalation_factor,
            deescalation_factor: settings.deescalation_factor,
            no_change_streak: settings.no_change_streak,
            min_interval_secs: settings.min_interval_secs,
            max_interval_secs: settings.max_interval_secs,
        };
        Arc::new(Self {
            pool: Arc::new(Semaphore::new(settings.max_concurrent_jobs)),
            settings,
            policy,
            schedules: DashMap::new(),
            targets: DashMap::new(),
            orchestrators,
            registry,
            store,
            detector,
            reanalysis_sink,
            index: Arc::new(Mutex::new(SnapshotIndex::new())),
            index_path,
            cancel_tx,
        })
    }

    /// 注册一个目标及其调度
    ///
    /// 追踪哪些目标永远是外部协作方的决定。
    pub fn register(&self, target: CrawlTarget, base_interval_secs: i64, priority: i32) {
        let schedule = Schedule::new(target.id, base_interval_secs, priority);
        info!(
            target_id = %target.id,
            seed = %target.seed_url,
            interval_secs = base_interval_secs,
            priority,
            "Registered crawl target"
        );
        self.schedules.insert(target.id, schedule);
        self.targets.insert(target.id, target);
    }

    /// 手动触发一次捕获
    ///
    /// 绕过到期时间，但不绕过"每目标至多一个在途作业"：
    /// 已入队或执行中的目标返回错误。
    pub fn trigger_now(&self, target_id: Uuid) -> Result<(), SchedulerError> {
        let mut schedule = self
            .schedules
            .get_mut(&target_id)
            .ok_or(SchedulerError::UnknownTarget(target_id))?;
        schedule.mark_due()?;
        info!(%target_id, "Manual capture trigger");
        Ok(())
    }

    /// 从存储中的全部容器重建快照索引
    ///
    /// 重建结果与增量并入等价。
    pub async fn rebuild_index(&self) -> Result<usize, SchedulerError> {
        let locators = self.store.list("").await?;
        let entries = batch_index(self.store.as_ref(), &locators).await?;
        let count = entries.len();

        let mut index = self.index.lock().await;
        *index = SnapshotIndex::new();
        index.absorb(entries);
        index.save(&self.index_path).await?;
        info!(containers = locators.len(), entries = count, "Index rebuilt");
        Ok(count)
    }

    /// 当前的快照索引句柄
    pub fn index(&self) -> Arc<Mutex<SnapshotIndex>> {
        Arc::clone(&self.index)
    }

    /// 查询调度（测试与运维可见性）
    pub fn schedule_of(&self, target_id: Uuid) -> Option<Schedule> {
        self.schedules.get(&target_id).map(|s| s.clone())
    }

    /// 请求停机：在途作业封存部分容器后退出
    pub fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// 调度循环主体
    pub async fn run_loop(self: Arc<Self>) {
        let mut shutdown = self.cancel_tx.subscribe();
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.settings.tick_interval_secs));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler loop stopping");
                        break;
                    }
                }
            }
        }
    }

    /// 单次调度扫描
    ///
    /// 到期的调度推进到Queued；随后按(优先级降序, 到期升序)
    /// 尝试领取工作槽。池满属于推迟，不是错误。
    pub async fn tick(self: &Arc<Self>) {
        let now = Utc::now();

        // Phase 1: promote due schedules
        for mut entry in self.schedules.iter_mut() {
            if entry.is_due(now) {
                if entry.mark_due().is_ok() {
                    let _ = entry.mark_queued();
                }
            } else if entry.state == ScheduleState::Due {
                // Manual triggers land here
                let _ = entry.mark_queued();
            }
        }

        // Phase 2: pick queued schedules in priority order
        let mut queued: Vec<(Uuid, i32, chrono::DateTime<Utc>)> = self
            .schedules
            .iter()
            .filter(|e| e.state == ScheduleState::Queued)
            .map(|e| (e.target_id, e.priority, e.next_run_at))
            .collect();
        queued.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for (target_id, _, _) in queued {
            let Ok(permit) = Arc::clone(&self.pool).try_acquire_owned() else {
                // Pool exhausted; the rest stay queued for the next tick
                debug!("Worker pool full, deferring queued schedules");
                break;
            };

            let run_ok = self
                .schedules
                .get_mut(&target_id)
                .map(|mut s| s.mark_running().is_ok())
                .unwrap_or(false);
            if !run_ok {
                continue;
            }

            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                scheduler.run_one(target_id).await;
                drop(permit);
            });
        }
    }

    /// 执行一个目标的完整捕获回合
    ///
    /// 爬取、建索引、对上一版本做变化检测、路由报告、
    /// 回写自适应调度状态。
    async fn run_one(&self, target_id: Uuid) {
        let Some(target) = self.targets.get(&target_id).map(|t| t.clone()) else {
            error!(%target_id, "Schedule without target, dropping run");
            self.finish_run(target_id, Err(SchedulerError::UnknownTarget(target_id)));
            return;
        };

        let Some(orchestrator) = self.orchestrators.get(&target.engine) else {
            error!(%target_id, engine = %target.engine, "No orchestrator for engine");
            self.finish_run(target_id, Err(SchedulerError::NoEngine(target.engine)));
            return;
        };

        // Diff baseline is whatever was latest before this run
        let baseline = self.registry.latest(target_id);
        let cancel = self.cancel_tx.subscribe();

        match orchestrator.run(&target, cancel).await {
            Ok(outcome) => self.finish_success(&target, baseline, outcome).await,
            Err(e) => {
                warn!(%target_id, error = %e, "Scheduled crawl failed");
                self.finish_run(target_id, Err(SchedulerError::Crawl(e)));
            }
        }
    }

    /// 成功爬取的收尾：无论后处理结果如何，调度一定回到Idle
    async fn finish_success(
        &self,
        target: &CrawlTarget,
        baseline: Option<Snapshot>,
        outcome: CrawlOutcome,
    ) {
        let classification = self.absorb_outcome(target, baseline, outcome).await;
        self.complete_schedule(target.id, classification);
    }

    /// 吸收一次成功爬取：索引并入 + 变化检测 + 报告路由
    ///
    /// 后处理故障从不卡住调度：索引可以从容器重建，
    /// 丢失或损坏的基线按"无基线"处理（快照的前向引用
    /// 本就是弱引用）。
    async fn absorb_outcome(
        &self,
        target: &CrawlTarget,
        baseline: Option<Snapshot>,
        outcome: CrawlOutcome,
    ) -> Option<ChangeClass> {
        {
            let mut index = self.index.lock().await;
            index.absorb(outcome.index_entries);
            if let Err(e) = index.save(&self.index_path).await {
                // The container itself is stored; the index is rebuildable
                warn!(target_id = %target.id, error = %e, "Index save failed");
            }
        }

        let prev = baseline?;
        match self.load_summary(&prev.container_locator).await {
            Ok(prev_summary) => {
                let report = self.detector.detect(
                    target.id,
                    prev.id,
                    outcome.snapshot.id,
                    &prev_summary,
                    &outcome.summary,
                );
                self.reanalysis_sink.report(&report).await;
                Some(report.classification)
            }
            Err(e) => {
                warn!(
                    target_id = %target.id,
                    locator = %prev.container_locator,
                    error = %e,
                    "Baseline unavailable, skipping change report"
                );
                None
            }
        }
    }

    async fn load_summary(&self, locator: &str) -> Result<SnapshotSummary, SchedulerError> {
        let data = self.store.get(locator).await?;
        let reader = ContainerReader::new(data);
        Ok(SnapshotSummary::from_container(&reader)?)
    }

    fn complete_schedule(&self, target_id: Uuid, classification: Option<ChangeClass>) {
        if let Some(mut schedule) = self.schedules.get_mut(&target_id) {
            schedule.complete_run(classification, &self.policy, Utc::now());
        }
    }

    fn finish_run(&self, target_id: Uuid, result: Result<(), SchedulerError>) {
        if let Err(e) = result {
            if let Some(mut schedule) = self.schedules.get_mut(&target_id) {
                if schedule.state == ScheduleState::Running {
                    schedule.fail_run(self.settings.failure_threshold, &self.policy, Utc::now());
                }
            }
            debug!(%target_id, error = %e, "Run finished with failure");
        }
    }
}
