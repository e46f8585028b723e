// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::change::ChangeReport;
use crate::domain::models::job::{CrawlJob, JobCounters};

/// 状态接收方接口
///
/// 作业生命周期转换（启动/进度/完成/失败及原因）上报给外部
/// 可观测性协作方。引擎自身只保留作业/快照/索引记录，
/// 不保留长期运营指标。
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// 作业已启动
    async fn job_started(&self, job: &CrawlJob);
    /// 作业进度更新
    async fn job_progress(&self, job_id: Uuid, counters: &JobCounters);
    /// 作业已完成
    async fn job_completed(&self, job: &CrawlJob);
    /// 作业已失败
    async fn job_failed(&self, job: &CrawlJob, reason: &str);
}

/// 重新分析信号接收方接口
///
/// 变化报告（含requires_reanalysis布尔值）发往内容分析协作方；
/// 实际的重新处理不在本引擎范围内。
#[async_trait]
pub trait ReanalysisSink: Send + Sync {
    async fn report(&self, report: &ChangeReport);
}

/// 基于tracing的默认状态接收方
///
/// 没有外部协作方接入时，把生命周期转换写入结构化日志。
#[derive(Default)]
pub struct TracingStatusSink;

#[async_trait]
impl StatusSink for TracingStatusSink {
    async fn job_started(&self, job: &CrawlJob) {
        info!(job_id = %job.id, target_id = %job.target_id, engine = %job.engine, "Crawl job started");
    }

    async fn job_progress(&self, job_id: Uuid, counters: &JobCounters) {
        info!(
            job_id = %job_id,
            pages = counters.pages_fetched,
            resources = counters.resources_fetched,
            bytes = counters.bytes_fetched,
            errors = counters.fetch_errors,
            "Crawl job progress"
        );
    }

    async fn job_completed(&self, job: &CrawlJob) {
        info!(
            job_id = %job.id,
            pages = job.counters.pages_fetched,
            bytes = job.counters.bytes_fetched,
            partial = job.partial,
            "Crawl job completed"
        );
    }

    async fn job_failed(&self, job: &CrawlJob, reason: &str) {
        warn!(job_id = %job.id, target_id = %job.target_id, reason, "Crawl job failed");
    }
}

/// 基于tracing的默认重新分析信号接收方
#[derive(Default)]
pub struct TracingReanalysisSink;

#[async_trait]
impl ReanalysisSink for TracingReanalysisSink {
    async fn report(&self, report: &ChangeReport) {
        info!(
            target_id = %report.target_id,
            aggregate = report.aggregate_score,
            classification = %report.classification,
            requires_reanalysis = report.requires_reanalysis,
            "Change report emitted"
        );
    }
}
