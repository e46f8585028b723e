// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::target::EngineKind;

/// 爬取作业实体
///
/// 表示一次具体的归档爬取执行。作业由调度器在到期或手动触发时创建，
/// 驱动编排器完成 抓取 → 写入容器 → 封存 的完整流程。
/// 状态转换遵循：Pending → Running → Completed/Failed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    /// 作业唯一标识符
    pub id: Uuid,
    /// 所属目标的ID
    pub target_id: Uuid,
    /// 作业状态
    pub status: JobStatus,
    /// 实际使用的抓取引擎
    pub engine: EngineKind,
    /// 作业计数器
    pub counters: JobCounters,
    /// 失败原因（仅在Failed状态下有值）
    pub error_message: Option<String>,
    /// 是否为部分完成（取消或超时后封存了部分记录）
    pub partial: bool,
    /// 创建时间
    pub created_at: DateTime<Utc>,
    /// 开始执行时间
    pub started_at: Option<DateTime<Utc>>,
    /// 结束时间
    pub completed_at: Option<DateTime<Utc>>,
}

/// 作业计数器
///
/// 单个资源的失败从不中止作业，只在这里累加；
/// 作业级失败通过作业状态上报。
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobCounters {
    /// 已抓取的页面数（HTML文档）
    pub pages_fetched: usize,
    /// 已抓取的资源数（css/js/图片等）
    pub resources_fetched: usize,
    /// 已下载的字节数
    pub bytes_fetched: u64,
    /// 抓取失败的资源数
    pub fetch_errors: usize,
}

/// 作业状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// 待执行
    #[default]
    Pending,
    /// 执行中
    Running,
    /// 已完成
    Completed,
    /// 已失败
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 领域错误类型
#[derive(Error, Debug)]
pub enum DomainError {
    /// 无效的状态转换
    #[error("Invalid state transition: {0} -> {1}")]
    InvalidStateTransition(JobStatus, JobStatus),

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl CrawlJob {
    /// 创建一个新的待执行作业
    pub fn new(target_id: Uuid, engine: EngineKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id,
            status: JobStatus::Pending,
            engine,
            counters: JobCounters::default(),
            error_message: None,
            partial: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// 启动作业
    ///
    /// # 返回值
    ///
    /// * `Ok(CrawlJob)` - 成功转入Running状态的作业
    /// * `Err(DomainError)` - 状态转换失败
    pub fn start(mut self) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Running;
                self.started_at = Some(Utc::now());
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(other, JobStatus::Running)),
        }
    }

    /// 完成作业
    pub fn complete(mut self, counters: JobCounters, partial: bool) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Running => {
                self.status = JobStatus::Completed;
                self.counters = counters;
                self.partial = partial;
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(other, JobStatus::Completed)),
        }
    }

    /// 标记作业失败
    pub fn fail(mut self, counters: JobCounters, reason: String) -> Result<Self, DomainError> {
        match self.status {
            JobStatus::Running | JobStatus::Pending => {
                self.status = JobStatus::Failed;
                self.counters = counters;
                self.error_message = Some(reason);
                self.completed_at = Some(Utc::now());
                Ok(self)
            }
            other => Err(DomainError::InvalidStateTransition(other, JobStatus::Failed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let job = CrawlJob::new(Uuid::new_v4(), EngineKind::Http);
        assert_eq!(job.status, JobStatus::Pending);

        let job = job.start().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.started_at.is_some());

        let counters = JobCounters {
            pages_fetched: 3,
            ..Default::default()
        };
        let job = job.complete(counters, false).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.counters.pages_fetched, 3);
        assert!(!job.partial);
    }

    #[test]
    fn test_invalid_transition() {
        let job = CrawlJob::new(Uuid::new_v4(), EngineKind::Http);
        // Completing a job that never started must be rejected
        assert!(job.complete(JobCounters::default(), false).is_err());
    }

    #[test]
    fn test_fail_from_pending() {
        // A job can fail before starting (e.g. engine unavailable)
        let job = CrawlJob::new(Uuid::new_v4(), EngineKind::Browser);
        let job = job.fail(JobCounters::default(), "browser unreachable".to_string()).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("browser unreachable"));
    }
}
