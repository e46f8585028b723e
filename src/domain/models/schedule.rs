// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::change::ChangeClass;

/// 调度状态枚举
///
/// 显式的每调度状态机（而非零散标志位），使得
/// "每目标至多一个在途作业"的不变式可实施、可测试。
/// 状态转换遵循：Idle → Due → Queued → Running → Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    /// 空闲，等待下次运行时间到来
    #[default]
    Idle,
    /// 已到期，等待进入队列
    Due,
    /// 已入队，等待工作槽
    Queued,
    /// 作业执行中
    Running,
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScheduleState::Idle => write!(f, "idle"),
            ScheduleState::Due => write!(f, "due"),
            ScheduleState::Queued => write!(f, "queued"),
            ScheduleState::Running => write!(f, "running"),
        }
    }
}

/// 调度错误类型
#[derive(Error, Debug)]
pub enum ScheduleError {
    /// 无效的状态转换
    #[error("Invalid schedule state transition: {0} -> {1}")]
    InvalidTransition(ScheduleState, ScheduleState),
}

/// 自适应间隔策略
///
/// "显著"及以上的分类会缩短下次间隔（升级）；
/// 连续"无变化"会拉长间隔（降级）；两者都受配置的
/// 最小/最大间隔约束。
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdaptivePolicy {
    /// 升级时的间隔乘数（<1.0）
    pub escalation_factor: f64,
    /// 降级时的间隔乘数（>1.0）
    pub deescalation_factor: f64,
    /// 触发降级所需的连续无变化次数
    pub no_change_streak: u32,
    /// 最小间隔（秒）
    pub min_interval_secs: i64,
    /// 最大间隔（秒）
    pub max_interval_secs: i64,
}

impl Default for AdaptivePolicy {
    fn default() -> Self {
        Self {
            escalation_factor: 0.5,
            deescalation_factor: 1.5,
            no_change_streak: 3,
            min_interval_secs: 3600,            // 1 hour
            max_interval_secs: 30 * 24 * 3600,  // 30 days
        }
    }
}

impl AdaptivePolicy {
    fn clamp(&self, secs: i64) -> i64 {
        secs.clamp(self.min_interval_secs, self.max_interval_secs)
    }
}

/// 调度实体
///
/// 每个目标一条调度记录，携带基础频率、优先级权重和
/// 自适应控制所需的状态。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    /// 目标ID
    pub target_id: Uuid,
    /// 基础间隔（秒）
    pub base_interval_secs: i64,
    /// 当前生效的间隔（秒），由自适应控制调整
    pub current_interval_secs: i64,
    /// 优先级权重，数值越大越优先
    pub priority: i32,
    /// 下次运行时间
    pub next_run_at: DateTime<Utc>,
    /// 上次运行时间
    pub last_run_at: Option<DateTime<Utc>>,
    /// 是否启用
    pub enabled: bool,
    /// 调度状态
    pub state: ScheduleState,
    /// 连续失败次数
    pub consecutive_failures: u32,
    /// 连续无变化次数
    pub consecutive_no_change: u32,
    /// 最近一次看到的分类
    pub last_classification: Option<ChangeClass>,
    /// 需要运维关注（连续失败超限后置位，但调度保持启用）
    pub needs_attention: bool,
}

impl Schedule {
    /// 创建一个新调度，首次运行时间为当前时间加基础间隔
    pub fn new(target_id: Uuid, base_interval_secs: i64, priority: i32) -> Self {
        Self {
            target_id,
            base_interval_secs,
            current_interval_secs: base_interval_secs,
            priority,
            next_run_at: Utc::now() + Duration::seconds(base_interval_secs),
            last_run_at: None,
            enabled: true,
            state: ScheduleState::Idle,
            consecutive_failures: 0,
            consecutive_no_change: 0,
            last_classification: None,
            needs_attention: false,
        }
    }

    /// 是否已到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.state == ScheduleState::Idle && self.next_run_at <= now
    }

    /// Idle → Due
    pub fn mark_due(&mut self) -> Result<(), ScheduleError> {
        self.transition(ScheduleState::Idle, ScheduleState::Due)
    }

    /// Due → Queued
    pub fn mark_queued(&mut self) -> Result<(), ScheduleError> {
        self.transition(ScheduleState::Due, ScheduleState::Queued)
    }

    /// Queued → Running
    pub fn mark_running(&mut self) -> Result<(), ScheduleError> {
        let r = self.transition(ScheduleState::Queued, ScheduleState::Running);
        if r.is_ok() {
            self.last_run_at = Some(Utc::now());
        }
        r
    }

    fn transition(&mut self, from: ScheduleState, to: ScheduleState) -> Result<(), ScheduleError> {
        if self.state != from {
            return Err(ScheduleError::InvalidTransition(self.state, to));
        }
        self.state = to;
        Ok(())
    }

    /// 作业完成后回到Idle并根据变化分类重算下次运行时间
    ///
    /// # 参数
    ///
    /// * `classification` - 本次变化检测的分类（首个快照没有基线时为None）
    /// * `policy` - 自适应间隔策略
    /// * `failure_threshold` - 连续失败的关注阈值
    pub fn complete_run(
        &mut self,
        classification: Option<ChangeClass>,
        policy: &AdaptivePolicy,
        now: DateTime<Utc>,
    ) {
        self.state = ScheduleState::Idle;
        self.consecutive_failures = 0;
        self.needs_attention = false;
        self.last_classification = classification;

        match classification {
            Some(class) if class.is_significant() => {
                // Escalate: the site is moving, look again sooner
                self.consecutive_no_change = 0;
                self.current_interval_secs = policy
                    .clamp((self.current_interval_secs as f64 * policy.escalation_factor) as i64);
            }
            Some(ChangeClass::NoChange) => {
                self.consecutive_no_change += 1;
                if self.consecutive_no_change >= policy.no_change_streak {
                    // De-escalate: stable site, stretch the interval
                    self.current_interval_secs = policy.clamp(
                        (self.current_interval_secs as f64 * policy.deescalation_factor) as i64,
                    );
                }
            }
            _ => {
                self.consecutive_no_change = 0;
                // Drift back toward the base interval after ordinary changes
                self.current_interval_secs = policy.clamp(self.base_interval_secs);
            }
        }

        self.next_run_at = now + Duration::seconds(self.current_interval_secs);
    }

    /// 作业失败后回到Idle
    ///
    /// 失败的作业在下一个调度间隔重试（不立即重试）；
    /// 连续失败超过阈值时置位needs_attention，但调度保持启用，
    /// 从不静默永久停用。
    pub fn fail_run(&mut self, failure_threshold: u32, policy: &AdaptivePolicy, now: DateTime<Utc>) {
        self.state = ScheduleState::Idle;
        self.consecutive_failures += 1;
        self.consecutive_no_change = 0;

        if self.consecutive_failures >= failure_threshold {
            self.needs_attention = true;
        }

        // Back off linearly with the failure count, bounded like everything else
        let backoff = self.current_interval_secs.saturating_mul(1 + self.consecutive_failures as i64);
        self.next_run_at = now + Duration::seconds(policy.clamp(backoff));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: i64 = 7 * 24 * 3600;

    fn schedule() -> Schedule {
        Schedule::new(Uuid::new_v4(), WEEK, 5)
    }

    #[test]
    fn test_state_machine_happy_path() {
        let mut s = schedule();
        s.mark_due().unwrap();
        s.mark_queued().unwrap();
        s.mark_running().unwrap();
        assert_eq!(s.state, ScheduleState::Running);

        s.complete_run(Some(ChangeClass::Minor), &AdaptivePolicy::default(), Utc::now());
        assert_eq!(s.state, ScheduleState::Idle);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut s = schedule();
        assert!(s.mark_queued().is_err());
        assert!(s.mark_running().is_err());
    }

    #[test]
    fn test_no_change_streak_stretches_interval() {
        let mut s = schedule();
        let policy = AdaptivePolicy::default();
        let now = Utc::now();

        for _ in 0..3 {
            s.state = ScheduleState::Running;
            s.complete_run(Some(ChangeClass::NoChange), &policy, now);
        }

        // After three no-change results the weekly interval exceeds 7 days
        assert!(s.current_interval_secs > WEEK);
        assert!(s.next_run_at > now + Duration::seconds(WEEK));
    }

    #[test]
    fn test_interval_capped_at_maximum() {
        let mut s = schedule();
        let policy = AdaptivePolicy {
            max_interval_secs: WEEK + 3600,
            ..Default::default()
        };

        for _ in 0..10 {
            s.state = ScheduleState::Running;
            s.complete_run(Some(ChangeClass::NoChange), &policy, Utc::now());
        }
        assert_eq!(s.current_interval_secs, WEEK + 3600);
    }

    #[test]
    fn test_significant_change_escalates() {
        let mut s = schedule();
        s.state = ScheduleState::Running;
        s.complete_run(
            Some(ChangeClass::Significant),
            &AdaptivePolicy::default(),
            Utc::now(),
        );
        assert!(s.current_interval_secs < WEEK);
        assert_eq!(s.consecutive_no_change, 0);
    }

    #[test]
    fn test_repeated_failures_flag_but_never_disable() {
        let mut s = schedule();
        let policy = AdaptivePolicy::default();

        for _ in 0..5 {
            s.state = ScheduleState::Running;
            s.fail_run(3, &policy, Utc::now());
        }

        assert!(s.needs_attention);
        assert!(s.enabled, "schedule must stay enabled for operator review");
        assert_eq!(s.consecutive_failures, 5);
    }

    #[test]
    fn test_success_clears_attention_flag() {
        let mut s = schedule();
        let policy = AdaptivePolicy::default();
        s.state = ScheduleState::Running;
        s.fail_run(1, &policy, Utc::now());
        assert!(s.needs_attention);

        s.state = ScheduleState::Running;
        s.complete_run(Some(ChangeClass::NoChange), &policy, Utc::now());
        assert!(!s.needs_attention);
        assert_eq!(s.consecutive_failures, 0);
    }
}
