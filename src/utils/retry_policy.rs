// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

/// 重试策略
///
/// 指数退避加抖动。attempt从1开始计数；
/// jitter为0时退避是确定性的。
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 首次重试的退避时间
    pub initial_backoff: Duration,
    /// 退避上限
    pub max_backoff: Duration,
    /// 每次重试的退避增长倍数
    pub growth: f64,
    /// 抖动幅度，占退避时间的比例 (0.0-1.0)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl RetryPolicy {
    /// 标准策略，适合低频的后台请求
    pub fn standard() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            growth: 2.0,
            jitter: 0.1,
        }
    }

    /// 快速策略，适合页面与资源抓取
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
            growth: 1.5,
            jitter: 0.1,
        }
    }

    /// 第attempt次重试前的等待时间
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let base = self.initial_backoff.as_secs_f64() * self.growth.powi(exp);
        let capped = base.min(self.max_backoff.as_secs_f64());

        if self.jitter <= 0.0 {
            return Duration::from_secs_f64(capped);
        }
        let spread = capped * self.jitter;
        let jittered = capped + rand::random_range(-spread..spread);
        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// 第attempt次失败后是否还值得重试
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..policy
        }
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = no_jitter(RetryPolicy::standard());
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(5),
            ..no_jitter(RetryPolicy::standard())
        };
        assert_eq!(policy.backoff_for(30), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy::standard();
        for _ in 0..20 {
            let backoff = policy.backoff_for(2);
            assert!(backoff >= Duration::from_millis(1800));
            assert!(backoff <= Duration::from_millis(2200));
        }
    }

    #[test]
    fn test_retry_budget() {
        let policy = RetryPolicy::fast();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
