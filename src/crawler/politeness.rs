// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use crate::utils::robots::RobotsCheckerTrait;

/// 每主机礼貌闸门
///
/// 同一主机的连续请求之间强制等待：实际间隔取配置延迟与
/// robots.txt crawl-delay中的较大者。robots排除检查也经由
/// 这里，命中排除的URL直接放弃而不是等待。
pub struct PolitenessGate {
    robots: Arc<dyn RobotsCheckerTrait>,
    /// 每主机上一次请求的时刻
    last_request: DashMap<String, Instant>,
    base_delay: Duration,
    user_agent: String,
    respect_robots: bool,
}

impl PolitenessGate {
    pub fn new(
        robots: Arc<dyn RobotsCheckerTrait>,
        base_delay: Duration,
        user_agent: String,
        respect_robots: bool,
    ) -> Self {
        Self {
            robots,
            last_request: DashMap::new(),
            base_delay,
            user_agent,
            respect_robots,
        }
    }

    /// URL是否被robots.txt放行
    pub async fn allowed(&self, url: &Url) -> bool {
        if !self.respect_robots {
            return true;
        }
        self.robots
            .is_allowed(url.as_str(), &self.user_agent)
            .await
            .unwrap_or(true)
    }

    /// 等待直到该主机允许下一次请求
    ///
    /// 请求间隔 = max(延迟, robots crawl-delay)，延迟取目标
    /// 级覆盖值，没有覆盖时取全局配置。
    pub async fn acquire(&self, url: &Url, override_delay: Option<Duration>) {
        let Some(host) = url.host_str() else {
            return;
        };
        let host = host.to_string();

        let mut delay = override_delay.unwrap_or(self.base_delay);
        if self.respect_robots {
            if let Ok(Some(crawl_delay)) = self
                .robots
                .get_crawl_delay(url.as_str(), &self.user_agent)
                .await
            {
                delay = delay.max(crawl_delay);
            }
        }

        let wait_until = self
            .last_request
            .get(&host)
            .map(|last| *last + delay);

        if let Some(until) = wait_until {
            let now = Instant::now();
            if until > now {
                debug!(host = %host, wait_ms = (until - now).as_millis() as u64, "Politeness wait");
                tokio::time::sleep_until(until).await;
            }
        }

        self.last_request.insert(host, Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::robots::AllowAllRobots;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_same_host() {
        let gate = PolitenessGate::new(
            Arc::new(AllowAllRobots),
            Duration::from_millis(500),
            "archivrs-bot/1.0".to_string(),
            true,
        );
        let url = Url::parse("https://e.com/a").unwrap();

        let start = Instant::now();
        gate.acquire(&url, None).await;
        gate.acquire(&url, None).await;
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_hosts_do_not_wait() {
        let gate = PolitenessGate::new(
            Arc::new(AllowAllRobots),
            Duration::from_secs(5),
            "archivrs-bot/1.0".to_string(),
            true,
        );

        let start = Instant::now();
        gate.acquire(&Url::parse("https://a.com/").unwrap(), None).await;
        gate.acquire(&Url::parse("https://b.com/").unwrap(), None).await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_delay_overrides_base() {
        let gate = PolitenessGate::new(
            Arc::new(AllowAllRobots),
            Duration::from_secs(10),
            "archivrs-bot/1.0".to_string(),
            true,
        );
        let url = Url::parse("https://e.com/a").unwrap();
        let override_delay = Some(Duration::from_millis(100));

        let start = Instant::now();
        gate.acquire(&url, override_delay).await;
        gate.acquire(&url, override_delay).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(10));
    }
}
