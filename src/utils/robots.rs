// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use robotstxt::DefaultMatcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;
use url::Url;

use crate::utils::retry_policy::RetryPolicy;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Robots.txt检查器接口
#[async_trait]
pub trait RobotsCheckerTrait: Send + Sync {
    /// 检查URL是否被允许访问
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool>;
    /// 获取爬取延迟
    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>>;
}

struct CacheEntry {
    body: String,
    fetched_at: Instant,
}

impl CacheEntry {
    fn fresh(&self) -> bool {
        self.fetched_at.elapsed() < CACHE_TTL
    }
}

/// Robots.txt检查器
///
/// 按origin拉取并缓存robots.txt一小时。拉取失败放行：
/// 归档不应因robots服务抖动而整体停摆。
#[derive(Clone)]
pub struct RobotsChecker {
    client: Client,
    cache: Arc<Mutex<HashMap<String, CacheEntry>>>,
    retry_policy: RetryPolicy,
}

#[async_trait]
impl RobotsCheckerTrait for RobotsChecker {
    async fn is_allowed(&self, url_str: &str, user_agent: &str) -> Result<bool> {
        let url = Url::parse(url_str)?;
        let body = self.robots_for(&url).await?;
        let mut matcher = DefaultMatcher::default();
        Ok(matcher.one_agent_allowed_by_robots(user_agent, url.path(), &body))
    }

    async fn get_crawl_delay(&self, url_str: &str, user_agent: &str) -> Result<Option<Duration>> {
        let url = Url::parse(url_str)?;
        let body = self.robots_for(&url).await?;
        Ok(parse_crawl_delay(&body, user_agent))
    }
}

impl Default for RobotsChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotsChecker {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            cache: Arc::new(Mutex::new(HashMap::new())),
            retry_policy: RetryPolicy {
                max_retries: 3,
                initial_backoff: Duration::from_secs(2),
                max_backoff: Duration::from_secs(10),
                ..RetryPolicy::standard()
            },
        }
    }

    async fn robots_for(&self, url: &Url) -> Result<String> {
        let host = url
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("URL has no host: {}", url))?;
        let robots_url = match url.port() {
            Some(port) => format!("{}://{}:{}/robots.txt", url.scheme(), host, port),
            None => format!("{}://{}/robots.txt", url.scheme(), host),
        };

        if let Some(body) = self.cached(&robots_url) {
            return Ok(body);
        }

        let body = self.fetch_with_retries(&robots_url).await;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(
            robots_url,
            CacheEntry {
                body: body.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(body)
    }

    fn cached(&self, robots_url: &str) -> Option<String> {
        let mut cache = self.cache.lock().unwrap();
        match cache.get(robots_url) {
            Some(entry) if entry.fresh() => Some(entry.body.clone()),
            Some(_) => {
                cache.remove(robots_url);
                None
            }
            None => None,
        }
    }

    /// 拉取robots.txt
    ///
    /// 404等于没有规则；5xx与网络错误按策略重试，
    /// 重试耗尽后放行并告警。
    async fn fetch_with_retries(&self, robots_url: &str) -> String {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .client
                .get(robots_url)
                .header("User-Agent", "archivrs-bot/1.0")
                .timeout(FETCH_TIMEOUT)
                .send()
                .await;

            let retryable = match result {
                Ok(resp) if resp.status().is_success() => {
                    return resp.text().await.unwrap_or_default();
                }
                Ok(resp) if resp.status().is_server_error() => {
                    format!("server error {}", resp.status())
                }
                // 404 and other client statuses mean no effective rules
                Ok(_) => return String::new(),
                Err(e) => e.to_string(),
            };

            if !self.retry_policy.should_retry(attempt) {
                warn!(robots_url, error = %retryable, "robots.txt unreachable, allowing all");
                return String::new();
            }
            tokio::time::sleep(self.retry_policy.backoff_for(attempt)).await;
        }
    }
}

/// 解析Crawl-delay指令
///
/// 匹配到具体agent的组优先于通配组。
fn parse_crawl_delay(body: &str, user_agent: &str) -> Option<Duration> {
    let agent_lower = user_agent.to_lowercase();
    let mut in_matching_group = false;
    let mut saw_specific = false;
    let mut delay: Option<f64> = None;

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match field.trim().to_lowercase().as_str() {
            "user-agent" => {
                if value == "*" {
                    in_matching_group = !saw_specific;
                } else if agent_lower.contains(&value.to_lowercase()) {
                    in_matching_group = true;
                    saw_specific = true;
                    // Specific group overrides whatever the wildcard said
                    delay = None;
                } else {
                    in_matching_group = false;
                }
            }
            "crawl-delay" if in_matching_group => {
                if let Ok(secs) = value.parse::<f64>() {
                    delay = Some(secs);
                }
            }
            _ => {}
        }
    }

    delay.map(Duration::from_secs_f64)
}

/// 测试和禁用robots场景下的放行检查器
#[derive(Default)]
pub struct AllowAllRobots;

#[async_trait]
impl RobotsCheckerTrait for AllowAllRobots {
    async fn is_allowed(&self, _url_str: &str, _user_agent: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_crawl_delay(&self, _url_str: &str, _user_agent: &str) -> Result<Option<Duration>> {
        Ok(None)
    }
}
