// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// 引擎错误类型
#[derive(Error, Debug)]
pub enum EngineError {
    /// 请求失败
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    /// 超时
    #[error("Timeout")]
    Timeout,
    /// 浏览器错误
    #[error("Browser error: {0}")]
    Browser(String),
    /// 响应体超出限制
    #[error("Response body exceeds {limit} bytes for {url}")]
    BodyTooLarge { url: String, limit: u64 },
    /// 其他错误
    #[error("Other error: {0}")]
    Other(String),
}

impl EngineError {
    /// 判断错误是否可重试
    ///
    /// # 返回值
    ///
    /// 如果错误是可重试的则返回true，否则返回false
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::RequestFailed(e) => {
                e.is_timeout() || e.is_connect() || e.status().is_some_and(|s| s.is_server_error())
            }
            EngineError::Timeout => true,
            EngineError::Browser(_) => true,
            _ => false,
        }
    }
}

/// 抓取请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 目标URL
    pub url: String,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// 超时时间
    pub timeout: Duration,
    /// 响应体字节上限
    pub max_body_bytes: u64,
    /// 是否为页面请求（页面需要HTML渲染，子资源不需要）
    pub is_page: bool,
}

impl FetchRequest {
    pub fn page(url: impl Into<String>, timeout: Duration, max_body_bytes: u64) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout,
            max_body_bytes,
            is_page: true,
        }
    }

    pub fn resource(url: impl Into<String>, timeout: Duration, max_body_bytes: u64) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            timeout,
            max_body_bytes,
            is_page: false,
        }
    }
}

/// 抓取响应
///
/// 正文保留原始字节，图片等二进制资源原样归档。
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP状态码
    pub status: u16,
    /// 重定向后的最终URL
    pub final_url: String,
    /// 内容类型
    pub content_type: String,
    /// 响应头
    pub headers: Vec<(String, String)>,
    /// 响应正文
    pub body: Vec<u8>,
    /// 捕获时间
    pub fetched_at: DateTime<Utc>,
    /// 响应时间（毫秒）
    pub elapsed_ms: u64,
}

impl FetchResponse {
    /// 内容类型是否为HTML
    pub fn is_html(&self) -> bool {
        self.content_type
            .split(';')
            .next()
            .map(|t| t.trim().eq_ignore_ascii_case("text/html"))
            .unwrap_or(false)
    }
}

/// 抓取引擎特质
///
/// 爬取编排只依赖本接口，HTTP引擎和浏览器引擎可互换。
#[async_trait]
pub trait FetchEngine: Send + Sync {
    /// 执行抓取
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError>;

    /// 引擎名称
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_content_type_detection() {
        let mut resp = FetchResponse {
            status: 200,
            final_url: "https://example.com/".to_string(),
            content_type: "text/html; charset=utf-8".to_string(),
            headers: vec![],
            body: vec![],
            fetched_at: Utc::now(),
            elapsed_ms: 0,
        };
        assert!(resp.is_html());

        resp.content_type = "image/png".to_string();
        assert!(!resp.is_html());
    }

    #[test]
    fn test_timeout_is_retryable() {
        assert!(EngineError::Timeout.is_retryable());
        assert!(!EngineError::Other("bad request".to_string()).is_retryable());
    }
}
