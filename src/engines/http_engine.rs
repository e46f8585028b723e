// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::time::Instant;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; archivrs/1.0; +https://archivrs.dev)";

/// HTTP抓取引擎
///
/// 基于reqwest实现的基本HTTP抓取引擎。跟随重定向并
/// 记录最终URL，正文按原始字节读取。
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    /// 创建HTTP引擎
    ///
    /// # 返回值
    ///
    /// * `Ok(HttpEngine)` - 就绪的引擎
    /// * `Err(EngineError)` - 客户端构建失败
    pub fn new() -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FetchEngine for HttpEngine {
    /// 执行HTTP抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 抓取响应
    /// * `Err(EngineError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        // Build headers
        let mut headers = HeaderMap::new();
        for (k, v) in &request.headers {
            if let (Ok(k), Ok(v)) = (
                HeaderName::from_bytes(k.as_bytes()),
                HeaderValue::from_str(v),
            ) {
                headers.insert(k, v);
            }
        }

        let start = Instant::now();
        let response = self
            .client
            .get(&request.url)
            .headers(headers)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EngineError::Timeout
                } else {
                    EngineError::RequestFailed(e)
                }
            })?;

        let status = response.status().as_u16();
        // Redirects are followed by the client; capture where we ended up
        let final_url = response.url().to_string();

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or("application/octet-stream")
            .to_string();

        let mut response_headers = Vec::new();
        for (k, v) in response.headers() {
            if let Ok(v_str) = v.to_str() {
                response_headers.push((k.as_str().to_string(), v_str.to_string()));
            }
        }

        if let Some(len) = response.content_length() {
            if len > request.max_body_bytes {
                return Err(EngineError::BodyTooLarge {
                    url: request.url.clone(),
                    limit: request.max_body_bytes,
                });
            }
        }

        let body = response.bytes().await?;
        if body.len() as u64 > request.max_body_bytes {
            return Err(EngineError::BodyTooLarge {
                url: request.url.clone(),
                limit: request.max_body_bytes,
            });
        }

        Ok(FetchResponse {
            status,
            final_url,
            content_type,
            headers: response_headers,
            body: body.to_vec(),
            fetched_at: Utc::now(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
