// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use crate::engines::http_engine::HttpEngine;
use crate::engines::traits::{EngineError, FetchEngine, FetchRequest, FetchResponse};
use async_trait::async_trait;
use chromiumoxide::{Browser, BrowserConfig, Page};
use chrono::Utc;
use futures::StreamExt;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;

// Global browser instance to avoid re-launching Chrome on every request.
static BROWSER_INSTANCE: OnceCell<Browser> = OnceCell::const_new();

// Asynchronously gets or initializes the shared browser instance.
// This function ensures that the browser is launched only once.
async fn get_browser() -> Result<&'static Browser, EngineError> {
    BROWSER_INSTANCE
        .get_or_try_init(|| async {
            let remote_debugging_url = std::env::var("CHROMIUM_REMOTE_DEBUGGING_URL").ok();

            let (browser, mut handler) = if let Some(ref url) = remote_debugging_url {
                tracing::info!("Connecting to remote Chrome instance at: {}", url);
                Browser::connect(url).await.map_err(|e| {
                    EngineError::Browser(format!("Failed to connect to remote Chrome: {}", e))
                })?
            } else {
                let builder = BrowserConfig::builder()
                    .no_sandbox()
                    .request_timeout(Duration::from_secs(30))
                    .arg("--disable-gpu")
                    .arg("--disable-dev-shm-usage");

                Browser::launch(
                    builder
                        .build()
                        .map_err(|e| EngineError::Browser(e.to_string()))?,
                )
                .await
                .map_err(|e| EngineError::Browser(e.to_string()))?
            };

            // Spawn a handler to process browser events
            tokio::spawn(async move {
                while let Some(h) = handler.next().await {
                    if h.is_err() {
                        break;
                    }
                }
            });

            Ok(browser)
        })
        .await
}

/// 浏览器抓取引擎
///
/// 基于chromiumoxide实现。页面请求经浏览器渲染后取
/// 稳定DOM，动态站点由此归档到与静态站点一致的记录；
/// 子资源走内部HTTP引擎，保留原始字节和真实状态码。
pub struct BrowserEngine {
    inner: HttpEngine,
}

impl BrowserEngine {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            inner: HttpEngine::new()?,
        })
    }
}

#[async_trait]
impl FetchEngine for BrowserEngine {
    /// 执行浏览器抓取
    ///
    /// # 参数
    ///
    /// * `request` - 抓取请求
    ///
    /// # 返回值
    ///
    /// * `Ok(FetchResponse)` - 渲染后的页面或子资源响应
    /// * `Err(EngineError)` - 抓取过程中出现的错误
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, EngineError> {
        // Rendering only pays off for pages; binary resources keep their bytes
        if !request.is_page {
            return self.inner.fetch(request).await;
        }

        let start = Instant::now();
        let browser = get_browser().await?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| EngineError::Browser(e.to_string()))?;

        // The tab must be closed on every exit, errors and timeouts included;
        // leaked tabs accumulate in the shared browser instance.
        let result = tokio::time::timeout(request.timeout, render(&page, request, start)).await;
        let _ = page.close().await;

        match result {
            Ok(response) => response,
            Err(_) => Err(EngineError::Timeout),
        }
    }

    fn name(&self) -> &'static str {
        "browser"
    }
}

async fn render(
    page: &Page,
    request: &FetchRequest,
    start: Instant,
) -> Result<FetchResponse, EngineError> {
    page.goto(&request.url)
        .await
        .map_err(|e| EngineError::Browser(e.to_string()))?;

    // goto waits for the load event; the settled DOM is the capture
    let content = page
        .content()
        .await
        .map_err(|e| EngineError::Browser(e.to_string()))?;

    let final_url = page
        .url()
        .await
        .map_err(|e| EngineError::Browser(e.to_string()))?
        .unwrap_or_else(|| request.url.clone());

    let body = content.into_bytes();
    if body.len() as u64 > request.max_body_bytes {
        return Err(EngineError::BodyTooLarge {
            url: request.url.clone(),
            limit: request.max_body_bytes,
        });
    }

    Ok(FetchResponse {
        status: 200,
        final_url,
        content_type: "text/html".to_string(),
        headers: Vec::new(),
        body,
        fetched_at: Utc::now(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    })
}
