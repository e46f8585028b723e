// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use archivrs::archive::store::{ArchiveStore, InMemoryArchiveStore};
use archivrs::config::settings::CrawlerSettings;
use archivrs::crawler::orchestrator::CrawlOrchestrator;
use archivrs::crawler::politeness::PolitenessGate;
use archivrs::domain::models::snapshot::SnapshotRegistry;
use archivrs::domain::models::target::{CrawlLimits, CrawlTarget, EngineKind, ScopeRule};
use archivrs::domain::ports::TracingStatusSink;
use archivrs::engines::http_engine::HttpEngine;
use archivrs::utils::robots::AllowAllRobots;

/// 端到端爬取测试装置
///
/// 真实HTTP引擎对着wiremock站点爬取，容器落在内存存储里。
pub struct TestHarness {
    pub store: Arc<dyn ArchiveStore>,
    pub registry: Arc<SnapshotRegistry>,
    pub orchestrator: Arc<CrawlOrchestrator>,
    // Staging dir must outlive the crawl
    pub staging: TempDir,
}

pub fn crawler_settings(staging: &TempDir) -> CrawlerSettings {
    CrawlerSettings {
        staging_dir: staging.path().to_string_lossy().into_owned(),
        group_size: 1,
        compression_level: 6,
        fetch_timeout_secs: 5,
        max_body_bytes: 10 * 1024 * 1024,
        job_timeout_secs: 60,
        host_delay_ms: 0,
        respect_robots: false,
        user_agent: "archivrs-bot/1.0".to_string(),
        progress_every: 10,
        orphan_horizon_secs: 86400,
    }
}

pub fn test_harness() -> TestHarness {
    let staging = TempDir::new().unwrap();
    let settings = crawler_settings(&staging);

    let store: Arc<dyn ArchiveStore> = Arc::new(InMemoryArchiveStore::new());
    let registry = Arc::new(SnapshotRegistry::new());
    let politeness = Arc::new(PolitenessGate::new(
        Arc::new(AllowAllRobots),
        Duration::ZERO,
        settings.user_agent.clone(),
        false,
    ));

    let orchestrator = Arc::new(CrawlOrchestrator::new(
        Arc::new(HttpEngine::new().unwrap()),
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::new(TracingStatusSink),
        politeness,
        settings,
    ));

    TestHarness {
        store,
        registry,
        orchestrator,
        staging,
    }
}

pub fn target_for(server: &MockServer, max_depth: u32, max_pages: usize) -> CrawlTarget {
    CrawlTarget::new(
        format!("{}/", server.uri()),
        ScopeRule::Domain,
        CrawlLimits {
            max_depth,
            max_pages,
        },
        EngineKind::Http,
    )
}

/// 挂载一个HTML页面
pub async fn mount_page(server: &MockServer, route: &str, html: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html.to_string(), "text/html"))
        .mount(server)
        .await;
}

/// 挂载一个静态资源
pub async fn mount_resource(server: &MockServer, route: &str, body: &[u8], content_type: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_vec(), content_type))
        .mount(server)
        .await;
}

/// 三页小站：首页链接到about和blog，共享一张样式表
pub async fn mount_small_site(server: &MockServer) {
    mount_page(
        server,
        "/",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
           <body><h1>Home</h1>
           <a href="/about">About</a>
           <a href="/blog">Blog</a>
           <a href="/about">About again</a>
           </body></html>"#,
    )
    .await;
    mount_page(
        server,
        "/about",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
           <body><h1>About us</h1><a href="/">Home</a></body></html>"#,
    )
    .await;
    mount_page(
        server,
        "/blog",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
           <body><h1>Blog</h1><p>First post content.</p></body></html>"#,
    )
    .await;
    mount_resource(server, "/style.css", b"body { margin: 0; }", "text/css").await;
}
