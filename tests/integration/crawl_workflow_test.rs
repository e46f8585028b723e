// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::time::Duration;

use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use archivrs::archive::writer::sweep_orphans;
use archivrs::crawler::orchestrator::CrawlError;

use super::helpers::{mount_page, mount_small_site, target_for, test_harness};

/// 测试三页小站的完整捕获
///
/// 首页出发的广度优先爬取应捕获三个页面和一张共享样式表，
/// 重复链接去重，容器入库并产出索引条目。
#[tokio::test]
async fn test_small_site_full_capture() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 10);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = harness.orchestrator.run(&target, cancel_rx).await.unwrap();

    assert_eq!(outcome.job.counters.pages_fetched, 3);
    assert_eq!(outcome.job.counters.resources_fetched, 1);
    assert_eq!(outcome.job.counters.fetch_errors, 0);

    assert_eq!(outcome.snapshot.version_number, 1);
    assert_eq!(outcome.snapshot.pages_captured, 3);
    assert_eq!(outcome.snapshot.resources_captured, 1);
    assert!(!outcome.snapshot.partial);
    assert!(outcome.snapshot.previous_snapshot_id.is_none());

    // Container landed in the store under its locator
    assert!(harness
        .store
        .exists(&outcome.snapshot.container_locator)
        .await
        .unwrap());

    // One index entry per archived response
    assert_eq!(outcome.index_entries.len(), 4);

    // Registry agrees with the outcome
    let latest = harness.registry.latest(target.id).unwrap();
    assert_eq!(latest.id, outcome.snapshot.id);
}

/// 测试深度0只捕获种子页面，但其子资源照常归档
#[tokio::test]
async fn test_depth_zero_captures_seed_only() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 0, 10);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = harness.orchestrator.run(&target, cancel_rx).await.unwrap();
    assert_eq!(outcome.job.counters.pages_fetched, 1);
    assert_eq!(outcome.job.counters.resources_fetched, 1);
}

/// 测试页面数上限截断前沿
#[tokio::test]
async fn test_max_pages_limit() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 2);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = harness.orchestrator.run(&target, cancel_rx).await.unwrap();
    assert_eq!(outcome.job.counters.pages_fetched, 2);
}

/// 测试域外链接不进入前沿
#[tokio::test]
async fn test_out_of_scope_links_dropped() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    mount_page(
        &server,
        "/",
        &format!(
            r#"<html><body><a href="{}/elsewhere">external</a></body></html>"#,
            other.uri()
        ),
    )
    .await;
    mount_page(&other, "/elsewhere", "<html><body>other</body></html>").await;

    let harness = test_harness();
    let target = target_for(&server, 3, 10);
    let (_cancel_tx, cancel_rx) = watch::channel(false);

    let outcome = harness.orchestrator.run(&target, cancel_rx).await.unwrap();
    assert_eq!(outcome.job.counters.pages_fetched, 1);
    assert!(other.received_requests().await.unwrap().is_empty());
}

/// 测试取消信号令在途作业封存部分容器
#[tokio::test]
async fn test_cancel_seals_partial_container() {
    let server = MockServer::start().await;
    let mut links = String::new();
    for i in 1..=5 {
        links.push_str(&format!(r#"<a href="/p{}">page {}</a>"#, i, i));
    }
    mount_page(
        &server,
        "/",
        &format!("<html><body>{}</body></html>", links),
    )
    .await;
    for i in 1..=5 {
        Mock::given(method("GET"))
            .and(path(format!("/p{}", i)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(
                        format!("<html><body>page {}</body></html>", i),
                        "text/html",
                    )
                    .set_delay(Duration::from_millis(200)),
            )
            .mount(&server)
            .await;
    }

    let harness = test_harness();
    let target = target_for(&server, 2, 10);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let orchestrator = harness.orchestrator.clone();
    let handle = tokio::spawn(async move { orchestrator.run(&target, cancel_rx).await });

    tokio::time::sleep(Duration::from_millis(350)).await;
    cancel_tx.send(true).unwrap();

    let outcome = handle.await.unwrap().unwrap();
    assert!(outcome.snapshot.partial);
    assert!(outcome.job.counters.pages_fetched >= 1);
    assert!(outcome.job.counters.pages_fetched < 6);

    // The partial container is still a valid, indexed archive
    assert!(harness
        .store
        .exists(&outcome.snapshot.container_locator)
        .await
        .unwrap());
    assert!(!outcome.index_entries.is_empty());
}

/// 测试零记录爬取以NoRecords失败且暂存文件交给孤儿清理
#[tokio::test]
async fn test_cancelled_before_start_leaves_orphan() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 10);
    let (_cancel_tx, cancel_rx) = watch::channel(true);

    let err = harness
        .orchestrator
        .run(&target, cancel_rx)
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::NoRecords(id) if id == target.id));

    // The abandoned tmp container is reclaimed by the sweep
    let removed = sweep_orphans(harness.staging.path(), Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(removed, 1);
}
