// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use tokio::sync::watch;
use wiremock::MockServer;

use archivrs::detector::change_detector::ChangeDetector;
use archivrs::domain::models::change::ChangeClass;

use super::helpers::{mount_page, mount_small_site, target_for, test_harness};

/// 测试逐字节未变的站点产生零分报告
///
/// 两次捕获内容完全相同时，聚合得分必须恰好为0，
/// 分类为无变化，不触发重新分析。
#[tokio::test]
async fn test_unchanged_site_scores_zero() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 10);

    let (_tx1, rx1) = watch::channel(false);
    let first = harness.orchestrator.run(&target, rx1).await.unwrap();
    let (_tx2, rx2) = watch::channel(false);
    let second = harness.orchestrator.run(&target, rx2).await.unwrap();

    // Version chain is intact
    assert_eq!(second.snapshot.version_number, 2);
    assert_eq!(
        second.snapshot.previous_snapshot_id,
        Some(first.snapshot.id)
    );

    let detector = ChangeDetector::default();
    let report = detector.detect(
        target.id,
        first.snapshot.id,
        second.snapshot.id,
        &first.summary,
        &second.summary,
    );

    assert_eq!(report.aggregate_score, 0.0);
    assert_eq!(report.classification, ChangeClass::NoChange);
    assert!(!report.requires_reanalysis);
}

/// 测试文本改动被内容维度捕捉
#[tokio::test]
async fn test_content_change_detected() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 10);

    let (_tx1, rx1) = watch::channel(false);
    let first = harness.orchestrator.run(&target, rx1).await.unwrap();

    // Rewrite the blog text, keep the markup shape
    server.reset().await;
    mount_page(
        &server,
        "/blog",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
           <body><h1>Blog</h1><p>A completely different second post, much longer
           and about an entirely unrelated subject altogether.</p></body></html>"#,
    )
    .await;
    mount_small_site(&server).await;

    let (_tx2, rx2) = watch::channel(false);
    let second = harness.orchestrator.run(&target, rx2).await.unwrap();

    let detector = ChangeDetector::default();
    let report = detector.detect(
        target.id,
        first.snapshot.id,
        second.snapshot.id,
        &first.summary,
        &second.summary,
    );

    assert!(report.aggregate_score > 0.0);
    assert!(report.dimensions.content > 0.0);
    assert_ne!(report.classification, ChangeClass::NoChange);
    // Page and resource sets did not move
    assert_eq!(report.dimensions.pages, 0.0);
    assert_eq!(report.dimensions.resources, 0.0);
}

/// 测试新增页面反映在页面集维度和明细里
#[tokio::test]
async fn test_added_page_shows_in_detail() {
    let server = MockServer::start().await;
    mount_small_site(&server).await;

    let harness = test_harness();
    let target = target_for(&server, 2, 10);

    let (_tx1, rx1) = watch::channel(false);
    let first = harness.orchestrator.run(&target, rx1).await.unwrap();

    // A new section appears on the home page
    server.reset().await;
    mount_page(
        &server,
        "/",
        r#"<html><head><link rel="stylesheet" href="/style.css"></head>
           <body><h1>Home</h1>
           <a href="/about">About</a>
           <a href="/blog">Blog</a>
           <a href="/contact">Contact</a>
           </body></html>"#,
    )
    .await;
    mount_page(
        &server,
        "/contact",
        r#"<html><body><h1>Contact</h1><p>mail us</p></body></html>"#,
    )
    .await;
    mount_small_site(&server).await;

    let (_tx2, rx2) = watch::channel(false);
    let second = harness.orchestrator.run(&target, rx2).await.unwrap();
    assert_eq!(second.job.counters.pages_fetched, 4);

    let detector = ChangeDetector::default();
    let report = detector.detect(
        target.id,
        first.snapshot.id,
        second.snapshot.id,
        &first.summary,
        &second.summary,
    );

    assert!(report.dimensions.pages > 0.0);
    assert_eq!(report.detail.pages_added.len(), 1);
    assert!(report.detail.pages_added[0].ends_with("/contact"));
    assert!(report.detail.pages_removed.is_empty());
}
