// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{Duration, Utc};
use tempfile::TempDir;
use url::Url;
use uuid::Uuid;

use archivrs::archive::reader::{verify_container, ContainerReader};
use archivrs::archive::record::RecordMeta;
use archivrs::archive::store::{container_locator, ArchiveStore, LocalArchiveStore};
use archivrs::archive::writer::{ArchiveWriter, ContainerInfo, RecordLocation};
use archivrs::index::indexer::{generate, SnapshotIndex};

fn html_meta(url: &str, fetched_at: chrono::DateTime<Utc>, body: &[u8]) -> RecordMeta {
    RecordMeta::response(
        url.to_string(),
        url.to_string(),
        200,
        "text/html".to_string(),
        vec![("server".to_string(), "nginx".to_string())],
        fetched_at,
        body,
    )
}

/// 测试容器从写入、入库到按索引取回单条记录的完整链路
#[tokio::test]
async fn test_container_store_index_roundtrip() {
    let dir = TempDir::new().unwrap();
    let target_id = Uuid::new_v4();
    let captured_at = Utc::now();

    // Seal a three-record container, two records per gzip group
    let container_path = dir.path().join("c.avcr");
    let mut writer = ArchiveWriter::create(
        &container_path,
        ContainerInfo::new(target_id, Uuid::new_v4()),
        2,
        6,
    )
    .await
    .unwrap();

    let bodies: Vec<(&str, Vec<u8>)> = vec![
        ("https://example.com/", b"<html><body>home</body></html>".to_vec()),
        ("https://example.com/about", b"<html><body>about</body></html>".to_vec()),
        ("https://example.com/blog", b"<html><body>blog</body></html>".to_vec()),
    ];
    for (url, body) in &bodies {
        writer
            .append(html_meta(url, captured_at, body), body)
            .await
            .unwrap();
    }
    let seal = writer.seal().await.unwrap();
    assert_eq!(seal.record_count, 3);

    let data = tokio::fs::read(&container_path).await.unwrap();
    assert_eq!(data.len() as u64, seal.size);
    verify_container(&data, &seal.sha256).unwrap();

    // Store it under the canonical locator and read it back verified
    let store = LocalArchiveStore::new(dir.path().join("archives"));
    let locator = container_locator(target_id, 1, captured_at);
    store.put(&locator, &data, &seal.sha256).await.unwrap();
    assert!(store.exists(&locator).await.unwrap());
    let fetched = store.get(&locator).await.unwrap();
    assert_eq!(fetched, data);

    // Index the container and resolve one record through its entry
    let reader = ContainerReader::new(fetched);
    let entries = generate(&reader, &locator).unwrap();
    assert_eq!(entries.len(), 3);

    let mut index = SnapshotIndex::new();
    index.absorb(entries);

    let about = Url::parse("https://example.com/about").unwrap();
    let entry = index
        .closest_before(&about, captured_at + Duration::seconds(1))
        .expect("capture should be indexed");
    assert_eq!(entry.url, "https://example.com/about");
    assert_eq!(entry.locator, locator);

    // Range read straight out of the store, then a single-record fetch
    let group = store
        .get_range(&locator, entry.offset, entry.length)
        .await
        .unwrap();
    assert_eq!(group.len() as u64, entry.length);

    let record = reader
        .fetch(RecordLocation {
            offset: entry.offset,
            ordinal: entry.ordinal,
        })
        .unwrap();
    assert_eq!(record.body, b"<html><body>about</body></html>");
}

/// 测试索引落盘重载后时间点查询不变
#[tokio::test]
async fn test_index_persistence_and_time_travel() {
    let dir = TempDir::new().unwrap();
    let target_id = Uuid::new_v4();
    let url = "https://example.com/page";

    let mut index = SnapshotIndex::new();
    let base = Utc::now() - Duration::days(10);

    // Three captures of the same page, one day apart
    for (version, day) in [(1u64, 0i64), (2, 1), (3, 2)] {
        let captured_at = base + Duration::days(day);
        let container_path = dir.path().join(format!("v{}.avcr", version));
        let mut writer = ArchiveWriter::create(
            &container_path,
            ContainerInfo::new(target_id, Uuid::new_v4()),
            1,
            6,
        )
        .await
        .unwrap();
        let body = format!("<html><body>rev {}</body></html>", version);
        writer
            .append(html_meta(url, captured_at, body.as_bytes()), body.as_bytes())
            .await
            .unwrap();
        writer.seal().await.unwrap();

        let data = tokio::fs::read(&container_path).await.unwrap();
        let reader = ContainerReader::new(data);
        let locator = container_locator(target_id, version, captured_at);
        index.absorb(generate(&reader, &locator).unwrap());
    }

    let index_path = dir.path().join("index.cdx");
    index.save(&index_path).await.unwrap();
    let reloaded = SnapshotIndex::load(&index_path).await.unwrap();
    assert_eq!(reloaded.entries().len(), 3);

    let page = Url::parse(url).unwrap();
    assert_eq!(reloaded.history(&page).len(), 3);

    // A query between the second and third capture resolves to the second
    let at = base + Duration::days(1) + Duration::hours(12);
    let entry = reloaded.closest_before(&page, at).unwrap();
    assert!(entry.locator.ends_with("/v2.avcr"));

    // A query before the first capture finds nothing
    assert!(reloaded
        .closest_before(&page, base - Duration::hours(1))
        .is_none());
}
