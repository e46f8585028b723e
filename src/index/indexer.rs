// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::Path;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};
use url::Url;

use crate::archive::reader::ContainerReader;
use crate::archive::record::{ArchiveError, RecordKind};
use crate::archive::store::{ArchiveStore, StoreError};
use crate::index::surt::surt_key;

/// 行内时间戳格式（14位，字典序即时间序）
const TS_FORMAT: &str = "%Y%m%d%H%M%S";

/// 索引层错误类型
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid URL in record: {0}")]
    Url(#[from] url::ParseError),

    #[error("Malformed index line: {0}")]
    Parse(String),
}

/// 一条索引条目
///
/// 指向某容器中某记录组内的一条记录，区间 (offset, length)
/// 覆盖整个组，单记录访问只需拉取并解压该区间。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// SURT排序键
    pub url_key: String,
    /// 捕获时间
    pub timestamp: DateTime<Utc>,
    /// 原始URL
    pub url: String,
    /// 容器定位符
    pub locator: String,
    /// 记录组的字节偏移
    pub offset: u64,
    /// 记录组的压缩字节数
    pub length: u64,
    /// 记录在组内的序号
    pub ordinal: u32,
    /// HTTP状态码
    pub status: u16,
    /// 内容类型
    pub content_type: String,
    /// 正文摘要
    pub digest: String,
}

impl IndexEntry {
    fn sort_key(&self) -> (&str, DateTime<Utc>) {
        (&self.url_key, self.timestamp)
    }

    /// 序列化为一行文本
    ///
    /// 前两列是排序键（SURT键 + 14位时间戳），余下为JSON。
    /// 文件整体按行排序后可直接二分/归并。
    pub fn to_line(&self) -> Result<String, IndexError> {
        let json = serde_json::to_string(self)
            .map_err(|e| IndexError::Parse(e.to_string()))?;
        Ok(format!(
            "{} {} {}",
            self.url_key,
            self.timestamp.format(TS_FORMAT),
            json
        ))
    }

    /// 从一行文本解析
    pub fn from_line(line: &str) -> Result<Self, IndexError> {
        let mut parts = line.splitn(3, ' ');
        let key = parts
            .next()
            .ok_or_else(|| IndexError::Parse(line.to_string()))?;
        let ts = parts
            .next()
            .ok_or_else(|| IndexError::Parse(line.to_string()))?;
        let json = parts
            .next()
            .ok_or_else(|| IndexError::Parse(line.to_string()))?;

        let entry: IndexEntry =
            serde_json::from_str(json).map_err(|e| IndexError::Parse(e.to_string()))?;

        // The sort columns must agree with the payload
        if entry.url_key != key {
            return Err(IndexError::Parse(format!(
                "key column {} disagrees with payload {}",
                key, entry.url_key
            )));
        }
        NaiveDateTime::parse_from_str(ts, TS_FORMAT)
            .map_err(|e| IndexError::Parse(e.to_string()))?;

        Ok(entry)
    }
}

/// 由单个容器生成索引条目
///
/// 纯函数：同一容器字节永远产出同一组条目。
/// 跳过容器信息记录，输出按(url_key, timestamp)排序。
pub fn generate(reader: &ContainerReader, locator: &str) -> Result<Vec<IndexEntry>, IndexError> {
    let mut entries = Vec::new();

    for group in reader.groups()? {
        for (ordinal, (meta, _body)) in group.records.iter().enumerate() {
            if meta.kind != RecordKind::Response {
                continue;
            }
            let url = Url::parse(&meta.url)?;
            entries.push(IndexEntry {
                url_key: surt_key(&url),
                timestamp: meta.fetched_at,
                url: meta.url.clone(),
                locator: locator.to_string(),
                offset: group.offset,
                length: group.length,
                ordinal: ordinal as u32,
                status: meta.status,
                content_type: meta.content_type.clone(),
                digest: meta.sha256.clone(),
            });
        }
    }

    entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    debug!(locator, entries = entries.len(), "Generated index entries");
    Ok(entries)
}

/// 多路归并已排序的条目批次
///
/// 每个批次必须各自有序；输出全局有序。
pub fn merge(batches: Vec<Vec<IndexEntry>>) -> Vec<IndexEntry> {
    let total: usize = batches.iter().map(|b| b.len()).sum();
    let mut out = Vec::with_capacity(total);

    // (key, ts, batch, pos) in a min-heap
    let mut heap = BinaryHeap::new();
    for (bi, batch) in batches.iter().enumerate() {
        if let Some(first) = batch.first() {
            heap.push(Reverse((
                first.url_key.clone(),
                first.timestamp,
                bi,
                0usize,
            )));
        }
    }

    while let Some(Reverse((_, _, bi, pos))) = heap.pop() {
        out.push(batches[bi][pos].clone());
        if let Some(next) = batches[bi].get(pos + 1) {
            heap.push(Reverse((
                next.url_key.clone(),
                next.timestamp,
                bi,
                pos + 1,
            )));
        }
    }

    out
}

/// 快照索引
///
/// 内存中保持按(url_key, timestamp)排序的条目，
/// 查询走二分，落盘为排序文本行。
#[derive(Debug, Default)]
pub struct SnapshotIndex {
    entries: Vec<IndexEntry>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 并入一批已排序的条目
    pub fn absorb(&mut self, batch: Vec<IndexEntry>) {
        if batch.is_empty() {
            return;
        }
        let existing = std::mem::take(&mut self.entries);
        self.entries = merge(vec![existing, batch]);
    }

    /// 查询某URL在给定时刻或之前最近的捕获
    pub fn closest_before(&self, url: &Url, at: DateTime<Utc>) -> Option<&IndexEntry> {
        let key = surt_key(url);
        // First entry past (key, at) — the one before it is the answer
        let idx = self
            .entries
            .partition_point(|e| (e.url_key.as_str(), e.timestamp) <= (key.as_str(), at));
        self.entries[..idx]
            .iter()
            .rev()
            .take_while(|e| e.url_key == key)
            .next()
    }

    /// 某URL的全部捕获历史（时间升序）
    pub fn history(&self, url: &Url) -> Vec<&IndexEntry> {
        let key = surt_key(url);
        let start = self.entries.partition_point(|e| e.url_key.as_str() < key.as_str());
        self.entries[start..]
            .iter()
            .take_while(|e| e.url_key == key)
            .collect()
    }

    /// 落盘为排序文本行
    pub async fn save(&self, path: &Path) -> Result<(), IndexError> {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.to_line()?);
            out.push('\n');
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, out).await?;
        Ok(())
    }

    /// 从排序文本行加载
    pub async fn load(path: &Path) -> Result<Self, IndexError> {
        let text = match fs::read_to_string(path).await {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(IndexEntry::from_line(line)?);
        }
        entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

/// 对存储中的多个容器批量建索引
///
/// 从零重建与逐容器增量并入等价。
pub async fn batch_index(
    store: &dyn ArchiveStore,
    locators: &[String],
) -> Result<Vec<IndexEntry>, IndexError> {
    let mut batches = Vec::with_capacity(locators.len());
    for locator in locators {
        let data = store.get(locator).await?;
        let reader = ContainerReader::new(data);
        batches.push(generate(&reader, locator)?);
    }
    let merged = merge(batches);
    info!(
        containers = locators.len(),
        entries = merged.len(),
        "Batch indexing finished"
    );
    Ok(merged)
}
