// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::record::{encode_record, ArchiveError, RecordMeta};

/// 记录在容器内的位置
///
/// 组偏移在追加时即已确定（前序组均已落盘），
/// 序号是记录在组内的下标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLocation {
    /// 所在记录组（gzip成员）的文件字节偏移
    pub offset: u64,
    /// 记录在组内的序号
    pub ordinal: u32,
}

/// 封存摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealSummary {
    /// 容器总字节数
    pub size: u64,
    /// 响应记录条数（不含容器信息记录）
    pub record_count: usize,
    /// 容器整体的SHA-256摘要
    pub sha256: String,
}

/// 容器信息记录的正文
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub software: String,
    pub format: String,
    pub target_id: Uuid,
    pub job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl ContainerInfo {
    pub fn new(target_id: Uuid, job_id: Uuid) -> Self {
        Self {
            software: format!("archivrs/{}", env!("CARGO_PKG_VERSION")),
            format: "AVCR/1".to_string(),
            target_id,
            job_id,
            created_at: Utc::now(),
        }
    }
}

/// 归档容器写入器
///
/// 流式写入：无论爬取多大，内存占用以单个记录组为界。
/// 块级压缩：每个记录组是独立的gzip成员，读取方可以
/// 只解压一个组而无需解压整个文件。
/// 崩溃安全：写入临时名，封存时原子重命名；封存失败的
/// 容器由孤儿清理兜底。
pub struct ArchiveWriter {
    file: fs::File,
    final_path: PathBuf,
    tmp_path: PathBuf,
    hasher: Sha256,
    bytes_written: u64,
    record_count: usize,
    group_buf: Vec<u8>,
    group_records: u32,
    group_size: u32,
    compression_level: u32,
    sealed: bool,
}

impl ArchiveWriter {
    /// 创建写入器并写入容器信息记录
    ///
    /// # 参数
    ///
    /// * `path` - 容器的最终路径（实际写入 `<path>.tmp`）
    /// * `info` - 容器信息
    /// * `group_size` - 每个压缩组的记录条数
    /// * `compression_level` - gzip压缩级别 (0-9)
    ///
    /// # 返回值
    ///
    /// * `Ok(ArchiveWriter)` - 就绪的写入器
    /// * `Err(ArchiveError)` - 创建失败
    pub async fn create(
        path: &Path,
        info: ContainerInfo,
        group_size: u32,
        compression_level: u32,
    ) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("avcr.tmp");
        let file = fs::File::create(&tmp_path).await?;

        let mut writer = Self {
            file,
            final_path: path.to_path_buf(),
            tmp_path,
            hasher: Sha256::new(),
            bytes_written: 0,
            record_count: 0,
            group_buf: Vec::new(),
            group_records: 0,
            group_size: group_size.max(1),
            compression_level: compression_level.min(9),
            sealed: false,
        };

        // The info record rides alone in member 0 so that replay tooling
        // can identify the container without decompressing anything else.
        let body = serde_json::to_vec(&info)?;
        let name = writer
            .final_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let meta = RecordMeta::info(name, &body);
        writer.group_buf = encode_record(&meta, &body)?;
        writer.flush_group().await?;

        debug!(path = %writer.final_path.display(), "Created archive container writer");
        Ok(writer)
    }

    /// 追加一条响应记录
    ///
    /// # 返回值
    ///
    /// * `Ok(RecordLocation)` - 记录位置（组偏移 + 组内序号）
    /// * `Err(ArchiveError)` - 容器已封存或写入失败
    pub async fn append(
        &mut self,
        meta: RecordMeta,
        body: &[u8],
    ) -> Result<RecordLocation, ArchiveError> {
        if self.sealed {
            return Err(ArchiveError::AlreadySealed);
        }

        let location = RecordLocation {
            offset: self.bytes_written,
            ordinal: self.group_records,
        };

        self.group_buf.extend(encode_record(&meta, body)?);
        self.group_records += 1;
        self.record_count += 1;

        if self.group_records >= self.group_size {
            self.flush_group().await?;
        }

        Ok(location)
    }

    /// 将当前记录组压缩为一个gzip成员并落盘
    async fn flush_group(&mut self) -> Result<(), ArchiveError> {
        if self.group_buf.is_empty() {
            return Ok(());
        }

        let mut encoder = GzEncoder::new(
            Vec::new(),
            Compression::new(self.compression_level),
        );
        encoder.write_all(&self.group_buf)?;
        let compressed = encoder.finish()?;

        self.file.write_all(&compressed).await?;
        self.hasher.update(&compressed);
        self.bytes_written += compressed.len() as u64;
        self.group_buf.clear();
        self.group_records = 0;
        Ok(())
    }

    /// 封存容器
    ///
    /// 刷出最后一个记录组，同步落盘并原子重命名到最终路径。
    /// 封存后容器不可变：任何修正都需要新容器和新快照。
    ///
    /// # 返回值
    ///
    /// * `Ok(SealSummary)` - 容器大小、记录数和整体摘要
    /// * `Err(ArchiveError)` - 封存失败（临时文件留待孤儿清理）
    pub async fn seal(mut self) -> Result<SealSummary, ArchiveError> {
        self.flush_group().await?;
        self.file.flush().await?;
        self.file.sync_all().await?;
        self.sealed = true;

        fs::rename(&self.tmp_path, &self.final_path).await?;

        let digest = hex::encode(self.hasher.finalize());
        info!(
            path = %self.final_path.display(),
            size = self.bytes_written,
            records = self.record_count,
            "Sealed archive container"
        );

        Ok(SealSummary {
            size: self.bytes_written,
            record_count: self.record_count,
            sha256: digest,
        })
    }

    /// 已写入的响应记录条数
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// 容器的最终路径
    pub fn path(&self) -> &Path {
        &self.final_path
    }
}

/// 清理超过保留期限的孤儿临时容器
///
/// 封存失败会留下 `.tmp` 文件；超过清理期限后删除，
/// 保证失败的封存不会无限期残留。
pub async fn sweep_orphans(staging_dir: &Path, horizon: Duration) -> Result<usize, ArchiveError> {
    let mut removed = 0;
    let mut dirs = vec![staging_dir.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let meta = entry.metadata().await?;
            if meta.is_dir() {
                dirs.push(path);
                continue;
            }

            if path.extension().and_then(|e| e.to_str()) != Some("tmp") {
                continue;
            }

            let age = meta
                .modified()
                .ok()
                .and_then(|m| SystemTime::now().duration_since(m).ok())
                .unwrap_or_default();

            if age > horizon {
                warn!(path = %path.display(), "Removing orphaned container from failed seal");
                fs::remove_file(&path).await?;
                removed += 1;
            }
        }
    }

    Ok(removed)
}
