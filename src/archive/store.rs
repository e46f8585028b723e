// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::archive::record::sha256_hex;
use crate::config::settings::StorageSettings;

/// 归档存储层错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Digest mismatch for {locator}: expected {expected}, got {actual}")]
    DigestMismatch {
        locator: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid byte range {start}..{end} for {locator}")]
    InvalidRange {
        locator: String,
        start: u64,
        end: u64,
    },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// 存储空间统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub container_count: usize,
    pub total_bytes: u64,
}

/// 构造容器定位符
///
/// 布局 `YYYY/MM/DD/<target_id>/<version>.avcr`，按捕获日期
/// 和目标分片。定位符对调用方不透明，布局可换而接口不变。
pub fn container_locator(target_id: Uuid, version: u64, captured_at: DateTime<Utc>) -> String {
    format!(
        "{}/{}/v{}.avcr",
        captured_at.format("%Y/%m/%d"),
        target_id,
        version
    )
}

/// 归档容器存储接口
///
/// 引擎的其余部分只通过定位符与存储交互，
/// 本地目录、内存和S3后端可互换。
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// 存入已封存的容器
    ///
    /// 写入字节须与封存摘要一致；后端同时持久化摘要
    /// （旁车文件或对象元数据），读回时校验。
    async fn put(&self, locator: &str, data: &[u8], sha256: &str) -> Result<(), StoreError>;

    /// 读取完整容器并校验摘要
    async fn get(&self, locator: &str) -> Result<Vec<u8>, StoreError>;

    /// 读取容器的一段字节
    ///
    /// 单记录访问路径：只拉取目标记录组所在的区间。
    /// 区间读取不做整体摘要校验（记录摘要在解码时校验）。
    async fn get_range(&self, locator: &str, start: u64, len: u64) -> Result<Vec<u8>, StoreError>;

    /// 删除容器及其摘要旁车
    ///
    /// 删除不存在的容器不报错。
    async fn delete(&self, locator: &str) -> Result<(), StoreError>;

    /// 容器是否存在
    async fn exists(&self, locator: &str) -> Result<bool, StoreError>;

    /// 按前缀列出定位符（排序后返回）
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// 存储空间统计
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// 本地文件系统存储实现
///
/// 每个容器带一个 `.sha256` 旁车文件；写入先落临时名
/// 再原子重命名，读回时与旁车摘要比对。
pub struct LocalArchiveStore {
    base_path: PathBuf,
}

impl LocalArchiveStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, locator: &str) -> PathBuf {
        self.base_path.join(locator)
    }

    fn sidecar_path(&self, locator: &str) -> PathBuf {
        self.base_path.join(format!("{}.sha256", locator))
    }

    async fn read_sidecar(&self, locator: &str) -> Result<String, StoreError> {
        match fs::read_to_string(self.sidecar_path(locator)).await {
            Ok(s) => Ok(s.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(format!("{}.sha256", locator)))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArchiveStore for LocalArchiveStore {
    async fn put(&self, locator: &str, data: &[u8], sha256: &str) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        if actual != sha256 {
            return Err(StoreError::DigestMismatch {
                locator: locator.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }

        let full_path = self.full_path(locator);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp_path = full_path.with_extension("avcr.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;
        fs::rename(&tmp_path, &full_path).await?;

        fs::write(self.sidecar_path(locator), format!("{}\n", sha256)).await?;
        debug!(locator, size = data.len(), "Stored archive container");
        Ok(())
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let data = match fs::read(self.full_path(locator)).await {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(locator.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let expected = self.read_sidecar(locator).await?;
        let actual = sha256_hex(&data);
        if actual != expected {
            return Err(StoreError::DigestMismatch {
                locator: locator.to_string(),
                expected,
                actual,
            });
        }
        Ok(data)
    }

    async fn get_range(&self, locator: &str, start: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        use tokio::io::{AsyncReadExt, AsyncSeekExt};

        let mut file = match fs::File::open(self.full_path(locator)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(locator.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata().await?.len();
        let end = start.saturating_add(len);
        if start >= size || end > size {
            return Err(StoreError::InvalidRange {
                locator: locator.to_string(),
                start,
                end,
            });
        }

        file.seek(std::io::SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn delete(&self, locator: &str) -> Result<(), StoreError> {
        for path in [self.full_path(locator), self.sidecar_path(locator)] {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(locator, "Deleted archive container");
        Ok(())
    }

    async fn exists(&self, locator: &str) -> Result<bool, StoreError> {
        Ok(self.full_path(locator).exists())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut dirs = vec![self.base_path.clone()];

        while let Some(dir) = dirs.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.metadata().await?.is_dir() {
                    dirs.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("avcr") {
                    continue;
                }
                if let Ok(rel) = path.strip_prefix(&self.base_path) {
                    let locator = rel.to_string_lossy().replace('\\', "/");
                    if locator.starts_with(prefix) {
                        out.push(locator);
                    }
                }
            }
        }

        out.sort();
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        for locator in self.list("").await? {
            let meta = fs::metadata(self.full_path(&locator)).await?;
            stats.container_count += 1;
            stats.total_bytes += meta.len();
        }
        Ok(stats)
    }
}

/// 测试用的内存存储实现（用于单元测试）
#[derive(Default)]
pub struct InMemoryArchiveStore {
    data: Arc<tokio::sync::RwLock<HashMap<String, (Vec<u8>, String)>>>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn put(&self, locator: &str, data: &[u8], sha256: &str) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        if actual != sha256 {
            return Err(StoreError::DigestMismatch {
                locator: locator.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }
        let mut map = self.data.write().await;
        map.insert(locator.to_string(), (data.to_vec(), sha256.to_string()));
        Ok(())
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let map = self.data.read().await;
        let (data, expected) = map
            .get(locator)
            .ok_or_else(|| StoreError::NotFound(locator.to_string()))?;
        let actual = sha256_hex(data);
        if &actual != expected {
            return Err(StoreError::DigestMismatch {
                locator: locator.to_string(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(data.clone())
    }

    async fn get_range(&self, locator: &str, start: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let map = self.data.read().await;
        let (data, _) = map
            .get(locator)
            .ok_or_else(|| StoreError::NotFound(locator.to_string()))?;
        let end = start.saturating_add(len);
        if start >= data.len() as u64 || end > data.len() as u64 {
            return Err(StoreError::InvalidRange {
                locator: locator.to_string(),
                start,
                end,
            });
        }
        Ok(data[start as usize..end as usize].to_vec())
    }

    async fn delete(&self, locator: &str) -> Result<(), StoreError> {
        let mut map = self.data.write().await;
        map.remove(locator);
        Ok(())
    }

    async fn exists(&self, locator: &str) -> Result<bool, StoreError> {
        let map = self.data.read().await;
        Ok(map.contains_key(locator))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let map = self.data.read().await;
        let mut out: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        out.sort();
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let map = self.data.read().await;
        Ok(StoreStats {
            container_count: map.len(),
            total_bytes: map.values().map(|(d, _)| d.len() as u64).sum(),
        })
    }
}

/// S3 对象存储实现
///
/// 容器摘要存为对象元数据；区间读取走 Range 请求，
/// 不拉取完整对象。
pub struct S3ArchiveStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ArchiveStore {
    pub fn new(
        region: String,
        bucket: String,
        access_key: String,
        secret_key: String,
        endpoint: Option<String>,
    ) -> Self {
        let credentials =
            aws_sdk_s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let mut config_builder = aws_sdk_s3::config::Builder::new()
            .region(aws_sdk_s3::config::Region::new(region))
            .credentials_provider(credentials);

        if let Some(ep) = endpoint {
            config_builder = config_builder.endpoint_url(ep).force_path_style(true);
        }

        let config = config_builder.build();
        let client = aws_sdk_s3::Client::from_conf(config);

        Self { client, bucket }
    }
}

#[async_trait]
impl ArchiveStore for S3ArchiveStore {
    async fn put(&self, locator: &str, data: &[u8], sha256: &str) -> Result<(), StoreError> {
        let actual = sha256_hex(data);
        if actual != sha256 {
            return Err(StoreError::DigestMismatch {
                locator: locator.to_string(),
                expected: sha256.to_string(),
                actual,
            });
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(locator)
            .metadata("container-sha256", sha256)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, StoreError> {
        let output = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(locator)
            .send()
            .await
        {
            Ok(o) => o,
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    return Err(StoreError::NotFound(locator.to_string()));
                }
                return Err(StoreError::Backend(service_error.to_string()));
            }
        };

        let expected = output
            .metadata()
            .and_then(|m| m.get("container-sha256"))
            .cloned();
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .into_bytes()
            .to_vec();

        if let Some(expected) = expected {
            let actual = sha256_hex(&data);
            if actual != expected {
                return Err(StoreError::DigestMismatch {
                    locator: locator.to_string(),
                    expected,
                    actual,
                });
            }
        }
        Ok(data)
    }

    async fn get_range(&self, locator: &str, start: u64, len: u64) -> Result<Vec<u8>, StoreError> {
        let end = start.saturating_add(len);
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(locator)
            .range(format!("bytes={}-{}", start, end.saturating_sub(1)))
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StoreError::NotFound(locator.to_string())
                } else {
                    StoreError::Backend(service_error.to_string())
                }
            })?;

        Ok(output
            .body
            .collect()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .into_bytes()
            .to_vec())
    }

    async fn delete(&self, locator: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(locator)
            .send()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn exists(&self, locator: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(locator)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StoreError::Backend(service_error.to_string()))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut out = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }

            let output = req
                .send()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            for object in output.contents() {
                if let Some(key) = object.key() {
                    if key.ends_with(".avcr") {
                        out.push(key.to_string());
                    }
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        out.sort();
        Ok(out)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let mut stats = StoreStats::default();
        let mut continuation: Option<String> = None;

        loop {
            let mut req = self.client.list_objects_v2().bucket(&self.bucket);
            if let Some(token) = continuation.take() {
                req = req.continuation_token(token);
            }

            let output = req
                .send()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;

            for object in output.contents() {
                if object.key().is_some_and(|k| k.ends_with(".avcr")) {
                    stats.container_count += 1;
                    stats.total_bytes += object.size().unwrap_or(0).max(0) as u64;
                }
            }

            match output.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        Ok(stats)
    }
}

/// 存储工厂函数
pub fn create_archive_store(
    settings: &StorageSettings,
) -> Result<Arc<dyn ArchiveStore>, StoreError> {
    match settings.storage_type.as_str() {
        "local" => {
            let base_path = settings
                .local_path
                .clone()
                .unwrap_or_else(|| "./archives".to_string());
            Ok(Arc::new(LocalArchiveStore::new(base_path)))
        }

        "memory" => Ok(Arc::new(InMemoryArchiveStore::new())),

        "s3" => {
            let s3 = settings
                .s3
                .as_ref()
                .ok_or_else(|| StoreError::Backend("Missing S3 settings".to_string()))?;
            Ok(Arc::new(S3ArchiveStore::new(
                s3.region.clone(),
                s3.bucket.clone(),
                s3.access_key.clone(),
                s3.secret_key.clone(),
                s3.endpoint.clone(),
            )))
        }

        other => Err(StoreError::Backend(format!(
            "Unsupported storage type: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_locator_layout() {
        let target_id = Uuid::nil();
        let captured = Utc.with_ymd_and_hms(2025, 3, 9, 12, 0, 0).unwrap();
        let locator = container_locator(target_id, 4, captured);
        assert_eq!(
            locator,
            "2025/03/09/00000000-0000-0000-0000-000000000000/v4.avcr"
        );
    }

    #[tokio::test]
    async fn test_local_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let data = b"container bytes".to_vec();
        let digest = sha256_hex(&data);

        store.put("2025/01/01/t/v1.avcr", &data, &digest).await.unwrap();
        assert!(store.exists("2025/01/01/t/v1.avcr").await.unwrap());

        let back = store.get("2025/01/01/t/v1.avcr").await.unwrap();
        assert_eq!(back, data);

        let range = store.get_range("2025/01/01/t/v1.avcr", 10, 5).await.unwrap();
        assert_eq!(&range, b"bytes");
    }

    #[tokio::test]
    async fn test_local_put_rejects_wrong_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let err = store
            .put("x/v1.avcr", b"data", "not-the-digest")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DigestMismatch { .. }));
        assert!(!store.exists("x/v1.avcr").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_detects_bit_rot() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let data = b"pristine".to_vec();
        store.put("y/v1.avcr", &data, &sha256_hex(&data)).await.unwrap();

        // Flip bytes behind the store's back
        std::fs::write(dir.path().join("y/v1.avcr"), b"corroded").unwrap();
        assert!(matches!(
            store.get("y/v1.avcr").await,
            Err(StoreError::DigestMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_local_list_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        for (locator, body) in [
            ("2025/01/02/t1/v1.avcr", b"aa".as_slice()),
            ("2025/01/02/t1/v2.avcr", b"bbbb".as_slice()),
            ("2025/01/03/t2/v1.avcr", b"cc".as_slice()),
        ] {
            store.put(locator, body, &sha256_hex(body)).await.unwrap();
        }

        let t1 = store.list("2025/01/02/t1").await.unwrap();
        assert_eq!(t1.len(), 2);
        assert!(t1[0] < t1[1]);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.container_count, 3);
        assert_eq!(stats.total_bytes, 8);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalArchiveStore::new(dir.path());
        let data = b"gone soon".to_vec();
        store.put("z/v1.avcr", &data, &sha256_hex(&data)).await.unwrap();

        store.delete("z/v1.avcr").await.unwrap();
        assert!(!store.exists("z/v1.avcr").await.unwrap());
        store.delete("z/v1.avcr").await.unwrap();
    }

    #[tokio::test]
    async fn test_in_memory_range_bounds() {
        let store = InMemoryArchiveStore::new();
        let data = b"0123456789".to_vec();
        store.put("m/v1.avcr", &data, &sha256_hex(&data)).await.unwrap();

        assert_eq!(store.get_range("m/v1.avcr", 2, 3).await.unwrap(), b"234");
        assert!(matches!(
            store.get_range("m/v1.avcr", 8, 5).await,
            Err(StoreError::InvalidRange { .. })
        ));
    }
}
