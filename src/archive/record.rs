// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// 每条记录头部行的前导魔数
///
/// 容器格式 AVCR/1：文件是一串相互独立的gzip成员的拼接，
/// 每个成员承载一个记录组。组内每条记录自描述：
/// 一行 `AVCR/1 <json元数据>\n`，元数据给出body_len，
/// 随后是恰好body_len个正文字节和一个结尾换行。
/// 记录边界自描述、元数据标准化，因此历史容器可以
/// 脱离本系统被第三方回放工具读取。
pub const RECORD_MAGIC: &[u8] = b"AVCR/1 ";

/// 归档层错误类型
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Metadata encoding error: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("Record digest mismatch for {url}: expected {expected}, got {actual}")]
    RecordDigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("Container digest mismatch: expected {expected}, got {actual}")]
    ContainerDigestMismatch { expected: String, actual: String },

    #[error("Container already sealed")]
    AlreadySealed,

    #[error("Record ordinal {0} out of range")]
    OrdinalOutOfRange(usize),
}

/// 记录类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// 容器信息记录，每个容器的首条记录
    Info,
    /// 捕获的HTTP响应记录
    Response,
}

/// 记录元数据
///
/// 记录头部行中的JSON负载。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    /// 记录类型
    pub kind: RecordKind,
    /// 请求的URL
    pub url: String,
    /// 重定向后的最终URL
    pub final_url: String,
    /// HTTP状态码
    pub status: u16,
    /// 内容类型
    pub content_type: String,
    /// 响应头
    pub headers: Vec<(String, String)>,
    /// 捕获时间
    pub fetched_at: DateTime<Utc>,
    /// 正文字节数
    pub body_len: u64,
    /// 正文的SHA-256摘要（十六进制）
    pub sha256: String,
}

impl RecordMeta {
    /// 构造一条响应记录的元数据，摘要由正文计算
    pub fn response(
        url: String,
        final_url: String,
        status: u16,
        content_type: String,
        headers: Vec<(String, String)>,
        fetched_at: DateTime<Utc>,
        body: &[u8],
    ) -> Self {
        Self {
            kind: RecordKind::Response,
            url,
            final_url,
            status,
            content_type,
            headers,
            fetched_at,
            body_len: body.len() as u64,
            sha256: sha256_hex(body),
        }
    }

    /// 构造容器信息记录的元数据
    pub fn info(container_name: String, body: &[u8]) -> Self {
        Self {
            kind: RecordKind::Info,
            url: container_name.clone(),
            final_url: container_name,
            status: 0,
            content_type: "application/json".to_string(),
            headers: Vec::new(),
            fetched_at: Utc::now(),
            body_len: body.len() as u64,
            sha256: sha256_hex(body),
        }
    }
}

/// 计算字节的SHA-256摘要（十六进制小写）
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// 将一条记录编码为字节（头部行 + 正文 + 换行）
pub fn encode_record(meta: &RecordMeta, body: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let json = serde_json::to_vec(meta)?;
    let mut out = Vec::with_capacity(RECORD_MAGIC.len() + json.len() + body.len() + 2);
    out.extend_from_slice(RECORD_MAGIC);
    out.extend_from_slice(&json);
    out.push(b'\n');
    out.extend_from_slice(body);
    out.push(b'\n');
    Ok(out)
}

/// 从字节缓冲区解码一条记录
///
/// # 返回值
///
/// * `Ok((meta, body, consumed))` - 元数据、正文切片和消耗的字节数
/// * `Err(ArchiveError)` - 缓冲区不包含合法记录
pub fn decode_record(buf: &[u8]) -> Result<(RecordMeta, &[u8], usize), ArchiveError> {
    if !buf.starts_with(RECORD_MAGIC) {
        return Err(ArchiveError::MalformedRecord(
            "missing AVCR/1 magic".to_string(),
        ));
    }

    let header_end = buf
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| ArchiveError::MalformedRecord("unterminated header line".to_string()))?;

    let meta: RecordMeta = serde_json::from_slice(&buf[RECORD_MAGIC.len()..header_end])?;

    let body_start = header_end + 1;
    let body_end = body_start + meta.body_len as usize;
    // Body plus its trailing newline must fit in the buffer
    if body_end + 1 > buf.len() {
        return Err(ArchiveError::MalformedRecord(format!(
            "truncated body for {}",
            meta.url
        )));
    }

    let body = &buf[body_start..body_end];
    Ok((meta, body, body_end + 1))
}

/// 校验记录正文与其声明的摘要一致
pub fn verify_record(meta: &RecordMeta, body: &[u8]) -> Result<(), ArchiveError> {
    let actual = sha256_hex(body);
    if actual != meta.sha256 {
        return Err(ArchiveError::RecordDigestMismatch {
            url: meta.url.clone(),
            expected: meta.sha256.clone(),
            actual,
        });
    }
    Ok(())
}
