// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use flate2::bufread::GzDecoder;
use std::io::{Cursor, Read};

use crate::archive::record::{
    decode_record, sha256_hex, verify_record, ArchiveError, RecordKind, RecordMeta,
};
use crate::archive::writer::{ContainerInfo, RecordLocation};

/// 容器中的一条已解码记录
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub location: RecordLocation,
    pub meta: RecordMeta,
    pub body: Vec<u8>,
}

/// 一个记录组及其在容器内的压缩区间
#[derive(Debug, Clone)]
pub struct RecordGroup {
    /// 组的文件字节偏移
    pub offset: u64,
    /// 组的压缩字节数
    pub length: u64,
    /// 组内记录
    pub records: Vec<(RecordMeta, Vec<u8>)>,
}

/// 归档容器读取器
///
/// 逐个gzip成员解压，成员边界即记录组边界。
/// 读取整个容器只需顺序解压；读取单条记录只需
/// 解压其所在的组。
pub struct ContainerReader {
    data: Vec<u8>,
}

impl ContainerReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// 容器总字节数
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 读取容器信息记录（成员0的首条记录）
    pub fn info(&self) -> Result<ContainerInfo, ArchiveError> {
        let group = self.decompress_group(0)?;
        let (meta, body, _) = decode_record(&group)?;
        if meta.kind != RecordKind::Info {
            return Err(ArchiveError::MalformedRecord(
                "container does not start with an info record".to_string(),
            ));
        }
        verify_record(&meta, body)?;
        Ok(serde_json::from_slice(body)?)
    }

    /// 按位置取单条记录
    ///
    /// 只解压目标记录组，按序号在组内定位。
    ///
    /// # 参数
    ///
    /// * `location` - 记录位置（组偏移 + 组内序号）
    ///
    /// # 返回值
    ///
    /// * `Ok(StoredRecord)` - 校验通过的记录
    /// * `Err(ArchiveError)` - 位置越界或记录损坏
    pub fn fetch(&self, location: RecordLocation) -> Result<StoredRecord, ArchiveError> {
        let group = self.decompress_group(location.offset)?;
        let mut rest: &[u8] = &group;
        let mut ordinal = 0u32;

        while !rest.is_empty() {
            let (meta, body, consumed) = decode_record(rest)?;
            if ordinal == location.ordinal {
                verify_record(&meta, body)?;
                return Ok(StoredRecord {
                    location,
                    meta,
                    body: body.to_vec(),
                });
            }
            rest = &rest[consumed..];
            ordinal += 1;
        }

        Err(ArchiveError::OrdinalOutOfRange(location.ordinal as usize))
    }

    /// 顺序读出容器内的全部响应记录
    ///
    /// 跳过容器信息记录，每条记录都校验正文摘要。
    pub fn records(&self) -> Result<Vec<StoredRecord>, ArchiveError> {
        let mut out = Vec::new();
        let mut offset = 0u64;

        while (offset as usize) < self.data.len() {
            let (group, consumed) = self.decompress_group_sized(offset)?;
            let mut rest: &[u8] = &group;
            let mut ordinal = 0u32;

            while !rest.is_empty() {
                let (meta, body, used) = decode_record(rest)?;
                verify_record(&meta, body)?;
                if meta.kind == RecordKind::Response {
                    out.push(StoredRecord {
                        location: RecordLocation { offset, ordinal },
                        meta,
                        body: body.to_vec(),
                    });
                }
                rest = &rest[used..];
                ordinal += 1;
            }

            offset += consumed;
        }

        Ok(out)
    }

    /// 按记录组遍历容器
    ///
    /// 返回每个gzip成员的（偏移，压缩长度）和组内记录，
    /// 供索引生成记录单组访问所需的区间。
    pub fn groups(&self) -> Result<Vec<RecordGroup>, ArchiveError> {
        let mut out = Vec::new();
        let mut offset = 0u64;

        while (offset as usize) < self.data.len() {
            let (plain, consumed) = self.decompress_group_sized(offset)?;
            let mut rest: &[u8] = &plain;
            let mut records = Vec::new();

            while !rest.is_empty() {
                let (meta, body, used) = decode_record(rest)?;
                verify_record(&meta, body)?;
                records.push((meta, body.to_vec()));
                rest = &rest[used..];
            }

            out.push(RecordGroup {
                offset,
                length: consumed,
                records,
            });
            offset += consumed;
        }

        Ok(out)
    }

    /// 校验容器整体摘要
    pub fn verify(&self, expected_sha256: &str) -> Result<(), ArchiveError> {
        verify_container(&self.data, expected_sha256)
    }

    fn decompress_group(&self, offset: u64) -> Result<Vec<u8>, ArchiveError> {
        Ok(self.decompress_group_sized(offset)?.0)
    }

    /// 解压一个gzip成员，返回明文和成员的压缩字节数
    fn decompress_group_sized(&self, offset: u64) -> Result<(Vec<u8>, u64), ArchiveError> {
        let start = offset as usize;
        if start >= self.data.len() {
            return Err(ArchiveError::MalformedRecord(format!(
                "group offset {} beyond container end",
                offset
            )));
        }

        let cursor = Cursor::new(&self.data[start..]);
        let mut decoder = GzDecoder::new(cursor);
        let mut plain = Vec::new();
        decoder.read_to_end(&mut plain)?;

        // bufread decoder consumes exactly one gzip member
        let consumed = decoder.into_inner().position();
        if consumed == 0 {
            return Err(ArchiveError::MalformedRecord(format!(
                "no gzip member at offset {}",
                offset
            )));
        }
        Ok((plain, consumed))
    }
}

/// 校验容器字节与预期的SHA-256摘要一致
pub fn verify_container(data: &[u8], expected_sha256: &str) -> Result<(), ArchiveError> {
    let actual = sha256_hex(data);
    if actual != expected_sha256 {
        return Err(ArchiveError::ContainerDigestMismatch {
            expected: expected_sha256.to_string(),
            actual,
        });
    }
    Ok(())
}
