// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::Utc;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::archive::reader::ContainerReader;
use crate::archive::record::{ArchiveError, RecordMeta};
use crate::archive::store::{container_locator, ArchiveStore, StoreError};
use crate::archive::writer::{ArchiveWriter, ContainerInfo, SealSummary};
use crate::config::settings::CrawlerSettings;
use crate::crawler::frontier::Frontier;
use crate::crawler::politeness::PolitenessGate;
use crate::detector::summary::{extract_resource_refs, SnapshotSummary};
use crate::domain::models::job::{CrawlJob, DomainError, JobCounters};
use crate::domain::models::snapshot::{Snapshot, SnapshotRegistry};
use crate::domain::models::target::CrawlTarget;
use crate::domain::ports::StatusSink;
use crate::engines::traits::{EngineError, FetchEngine, FetchRequest};
use crate::index::indexer::{generate, IndexEntry, IndexError};
use crate::utils::retry_policy::RetryPolicy;
use crate::utils::url_utils::resolve_url;

/// 爬取层错误类型
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Job state error: {0}")]
    Domain(#[from] DomainError),

    #[error("Invalid seed URL: {0}")]
    Seed(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crawl produced no records for target {0}")]
    NoRecords(Uuid),
}

/// 一次成功爬取的产出
#[derive(Debug)]
pub struct CrawlOutcome {
    /// 完成的作业
    pub job: CrawlJob,
    /// 登记的快照
    pub snapshot: Snapshot,
    /// 用于变化检测的快照摘要
    pub summary: SnapshotSummary,
    /// 本容器的索引条目（已排序）
    pub index_entries: Vec<IndexEntry>,
}

/// 爬取编排器
///
/// 从种子出发的广度优先爬取：抓到的页面和资源逐条流入
/// 容器写入器，从不整体缓存在内存里。单个资源失败计数后
/// 继续；只有零记录或引擎级故障才导致作业失败。取消和
/// 墙钟超时优雅封存已捕获的部分容器。
pub struct CrawlOrchestrator {
    engine: Arc<dyn FetchEngine>,
    store: Arc<dyn ArchiveStore>,
    registry: Arc<SnapshotRegistry>,
    status_sink: Arc<dyn StatusSink>,
    politeness: Arc<PolitenessGate>,
    retry_policy: RetryPolicy,
    settings: CrawlerSettings,
}

impl CrawlOrchestrator {
    pub fn new(
        engine: Arc<dyn FetchEngine>,
        store: Arc<dyn ArchiveStore>,
        registry: Arc<SnapshotRegistry>,
        status_sink: Arc<dyn StatusSink>,
        politeness: Arc<PolitenessGate>,
        settings: CrawlerSettings,
    ) -> Self {
        Self {
            engine,
            store,
            registry,
            status_sink,
            politeness,
            retry_policy: RetryPolicy::fast(),
            settings,
        }
    }

    fn staging_path(&self, job_id: Uuid) -> PathBuf {
        PathBuf::from(&self.settings.staging_dir).join(format!("{}.avcr", job_id))
    }

    /// 执行一次完整的归档爬取
    ///
    /// # 参数
    ///
    /// * `target` - 爬取目标
    /// * `cancel` - 取消信号；置true后当前资源完成即收尾
    ///
    /// # 返回值
    ///
    /// * `Ok(CrawlOutcome)` - 封存的容器、快照、摘要和索引条目
    /// * `Err(CrawlError)` - 零记录或基础设施故障
    pub async fn run(
        &self,
        target: &CrawlTarget,
        cancel: watch::Receiver<bool>,
    ) -> Result<CrawlOutcome, CrawlError> {
        let job = CrawlJob::new(target.id, target.engine).start()?;
        self.status_sink.job_started(&job).await;

        match self.crawl_into_container(target, &job, &cancel).await {
            Ok((counters, partial, seal)) => {
                self.finish(target, job, counters, partial, seal).await
            }
            Err((counters, err)) => {
                let failed = job.fail(counters, err.to_string())?;
                self.status_sink
                    .job_failed(&failed, &failed.error_message.clone().unwrap_or_default())
                    .await;
                Err(err)
            }
        }
    }

    /// 爬取阶段：填充暂存容器
    ///
    /// 返回计数器与partial标志；错误时一并带回已累计的计数器。
    async fn crawl_into_container(
        &self,
        target: &CrawlTarget,
        job: &CrawlJob,
        cancel: &watch::Receiver<bool>,
    ) -> Result<(JobCounters, bool, SealSummary), (JobCounters, CrawlError)> {
        let mut counters = JobCounters::default();

        let seed = Url::parse(&target.seed_url).map_err(|e| (counters, CrawlError::Seed(e)))?;

        let mut writer = ArchiveWriter::create(
            &self.staging_path(job.id),
            ContainerInfo::new(target.id, job.id),
            self.settings.group_size,
            self.settings.compression_level,
        )
        .await
        .map_err(|e| (counters, CrawlError::Archive(e)))?;

        let timeout = Duration::from_secs(self.settings.fetch_timeout_secs);
        let deadline = Instant::now() + Duration::from_secs(self.settings.job_timeout_secs);
        // Per-target politeness override, falling back to the global delay
        let host_delay = target.host_delay_ms.map(Duration::from_millis);
        let mut partial = false;

        let mut frontier = Frontier::new();
        frontier.push(seed.clone(), 0);
        let mut resources_seen: HashSet<String> = HashSet::new();
        // Scope checks run against the final resolved URL: a cross-domain
        // seed redirect re-anchors the whole crawl
        let mut scope_base = seed;

        'pages: while let Some((url, depth)) = frontier.pop() {
            if counters.pages_fetched >= target.limits.max_pages {
                break;
            }
            if *cancel.borrow() || Instant::now() >= deadline {
                partial = true;
                break;
            }

            if !self.politeness.allowed(&url).await {
                debug!(url = %url, "Skipping robots-excluded URL");
                continue;
            }
            self.politeness.acquire(&url, host_delay).await;

            let request = FetchRequest::page(
                url.to_string(),
                timeout,
                self.settings.max_body_bytes,
            );
            let response = match self.fetch_with_retries(&request).await {
                Ok(r) => r,
                Err(e) => {
                    counters.fetch_errors += 1;
                    if matches!(e, EngineError::Browser(_)) {
                        // Engine-level fault: the rest of the frontier
                        // would fail the same way
                        warn!(url = %url, error = %e, "Engine fault, aborting frontier");
                        partial = true;
                        break;
                    }
                    warn!(url = %url, error = %e, "Page fetch failed");
                    continue;
                }
            };

            let final_url = Url::parse(&response.final_url).ok();
            if let Some(ref fu) = final_url {
                if depth == 0 {
                    scope_base = fu.clone();
                } else if !target.in_scope(&scope_base, fu) {
                    // Redirected out of scope after the fact
                    debug!(url = %url, final_url = %fu, "Redirect left scope, dropping");
                    continue;
                }
                frontier.mark_visited(fu);
            }

            let is_html = response.is_html();
            let meta = RecordMeta::response(
                url.to_string(),
                response.final_url.clone(),
                response.status,
                response.content_type.clone(),
                response.headers.clone(),
                response.fetched_at,
                &response.body,
            );
            counters.bytes_fetched += response.body.len() as u64;
            counters.pages_fetched += 1;
            writer
                .append(meta, &response.body)
                .await
                .map_err(|e| (counters, CrawlError::Archive(e)))?;

            if counters.pages_fetched % self.settings.progress_every.max(1) == 0 {
                self.status_sink.job_progress(job.id, &counters).await;
            }

            if !is_html || response.status != 200 {
                continue;
            }

            let html = String::from_utf8_lossy(&response.body).into_owned();
            let base = final_url.unwrap_or_else(|| url.clone());

            // Subresources are archived from wherever they live (CDNs
            // included); only page links are scope-checked
            for raw in extract_resource_refs(&html) {
                let Ok(resource_url) = resolve_url(&base, &raw) else {
                    continue;
                };
                if !matches!(resource_url.scheme(), "http" | "https") {
                    continue;
                }
                if !resources_seen.insert(resource_url.to_string()) {
                    continue;
                }
                if *cancel.borrow() || Instant::now() >= deadline {
                    partial = true;
                    break 'pages;
                }

                self.politeness.acquire(&resource_url, host_delay).await;
                let request = FetchRequest::resource(
                    resource_url.to_string(),
                    timeout,
                    self.settings.max_body_bytes,
                );
                match self.fetch_with_retries(&request).await {
                    Ok(resp) => {
                        let meta = RecordMeta::response(
                            resource_url.to_string(),
                            resp.final_url.clone(),
                            resp.status,
                            resp.content_type.clone(),
                            resp.headers.clone(),
                            resp.fetched_at,
                            &resp.body,
                        );
                        counters.bytes_fetched += resp.body.len() as u64;
                        counters.resources_fetched += 1;
                        writer
                            .append(meta, &resp.body)
                            .await
                            .map_err(|e| (counters, CrawlError::Archive(e)))?;
                    }
                    Err(e) => {
                        counters.fetch_errors += 1;
                        warn!(url = %resource_url, error = %e, "Resource fetch failed");
                    }
                }
            }

            if depth < target.limits.max_depth {
                for raw in extract_links(&html) {
                    let Ok(link) = resolve_url(&base, &raw) else {
                        continue;
                    };
                    if !matches!(link.scheme(), "http" | "https") {
                        continue;
                    }
                    if target.in_scope(&scope_base, &link) {
                        frontier.push(link, depth + 1);
                    }
                }
            }
        }

        if writer.record_count() == 0 {
            // Leave the tmp file to the orphan sweep
            return Err((counters, CrawlError::NoRecords(target.id)));
        }

        // A cancelled-but-nonempty crawl still seals what it captured
        let seal = writer
            .seal()
            .await
            .map_err(|e| (counters, CrawlError::Archive(e)))?;
        Ok((counters, partial, seal))
    }

    /// 收尾阶段：入库、建摘要与索引、登记快照
    async fn finish(
        &self,
        target: &CrawlTarget,
        job: CrawlJob,
        counters: JobCounters,
        partial: bool,
        seal: SealSummary,
    ) -> Result<CrawlOutcome, CrawlError> {
        let staging = self.staging_path(job.id);
        let data = tokio::fs::read(&staging).await?;

        let captured_at = Utc::now();
        let version = self.registry.next_version(target.id);
        let locator = container_locator(target.id, version, captured_at);

        self.store.put(&locator, &data, &seal.sha256).await?;
        tokio::fs::remove_file(&staging).await?;

        let reader = ContainerReader::new(data);
        let summary = SnapshotSummary::from_container(&reader)?;
        let index_entries = generate(&reader, &locator)?;

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            target_id: target.id,
            job_id: job.id,
            version_number: version,
            container_locator: locator,
            previous_snapshot_id: self.registry.latest(target.id).map(|s| s.id),
            content_digest: summary.content_digest.clone(),
            structure_digest: summary.structure_digest.clone(),
            pages_captured: summary.pages.len(),
            resources_captured: counters.resources_fetched,
            partial,
            captured_at,
        };
        self.registry.register(snapshot.clone());

        let job = job.complete(counters, partial)?;
        self.status_sink.job_completed(&job).await;
        info!(
            target_id = %target.id,
            version,
            pages = snapshot.pages_captured,
            partial,
            "Crawl archived"
        );

        Ok(CrawlOutcome {
            job,
            snapshot,
            summary,
            index_entries,
        })
    }

    /// 带退避的抓取
    ///
    /// 可重试错误（超时/连接/5xx）按策略退避重试；
    /// 永久错误立即返回。
    async fn fetch_with_retries(
        &self,
        request: &FetchRequest,
    ) -> Result<crate::engines::traits::FetchResponse, EngineError> {
        let mut attempt = 0u32;
        loop {
            match self.engine.fetch(request).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    if !e.is_retryable() || !self.retry_policy.should_retry(attempt) {
                        return Err(e);
                    }
                    let backoff = self.retry_policy.backoff_for(attempt);
                    debug!(url = %request.url, attempt, backoff_ms = backoff.as_millis() as u64, "Retrying fetch");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// 从HTML提取超链接（原始href值）
pub fn extract_links(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(_) => return Vec::new(),
    };

    document
        .select(&selector)
        .filter_map(|e| e.value().attr("href"))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty() && !h.starts_with('#'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_skips_fragments() {
        let html = r##"<html><body>
            <a href="/a">A</a>
            <a href="#section">anchor</a>
            <a href="https://other.org/b">B</a>
            <a href="">empty</a>
        </body></html>"##;
        let links = extract_links(html);
        assert_eq!(links, vec!["/a".to_string(), "https://other.org/b".to_string()]);
    }
}
