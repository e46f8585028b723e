// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use archivrs::archive::store::create_archive_store;
use archivrs::archive::writer::sweep_orphans;
use archivrs::config::settings::Settings;
use archivrs::crawler::orchestrator::CrawlOrchestrator;
use archivrs::crawler::politeness::PolitenessGate;
use archivrs::detector::change_detector::ChangeDetector;
use archivrs::domain::models::snapshot::SnapshotRegistry;
use archivrs::domain::models::target::{CrawlLimits, CrawlTarget, EngineKind};
use archivrs::domain::ports::{StatusSink, TracingReanalysisSink, TracingStatusSink};
use archivrs::engines::create_engine;
use archivrs::index::indexer::SnapshotIndex;
use archivrs::scheduler::scheduler::ArchiveScheduler;
use archivrs::utils::robots::RobotsChecker;
use archivrs::utils::telemetry;

/// 主函数
///
/// 应用程序入口点，负责初始化所有组件并启动调度循环
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize logging
    telemetry::init_telemetry();
    info!("Starting archivrs...");

    // 2. Load configuration
    let settings = Settings::new()?;
    info!("Configuration loaded");

    // 3. Archive store and staging area
    let store = create_archive_store(&settings.storage)?;
    tokio::fs::create_dir_all(&settings.crawler.staging_dir).await?;
    let removed = sweep_orphans(
        Path::new(&settings.crawler.staging_dir),
        Duration::from_secs(settings.crawler.orphan_horizon_secs),
    )
    .await?;
    if removed > 0 {
        info!(removed, "Swept orphaned staging containers");
    }

    // 4. Snapshot index, loaded from the previous run if present
    let index_path = Path::new(&settings.storage.index_path).to_path_buf();
    let index = SnapshotIndex::load(&index_path).await?;
    info!(entries = index.entries().len(), "Snapshot index loaded");

    // 5. Shared crawl collaborators
    let registry = Arc::new(SnapshotRegistry::new());
    let status_sink: Arc<dyn StatusSink> = Arc::new(TracingStatusSink);
    let politeness = Arc::new(PolitenessGate::new(
        Arc::new(RobotsChecker::new()),
        Duration::from_millis(settings.crawler.host_delay_ms),
        settings.crawler.user_agent.clone(),
        settings.crawler.respect_robots,
    ));

    // 6. One orchestrator per engine kind
    let mut orchestrators = HashMap::new();
    for kind in [EngineKind::Http, EngineKind::Browser] {
        let engine = create_engine(kind)?;
        let orchestrator = CrawlOrchestrator::new(
            engine,
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&status_sink),
            Arc::clone(&politeness),
            settings.crawler.clone(),
        );
        orchestrators.insert(kind, Arc::new(orchestrator));
    }

    // 7. Change detector with configured weights
    let detector = ChangeDetector::new(
        settings.detector.weights(),
        settings.detector.reanalysis_threshold,
    )?;

    // 8. Scheduler
    let scheduler = ArchiveScheduler::new(
        settings.scheduler.clone(),
        orchestrators,
        registry,
        store,
        detector,
        Arc::new(TracingReanalysisSink),
        index_path,
    );
    *scheduler.index().lock().await = index;

    for target_settings in &settings.targets {
        let target = CrawlTarget {
            host_delay_ms: target_settings.host_delay_ms,
            ..CrawlTarget::new(
                target_settings.seed_url.clone(),
                target_settings.scope,
                CrawlLimits {
                    max_depth: target_settings.max_depth,
                    max_pages: target_settings.max_pages,
                },
                target_settings.engine,
            )
        };
        scheduler.register(target, target_settings.interval_secs, target_settings.priority);
    }
    info!(targets = settings.targets.len(), "Targets registered");

    // 9. Run until interrupted; in-flight jobs seal partial containers
    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run_loop());
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    scheduler.shutdown();
    loop_handle.await?;

    info!("archivrs stopped");
    Ok(())
}
