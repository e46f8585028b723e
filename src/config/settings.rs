// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::detector::change_detector::DimensionWeights;
use crate::domain::models::target::{EngineKind, ScopeRule};

/// 应用程序配置设置
///
/// 包含存储、爬取、变化检测和调度等所有配置项
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// 存储配置
    pub storage: StorageSettings,
    /// 爬取配置
    pub crawler: CrawlerSettings,
    /// 变化检测配置
    pub detector: DetectorSettings,
    /// 调度配置
    pub scheduler: SchedulerSettings,
    /// 启动时注册的爬取目标
    #[serde(default)]
    pub targets: Vec<TargetSettings>,
}

/// 爬取目标配置
///
/// 配置文件声明的目标在启动时注册进调度器。
#[derive(Debug, Clone, Deserialize)]
pub struct TargetSettings {
    /// 种子URL
    pub seed_url: String,
    /// 范围规则 (domain, subdomain, path)
    #[serde(default)]
    pub scope: ScopeRule,
    /// 抓取引擎 (http, browser)
    #[serde(default)]
    pub engine: EngineKind,
    /// 最大爬取深度
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    /// 最大页面数量
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// 基础捕获间隔（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: i64,
    /// 优先级权重
    #[serde(default)]
    pub priority: i32,
    /// 每主机延迟覆盖（毫秒）
    pub host_delay_ms: Option<u64>,
}

fn default_max_depth() -> u32 {
    3
}

fn default_max_pages() -> usize {
    1000
}

fn default_interval_secs() -> i64 {
    7 * 24 * 3600
}

/// 存储配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// 存储类型 (local, memory, s3)
    pub storage_type: String,
    /// 本地存储路径 (当 type=local 时使用)
    pub local_path: Option<String>,
    /// 索引文件路径
    pub index_path: String,
    /// S3 配置 (当 type=s3 时使用)
    pub s3: Option<S3Settings>,
}

/// S3 配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct S3Settings {
    /// S3 区域
    pub region: String,
    /// S3 存储桶名称
    pub bucket: String,
    /// S3 访问密钥
    pub access_key: String,
    /// S3 密钥
    pub secret_key: String,
    /// S3 端点 (可选，用于 MinIO 等兼容服务)
    pub endpoint: Option<String>,
}

/// 爬取配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerSettings {
    /// 容器暂存目录（封存前的临时文件）
    pub staging_dir: String,
    /// 每个压缩组的记录条数
    pub group_size: u32,
    /// gzip压缩级别 (0-9)
    pub compression_level: u32,
    /// 单资源抓取超时（秒）
    pub fetch_timeout_secs: u64,
    /// 单资源正文字节上限
    pub max_body_bytes: u64,
    /// 作业墙钟超时（秒）
    pub job_timeout_secs: u64,
    /// 全局每主机礼貌延迟（毫秒）
    pub host_delay_ms: u64,
    /// 是否遵守robots.txt
    pub respect_robots: bool,
    /// User-Agent
    pub user_agent: String,
    /// 每抓取多少个页面上报一次进度
    pub progress_every: usize,
    /// 孤儿临时文件清理期限（秒）
    pub orphan_horizon_secs: u64,
}

/// 变化检测配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct DetectorSettings {
    /// 内容维度权重
    pub weight_content: f64,
    /// 结构维度权重
    pub weight_structure: f64,
    /// 资源集维度权重
    pub weight_resources: f64,
    /// 页面集维度权重
    pub weight_pages: f64,
    /// 重新分析阈值
    pub reanalysis_threshold: f64,
}

impl DetectorSettings {
    pub fn weights(&self) -> DimensionWeights {
        DimensionWeights {
            content: self.weight_content,
            structure: self.weight_structure,
            resources: self.weight_resources,
            pages: self.weight_pages,
        }
    }
}

/// 调度配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSettings {
    /// 并发作业上限
    pub max_concurrent_jobs: usize,
    /// 调度循环间隔（秒）
    pub tick_interval_secs: u64,
    /// 连续失败达到该值时设置needs_attention
    pub failure_threshold: u32,
    /// 显著变化时的间隔收缩因子
    pub escalation_factor: f64,
    /// 连续无变化时的间隔伸展因子
    pub deescalation_factor: f64,
    /// 触发伸展所需的连续无变化次数
    pub no_change_streak: u32,
    /// 最小捕获间隔（秒）
    pub min_interval_secs: i64,
    /// 最大捕获间隔（秒）
    pub max_interval_secs: i64,
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 从环境变量加载配置，支持默认值
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(ConfigError)` - 配置加载失败
    pub fn new() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let builder = Config::builder()
            // Default Storage settings
            .set_default("storage.storage_type", "local")?
            .set_default("storage.local_path", "./archives")?
            .set_default("storage.index_path", "./archives/index.cdx")?
            // Default Crawler settings
            .set_default("crawler.staging_dir", "./staging")?
            .set_default("crawler.group_size", 1)?
            .set_default("crawler.compression_level", 6)?
            .set_default("crawler.fetch_timeout_secs", 30)?
            .set_default("crawler.max_body_bytes", 10 * 1024 * 1024)?
            .set_default("crawler.job_timeout_secs", 3600)?
            .set_default("crawler.host_delay_ms", 1000)?
            .set_default("crawler.respect_robots", true)?
            .set_default("crawler.user_agent", "archivrs-bot/1.0")?
            .set_default("crawler.progress_every", 10)?
            .set_default("crawler.orphan_horizon_secs", 86400)?
            // Default Detector settings
            .set_default("detector.weight_content", 0.4)?
            .set_default("detector.weight_structure", 0.3)?
            .set_default("detector.weight_resources", 0.2)?
            .set_default("detector.weight_pages", 0.1)?
            .set_default("detector.reanalysis_threshold", 0.3)?
            // Default Scheduler settings
            .set_default("scheduler.max_concurrent_jobs", 4)?
            .set_default("scheduler.tick_interval_secs", 5)?
            .set_default("scheduler.failure_threshold", 5)?
            .set_default("scheduler.escalation_factor", 0.5)?
            .set_default("scheduler.deescalation_factor", 1.5)?
            .set_default("scheduler.no_change_streak", 3)?
            .set_default("scheduler.min_interval_secs", 3600)?
            .set_default("scheduler.max_interval_secs", 30 * 24 * 3600)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(Environment::with_prefix("ARCHIVRS").separator("__"));

        builder.build()?.try_deserialize()
    }
}
