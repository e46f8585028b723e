// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

/// 爬取目标实体
///
/// 由外部协作方注册的归档目标，包含种子URL、范围规则、
/// 爬取限制和引擎选择。本引擎从不自行决定追踪哪些目标。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTarget {
    /// 目标唯一标识符
    pub id: Uuid,
    /// 种子URL，爬取的入口地址
    pub seed_url: String,
    /// 范围规则，限定爬取停留在哪个URL空间内
    pub scope: ScopeRule,
    /// 爬取限制（最大深度、最大页面数）
    pub limits: CrawlLimits,
    /// 指定的抓取引擎，显式配置，从不自动回退
    pub engine: EngineKind,
    /// 每主机礼貌延迟覆盖（毫秒），None时使用全局配置
    pub host_delay_ms: Option<u64>,
}

impl CrawlTarget {
    /// 创建一个新的爬取目标
    pub fn new(seed_url: String, scope: ScopeRule, limits: CrawlLimits, engine: EngineKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            seed_url,
            scope,
            limits,
            engine,
            host_delay_ms: None,
        }
    }

    /// 判断URL是否落在目标的爬取范围内
    ///
    /// 范围检查以重定向后的最终URL为准：当种子URL跨域重定向时，
    /// 最终解析出的URL具有权威性（见DESIGN.md中的决策记录）。
    ///
    /// # 参数
    ///
    /// * `seed` - 范围基准URL（通常是种子URL重定向后的最终URL）
    /// * `candidate` - 待检查的URL
    ///
    /// # 返回值
    ///
    /// 如果候选URL在范围内则返回true
    pub fn in_scope(&self, seed: &Url, candidate: &Url) -> bool {
        let (Some(seed_host), Some(cand_host)) = (seed.host_str(), candidate.host_str()) else {
            return false;
        };
        let seed_host = seed_host.trim_start_matches("www.");
        let cand_host = cand_host.trim_start_matches("www.");

        match self.scope {
            ScopeRule::Domain => cand_host == seed_host,
            ScopeRule::Subdomain => {
                cand_host == seed_host || cand_host.ends_with(&format!(".{}", seed_host))
            }
            ScopeRule::Path => {
                cand_host == seed_host && candidate.path().starts_with(seed.path())
            }
        }
    }
}

/// 爬取范围规则枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScopeRule {
    /// 仅限同一域名
    #[default]
    Domain,
    /// 允许子域名
    Subdomain,
    /// 仅限种子URL的路径前缀之下
    Path,
}

impl fmt::Display for ScopeRule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ScopeRule::Domain => write!(f, "domain"),
            ScopeRule::Subdomain => write!(f, "subdomain"),
            ScopeRule::Path => write!(f, "path"),
        }
    }
}

impl FromStr for ScopeRule {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "domain" => Ok(ScopeRule::Domain),
            "subdomain" => Ok(ScopeRule::Subdomain),
            "path" => Ok(ScopeRule::Path),
            _ => Err(()),
        }
    }
}

/// 爬取限制
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CrawlLimits {
    /// 最大爬取深度
    pub max_depth: u32,
    /// 最大页面数量
    pub max_pages: usize,
}

impl Default for CrawlLimits {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 1000,
        }
    }
}

/// 抓取引擎类型枚举
///
/// 引擎选择是显式的每目标配置，从不静默回退，
/// 以保证成本和行为可预测。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// 普通HTTP引擎，不执行脚本，成本最低
    #[default]
    Http,
    /// 渲染引擎，在隔离进程中执行页面脚本
    Browser,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EngineKind::Http => write!(f, "http"),
            EngineKind::Browser => write!(f, "browser"),
        }
    }
}
