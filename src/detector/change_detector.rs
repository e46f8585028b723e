// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::models::change::{
    ChangeClass, ChangeDetail, ChangeReport, DimensionScores,
};
use crate::detector::summary::SnapshotSummary;

/// 检测器层错误类型
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("Dimension weights must sum to 1.0, got {sum}")]
    InvalidWeights { sum: f64 },

    #[error("Weight {name} out of range: {value}")]
    WeightOutOfRange { name: &'static str, value: f64 },
}

/// 维度权重
#[derive(Debug, Clone, Copy)]
pub struct DimensionWeights {
    pub content: f64,
    pub structure: f64,
    pub resources: f64,
    pub pages: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            content: 0.4,
            structure: 0.3,
            resources: 0.2,
            pages: 0.1,
        }
    }
}

impl DimensionWeights {
    /// 校验权重合法（各自在[0,1]且总和为1.0）
    pub fn validate(&self) -> Result<(), DetectorError> {
        for (name, value) in [
            ("content", self.content),
            ("structure", self.structure),
            ("resources", self.resources),
            ("pages", self.pages),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DetectorError::WeightOutOfRange { name, value });
            }
        }
        let sum = self.content + self.structure + self.resources + self.pages;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(DetectorError::InvalidWeights { sum });
        }
        Ok(())
    }
}

/// 变化检测器
///
/// 四个确定性、对称的维度距离加权聚合。没有随机性、
/// 没有时钟：相同输入给出逐位相同的得分。检测器只
/// 产出报告，从不触发重新分析。
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    weights: DimensionWeights,
    /// 单维度覆盖阈值
    dimension_override_threshold: f64,
    /// 重新分析阈值
    reanalysis_threshold: f64,
    /// 文本比较的字符上限（两侧同等截断以保持对称）
    content_char_cap: usize,
    /// 骨架比较的标记上限
    skeleton_token_cap: usize,
}

impl Default for ChangeDetector {
    fn default() -> Self {
        Self {
            weights: DimensionWeights::default(),
            dimension_override_threshold: 0.8,
            reanalysis_threshold: 0.3,
            content_char_cap: 20_000,
            skeleton_token_cap: 5_000,
        }
    }
}

impl ChangeDetector {
    /// 创建变化检测器
    ///
    /// # 参数
    ///
    /// * `weights` - 维度权重，总和必须为1.0
    /// * `reanalysis_threshold` - 聚合得分达到该值时标记需要重新分析
    ///
    /// # 返回值
    ///
    /// * `Ok(ChangeDetector)` - 就绪的检测器
    /// * `Err(DetectorError)` - 权重非法
    pub fn new(
        weights: DimensionWeights,
        reanalysis_threshold: f64,
    ) -> Result<Self, DetectorError> {
        weights.validate()?;
        Ok(Self {
            weights,
            reanalysis_threshold,
            ..Self::default()
        })
    }

    /// 对比两个快照摘要
    ///
    /// # 参数
    ///
    /// * `baseline` - 基线快照摘要
    /// * `current` - 当前快照摘要
    ///
    /// # 返回值
    ///
    /// 变化报告：维度得分、聚合得分、分类和明细
    pub fn detect(
        &self,
        target_id: Uuid,
        baseline_snapshot_id: Uuid,
        current_snapshot_id: Uuid,
        baseline: &SnapshotSummary,
        current: &SnapshotSummary,
    ) -> ChangeReport {
        // Digest short-circuit: identical summaries skip the detailed diff
        if baseline.content_digest == current.content_digest
            && baseline.structure_digest == current.structure_digest
            && baseline.resource_urls == current.resource_urls
            && baseline.page_urls() == current.page_urls()
        {
            debug!(%target_id, "Snapshots identical by digest, skipping diff");
            return ChangeReport {
                baseline_snapshot_id,
                current_snapshot_id,
                target_id,
                dimensions: DimensionScores::default(),
                aggregate_score: 0.0,
                classification: ChangeClass::NoChange,
                requires_reanalysis: false,
                detail: ChangeDetail::default(),
            };
        }

        let dimensions = DimensionScores {
            content: self.content_distance(&baseline.combined_text(), &current.combined_text()),
            structure: self
                .structure_distance(&baseline.combined_skeleton(), &current.combined_skeleton()),
            resources: jaccard_distance(&baseline.resource_urls, &current.resource_urls),
            pages: jaccard_distance(&baseline.page_urls(), &current.page_urls()),
        };

        let aggregate_score = (self.weights.content * dimensions.content
            + self.weights.structure * dimensions.structure
            + self.weights.resources * dimensions.resources
            + self.weights.pages * dimensions.pages)
            .clamp(0.0, 1.0);

        // A single extreme dimension names the change even when the
        // weighted aggregate stays moderate
        let (dominant_dim, dominant_score) = dimensions.dominant();
        let classification = if dominant_score > self.dimension_override_threshold {
            ChangeClass::from_dimension(dominant_dim)
        } else {
            ChangeClass::from_aggregate(aggregate_score)
        };

        let baseline_pages = baseline.page_urls();
        let current_pages = current.page_urls();
        let detail = ChangeDetail {
            pages_added: set_minus(&current_pages, &baseline_pages),
            pages_removed: set_minus(&baseline_pages, &current_pages),
            resources_added: set_minus(&current.resource_urls, &baseline.resource_urls),
            resources_removed: set_minus(&baseline.resource_urls, &current.resource_urls),
        };

        ChangeReport {
            baseline_snapshot_id,
            current_snapshot_id,
            target_id,
            dimensions,
            aggregate_score,
            classification,
            requires_reanalysis: aggregate_score >= self.reanalysis_threshold,
            detail,
        }
    }

    /// 内容维度：截断后文本的归一化编辑距离
    fn content_distance(&self, a: &str, b: &str) -> f64 {
        let a = cap_chars(a, self.content_char_cap);
        let b = cap_chars(b, self.content_char_cap);
        if a.is_empty() && b.is_empty() {
            return 0.0;
        }
        1.0 - strsim::normalized_levenshtein(&a, &b)
    }

    /// 结构维度：骨架标记序列的归一化编辑距离
    fn structure_distance(&self, a: &[String], b: &[String]) -> f64 {
        let a: Vec<&str> = a
            .iter()
            .take(self.skeleton_token_cap)
            .map(String::as_str)
            .collect();
        let b: Vec<&str> = b
            .iter()
            .take(self.skeleton_token_cap)
            .map(String::as_str)
            .collect();
        let max_len = a.len().max(b.len());
        if max_len == 0 {
            return 0.0;
        }
        let distance = strsim::generic_levenshtein(&a, &b);
        distance as f64 / max_len as f64
    }
}

/// 集合的Jaccard距离（两侧皆空时为0）
fn jaccard_distance(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    1.0 - intersection as f64 / union as f64
}

fn set_minus(a: &BTreeSet<String>, b: &BTreeSet<String>) -> Vec<String> {
    a.difference(b).cloned().collect()
}

fn cap_chars(s: &str, cap: usize) -> String {
    s.chars().take(cap).collect()
}
