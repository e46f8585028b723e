// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 变化维度得分
///
/// 四个相互独立、归一化到[0,1]的维度距离：
/// 0表示完全相同，1表示完全不同。所有维度都是确定性且对称的。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    /// 内容维度：抽取文本的相似度距离
    pub content: f64,
    /// 结构维度：标记骨架的编辑距离（忽略文本）
    pub structure: f64,
    /// 资源集维度：嵌入资源URL集合的对称差
    pub resources: f64,
    /// 页面集维度：捕获页面URL集合的对称差
    pub pages: f64,
}

impl DimensionScores {
    /// 最大的单维度得分及其所属维度
    pub fn dominant(&self) -> (Dimension, f64) {
        let mut best = (Dimension::Content, self.content);
        for (dim, score) in [
            (Dimension::Structure, self.structure),
            (Dimension::Resources, self.resources),
            (Dimension::Pages, self.pages),
        ] {
            if score > best.1 {
                best = (dim, score);
            }
        }
        best
    }
}

/// 变化维度枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Content,
    Structure,
    Resources,
    Pages,
}

/// 变化分类标签
///
/// 聚合得分的分级标签，外加四个维度专属标签。
/// 当任一单维度超过覆盖阈值时，维度专属标签优先于聚合分级
/// （例如纯资源管线变更即使聚合得分中等也会胜出）。
/// 维度专属标签的严重程度至少等同于Significant。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChangeClass {
    /// 无变化（聚合得分为0）
    #[default]
    NoChange,
    /// 微不足道的变化 (0, 0.1]
    Trivial,
    /// 次要变化 (0.1, 0.3]
    Minor,
    /// 显著变化 (0.3, 0.7]
    Significant,
    /// 大规模改版 (0.7, 1.0]
    MajorRedesign,
    /// 维度覆盖：内容被重写
    ContentRewritten,
    /// 维度覆盖：结构被重构
    StructureChanged,
    /// 维度覆盖：资源集被更换
    ResourcesChanged,
    /// 维度覆盖：页面集被更换
    PageSetChanged,
}

impl ChangeClass {
    /// 根据聚合得分计算分级标签
    ///
    /// 分级区间：0 → NoChange；(0,0.1] → Trivial；(0.1,0.3] → Minor；
    /// (0.3,0.7] → Significant；(0.7,1.0] → MajorRedesign
    pub fn from_aggregate(score: f64) -> Self {
        if score <= 0.0 {
            ChangeClass::NoChange
        } else if score <= 0.1 {
            ChangeClass::Trivial
        } else if score <= 0.3 {
            ChangeClass::Minor
        } else if score <= 0.7 {
            ChangeClass::Significant
        } else {
            ChangeClass::MajorRedesign
        }
    }

    /// 维度对应的覆盖标签
    pub fn from_dimension(dim: Dimension) -> Self {
        match dim {
            Dimension::Content => ChangeClass::ContentRewritten,
            Dimension::Structure => ChangeClass::StructureChanged,
            Dimension::Resources => ChangeClass::ResourcesChanged,
            Dimension::Pages => ChangeClass::PageSetChanged,
        }
    }

    /// 分类是否达到"显著"及以上
    ///
    /// 维度覆盖标签始终视为显著。
    pub fn is_significant(&self) -> bool {
        !matches!(
            self,
            ChangeClass::NoChange | ChangeClass::Trivial | ChangeClass::Minor
        )
    }
}

impl fmt::Display for ChangeClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ChangeClass::NoChange => "no_change",
            ChangeClass::Trivial => "trivial",
            ChangeClass::Minor => "minor",
            ChangeClass::Significant => "significant",
            ChangeClass::MajorRedesign => "major_redesign",
            ChangeClass::ContentRewritten => "content_rewritten",
            ChangeClass::StructureChanged => "structure_changed",
            ChangeClass::ResourcesChanged => "resources_changed",
            ChangeClass::PageSetChanged => "page_set_changed",
        };
        write!(f, "{}", s)
    }
}

/// 变化明细
///
/// 两个快照之间新增/移除的页面与资源URL列表。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub pages_added: Vec<String>,
    pub pages_removed: Vec<String>,
    pub resources_added: Vec<String>,
    pub resources_removed: Vec<String>,
}

/// 变化报告
///
/// 变化检测器的输出。检测器只标记是否需要重新分析，
/// 从不自行触发重新分析。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeReport {
    /// 基线快照ID
    pub baseline_snapshot_id: Uuid,
    /// 当前快照ID
    pub current_snapshot_id: Uuid,
    /// 所属目标ID
    pub target_id: Uuid,
    /// 四个维度得分
    pub dimensions: DimensionScores,
    /// 加权聚合得分
    pub aggregate_score: f64,
    /// 分类标签
    pub classification: ChangeClass,
    /// 是否需要下游重新分析
    pub requires_reanalysis: bool,
    /// 变化明细
    pub detail: ChangeDetail,
}

impl ChangeReport {
    /// 格式化为人类可读的报告文本
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(&"=".repeat(60));
        out.push('\n');
        out.push_str("SNAPSHOT CHANGE REPORT\n");
        out.push_str(&"=".repeat(60));
        out.push('\n');
        out.push_str(&format!("Aggregate Score: {:.1}%\n", self.aggregate_score * 100.0));
        out.push_str(&format!("Classification: {}\n", self.classification));
        out.push_str(&format!(
            "Requires Reanalysis: {}\n",
            if self.requires_reanalysis { "Yes" } else { "No" }
        ));
        out.push('\n');
        out.push_str("DIMENSIONS:\n");
        out.push_str(&format!("  Content:   {:.3}\n", self.dimensions.content));
        out.push_str(&format!("  Structure: {:.3}\n", self.dimensions.structure));
        out.push_str(&format!("  Resources: {:.3}\n", self.dimensions.resources));
        out.push_str(&format!("  Pages:     {:.3}\n", self.dimensions.pages));
        out.push('\n');
        out.push_str(&format!(
            "Pages: +{} -{}  Resources: +{} -{}\n",
            self.detail.pages_added.len(),
            self.detail.pages_removed.len(),
            self.detail.resources_added.len(),
            self.detail.resources_removed.len()
        ));
        out.push_str(&"=".repeat(60));
        out
    }
}
