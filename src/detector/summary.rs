// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use scraper::{Html, Selector};
use std::collections::{BTreeMap, BTreeSet};
use url::Url;

use crate::archive::reader::ContainerReader;
use crate::archive::record::{sha256_hex, ArchiveError, RecordKind};
use crate::utils::url_utils::resolve_url;

/// 单页摘要
#[derive(Debug, Clone)]
pub struct PageSummary {
    /// 页面URL
    pub url: String,
    /// 抽取的可见文本
    pub text: String,
    /// 标记骨架（文档序的 tag#id.classes 标记）
    pub skeleton: Vec<String>,
}

/// 快照摘要
///
/// 变化检测的输入：从容器提取的文本、骨架和URL集合。
/// 提取是确定性的，同一容器字节永远得到同一摘要。
#[derive(Debug, Clone, Default)]
pub struct SnapshotSummary {
    /// 按URL排序的页面摘要
    pub pages: BTreeMap<String, PageSummary>,
    /// 嵌入资源URL集合
    pub resource_urls: BTreeSet<String>,
    /// 全部页面文本的摘要
    pub content_digest: String,
    /// 全部页面骨架的摘要
    pub structure_digest: String,
}

impl SnapshotSummary {
    /// 从容器构建快照摘要
    ///
    /// HTML响应记录解析为页面；其余响应记录归入资源集合。
    /// 页面内引用的子资源URL（img/script/link等）也并入资源集合。
    pub fn from_container(reader: &ContainerReader) -> Result<Self, ArchiveError> {
        let mut summary = SnapshotSummary::default();

        for record in reader.records()? {
            if record.meta.kind != RecordKind::Response {
                continue;
            }

            let is_html = record
                .meta
                .content_type
                .split(';')
                .next()
                .map(|t| t.trim().eq_ignore_ascii_case("text/html"))
                .unwrap_or(false);

            if !is_html {
                summary.resource_urls.insert(record.meta.url.clone());
                continue;
            }

            let html = String::from_utf8_lossy(&record.body);
            let page = extract_page(&record.meta.url, &html);

            let base = Url::parse(&record.meta.final_url)
                .or_else(|_| Url::parse(&record.meta.url))
                .ok();
            if let Some(base) = base {
                for raw in extract_resource_refs(&html) {
                    if let Ok(abs) = resolve_url(&base, &raw) {
                        summary.resource_urls.insert(abs.to_string());
                    }
                }
            }

            summary.pages.insert(page.url.clone(), page);
        }

        summary.finalize();
        Ok(summary)
    }

    /// 计算内容与结构摘要
    ///
    /// 页面按URL排序后拼接，顺序与抓取顺序无关。
    fn finalize(&mut self) {
        let mut text = String::new();
        let mut skeleton = String::new();
        for page in self.pages.values() {
            text.push_str(&page.text);
            text.push('\n');
            for token in &page.skeleton {
                skeleton.push_str(token);
                skeleton.push(' ');
            }
        }
        self.content_digest = sha256_hex(text.as_bytes());
        self.structure_digest = sha256_hex(skeleton.as_bytes());
    }

    /// 页面URL集合
    pub fn page_urls(&self) -> BTreeSet<String> {
        self.pages.keys().cloned().collect()
    }

    /// 全部页面文本，按URL序拼接
    pub fn combined_text(&self) -> String {
        let mut out = String::new();
        for page in self.pages.values() {
            out.push_str(&page.text);
            out.push('\n');
        }
        out
    }

    /// 全部页面骨架标记，按URL序拼接
    pub fn combined_skeleton(&self) -> Vec<String> {
        self.pages
            .values()
            .flat_map(|p| p.skeleton.iter().cloned())
            .collect()
    }
}

/// 从HTML提取单页摘要
pub fn extract_page(url: &str, html: &str) -> PageSummary {
    let document = Html::parse_document(html);

    // Whitespace-collapsed visible text
    let text = document
        .root_element()
        .text()
        .flat_map(|t| t.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ");

    // Document-order element skeleton, text ignored
    let mut skeleton = Vec::new();
    for element in document.root_element().descendent_elements() {
        let value = element.value();
        let mut token = value.name().to_lowercase();
        if let Some(id) = value.id() {
            token.push('#');
            token.push_str(id);
        }
        for class in value.classes() {
            token.push('.');
            token.push_str(class);
        }
        skeleton.push(token);
    }

    PageSummary {
        url: url.to_string(),
        text,
        skeleton,
    }
}

/// 提取页面引用的子资源URL（原始属性值）
pub fn extract_resource_refs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut refs = Vec::new();

    for (selector, attr) in [
        ("img[src]", "src"),
        ("script[src]", "src"),
        ("link[rel=stylesheet][href]", "href"),
        ("link[rel=icon][href]", "href"),
        ("source[src]", "src"),
        ("iframe[src]", "src"),
    ] {
        let selector = match Selector::parse(selector) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for element in document.select(&selector) {
            if let Some(value) = element.value().attr(attr) {
                let value = value.trim();
                if !value.is_empty() && !value.starts_with("data:") {
                    refs.push(value.to_string());
                }
            }
        }
    }

    refs
}
