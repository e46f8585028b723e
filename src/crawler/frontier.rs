// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{HashSet, VecDeque};
use url::Url;

use crate::utils::url_utils::normalize_for_dedup;

/// 广度优先爬取前沿
///
/// 去重键是规范化URL：同一页面的不同写法只入队一次。
/// 深度随链接跳数增加，由调用方在入队时给出。
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<(Url, u32)>,
    visited: HashSet<String>,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尝试入队一个URL
    ///
    /// # 返回值
    ///
    /// 入队成功返回true；重复URL返回false
    pub fn push(&mut self, url: Url, depth: u32) -> bool {
        let key = normalize_for_dedup(&url);
        if !self.visited.insert(key) {
            return false;
        }
        self.queue.push_back((url, depth));
        true
    }

    /// 取出下一个待抓取的URL（广度优先）
    pub fn pop(&mut self) -> Option<(Url, u32)> {
        self.queue.pop_front()
    }

    /// 标记URL为已访问而不入队（重定向落点去重）
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(normalize_for_dedup(url))
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
