// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::Url;

use crate::utils::url_utils::strip_www;

/// 计算URL的SURT排序键
///
/// host小写并去掉`www.`，标签反转后用逗号连接，
/// 然后是`)` + 路径（+ `?查询`）。同一站点的所有页面
/// 在排序后聚成连续区段，子域紧跟父域。
///
/// # 参数
///
/// * `url` - 已解析的URL
///
/// # 返回值
///
/// SURT键，如 `com,example)/news?page=2`
pub fn surt_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = strip_www(&host);

    let reversed: Vec<&str> = host.split('.').rev().collect();
    let mut key = reversed.join(",");
    key.push(')');

    key.push_str(&url.path().to_lowercase());

    if let Some(query) = url.query() {
        if !query.is_empty() {
            key.push('?');
            key.push_str(&query.to_lowercase());
        }
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> String {
        surt_key(&Url::parse(s).unwrap())
    }

    #[test]
    fn test_basic_key() {
        assert_eq!(key("https://example.com/news"), "com,example)/news");
    }

    #[test]
    fn test_www_and_case_folding() {
        assert_eq!(
            key("https://WWW.Example.COM/About"),
            key("http://example.com/about")
        );
    }

    #[test]
    fn test_query_preserved() {
        assert_eq!(
            key("https://example.com/news?page=2"),
            "com,example)/news?page=2"
        );
    }

    #[test]
    fn test_subdomain_sorts_with_parent() {
        let parent = key("https://example.com/");
        let sub = key("https://blog.example.com/");
        assert!(sub.starts_with("com,example,blog)"));
        assert!(parent < sub);
    }
}
