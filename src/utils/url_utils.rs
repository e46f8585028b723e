// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use url::{ParseError, Url};

/// 将可能为相对路径的URL转换为绝对路径URL
pub fn resolve_url(base_url: &Url, path: &str) -> Result<Url, ParseError> {
    base_url.join(path)
}

/// 规范化URL作为访问去重键
///
/// 去掉scheme、fragment、默认端口和结尾斜杠，
/// 同一页面的各种写法归并为一个键。http与https的
/// 同一路径也视为同一页面。
pub fn normalize_for_dedup(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    let port = match url.port() {
        Some(p) if Some(p) != default_port => format!(":{}", p),
        _ => String::new(),
    };

    // Url's parser already percent-normalizes the path
    let path = url.path().trim_end_matches('/');

    let query = match url.query() {
        Some(q) if !q.is_empty() => format!("?{}", q),
        _ => String::new(),
    };

    format!("{}{}{}{}", host, port, path, query)
}

/// 去掉host前缀的www.
pub fn strip_www(host: &str) -> &str {
    host.strip_prefix("www.").unwrap_or(host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_absolute_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "http://t.co/c").unwrap().as_str(),
            "http://t.co/c"
        );
    }

    #[test]
    fn test_resolve_root_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "/c").unwrap().as_str(),
            "http://example.com/c"
        );
    }

    #[test]
    fn test_resolve_relative_url() {
        let base = Url::parse("http://example.com/a/b").unwrap();
        assert_eq!(
            resolve_url(&base, "c").unwrap().as_str(),
            "http://example.com/a/c"
        );
    }

    #[test]
    fn test_dedup_key_ignores_fragment_and_default_port() {
        let a = Url::parse("https://Example.com:443/page#section").unwrap();
        let b = Url::parse("https://example.com/page").unwrap();
        assert_eq!(normalize_for_dedup(&a), normalize_for_dedup(&b));
        assert_eq!(normalize_for_dedup(&a), "example.com/page");
    }

    #[test]
    fn test_dedup_key_merges_schemes_and_trailing_slash() {
        let a = Url::parse("http://example.com/docs/").unwrap();
        let b = Url::parse("https://example.com/docs").unwrap();
        assert_eq!(normalize_for_dedup(&a), normalize_for_dedup(&b));
    }

    #[test]
    fn test_dedup_key_keeps_explicit_port_and_query() {
        let a = Url::parse("http://example.com:8080/page?b=2").unwrap();
        assert_eq!(normalize_for_dedup(&a), "example.com:8080/page?b=2");
    }

    #[test]
    fn test_strip_www() {
        assert_eq!(strip_www("www.example.com"), "example.com");
        assert_eq!(strip_www("example.com"), "example.com");
    }
}
