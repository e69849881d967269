//! URL 规范化工具
//!
//! 资源引用在进入缓存或快照之前都要经过同一条规范化流程：
//! CSS 转义解码 → 绝对化（同时完成百分号编码）→ 去除锚点。
//! 这样同一资源的不同写法会折叠为同一个缓存键。

use std::sync::LazyLock;

use base64::{prelude::BASE64_STANDARD, Engine};
use percent_encoding::percent_decode_str;
use regex::Regex;
pub use url::Url;

/// 透明的 1x1 PNG 图片
pub const EMPTY_IMAGE_DATA_URL: &str = "data:image/png;base64,\
iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

const BLOB_SCHEME_PREFIX: &str = "blob:";

/// 可以被抓取并转换为 blob 的协议
const FETCHABLE_SCHEMES: &[&str] = &["blob", "http", "https", "file"];

static CSS_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[0-9a-fA-F]{1,6}\s?").expect("valid css escape pattern"));

/// 将 `to` 相对于 `from` 解析为绝对 URL
pub fn resolve_url(from: &Url, to: &str) -> Option<Url> {
    match Url::parse(to) {
        Ok(parsed) => Some(parsed),
        Err(_) => from.join(to).ok(),
    }
}

/// 相对于 `base` 绝对化 URL，无法解析时返回 `None`
pub fn absolutize_url(url: &str, base: &str) -> Option<String> {
    match Url::parse(base) {
        Ok(base_url) => resolve_url(&base_url, url).map(String::from),
        Err(_) => Url::parse(url).ok().map(String::from),
    }
}

/// 将 CSS 十六进制转义（如 `\26 `）还原为字符
pub fn to_uri_encoding(url: &str) -> String {
    CSS_ESCAPE_RE
        .replace_all(url, |caps: &regex::Captures| {
            let code = caps[0][1..].trim();
            u32::from_str_radix(code, 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// 去除 URL 中的锚点以及末尾空查询串
pub fn to_unanchored_uri(url: &str) -> String {
    let without_fragment = match url.find('#') {
        Some(0) | None => url,
        Some(pos) => &url[..pos],
    };
    let trimmed = without_fragment.trim_end();
    let result = trimmed.strip_suffix('?').unwrap_or(without_fragment);

    if result.is_empty() {
        url.to_string()
    } else {
        result.to_string()
    }
}

/// 检查 URL 是否可以被抓取（`data:` 等内联 URL 不需要抓取）
pub fn is_fetchable_url(url: &str) -> bool {
    match url.split_once(':') {
        Some((scheme, _)) => FETCHABLE_SCHEMES
            .iter()
            .any(|s| scheme.eq_ignore_ascii_case(s)),
        None => false,
    }
}

/// 去除 `blob:` 前缀
pub fn strip_blob_scheme(url: &str) -> &str {
    url.strip_prefix(BLOB_SCHEME_PREFIX).unwrap_or(url)
}

pub fn is_blob_url(url: &str) -> bool {
    url.starts_with(BLOB_SCHEME_PREFIX)
}

/// 完整的资源 URL 规范化流程
///
/// 返回 `None` 表示该引用无法绝对化或者不需要抓取（例如 `data:` URL）。
pub fn normalize_resource_url(raw: &str, base: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let absolute = absolutize_url(&to_uri_encoding(raw), base)?;
    let unanchored = to_unanchored_uri(&absolute);

    if is_fetchable_url(&unanchored) {
        Some(unanchored)
    } else {
        None
    }
}

/// 解析 data URL，返回 (媒体类型, 字符集, 数据)
pub fn parse_data_url(url: &Url) -> (String, String, Vec<u8>) {
    let path: String = url.path().to_string();
    let comma_loc: usize = path.find(',').unwrap_or(path.len());

    let meta_data: String = path.chars().take(comma_loc).collect();
    let raw_data: String = path.chars().skip(comma_loc + 1).collect();
    let raw_data = match url.query() {
        Some(query) => format!("{raw_data}?{query}"),
        None => raw_data,
    };

    let mut media_type = String::new();
    let mut charset = String::new();
    let mut is_base64 = false;

    for (i, part) in meta_data.split(';').enumerate() {
        let part = part.trim();
        if i == 0 {
            media_type = part.to_lowercase();
        } else if let Some(value) = part.strip_prefix("charset=") {
            charset = value.trim_matches('"').to_string();
        } else if part.eq_ignore_ascii_case("base64") {
            is_base64 = true;
        }
    }

    if media_type.is_empty() {
        media_type = "text/plain".to_string();
    }

    let data: Vec<u8> = if is_base64 {
        let compact: String = percent_decode_str(&raw_data)
            .decode_utf8_lossy()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        BASE64_STANDARD.decode(compact).unwrap_or_default()
    } else {
        percent_decode_str(&raw_data).collect()
    };

    (media_type, charset, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolutize_relative_url() {
        assert_eq!(
            absolutize_url("img/a.png", "https://example.com/dir/page.html").as_deref(),
            Some("https://example.com/dir/img/a.png")
        );
    }

    #[test]
    fn test_absolutize_percent_encodes() {
        assert_eq!(
            absolutize_url("a b.png", "https://example.com/").as_deref(),
            Some("https://example.com/a%20b.png")
        );
    }

    #[test]
    fn test_to_uri_encoding_decodes_css_escapes() {
        assert_eq!(to_uri_encoding(r"a\26 b.png"), "a&b.png");
        assert_eq!(to_uri_encoding("plain.png"), "plain.png");
    }

    #[test]
    fn test_to_unanchored_uri() {
        assert_eq!(
            to_unanchored_uri("https://example.com/a.svg#icon"),
            "https://example.com/a.svg"
        );
        assert_eq!(
            to_unanchored_uri("https://example.com/a.css?"),
            "https://example.com/a.css"
        );
        assert_eq!(to_unanchored_uri("#only"), "#only");
    }

    #[test]
    fn test_is_fetchable_url() {
        assert!(is_fetchable_url("https://example.com/a.png"));
        assert!(is_fetchable_url("blob:https://example.com/123"));
        assert!(!is_fetchable_url("data:image/png;base64,AAAA"));
        assert!(!is_fetchable_url("about:blank"));
    }

    #[test]
    fn test_normalize_resource_url_collapses_variants() {
        let base = "https://example.com/dir/";
        let a = normalize_resource_url("../a.png#x", base);
        let b = normalize_resource_url("https://example.com/a.png", base);
        assert_eq!(a, b);
        assert_eq!(normalize_resource_url("data:,x", base), None);
        assert_eq!(normalize_resource_url("   ", base), None);
    }

    #[test]
    fn test_strip_blob_scheme() {
        assert_eq!(
            strip_blob_scheme("blob:https://example.com/1"),
            "https://example.com/1"
        );
        assert_eq!(strip_blob_scheme("https://example.com/1"), "https://example.com/1");
    }

    #[test]
    fn test_parse_data_url_base64() {
        let url = Url::parse("data:text/css;charset=utf-8;base64,Ym9keXt9").unwrap();
        let (media_type, charset, data) = parse_data_url(&url);
        assert_eq!(media_type, "text/css");
        assert_eq!(charset, "utf-8");
        assert_eq!(data, b"body{}");
    }

    #[test]
    fn test_parse_data_url_plain() {
        let url = Url::parse("data:,Hello%2C%20World").unwrap();
        let (media_type, _, data) = parse_data_url(&url);
        assert_eq!(media_type, "text/plain");
        assert_eq!(data, b"Hello, World");
    }
}
