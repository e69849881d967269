//! JavaScript 相关处理
//!
//! 快照中不保留任何可执行内容：事件处理器属性的值被清空，
//! 但属性本身保留，以免影响依赖属性存在与否的样式选择器。

use std::sync::LazyLock;

use regex::Regex;

static EVENT_HANDLER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^on[a-z]+$").expect("valid event handler pattern"));

/// 检查属性名是否为事件处理器（`on` 后跟小写字母）
///
/// # 示例
/// ```rust
/// use dom_snapshot::parsers::js::attr_is_event_handler;
///
/// assert!(attr_is_event_handler("onclick"));
/// assert!(attr_is_event_handler("onwhatever"));
/// assert!(!attr_is_event_handler("on"));
/// assert!(!attr_is_event_handler("one-time"));
/// ```
pub fn attr_is_event_handler(attr_name: &str) -> bool {
    EVENT_HANDLER_RE.is_match(attr_name)
}

/// 对属性值做快照所需的清理
///
/// 事件处理器的值被清空，`blob:` 前缀被去除。
pub fn sanitize_attr_value(attr_name: &str, value: &str) -> String {
    if attr_is_event_handler(attr_name) {
        String::new()
    } else {
        crate::utils::strip_blob_scheme(value).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_is_event_handler() {
        assert!(attr_is_event_handler("onload"));
        assert!(attr_is_event_handler("onmouseover"));
        assert!(!attr_is_event_handler("class"));
        assert!(!attr_is_event_handler("on-click"));
        assert!(!attr_is_event_handler("data-onclick"));
    }

    #[test]
    fn test_sanitize_attr_value() {
        assert_eq!(sanitize_attr_value("onclick", "alert(1)"), "");
        assert_eq!(
            sanitize_attr_value("src", "blob:https://example.com/42"),
            "https://example.com/42"
        );
        assert_eq!(sanitize_attr_value("href", "/a.css"), "/a.css");
    }
}
