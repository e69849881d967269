//! HTML 属性解析
//!
//! 解析 `<link>` 的 `rel` 属性以及 `<img>`/`<source>` 的 `srcset` 属性，
//! 供资源链接提取使用。
//!
//! ## 使用示例
//!
//! ```rust
//! use dom_snapshot::parsers::html::parser::{parse_link_type, parse_srcset, LinkType};
//!
//! let link_types = parse_link_type("stylesheet preload");
//! assert_eq!(link_types, vec![LinkType::Stylesheet, LinkType::Preload]);
//!
//! let srcset_items = parse_srcset("small.jpg 480w, large.jpg 800w");
//! assert_eq!(srcset_items.len(), 2);
//! ```

/// ASCII 空白字符
pub const WHITESPACES: &[char] = &[' ', '\t', '\n', '\x0c', '\r'];

/// HTML链接类型枚举
#[derive(Debug, PartialEq, Eq)]
pub enum LinkType {
    /// 预加载资源
    Preload,
    /// CSS样式表
    Stylesheet,
}

/// SrcSet 属性项目结构
#[derive(Debug, PartialEq, Eq)]
pub struct SrcSetItem<'a> {
    /// 图片文件的路径或URL
    pub path: &'a str,
    /// 宽度描述符（如 "480w"）或像素密度描述符（如 "2x"），可能为空
    pub descriptor: &'a str,
}

/// 解析HTML链接的rel属性值
///
/// 支持多个空格分隔的rel值，并且不区分大小写，不关心的值会被忽略。
pub fn parse_link_type(link_attr_rel_value: &str) -> Vec<LinkType> {
    let mut types: Vec<LinkType> = vec![];

    for link_attr_rel_type in link_attr_rel_value.split(WHITESPACES) {
        if link_attr_rel_type.eq_ignore_ascii_case("preload") {
            types.push(LinkType::Preload);
        } else if link_attr_rel_type.eq_ignore_ascii_case("stylesheet") {
            types.push(LinkType::Stylesheet);
        }
    }

    types
}

/// 解析HTML图片的srcset属性
///
/// 每一项由 URL 和可选描述符组成，项之间以逗号分隔。URL 本身可以包含逗号
/// （例如 data URL），只有 URL 末尾的逗号才会被当作分隔符。
///
/// ## 使用示例
///
/// ```rust
/// # use dom_snapshot::parsers::html::parser::parse_srcset;
/// let items = parse_srcset("normal.jpg 1x, retina.jpg 2x");
/// assert_eq!(items[1].path, "retina.jpg");
/// assert_eq!(items[1].descriptor, "2x");
/// ```
pub fn parse_srcset(srcset: &str) -> Vec<SrcSetItem> {
    let mut srcset_items: Vec<SrcSetItem> = vec![];
    let mut rest = srcset;

    loop {
        // 跳过前导空白和逗号
        rest = rest.trim_start_matches(|c: char| WHITESPACES.contains(&c) || c == ',');
        if rest.is_empty() {
            break;
        }

        let url_end = rest.find(WHITESPACES).unwrap_or(rest.len());
        let raw_path = &rest[..url_end];
        rest = &rest[url_end..];

        if raw_path.ends_with(',') {
            srcset_items.push(SrcSetItem {
                path: raw_path.trim_end_matches(','),
                descriptor: "",
            });
            continue;
        }

        // 描述符一直延续到下一个不在括号内的逗号
        let mut depth = 0usize;
        let mut descriptor_end = rest.len();
        for (i, c) in rest.char_indices() {
            match c {
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    descriptor_end = i;
                    break;
                }
                _ => {}
            }
        }

        srcset_items.push(SrcSetItem {
            path: raw_path,
            descriptor: rest[..descriptor_end].trim_matches(WHITESPACES),
        });
        rest = &rest[descriptor_end..];
    }

    srcset_items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link_type() {
        assert_eq!(parse_link_type("STYLESHEET"), vec![LinkType::Stylesheet]);
        assert_eq!(parse_link_type("alternate stylesheet"), vec![LinkType::Stylesheet]);
        assert!(parse_link_type("icon").is_empty());
    }

    #[test]
    fn test_parse_srcset_descriptors() {
        let items = parse_srcset("small.jpg 480w,\n large.jpg   800w");
        assert_eq!(
            items,
            vec![
                SrcSetItem { path: "small.jpg", descriptor: "480w" },
                SrcSetItem { path: "large.jpg", descriptor: "800w" },
            ]
        );
    }

    #[test]
    fn test_parse_srcset_without_descriptors() {
        let items = parse_srcset("a.png, b.png 2x, c.png");
        let paths: Vec<&str> = items.iter().map(|item| item.path).collect();
        assert_eq!(paths, vec!["a.png", "b.png", "c.png"]);
        assert_eq!(items[0].descriptor, "");
    }

    #[test]
    fn test_parse_srcset_data_url_with_comma() {
        let items = parse_srcset("data:image/png;base64,AAAA 1x, b.png 2x");
        assert_eq!(items[0].path, "data:image/png;base64,AAAA");
        assert_eq!(items[1].path, "b.png");
    }
}
