//! HTML 文档元数据处理模块
//!
//! - 获取 `<base href>`，用于解析文档内的相对引用
//! - 获取字符编码声明，用于在解析前正确解码文档字节

use markup5ever_rcdom::Handle;

use crate::core::parse_content_type;

use super::dom::{find_nodes, get_node_attr};

/// 获取文档的 base URL
///
/// 根据 HTML 规范，只有第一个带 `href` 的 `<base>` 标签有效，其余的将被忽略。
///
/// # 参数
///
/// * `handle` - HTML 文档的根节点句柄
///
/// # 返回值
///
/// * `Some(String)` - 未经解析的 `href` 属性值
/// * `None` - 没有找到带 `href` 的 base 标签
pub fn get_base_url(handle: &Handle) -> Option<String> {
    find_nodes(handle, vec!["base"])
        .iter()
        .find_map(|base_node| get_node_attr(base_node, "href"))
        .filter(|href| !href.trim().is_empty())
}

/// 获取文档字符编码
///
/// 从 HTML 文档的 meta 标签中提取字符编码信息。支持两种格式：
/// 1. HTML5 格式：`<meta charset="utf-8">`
/// 2. HTML4 格式：`<meta http-equiv="content-type" content="text/html; charset=utf-8">`
pub fn get_charset(node: &Handle) -> Option<String> {
    for meta_node in find_nodes(node, vec!["html", "head", "meta"]).iter() {
        if let Some(meta_charset_node_attr_value) = get_node_attr(meta_node, "charset") {
            return Some(meta_charset_node_attr_value);
        }

        if get_node_attr(meta_node, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type")
        {
            if let Some(meta_content_type_node_attr_value) = get_node_attr(meta_node, "content") {
                let (_media_type, charset, _is_base64) =
                    parse_content_type(&meta_content_type_node_attr_value);
                if !charset.is_empty() {
                    return Some(charset);
                }
            }
        }
    }

    None
}
