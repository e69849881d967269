//! 资源链接提取
//!
//! 从文档树、`<style>` 样式表、CDT 中的 `style=""` 属性以及 SVG 文本中
//! 收集资源引用。这里返回的都是原始引用，规范化与去重由聚合阶段完成。

use markup5ever_rcdom::Handle;

use crate::document::{Document, FrameKind};
use crate::error::CaptureResult;
use crate::parsers::css::extract_css_urls;
use crate::snapshot::types::CaptureNode;

use super::dom::{descendant_elements, get_node_attr, get_node_name, html_to_dom, is_svg_element, text_content};
use super::parser::{parse_link_type, parse_srcset, LinkType};

/// 收集元素属性中的资源引用（按文档顺序）
///
/// # 参数
///
/// * `root` - 文档根节点或 shadow root
///
/// # 返回值
///
/// 未经处理的引用列表，可能包含相对地址、片段引用和重复项
pub fn extract_links(root: &Handle) -> Vec<String> {
    let mut links = Vec::new();

    for element in descendant_elements(root) {
        let Some(name) = get_node_name(&element) else {
            continue;
        };

        match name {
            "img" | "source" => {
                if let Some(srcset) = get_node_attr(&element, "srcset") {
                    links.extend(parse_srcset(&srcset).iter().map(|item| item.path.to_string()));
                }
                push_attr(&mut links, &element, "src");
            }
            "input" => {
                let is_image = get_node_attr(&element, "type")
                    .map(|t| t.trim().eq_ignore_ascii_case("image"))
                    .unwrap_or(false);
                if is_image {
                    push_attr(&mut links, &element, "src");
                }
            }
            "audio" => push_attr(&mut links, &element, "src"),
            "video" => {
                push_attr(&mut links, &element, "src");
                push_attr(&mut links, &element, "poster");
            }
            "image" | "use" if is_svg_element(&element, name) => {
                if let Some(href) = get_node_attr(&element, "href") {
                    if !href.trim_start().starts_with('#') {
                        links.push(href);
                    }
                }
            }
            "object" => push_attr(&mut links, &element, "data"),
            "link" => {
                let is_stylesheet = get_node_attr(&element, "rel")
                    .map(|rel| parse_link_type(&rel).contains(&LinkType::Stylesheet))
                    .unwrap_or(false)
                    || get_node_attr(&element, "as")
                        .map(|value| value.trim().eq_ignore_ascii_case("stylesheet"))
                        .unwrap_or(false);
                if is_stylesheet {
                    push_attr(&mut links, &element, "href");
                }
            }
            _ => {}
        }
    }

    links
}

fn push_attr(links: &mut Vec<String>, element: &Handle, attr_name: &str) {
    if let Some(value) = get_node_attr(element, attr_name) {
        if !value.trim().is_empty() {
            links.push(value);
        }
    }
}

/// 收集 `<style>` 样式表中的资源引用
pub fn extract_style_tag_urls(document: &Document, root: &Handle) -> Vec<String> {
    descendant_elements(root)
        .iter()
        .filter(|element| get_node_name(element) == Some("style"))
        .flat_map(|style| extract_css_urls(&document.css_rules(style)))
        .collect()
}

/// 收集 CDT 中 `style=""` 属性里的资源引用
pub fn extract_style_attr_urls(cdt: &[CaptureNode]) -> Vec<String> {
    cdt.iter()
        .filter_map(|node| node.attribute("style"))
        .filter_map(|attr| attr.value.as_deref())
        .flat_map(extract_css_urls)
        .collect()
}

/// 找出所有真实的嵌套框架（按文档根顺序，各根内按文档顺序）
pub fn extract_frames(document: &Document, doc_roots: &[Handle]) -> Vec<Handle> {
    doc_roots
        .iter()
        .flat_map(descendant_elements)
        .filter(|element| matches!(get_node_name(element), Some("iframe") | Some("frame")))
        .filter(|frame| document.frame_kind(frame) == FrameKind::Nested)
        .collect()
}

/// 收集 SVG 文档引用的资源：`<image>`/`<use>` 的链接以及内部 `<style>` 的 URL
pub fn extract_svg_resource_urls(svg_text: &str) -> CaptureResult<Vec<String>> {
    let dom = html_to_dom(svg_text.as_bytes(), "utf-8")?;
    let mut urls = Vec::new();

    for element in descendant_elements(&dom.document) {
        if is_svg_element(&element, "image") || is_svg_element(&element, "use") {
            if let Some(href) = get_node_attr(&element, "href") {
                if !href.trim_start().starts_with('#') && !href.trim().is_empty() {
                    urls.push(href);
                }
            }
        } else if get_node_name(&element) == Some("style") {
            urls.extend(extract_css_urls(&text_content(&element)));
        }
    }

    Ok(urls)
}
