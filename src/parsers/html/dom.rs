use encoding_rs::Encoding;
use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::interface::Attribute;
use html5ever::{namespace_url, ns};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::error::CaptureResult;

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> CaptureResult<RcDom> {
    let s: String = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => {
            let (string, _, _) = encoding.decode(data);
            string.into_owned()
        }
        None => String::from_utf8_lossy(data).into_owned(),
    };

    let dom = parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())?;

    Ok(dom)
}

/// 将 HTML 片段解析为一组顶层节点
///
/// 片段以 `<body>` 为上下文解析，返回从临时文档上摘下的 body 子节点。
pub fn html_fragment_to_nodes(html: &str) -> CaptureResult<Vec<Handle>> {
    let dom = html_to_dom(format!("<body>{html}").as_bytes(), "utf-8")?;
    let Some(body) = find_nodes(&dom.document, vec!["html", "body"]).into_iter().next() else {
        return Ok(Vec::new());
    };

    // 临时文档析构时会清空仍挂在树上的子节点，必须先摘下
    let nodes = std::mem::take(&mut *body.children.borrow_mut());
    for node in &nodes {
        node.parent.set(None);
    }
    Ok(nodes)
}

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: Vec<&str>) -> Vec<Handle> {
    let mut found_nodes = Vec::new();
    let Some(&node_name) = node_names.first() else {
        return found_nodes;
    };

    if node_names.len() == 1 {
        if let NodeData::Element { ref name, .. } = node.data {
            if &*name.local == node_name {
                found_nodes.push(node.clone());
            }
        }

        for child_node in node.children.borrow().iter() {
            found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
        }
    } else if let NodeData::Element { ref name, .. } = node.data {
        if &*name.local == node_name {
            let mut new_node_names = node_names;
            new_node_names.remove(0);
            found_nodes.append(&mut find_nodes(node, new_node_names));
        } else {
            for child_node in node.children.borrow().iter() {
                found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
            }
        }
    } else {
        for child_node in node.children.borrow().iter() {
            found_nodes.append(&mut find_nodes(child_node, node_names.clone()));
        }
    }

    found_nodes
}

/// 按文档顺序收集所有元素节点（不含自身）
pub fn descendant_elements(node: &Handle) -> Vec<Handle> {
    let mut elements = Vec::new();
    collect_elements(node, &mut elements);
    elements
}

fn collect_elements(node: &Handle, elements: &mut Vec<Handle>) {
    for child in node.children.borrow().iter() {
        if matches!(child.data, NodeData::Element { .. }) {
            elements.push(child.clone());
        }
        collect_elements(child, elements);
    }
}

/// 获取节点属性值（按本地名匹配，`xlink:href` 也会匹配 `href`）
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => {
            for attr in attrs.borrow().iter() {
                if &*attr.name.local == attr_name {
                    return Some(attr.value.to_string());
                }
            }
            None
        }
        _ => None,
    }
}

pub fn has_node_attr(node: &Handle, attr_name: &str) -> bool {
    get_node_attr(node, attr_name).is_some()
}

/// 获取元素本地名（小写形式，外部命名空间保持原样）
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 判断节点是否为指定本地名的 HTML 元素
pub fn is_html_element(node: &Handle, local_name: &str) -> bool {
    match &node.data {
        NodeData::Element { name, .. } => name.ns == ns!(html) && &*name.local == local_name,
        _ => false,
    }
}

/// 判断节点是否为指定本地名的 SVG 元素
pub fn is_svg_element(node: &Handle, local_name: &str) -> bool {
    match &node.data {
        NodeData::Element { name, .. } => name.ns == ns!(svg) && &*name.local == local_name,
        _ => false,
    }
}

/// DOM 中的 `nodeName`
///
/// HTML 元素为大写标签名，SVG/MathML 等外部元素保持原有大小写，
/// 文档类型节点为其名称。
pub fn dom_node_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } => {
            let local: &str = &name.local;
            let qualified = match &name.prefix {
                Some(prefix) => format!("{}:{}", prefix, local),
                None => local.to_string(),
            };
            if name.ns == ns!(html) {
                Some(qualified.to_ascii_uppercase())
            } else {
                Some(qualified)
            }
        }
        NodeData::Doctype { name, .. } => Some(name.to_string()),
        _ => None,
    }
}

/// 属性的限定名（带前缀，如 `xlink:href`）
pub fn attr_qualified_name(attr: &Attribute) -> String {
    match &attr.name.prefix {
        Some(prefix) => format!("{}:{}", prefix, &*attr.name.local),
        None => attr.name.local.to_string(),
    }
}

/// 获取父节点
///
/// 父节点引用被临时取出后立即放回，不会破坏树结构。
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 拼接全部后代文本节点
pub fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    collect_text(node, &mut text);
    text
}

fn collect_text(node: &Handle, text: &mut String) {
    for child in node.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => text.push_str(&contents.borrow()),
            NodeData::Element { .. } => collect_text(child, text),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(html: &str) -> RcDom {
        html_to_dom(html.as_bytes(), "utf-8").unwrap()
    }

    #[test]
    fn test_find_nodes_by_path() {
        let dom = parse("<html><head><base href='/x/'></head><body><base href='/y/'></body></html>");
        let bases = find_nodes(&dom.document, vec!["html", "head", "base"]);
        assert_eq!(bases.len(), 1);
        assert_eq!(get_node_attr(&bases[0], "href").as_deref(), Some("/x/"));
    }

    #[test]
    fn test_dom_node_name_cases() {
        let dom = parse("<!DOCTYPE html><div><svg><foreignObject></foreignObject></svg></div>");
        let doctype = dom.document.children.borrow()[0].clone();
        assert_eq!(dom_node_name(&doctype).as_deref(), Some("html"));

        let div = find_nodes(&dom.document, vec!["div"]).remove(0);
        assert_eq!(dom_node_name(&div).as_deref(), Some("DIV"));

        let svg = find_nodes(&dom.document, vec!["svg"]).remove(0);
        assert_eq!(dom_node_name(&svg).as_deref(), Some("svg"));

        let foreign = find_nodes(&dom.document, vec!["foreignObject"]).remove(0);
        assert_eq!(dom_node_name(&foreign).as_deref(), Some("foreignObject"));
    }

    #[test]
    fn test_get_parent_node_keeps_link() {
        let dom = parse("<p><span>x</span></p>");
        let span = find_nodes(&dom.document, vec!["span"]).remove(0);
        let parent = get_parent_node(&span).unwrap();
        assert_eq!(get_node_name(&parent), Some("p"));
        // 第二次调用依旧可以拿到父节点
        assert!(get_parent_node(&span).is_some());
    }

    #[test]
    fn test_text_content() {
        let dom = parse("<textarea>a<b</textarea><p>one <b>two</b></p>");
        let p = find_nodes(&dom.document, vec!["p"]).remove(0);
        assert_eq!(text_content(&p), "one two");
        let textarea = find_nodes(&dom.document, vec!["textarea"]).remove(0);
        assert_eq!(text_content(&textarea), "a<b");
    }

    #[test]
    fn test_html_fragment_to_nodes() {
        let nodes = html_fragment_to_nodes("<span>a</span>text<i></i>").unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(get_node_name(&nodes[0]), Some("span"));
    }

    #[test]
    fn test_xlink_href_attr_name() {
        let dom = parse("<svg><use xlink:href='#a'></use></svg>");
        let use_node = find_nodes(&dom.document, vec!["use"]).remove(0);
        if let NodeData::Element { attrs, .. } = &use_node.data {
            assert_eq!(attr_qualified_name(&attrs.borrow()[0]), "xlink:href");
        }
        assert_eq!(get_node_attr(&use_node, "href").as_deref(), Some("#a"));
        assert!(is_svg_element(&use_node, "use"));
    }
}
