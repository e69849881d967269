//! DOM 到扁平树（CDT）的序列化
//!
//! 深度优先遍历文档，每个节点在递归进入子节点之前先占用自己的下标，
//! 因此子节点下标总是大于父节点。遍历过程中同时收集 shadow root、
//! 画布和内联框架，并为后两者生成合成 URL。
//!
//! 子树序列化失败（超出深度等）在父节点处被捕获并记录，该子节点被省略，
//! 已经写入的部分条目会被回滚。文档根节点的失败向上传播。

use std::cell::Cell;

use html5ever::{namespace_url, ns};
use markup5ever_rcdom::{Handle, NodeData};
use tracing::warn;

use crate::core::CaptureLog;
use crate::document::{option_value, Document, FrameKind};
use crate::error::{CaptureError, CaptureResult};
use crate::parsers::css::serialize_css_rules;
use crate::parsers::js::sanitize_attr_value;
use crate::snapshot::types::{
    Attribute, CanvasReference, CaptureNode, InlineFrameReference,
};
use crate::utils::absolutize_url;

use super::dom::{
    attr_qualified_name, dom_node_name, get_node_attr, get_parent_node, is_html_element, text_content,
};

/// 值得与运行时值同步的文本类输入框类型
const TEXT_LIKE_INPUT_TYPES: &[&str] = &[
    "date",
    "datetime-local",
    "email",
    "month",
    "number",
    "password",
    "search",
    "tel",
    "text",
    "time",
    "url",
    "week",
];

/// 浏览器认可的 `type` 取值，其余一律按 `text` 处理
const KNOWN_INPUT_TYPES: &[&str] = &[
    "button",
    "checkbox",
    "color",
    "date",
    "datetime-local",
    "email",
    "file",
    "hidden",
    "image",
    "month",
    "number",
    "password",
    "radio",
    "range",
    "reset",
    "search",
    "submit",
    "tel",
    "text",
    "time",
    "url",
    "week",
];

/// 标记画布与内联框架的属性
pub const SYNTHETIC_SRC_ATTR: &str = "data-applitools-src";
const DISABLED_STYLE_ATTR: &str = "data-applitools-disabled";

/// 一次抓取内共享的合成 id 计数器
#[derive(Debug, Default)]
pub struct SyntheticIds(Cell<usize>);

impl SyntheticIds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> usize {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }
}

/// 序列化结果
#[derive(Debug)]
pub struct CdtResult {
    pub cdt: Vec<CaptureNode>,
    /// 文档根节点以及遇到的每个 shadow root
    pub doc_roots: Vec<Handle>,
    pub canvas_elements: Vec<CanvasReference>,
    pub inline_frames: Vec<InlineFrameReference>,
}

#[derive(Clone, Copy)]
struct Checkpoint {
    cdt: usize,
    doc_roots: usize,
    canvas_elements: usize,
    inline_frames: usize,
}

/// CDT 构建上下文
pub struct CdtBuilder<'a> {
    document: &'a Document,
    base_url: &'a str,
    ids: &'a SyntheticIds,
    log: CaptureLog,
    max_depth: usize,
    cdt: Vec<CaptureNode>,
    doc_roots: Vec<Handle>,
    canvas_elements: Vec<CanvasReference>,
    inline_frames: Vec<InlineFrameReference>,
}

impl<'a> CdtBuilder<'a> {
    pub fn new(
        document: &'a Document,
        base_url: &'a str,
        ids: &'a SyntheticIds,
        log: CaptureLog,
        max_depth: usize,
    ) -> Self {
        Self {
            document,
            base_url,
            ids,
            log,
            max_depth,
            cdt: Vec::new(),
            doc_roots: Vec::new(),
            canvas_elements: Vec::new(),
            inline_frames: Vec::new(),
        }
    }

    /// 序列化整个文档，下标 0 为文档节点
    pub fn build(mut self) -> CaptureResult<CdtResult> {
        let root = self.document.root();
        if !matches!(root.data, NodeData::Document) {
            return Err(CaptureError::NotADocument);
        }

        self.doc_roots.push(root.clone());
        self.serialize_node(&root, 0)?;

        Ok(CdtResult {
            cdt: self.cdt,
            doc_roots: self.doc_roots,
            canvas_elements: self.canvas_elements,
            inline_frames: self.inline_frames,
        })
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            cdt: self.cdt.len(),
            doc_roots: self.doc_roots.len(),
            canvas_elements: self.canvas_elements.len(),
            inline_frames: self.inline_frames.len(),
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.cdt.truncate(checkpoint.cdt);
        self.doc_roots.truncate(checkpoint.doc_roots);
        self.canvas_elements.truncate(checkpoint.canvas_elements);
        self.inline_frames.truncate(checkpoint.inline_frames);
    }

    fn reserve(&mut self, node: CaptureNode) -> usize {
        self.cdt.push(node);
        self.cdt.len() - 1
    }

    /// 序列化单个节点，不需要出现在树中的节点返回 `None`
    fn serialize_node(&mut self, node: &Handle, depth: usize) -> CaptureResult<Option<usize>> {
        if depth > self.max_depth {
            return Err(CaptureError::DepthExceeded(self.max_depth));
        }

        match &node.data {
            NodeData::Document => {
                let index = self.reserve(CaptureNode::document());
                let children = self.serialize_children(node, depth)?;
                self.cdt[index].child_node_indexes = Some(children);
                Ok(Some(index))
            }
            NodeData::Doctype { name, .. } => Ok(Some(self.reserve(CaptureNode::doctype(name.to_string())))),
            NodeData::Text { contents } => {
                let value = contents.borrow().to_string();
                Ok(Some(self.reserve(CaptureNode::text(value))))
            }
            NodeData::Element { .. } => self.serialize_element(node, depth).map(Some),
            NodeData::Comment { .. } | NodeData::ProcessingInstruction { .. } => Ok(None),
        }
    }

    /// 逐个序列化子节点，失败的子树被省略
    fn serialize_children(&mut self, node: &Handle, depth: usize) -> CaptureResult<Vec<usize>> {
        let mut indexes = Vec::new();

        for child in node.children.borrow().iter() {
            let checkpoint = self.checkpoint();
            match self.serialize_node(child, depth + 1) {
                Ok(Some(index)) => indexes.push(index),
                Ok(None) => {}
                Err(e) => {
                    self.rollback(checkpoint);
                    warn!("omitting subtree: {}", e);
                    self.log.warn(format!("error while serializing child node: {e}"));
                }
            }
        }

        Ok(indexes)
    }

    fn serialize_element(&mut self, node: &Handle, depth: usize) -> CaptureResult<usize> {
        let NodeData::Element { name, attrs, .. } = &node.data else {
            return Err(CaptureError::NotADocument);
        };
        let is_html = name.ns == ns!(html);
        let local: &str = &name.local;
        let node_name = dom_node_name(node).unwrap_or_else(|| local.to_string());

        let mut attributes: Vec<Attribute> = attrs
            .borrow()
            .iter()
            .map(|attr| {
                let attr_name = attr_qualified_name(attr);
                let value = sanitize_attr_value(&attr_name, &attr.value);
                Attribute::new(attr_name, value)
            })
            .collect();

        if is_html && local == "script" {
            attributes.retain(|attr| attr.name != "src");
            let mut script = CaptureNode::element(node_name, attributes);
            script.child_node_indexes = Some(Vec::new());
            return Ok(self.reserve(script));
        }

        // 需要替换字面子节点的运行时文本
        let mut replacement_text: Option<String> = None;

        if is_html {
            match local {
                "style" => {
                    replacement_text = serialize_css_rules(&self.document.css_rules(node));
                    if self.document.is_stylesheet_disabled(node) {
                        add_or_update(&mut attributes, Attribute::new(DISABLED_STYLE_ATTR, ""));
                    }
                }
                "textarea" => {
                    let live_value = self.document.live_value(node);
                    if live_value != text_content(node) {
                        replacement_text = Some(live_value);
                    }
                }
                "input" => self.sync_input(node, &mut attributes),
                "option" => {
                    let selected = get_parent_node(node)
                        .filter(|parent| is_html_element(parent, "select"))
                        .map(|select| self.document.live_value(&select) == option_value(node))
                        .unwrap_or(false);
                    if selected {
                        add_or_update(&mut attributes, Attribute::new("selected", ""));
                    }
                }
                "link" => {
                    let is_css = get_node_attr(node, "type")
                        .map(|t| t.trim().eq_ignore_ascii_case("text/css"))
                        .unwrap_or(false);
                    if is_css && self.document.is_stylesheet_disabled(node) {
                        add_or_update(&mut attributes, Attribute::new("disabled", ""));
                    }
                }
                "canvas" => {
                    let synthetic_url = self.synthetic_url(&format!("applitools-canvas-{}.png", self.ids.next_id()));
                    self.canvas_elements.push(CanvasReference {
                        element: node.clone(),
                        synthetic_url: synthetic_url.clone(),
                    });
                    add_or_update(&mut attributes, Attribute::new(SYNTHETIC_SRC_ATTR, synthetic_url));
                }
                "iframe" => {
                    if self.document.frame_kind(node) == FrameKind::Inline {
                        let synthetic_url = self.synthetic_url(&format!("?applitools-iframe={}", self.ids.next_id()));
                        self.inline_frames.push(InlineFrameReference {
                            element: node.clone(),
                            synthetic_url: synthetic_url.clone(),
                        });
                        add_or_update(&mut attributes, Attribute::new(SYNTHETIC_SRC_ATTR, synthetic_url));
                    }
                }
                _ => {}
            }
        }

        let index = self.reserve(CaptureNode::element(node_name, attributes));

        let children = match replacement_text {
            Some(text) => vec![self.reserve(CaptureNode::text(text))],
            None => self.serialize_children(node, depth)?,
        };
        self.cdt[index].child_node_indexes = Some(children);

        if let Some(shadow_root) = self.document.shadow_root(node).cloned() {
            let checkpoint = self.checkpoint();
            match self.serialize_shadow_root(&shadow_root, depth + 1) {
                Ok(shadow_index) => self.cdt[index].shadow_root_index = Some(shadow_index),
                Err(e) => {
                    self.rollback(checkpoint);
                    warn!("omitting shadow root: {}", e);
                    self.log.warn(format!("error while serializing shadow root: {e}"));
                }
            }
        }

        Ok(index)
    }

    fn serialize_shadow_root(&mut self, root: &Handle, depth: usize) -> CaptureResult<usize> {
        if depth > self.max_depth {
            return Err(CaptureError::DepthExceeded(self.max_depth));
        }

        self.doc_roots.push(root.clone());
        let index = self.reserve(CaptureNode::document_fragment());
        let children = self.serialize_children(root, depth)?;
        self.cdt[index].child_node_indexes = Some(children);
        Ok(index)
    }

    fn sync_input(&self, node: &Handle, attributes: &mut Vec<Attribute>) {
        let input_type = get_node_attr(node, "type")
            .map(|t| t.trim().to_ascii_lowercase())
            .filter(|t| KNOWN_INPUT_TYPES.contains(&t.as_str()))
            .unwrap_or_else(|| "text".to_string());

        match input_type.as_str() {
            "checkbox" | "radio" => {
                let has_checked = attributes.iter().any(|attr| attr.name == "checked");
                match (self.document.is_checked(node), has_checked) {
                    (false, true) => attributes.retain(|attr| attr.name != "checked"),
                    (true, false) => attributes.push(Attribute::bare("checked")),
                    _ => {}
                }
            }
            t if TEXT_LIKE_INPUT_TYPES.contains(&t) => {
                let live_value = self.document.live_value(node);
                if get_node_attr(node, "value").as_deref() != Some(live_value.as_str()) {
                    add_or_update(attributes, Attribute::new("value", live_value));
                }
            }
            _ => {}
        }
    }

    fn synthetic_url(&self, relative: &str) -> String {
        absolutize_url(relative, self.base_url).unwrap_or_else(|| relative.to_string())
    }
}

/// 更新同名属性，不存在时追加
fn add_or_update(attributes: &mut Vec<Attribute>, attribute: Attribute) {
    match attributes.iter_mut().find(|attr| attr.name == attribute.name) {
        Some(existing) => existing.value = attribute.value,
        None => attributes.push(attribute),
    }
}
