//! # 活动文档模型
//!
//! 抓取的输入是一个 [`Document`]：解析后的 DOM 树（`RcDom`）、文档地址，
//! 以及按节点身份索引的 [`LiveState`] 覆盖层。覆盖层保存无法从标记中得到的
//! 运行时状态：表单控件的当前值、附加的 shadow root、框架内容文档、画布像素、
//! 样式表禁用状态、运行时 CSS 规则以及页面脚本创建的 `blob:` URL。
//!
//! 没有覆盖条目时，运行时状态等同于标记本身：
//! - 复选框 `checked` = 是否存在 `checked` 属性
//! - 输入框的值 = `value` 属性
//! - 下拉框的值 = 第一个带 `selected` 的选项，否则第一个选项
//! - 样式规则 = `<style>` 的文本内容
//!
//! 抓取期间文档不可变，因此框架分类只计算一次并在序列化与框架编排之间共享。

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

use crate::error::CaptureResult;
use crate::network::FetchedResource;
use crate::parsers::html::dom::{
    find_nodes, get_node_attr, get_node_name, has_node_attr, html_fragment_to_nodes, html_to_dom,
    is_html_element, text_content,
};
use crate::parsers::html::metadata::{get_base_url, get_charset};
use crate::core::parse_content_type;
use crate::utils::{absolutize_url, Url};

pub const ABOUT_BLANK: &str = "about:blank";
pub const ABOUT_SRCDOC: &str = "about:srcdoc";

/// 以节点地址作为身份的键
///
/// 节点由文档（或覆盖层中的 shadow root）持有，抓取期间地址保持稳定。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn of(handle: &Handle) -> Self {
        NodeKey(Rc::as_ptr(handle) as usize)
    }
}

/// 框架元素所附加的内容
pub enum FrameContent {
    /// 同源或内联的内容文档
    Accessible(Rc<Document>),
    /// 跨源，内容文档不可访问
    CrossOrigin,
}

/// 框架分类
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind {
    /// 没有内容文档，或内容文档跨源
    Inaccessible,
    /// 内容文档已在同一上下文中加载（about:blank、srcdoc、非 http 地址）
    Inline,
    /// 可访问的真实嵌套文档
    Nested,
}

/// 运行时状态覆盖层
#[derive(Default)]
pub struct LiveState {
    checked: HashMap<NodeKey, bool>,
    values: HashMap<NodeKey, String>,
    shadow_roots: HashMap<NodeKey, Handle>,
    frames: HashMap<NodeKey, FrameContent>,
    canvases: HashMap<NodeKey, String>,
    disabled_sheets: HashMap<NodeKey, bool>,
    css_rules: HashMap<NodeKey, String>,
}

/// 被抓取的文档
pub struct Document {
    url: String,
    fallback_base_url: Option<String>,
    dom: RcDom,
    live: LiveState,
    blobs: HashMap<String, FetchedResource>,
    frame_kinds: RefCell<HashMap<NodeKey, FrameKind>>,
}

impl Document {
    /// 从 HTML 文本构建文档
    pub fn parse(url: &str, html: &str) -> CaptureResult<Self> {
        let dom = html_to_dom(html.as_bytes(), "utf-8")?;
        Ok(Self::from_dom(url, dom))
    }

    /// 从原始字节构建文档
    ///
    /// 字符集优先取自 `Content-Type`，其次取自文档内的 `<meta>` 声明。
    pub fn from_bytes(url: &str, data: &[u8], content_type: Option<&str>) -> CaptureResult<Self> {
        let declared_charset = content_type
            .map(|value| parse_content_type(value).1)
            .filter(|charset| !charset.is_empty());

        let dom = match declared_charset {
            Some(charset) => html_to_dom(data, &charset)?,
            None => {
                let dom = html_to_dom(data, "utf-8")?;
                match get_charset(&dom.document) {
                    Some(charset) if !charset.eq_ignore_ascii_case("utf-8") => {
                        html_to_dom(data, &charset)?
                    }
                    _ => dom,
                }
            }
        };

        Ok(Self::from_dom(url, dom))
    }

    /// 空白文档（`about:blank`）
    pub fn blank() -> CaptureResult<Self> {
        Self::parse(ABOUT_BLANK, "")
    }

    pub fn from_dom(url: &str, dom: RcDom) -> Self {
        Self {
            url: url.to_string(),
            fallback_base_url: None,
            dom,
            live: LiveState::default(),
            blobs: HashMap::new(),
            frame_kinds: RefCell::new(HashMap::new()),
        }
    }

    /// 自身地址无法作为基准时（about:blank、about:srcdoc）使用的基准 URL
    pub fn with_fallback_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.fallback_base_url = Some(base_url.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn root(&self) -> Handle {
        self.dom.document.clone()
    }

    /// 以文档自身地址为页面地址时的基准 URL
    pub fn base_url(&self) -> String {
        let page_url = self.fallback_base_url.as_deref().unwrap_or(&self.url);
        self.base_url_for(page_url)
    }

    /// 已解析的 `<base href>`，没有时为页面地址
    pub fn base_url_for(&self, page_url: &str) -> String {
        get_base_url(&self.dom.document)
            .and_then(|href| absolutize_url(href.trim(), page_url))
            .unwrap_or_else(|| page_url.to_string())
    }

    pub fn elements_by_tag_name(&self, name: &str) -> Vec<Handle> {
        find_nodes(&self.dom.document, vec![name])
    }

    pub fn first_element(&self, name: &str) -> Option<Handle> {
        self.elements_by_tag_name(name).into_iter().next()
    }

    pub fn set_checked(&mut self, node: &Handle, checked: bool) {
        self.live.checked.insert(NodeKey::of(node), checked);
    }

    pub fn set_value(&mut self, node: &Handle, value: impl Into<String>) {
        self.live.values.insert(NodeKey::of(node), value.into());
    }

    /// 为宿主元素附加 shadow root，内容由 HTML 片段给出
    pub fn attach_shadow_root(&mut self, host: &Handle, html: &str) -> CaptureResult<Handle> {
        let root = Node::new(NodeData::Document);
        for node in html_fragment_to_nodes(html)? {
            node.parent.set(Some(Rc::downgrade(&root)));
            root.children.borrow_mut().push(node);
        }
        self.live.shadow_roots.insert(NodeKey::of(host), root.clone());
        Ok(root)
    }

    pub fn attach_frame(&mut self, frame: &Handle, content: Document) {
        self.live
            .frames
            .insert(NodeKey::of(frame), FrameContent::Accessible(Rc::new(content)));
        self.frame_kinds.borrow_mut().remove(&NodeKey::of(frame));
    }

    pub fn attach_cross_origin_frame(&mut self, frame: &Handle) {
        self.live.frames.insert(NodeKey::of(frame), FrameContent::CrossOrigin);
        self.frame_kinds.borrow_mut().remove(&NodeKey::of(frame));
    }

    /// 画布当前像素（data URL）
    pub fn set_canvas_data_url(&mut self, canvas: &Handle, data_url: impl Into<String>) {
        self.live.canvases.insert(NodeKey::of(canvas), data_url.into());
    }

    pub fn set_stylesheet_disabled(&mut self, node: &Handle, disabled: bool) {
        self.live.disabled_sheets.insert(NodeKey::of(node), disabled);
    }

    /// 以运行时规则文本替换 `<style>` 的内容
    pub fn set_css_rules(&mut self, node: &Handle, css: impl Into<String>) {
        self.live.css_rules.insert(NodeKey::of(node), css.into());
    }

    /// 注册页面脚本创建的 `blob:` URL
    pub fn register_blob(&mut self, url: &str, content_type: Option<String>, value: Vec<u8>) {
        let key = Url::parse(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());
        self.blobs.insert(
            key.clone(),
            FetchedResource {
                url: key,
                content_type,
                value,
            },
        );
    }

    pub fn is_checked(&self, node: &Handle) -> bool {
        self.live
            .checked
            .get(&NodeKey::of(node))
            .copied()
            .unwrap_or_else(|| has_node_attr(node, "checked"))
    }

    /// 控件的当前值
    pub fn live_value(&self, node: &Handle) -> String {
        if let Some(value) = self.live.values.get(&NodeKey::of(node)) {
            return value.clone();
        }

        match get_node_name(node) {
            Some("textarea") => text_content(node),
            Some("select") => {
                let options = find_nodes(node, vec!["option"]);
                options
                    .iter()
                    .find(|option| has_node_attr(option, "selected"))
                    .or_else(|| options.first())
                    .map(option_value)
                    .unwrap_or_default()
            }
            Some("option") => option_value(node),
            _ => get_node_attr(node, "value").unwrap_or_default(),
        }
    }

    pub fn shadow_root(&self, host: &Handle) -> Option<&Handle> {
        self.live.shadow_roots.get(&NodeKey::of(host))
    }

    pub fn frame_content(&self, frame: &Handle) -> Option<&FrameContent> {
        self.live.frames.get(&NodeKey::of(frame))
    }

    /// 可访问框架的内容文档
    pub fn frame_document(&self, frame: &Handle) -> Option<&Document> {
        match self.frame_content(frame) {
            Some(FrameContent::Accessible(document)) => Some(document),
            _ => None,
        }
    }

    /// 框架分类，每个框架元素只计算一次
    pub fn frame_kind(&self, frame: &Handle) -> FrameKind {
        let key = NodeKey::of(frame);
        if let Some(kind) = self.frame_kinds.borrow().get(&key) {
            return *kind;
        }

        let kind = match self.live.frames.get(&key) {
            None | Some(FrameContent::CrossOrigin) => FrameKind::Inaccessible,
            Some(FrameContent::Accessible(content)) => {
                let base_url = self.base_url();
                let has_http_src = get_node_attr(frame, "src")
                    .and_then(|src| absolutize_url(src.trim(), &base_url))
                    .and_then(|src| Url::parse(&src).ok())
                    .map(|src| matches!(src.scheme(), "http" | "https"))
                    .unwrap_or(false);

                if !has_http_src || content.url() == ABOUT_BLANK || content.url() == ABOUT_SRCDOC {
                    FrameKind::Inline
                } else {
                    FrameKind::Nested
                }
            }
        };

        self.frame_kinds.borrow_mut().insert(key, kind);
        kind
    }

    pub fn canvas_data_url(&self, canvas: &Handle) -> Option<&str> {
        self.live.canvases.get(&NodeKey::of(canvas)).map(String::as_str)
    }

    /// 样式表是否被禁用；`<link disabled>` 在没有覆盖时视为禁用
    pub fn is_stylesheet_disabled(&self, node: &Handle) -> bool {
        self.live
            .disabled_sheets
            .get(&NodeKey::of(node))
            .copied()
            .unwrap_or_else(|| is_html_element(node, "link") && has_node_attr(node, "disabled"))
    }

    /// `<style>` 的运行时规则文本
    pub fn css_rules(&self, node: &Handle) -> String {
        match self.live.css_rules.get(&NodeKey::of(node)) {
            Some(css) => css.clone(),
            None => text_content(node),
        }
    }

    pub fn blobs(&self) -> &HashMap<String, FetchedResource> {
        &self.blobs
    }

    /// 所有可访问的子框架文档
    pub fn child_documents(&self) -> impl Iterator<Item = &Document> {
        self.live.frames.values().filter_map(|content| match content {
            FrameContent::Accessible(document) => Some(document.as_ref()),
            FrameContent::CrossOrigin => None,
        })
    }
}

/// `<option>` 的值：`value` 属性，否则为折叠空白后的文本
pub fn option_value(option: &Handle) -> String {
    match get_node_attr(option, "value") {
        Some(value) => value,
        None => text_content(option)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" "),
    }
}
