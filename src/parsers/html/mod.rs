//! HTML 解析和处理模块
//!
//! - `dom`: 基础 DOM 操作
//! - `metadata`: 文档元数据处理
//! - `parser`: 属性值解析（`rel`、`srcset`）
//! - `links`: 资源链接与框架提取
//! - `serializer`: 扁平树（CDT）序列化

pub mod dom;
pub mod links;
pub mod metadata;
pub mod parser;
pub mod serializer;

pub use dom::{
    find_nodes, get_node_attr, get_node_name, get_parent_node, html_to_dom,
};
pub use links::{extract_frames, extract_links, extract_style_attr_urls, extract_style_tag_urls};
pub use metadata::{get_base_url, get_charset};
pub use parser::{parse_link_type, parse_srcset, LinkType, SrcSetItem, WHITESPACES};
pub use serializer::{CdtBuilder, CdtResult, SyntheticIds};
