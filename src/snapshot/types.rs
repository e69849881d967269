//! 快照数据模型
//!
//! JSON 字段使用 camelCase，与回放端约定的格式一致。

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};

/// DOM 节点类型，序列化为 DOM 的数值常量
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NodeType {
    Element = 1,
    Text = 3,
    Document = 9,
    DocumentType = 10,
    DocumentFragment = 11,
}

impl From<NodeType> for u8 {
    fn from(node_type: NodeType) -> u8 {
        node_type as u8
    }
}

impl TryFrom<u8> for NodeType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(NodeType::Element),
            3 => Ok(NodeType::Text),
            9 => Ok(NodeType::Document),
            10 => Ok(NodeType::DocumentType),
            11 => Ok(NodeType::DocumentFragment),
            other => Err(format!("unsupported node type {other}")),
        }
    }
}

/// 元素属性，值可以缺省（如 `{name: "checked"}`）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// 扁平树（CDT）中的一个节点
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureNode {
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Vec<Attribute>>,
    /// 缺省表示未尝试子节点，空数组表示没有子节点
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_node_indexes: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shadow_root_index: Option<usize>,
}

impl CaptureNode {
    fn empty(node_type: NodeType) -> Self {
        Self {
            node_type,
            node_name: None,
            node_value: None,
            attributes: None,
            child_node_indexes: None,
            shadow_root_index: None,
        }
    }

    pub fn document() -> Self {
        Self::empty(NodeType::Document)
    }

    pub fn doctype(name: impl Into<String>) -> Self {
        Self {
            node_name: Some(name.into()),
            ..Self::empty(NodeType::DocumentType)
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Self {
            node_value: Some(value.into()),
            ..Self::empty(NodeType::Text)
        }
    }

    pub fn element(name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Self {
            node_name: Some(name.into()),
            attributes: Some(attributes),
            ..Self::empty(NodeType::Element)
        }
    }

    pub fn document_fragment() -> Self {
        Self {
            node_name: Some("#document-fragment".to_string()),
            ..Self::empty(NodeType::DocumentFragment)
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes
            .as_ref()
            .and_then(|attributes| attributes.iter().find(|attr| attr.name == name))
    }
}

/// 抓取到的资源
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceBlob {
    pub url: String,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    #[serde(with = "crate::utils::serde_base64")]
    pub value: Vec<u8>,
}

/// 每个文档的抓取结果，子框架递归嵌套
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub cdt: Vec<CaptureNode>,
    pub url: String,
    pub src_attr: Option<String>,
    pub resource_urls: Vec<String>,
    pub blobs: Vec<ResourceBlob>,
    pub frames: Vec<PageSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_version: Option<String>,
}

impl PageSnapshot {
    pub fn blob(&self, url: &str) -> Option<&ResourceBlob> {
        self.blobs.iter().find(|blob| blob.url == url)
    }
}

/// 画布占位：元素及其合成 URL
#[derive(Clone, Debug)]
pub struct CanvasReference {
    pub element: Handle,
    pub synthetic_url: String,
}

/// 内联框架占位：元素及其合成 URL
#[derive(Clone, Debug)]
pub struct InlineFrameReference {
    pub element: Handle,
    pub synthetic_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_serializes_as_number() {
        let json = serde_json::to_string(&CaptureNode::text("hi")).unwrap();
        assert_eq!(json, r#"{"nodeType":3,"nodeValue":"hi"}"#);
    }

    #[test]
    fn test_bare_attribute_has_no_value() {
        let json = serde_json::to_string(&Attribute::bare("checked")).unwrap();
        assert_eq!(json, r#"{"name":"checked"}"#);
    }

    #[test]
    fn test_snapshot_json_shape() {
        let snapshot = PageSnapshot {
            cdt: vec![CaptureNode::document()],
            url: "https://example.com/".to_string(),
            src_attr: None,
            resource_urls: vec![],
            blobs: vec![ResourceBlob {
                url: "https://example.com/a.css".to_string(),
                content_type: Some("text/css".to_string()),
                value: b"a{}".to_vec(),
            }],
            frames: vec![],
            script_version: Some("1.0.0".to_string()),
        };
        let value = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(value["srcAttr"], serde_json::Value::Null);
        assert_eq!(value["blobs"][0]["type"], "text/css");
        assert_eq!(value["blobs"][0]["value"], "YXt9");
        assert_eq!(value["scriptVersion"], "1.0.0");

        let back: PageSnapshot = serde_json::from_value(value).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_unknown_node_type_is_rejected() {
        assert!(serde_json::from_str::<CaptureNode>(r#"{"nodeType":8}"#).is_err());
    }
}
