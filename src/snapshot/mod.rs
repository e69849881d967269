//! # 快照模块
//!
//! 负责把活动文档变成可回放的 [`PageSnapshot`]：
//!
//! - `types` - 快照数据模型（CDT 节点、资源、页面快照）
//! - `aggregator` - 资源 URL 收集、抓取与依赖展开
//! - `canvas` - 画布像素导出
//! - `processor` - 组合入口 [`Capturer`] 与框架递归

pub mod aggregator;
pub mod canvas;
pub mod processor;
pub mod types;

// Re-export commonly used items for convenience
pub use aggregator::{gather_resource_urls, AggregatedResources, ResourceContext};
pub use processor::Capturer;
pub use types::{
    Attribute, CanvasReference, CaptureNode, InlineFrameReference, NodeType, PageSnapshot,
    ResourceBlob,
};
