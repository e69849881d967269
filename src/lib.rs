//! # DOM Snapshot Library
//!
//! 把一个活动网页的完整渲染状态（DOM 结构、内联与外部样式、跨文档框架、画布以及
//! 所有引用的二进制资源）抓取为可移植、可回放的快照。
//!
//! ## 模块组织
//!
//! - `core` - 抓取选项、诊断日志和媒体类型检测
//! - `document` - 活动文档模型（DOM + 运行时状态覆盖层）
//! - `loader` - 从网络或本地加载文档及其框架
//! - `parsers` - 资源解析器（HTML、CSS、JavaScript 属性）
//! - `network` - 资源抓取与会话缓存
//! - `snapshot` - 快照数据模型、资源聚合与页面处理
//! - `utils` - URL 规范化等工具函数
//!
//! ## 使用示例
//!
//! ```rust,no_run
//! use dom_snapshot::{load_document, CaptureOptions, Capturer, HttpFetcher};
//!
//! # async fn run() -> dom_snapshot::CaptureResult<()> {
//! let options = CaptureOptions::default();
//! let fetcher = HttpFetcher::new(&options)?;
//! let document = load_document(&fetcher, "https://example.com/", &options).await?;
//!
//! let capturer = Capturer::new(fetcher, options)?;
//! let snapshot = capturer.capture(&document).await?;
//! println!("{}", serde_json::to_string(&snapshot)?);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod document;
pub mod env;
pub mod error;
pub mod loader;
pub mod network;
pub mod parsers;
pub mod snapshot;
pub mod utils;

// Re-export commonly used items for convenience
pub use crate::core::{CaptureLog, CaptureOptions, SCRIPT_VERSION};
pub use document::{Document, FrameKind};
pub use error::{CaptureError, CaptureResult};
pub use loader::load_document;
pub use network::{CachedResource, Fetch, FetchedResource, HttpFetcher, SessionCache};
pub use snapshot::{Capturer, CaptureNode, NodeType, PageSnapshot, ResourceBlob};
