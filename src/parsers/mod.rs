//! # 解析器模块
//!
//! 这个模块包含所有用于解析不同类型 web 资源的功能：
//!
//! - HTML 解析、DOM 查询与扁平树序列化
//! - CSS 资源发现、`@import` 打包与规则序列化
//! - 事件处理器属性的识别与清理
//!
//! # 模块组织
//!
//! - `html` - HTML 文档解析、元数据、链接提取、CDT 序列化
//! - `css` - 基于 cssparser 的样式表处理
//! - `js` - 属性值清理

pub mod css;
pub mod html;
pub mod js;

// Re-export commonly used items for convenience
pub use css::{bundle_css, extract_css_urls, serialize_css_rules, strip_unfetched_placeholders, BundledCss};
pub use html::{html_to_dom, CdtBuilder, CdtResult};
pub use js::{attr_is_event_handler, sanitize_attr_value};
