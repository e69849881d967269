//! # 工具模块
//!
//! - `url` - URL 规范化、data URL 解析、blob 前缀处理
//! - `serde_base64` - 字节数组的 base64 序列化

pub mod serde_base64;
pub mod url;

// Re-export commonly used items for convenience
pub use url::{
    absolutize_url, is_blob_url, is_fetchable_url, normalize_resource_url, parse_data_url,
    resolve_url, strip_blob_scheme, to_unanchored_uri, to_uri_encoding, Url,
    EMPTY_IMAGE_DATA_URL,
};
