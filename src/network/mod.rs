//! # 网络模块
//!
//! 这个模块包含所有与资源获取和缓存相关的功能：
//!
//! - 资源抓取能力（HTTP、`file:`、`data:`）
//! - 跨抓取共享的会话缓存及其磁盘持久化
//!
//! # 模块组织
//!
//! - `fetch` - `Fetch` 能力与基于 reqwest 的实现
//! - `cache` - 会话缓存（内存 + redb）

pub mod cache;
pub mod fetch;

// Re-export commonly used items for convenience
pub use cache::{CachedResource, SessionCache};
pub use fetch::{Fetch, FetchedResource, HttpFetcher};
