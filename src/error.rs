//! 快照错误处理
//!
//! 提供结构化错误类型。资源级错误（网络、状态码、不支持的协议）在抓取过程中
//! 被就地吸收，只有结构树错误会传播给调用方。

use thiserror::Error;

/// 快照抓取过程中可能出现的错误
#[derive(Error, Debug)]
pub enum CaptureError {
    /// 网络错误
    #[error("network error while fetching {url}: {message}")]
    Network { url: String, message: String },

    /// 非 200 状态码
    #[error("bad status code {status} for {url}")]
    BadStatus { url: String, status: u16 },

    /// 无法获取的 URL 协议
    #[error("unsupported url scheme \"{scheme}\" for {url}")]
    UnsupportedScheme { url: String, scheme: String },

    /// URL 解析失败
    #[error("invalid url \"{0}\"")]
    InvalidUrl(String),

    /// 文件读写错误
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 会话缓存错误
    #[error("session cache error: {0}")]
    Cache(String),

    /// 配置错误
    #[error("config error: {0}")]
    Config(String),

    /// 结构树超出最大深度
    #[error("maximum tree depth {0} exceeded")]
    DepthExceeded(usize),

    /// 根节点不是文档节点
    #[error("capture root is not a document node")]
    NotADocument,

    /// JSON 序列化错误
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    /// 资源级错误只影响单个 URL，不会中止整个抓取
    pub fn is_resource_level(&self) -> bool {
        matches!(
            self,
            CaptureError::Network { .. }
                | CaptureError::BadStatus { .. }
                | CaptureError::UnsupportedScheme { .. }
                | CaptureError::InvalidUrl(_)
                | CaptureError::Io(_)
        )
    }
}

impl From<reqwest::Error> for CaptureError {
    fn from(e: reqwest::Error) -> Self {
        CaptureError::Network {
            url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            message: e.to_string(),
        }
    }
}

macro_rules! impl_cache_error {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CaptureError {
                fn from(e: $ty) -> Self {
                    CaptureError::Cache(e.to_string())
                }
            }
        )*
    };
}

impl_cache_error!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
