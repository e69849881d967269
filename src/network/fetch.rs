//! 资源抓取
//!
//! 抓取器只负责把一个 URL 变成 `{url, contentType, bytes}`。只有状态码 200
//! 视为成功，其余情况统一返回错误，由调用方决定如何吸收。

use std::future::Future;

use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::core::{detect_media_type, CaptureOptions};
use crate::error::{CaptureError, CaptureResult};
use crate::utils::{parse_data_url, Url};

pub const DEFAULT_USER_AGENT: &str = concat!("dom-snapshot/", env!("CARGO_PKG_VERSION"));

/// 一次成功抓取的结果
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchedResource {
    pub url: String,
    /// 原始 `Content-Type`，可能带有 charset 参数
    pub content_type: Option<String>,
    pub value: Vec<u8>,
}

/// 资源抓取能力
///
/// 返回的 future 不要求 `Send`：整个抓取过程运行在单个逻辑线程上。
pub trait Fetch {
    fn fetch(&self, url: &str) -> impl Future<Output = CaptureResult<FetchedResource>>;
}

/// 基于 reqwest 的抓取器，同时处理 `data:` 与 `file:` URL
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(options: &CaptureOptions) -> CaptureResult<Self> {
        let user_agent = options
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let client = Client::builder()
            .timeout(options.timeout())
            .user_agent(user_agent)
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn fetch_http(&self, url: &Url) -> CaptureResult<FetchedResource> {
        let response = self.client.get(url.as_str()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(CaptureError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let value = response.bytes().await?.to_vec();
        let content_type = content_type.or_else(|| Some(detect_media_type(&value, url)));

        Ok(FetchedResource {
            url: url.to_string(),
            content_type,
            value,
        })
    }

    async fn fetch_file(&self, url: &Url) -> CaptureResult<FetchedResource> {
        let path = url
            .to_file_path()
            .map_err(|_| CaptureError::InvalidUrl(url.to_string()))?;
        let value = tokio::fs::read(&path).await?;

        Ok(FetchedResource {
            url: url.to_string(),
            content_type: Some(detect_media_type(&value, url)),
            value,
        })
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> CaptureResult<FetchedResource> {
        let parsed = Url::parse(url).map_err(|_| CaptureError::InvalidUrl(url.to_string()))?;
        debug!("fetching {}", parsed);

        match parsed.scheme() {
            "http" | "https" => self.fetch_http(&parsed).await,
            "file" => self.fetch_file(&parsed).await,
            "data" => {
                let (media_type, charset, value) = parse_data_url(&parsed);
                let content_type = if charset.is_empty() {
                    media_type
                } else {
                    format!("{media_type};charset={charset}")
                };
                Ok(FetchedResource {
                    url: url.to_string(),
                    content_type: Some(content_type),
                    value,
                })
            }
            scheme => Err(CaptureError::UnsupportedScheme {
                url: url.to_string(),
                scheme: scheme.to_string(),
            }),
        }
    }
}
