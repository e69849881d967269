//! 画布像素导出
//!
//! 每个画布占位都会产出一个资源，URL 与元素上的 `data-applitools-src` 相同。
//! 没有像素数据的画布使用 1×1 透明 PNG。

use tracing::warn;

use crate::document::Document;
use crate::utils::{parse_data_url, Url, EMPTY_IMAGE_DATA_URL};

use super::types::{CanvasReference, ResourceBlob};

pub fn canvas_blobs(document: &Document, canvases: &[CanvasReference]) -> Vec<ResourceBlob> {
    canvases
        .iter()
        .map(|canvas| {
            let data_url = document
                .canvas_data_url(&canvas.element)
                .unwrap_or(EMPTY_IMAGE_DATA_URL);

            let parsed = Url::parse(data_url)
                .ok()
                .filter(|url| url.scheme() == "data")
                .or_else(|| {
                    warn!("canvas {} has invalid pixel data", canvas.synthetic_url);
                    Url::parse(EMPTY_IMAGE_DATA_URL).ok()
                });

            let (media_type, value) = match parsed {
                Some(url) => {
                    let (media_type, _charset, value) = parse_data_url(&url);
                    (media_type, value)
                }
                None => (String::new(), Vec::new()),
            };

            ResourceBlob {
                url: canvas.synthetic_url.clone(),
                content_type: Some(if media_type.is_empty() {
                    "image/png".to_string()
                } else {
                    media_type
                }),
                value,
            }
        })
        .collect()
}
