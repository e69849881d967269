//! 文档加载
//!
//! 抓取 HTML 页面并构建 [`Document`]，然后递归加载其中的 `<iframe>`/`<frame>`：
//!
//! - `srcdoc` 框架加载为 `about:srcdoc` 内联文档
//! - 没有 `src`、`about:blank` 或 `javascript:` 的框架加载为空白内联文档
//! - 同源 `src` 抓取后作为嵌套文档附加，抓取失败时不附加
//! - 跨源或 `data:` 的框架标记为不可访问
//!
//! 框架嵌套深度受 `maxFrameDepth` 限制。

use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use markup5ever_rcdom::Handle;
use tracing::{debug, warn};

use crate::core::CaptureOptions;
use crate::document::{Document, ABOUT_BLANK, ABOUT_SRCDOC};
use crate::error::{CaptureError, CaptureResult};
use crate::network::Fetch;
use crate::parsers::html::dom::{descendant_elements, get_node_attr, get_node_name};
use crate::utils::{absolutize_url, Url};

/// 框架加载结果
enum FrameLoad {
    Attach(Document),
    CrossOrigin,
    Skip,
}

/// 加载页面及其全部框架
///
/// # 参数
///
/// * `fetcher` - 资源抓取能力
/// * `url` - 页面地址（`http`、`https`、`file` 或 `data`）
/// * `options` - 抓取选项，使用其中的 `maxFrameDepth`
///
/// # 返回值
///
/// 附加了框架内容的文档；只有顶层页面抓取或解析失败时返回错误
pub async fn load_document<F: Fetch>(
    fetcher: &F,
    url: &str,
    options: &CaptureOptions,
) -> CaptureResult<Document> {
    Url::parse(url).map_err(|_| CaptureError::InvalidUrl(url.to_string()))?;
    load_page(fetcher, url.to_string(), 0, options.max_frame_depth).await
}

fn load_page<'a, F: Fetch>(
    fetcher: &'a F,
    url: String,
    depth: usize,
    max_depth: usize,
) -> LocalBoxFuture<'a, CaptureResult<Document>> {
    async move {
        debug!("loading document {}", url);
        let fetched = fetcher.fetch(&url).await?;
        let document = Document::from_bytes(&url, &fetched.value, fetched.content_type.as_deref())?;
        load_frames(fetcher, document, depth, max_depth).await
    }
    .boxed_local()
}

fn load_frames<'a, F: Fetch>(
    fetcher: &'a F,
    mut document: Document,
    depth: usize,
    max_depth: usize,
) -> LocalBoxFuture<'a, CaptureResult<Document>> {
    async move {
        let frames: Vec<Handle> = descendant_elements(&document.root())
            .into_iter()
            .filter(|node| matches!(get_node_name(node), Some("iframe") | Some("frame")))
            .collect();

        if frames.is_empty() {
            return Ok(document);
        }
        if depth >= max_depth {
            warn!("frame depth limit {} reached at {}", max_depth, document.url());
            return Ok(document);
        }

        let base_url = document.base_url();
        let loads = frames.iter().map(|frame| {
            load_frame(fetcher, frame.clone(), document.url().to_string(), base_url.clone(), depth, max_depth)
        });
        let results = join_all(loads).await;

        for (frame, result) in results {
            match result {
                FrameLoad::Attach(content) => document.attach_frame(&frame, content),
                FrameLoad::CrossOrigin => document.attach_cross_origin_frame(&frame),
                FrameLoad::Skip => {}
            }
        }

        Ok(document)
    }
    .boxed_local()
}

async fn load_frame<F: Fetch>(
    fetcher: &F,
    frame: Handle,
    parent_url: String,
    base_url: String,
    depth: usize,
    max_depth: usize,
) -> (Handle, FrameLoad) {
    let is_iframe = get_node_name(&frame) == Some("iframe");

    if let Some(srcdoc) = get_node_attr(&frame, "srcdoc").filter(|_| is_iframe) {
        let load = match Document::parse(ABOUT_SRCDOC, &srcdoc) {
            Ok(content) => {
                let content = content.with_fallback_base_url(base_url);
                match load_frames(fetcher, content, depth + 1, max_depth).await {
                    Ok(content) => FrameLoad::Attach(content),
                    Err(e) => {
                        warn!("failed to load srcdoc frame: {}", e);
                        FrameLoad::Skip
                    }
                }
            }
            Err(e) => {
                warn!("failed to parse srcdoc frame: {}", e);
                FrameLoad::Skip
            }
        };
        return (frame, load);
    }

    let src = get_node_attr(&frame, "src").unwrap_or_default();
    let src = src.trim();
    if src.is_empty()
        || src.eq_ignore_ascii_case(ABOUT_BLANK)
        || src.to_ascii_lowercase().starts_with("javascript:")
    {
        let load = match Document::blank() {
            Ok(content) => FrameLoad::Attach(content.with_fallback_base_url(base_url)),
            Err(_) => FrameLoad::Skip,
        };
        return (frame, load);
    }

    let Some(frame_url) = absolutize_url(src, &base_url) else {
        debug!("skipping frame with unresolvable src {}", src);
        return (frame, FrameLoad::Skip);
    };

    if !is_same_origin(&parent_url, &frame_url) {
        debug!("frame {} is cross-origin", frame_url);
        return (frame, FrameLoad::CrossOrigin);
    }

    let load = match load_page(fetcher, frame_url.clone(), depth + 1, max_depth).await {
        Ok(content) => FrameLoad::Attach(content),
        Err(e) => {
            warn!("failed to load frame {}: {}", frame_url, e);
            FrameLoad::Skip
        }
    };
    (frame, load)
}

/// 两个地址是否同源；`file:` 页面之间视为同源，`data:` 永远不同源
fn is_same_origin(parent_url: &str, frame_url: &str) -> bool {
    let (Ok(parent), Ok(frame)) = (Url::parse(parent_url), Url::parse(frame_url)) else {
        return false;
    };

    match (parent.scheme(), frame.scheme()) {
        (_, "data") => false,
        ("file", "file") => true,
        _ => parent.origin() == frame.origin(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::FrameKind;
    use crate::network::FetchedResource;
    use std::collections::HashMap;

    struct PageFetcher(HashMap<&'static str, &'static str>);

    impl Fetch for PageFetcher {
        async fn fetch(&self, url: &str) -> CaptureResult<FetchedResource> {
            match self.0.get(url) {
                Some(html) => Ok(FetchedResource {
                    url: url.to_string(),
                    content_type: Some("text/html; charset=utf-8".to_string()),
                    value: html.as_bytes().to_vec(),
                }),
                None => Err(CaptureError::BadStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    #[tokio::test]
    async fn test_frames_are_classified_on_load() {
        let fetcher = PageFetcher(HashMap::from([
            (
                "https://x.com/",
                "<iframe src='/nested.html'></iframe>\
                 <iframe srcdoc='<p>inline</p>'></iframe>\
                 <iframe></iframe>\
                 <iframe src='https://other.com/'></iframe>\
                 <iframe src='/missing.html'></iframe>",
            ),
            ("https://x.com/nested.html", "<p>nested</p>"),
        ]));

        let doc = load_document(&fetcher, "https://x.com/", &CaptureOptions::default())
            .await
            .unwrap();
        let frames = doc.elements_by_tag_name("iframe");

        assert_eq!(doc.frame_kind(&frames[0]), FrameKind::Nested);
        assert_eq!(doc.frame_kind(&frames[1]), FrameKind::Inline);
        assert_eq!(doc.frame_document(&frames[1]).unwrap().url(), ABOUT_SRCDOC);
        assert_eq!(doc.frame_kind(&frames[2]), FrameKind::Inline);
        assert_eq!(doc.frame_kind(&frames[3]), FrameKind::Inaccessible);
        assert_eq!(doc.frame_kind(&frames[4]), FrameKind::Inaccessible);
        assert!(doc.frame_content(&frames[4]).is_none());
    }

    #[tokio::test]
    async fn test_frame_depth_is_bounded() {
        let fetcher = PageFetcher(HashMap::from([
            ("https://x.com/a.html", "<iframe src='/a.html'></iframe>"),
        ]));
        let options = CaptureOptions {
            max_frame_depth: 2,
            ..CaptureOptions::default()
        };

        let doc = load_document(&fetcher, "https://x.com/a.html", &options).await.unwrap();
        let level1 = doc.frame_document(&doc.first_element("iframe").unwrap()).unwrap();
        let level2 = level1.frame_document(&level1.first_element("iframe").unwrap()).unwrap();
        assert!(level2.frame_content(&level2.first_element("iframe").unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_top_level_failure_propagates() {
        let fetcher = PageFetcher(HashMap::new());
        let result = load_document(&fetcher, "https://x.com/", &CaptureOptions::default()).await;
        assert!(matches!(result, Err(CaptureError::BadStatus { status: 404, .. })));
    }

    #[test]
    fn test_same_origin() {
        assert!(is_same_origin("https://x.com/a", "https://x.com/b"));
        assert!(!is_same_origin("https://x.com/a", "http://x.com/b"));
        assert!(!is_same_origin("https://x.com/a", "data:text/html,hi"));
        assert!(is_same_origin("file:///tmp/a.html", "file:///tmp/b.html"));
    }
}
