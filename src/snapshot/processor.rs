//! 页面处理入口
//!
//! [`Capturer`] 把序列化、资源聚合、画布导出和框架递归组合起来，
//! 对每个文档产出一个 [`PageSnapshot`]，子框架的结果嵌套在 `frames` 中。
//!
//! 同一文档的资源聚合与所有子框架的递归处理并发进行，最后统一汇合；
//! `frames` 的顺序只取决于发现顺序，与完成顺序无关。

use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::{join_all, LocalBoxFuture};
use futures::FutureExt;
use tracing::{info, warn};

use crate::core::{CaptureLog, CaptureOptions, SCRIPT_VERSION};
use crate::document::Document;
use crate::error::CaptureResult;
use crate::network::{Fetch, FetchedResource, SessionCache};
use crate::parsers::html::dom::get_node_attr;
use crate::parsers::html::links::extract_frames;
use crate::parsers::html::serializer::{CdtBuilder, CdtResult, SyntheticIds};
use crate::utils::absolutize_url;

use super::aggregator::{gather_resource_urls, AggregatedResources, ResourceContext};
use super::canvas::canvas_blobs;
use super::types::{PageSnapshot, ResourceBlob};

/// 快照抓取器
///
/// 抓取器持有抓取能力、选项和（可选的）会话缓存，可以对多个文档重复使用；
/// 会话缓存在多次抓取之间共享。
pub struct Capturer<F> {
    fetcher: Rc<F>,
    options: CaptureOptions,
    session_cache: Option<Arc<SessionCache>>,
}

impl<F: Fetch + 'static> Capturer<F> {
    /// 创建抓取器
    ///
    /// 启用 `useSessionCache` 时打开会话缓存：配置了 `sessionCachePath` 则使用
    /// 磁盘数据库，否则只驻留内存。
    pub fn new(fetcher: F, options: CaptureOptions) -> CaptureResult<Self> {
        options.validate()?;

        let session_cache = if options.use_session_cache {
            let cache = match &options.session_cache_path {
                Some(path) => SessionCache::open(shellexpand::tilde(path).as_ref())?,
                None => SessionCache::in_memory(),
            };
            Some(Arc::new(cache))
        } else {
            None
        };

        Ok(Self {
            fetcher: Rc::new(fetcher),
            options,
            session_cache,
        })
    }

    /// 使用外部提供的会话缓存
    pub fn with_session_cache(mut self, session_cache: Arc<SessionCache>) -> Self {
        self.session_cache = Some(session_cache);
        self
    }

    pub fn session_cache(&self) -> Option<&Arc<SessionCache>> {
        self.session_cache.as_ref()
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// 抓取文档及其全部子框架
    ///
    /// 只有顶层文档的结构树错误会返回 `Err`，资源和子框架的失败都被就地吸收。
    pub async fn capture(&self, document: &Document) -> CaptureResult<PageSnapshot> {
        let log = CaptureLog::new(self.options.show_logs);
        log.log(format!("capture started for {}", document.url()));

        let context = CaptureContext {
            resources: ResourceContext::new(
                self.fetcher.clone(),
                self.session_cache.clone(),
                collect_blob_registry(document),
                log,
                self.options.bundle_css_imports,
            ),
            ids: SyntheticIds::new(),
            options: &self.options,
            log,
        };

        let mut snapshot = process_page(&context, document, document.url().to_string(), None, 0).await?;

        if let Some(cache) = &self.session_cache {
            match cache.persist() {
                Ok(written) => log.log(format!("session cache persisted {written} entries")),
                Err(e) => {
                    warn!("failed to persist session cache: {}", e);
                    log.warn(format!("failed to persist session cache: {e}"));
                }
            }
        }

        snapshot.script_version = Some(SCRIPT_VERSION.to_string());

        info!(
            "captured {} with {} nodes, {} blobs, {} frames in {}ms",
            snapshot.url,
            snapshot.cdt.len(),
            snapshot.blobs.len(),
            snapshot.frames.len(),
            log.elapsed_ms()
        );
        Ok(snapshot)
    }
}

/// 合并文档及全部子框架注册的 `blob:` URL
fn collect_blob_registry(document: &Document) -> HashMap<String, FetchedResource> {
    let mut registry = HashMap::new();
    let mut pending = vec![document];
    while let Some(current) = pending.pop() {
        for (url, resource) in current.blobs() {
            registry.entry(url.clone()).or_insert_with(|| resource.clone());
        }
        pending.extend(current.child_documents());
    }
    registry
}

struct CaptureContext<'o, F> {
    resources: ResourceContext<F>,
    ids: SyntheticIds,
    options: &'o CaptureOptions,
    log: CaptureLog,
}

/// 处理单个文档
///
/// # 参数
///
/// * `page_url` - 作为快照 `url` 与基准 URL 来源的页面地址
/// * `src_attr` - 框架元素上的原始 `src`（顶层为 `None`）
/// * `frame_depth` - 当前框架嵌套深度
fn process_page<'a, 'o, F: Fetch + 'static>(
    context: &'a CaptureContext<'o, F>,
    document: &'a Document,
    page_url: String,
    src_attr: Option<String>,
    frame_depth: usize,
) -> LocalBoxFuture<'a, CaptureResult<PageSnapshot>> {
    async move {
        let base_url = document.base_url_for(&page_url);

        let CdtResult {
            cdt,
            doc_roots,
            canvas_elements,
            inline_frames,
        } = CdtBuilder::new(
            document,
            &base_url,
            &context.ids,
            context.log,
            context.options.max_tree_depth,
        )
        .build()?;

        let urls = gather_resource_urls(document, &doc_roots, &cdt, &base_url);

        let descend = frame_depth < context.options.max_frame_depth;
        if !descend {
            context
                .log
                .warn(format!("frame depth limit reached at {page_url}, skipping child frames"));
        }

        let nested_frames: Vec<_> = if descend {
            extract_frames(document, &doc_roots)
                .into_iter()
                .filter_map(|frame| {
                    let content = document.frame_document(&frame)?;
                    let src = get_node_attr(&frame, "src")?;
                    let frame_url = absolutize_url(src.trim(), &base_url)?;
                    Some(process_page(context, content, frame_url, Some(src), frame_depth + 1))
                })
                .collect()
        } else {
            Vec::new()
        };

        let inline_frame_pages: Vec<_> = if descend {
            inline_frames
                .iter()
                .filter_map(|frame| {
                    let content = document.frame_document(&frame.element)?;
                    Some(process_page(
                        context,
                        content,
                        frame.synthetic_url.clone(),
                        get_node_attr(&frame.element, "src"),
                        frame_depth + 1,
                    ))
                })
                .collect()
        } else {
            Vec::new()
        };

        let resources = async {
            if context.options.dont_fetch_resources {
                AggregatedResources::unresolved(&urls)
            } else {
                context.resources.aggregate(urls.clone()).await
            }
        };

        let (resources, nested_results, inline_results) =
            futures::join!(resources, join_all(nested_frames), join_all(inline_frame_pages));

        let mut frames = Vec::new();
        for result in nested_results.into_iter().chain(inline_results) {
            match result {
                Ok(frame) => frames.push(frame),
                Err(e) => {
                    warn!("omitting frame of {}: {}", page_url, e);
                    context.log.warn(format!("error while processing frame: {e}"));
                }
            }
        }

        let AggregatedResources {
            resource_urls,
            mut blobs,
        } = resources;
        for blob in canvas_blobs(document, &canvas_elements) {
            push_unique_blob(&mut blobs, blob);
        }

        context.log.log(format!(
            "processed {}: {} nodes, {} unresolved urls, {} blobs",
            page_url,
            cdt.len(),
            resource_urls.len(),
            blobs.len()
        ));

        Ok(PageSnapshot {
            cdt,
            url: page_url,
            src_attr,
            resource_urls,
            blobs,
            frames,
            script_version: None,
        })
    }
    .boxed_local()
}

fn push_unique_blob(blobs: &mut Vec<ResourceBlob>, blob: ResourceBlob) {
    if !blobs.iter().any(|existing| existing.url == blob.url) {
        blobs.push(blob);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureError;
    use crate::snapshot::types::NodeType;

    struct NoFetch;

    impl Fetch for NoFetch {
        async fn fetch(&self, url: &str) -> CaptureResult<FetchedResource> {
            Err(CaptureError::BadStatus {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    #[tokio::test]
    async fn test_capture_sets_script_version_only_on_top_level() {
        let mut doc = Document::parse("https://x.com/", "<iframe></iframe>").unwrap();
        let frame = doc.first_element("iframe").unwrap();
        doc.attach_frame(&frame, Document::blank().unwrap());

        let capturer = Capturer::new(NoFetch, CaptureOptions::default()).unwrap();
        let snapshot = capturer.capture(&doc).await.unwrap();

        assert_eq!(snapshot.script_version.as_deref(), Some(SCRIPT_VERSION));
        assert_eq!(snapshot.frames.len(), 1);
        assert_eq!(snapshot.frames[0].script_version, None);
        assert_eq!(snapshot.frames[0].url, "https://x.com/?applitools-iframe=0");
        assert_eq!(snapshot.frames[0].cdt[0].node_type, NodeType::Document);
    }

    #[tokio::test]
    async fn test_inline_frame_keeps_literal_src() {
        let mut doc = Document::parse("https://x.com/", "<iframe src='about:blank'></iframe><iframe></iframe>").unwrap();
        let frames = doc.elements_by_tag_name("iframe");
        doc.attach_frame(&frames[0], Document::blank().unwrap());
        doc.attach_frame(&frames[1], Document::blank().unwrap());

        let snapshot = Capturer::new(NoFetch, CaptureOptions::default())
            .unwrap()
            .capture(&doc)
            .await
            .unwrap();

        assert_eq!(snapshot.frames.len(), 2);
        assert_eq!(snapshot.frames[0].src_attr.as_deref(), Some("about:blank"));
        assert_eq!(snapshot.frames[0].url, "https://x.com/?applitools-iframe=0");
        assert_eq!(snapshot.frames[1].src_attr, None);
    }

    #[tokio::test]
    async fn test_dont_fetch_resources_reports_all_urls() {
        let doc = Document::parse("https://x.com/", "<img src='a.png'><img src='blob:https://x.com/b'>").unwrap();
        let options = CaptureOptions {
            dont_fetch_resources: true,
            ..CaptureOptions::default()
        };
        let capturer = Capturer::new(NoFetch, options).unwrap();
        let snapshot = capturer.capture(&doc).await.unwrap();

        assert_eq!(snapshot.resource_urls, vec!["https://x.com/a.png", "https://x.com/b"]);
        assert!(snapshot.blobs.is_empty());
    }

    #[tokio::test]
    async fn test_frame_depth_limit() {
        let mut inner = Document::parse("https://x.com/b.html", "<iframe src='/c.html'></iframe>").unwrap();
        let inner_frame = inner.first_element("iframe").unwrap();
        inner.attach_frame(&inner_frame, Document::parse("https://x.com/c.html", "").unwrap());

        let mut doc = Document::parse("https://x.com/", "<iframe src='/b.html'></iframe>").unwrap();
        let frame = doc.first_element("iframe").unwrap();
        doc.attach_frame(&frame, inner);

        let options = CaptureOptions {
            max_frame_depth: 1,
            ..CaptureOptions::default()
        };
        let snapshot = Capturer::new(NoFetch, options).unwrap().capture(&doc).await.unwrap();

        assert_eq!(snapshot.frames.len(), 1);
        assert_eq!(snapshot.frames[0].src_attr.as_deref(), Some("/b.html"));
        assert!(snapshot.frames[0].frames.is_empty());
    }

    #[test]
    fn test_invalid_options_rejected() {
        let options = CaptureOptions {
            timeout_secs: 0,
            ..CaptureOptions::default()
        };
        assert!(Capturer::new(NoFetch, options).is_err());
    }
}
