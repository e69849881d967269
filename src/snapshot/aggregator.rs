//! 资源聚合
//!
//! 把文档中发现的资源 URL 规范化、去重后全部抓取，按轮次处理依赖
//! （样式表的 `@import`/`url()`、SVG 的内部引用），直到不再出现新 URL。
//!
//! 同一次抓取中每个 URL 只处理一次：所有文档共享一张进行中的 future 表，
//! 后来者直接等待同一个结果。会话缓存命中时不会发起请求，且输出与重新抓取一致。

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use encoding_rs::{Encoding, UTF_8};
use futures::future::{join_all, LocalBoxFuture, Shared};
use futures::FutureExt;
use markup5ever_rcdom::Handle;
use tracing::{debug, warn};

use crate::core::{parse_content_type, CaptureLog};
use crate::document::Document;
use crate::error::CaptureError;
use crate::network::{CachedResource, Fetch, FetchedResource, SessionCache};
use crate::parsers::css::{bundle_css, extract_css_urls, extract_import_targets, strip_unfetched_placeholders};
use crate::parsers::html::links::{
    extract_links, extract_style_attr_urls, extract_style_tag_urls, extract_svg_resource_urls,
};
use crate::utils::{is_blob_url, normalize_resource_url, strip_blob_scheme};

use super::types::{CaptureNode, ResourceBlob};

const CSS_MEDIA_TYPE: &str = "text/css";
const SVG_MEDIA_TYPE: &str = "image/svg+xml";
const BUNDLED_CSS_CONTENT_TYPE: &str = "text/css; charset=utf-8";

/// 单个 URL 的处理结果
#[derive(Debug, Clone)]
pub struct ProcessedResource {
    pub url: String,
    /// 抓取失败时为 `None`
    pub resource: Option<CachedResource>,
    /// 解码后的样式表文本（仅 CSS）
    pub css_text: Option<String>,
}

impl ProcessedResource {
    fn unresolved(url: String) -> Self {
        Self {
            url,
            resource: None,
            css_text: None,
        }
    }

    fn from_cached(url: String, resource: CachedResource) -> Self {
        let css_text = decode_css(resource.content_type.as_deref(), &resource.value);
        Self {
            url,
            resource: Some(resource),
            css_text,
        }
    }

    fn from_fetched(url: String, fetched: FetchedResource) -> Self {
        let base_url = strip_blob_scheme(&url).to_string();
        let content_type = fetched.content_type;
        let css_text = decode_css(content_type.as_deref(), &fetched.value);

        // 此时缓存为空，所有导入都会作为未抓取项报告
        let raw_dependents = match &css_text {
            Some(css) => {
                let mut urls = bundle_css(css, &base_url, &|_: &str| None).unfetched_resources;
                urls.extend(extract_css_urls(css));
                urls
            }
            None if is_media_type(content_type.as_deref(), SVG_MEDIA_TYPE) => {
                let svg_text = String::from_utf8_lossy(&fetched.value);
                extract_svg_resource_urls(&svg_text).unwrap_or_else(|e| {
                    warn!("failed to parse svg {}: {}", url, e);
                    Vec::new()
                })
            }
            None => Vec::new(),
        };

        let mut dependent_urls: Vec<String> = Vec::new();
        for raw in raw_dependents {
            if let Some(dependent) = normalize_resource_url(&raw, &base_url) {
                if dependent != url && !dependent_urls.contains(&dependent) {
                    dependent_urls.push(dependent);
                }
            }
        }

        Self {
            url,
            resource: Some(CachedResource {
                content_type,
                value: fetched.value,
                dependent_urls,
            }),
            css_text,
        }
    }

    pub fn dependent_urls(&self) -> &[String] {
        self.resource
            .as_ref()
            .map(|resource| resource.dependent_urls.as_slice())
            .unwrap_or_default()
    }
}

fn is_media_type(content_type: Option<&str>, expected: &str) -> bool {
    content_type
        .map(|value| parse_content_type(value).0.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

/// 按 `Content-Type` 中的字符集解码样式表，非 CSS 返回 `None`
fn decode_css(content_type: Option<&str>, value: &[u8]) -> Option<String> {
    let content_type = content_type?;
    let (media_type, charset, _) = parse_content_type(content_type);
    if !media_type.eq_ignore_ascii_case(CSS_MEDIA_TYPE) {
        return None;
    }

    let encoding = Encoding::for_label(charset.as_bytes()).unwrap_or(UTF_8);
    let (text, _, _) = encoding.decode(value);
    Some(text.into_owned())
}

type InFlight = Shared<LocalBoxFuture<'static, Rc<ProcessedResource>>>;

/// 一次抓取内共享的资源处理上下文
pub struct ResourceContext<F> {
    fetcher: Rc<F>,
    session_cache: Option<Arc<SessionCache>>,
    blob_registry: Rc<HashMap<String, FetchedResource>>,
    log: CaptureLog,
    bundle_css_imports: bool,
    in_flight: RefCell<HashMap<String, InFlight>>,
}

impl<F: Fetch + 'static> ResourceContext<F> {
    pub fn new(
        fetcher: Rc<F>,
        session_cache: Option<Arc<SessionCache>>,
        blob_registry: HashMap<String, FetchedResource>,
        log: CaptureLog,
        bundle_css_imports: bool,
    ) -> Self {
        Self {
            fetcher,
            session_cache,
            blob_registry: Rc::new(blob_registry),
            log,
            bundle_css_imports,
            in_flight: RefCell::new(HashMap::new()),
        }
    }

    /// 获取 URL 的处理 future，已经在处理中时复用同一个
    fn process(&self, url: &str) -> InFlight {
        if let Some(existing) = self.in_flight.borrow().get(url) {
            return existing.clone();
        }

        let future = process_resource(
            self.fetcher.clone(),
            self.session_cache.clone(),
            self.blob_registry.clone(),
            self.log,
            url.to_string(),
        )
        .boxed_local()
        .shared();

        self.in_flight
            .borrow_mut()
            .insert(url.to_string(), future.clone());
        future
    }

    /// 抓取全部 URL 及其依赖
    ///
    /// # 参数
    ///
    /// * `urls` - 已规范化的资源 URL
    ///
    /// # 返回值
    ///
    /// 未能解析的 URL 与抓取到的资源，按发现顺序排列
    pub async fn aggregate(&self, urls: Vec<String>) -> AggregatedResources {
        let mut seen: HashSet<String> = HashSet::new();
        let mut round: Vec<String> = urls.into_iter().filter(|url| seen.insert(url.clone())).collect();
        let mut processed: Vec<Rc<ProcessedResource>> = Vec::new();

        while !round.is_empty() {
            debug!("processing resource round of {} urls", round.len());
            let results = join_all(round.iter().map(|url| self.process(url))).await;

            let mut next_round = Vec::new();
            for result in results {
                for dependent in result.dependent_urls() {
                    if seen.insert(dependent.clone()) {
                        next_round.push(dependent.clone());
                    }
                }
                processed.push(result);
            }
            round = next_round;
        }

        let css_texts: HashMap<&str, &str> = processed
            .iter()
            .filter_map(|result| {
                result
                    .css_text
                    .as_deref()
                    .map(|css| (result.url.as_str(), css))
            })
            .collect();
        let lookup = |url: &str| css_texts.get(url).map(|css| css.to_string());

        let mut aggregated = AggregatedResources::default();
        for result in &processed {
            let Some(resource) = &result.resource else {
                aggregated.push_unresolved(&result.url);
                continue;
            };

            let mut blob = ResourceBlob {
                url: strip_blob_scheme(&result.url).to_string(),
                content_type: resource.content_type.clone(),
                value: resource.value.clone(),
            };

            if self.bundle_css_imports {
                if let Some(css) = result.css_text.as_deref().filter(|css| has_imports(css)) {
                    let bundled = bundle_css(css, strip_blob_scheme(&result.url), &lookup);
                    if !bundled.unfetched_resources.is_empty() {
                        debug!(
                            "{} keeps {} unresolved imports",
                            result.url,
                            bundled.unfetched_resources.len()
                        );
                    }
                    blob.content_type = Some(BUNDLED_CSS_CONTENT_TYPE.to_string());
                    blob.value = strip_unfetched_placeholders(&bundled.bundled_css).into_bytes();
                }
            }

            aggregated.push_blob(blob);
        }

        aggregated
    }
}

fn has_imports(css: &str) -> bool {
    extract_import_targets(css)
        .map(|targets| !targets.is_empty())
        .unwrap_or(false)
}

async fn process_resource<F: Fetch>(
    fetcher: Rc<F>,
    session_cache: Option<Arc<SessionCache>>,
    blob_registry: Rc<HashMap<String, FetchedResource>>,
    log: CaptureLog,
    url: String,
) -> Rc<ProcessedResource> {
    if let Some(cached) = session_cache.as_ref().and_then(|cache| cache.get(&url)) {
        log.log(format!("session cache hit for {url}"));
        return Rc::new(ProcessedResource::from_cached(url, cached));
    }

    let fetched = if is_blob_url(&url) {
        blob_registry
            .get(&url)
            .cloned()
            .ok_or_else(|| CaptureError::Network {
                url: url.clone(),
                message: "blob url is not registered".to_string(),
            })
    } else {
        fetcher.fetch(&url).await
    };

    match fetched {
        Ok(fetched) => {
            log.log(format!("fetched {url}"));
            let processed = ProcessedResource::from_fetched(url, fetched);
            if let (Some(cache), Some(resource)) = (&session_cache, &processed.resource) {
                cache.insert(&processed.url, resource.clone());
            }
            Rc::new(processed)
        }
        Err(e) => {
            debug!("resource {} unresolved: {}", url, e);
            log.warn(format!("failed to fetch {url}: {e}"));
            Rc::new(ProcessedResource::unresolved(url))
        }
    }
}

/// 聚合结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AggregatedResources {
    /// 无法抓取的 URL（去除 `blob:` 前缀，去重）
    pub resource_urls: Vec<String>,
    pub blobs: Vec<ResourceBlob>,
}

impl AggregatedResources {
    /// 不抓取资源时，全部 URL 都作为未解析 URL 上报
    pub fn unresolved(urls: &[String]) -> Self {
        let mut aggregated = Self::default();
        for url in urls {
            aggregated.push_unresolved(url);
        }
        aggregated
    }

    fn push_unresolved(&mut self, url: &str) {
        let url = strip_blob_scheme(url);
        if !self.resource_urls.iter().any(|existing| existing == url) {
            self.resource_urls.push(url.to_string());
        }
    }

    fn push_blob(&mut self, blob: ResourceBlob) {
        if !self.blobs.iter().any(|existing| existing.url == blob.url) {
            self.blobs.push(blob);
        }
    }
}

/// 收集一个文档需要抓取的全部资源 URL
///
/// 来源依次为各文档根下的元素属性与 `<style>` 样式表，以及 CDT 中的
/// `style=""` 属性。结果已规范化、过滤为可抓取的协议并去重。
pub fn gather_resource_urls(
    document: &Document,
    doc_roots: &[Handle],
    cdt: &[CaptureNode],
    base_url: &str,
) -> Vec<String> {
    let mut raw_urls: Vec<String> = Vec::new();
    for root in doc_roots {
        raw_urls.extend(extract_links(root));
        raw_urls.extend(extract_style_tag_urls(document, root));
    }
    raw_urls.extend(extract_style_attr_urls(cdt));

    let mut seen = HashSet::new();
    raw_urls
        .iter()
        .filter_map(|raw| normalize_resource_url(raw, base_url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CaptureResult;
    use std::cell::Cell;

    /// 按 URL 返回固定内容并统计请求次数
    #[derive(Default)]
    struct StaticFetcher {
        responses: HashMap<String, (String, Vec<u8>)>,
        requests: Cell<usize>,
    }

    impl StaticFetcher {
        fn with(mut self, url: &str, content_type: &str, body: &str) -> Self {
            self.responses
                .insert(url.to_string(), (content_type.to_string(), body.as_bytes().to_vec()));
            self
        }
    }

    impl Fetch for StaticFetcher {
        async fn fetch(&self, url: &str) -> CaptureResult<FetchedResource> {
            self.requests.set(self.requests.get() + 1);
            match self.responses.get(url) {
                Some((content_type, value)) => Ok(FetchedResource {
                    url: url.to_string(),
                    content_type: Some(content_type.clone()),
                    value: value.clone(),
                }),
                None => Err(CaptureError::BadStatus {
                    url: url.to_string(),
                    status: 404,
                }),
            }
        }
    }

    fn context(fetcher: StaticFetcher) -> ResourceContext<StaticFetcher> {
        ResourceContext::new(Rc::new(fetcher), None, HashMap::new(), CaptureLog::new(false), true)
    }

    #[test]
    fn test_stylesheet_dependents_start_with_unfetched_imports() {
        let css = "@import url(a.css);\n@import 'https://x.com/s/main.css';\n\
                   p { background: url(bg.png) }";
        let processed = ProcessedResource::from_fetched(
            "https://x.com/s/main.css".to_string(),
            FetchedResource {
                url: "https://x.com/s/main.css".to_string(),
                content_type: Some("text/css".to_string()),
                value: css.as_bytes().to_vec(),
            },
        );

        assert_eq!(
            processed.dependent_urls(),
            &["https://x.com/s/a.css".to_string(), "https://x.com/s/bg.png".to_string()][..]
        );
    }

    #[tokio::test]
    async fn test_css_dependencies_are_followed() {
        let fetcher = StaticFetcher::default()
            .with("https://x.com/a.css", "text/css", "@import 'b.css'; a { background: url(img/bg.png) }")
            .with("https://x.com/b.css", "text/css", "b {}")
            .with("https://x.com/img/bg.png", "image/png", "PNG");
        let ctx = context(fetcher);

        let result = ctx.aggregate(vec!["https://x.com/a.css".to_string()]).await;

        let urls: Vec<&str> = result.blobs.iter().map(|blob| blob.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://x.com/a.css", "https://x.com/b.css", "https://x.com/img/bg.png"]
        );
        assert!(result.resource_urls.is_empty());

        let bundled = String::from_utf8(result.blobs[0].value.clone()).unwrap();
        assert_eq!(
            bundled,
            "\n/** https://x.com/b.css **/\nb {}\n/** https://x.com/a.css **/\n@import 'b.css'; a { background: url(img/bg.png) }"
        );
        assert_eq!(result.blobs[0].content_type.as_deref(), Some(BUNDLED_CSS_CONTENT_TYPE));
    }

    #[tokio::test]
    async fn test_missing_import_is_unresolved_and_placeholder_stripped() {
        let fetcher = StaticFetcher::default().with("https://x.com/a.css", "text/css", "@import 'gone.css';");
        let ctx = context(fetcher);

        let result = ctx.aggregate(vec!["https://x.com/a.css".to_string()]).await;

        assert_eq!(result.resource_urls, vec!["https://x.com/gone.css"]);
        let bundled = String::from_utf8(result.blobs[0].value.clone()).unwrap();
        assert!(!bundled.contains("@@@@@"));
        assert!(bundled.ends_with("@import 'gone.css';"));
    }

    #[tokio::test]
    async fn test_import_cycle_terminates() {
        let fetcher = StaticFetcher::default()
            .with("https://x.com/a.css", "text/css", "@import 'b.css';")
            .with("https://x.com/b.css", "text/css", "@import 'a.css';");
        let ctx = context(fetcher);

        let result = ctx.aggregate(vec!["https://x.com/a.css".to_string()]).await;
        assert_eq!(result.blobs.len(), 2);
    }

    #[tokio::test]
    async fn test_each_url_fetched_once_per_capture() {
        let fetcher = StaticFetcher::default().with("https://x.com/a.png", "image/png", "PNG");
        let ctx = context(fetcher);

        let urls = vec!["https://x.com/a.png".to_string(), "https://x.com/a.png".to_string()];
        let (first, second) = futures::join!(ctx.aggregate(urls.clone()), ctx.aggregate(urls));

        assert_eq!(first.blobs.len(), 1);
        assert_eq!(first, second);
        assert_eq!(ctx.fetcher.requests.get(), 1);
    }

    #[tokio::test]
    async fn test_session_cache_skips_fetch() {
        let cache = Arc::new(SessionCache::in_memory());
        let fetcher = Rc::new(StaticFetcher::default().with("https://x.com/a.css", "text/css", "a {}"));

        let ctx = ResourceContext::new(fetcher.clone(), Some(cache.clone()), HashMap::new(), CaptureLog::new(false), true);
        let first = ctx.aggregate(vec!["https://x.com/a.css".to_string()]).await;

        let ctx = ResourceContext::new(fetcher.clone(), Some(cache.clone()), HashMap::new(), CaptureLog::new(false), true);
        let second = ctx.aggregate(vec!["https://x.com/a.css".to_string()]).await;

        assert_eq!(first, second);
        assert_eq!(fetcher.requests.get(), 1);
        assert!(cache.contains("https://x.com/a.css"));
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = Arc::new(SessionCache::in_memory());
        let ctx = ResourceContext::new(
            Rc::new(StaticFetcher::default()),
            Some(cache.clone()),
            HashMap::new(),
            CaptureLog::new(false),
            true,
        );
        let result = ctx.aggregate(vec!["https://x.com/missing.png".to_string()]).await;

        assert_eq!(result.resource_urls, vec!["https://x.com/missing.png"]);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_blob_urls_use_registry() {
        let mut registry = HashMap::new();
        registry.insert(
            "blob:https://x.com/123".to_string(),
            FetchedResource {
                url: "blob:https://x.com/123".to_string(),
                content_type: Some("image/png".to_string()),
                value: vec![1, 2, 3],
            },
        );
        let ctx = ResourceContext::new(
            Rc::new(StaticFetcher::default()),
            None,
            registry,
            CaptureLog::new(false),
            true,
        );

        let result = ctx
            .aggregate(vec![
                "blob:https://x.com/123".to_string(),
                "blob:https://x.com/unknown".to_string(),
            ])
            .await;

        assert_eq!(result.blobs[0].url, "https://x.com/123");
        assert_eq!(result.resource_urls, vec!["https://x.com/unknown"]);
        assert_eq!(ctx.fetcher.requests.get(), 0);
    }

    #[tokio::test]
    async fn test_svg_dependencies() {
        let fetcher = StaticFetcher::default()
            .with(
                "https://x.com/icons.svg",
                "image/svg+xml",
                r#"<svg xmlns="http://www.w3.org/2000/svg"><image href="inner.png"/></svg>"#,
            )
            .with("https://x.com/inner.png", "image/png", "PNG");
        let ctx = context(fetcher);

        let result = ctx.aggregate(vec!["https://x.com/icons.svg".to_string()]).await;
        assert_eq!(result.blobs.len(), 2);
        assert_eq!(result.blobs[1].url, "https://x.com/inner.png");
    }

    #[test]
    fn test_gather_resource_urls_normalizes_and_dedupes() {
        let doc = Document::parse(
            "https://x.com/dir/page.html",
            "<img src='a.png#frag'><img src='a.png'><img src='data:image/png;base64,AA'>\
             <style>div { background: url(../b.png) }</style>",
        )
        .unwrap();
        let cdt = vec![CaptureNode::element(
            "DIV",
            vec![crate::snapshot::types::Attribute::new("style", "background: url(c.png)")],
        )];

        let urls = gather_resource_urls(&doc, &[doc.root()], &cdt, "https://x.com/dir/page.html");
        assert_eq!(
            urls,
            vec!["https://x.com/dir/a.png", "https://x.com/b.png", "https://x.com/dir/c.png"]
        );
    }

    #[test]
    fn test_unresolved_when_not_fetching() {
        let urls = vec![
            "blob:https://x.com/1".to_string(),
            "https://x.com/1".to_string(),
            "https://x.com/2".to_string(),
        ];
        let result = AggregatedResources::unresolved(&urls);
        assert_eq!(result.resource_urls, vec!["https://x.com/1", "https://x.com/2"]);
        assert!(result.blobs.is_empty());
    }
}
