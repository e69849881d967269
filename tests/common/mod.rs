// 集成测试公共模块
//
// 提供内存中的抓取器和快照断言辅助函数

use std::cell::RefCell;
use std::collections::HashMap;
use std::time::Duration;

use dom_snapshot::{CaptureError, CaptureResult, Fetch, FetchedResource, PageSnapshot};

/// 预置响应
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub content_type: String,
    pub body: Vec<u8>,
    pub latency: Duration,
}

/// 内存抓取器，支持按 URL 注入延迟并记录请求
#[derive(Debug, Default)]
pub struct MockFetcher {
    responses: HashMap<String, MockResponse>,
    requests: RefCell<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, url: &str, content_type: &str, body: impl AsRef<[u8]>) -> Self {
        self.responses.insert(
            url.to_string(),
            MockResponse {
                content_type: content_type.to_string(),
                body: body.as_ref().to_vec(),
                latency: Duration::ZERO,
            },
        );
        self
    }

    pub fn with_latency(mut self, url: &str, latency: Duration) -> Self {
        if let Some(response) = self.responses.get_mut(url) {
            response.latency = latency;
        }
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.borrow().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests.borrow().iter().filter(|requested| *requested == url).count()
    }
}

impl Fetch for MockFetcher {
    async fn fetch(&self, url: &str) -> CaptureResult<FetchedResource> {
        self.requests.borrow_mut().push(url.to_string());

        let Some(response) = self.responses.get(url).cloned() else {
            return Err(CaptureError::BadStatus {
                url: url.to_string(),
                status: 404,
            });
        };

        if !response.latency.is_zero() {
            tokio::time::sleep(response.latency).await;
        }

        Ok(FetchedResource {
            url: url.to_string(),
            content_type: Some(response.content_type),
            value: response.body,
        })
    }
}

/// 断言扁平树的下标约束
pub fn assert_index_invariant(snapshot: &PageSnapshot) {
    let cdt = &snapshot.cdt;
    assert!(!cdt.is_empty(), "cdt should not be empty");
    assert_eq!(cdt[0].node_type as u8, 9, "index 0 should be the document node");

    for (index, node) in cdt.iter().enumerate() {
        let referenced = node
            .child_node_indexes
            .iter()
            .flatten()
            .chain(node.shadow_root_index.iter());
        for child in referenced {
            assert!(*child > index, "child {} should come after parent {}", child, index);
            assert!(*child < cdt.len(), "child {} out of range", child);
        }
    }

    for frame in &snapshot.frames {
        assert_index_invariant(frame);
    }
}

/// 断言资源列表没有重复
pub fn assert_no_duplicates(snapshot: &PageSnapshot) {
    let mut urls: Vec<&str> = snapshot.blobs.iter().map(|blob| blob.url.as_str()).collect();
    let total = urls.len();
    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), total, "blob urls should be unique");

    let mut resource_urls: Vec<&str> = snapshot.resource_urls.iter().map(String::as_str).collect();
    let total = resource_urls.len();
    resource_urls.sort();
    resource_urls.dedup();
    assert_eq!(resource_urls.len(), total, "resource urls should be unique");

    for frame in &snapshot.frames {
        assert_no_duplicates(frame);
    }
}

pub fn blob_text(snapshot: &PageSnapshot, url: &str) -> String {
    let blob = snapshot
        .blob(url)
        .unwrap_or_else(|| panic!("missing blob {url}"));
    String::from_utf8(blob.value.clone()).expect("blob should be utf-8")
}
