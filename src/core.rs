use std::fmt;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::env::{snapshot, EnvVar};
use crate::error::{CaptureError, CaptureResult};

/// Version stamped onto every top-level snapshot as `scriptVersion`.
pub const SCRIPT_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_TREE_DEPTH: usize = 512;
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 8;

/// Configuration options for a capture
///
/// Keys are camelCase in TOML/JSON; snake_case spellings are accepted as aliases.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    #[serde(alias = "show_logs")]
    pub show_logs: bool,
    #[serde(alias = "use_session_cache")]
    pub use_session_cache: bool,
    #[serde(alias = "dont_fetch_resources")]
    pub dont_fetch_resources: bool,
    #[serde(alias = "bundle_css_imports")]
    pub bundle_css_imports: bool,
    #[serde(alias = "session_cache_path", skip_serializing_if = "Option::is_none")]
    pub session_cache_path: Option<String>,
    #[serde(alias = "user_agent", skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(alias = "timeout_secs")]
    pub timeout_secs: u64,
    #[serde(alias = "max_tree_depth")]
    pub max_tree_depth: usize,
    #[serde(alias = "max_frame_depth")]
    pub max_frame_depth: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            show_logs: false,
            use_session_cache: false,
            dont_fetch_resources: false,
            bundle_css_imports: true,
            session_cache_path: None,
            user_agent: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_tree_depth: DEFAULT_MAX_TREE_DEPTH,
            max_frame_depth: DEFAULT_MAX_FRAME_DEPTH,
        }
    }
}

impl CaptureOptions {
    /// Loads options from a TOML file; `~` in the path is expanded.
    pub fn from_toml_file(path: &str) -> CaptureResult<Self> {
        let expanded = shellexpand::tilde(path);
        let content = fs::read_to_string(Path::new(expanded.as_ref()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CaptureResult<Self> {
        toml::from_str(content).map_err(|e| CaptureError::Config(e.to_string()))
    }

    /// Applies `DOM_SNAPSHOT_*` environment variables that are set.
    pub fn apply_env_overrides(&mut self) -> CaptureResult<()> {
        let config_err = |e: crate::env::EnvError| CaptureError::Config(e.to_string());

        if let Some(value) = snapshot::ShowLogs::get_opt().map_err(config_err)? {
            self.show_logs = value;
        }
        if let Some(value) = snapshot::UseSessionCache::get_opt().map_err(config_err)? {
            self.use_session_cache = value;
        }
        if let Some(value) = snapshot::DontFetchResources::get_opt().map_err(config_err)? {
            self.dont_fetch_resources = value;
        }
        if let Some(value) = snapshot::SessionCachePath::get_opt().map_err(config_err)? {
            self.session_cache_path = Some(value);
        }
        if let Some(value) = snapshot::Timeout::get_opt().map_err(config_err)? {
            self.timeout_secs = value.as_secs();
        }
        if let Some(value) = snapshot::UserAgent::get_opt().map_err(config_err)? {
            if !value.is_empty() {
                self.user_agent = Some(value);
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.timeout_secs == 0 {
            return Err(CaptureError::Config("timeoutSecs must be greater than zero".to_string()));
        }
        if self.max_tree_depth == 0 {
            return Err(CaptureError::Config("maxTreeDepth must be greater than zero".to_string()));
        }
        if self.max_frame_depth == 0 {
            return Err(CaptureError::Config("maxFrameDepth must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Capture-scoped diagnostics, silent unless `showLogs` is set
#[derive(Clone, Copy, Debug)]
pub struct CaptureLog {
    enabled: bool,
    started: Instant,
}

impl CaptureLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.started.elapsed().as_millis()
    }

    pub fn log(&self, msg: impl fmt::Display) {
        if self.enabled {
            tracing::info!(elapsed_ms = self.elapsed_ms() as u64, "[{}] {}", self.elapsed_ms(), msg);
        }
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        if self.enabled {
            tracing::warn!(elapsed_ms = self.elapsed_ms() as u64, "[{}] {}", self.elapsed_ms(), msg);
        }
    }
}

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";
const FILE_SIGNATURES: [[&[u8]; 2]; 14] = [
    // Image
    [b"GIF87a", b"image/gif"],
    [b"GIF89a", b"image/gif"],
    [b"\xFF\xD8\xFF", b"image/jpeg"],
    [b"\x89PNG\x0D\x0A\x1A\x0A", b"image/png"],
    [b"<svg ", b"image/svg+xml"],
    [b"<?xml ", b"image/svg+xml"],
    [b"\x00\x00\x01\x00", b"image/x-icon"],
    // Font
    [b"wOFF", b"font/woff"],
    [b"wOF2", b"font/woff2"],
    [b"OTTO", b"font/otf"],
    [b"\x00\x01\x00\x00", b"font/ttf"],
    // Audio / video
    [b"ID3", b"audio/mpeg"],
    [b"OggS", b"audio/ogg"],
    [b"\x1A\x45\xDF\xA3", b"video/webm"],
];

/// Determines the media type of data based on its content signature
pub fn detect_media_type(data: &[u8], url: &Url) -> String {
    for signature in &FILE_SIGNATURES {
        let sig_bytes = signature[0];
        if data.starts_with(sig_bytes) {
            return String::from_utf8_lossy(signature[1]).to_string();
        }
    }

    // Fall back to detecting by file extension
    detect_media_type_by_file_name(url.path())
}

/// Determines the media type based on file extension
pub fn detect_media_type_by_file_name(filename: &str) -> String {
    let filename_lowercased = filename.to_lowercase();
    let extension = filename_lowercased.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");

    match extension {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Parses Content-Type header value into (media type, charset, is_base64)
pub fn parse_content_type(content_type: &str) -> (String, String, bool) {
    let mut media_type = String::new();
    let mut charset = String::new();
    let mut is_base64 = false;

    let mut parts = content_type.split(';');

    if let Some(first) = parts.next() {
        media_type = first.trim().to_lowercase();
    }

    for part in parts {
        let part = part.trim();
        if let Some(value) = part.strip_prefix("charset=") {
            charset = value.trim_matches('"').to_string();
        } else if part == "base64" {
            is_base64 = true;
        }
    }

    (media_type, charset, is_base64)
}

/// Prints an error message to stderr, in red when stderr is a terminal
pub fn print_error_message(msg: &str) {
    if atty::is(atty::Stream::Stderr) {
        eprintln!("{ANSI_COLOR_RED}{msg}{ANSI_COLOR_RESET}");
    } else {
        eprintln!("{msg}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = CaptureOptions::default();
        assert!(options.bundle_css_imports);
        assert!(!options.show_logs);
        assert_eq!(options.timeout_secs, 30);
        assert_eq!(options.max_frame_depth, 8);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_from_toml_accepts_both_spellings() {
        let options = CaptureOptions::from_toml_str(
            "showLogs = true\ndont_fetch_resources = true\ntimeoutSecs = 5\n",
        )
        .unwrap();
        assert!(options.show_logs);
        assert!(options.dont_fetch_resources);
        assert_eq!(options.timeout_secs, 5);
        assert!(options.bundle_css_imports);
    }

    #[test]
    fn test_options_validate_rejects_zero() {
        let options = CaptureOptions {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(options.validate(), Err(CaptureError::Config(_))));

        let options = CaptureOptions {
            max_tree_depth: 0,
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_options_from_toml_rejects_garbage() {
        assert!(CaptureOptions::from_toml_str("showLogs = \"sometimes\"").is_err());
    }

    #[test]
    fn test_detect_media_type() {
        let url = Url::parse("https://example.com/font").unwrap();
        assert_eq!(detect_media_type(b"wOF2\x00\x01", &url), "font/woff2");
        assert_eq!(detect_media_type(b"\x89PNG\x0D\x0A\x1A\x0A....", &url), "image/png");

        let url = Url::parse("https://example.com/style.CSS").unwrap();
        assert_eq!(detect_media_type(b"body{}", &url), "text/css");
    }

    #[test]
    fn test_parse_content_type() {
        let (media_type, charset, is_base64) = parse_content_type("text/css; charset=\"ISO-8859-1\"");
        assert_eq!(media_type, "text/css");
        assert_eq!(charset, "ISO-8859-1");
        assert!(!is_base64);
    }
}
