use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dom_snapshot::core::print_error_message;
use dom_snapshot::env::{generate_env_docs, snapshot, EnvVar};
use dom_snapshot::utils::Url;
use dom_snapshot::{load_document, CaptureError, CaptureOptions, CaptureResult, Capturer, HttpFetcher};

#[derive(Parser, Debug)]
#[command(name = "dom-snapshot")]
#[command(about = "Capture a web page's DOM, styles, frames and resources into a JSON snapshot")]
#[command(version)]
struct Cli {
    /// URL or path to a local HTML file
    #[arg(required_unless_present = "list_env")]
    target: Option<String>,

    /// Write the snapshot to this file instead of stdout
    #[arg(short, long)]
    output: Option<String>,

    /// TOML file with capture options
    #[arg(short, long)]
    config: Option<String>,

    /// Log capture progress
    #[arg(long)]
    show_logs: bool,

    /// Reuse fetched resources across captures
    #[arg(long)]
    session_cache: bool,

    /// Persist the session cache to this database file
    #[arg(long)]
    session_cache_path: Option<String>,

    /// Report every resource URL without fetching it
    #[arg(long)]
    dont_fetch_resources: bool,

    /// Keep fetched stylesheets as they are instead of inlining their imports
    #[arg(long)]
    no_bundle_css: bool,

    /// Request timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// User-Agent header for every request
    #[arg(short, long)]
    user_agent: Option<String>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// List supported environment variables and exit
    #[arg(long)]
    list_env: bool,
}

impl Cli {
    fn capture_options(&self) -> CaptureResult<CaptureOptions> {
        let mut options = match &self.config {
            Some(path) => CaptureOptions::from_toml_file(path)?,
            None => CaptureOptions::default(),
        };
        options.apply_env_overrides()?;

        if self.show_logs {
            options.show_logs = true;
        }
        if self.session_cache || self.session_cache_path.is_some() {
            options.use_session_cache = true;
        }
        if let Some(path) = &self.session_cache_path {
            options.session_cache_path = Some(path.clone());
        }
        if self.dont_fetch_resources {
            options.dont_fetch_resources = true;
        }
        if self.no_bundle_css {
            options.bundle_css_imports = false;
        }
        if let Some(timeout) = self.timeout {
            options.timeout_secs = timeout;
        }
        if let Some(user_agent) = &self.user_agent {
            options.user_agent = Some(user_agent.clone());
        }

        options.validate()?;
        Ok(options)
    }
}

/// 把命令行目标解析为 URL，非 URL 视为本地文件路径
fn resolve_target(target: &str) -> CaptureResult<String> {
    if let Ok(url) = Url::parse(target) {
        if matches!(url.scheme(), "http" | "https" | "file" | "data") {
            return Ok(url.to_string());
        }
    }

    let path = Path::new(target);
    let absolute = fs::canonicalize(path)?;
    Url::from_file_path(&absolute)
        .map(|url| url.to_string())
        .map_err(|_| CaptureError::InvalidUrl(target.to_string()))
}

fn init_tracing() {
    let level = snapshot::LogLevel::get_or_default("info".to_string());
    let filter = EnvFilter::try_new(&level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: &Cli, target: &str) -> CaptureResult<()> {
    let options = cli.capture_options()?;
    let url = resolve_target(target)?;

    let fetcher = HttpFetcher::new(&options)?;
    let document = load_document(&fetcher, &url, &options).await?;

    let capturer = Capturer::new(fetcher, options)?;
    let snapshot = capturer.capture(&document).await?;

    let json = if cli.pretty {
        serde_json::to_vec_pretty(&snapshot)?
    } else {
        serde_json::to_vec(&snapshot)?
    };

    match &cli.output {
        Some(path) => fs::write(shellexpand::tilde(path).as_ref(), &json)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&json)?;
            stdout.write_all(b"\n")?;
        }
    }

    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if cli.list_env {
        print!("{}", generate_env_docs());
        return;
    }

    init_tracing();

    let Some(target) = cli.target.as_deref() else {
        print_error_message("Error: missing target");
        process::exit(1);
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            print_error_message(&format!("Error: {}", e));
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(&cli, target)) {
        print_error_message(&format!("Error: {}", e));
        process::exit(1);
    }
}
