//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问。每个变量是一个实现了 [`EnvVar`]
//! 的零大小类型，集中声明名称、默认值和说明。

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 变量存在时返回解析结果，不存在时返回 `None`
    fn get_opt() -> EnvResult<Option<T>> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 快照相关环境变量
pub mod snapshot {
    use super::*;

    /// 输出抓取日志
    pub struct ShowLogs;
    impl EnvVar<bool> for ShowLogs {
        const NAME: &'static str = "DOM_SNAPSHOT_SHOW_LOGS";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Emit timestamped capture diagnostics";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 启用会话缓存
    pub struct UseSessionCache;
    impl EnvVar<bool> for UseSessionCache {
        const NAME: &'static str = "DOM_SNAPSHOT_USE_SESSION_CACHE";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Reuse fetched resources across captures";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 不抓取任何资源
    pub struct DontFetchResources;
    impl EnvVar<bool> for DontFetchResources {
        const NAME: &'static str = "DOM_SNAPSHOT_DONT_FETCH_RESOURCES";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Report every resource URL as unresolved instead of fetching";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 会话缓存的磁盘路径
    pub struct SessionCachePath;
    impl EnvVar<String> for SessionCachePath {
        const NAME: &'static str = "DOM_SNAPSHOT_SESSION_CACHE_PATH";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "redb file used to persist the session cache";

        fn parse(value: &str) -> EnvResult<String> {
            let path = value.trim();
            if path.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Path must not be empty".to_string(),
                });
            }
            Ok(shellexpand::tilde(path).into_owned())
        }
    }

    /// 网络请求超时
    pub struct Timeout;
    impl EnvVar<Duration> for Timeout {
        const NAME: &'static str = "DOM_SNAPSHOT_TIMEOUT";
        const DEFAULT: Option<Duration> = Some(Duration::from_secs(30));
        const DESCRIPTION: &'static str = "Network timeout in seconds";

        fn parse(value: &str) -> EnvResult<Duration> {
            parse_positive_usize(value, Self::NAME, 1, 3600).map(|secs| Duration::from_secs(secs as u64))
        }
    }

    /// 自定义 User-Agent
    pub struct UserAgent;
    impl EnvVar<String> for UserAgent {
        const NAME: &'static str = "DOM_SNAPSHOT_USER_AGENT";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "User-Agent header sent with every request";

        fn parse(value: &str) -> EnvResult<String> {
            Ok(value.trim().to_string())
        }
    }

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "DOM_SNAPSHOT_LOG_LEVEL";
        const DEFAULT: Option<String> = None;

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!("Invalid log level '{}'. Use: trace, debug, info, warn, error", value),
                }),
            }
        }
    }
}

/// 辅助函数
fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled", value),
        }),
    }
}

fn parse_positive_usize(value: &str, var_name: &str, min: usize, max: usize) -> EnvResult<usize> {
    let num: usize = value.trim().parse().map_err(|_| EnvError {
        variable: var_name.to_string(),
        message: "Must be a valid positive number".to_string(),
    })?;

    if num < min {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} is below minimum {}", num, min),
        });
    }

    if num > max {
        return Err(EnvError {
            variable: var_name.to_string(),
            message: format!("Value {} exceeds maximum {}", num, max),
        });
    }

    Ok(num)
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    let entries: [(&str, &str); 7] = [
        (snapshot::ShowLogs::NAME, snapshot::ShowLogs::DESCRIPTION),
        (snapshot::UseSessionCache::NAME, snapshot::UseSessionCache::DESCRIPTION),
        (snapshot::DontFetchResources::NAME, snapshot::DontFetchResources::DESCRIPTION),
        (snapshot::SessionCachePath::NAME, snapshot::SessionCachePath::DESCRIPTION),
        (snapshot::Timeout::NAME, snapshot::Timeout::DESCRIPTION),
        (snapshot::UserAgent::NAME, snapshot::UserAgent::DESCRIPTION),
        (snapshot::LogLevel::NAME, snapshot::LogLevel::DESCRIPTION),
    ];
    for (name, description) in entries {
        docs.push_str(&format!("- `{}`: {}\n", name, description));
    }

    docs
}
