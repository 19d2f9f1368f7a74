use crate::common::constants::{
    DEFAULT_CGI_TIMEOUT_SECS, DEFAULT_CLIENT_TIMEOUT_SECS, DEFAULT_GRACE_PERIOD_MS,
    DEFAULT_LISTEN, DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_OUTPUT_SIZE,
    DEFAULT_QUEUE_DEPTH, DEFAULT_SAFE_PATH, DEFAULT_SERVER_NAME,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    pub gateway: GatewayConfig,

    /// URL prefix -> script directory mappings
    #[serde(default)]
    pub scripts: Vec<ScriptDirConfig>,
}

/// Client-facing listener settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Exported to programs as SERVER_NAME
    #[serde(default = "default_server_name")]
    pub server_name: String,

    /// Read timeout while receiving the request
    #[serde(default = "default_client_timeout")]
    pub client_timeout_secs: u64,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

/// What happens to requests beyond `max_concurrency`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverloadPolicy {
    /// Wait in a bounded FIFO queue
    Queue,
    /// Answer 503 immediately
    Reject,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    pub document_root: PathBuf,

    /// Per-invocation wall-clock budget
    #[serde(default = "default_cgi_timeout")]
    pub timeout_secs: u64,

    /// Delay between SIGTERM and SIGKILL once the deadline fires
    #[serde(default = "default_grace_period")]
    pub grace_period_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_overload")]
    pub overload: OverloadPolicy,

    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// PATH handed to programs
    #[serde(default = "default_safe_path")]
    pub safe_path: String,

    /// Most bytes a program may write to stdout before it is killed
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptDirConfig {
    /// URL prefix, e.g. "/cgi-bin"
    pub prefix: String,

    /// Relative to the document root unless absolute
    pub directory: PathBuf,

    /// Overrides the gateway-wide timeout for this mapping
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Extension (with leading '.') -> interpreter path
    #[serde(default)]
    pub interpreters: BTreeMap<String, PathBuf>,
}

impl GatewayConfig {
    pub fn new(document_root: PathBuf) -> Self {
        Self {
            document_root,
            timeout_secs: default_cgi_timeout(),
            grace_period_ms: default_grace_period(),
            max_concurrency: default_max_concurrency(),
            overload: default_overload(),
            queue_depth: default_queue_depth(),
            safe_path: default_safe_path(),
            max_output_size: default_max_output_size(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl ScriptDirConfig {
    pub fn new(prefix: &str, directory: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.to_string(),
            directory: directory.into(),
            timeout_secs: None,
            interpreters: BTreeMap::new(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            server_name: default_server_name(),
            client_timeout_secs: default_client_timeout(),
            max_body_size: default_max_body_size(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("."))
    }
}

fn default_listen() -> SocketAddr {
    DEFAULT_LISTEN
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 8080)))
}

fn default_server_name() -> String {
    DEFAULT_SERVER_NAME.to_string()
}

fn default_client_timeout() -> u64 {
    DEFAULT_CLIENT_TIMEOUT_SECS
}

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_cgi_timeout() -> u64 {
    DEFAULT_CGI_TIMEOUT_SECS
}

fn default_grace_period() -> u64 {
    DEFAULT_GRACE_PERIOD_MS
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_overload() -> OverloadPolicy {
    OverloadPolicy::Queue
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_safe_path() -> String {
    DEFAULT_SAFE_PATH.to_string()
}

fn default_max_output_size() -> usize {
    DEFAULT_MAX_OUTPUT_SIZE
}
