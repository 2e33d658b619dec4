//! Configuration types for postie

use crate::types::{ObfuscationPolicy, Priority};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Top-level configuration tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Configured NNTP providers
    pub servers: Vec<ServerConfig>,
    /// Posting pipeline tuning
    #[serde(default)]
    pub posting: PostingConfig,
    /// Post-check (propagation verification) settings
    #[serde(default)]
    pub post_check: PostCheckConfig,
    /// PAR2 recovery file generation
    #[serde(default)]
    pub par2: Par2Config,
    /// Filesystem watch folder settings
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Durable queue settings
    #[serde(default)]
    pub queue: QueueConfig,
    /// Directory NZBs and moved source files are written to
    pub output_dir: PathBuf,
}

/// A single NNTP provider.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP
    pub host: String,
    /// Port
    pub port: u16,
    /// Username, if the provider requires auth
    #[serde(default)]
    pub username: Option<String>,
    /// Password, if the provider requires auth
    #[serde(default)]
    pub password: Option<String>,
    /// Whether to connect over TLS
    #[serde(default)]
    pub ssl: bool,
    /// Accept invalid/self-signed TLS certificates
    #[serde(default)]
    pub insecure_ssl: bool,
    /// Maximum concurrent connections to this provider
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Idle connection timeout
    #[serde(default = "default_idle_timeout_s")]
    pub idle_timeout_s: u64,
    /// Connection time-to-live before forced recycle
    #[serde(default = "default_ttl_s")]
    pub ttl_s: u64,
    /// Whether this provider participates at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether this provider accepts POST
    #[serde(default = "default_true")]
    pub post: bool,
    /// Whether this provider is check-only (used for post-check STAT/HEAD)
    #[serde(default)]
    pub check_only: bool,
}

impl From<ServerConfig> for nntp_rs::ServerConfig {
    fn from(config: ServerConfig) -> Self {
        nntp_rs::ServerConfig {
            host: config.host,
            port: config.port,
            tls: config.ssl,
            allow_insecure_tls: config.insecure_ssl,
            username: config.username.unwrap_or_default(),
            password: config.password.unwrap_or_default(),
        }
    }
}

/// Posting pipeline behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostingConfig {
    /// Size of each segment/article, in bytes
    #[serde(default = "default_article_size_bytes")]
    pub article_size_bytes: u64,
    /// Newsgroups articles are posted to
    #[serde(default)]
    pub groups: Vec<String>,
    /// Maximum local retries per article before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay before the first retry
    #[serde(default = "default_retry_delay", with = "duration_secs")]
    pub retry_delay: Duration,
    /// Obfuscation policy applied to data file articles
    #[serde(default)]
    pub obfuscation_policy: ObfuscationPolicy,
    /// Obfuscation policy applied to PAR2 file articles
    #[serde(default)]
    pub par2_obfuscation_policy: ObfuscationPolicy,
    /// Default `From` header when not obfuscating the poster
    pub default_from: String,
    /// Domain used for generated message-ids
    pub message_id_domain: String,
    /// Upload rate limit in bytes/sec; 0 = unlimited
    #[serde(default)]
    pub throttle_bytes_per_sec: u64,
    /// Keep partial results (write NZB even if some files failed)
    #[serde(default)]
    pub maintain_partial: bool,
    /// Number of Stage P2 encoder workers; 0 = number of cores
    #[serde(default)]
    pub encoder_workers: usize,
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            article_size_bytes: default_article_size_bytes(),
            groups: Vec::new(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            obfuscation_policy: ObfuscationPolicy::default(),
            par2_obfuscation_policy: ObfuscationPolicy::default(),
            default_from: String::new(),
            message_id_domain: String::new(),
            throttle_bytes_per_sec: 0,
            maintain_partial: false,
            encoder_workers: 0,
        }
    }
}

/// Post-check (propagation verification) settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostCheckConfig {
    /// Whether post-check is enabled
    #[serde(default)]
    pub enabled: bool,
    /// Delay after posting before the first check
    #[serde(default = "default_post_check_delay", with = "duration_secs")]
    pub delay: Duration,
    /// Maximum reposts of a missing article before giving up
    #[serde(default = "default_max_reposts")]
    pub max_reposts: u32,
}

impl Default for PostCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            delay: default_post_check_delay(),
            max_reposts: default_max_reposts(),
        }
    }
}

/// PAR2 recovery file generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Par2Config {
    /// Whether to generate PAR2 recovery files before posting
    #[serde(default)]
    pub enabled: bool,
    /// Path to the `par2` or `parpar` binary; basename selects the invocation style
    #[serde(default)]
    pub par2_path: Option<PathBuf>,
    /// Redundancy, passed through verbatim to the binary (percent or volume count)
    #[serde(default)]
    pub redundancy: String,
    /// Volume size in bytes (maps to `-n`/`--max-input-slices`)
    #[serde(default)]
    pub volume_size_bytes: u64,
    /// Maximum input slices (parpar)
    #[serde(default)]
    pub max_input_slices: u32,
    /// Additional flags passed through verbatim
    #[serde(default)]
    pub extra_options: Vec<String>,
}

impl Default for Par2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            par2_path: None,
            redundancy: String::new(),
            volume_size_bytes: 0,
            max_input_slices: 0,
            extra_options: Vec::new(),
        }
    }
}

/// Filesystem watch-folder settings for the `postie watch` subcommand.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Whether the watcher is active
    #[serde(default)]
    pub enabled: bool,
    /// Directory watched for new files
    #[serde(default)]
    pub dir: PathBuf,
    /// Files below this size are ignored (still being written)
    #[serde(default)]
    pub min_file_size_bytes: u64,
    /// Files at or above this size are queued eagerly rather than waiting for quiescence
    #[serde(default)]
    pub size_threshold_bytes: u64,
    /// Interval between directory scans
    #[serde(default = "default_watch_interval", with = "duration_secs")]
    pub check_interval: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::new(),
            min_file_size_bytes: 0,
            size_threshold_bytes: 0,
            check_interval: default_watch_interval(),
        }
    }
}

/// Durable queue settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// SQLite database path
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Visibility lease duration for a popped item, in milliseconds
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Receive-count threshold beyond which an item auto-moves to `errored_items`
    #[serde(default = "default_max_receives")]
    pub max_receives: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            lease_ms: default_lease_ms(),
            max_receives: default_max_receives(),
        }
    }
}

/// Priority and path bundle used when pushing a new job onto the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRequest {
    /// Source paths (files or directories) for this job
    pub paths: Vec<PathBuf>,
    /// Scheduling priority; higher pops first
    #[serde(default)]
    pub priority: Priority,
}

fn default_max_connections() -> u32 {
    10
}
fn default_idle_timeout_s() -> u64 {
    300
}
fn default_ttl_s() -> u64 {
    3600
}
fn default_true() -> bool {
    true
}
fn default_article_size_bytes() -> u64 {
    750_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_secs(5)
}
fn default_post_check_delay() -> Duration {
    Duration::from_secs(10)
}
fn default_max_reposts() -> u32 {
    1
}
fn default_watch_interval() -> Duration {
    Duration::from_secs(5)
}
fn default_db_path() -> PathBuf {
    PathBuf::from("postie.db")
}
fn default_lease_ms() -> u64 {
    60_000
}
fn default_max_receives() -> u32 {
    3
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
