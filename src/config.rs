//! Configuration types for nfs-stress
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - Runtime configuration with validation
//! - Coordinator endpoint parsing

use crate::error::ConfigError;
use crate::namespace::TreeShape;
use clap::Parser;
use regex::Regex;
use std::fmt;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

/// Maximum reasonable outstanding jobs per worker
const MAX_JOBS_PER_WORKER: usize = 10_000;

/// Tree shape limits
const MAX_TREE_DEPTH: usize = 6;
const MAX_TREE_WIDTH: usize = 1_000;
const MAX_TREE_DIRS: usize = 1_000_000;

/// Backoff limits in milliseconds
const MIN_BACKOFF_MS: u64 = 1;
const MAX_BACKOFF_MS: u64 = 60_000;

/// Regex for parsing endpoints
static ENDPOINT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // Matches: tcp://host:port, host:port, *:port, [v6]:port
    Regex::new(r"^(?:tcp://)?(\*|\[[0-9A-Fa-f:.]+\]|[A-Za-z0-9._-]+):(\d{1,5})$")
        .expect("Invalid endpoint regex")
});

/// Distributed filesystem stress test coordinator
#[derive(Parser, Debug, Clone)]
#[command(
    name = "nfs-stress",
    version,
    about = "Distributed filesystem stress test coordinator",
    long_about = "Hands out file operations to remote workers hammering a shared mount, \
                  keeps a shadow model of the namespace and verifies every reported outcome \
                  against it.\n\n\
                  Workers connect over TCP, send a hello line with their identity and then \
                  exchange newline-delimited JSON messages.",
    after_help = "EXAMPLES:\n    \
        nfs-stress --bind tcp://*:5555\n    \
        nfs-stress --bind 0.0.0.0:5555 --max-jobs 100000 -p\n    \
        nfs-stress --depth 2 --width 20 --files-per-dir 500 --seed 42\n    \
        nfs-stress --worker-timeout 0 --log-file run.log -v"
)]
pub struct CliArgs {
    /// Endpoint workers connect to (tcp://host:port, host:port or *:port)
    #[arg(short = 'b', long, default_value = "tcp://*:5555", value_name = "ENDPOINT")]
    pub bind: String,

    /// Levels of subdirectories below the top level
    #[arg(short = 'd', long, default_value = "1", value_name = "NUM")]
    pub depth: usize,

    /// Directories per level
    #[arg(short = 'w', long, default_value = "10", value_name = "NUM")]
    pub width: usize,

    /// File slots per directory
    #[arg(long, default_value = "1000", value_name = "NUM")]
    pub files_per_dir: usize,

    /// Directory entry size at which a directory is replaced by a fresh one (bytes)
    #[arg(long, default_value = "131072", value_name = "BYTES")]
    pub max_dir_size: u64,

    /// Number of new jobs to mint before the run ends
    #[arg(short = 'n', long, default_value = "10000", value_name = "NUM")]
    pub max_jobs: u64,

    /// Maximum outstanding jobs per worker
    #[arg(long, default_value = "50", value_name = "NUM")]
    pub max_jobs_per_worker: usize,

    /// Wait for a free worker before polling again (milliseconds)
    #[arg(long, default_value = "500", value_name = "MS")]
    pub backoff_ms: u64,

    /// Requeue jobs of workers silent for this long (seconds, 0 disables)
    #[arg(long, default_value = "120", value_name = "SECS")]
    pub worker_timeout: u64,

    /// Seed for the tree names and the workload (random if not set)
    #[arg(long, value_name = "NUM")]
    pub seed: Option<u64>,

    /// Interval between statistics reports (seconds, 0 disables)
    #[arg(long, default_value = "60", value_name = "SECS")]
    pub stats_interval: u64,

    /// Show a progress spinner
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (debug-level verdicts)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Also write debug logs to this file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Parsed coordinator endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname, IP address or `*` for all interfaces
    pub host: String,

    pub port: u16,
}

impl Endpoint {
    /// Parse an endpoint string
    ///
    /// Accepts formats:
    /// - tcp://host:port
    /// - tcp://*:port
    /// - host:port
    /// - [::1]:port
    pub fn parse(endpoint: &str) -> Result<Self, ConfigError> {
        let trimmed = endpoint.trim();
        let invalid = |reason: &str| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if let Some(scheme) = trimmed.split_once("://").map(|(s, _)| s) {
            if scheme != "tcp" {
                return Err(invalid("only the tcp:// scheme is supported"));
            }
        }

        let caps = ENDPOINT_REGEX
            .captures(trimmed)
            .ok_or_else(|| invalid("expected tcp://host:port, host:port or *:port"))?;

        let host = caps
            .get(1)
            .ok_or_else(|| invalid("missing host"))?
            .as_str()
            .to_string();
        let port = caps
            .get(2)
            .ok_or_else(|| invalid("missing port"))?
            .as_str()
            .parse::<u16>()
            .map_err(|_| invalid("port out of range"))?;

        Ok(Self { host, port })
    }

    /// Address to bind, with `*` meaning every interface
    pub fn bind_addr(&self) -> String {
        if self.host == "*" {
            format!("0.0.0.0:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Address a worker would connect to
    pub fn connect_addr(&self) -> String {
        if self.host == "*" {
            format!("127.0.0.1:{}", self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Endpoint to bind
    pub endpoint: Endpoint,

    /// Initial namespace tree
    pub tree: TreeShape,

    /// Tracked directory size at which the directory is retired
    pub max_dir_size: u64,

    /// Newly minted jobs before the source is exhausted
    pub max_jobs: u64,

    /// Outstanding jobs per worker
    pub max_jobs_per_worker: usize,

    /// Bounded wait when no worker is free
    pub backoff: Duration,

    /// Silence after which a busy worker is reaped (`None` disables)
    pub worker_timeout: Option<Duration>,

    /// Seed for names and workload
    pub seed: Option<u64>,

    /// Statistics report interval (`None` disables)
    pub stats_interval: Option<Duration>,

    /// Show progress indicator
    pub show_progress: bool,

    /// Verbose logging
    pub verbose: bool,

    /// Debug log file
    pub log_file: Option<PathBuf>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint {
                host: "*".to_string(),
                port: 5555,
            },
            tree: TreeShape::default(),
            max_dir_size: 128 * 1024,
            max_jobs: 10_000,
            max_jobs_per_worker: 50,
            backoff: Duration::from_millis(500),
            worker_timeout: Some(Duration::from_secs(120)),
            seed: None,
            stats_interval: Some(Duration::from_secs(60)),
            show_progress: false,
            verbose: false,
            log_file: None,
        }
    }
}

impl ControllerConfig {
    /// Create and validate configuration from CLI arguments
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let endpoint = Endpoint::parse(&args.bind)?;

        let tree = TreeShape {
            depth: args.depth,
            width: args.width,
            files_per_dir: args.files_per_dir,
        };
        validate_tree(&tree)?;

        if args.max_jobs_per_worker == 0 || args.max_jobs_per_worker > MAX_JOBS_PER_WORKER {
            return Err(ConfigError::InvalidJobCap {
                count: args.max_jobs_per_worker,
                max: MAX_JOBS_PER_WORKER,
            });
        }

        if !(MIN_BACKOFF_MS..=MAX_BACKOFF_MS).contains(&args.backoff_ms) {
            return Err(ConfigError::OutOfRange {
                name: "backoff-ms",
                value: args.backoff_ms,
                reason: format!("must be between {} and {}", MIN_BACKOFF_MS, MAX_BACKOFF_MS),
            });
        }

        if args.max_dir_size == 0 {
            return Err(ConfigError::OutOfRange {
                name: "max-dir-size",
                value: 0,
                reason: "must be positive".to_string(),
            });
        }

        Ok(Self {
            endpoint,
            tree,
            max_dir_size: args.max_dir_size,
            max_jobs: args.max_jobs,
            max_jobs_per_worker: args.max_jobs_per_worker,
            backoff: Duration::from_millis(args.backoff_ms),
            worker_timeout: seconds(args.worker_timeout),
            seed: args.seed,
            stats_interval: seconds(args.stats_interval),
            show_progress: args.progress,
            verbose: args.verbose,
            log_file: args.log_file,
        })
    }
}

fn validate_tree(tree: &TreeShape) -> Result<(), ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidTreeShape {
        depth: tree.depth,
        width: tree.width,
        reason,
    };

    if tree.width == 0 || tree.width > MAX_TREE_WIDTH {
        return Err(invalid(format!("width must be between 1 and {}", MAX_TREE_WIDTH)));
    }
    if tree.depth > MAX_TREE_DEPTH {
        return Err(invalid(format!("depth must be at most {}", MAX_TREE_DEPTH)));
    }
    if tree.dir_count() > MAX_TREE_DIRS {
        return Err(invalid(format!(
            "{} directories exceeds the limit of {}",
            tree.dir_count(),
            MAX_TREE_DIRS
        )));
    }
    if tree.files_per_dir == 0 {
        return Err(invalid("files per directory must be positive".to_string()));
    }
    Ok(())
}

/// Zero seconds disables the feature
fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
