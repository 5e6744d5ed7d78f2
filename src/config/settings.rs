//! Configuration settings for Blobshare
//!
//! Defines the CLI arguments, their environment fallbacks and the runtime
//! configuration they resolve into.

use crate::error::{MirrorError, Result};
use crate::storage::{local, WriteOptions, DEFAULT_CACHE_CONTROL};
use crate::sync::NameNormalizer;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Blobshare - Mirror an object container into a file share
#[derive(Parser, Debug, Clone)]
#[command(name = "blobshare")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "One-way mirror of an object container into a file share")]
#[command(long_about = r#"
Blobshare copies every object of a source container into a destination share,
overwriting existing files, then deletes every share file that has no
source object of the same name.

Any failure aborts the run with a single error message and exit code 1.

Examples:
  CONTAINER_NAME=/data/export SHARE_NAME=/mnt/share blobshare
  blobshare --backend s3 --container bucket/prefix --share /mnt/share
  blobshare --container ./src --share ./dst --prune-scope recursive -p
"#)]
pub struct CliArgs {
    /// Account name (S3 access key id)
    #[arg(long, env = "ACCOUNT_NAME", value_name = "NAME")]
    pub account_name: Option<String>,

    /// Account key (S3 secret access key)
    #[arg(long, env = "ACCOUNT_KEY", value_name = "KEY", hide_env_values = true)]
    pub account_key: Option<String>,

    /// Source container (directory, or bucket[/prefix] for S3)
    #[arg(long, env = "CONTAINER_NAME", value_name = "CONTAINER")]
    pub container: Option<String>,

    /// Destination share (mounted directory)
    #[arg(long, env = "SHARE_NAME", value_name = "SHARE")]
    pub share: Option<PathBuf>,

    /// Source store backend
    #[arg(long, env = "MIRROR_BACKEND", value_enum, default_value = "local")]
    pub backend: Backend,

    /// Which destination entries are candidates for deletion
    #[arg(long, value_enum, default_value = "root")]
    pub prune_scope: PruneScope,

    /// How object content moves between the stores
    #[arg(long, value_enum, default_value = "streaming")]
    pub strategy: TransferStrategy,

    /// Chunk writes kept in flight per destination file
    #[arg(long, default_value = "3", value_name = "NUM")]
    pub parallelism: usize,

    /// Chunk size for destination writes (e.g., 4M, 512K)
    #[arg(long, default_value = "4M", value_name = "SIZE")]
    pub chunk_size: String,

    /// Entries requested per listing page
    #[arg(long, default_value_t = local::DEFAULT_PAGE_SIZE, value_name = "NUM")]
    pub page_size: usize,

    /// Compare names case-insensitively when pruning
    #[arg(long)]
    pub case_insensitive: bool,

    /// Cache-control value stored with each written file
    #[arg(long, default_value = DEFAULT_CACHE_CONTROL, value_name = "VALUE")]
    pub cache_control: String,

    /// Metadata stored with each written file (repeatable)
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,

    /// Store cache-control and metadata as extended attributes (unix)
    #[arg(long)]
    pub persist_attributes: bool,

    /// Region for S3 sources
    #[arg(long, env = "AWS_REGION", value_name = "REGION")]
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible sources
    #[arg(long, value_name = "URL")]
    pub endpoint: Option<String>,

    /// Show progress bars
    #[arg(short = 'p', long)]
    pub progress: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress progress lines)
    #[arg(short = 'q', long, conflicts_with = "progress")]
    pub quiet: bool,

    /// Output format for the final report
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

/// Source store backend
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Local directory treated as an object container
    #[default]
    Local,
    /// S3 bucket (requires the `native_s3` feature)
    S3,
}

/// Destination entries considered for deletion
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PruneScope {
    /// Files directly in the share root
    #[default]
    Root,
    /// Files at any depth
    Recursive,
}

/// How object content moves from source to destination
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransferStrategy {
    /// Hand the source stream straight to the destination write
    #[default]
    Streaming,
    /// Read the whole object into memory first
    Buffered,
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Account identity for remote sources
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Account name or access key id
    pub account_name: Option<String>,
    /// Account key or secret access key
    pub account_key: Option<String>,
}

impl Credentials {
    /// Both halves of the identity, if present
    pub fn pair(&self) -> Option<(&str, &str)> {
        match (&self.account_name, &self.account_key) {
            (Some(name), Some(key)) => Some((name, key)),
            _ => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account_name", &self.account_name)
            .field("account_key", &self.account_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Behavior of a mirror run, independent of which stores it runs against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOptions {
    /// Prune scope
    pub prune_scope: PruneScope,
    /// Transfer strategy
    pub strategy: TransferStrategy,
    /// Name comparison rules
    pub normalizer: NameNormalizer,
    /// Attributes and tuning for destination writes
    pub write: WriteOptions,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            prune_scope: PruneScope::Root,
            strategy: TransferStrategy::Streaming,
            normalizer: NameNormalizer::default(),
            write: WriteOptions::default(),
        }
    }
}

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Source backend
    pub backend: Backend,
    /// Account identity
    pub credentials: Credentials,
    /// Source container
    pub container: String,
    /// Destination share root
    pub share: PathBuf,
    /// S3 region
    pub region: Option<String>,
    /// S3 endpoint override
    pub endpoint: Option<String>,
    /// Entries per listing page
    pub page_size: usize,
    /// Persist write attributes as xattrs
    pub persist_attributes: bool,
    /// Run behavior
    pub options: MirrorOptions,
}

/// Largest accepted `--chunk-size`
pub const MAX_CHUNK_SIZE: u64 = 256 * 1024 * 1024;

impl MirrorConfig {
    /// Create config from CLI arguments.
    ///
    /// Every missing input is reported here, before any store is touched.
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let container = args
            .container
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| MirrorError::config("CONTAINER_NAME is not set"))?;
        let share = args
            .share
            .as_ref()
            .filter(|s| !s.as_os_str().is_empty())
            .ok_or_else(|| MirrorError::config("SHARE_NAME is not set"))?;

        let credentials = Credentials {
            account_name: args.account_name.clone().filter(|s| !s.is_empty()),
            account_key: args.account_key.clone().filter(|s| !s.is_empty()),
        };
        if args.backend == Backend::S3 {
            if credentials.account_name.is_none() {
                return Err(MirrorError::config("ACCOUNT_NAME is not set"));
            }
            if credentials.account_key.is_none() {
                return Err(MirrorError::config("ACCOUNT_KEY is not set"));
            }
        }

        if args.parallelism == 0 {
            return Err(MirrorError::config("parallelism must be at least 1"));
        }
        if args.page_size == 0 {
            return Err(MirrorError::config("page size must be at least 1"));
        }
        let chunk_size = parse_size(&args.chunk_size)
            .map_err(|e| MirrorError::config(format!("Invalid chunk size: {}", e)))?;
        if chunk_size == 0 {
            return Err(MirrorError::config("chunk size must be at least 1 byte"));
        }
        if chunk_size > MAX_CHUNK_SIZE {
            return Err(MirrorError::config(format!(
                "chunk size must be at most {}",
                humansize::format_size(MAX_CHUNK_SIZE, humansize::BINARY)
            )));
        }

        let cache_control = Some(args.cache_control.clone()).filter(|c| !c.is_empty());
        let metadata: BTreeMap<String, String> = args.metadata.iter().cloned().collect();

        Ok(Self {
            backend: args.backend,
            credentials,
            container: container.to_string(),
            share: share.clone(),
            region: args.region.clone(),
            endpoint: args.endpoint.clone(),
            page_size: args.page_size,
            persist_attributes: args.persist_attributes,
            options: MirrorOptions {
                prune_scope: args.prune_scope,
                strategy: args.strategy,
                normalizer: NameNormalizer::new(args.case_insensitive),
                write: WriteOptions {
                    cache_control,
                    metadata,
                    parallelism: args.parallelism,
                    chunk_size: chunk_size as usize,
                },
            },
        })
    }
}

/// Parse a `KEY=VALUE` pair
fn parse_key_value(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("GB") || size.ends_with('G') {
        (size.trim_end_matches(|c| c == 'G' || c == 'B'), 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        (size.trim_end_matches(|c| c == 'M' || c == 'B'), 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        (size.trim_end_matches(|c| c == 'K' || c == 'B'), 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        // Plain bytes
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if !num.is_finite() {
        return Err(format!("Invalid number: {}", num_str));
    }
    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}
