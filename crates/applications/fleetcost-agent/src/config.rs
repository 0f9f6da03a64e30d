//! Agent configuration
//!
//! The CLI (see `main.rs`) parses flags and environment variables into an
//! [`AgentConfig`]. This module holds the value types and parsers that do not
//! depend on clap.

use crate::error::{AgentError, Result};
use fleetcost_core::ClusterReconciler;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default price table location
pub const DEFAULT_PRICES: &str = "s3://infra-accountant/aws-instance-prices.json";

/// Default poll interval
pub const DEFAULT_POLL_INTERVAL: &str = "5s";

/// Default number of poll ticks per cost pass
pub const DEFAULT_COST_EVERY: u64 = 10;

/// Default HTTP request timeout
pub const DEFAULT_HTTP_TIMEOUT: &str = "10s";

/// Default port the push listener binds inside its container
pub const DEFAULT_LISTEN_PORT: u16 = 80;

/// A local file or an S3 object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// `s3://bucket/key`
    S3 {
        /// Bucket name
        bucket: String,
        /// Object key
        key: String,
    },

    /// Local filesystem path
    File(PathBuf),
}

impl FromStr for Location {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        let Some(rest) = s.strip_prefix("s3://") else {
            if s.is_empty() {
                return Err(AgentError::config("empty location"));
            }
            return Ok(Self::File(PathBuf::from(s)));
        };

        match rest.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self::S3 {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => Err(AgentError::config(format!(
                "S3 location must look like s3://bucket/key, got {}",
                s
            ))),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S3 { bucket, key } => write!(f, "s3://{}/{}", bucket, key),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl Location {
    /// Whether this location needs an S3 client
    pub fn is_s3(&self) -> bool {
        matches!(self, Self::S3 { .. })
    }
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or `<n>h`; a bare number means seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);

    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;

    let secs_per_unit = match unit {
        "ms" => return positive(Duration::from_millis(n), s),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        other => return Err(format!("unknown duration unit {:?} in {:?}", other, s)),
    };
    let secs = n
        .checked_mul(secs_per_unit)
        .ok_or_else(|| format!("duration {:?} is too large", s))?;

    positive(Duration::from_secs(secs), s)
}

fn positive(duration: Duration, s: &str) -> std::result::Result<Duration, String> {
    if duration.is_zero() {
        return Err(format!("duration must be positive, got {:?}", s));
    }

    Ok(duration)
}

/// Accept `host:port` or a full URL; strip any trailing slash
pub fn normalize_base_url(s: &str) -> String {
    let s = s.trim().trim_end_matches('/');
    if s.starts_with("http://") || s.starts_with("https://") {
        s.to_string()
    } else {
        format!("http://{}", s)
    }
}

/// Push-event listener settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Host the orchestrator should call back
    pub host: String,

    /// Port bound locally
    pub listen_port: u16,

    /// Port the orchestrator calls (differs from `listen_port` behind port mapping)
    pub external_port: u16,
}

/// Everything the driver needs
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Marathon base URL
    pub marathon_url: String,

    /// Mesos master base URL
    pub mesos_url: String,

    /// Billing watermark location
    pub checkpoint: Location,

    /// Price table location
    pub prices: Location,

    /// Time between polls
    pub poll_interval: Duration,

    /// Run a cost pass every n-th poll
    pub cost_every: u64,

    /// Emit one gauge per task
    pub log_tasks: bool,

    /// Prefix stripped from instance types
    pub instance_type_prefix: String,

    /// Host attribute carrying the instance type
    pub instance_type_attribute: String,

    /// HTTP request timeout
    pub http_timeout: Duration,

    /// AWS region for S3
    pub region: String,

    /// Push listener, if enabled
    pub listener: Option<ListenerConfig>,
}

impl AgentConfig {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.cost_every == 0 {
            return Err(AgentError::config("cost-every must be at least 1"));
        }
        if self.marathon_url.is_empty() || self.mesos_url.is_empty() {
            return Err(AgentError::config("both marathon and mesos URLs are required"));
        }
        Ok(())
    }

    /// Reconciler using the configured instance-type convention
    pub fn reconciler(&self) -> ClusterReconciler {
        ClusterReconciler::new()
            .with_prefix(&self.instance_type_prefix)
            .with_attribute(&self.instance_type_attribute)
    }

    /// Whether any configured location lives in S3
    pub fn needs_s3(&self) -> bool {
        self.checkpoint.is_s3() || self.prices.is_s3()
    }
}
