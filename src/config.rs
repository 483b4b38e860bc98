//! Configuration management for the throttling suite.
//!
//! A configuration lists controller instances in evaluation order. Each
//! instance names its algorithm, its rate budget and the scope rules that
//! select the requests it applies to:
//!
//! ```yaml
//! enabled: true
//! log_only: false
//! concurrency_model: pessimistic
//! instances:
//!   - name: api
//!     algorithm: shortAverage
//!     time_interval_msec: 1000
//!     max_threshold: 5
//!     scope:
//!       - path: /api
//!       - path: /api/health
//!         action: exclude
//!       - path_regex: "^api/v\\d+/upload"
//!         condition: [post, put]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, ThrottleError};
use crate::ratelimit::{Algorithm, ConcurrencyModel, Limits, DEFAULT_CLEANUP_INTERVAL};
use crate::scope::{ConditionMask, Scope, ScopeItem, ScopePattern};

/// Shortest suite-wide cleanup period accepted (1 minute).
pub const MIN_CLEANUP_INTERVAL_MSEC: u64 = 60_000;
/// Longest suite-wide cleanup period accepted (10 minutes).
pub const MAX_CLEANUP_INTERVAL_MSEC: u64 = 600_000;

/// Main configuration for a throttling suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Whether requests are evaluated at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Evaluate and record every request, but never block
    #[serde(default)]
    pub log_only: bool,

    /// Update discipline applied to every controller
    #[serde(default)]
    pub concurrency_model: ConcurrencyModel,

    /// Suite-wide cleanup period in milliseconds
    #[serde(default = "default_cleanup_interval_msec")]
    pub cleanup_interval_msec: u64,

    /// Controller instances, in evaluation order
    #[serde(default)]
    pub instances: Vec<InstanceConfig>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            log_only: false,
            concurrency_model: ConcurrencyModel::default(),
            cleanup_interval_msec: default_cleanup_interval_msec(),
            instances: Vec::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_cleanup_interval_msec() -> u64 {
    DEFAULT_CLEANUP_INTERVAL.as_millis() as u64
}

/// Configuration for one controller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Unique instance name
    pub name: String,

    /// Rate-limiting algorithm
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Window length; `-1` with `max_threshold: -1` disables limiting,
    /// `0` with `max_threshold: 0` blocks everything
    pub time_interval_msec: i64,

    /// Calls allowed per window
    pub max_threshold: i64,

    /// Cleanup period for this instance; `0` means the default
    #[serde(default)]
    pub cleanup_interval_msec: Option<u64>,

    /// Scope rules, applied in order
    #[serde(default)]
    pub scope: Vec<ScopeItemConfig>,
}

/// Configuration for one scope rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeItemConfig {
    /// Literal path prefix, or `*` for every path
    #[serde(default)]
    pub path: Option<String>,

    /// Regular expression over the virtual path
    #[serde(default)]
    pub path_regex: Option<String>,

    /// What the rule does
    #[serde(default)]
    pub action: ScopeAction,

    /// Conditions the request must meet for the rule to apply
    #[serde(default)]
    pub condition: Vec<ConditionFlag>,
}

/// What a scope rule does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeAction {
    #[default]
    Include,
    Exclude,
    /// Drop the rules accumulated so far
    Clear,
}

/// Condition names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionFlag {
    #[serde(alias = "hasSessionId")]
    HasTracking,
    #[serde(alias = "noSessionId", alias = "hasNoTracking")]
    NoTracking,
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Trace,
    Options,
    Head,
}

impl From<ConditionFlag> for ConditionMask {
    fn from(flag: ConditionFlag) -> Self {
        match flag {
            ConditionFlag::HasTracking => ConditionMask::HAS_TRACKING,
            ConditionFlag::NoTracking => ConditionMask::NO_TRACKING,
            ConditionFlag::Get => ConditionMask::GET,
            ConditionFlag::Post => ConditionMask::POST,
            ConditionFlag::Put => ConditionMask::PUT,
            ConditionFlag::Delete => ConditionMask::DELETE,
            ConditionFlag::Patch => ConditionMask::PATCH,
            ConditionFlag::Trace => ConditionMask::TRACE,
            ConditionFlag::Options => ConditionMask::OPTIONS,
            ConditionFlag::Head => ConditionMask::HEAD,
        }
    }
}

impl SuiteConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttling configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ThrottleError::Config(format!("Failed to parse throttling config: {}", e)))
    }

    /// Load a configuration file, then apply `THROTTLE_*` environment overrides
    /// (for example `THROTTLE_LOG_ONLY=true`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading layered throttling configuration");

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("THROTTLE").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Suite-wide cleanup period, clamped to one to ten minutes.
    pub fn cleanup_interval(&self) -> Duration {
        let msec = self
            .cleanup_interval_msec
            .clamp(MIN_CLEANUP_INTERVAL_MSEC, MAX_CLEANUP_INTERVAL_MSEC);
        Duration::from_millis(msec)
    }
}

impl InstanceConfig {
    /// Validated rate budget of this instance.
    pub fn limits(&self) -> Result<Limits> {
        Limits::new(self.time_interval_msec, self.max_threshold)
    }

    /// Cleanup period for this instance, falling back to `default`.
    pub fn cleanup_interval(&self, default: Duration) -> Duration {
        match self.cleanup_interval_msec {
            Some(msec) if msec > 0 => Duration::from_millis(msec),
            _ => default,
        }
    }

    /// Build the scope described by the rules, in order.
    pub fn build_scope(&self) -> Result<Scope> {
        let mut scope = Scope::new();
        for rule in &self.scope {
            if rule.action == ScopeAction::Clear {
                scope.clear();
                continue;
            }

            let pattern = match (&rule.path, &rule.path_regex) {
                (Some(path), _) => ScopePattern::path(path)?,
                (None, Some(regex)) => ScopePattern::regex(regex)?,
                (None, None) => return Err(ThrottleError::MissingPattern),
            };
            let condition: ConditionMask =
                rule.condition.iter().copied().map(ConditionMask::from).collect();
            let include = rule.action == ScopeAction::Include;

            scope.push(ScopeItem::new(pattern, include, condition));
        }
        Ok(scope)
    }
}
