//! Kernel configuration
//!
//! Every section has working defaults, so an empty TOML document (or no
//! config file at all) yields a usable kernel.

use crate::error::ConfigError;
use crate::observability::LogFormat;
use crate::phase::{Phase, TransitionPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FdirConfig {
    /// Phase state machine
    pub phase: PhaseConfig,
    /// Outcome logs
    pub log: LogConfig,
    /// Bounded execution guard
    pub guard: GuardConfig,
    /// Diagnostics output
    pub logging: LoggingConfig,
}

impl FdirConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML document
    ///
    /// # Errors
    /// [`ConfigError::Parse`] if the document is not valid for this schema.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// [`ConfigError::Read`] if the file cannot be read, otherwise as
    /// [`Self::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// With initial phase
    #[inline]
    #[must_use]
    pub fn with_initial_phase(mut self, phase: Phase) -> Self {
        self.phase.initial_phase = phase;
        self
    }

    /// With transition policy
    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: TransitionPolicy) -> Self {
        self.phase.policy = policy;
        self
    }

    /// With log directory; pending and processed logs keep their file names
    #[must_use]
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        self.log.pending_path = dir.join(file_name_or(&self.log.pending_path, PENDING_LOG));
        self.log.processed_path = dir.join(file_name_or(&self.log.processed_path, PROCESSED_LOG));
        self
    }
}

const PENDING_LOG: &str = "feedback_pending.json";
const PROCESSED_LOG: &str = "feedback_processed.json";

fn file_name_or(path: &Path, fallback: &str) -> PathBuf {
    path.file_name()
        .map_or_else(|| PathBuf::from(fallback), PathBuf::from)
}

/// Phase state machine settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Phase at start-up
    pub initial_phase: Phase,
    /// Compatibility rules for ordinary transitions
    pub policy: TransitionPolicy,
}

/// Outcome log locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Records awaiting human review
    pub pending_path: PathBuf,
    /// Records accepted by a reviewer
    pub processed_path: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            pending_path: PathBuf::from(PENDING_LOG),
            processed_path: PathBuf::from(PROCESSED_LOG),
        }
    }
}

/// Bounded execution guard settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Deadline used by `run_with_default_deadline`
    pub default_deadline_ms: u64,
    /// Time a cooperatively cancelled unit of work gets before it is aborted
    pub grace_period_ms: u64,
}

impl GuardConfig {
    /// Default deadline
    #[inline]
    #[must_use]
    pub fn default_deadline(&self) -> Duration {
        Duration::from_millis(self.default_deadline_ms)
    }

    /// Cooperative cancellation grace period
    #[inline]
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            default_deadline_ms: 30_000,
            grace_period_ms: 100,
        }
    }
}

/// Diagnostics output settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 0 warn, 1 info, 2 debug, 3+ trace
    pub verbosity: u8,
    /// Human or JSON lines
    pub format: LogFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        let config = FdirConfig::from_toml_str("").unwrap();
        assert_eq!(config, FdirConfig::default());
        assert_eq!(config.phase.initial_phase, Phase::NominalOps);
        assert_eq!(config.guard.default_deadline(), Duration::from_secs(30));
    }

    #[test]
    fn parses_all_sections() {
        let config = FdirConfig::from_toml_str(
            r#"
            [phase]
            initial_phase = "LAUNCH"
            policy = "mission_sequence"

            [log]
            pending_path = "/var/fdir/pending.json"

            [guard]
            default_deadline_ms = 500
            grace_period_ms = 20

            [logging]
            verbosity = 2
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.phase.initial_phase, Phase::Launch);
        assert_eq!(config.phase.policy, TransitionPolicy::MissionSequence);
        assert_eq!(config.log.pending_path, PathBuf::from("/var/fdir/pending.json"));
        assert_eq!(config.log.processed_path, PathBuf::from(PROCESSED_LOG));
        assert_eq!(config.guard.grace_period(), Duration::from_millis(20));
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn rejects_unknown_phase() {
        let err = FdirConfig::from_toml_str("[phase]\ninitial_phase = \"ORBIT\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn log_dir_keeps_file_names() {
        let config = FdirConfig::new().with_log_dir("/tmp/fdir");
        assert_eq!(config.log.pending_path, PathBuf::from("/tmp/fdir/feedback_pending.json"));
        assert_eq!(config.log.processed_path, PathBuf::from("/tmp/fdir/feedback_processed.json"));
    }
}
