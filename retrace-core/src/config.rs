//! Configuration types for retrace

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::context::ReplayPolicy;

/// Main configuration for retrace
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetraceConfig {
    /// Span recording configuration
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Replay configuration
    #[serde(default)]
    pub replay: ReplayConfig,

    /// Run/span storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Diff engine configuration
    #[serde(default)]
    pub diff: DiffConfig,
}

/// Controls what the instrumentation wrappers record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Append spans to the recorder. Stub substitution happens either way.
    pub enabled: bool,

    /// Take before/after state snapshots in node spans
    pub snapshot_states: bool,

    /// Attach a content-addressed artifact descriptor to payloads larger than this
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_threshold_bytes: Option<usize>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snapshot_states: true,
            artifact_threshold_bytes: None,
        }
    }
}

/// Replay configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReplayConfig {
    /// Policy used for runs that do not request one
    #[serde(default)]
    pub default_policy: ReplayPolicy,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the JSON-lines run store
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/retrace"),
        }
    }
}

/// Diff engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Nesting depth beyond which a field patch is abandoned (and reported empty)
    #[serde(default = "default_max_patch_depth")]
    pub max_patch_depth: usize,
}

fn default_max_patch_depth() -> usize {
    128
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_patch_depth: default_max_patch_depth(),
        }
    }
}

/// Builder for RetraceConfig
pub struct ConfigBuilder {
    config: RetraceConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: RetraceConfig::default(),
        }
    }

    /// Set recording configuration
    pub fn recording(mut self, config: RecordingConfig) -> Self {
        self.config.recording = config;
        self
    }

    /// Set replay configuration
    pub fn replay(mut self, config: ReplayConfig) -> Self {
        self.config.replay = config;
        self
    }

    /// Set storage configuration
    pub fn storage(mut self, config: StorageConfig) -> Self {
        self.config.storage = config;
        self
    }

    /// Set diff configuration
    pub fn diff(mut self, config: DiffConfig) -> Self {
        self.config.diff = config;
        self
    }

    /// Build the configuration
    pub fn build(self) -> RetraceConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetraceConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `retrace.toml` in the working directory
    /// 3. The file named by `RETRACE_CONFIG_PATH`, if set
    /// 4. `RETRACE_` environment variables (`RETRACE_DIFF__MAX_PATCH_DEPTH=64`)
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration source is invalid.
    pub fn load() -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(RetraceConfig::default()))
            .merge(Toml::file("retrace.toml"));

        if let Ok(path) = std::env::var("RETRACE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: RetraceConfig = figment
            .merge(Env::prefixed("RETRACE_").split("__"))
            .extract()
            .map_err(|e| {
                crate::error::TraceError::Configuration(format!(
                    "Failed to load configuration: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Serialized, Toml},
        };

        let config: RetraceConfig = Figment::from(Serialized::defaults(RetraceConfig::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                crate::error::TraceError::Configuration(format!(
                    "Failed to load configuration file: {}",
                    e
                ))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.diff.max_patch_depth == 0 {
            return Err(crate::error::TraceError::Configuration(
                "diff.max_patch_depth must be at least 1".to_string(),
            ));
        }
        if self.recording.artifact_threshold_bytes == Some(0) {
            return Err(crate::error::TraceError::Configuration(
                "recording.artifact_threshold_bytes must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RetraceConfig::default();
        assert!(config.recording.enabled);
        assert!(config.recording.snapshot_states);
        assert_eq!(config.replay.default_policy, ReplayPolicy::Strict);
        assert_eq!(config.diff.max_patch_depth, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[replay]
default_policy = "hybrid"

[diff]
max_patch_depth = 16
"#
        )
        .unwrap();

        let config = RetraceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.replay.default_policy, ReplayPolicy::Hybrid);
        assert_eq!(config.diff.max_patch_depth, 16);
        assert!(config.recording.enabled);
    }

    #[test]
    fn test_validate_rejects_zero_depth() {
        let config = ConfigBuilder::new()
            .diff(DiffConfig { max_patch_depth: 0 })
            .build();
        assert!(matches!(
            config.validate(),
            Err(crate::error::TraceError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = ConfigBuilder::new()
            .recording(RecordingConfig {
                artifact_threshold_bytes: Some(0),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }
}
