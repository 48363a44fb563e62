//! Configuration types for the logging system

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Main logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level (can be overridden by RUST_LOG)
    pub default_level: String,

    /// Console output configuration
    pub console: ConsoleConfig,

    /// File output configuration
    pub file: Option<FileConfig>,

    /// JSONL output configuration
    pub jsonl: JsonlConfig,

    /// Per-target level overrides, e.g. `zigmesh_simulation::nwk = "trace"`
    #[serde(default)]
    pub targets: HashMap<String, String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            console: ConsoleConfig::default(),
            file: None,
            jsonl: JsonlConfig::default(),
            targets: HashMap::new(),
        }
    }
}

impl LogConfig {
    /// Create a config for development (verbose console output)
    pub fn development() -> Self {
        Self {
            default_level: "debug".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: true,
            },
            ..Default::default()
        }
    }

    /// Create a config that writes one JSONL file per run into `log_dir`
    ///
    /// Console output stays on in pretty form so reports remain readable.
    pub fn run_archive(log_dir: PathBuf, prefix: impl Into<String>) -> Self {
        Self {
            console: ConsoleConfig {
                enabled: true,
                pretty: true,
                ansi: false,
            },
            file: Some(FileConfig {
                directory: log_dir,
                prefix: prefix.into(),
                rotation: RotationStrategy::Never,
            }),
            ..Default::default()
        }
    }

    /// Create a config for testing (minimal output)
    pub fn testing() -> Self {
        Self {
            default_level: "warn".to_string(),
            console: ConsoleConfig {
                enabled: true,
                pretty: false,
                ansi: false,
            },
            ..Default::default()
        }
    }

    /// Filter directive string built from the default level and target overrides
    pub fn directives(&self) -> String {
        let mut targets: Vec<_> = self.targets.iter().collect();
        targets.sort();

        let mut directives = vec![self.default_level.clone()];
        directives.extend(targets.into_iter().map(|(target, level)| format!("{target}={level}")));
        directives.join(",")
    }
}

/// Console output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Enable console output
    pub enabled: bool,
    /// Use pretty (human-readable) format
    pub pretty: bool,
    /// Include ANSI colors
    pub ansi: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pretty: false, // JSONL by default
            ansi: false,
        }
    }
}

/// File output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    /// Directory for log files
    pub directory: PathBuf,
    /// File name prefix
    pub prefix: String,
    /// Rotation strategy
    pub rotation: RotationStrategy,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "zigmesh".to_string(),
            rotation: RotationStrategy::Never,
        }
    }
}

/// File rotation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RotationStrategy {
    /// Rotate daily
    Daily,
    /// Rotate hourly
    Hourly,
    /// Never rotate (single file, truncated at start)
    #[default]
    Never,
}

/// JSONL formatting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonlConfig {
    /// Flatten event fields to root level
    pub flatten_events: bool,
    /// Include span list in events
    pub include_spans: bool,
    /// Include file/line information
    pub include_location: bool,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            flatten_events: true,
            include_spans: true,
            include_location: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.default_level, "info");
        assert!(config.console.enabled);
        assert!(!config.console.pretty); // JSONL by default
        assert!(config.file.is_none());
    }

    #[test]
    fn test_development_config() {
        let config = LogConfig::development();
        assert_eq!(config.default_level, "debug");
        assert!(config.console.pretty);
        assert!(config.console.ansi);
    }

    #[test]
    fn test_run_archive_config() {
        let config = LogConfig::run_archive(PathBuf::from("/tmp/zigmesh"), "coex");
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "coex");
        assert_eq!(file.rotation, RotationStrategy::Never);
    }

    #[test]
    fn test_directives_are_sorted() {
        let mut config = LogConfig::testing();
        config.targets.insert("zigmesh_simulation::nwk".into(), "trace".into());
        config.targets.insert("zigmesh_routing".into(), "debug".into());
        assert_eq!(
            config.directives(),
            "warn,zigmesh_routing=debug,zigmesh_simulation::nwk=trace"
        );
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = LogConfig::development();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LogConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.default_level, "debug");
        assert!(parsed.console.pretty);
    }
}
