//! Logging configuration
//!
//! `TABSYNC_LOG` and `TABSYNC_LOG_DIR` override the level and add file output
//! without touching code; `RUST_LOG` still wins over both at init time.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub console: ConsoleFormat,
    pub file: Option<FileConfig>,
    /// Shape of JSON records, console and file alike
    pub json: JsonFields,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: ConsoleFormat::Json,
            file: None,
            json: JsonFields::default(),
        }
    }
}

impl LogConfig {
    /// Pretty console, engine internals at debug
    pub fn development() -> Self {
        Self {
            level: "info,tabsync_engine=debug,tabsync_store=debug,tabsync_transport=debug"
                .to_string(),
            console: ConsoleFormat::Pretty { ansi: true },
            ..Default::default()
        }
    }

    /// Daily-rotated JSON files under `log_dir`, nothing on the console
    pub fn production(log_dir: PathBuf) -> Self {
        Self {
            console: ConsoleFormat::Off,
            file: Some(FileConfig::in_dir(log_dir)),
            ..Default::default()
        }
    }

    /// Warnings only, compact records without source locations
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            json: JsonFields {
                location: false,
                ..JsonFields::default()
            },
            ..Default::default()
        }
    }

    /// Apply `TABSYNC_LOG` / `TABSYNC_LOG_DIR`
    pub fn with_env(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TABSYNC_LOG").filter(|l| !l.trim().is_empty()) {
            self.level = level;
        }
        if let Some(dir) = lookup("TABSYNC_LOG_DIR") {
            let mut file = self.file.take().unwrap_or_default();
            file.directory = PathBuf::from(dir);
            self.file = Some(file);
        }
        self
    }
}

/// What goes to stdout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum ConsoleFormat {
    Off,
    Json,
    Pretty { ansi: bool },
}

impl ConsoleFormat {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, ConsoleFormat::Off)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix; rotation appends the date
    pub prefix: String,
    pub rotation: LogRotation,
}

impl FileConfig {
    pub fn in_dir(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./logs"),
            prefix: "tabsync".to_string(),
            rotation: LogRotation::Daily,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Daily,
    Hourly,
    /// One file, truncated at startup
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonFields {
    /// Event fields at the top level instead of under `fields`
    pub flatten: bool,
    /// Enclosing spans, which carry the tab id
    pub spans: bool,
    /// Source file and line
    pub location: bool,
}

impl Default for JsonFields {
    fn default() -> Self {
        Self {
            flatten: true,
            spans: true,
            location: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        assert_eq!(LogConfig::default().console, ConsoleFormat::Json);
        assert!(LogConfig::development().level.contains("tabsync_engine=debug"));
        assert!(!LogConfig::testing().json.location);

        let production = LogConfig::production(PathBuf::from("/var/log/tabsync"));
        assert!(!production.console.is_enabled());
        assert_eq!(
            production.file.map(|f| f.directory),
            Some(PathBuf::from("/var/log/tabsync"))
        );
    }

    #[test]
    fn test_env_adds_file_output() {
        let config = LogConfig::testing().with_overrides(|name| match name {
            "TABSYNC_LOG" => Some("trace".to_string()),
            "TABSYNC_LOG_DIR" => Some("/tmp/tabs".to_string()),
            _ => None,
        });
        assert_eq!(config.level, "trace");
        let file = config.file.unwrap();
        assert_eq!(file.directory, PathBuf::from("/tmp/tabs"));
        assert_eq!(file.prefix, "tabsync");
    }

    #[test]
    fn test_blank_level_ignored() {
        let config = LogConfig::default().with_overrides(|name| {
            (name == "TABSYNC_LOG").then(|| " ".to_string())
        });
        assert_eq!(config.level, "info");
        assert!(config.file.is_none());
    }

    #[test]
    fn test_console_format_from_toml_shape() {
        let format: ConsoleFormat =
            serde_json::from_str(r#"{"format":"pretty","ansi":false}"#).unwrap();
        assert_eq!(format, ConsoleFormat::Pretty { ansi: false });
    }
}
