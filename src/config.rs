//! Configuration loading and management
//!
//! Handles parsing of `.famtask.toml` configuration files.

use std::path::{Path, PathBuf};

use chrono::{Duration, FixedOffset, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::Role;

/// Name of the configuration file at the data root
pub const CONFIG_FILE: &str = ".famtask.toml";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Reminder configuration
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Default session for the CLI
    #[serde(default)]
    pub session: SessionConfig,
}

/// Reminder-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Time of day used when a task has no due time (HH:MM)
    #[serde(default = "default_time")]
    pub default_time: String,

    /// Minutes before the due instant at which reminders fire
    #[serde(default = "default_reminder_offsets")]
    pub reminder_offsets_minutes: Vec<i64>,

    /// Reference timezone for due dates, as a UTC offset (e.g. "-03:00")
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

fn default_time() -> String {
    "09:00".to_string()
}

fn default_reminder_offsets() -> Vec<i64> {
    vec![0, 60, 720]
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            default_time: default_time(),
            reminder_offsets_minutes: default_reminder_offsets(),
            utc_offset: default_utc_offset(),
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory, relative to the root unless absolute
    #[serde(default = "default_storage_dir")]
    pub dir: String,
}

fn default_storage_dir() -> String {
    ".famtask".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

/// Session defaults used when no flag or environment value is given
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

fn default_role() -> String {
    "admin".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            uid: None,
            family_id: None,
            role: default_role(),
            name: None,
        }
    }
}

impl NotificationsConfig {
    pub fn default_time(&self) -> Result<NaiveTime> {
        crate::model::hhmm::parse(&self.default_time).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "notifications.default_time: invalid time '{}' (expected HH:MM)",
                self.default_time
            ))
        })
    }

    pub fn offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| {
            Error::InvalidConfig(format!(
                "notifications.utc_offset: invalid offset '{}' (expected +HH:MM or -HH:MM)",
                self.utc_offset
            ))
        })
    }

    pub fn reminder_offsets(&self) -> Vec<Duration> {
        self.reminder_offsets_minutes
            .iter()
            .map(|minutes| Duration::minutes(*minutes))
            .collect()
    }

    fn validate(&self) -> Result<()> {
        self.default_time()?;
        self.offset()?;
        for minutes in &self.reminder_offsets_minutes {
            if *minutes < 0 || *minutes > 7 * 24 * 60 {
                return Err(Error::InvalidConfig(format!(
                    "notifications.reminder_offsets_minutes: {minutes} out of range (0-10080)"
                )));
            }
        }
        Ok(())
    }
}

/// Parse `Z`, `+HH:MM`, `-HH:MM` or `+HHMM`.
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return None;
    };
    let digits: String = rest.chars().filter(|ch| *ch != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|ch| ch.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl SessionConfig {
    fn validate(&self) -> Result<()> {
        self.role
            .parse::<Role>()
            .map_err(|err| Error::InvalidConfig(format!("session.role: {err}")))?;
        Ok(())
    }
}

impl StorageConfig {
    /// Resolve the data directory against `root`.
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let dir = Path::new(self.dir.trim());
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            root.join(dir)
        }
    }

    fn validate(&self) -> Result<()> {
        if self.dir.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "storage.dir cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a `.famtask.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the data root, or return defaults
    pub fn load_from_root(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);
        if !config_path.exists() {
            return Self::default();
        }
        match Self::load(&config_path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!(path = %config_path.display(), error = %err, "ignoring invalid config");
                Self::default()
            }
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.notifications.validate()?;
        self.storage.validate()?;
        self.session.validate()?;
        Ok(())
    }
}
