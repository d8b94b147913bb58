use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_baseline_path")]
    pub baseline_path: String,
    #[serde(default = "default_log_path")]
    pub log_path: String,
    #[serde(default = "default_alert_marker_path")]
    pub alert_marker_path: String,
    #[serde(default = "default_profile_path")]
    pub profile_path: String,
    /// Rolling window for the change log, e.g. `182days` or `90d`.
    #[serde(default = "default_log_retention")]
    pub log_retention: String,
    #[serde(default)]
    pub confirm_changes: bool,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_desktop")]
    pub desktop: bool,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MailConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub relay_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_from")]
    pub from: String,
    /// Fixed operational address that receives every alert.
    #[serde(default)]
    pub operator_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus textfile-collector output, written after every run.
    #[serde(default)]
    pub textfile_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            baseline_path: default_baseline_path(),
            log_path: default_log_path(),
            alert_marker_path: default_alert_marker_path(),
            profile_path: default_profile_path(),
            log_retention: default_log_retention(),
            confirm_changes: false,
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
            notifications: NotificationsConfig::default(),
            mail: MailConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            desktop: default_desktop(),
            app_name: default_app_name(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            allowed_chat_ids: Vec::new(),
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            relay_url: None,
            api_key_env: default_api_key_env(),
            from: default_from(),
            operator_address: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: io::Error },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("baseline_path", &self.baseline_path),
            ("log_path", &self.log_path),
            ("alert_marker_path", &self.alert_marker_path),
            ("profile_path", &self.profile_path),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{name} must not be empty")));
            }
        }
        if self.baseline_path == self.log_path || self.baseline_path == self.alert_marker_path {
            return Err(ConfigError::Validation(
                "baseline_path must differ from log_path and alert_marker_path".to_string(),
            ));
        }
        let retention = self.log_retention()?;
        if retention.is_zero() {
            return Err(ConfigError::Validation(
                "log_retention must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "dispatch_timeout_secs must be >= 1".to_string(),
            ));
        }

        validate_telegram(&self.notifications.telegram)?;
        validate_mail(&self.mail)?;

        Ok(())
    }

    pub fn log_retention(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(self.log_retention.trim()).map_err(|err| {
            ConfigError::Validation(format!(
                "log_retention '{}' is not a duration: {err}",
                self.log_retention
            ))
        })
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_telegram(cfg: &TelegramConfig) -> Result<(), ConfigError> {
    if cfg.enabled && cfg.allowed_chat_ids.is_empty() {
        return Err(ConfigError::Validation(
            "notifications.telegram.allowed_chat_ids must not be empty when telegram is enabled"
                .to_string(),
        ));
    }
    Ok(())
}

fn validate_mail(cfg: &MailConfig) -> Result<(), ConfigError> {
    if !cfg.enabled {
        return Ok(());
    }
    let url = cfg.relay_url.as_deref().map(str::trim).unwrap_or_default();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Validation(
            "mail.relay_url must be an http(s) URL when mail is enabled".to_string(),
        ));
    }
    if let Some(addr) = &cfg.operator_address {
        if !addr.contains('@') {
            return Err(ConfigError::Validation(format!(
                "mail.operator_address '{addr}' is not an email address"
            )));
        }
    }
    Ok(())
}

fn default_baseline_path() -> String {
    "device_baseline.json".to_string()
}

fn default_log_path() -> String {
    "device_changes.log".to_string()
}

fn default_alert_marker_path() -> String {
    "alert_sent.flag".to_string()
}

fn default_profile_path() -> String {
    "user_details.json".to_string()
}

fn default_log_retention() -> String {
    "182days".to_string()
}

const fn default_dispatch_timeout_secs() -> u64 {
    15
}

const fn default_desktop() -> bool {
    true
}

fn default_app_name() -> String {
    "Device Monitor".to_string()
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

fn default_api_key_env() -> String {
    "HOSTDRIFT_MAIL_API_KEY".to_string()
}

fn default_from() -> String {
    "hostdrift@localhost".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_config_is_valid() {
        let cfg: Config = serde_yaml::from_str(Config::example_yaml()).expect("example parses");
        cfg.validate().expect("example validates");
        assert_eq!(
            cfg.log_retention().unwrap(),
            Duration::from_secs(182 * 24 * 60 * 60)
        );
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.baseline_path, "device_baseline.json");
        assert!(!cfg.confirm_changes);
        assert!(cfg.notifications.desktop);
    }

    #[test]
    fn retention_accepts_other_windows() {
        let cfg = Config {
            log_retention: "90d".to_string(),
            ..Config::default()
        };
        assert_eq!(
            cfg.log_retention().unwrap(),
            Duration::from_secs(90 * 24 * 60 * 60)
        );
    }

    #[test]
    fn rejects_bad_retention() {
        let cfg = Config {
            log_retention: "half a year".to_string(),
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn enabled_mail_requires_relay_url() {
        let mut cfg = Config::default();
        cfg.mail.enabled = true;
        assert!(cfg.validate().is_err());

        cfg.mail.relay_url = Some("https://mail.example.com/send".to_string());
        cfg.mail.operator_address = Some("it-ops@example.com".to_string());
        cfg.validate().unwrap();
    }

    #[test]
    fn telegram_enabled_allows_missing_env() {
        let mut cfg = Config::default();
        cfg.notifications.telegram.enabled = true;
        cfg.notifications.telegram.allowed_chat_ids = vec![1];
        cfg.notifications.telegram.bot_token_env = "MISSING_ENV_12345".to_string();
        std::env::remove_var("MISSING_ENV_12345");

        cfg.validate()
            .expect("token presence is checked at startup, not during validation");
    }

    #[test]
    fn telegram_enabled_requires_chat_ids() {
        let mut cfg = Config::default();
        cfg.notifications.telegram.enabled = true;
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }
}
