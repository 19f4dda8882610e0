use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Environment variable overriding `[email] smtp_password`
pub const SMTP_PASSWORD_ENV: &str = "OBSERVA_SMTP_PASSWORD";
/// Environment variable overriding `[alerts] cron_token`
pub const CRON_TOKEN_ENV: &str = "OBSERVA_CRON_TOKEN";
/// Longest accepted comparison period, in days
pub const MAX_WINDOW_DAYS: i64 = 366;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub email: EmailConfig,
    #[serde(default)]
    pub shopify: ShopifyConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// SMTP relay used for alert emails
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Implicit TLS relay; plain SMTP when false
    #[serde(default = "default_true")]
    pub smtp_tls: bool,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_address: Option<String>,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            smtp_host: None,
            smtp_port: default_smtp_port(),
            smtp_tls: true,
            smtp_username: None,
            smtp_password: None,
            from_address: None,
            from_name: default_from_name(),
        }
    }
}

impl EmailConfig {
    pub fn is_configured(&self) -> bool {
        self.smtp_host.is_some() && self.from_address.is_some()
    }
}

fn default_smtp_port() -> u16 {
    465
}

fn default_true() -> bool {
    true
}

fn default_from_name() -> String {
    "Observa".to_string()
}

/// Admin GraphQL API client settings
#[derive(Debug, Clone, Deserialize)]
pub struct ShopifyConfig {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Orders requested per page
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on pages fetched for one window
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
}

impl Default for ShopifyConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_api_version() -> String {
    "2024-10".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_page_size() -> u32 {
    100
}

fn default_max_pages() -> u32 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertsConfig {
    /// Length of the current and prior comparison periods
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Bound on fetching one kind's metrics
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Bound on one notification send
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub scheduler_enabled: bool,
    /// Cron expression with seconds, e.g. `0 0 */6 * * *`
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Bearer token for `GET /api/cron/alerts`; open when unset
    pub cron_token: Option<String>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            fetch_timeout_secs: default_fetch_timeout(),
            send_timeout_secs: default_send_timeout(),
            scheduler_enabled: false,
            schedule: default_schedule(),
            cron_token: None,
        }
    }
}

fn default_window_days() -> i64 {
    7
}

fn default_fetch_timeout() -> u64 {
    20
}

fn default_send_timeout() -> u64 {
    15
}

fn default_schedule() -> String {
    "0 0 */6 * * *".to_string()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| "Failed to parse configuration file")
    }

    /// Secrets given in the environment take precedence over the file
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(password) = lookup(SMTP_PASSWORD_ENV).filter(|v| !v.is_empty()) {
            self.email.smtp_password = Some(password);
        }
        if let Some(token) = lookup(CRON_TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.alerts.cron_token = Some(token);
        }
    }

    /// Check values that would otherwise fail at first use
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_WINDOW_DAYS).contains(&self.alerts.window_days) {
            anyhow::bail!(
                "alerts.window_days must be between 1 and {}, got {}",
                MAX_WINDOW_DAYS,
                self.alerts.window_days
            );
        }
        if self.alerts.fetch_timeout_secs == 0 || self.alerts.send_timeout_secs == 0 {
            anyhow::bail!("alert timeouts must be positive");
        }
        if self.shopify.page_size == 0 || self.shopify.page_size > 250 {
            anyhow::bail!("shopify.page_size must be between 1 and 250");
        }
        self.alerts
            .schedule
            .parse::<cron::Schedule>()
            .with_context(|| format!("Invalid alerts.schedule: {}", self.alerts.schedule))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.alerts.window_days, 7);
        assert_eq!(config.email.smtp_port, 465);
        assert!(config.email.smtp_tls);
        assert!(!config.email.is_configured());
        assert!(!config.alerts.scheduler_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
            [email]
            smtp_host = "smtp.example.com"
            from_address = "alerts@example.com"

            [alerts]
            window_days = 14
            scheduler_enabled = true
            "#,
        )
        .unwrap();

        assert!(config.email.is_configured());
        assert_eq!(config.email.from_name, "Observa");
        assert_eq!(config.alerts.window_days, 14);
        assert_eq!(config.alerts.send_timeout_secs, 15);
        assert_eq!(config.shopify.page_size, 100);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::parse(
            r#"
            [alerts]
            cron_token = "from-file"
            "#,
        )
        .unwrap();

        config.apply_env(|key| match key {
            CRON_TOKEN_ENV => Some("from-env".to_string()),
            SMTP_PASSWORD_ENV => Some(String::new()),
            _ => None,
        });

        assert_eq!(config.alerts.cron_token.as_deref(), Some("from-env"));
        // Empty values are ignored
        assert_eq!(config.email.smtp_password, None);
    }

    #[test]
    fn test_validate_rejects_bad_schedule() {
        let mut config = Config::default();
        config.alerts.schedule = "every six hours".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_window_days() {
        let mut config = Config::default();
        for days in [1, 30, MAX_WINDOW_DAYS] {
            config.alerts.window_days = days;
            assert!(config.validate().is_ok(), "{} days rejected", days);
        }
        for days in [0, -7, MAX_WINDOW_DAYS + 1, 1_000_000_000, i64::MAX] {
            config.alerts.window_days = days;
            let err = config.validate().unwrap_err();
            assert!(err.to_string().contains("alerts.window_days"));
        }
    }
}
