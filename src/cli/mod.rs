//! Command-line interface.
//!
//! Without a subcommand the server starts. Subcommands run one-off alert
//! operations directly against the configured database:
//! - `check <shop>` - Evaluate every alert kind for a shop
//! - `reset-flags <shop>` - Clear a shop's notified flags
//! - `trigger <shop> <type>` - Send one notification kind
//! - `sweep` - Check every shop with enabled alerts
//! - `config check` - Validate configuration file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::api::parse_shop_domain;
use crate::config::Config;
use crate::engine::{run_sweep, AlertDispatcher};
use crate::DbPool;

/// Environment variable naming the configuration file when `--config` is absent
pub const CONFIG_PATH_ENV: &str = "OBSERVA_CONFIG";

#[derive(Parser, Debug)]
#[command(name = "observa")]
#[command(author, version, about = "Store analytics alerting service", long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV, default_value = "observa.toml")]
    pub config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Subcommand to run (if none, starts the server)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate every alert kind for a shop
    Check {
        /// Shop domain, e.g. acme.myshopify.com
        shop: String,
    },

    /// Clear all notified flags for a shop
    ResetFlags { shop: String },

    /// Send one notification kind without evaluating metrics
    Trigger {
        shop: String,
        /// Alert type key, e.g. orderGrowthLow or emailTest
        #[arg(value_name = "TYPE")]
        kind: String,
    },

    /// Check every shop with at least one alert enabled
    Sweep,

    /// Configuration management commands
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Check,
}

fn shop_arg(raw: &str) -> Result<String> {
    parse_shop_domain(raw).with_context(|| format!("Invalid shop domain: {}", raw))
}

async fn open(config: &Config) -> Result<(DbPool, AlertDispatcher)> {
    config.validate()?;
    std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
        format!(
            "Failed to create data directory: {}",
            config.server.data_dir.display()
        )
    })?;
    let db = crate::db::init(&config.server.data_dir).await?;
    let dispatcher = crate::build_dispatcher(config, db.clone())?;
    Ok((db, dispatcher))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run a CLI command
pub async fn run_command(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Some(Commands::Check { shop }) => {
            let shop = shop_arg(shop)?;
            let (_db, dispatcher) = open(config).await?;
            print_json(&dispatcher.check_all(&shop).await)
        }
        Some(Commands::ResetFlags { shop }) => {
            let shop = shop_arg(shop)?;
            let (_db, dispatcher) = open(config).await?;
            dispatcher.reset_flags(&shop).await?;
            println!("Notified flags reset for {}", shop);
            Ok(())
        }
        Some(Commands::Trigger { shop, kind }) => {
            let shop = shop_arg(shop)?;
            let (_db, dispatcher) = open(config).await?;
            print_json(&dispatcher.trigger(&shop, kind).await?)
        }
        Some(Commands::Sweep) => {
            let (db, dispatcher) = open(config).await?;
            let summary = run_sweep(&dispatcher, &db).await?;
            println!(
                "Checked {} shops, {} alerts sent, {} failures",
                summary.shops_checked, summary.alerts_sent, summary.failures
            );
            Ok(())
        }
        Some(Commands::Config(ConfigCommands::Check)) => cmd_config_check(cli, config),
        None => {
            // No subcommand means start the server - this is handled in main.rs
            Ok(())
        }
    }
}

fn cmd_config_check(cli: &Cli, config: &Config) -> Result<()> {
    println!("Checking configuration file: {}", cli.config.display());
    println!();

    if !cli.config.exists() {
        println!("[!!] Configuration file not found, defaults will be used");
        println!();
    }

    if let Err(e) = config.validate() {
        println!("[!!] Configuration is invalid: {:#}", e);
        return Err(e);
    }

    let enabled = |on: bool| if on { "Enabled" } else { "Disabled" };

    println!("[OK] Configuration is valid!");
    println!();
    println!("Server:");
    println!("  Address:      {}:{}", config.server.host, config.server.port);
    println!("  Data Dir:     {}", config.server.data_dir.display());
    println!();
    println!("Alerts:");
    println!("  Window:       {} days", config.alerts.window_days);
    println!(
        "  Timeouts:     fetch {}s, send {}s",
        config.alerts.fetch_timeout_secs, config.alerts.send_timeout_secs
    );
    println!(
        "  Scheduler:    {} ({})",
        enabled(config.alerts.scheduler_enabled),
        config.alerts.schedule
    );
    println!(
        "  Cron Token:   {}",
        if config.alerts.cron_token.is_some() {
            "Set"
        } else {
            "Not set (endpoint is open)"
        }
    );
    println!();
    println!("Channels:");
    println!("  Email (SMTP): {}", enabled(config.email.is_configured()));
    println!("  Admin API:    {}", config.shopify.api_version);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["observa", "check", "acme.myshopify.com"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Check { ref shop }) if shop == "acme.myshopify.com"));

        let cli = Cli::try_parse_from(["observa", "trigger", "acme.myshopify.com", "emailTest"])
            .unwrap();
        assert!(matches!(cli.command, Some(Commands::Trigger { ref kind, .. }) if kind == "emailTest"));

        let cli = Cli::try_parse_from(["observa", "--config", "/etc/observa.toml"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("/etc/observa.toml"));
    }

    #[test]
    fn test_config_path_reads_env() {
        use clap::CommandFactory;

        let command = Cli::command();
        let arg = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        assert_eq!(arg.get_env(), Some(std::ffi::OsStr::new(CONFIG_PATH_ENV)));
    }

    #[test]
    fn test_shop_arg() {
        assert_eq!(
            shop_arg("ACME.myshopify.com").unwrap(),
            "acme.myshopify.com"
        );
        assert!(shop_arg("acme.com").is_err());
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let mut config = Config::default();
        config.alerts.window_days = 1_000_000_000;
        config.server.data_dir = std::env::temp_dir().join("observa-invalid-config");

        let err = open(&config).await.err().unwrap();
        assert!(err.to_string().contains("alerts.window_days"));
        // Rejected before anything is created on disk
        assert!(!config.server.data_dir.exists());
    }
}
