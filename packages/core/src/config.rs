use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::alerts::dispatcher::{DEFAULT_DASHBOARD_URL, DEFAULT_PACING};
use crate::alerts::telegram::DEFAULT_TELEGRAM_API_URL;
use crate::alerts::DispatcherConfig;
use crate::cli::Cli;
use crate::modules::CRITICAL_MODULES;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://campaign_analytics.db";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;
/// `DATABASE_URL` value that selects the in-process store instead of SQLite.
pub const IN_MEMORY_STORE: &str = "memory";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub tracker_api_url: String,
    pub tracker_api_key: Option<String>,
    pub poll_interval_seconds: u64,
    pub bind_addr: String,
    pub telegram: Option<TelegramConfig>,
    pub alert_modules: HashSet<String>,
    pub alert_pacing: Duration,
    pub dashboard_url: String,
}

#[derive(Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub bot_token: String,
    pub chat_id: String,
}

// Keep the bot token out of startup logs.
impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("api_url", &self.api_url)
            .field("bot_token", &"***")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_module_list(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

/// Delay between consecutive alert messages; never zero.
fn parse_pacing(raw: &str) -> Result<Duration, String> {
    let millis = raw
        .trim()
        .parse::<u64>()
        .map_err(|_| "ALERT_PACING_MS must be a valid number")?;
    if millis == 0 {
        return Err("ALERT_PACING_MS must be positive".to_string());
    }
    Ok(Duration::from_millis(millis))
}

impl Config {
    /// Read settings from the environment; flags given on the command line win.
    pub fn from_env(cli: &Cli) -> Result<Self, String> {
        let database_url = cli
            .database_url
            .clone()
            .or_else(|| optional("DATABASE_URL"))
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let tracker_api_url = cli
            .tracker_url
            .clone()
            .or_else(|| optional("TRACKER_API_URL"))
            .ok_or("TRACKER_API_URL is required")?;

        let poll_interval_seconds = match (cli.poll_interval, optional("POLL_INTERVAL_SECONDS")) {
            (Some(seconds), _) => seconds,
            (None, Some(raw)) => raw
                .parse::<u64>()
                .map_err(|_| "POLL_INTERVAL_SECONDS must be a valid number")?,
            (None, None) => DEFAULT_POLL_INTERVAL_SECONDS,
        };
        if poll_interval_seconds == 0 {
            return Err("POLL_INTERVAL_SECONDS must be positive".to_string());
        }

        let telegram = match (optional("TELEGRAM_BOT_TOKEN"), optional("TELEGRAM_CHAT_ID")) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramConfig {
                api_url: optional("TELEGRAM_API_URL")
                    .unwrap_or_else(|| DEFAULT_TELEGRAM_API_URL.to_string()),
                bot_token,
                chat_id,
            }),
            _ => None,
        };

        let alert_modules = match optional("ALERT_MODULES") {
            Some(raw) => parse_module_list(&raw),
            None => CRITICAL_MODULES.iter().map(|id| id.to_string()).collect(),
        };

        let alert_pacing = match optional("ALERT_PACING_MS") {
            Some(raw) => parse_pacing(&raw)?,
            None => DEFAULT_PACING,
        };

        Ok(Self {
            database_url,
            tracker_api_url,
            tracker_api_key: optional("TRACKER_API_KEY"),
            poll_interval_seconds,
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| optional("BIND_ADDR"))
                .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            telegram,
            alert_modules,
            alert_pacing,
            dashboard_url: optional("DASHBOARD_URL")
                .unwrap_or_else(|| DEFAULT_DASHBOARD_URL.to_string()),
        })
    }

    /// False when `DATABASE_URL` is `memory`: nothing survives a restart.
    pub fn uses_database(&self) -> bool {
        !self.database_url.trim().eq_ignore_ascii_case(IN_MEMORY_STORE)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            enabled_modules: self.alert_modules.clone(),
            pacing: self.alert_pacing,
            dashboard_url: self.dashboard_url.clone(),
            ..DispatcherConfig::default()
        }
    }
}
