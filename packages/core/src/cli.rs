use clap::Parser;

/// Campaign analytics engine CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "campaign-analytics",
    version,
    about = "Scheduled campaign analysis modules with caching, run history and alerting"
)]
pub struct Cli {
    /// Database URL (e.g. sqlite://campaign_analytics.db), or `memory` for no database
    #[arg(long)]
    pub database_url: Option<String>,

    /// Tracker statistics API base URL
    #[arg(long)]
    pub tracker_url: Option<String>,

    /// Scheduler tick interval in seconds
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// HTTP bind address
    #[arg(long)]
    pub bind: Option<String>,

    /// Execute one module, print its result as JSON and exit
    #[arg(long, value_name = "MODULE_ID")]
    pub run: Option<String>,

    /// With --run: ignore and do not write the result cache
    #[arg(long, requires = "run")]
    pub no_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_one_shot_run() {
        let cli = Cli::try_parse_from(["campaign-analytics", "--run", "spend_spike", "--no-cache"])
            .unwrap();
        assert_eq!(cli.run.as_deref(), Some("spend_spike"));
        assert!(cli.no_cache);
    }

    #[test]
    fn no_cache_requires_run() {
        assert!(Cli::try_parse_from(["campaign-analytics", "--no-cache"]).is_err());
    }
}
