use std::sync::Arc;

use clap::Parser;
use dotenvy::dotenv;
use tokio::net::TcpListener;

use campaign_analytics::alerts::telegram::TelegramSink;
use campaign_analytics::alerts::{AlertDispatcher, NotificationSink};
use campaign_analytics::api::{self, AppState};
use campaign_analytics::cli::Cli;
use campaign_analytics::config::Config;
use campaign_analytics::db::create_pool;
use campaign_analytics::error::AppError;
use campaign_analytics::logging::init_logging;
use campaign_analytics::metrics::AppMetrics;
use campaign_analytics::modules::register_builtin;
use campaign_analytics::registry::ModuleRegistry;
use campaign_analytics::repository::ModuleRepository;
use campaign_analytics::runner::ModuleRunner;
use campaign_analytics::scheduler::Scheduler;
use campaign_analytics::services::tracker::TrackerClient;
use campaign_analytics::source::MetricsSource;
use campaign_analytics::store::{MemoryStore, ModuleStore};

fn exit_with(err: AppError) -> ! {
    tracing::error!("{}", err);
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = Config::from_env(&cli)
        .map_err(AppError::Config)
        .unwrap_or_else(|err| exit_with(err));

    tracing::info!("Service started with config: {:?}", config);

    let store: Arc<dyn ModuleStore> = if config.uses_database() {
        let pool = create_pool(&config.database_url)
            .await
            .unwrap_or_else(|err| exit_with(AppError::Database(err)));
        Arc::new(ModuleRepository::new(pool))
    } else {
        tracing::warn!("No database configured; configs, runs and cache live in memory only");
        Arc::new(MemoryStore::default())
    };

    let source: Arc<dyn MetricsSource> = Arc::new(TrackerClient::new(
        config.tracker_api_url.clone(),
        config.tracker_api_key.clone(),
    ));
    let registry = Arc::new(ModuleRegistry::default());
    register_builtin(&registry, source);
    tracing::info!("Registered {} analysis modules", registry.len());

    let metrics = Arc::new(
        AppMetrics::new()
            .unwrap_or_else(|err| exit_with(AppError::Config(format!("metrics: {}", err)))),
    );

    let sink: Option<Arc<dyn NotificationSink>> = match &config.telegram {
        Some(telegram) => Some(Arc::new(TelegramSink::with_api_url(
            telegram.api_url.clone(),
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
        ))),
        None => {
            tracing::warn!("Telegram not configured; alerts will be logged only");
            None
        }
    };
    let dispatcher = Arc::new(AlertDispatcher::new(sink, config.dispatcher_config()));

    let runner = Arc::new(
        ModuleRunner::new(registry, store, dispatcher).with_metrics(metrics.clone()),
    );

    if let Some(module_id) = cli.run.as_deref() {
        let result = runner
            .execute(module_id, None, !cli.no_cache)
            .await
            .unwrap_or_else(|err| exit_with(err.into()));
        match serde_json::to_string_pretty(&result) {
            Ok(rendered) => println!("{}", rendered),
            Err(err) => exit_with(AppError::Parse(err.to_string())),
        }
        return;
    }

    let scheduler = Scheduler::new(runner.clone()).with_metrics(metrics.clone());
    let poll_interval = config.poll_interval_seconds;
    tokio::spawn(async move {
        scheduler.run(poll_interval).await;
    });

    let app = api::router(AppState { runner, metrics });
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|err| exit_with(AppError::Config(format!("bind {}: {}", config.bind_addr, err))));

    tracing::info!("HTTP API listening on {}", config.bind_addr);
    if let Err(err) = axum::serve(listener, app).await {
        exit_with(AppError::Network(err.to_string()));
    }
}
