mod config;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use flowmail_api::AppStateInner;
use flowmail_core::{
    AccountDirectory, CampaignStore, Dispatcher, DriverMode, Error, Lifecycle, MemoryStore,
    TemplateStore, WebhookConfig, WebhookSender, trigger,
};
use flowmail_db::Database;

use crate::config::{Config, StorageKind};

struct Stores {
    campaigns: Arc<dyn CampaignStore>,
    accounts: Arc<dyn AccountDirectory>,
    templates: Arc<dyn TemplateStore>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowmail=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let stores = open_stores(&config)?;
    if let Some(path) = &config.accounts_file {
        seed_accounts(stores.accounts.as_ref(), path)?;
    }

    let sender = WebhookSender::new(WebhookConfig {
        timeout: config.webhook_timeout,
        ..WebhookConfig::default()
    })?;
    let dispatcher = Dispatcher::new(stores.campaigns.clone(), stores.accounts.clone(), sender);
    let lifecycle = Lifecycle::new(dispatcher.clone(), config.driver);

    let recovered = lifecycle.recover()?;
    if recovered > 0 {
        info!("Recovered {} unfinished campaign(s)", recovered);
    }

    let shutdown = CancellationToken::new();
    let trigger_task = (config.driver == DriverMode::Cron).then(|| {
        info!("Cron trigger firing every {}s", config.cron_interval.as_secs());
        tokio::spawn(trigger::run_trigger_loop(
            dispatcher.clone(),
            config.cron_interval.as_secs(),
            shutdown.clone(),
        ))
    });

    let state = AppStateInner::new(lifecycle.clone(), stores.templates, config.storage.as_str());
    let app = flowmail_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!(
        "flowmail listening on {} (driver: {}, storage: {})",
        addr,
        config.driver,
        config.storage.as_str()
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    if let Some(task) = trigger_task {
        let _ = task.await;
    }
    lifecycle.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    Ok(match config.storage {
        StorageKind::Sqlite => {
            let db = Arc::new(Database::open(&config.db_path)?);
            Stores {
                campaigns: db.clone(),
                accounts: db.clone(),
                templates: db,
            }
        }
        StorageKind::Memory => {
            warn!("Using in-memory storage; campaigns are lost on restart");
            let store = Arc::new(MemoryStore::new());
            Stores {
                campaigns: store.clone(),
                accounts: store.clone(),
                templates: store,
            }
        }
    })
}

/// Import `{name: url}` pairs, keeping any account that already exists.
fn seed_accounts(accounts: &dyn AccountDirectory, path: &Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading accounts file {}", path.display()))?;
    let seed: BTreeMap<String, String> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing accounts file {}", path.display()))?;

    let mut imported = 0;
    for (name, url) in seed {
        match accounts.create_account(&name, &url) {
            Ok(()) => imported += 1,
            Err(Error::Conflict(_)) => debug!(account = %name, "Account exists, not overwritten"),
            Err(e) => return Err(e.into()),
        }
    }
    info!("Imported {} flow account(s) from {}", imported, path.display());
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
