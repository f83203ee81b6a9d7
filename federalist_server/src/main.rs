//! Federalist server: builds and publishes static sites from GitHub repositories.
//!
//! GitHub push webhooks become deduplicated build requests that are queued for
//! the build container. A JSON API under `/v0` manages sites, members and
//! builds for users signed in through GitHub OAuth, and nightly jobs keep site
//! membership and repository state honest.

mod config;
mod db;
mod error;
mod jobs;
mod metrics;
mod migrations;
mod models;
mod routes;
mod schema;
mod services;
mod session;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;

use crate::config::AppConfig;
use crate::services::cf_client::CfClient;
use crate::services::github_service::GitHubClient;
use crate::services::intake::{BuildDispatcher, BuildIntake, PgBuildStore};
use crate::services::object_store::S3ObjectStore;
use crate::services::proxy_data_sync::ProxyDataSync;
use crate::services::queue::{BuildQueue, LoggingQueue, SqsBuildQueue};
use crate::session::{spawn_vacuum_task, SessionStore};
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "federalist", about = "Federalist static site platform")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "PORT", default_value = "1337")]
    port: u16,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum pooled database connections
    #[arg(long, env = "DATABASE_POOL_SIZE", default_value = "10")]
    pool_size: usize,

    /// Serve the API without starting background jobs
    #[arg(long)]
    no_jobs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting Federalist server...");

    let db_url = cli
        .database_url
        .unwrap_or_else(|| "postgres://postgres@localhost:5432/federalist".to_string());
    let pool = db::build_pool(&db_url, cli.pool_size)?;

    {
        let mut conn = db::get_conn(&pool).await?;
        tracing::info!("Running database migration...");
        migrations::run_migration(&mut conn).await?;
        tracing::info!("Database migration completed.");
    }

    let config = Arc::new(AppConfig::from_env());
    let sdk_config = aws_config::load_from_env().await;

    let queue: Arc<dyn BuildQueue> = match &config.sqs_queue_url {
        Some(url) => Arc::new(SqsBuildQueue::new(&sdk_config, url.clone())),
        None => Arc::new(LoggingQueue),
    };
    let proxy = config
        .proxy_site_table
        .clone()
        .map(|table| Arc::new(ProxyDataSync::new(&sdk_config, table)));
    let cf = config
        .cloud_foundry
        .clone()
        .map(|cf_config| Arc::new(CfClient::new(cf_config)));

    let github = GitHubClient::new(&config.github);
    let intake = BuildIntake::new(
        Arc::new(PgBuildStore::new(pool.clone())),
        Arc::new(BuildDispatcher::new(
            pool.clone(),
            queue,
            github.clone(),
            config.clone(),
        )),
        config.webhook_secret.clone(),
    );

    let sessions = Arc::new(SessionStore::new(config.session.ttl_minutes));
    spawn_vacuum_task(sessions.clone());

    let state = AppState {
        pool,
        config,
        github,
        intake,
        sessions,
        objects: Arc::new(S3ObjectStore::new(&sdk_config)),
        proxy,
        cf,
    };

    if cli.no_jobs {
        tracing::info!("Background jobs disabled");
    } else {
        jobs::spawn_dispatch_sweep(state.clone());
        jobs::spawn_nightly(state.clone());
    }

    metrics::init_metrics();

    let app = routes::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Federalist listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
