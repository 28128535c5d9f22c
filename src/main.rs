use dotenvy::dotenv;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use rollcall_server::attendance::{InMemoryStore, PgStore, Provisioner};
use rollcall_server::config::{Config, StorageBackend};
use rollcall_server::notify::{ConsoleNotifier, Notifier, SmtpNotifier};
use rollcall_server::routes::create_routes;
use rollcall_server::state::AppState;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = Config::from_env()?;

    let notifier: Arc<dyn Notifier> = match &config.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Mail: SMTP relay");
            Arc::new(SmtpNotifier::new(smtp)?)
        }
        None => {
            tracing::warn!("Mail: SMTP_HOST not set, confirmation mail goes to the log");
            Arc::new(ConsoleNotifier::new())
        }
    };

    let (state, pg_store) = match config.storage_backend {
        StorageBackend::Postgres => {
            let store = connect_postgres(&config).await?;
            let events = Arc::new(store.clone());
            (
                AppState::new(events.clone(), events, notifier, &config.public_base_url),
                Some(store),
            )
        }
        StorageBackend::Memory => {
            tracing::warn!("Storage: in-memory backend, data is lost on restart");
            (
                AppState::in_memory(InMemoryStore::new(), notifier, &config.public_base_url),
                None,
            )
        }
    };

    let app = create_routes(state, &config.cors_allowed_origins);

    tracing::info!("🚀 Server running at http://{}", config.bind_addr);
    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(store) = pg_store {
        store.close().await;
        tracing::info!("Database pools closed");
    }
    Ok(())
}

async fn connect_postgres(config: &Config) -> Result<PgStore, BoxError> {
    let pool = connect_pool(&config.database_url, config.max_connections).await?;
    tracing::info!("Successfully connected to database");

    let admin_pool = if config.admin_database_url == config.database_url {
        pool.clone()
    } else {
        connect_pool(&config.admin_database_url, 1).await?
    };

    sqlx::migrate!().run(&admin_pool).await?;
    tracing::info!("Migrations run successfully");

    tracing::info!(layout = ?config.attendance_layout, "Attendance storage ready");
    Ok(PgStore::new(
        pool,
        Provisioner::new(admin_pool),
        config.attendance_layout,
    ))
}

async fn connect_pool(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to listen for SIGTERM"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
