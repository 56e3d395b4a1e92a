//! # Workshop Signup Bot Main Entry Point
//!
//! Initializes logging, loads configuration, connects the configured store,
//! starts the session sweeper and health server, and runs the Telegram bot.

use anyhow::Result;
use std::sync::Arc;
use teloxide::error_handlers::LoggingErrorHandler;
use teloxide::prelude::*;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use workshop_signup_bot::bot::handlers::BotHandler;
use workshop_signup_bot::bot::messenger::TelegramMessenger;
use workshop_signup_bot::config::{Backend, Config};
use workshop_signup_bot::database::{
    DatabaseManager, LocalObjectStore, ObjectStore, RestStore, Store, SupabaseStorage,
};
use workshop_signup_bot::services::health::HealthService;
use workshop_signup_bot::services::session::SessionSweeper;
use workshop_signup_bot::services::AppContext;
use workshop_signup_bot::utils::logging::log_system_event;

async fn connect_backend(backend: &Backend) -> Result<(Arc<dyn Store>, Arc<dyn ObjectStore>)> {
    match backend {
        Backend::Sqlite {
            database_url,
            receipts_dir,
        } => {
            info!("Initializing SQLite store...");
            let db = DatabaseManager::new(database_url).await?;
            db.run_migrations().await?;
            Ok((
                Arc::new(db),
                Arc::new(LocalObjectStore::new(receipts_dir.clone())),
            ))
        }
        Backend::Hosted { url, key, bucket } => {
            info!("Initializing hosted store...");
            Ok((
                Arc::new(RestStore::new(url, key)?),
                Arc::new(SupabaseStorage::new(url, key, bucket)?),
            ))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "workshop_signup_bot=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let backend_summary = config.backend.summary();

    info!("Starting Workshop Signup Bot v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded - Store: {}, Mode: {:?}, Admins: {}, HTTP Port: {}",
        backend_summary,
        config.course_mode,
        config.admin_ids.len(),
        config.http_port
    );
    if config.admin_ids.is_empty() {
        tracing::warn!("ADMIN_IDS is empty; offline payments cannot be reviewed");
    }

    let (store, objects) = connect_backend(&config.backend).await?;
    if let Err(e) = store.ping().await {
        tracing::warn!("Store is not reachable yet: {}", e);
    }
    info!("Store initialized successfully");

    let bot = Bot::new(&config.bot_token);
    let http_port = config.http_port;
    let messenger = Arc::new(TelegramMessenger::new(bot.clone()));
    let ctx = AppContext::new(config, Arc::clone(&store), objects, messenger);
    let handler = BotHandler::new(ctx.clone());

    let mut sweeper = match SessionSweeper::new(ctx.sessions.clone()).await {
        Ok(sweeper) => sweeper,
        Err(e) => {
            tracing::error!("Failed to create session sweeper: {}", e);
            return Err(anyhow::anyhow!("Failed to create session sweeper: {}", e));
        }
    };
    if let Err(e) = sweeper.start().await {
        tracing::error!("Failed to start session sweeper: {}", e);
    }

    let health_service = HealthService::new(store, ctx.sessions.clone(), backend_summary);
    let health_router = health_service
        .router
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{http_port}"))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to port {}: {}", http_port, e))?;
    info!("Health check server starting on port {}", http_port);

    let bot_task = tokio::spawn(async move {
        Dispatcher::builder(bot, handler.schema())
            .default_handler(|update| async move {
                tracing::debug!("Unhandled update: {:?}", update.kind);
            })
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
    });

    let health_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_router).await {
            tracing::error!("Health server error: {}", e);
        }
    });

    log_system_event("STARTED", Some("dispatching updates"));

    tokio::select! {
        result = bot_task => {
            if let Err(e) = result {
                tracing::error!("Bot task error: {}", e);
            }
        }
        result = health_task => {
            if let Err(e) = result {
                tracing::error!("Health task error: {}", e);
            }
        }
    }

    if let Err(e) = sweeper.stop().await {
        tracing::warn!("Error stopping session sweeper: {}", e);
    }

    info!("Application stopped");
    Ok(())
}
