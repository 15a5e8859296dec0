use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use replicated_session_store::cache::CacheHealth;
use replicated_session_store::config::{LogFormat, Settings};
use replicated_session_store::redis::RedisPool;
use replicated_session_store::server::{create_app, AppState};
use replicated_session_store::session::{create_cache, create_session_store};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_tracing(settings.logging.format);
    tracing::info!(
        node_id = %settings.session.node_id,
        backend = %settings.cache.backend,
        "Configuration loaded"
    );

    // Redis pool only when the Redis backend is selected
    let redis_pool = if settings.cache.backend.eq_ignore_ascii_case("redis") {
        let pool = RedisPool::new(settings.redis.clone(), Arc::new(CacheHealth::new()))?;
        pool.get_connection().await?;
        tracing::info!(url = %pool.url(), "Connected to Redis");
        Some(Arc::new(pool))
    } else {
        None
    };

    let cache = create_cache(&settings.cache, &settings.session, redis_pool)?;
    let store = create_session_store(cache.clone(), &settings.session);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // Invalidation worker and cache background tasks
    let worker = store.start_invalidation_listener();
    let worker_handle = tokio::spawn(worker.run(shutdown_tx.subscribe()));
    let cache_handle = cache.spawn_background(shutdown_tx.subscribe());

    let state = AppState::new(settings.clone(), store);
    let app = create_app(state);

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    // Wait for background tasks to finish
    tracing::info!("Waiting for background tasks to finish...");
    let _ = tokio::join!(worker_handle, cache_handle);

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    // Stop the invalidation worker and cache background tasks
    let _ = shutdown_tx.send(());
}
