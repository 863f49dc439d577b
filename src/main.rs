use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use redis_feed::config::Settings;
use redis_feed::logging::{Logger, TracingLogger};
use redis_feed::redis::{ConnectionPool, RedisDialer};
use redis_feed::server::{create_app, AppState};
use redis_feed::subscriber::{SubscriptionRunner, Supervisor};
use redis_feed::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new().context("failed to load settings")?;

    init_tracing(&settings.log).context("failed to initialise tracing")?;
    tracing::info!(channel = %settings.redis.channel, "Configuration loaded");

    let logger: Arc<dyn Logger> = Arc::new(TracingLogger);

    let pool = Arc::new(ConnectionPool::new(
        settings.pool_config()?,
        RedisDialer::from_settings(&settings.redis),
        settings.borrow_policy()?,
        logger.clone(),
    ));

    let (sink, mut payloads) =
        mpsc::channel::<Vec<u8>>(settings.subscriber.sink_capacity.max(1));
    let runner = SubscriptionRunner::new(
        pool.clone(),
        settings.redis.channel.clone(),
        sink,
        logger.clone(),
    )
    .with_receive_backoff(settings.receive_backoff());
    let health = runner.health();
    let supervisor = Supervisor::new(runner, settings.retry_policy(), logger.clone());

    let cancel = CancellationToken::new();

    // Subscriber in background; its end also ends the process
    let subscriber_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let result = supervisor.run(cancel.clone()).await;
            match &result {
                Ok(termination) => {
                    tracing::info!(reason = termination.as_str(), "Subscriber finished")
                }
                Err(e) => tracing::error!(error = %e, "Subscriber failed"),
            }
            cancel.cancel();
            result
        })
    };

    // One line per payload on stdout
    let relay_handle = tokio::spawn(async move {
        let mut out = BufWriter::new(tokio::io::stdout());
        while let Some(payload) = payloads.recv().await {
            out.write_all(&payload).await?;
            out.write_all(b"\n").await?;
            out.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let state = AppState::new(settings.redis.channel.as_str(), health, pool.counters());
    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(cancel.clone()))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let subscriber_result = subscriber_handle.await?;
    if let Err(e) = relay_handle.await? {
        tracing::warn!(error = %e, "Payload relay stopped early");
    }
    pool.shutdown().await;

    tracing::info!("Shutdown complete");
    subscriber_result.map(|_| ()).map_err(Into::into)
}

async fn shutdown_signal_handler(cancel: CancellationToken) {
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
                tracing::error!(error = %e, "Failed to install signal handler");
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
        _ = cancel.cancelled() => {
            tracing::info!("Subscriber stopped, shutting down server");
        }
    }

    cancel.cancel();
}
