//! shiftwire-listen - subscribe to realtime channels and log what arrives
//!
//! Environment: `SHIFTWIRE_TOKEN` (required), `SHIFTWIRE_CHANNELS`
//! (comma-separated, default "default"), plus everything
//! [`RealtimeConfig::from_env`] reads. Stops on Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value;
use shiftwire_client::ws::{EventHandlers, SessionStore};
use shiftwire_client::{logging, RealtimeConfig, RealtimeManager, SubscribeOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing(logging::DEFAULT_FILTER);

    let token = std::env::var("SHIFTWIRE_TOKEN").context("SHIFTWIRE_TOKEN must be set")?;
    let channels: Vec<String> = std::env::var("SHIFTWIRE_CHANNELS")
        .unwrap_or_else(|_| "default".to_string())
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect();

    let config = RealtimeConfig::from_env();
    let session = Arc::new(SessionStore::with_token(token));
    let handlers = EventHandlers::new()
        .on_connection_change(|state| tracing::info!(%state, "connection state changed"))
        .on_authenticated(|id| tracing::info!(connection_id = id, "authenticated"))
        .on_disconnect(|reason| tracing::info!(%reason, "disconnected"))
        .on_error(|error| {
            tracing::warn!(%error, recoverable = error.is_recoverable(), "realtime error")
        });

    let manager = RealtimeManager::builder(config)
        .auth_provider(session)
        .event_handlers(handlers)
        .start()
        .context("failed to start realtime manager")?;

    let subscriptions: Vec<_> = channels
        .iter()
        .map(|channel| {
            manager.subscribe(channel.as_str(), SubscribeOptions::labeled("listen"), |message| {
                let payload = Value::Object(message.payload.clone());
                tracing::info!(channel = %message.channel, payload = %payload, "message");
            })
        })
        .collect();
    tracing::info!(channels = ?channels, "listening; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    let metrics = manager.metrics();
    tracing::info!(
        attempts = metrics.connection_attempts,
        connections = metrics.successful_connections,
        errors = metrics.errors,
        uptime_secs = metrics.total_uptime.as_secs(),
        "shutting down"
    );
    drop(subscriptions);
    manager.disconnect().await;
    Ok(())
}
