mod auth;
mod clock;
mod config;
mod error;
mod events;
mod hub;
mod identity;
mod messaging;
mod relay;
mod room;
mod types;
mod ws;

use crate::auth::IdentityVerifier;
use crate::config::{cors, is_origin_allowed, ServerConfig};
use crate::hub::{Hub, HubHandle, HubStats};
use log::{info, warn};
use std::sync::Arc;
use warp::Filter;

#[tokio::main]
async fn main() {
    // Default level INFO, override with RUST_LOG
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ServerConfig::from_env();
    let verifier = IdentityVerifier::from_env();
    let identity_verification = verifier.enabled;

    info!("Allowed origins: {:?}", config.allowed_origins);
    info!("Identity verification: {}", if identity_verification { "ENABLED" } else { "DISABLED" });

    let (hub_handle, hub_commands) = HubHandle::channel();
    tokio::spawn(hub::run(Hub::new(verifier, config.limits.clone()), hub_commands));

    let hub_filter = {
        let handle = hub_handle.clone();
        warp::any().map(move || handle.clone())
    };
    let allowed_origins_filter = {
        let origins = config.allowed_origins.clone();
        warp::any().map(move || origins.clone())
    };

    let origin_check = warp::header::optional::<String>("origin")
        .and(allowed_origins_filter)
        .and_then(|origin: Option<String>, allowed: Arc<Vec<String>>| async move {
            match origin {
                Some(ref o) if is_origin_allowed(o, &allowed) => Ok(()),
                Some(o) => {
                    warn!("Rejected connection from origin: {}", o);
                    Err(warp::reject::custom(OriginRejected))
                }
                None => Ok(()), // Non-browser clients send no Origin
            }
        })
        .untuple_one();

    let channel_buffer = config.limits.client_channel_buffer;
    let ws_route = warp::path("ws")
        .and(origin_check)
        .and(warp::ws())
        .and(hub_filter.clone())
        .map(move |ws: warp::ws::Ws, hub: HubHandle| {
            ws.on_upgrade(move |socket| ws::client_connection(socket, hub, channel_buffer))
        });

    let cors = cors(&config.allowed_origins);

    let health_route = warp::path("health")
        .and(warp::get())
        .and(hub_filter)
        .then(move |hub: HubHandle| async move {
            warp::reply::json(&health_body(hub.stats().await, identity_verification))
        })
        .with(cors);

    let routes = ws_route.or(health_route);

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
            let mut sigint = signal(SignalKind::interrupt()).expect("Failed to register SIGINT handler");
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown..."),
                _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown..."),
            }
        }
        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        let _ = tx.send(());
    });

    info!("Listen party server listening on {}", config.listen_addr);
    let (_, server) = warp::serve(routes).bind_with_graceful_shutdown(config.listen_addr, async {
        rx.await.ok();
    });

    server.await;
    info!("Server shutdown complete");
}

#[derive(Debug)]
struct OriginRejected;
impl warp::reject::Reject for OriginRejected {}

/// `/health` payload. `stats` is `None` when the hub did not answer.
fn health_body(stats: Option<HubStats>, identity_verification: bool) -> serde_json::Value {
    serde_json::json!({
        "status": if stats.is_some() { "ok" } else { "degraded" },
        "rooms": stats.map(|s| s.rooms),
        "connections": stats.map(|s| s.connections),
        "identityVerification": identity_verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_health_reports_hub_stats() {
        let body = health_body(Some(HubStats { rooms: 2, connections: 5 }), true);
        assert_eq!(body, json!({"status": "ok", "rooms": 2, "connections": 5, "identityVerification": true}));
    }

    #[test]
    fn test_health_degraded_without_hub() {
        let body = health_body(None, false);
        assert_eq!(body, json!({"status": "degraded", "rooms": null, "connections": null, "identityVerification": false}));
    }
}
