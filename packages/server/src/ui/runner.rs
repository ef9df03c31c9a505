//! Server bootstrap: wiring, routing and graceful shutdown.

use std::{future::Future, sync::Arc, time::Duration};

use axum::{Router, routing::get};
use thiserror::Error;
use tokio::{net::TcpListener, task::JoinHandle, time::MissedTickBehavior};
use tower_http::trace::TraceLayer;

use crate::{
    config::ServerConfig,
    domain::{PresenceStore, Room, RoomCode},
    infrastructure::{registry::ConnectionRegistry, repository::InMemoryStore},
    ui::{
        dispatcher::EventDispatcher,
        handler::{health_check, list_connections, websocket_handler},
        signal::shutdown_signal,
        state::AppState,
    },
    usecase::{PresenceSynchronizer, SignalingRelay, TeamCoordinator},
};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Run the relay until Ctrl-C or SIGTERM.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    run_until(config, shutdown_signal()).await
}

/// Run the relay until `shutdown` resolves.
pub async fn run_until<F>(config: ServerConfig, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store: Arc<dyn PresenceStore> = Arc::new(InMemoryStore::with_rooms(seed_rooms(&config)));
    let state = build_state(store, &config);
    let flush_task = spawn_deferred_flush(state.presence.clone(), config.deferred_flush_interval());

    let addr = config.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(addr = %addr, rooms = ?config.rooms, "listening");

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(ServerError::Serve);

    flush_task.abort();
    tracing::info!("server stopped");
    result
}

fn seed_rooms(config: &ServerConfig) -> Vec<Room> {
    config
        .rooms
        .iter()
        .filter_map(|code| match RoomCode::new(code.clone()) {
            Ok(code) => Some(Room::new(code)),
            Err(e) => {
                tracing::warn!(room = %code, error = %e, "skipping invalid room code");
                None
            }
        })
        .collect()
}

/// Wire the services over a store.
pub fn build_state(store: Arc<dyn PresenceStore>, config: &ServerConfig) -> Arc<AppState> {
    let retry = config.retry_policy();
    let registry = Arc::new(ConnectionRegistry::new());
    let teams = Arc::new(TeamCoordinator::new(
        store.clone(),
        registry.clone(),
        retry,
    ));
    let presence = Arc::new(PresenceSynchronizer::new(
        store,
        registry.clone(),
        teams.clone(),
        retry,
        config.event_settings(),
    ));
    let relay = Arc::new(SignalingRelay::new(registry.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(
        registry.clone(),
        presence.clone(),
        teams,
        relay,
    ));

    Arc::new(AppState {
        registry,
        presence,
        dispatcher,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/connections", get(list_connections))
        .route("/ws", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn spawn_deferred_flush(presence: Arc<PresenceSynchronizer>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            presence.flush_deferred().await;
        }
    })
}
