//! Blogwire - real-time notification and presence fan-out for the blog platform
//!
//! The server half is a STOMP-over-WebSocket broker plus a small REST API for
//! admin notifications. The client half (`client::Hub`) keeps one shared broker
//! session per process and turns its traffic into presence, notification and
//! toast state for any number of UI consumers.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod services;
pub mod stomp;
pub mod types;
pub mod websocket;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::ServerConfig;
use services::{AuthError, NotificationService, TokenService};
use websocket::Broker;

pub use client::{Hub, HubConsumer, HubSnapshot};
pub use config::ClientConfig;
pub use error::{AppError, Result};
pub use types::*;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub broker: Arc<Broker>,
    pub notifications: Arc<NotificationService>,
    pub tokens: Arc<TokenService>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> std::result::Result<Self, AuthError> {
        let tokens = Arc::new(TokenService::new(&config.token_secret)?);
        let broker = Broker::new();
        let notifications = Arc::new(NotificationService::new(
            broker.clone(),
            config.notification_retention,
        ));

        Ok(Self {
            config: Arc::new(config),
            broker,
            notifications,
            tokens,
        })
    }
}

/// Build the HTTP + WebSocket application.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api::router())
        .route("/ws", get(websocket::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
