//! Tagged Backend
//!
//! REST backend for the Tagged weekly photo challenge: groups share a
//! rotating weekly prompt, members post one photo per week, and streaks and
//! points accrue, or decay when a week is missed. SQLite persistence,
//! version-checked writes throughout, and a weekly rotation scheduler.

mod api;
mod auth;
mod config;
mod db;
mod engine;
mod errors;
mod events;
mod models;
mod moderation;
mod notify;
mod services;
mod week;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use events::EventBus;
use services::{BlobClient, PushClient, SafetyClient};

/// Events buffered per subscriber before a slow consumer starts lagging.
const EVENT_BUS_CAPACITY: usize = 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub bus: EventBus,
    pub config: Arc<Config>,
    pub blobs: Option<Arc<BlobClient>>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env();

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tagged Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (TAGGED_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Event bus connecting the engines to moderation and notification
    let bus = EventBus::new(EVENT_BUS_CAPACITY);

    let blobs = config
        .blob_url
        .clone()
        .map(|url| Arc::new(BlobClient::new(url)));

    // Background workers
    tokio::spawn(engine::rotation::run_scheduler(
        repo.clone(),
        bus.clone(),
        config.rotation_check_interval,
    ));
    tokio::spawn(moderation::run(
        repo.clone(),
        config.vision_url.clone().map(SafetyClient::new),
        bus.clone(),
    ));
    tokio::spawn(notify::run(
        repo.clone(),
        config.push_url.clone().map(PushClient::new),
        bus.clone(),
    ));

    // Create application state
    let state = AppState {
        repo,
        bus,
        config: Arc::new(config.clone()),
        blobs,
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();

    // API routes
    let api_routes = Router::new()
        // Groups
        .route("/groups", post(api::create_group))
        .route("/groups", get(api::list_groups))
        .route("/groups/join", post(api::join_group))
        .route("/groups/{id}", get(api::get_group))
        .route("/groups/{id}", delete(api::delete_group))
        .route("/groups/{id}/settings", post(api::update_settings))
        .route("/groups/{id}/rotate", post(api::rotate_now))
        .route("/groups/{id}/leaderboard", get(api::leaderboard))
        // Posts
        .route("/groups/{id}/posts", post(api::create_post))
        .route("/groups/{id}/posts", get(api::list_week_posts))
        .route("/posts/{id}", delete(api::delete_post))
        .route("/posts/{id}/like", post(api::toggle_like))
        // Users
        .route("/users/me", put(api::upsert_me))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
