//! Fellowship Backend
//!
//! Church community application core: sessions, live views over a document
//! store, authorization rules, mutations and retention sweeps, served over
//! REST and server-sent events with SQLite persistence.

mod api;
mod auth;
mod config;
mod errors;
mod gateway;
mod identity;
mod models;
mod rules;
mod store;
mod sweeper;
mod views;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use gateway::MutationGateway;
use identity::{AdminPolicy, SessionStore, SqliteIdentityProvider};
use store::{DocumentStore, SqliteDocumentStore, SubscriptionManager};
use sweeper::RetentionSweeper;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub sessions: Arc<SessionStore>,
    pub gateway: Arc<MutationGateway>,
    pub subscriptions: SubscriptionManager,
    pub sweeper: Arc<RetentionSweeper>,
}

impl AppState {
    /// Wire every component onto one database pool.
    pub fn new(pool: sqlx::SqlitePool, config: &Config) -> Self {
        let store: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(pool.clone()));
        let provider = Arc::new(SqliteIdentityProvider::new(pool));
        let sessions = SessionStore::new(
            provider,
            store.clone(),
            AdminPolicy::new(config.admin_email.clone()),
            config.session_ttl(),
        );

        Self {
            sessions: Arc::new(sessions),
            gateway: Arc::new(MutationGateway::new(store.clone())),
            subscriptions: SubscriptionManager::new(store.clone()),
            sweeper: Arc::new(RetentionSweeper::new(store.clone(), config.message_retention())),
            store,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if config.log_json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("Starting Fellowship Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.admin_email.is_none() {
        tracing::warn!("No admin email configured (FELLOWSHIP_ADMIN_EMAIL). Nobody can manage teams or events!");
    }

    // Initialize database
    let pool = store::init_database(&config.db_path).await?;

    let bind_addr = config.bind_addr;
    let state = AppState::new(pool, &config);

    // Bring stored roles in line with the configured admin address
    let changed = state.sessions.bootstrap_admin_role().await?;
    tracing::info!("Admin role bootstrap updated {} profiles", changed);

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("Server listening on {}", bind_addr);

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

    // Routes that require a signed-in session
    let session_routes = Router::new()
        // Session
        .route("/auth/signout", post(api::sign_out))
        .route("/auth/me", get(api::current_identity))
        .route("/auth/me", put(api::update_profile))
        // Views
        .route("/views/dashboard", get(api::dashboard_view))
        .route("/views/dashboard/stream", get(api::dashboard_stream))
        .route("/views/events", get(api::events_view))
        .route("/views/events/stream", get(api::events_stream))
        .route("/views/roster", get(api::roster_view))
        .route("/views/roster/stream", get(api::roster_stream))
        .route("/views/teams", get(api::teams_view))
        .route("/views/teams/stream", get(api::teams_stream))
        .route("/views/admin", get(api::admin_view))
        .route("/views/admin/stream", get(api::admin_stream))
        // Events
        .route("/events", post(api::create_event))
        .route("/events/{id}", delete(api::delete_event))
        .route("/events/{id}/rsvp", post(api::rsvp_event))
        // Roster
        .route("/services", post(api::create_service))
        .route("/services/{id}/roles/{role}", post(api::volunteer))
        .route("/services/{id}/roles/{role}", delete(api::cancel_role))
        .route("/restrictions/{role}", put(api::set_restriction))
        .route("/restrictions/{role}", delete(api::clear_restriction))
        // Teams
        .route("/teams", post(api::create_team))
        .route("/teams/{id}", put(api::rename_team))
        .route("/teams/{id}", delete(api::delete_team))
        .route("/teams/{id}/messages", post(api::send_message))
        // Users
        .route("/users/{id}", delete(api::delete_user))
        .route("/users/{id}/teams/{team}", put(api::add_team_member))
        .route("/users/{id}/teams/{team}", delete(api::remove_team_member))
        // Apply session auth middleware
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            auth::session_layer,
        ));

    // Sign-up and sign-in (no session required)
    let public_routes = Router::new()
        .route("/auth/signup", post(api::sign_up))
        .route("/auth/signin", post(api::sign_in));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", session_routes.merge(public_routes))
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
