/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use advocate_api::{app::{build_router, AppState}, config::Config};
/// use advocate_shared::{auth::build_identity_provider, calendar::SystemClock, store::connect_store};
/// use std::sync::Arc;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let store = connect_store(&config.store).await?;
/// let identity = build_identity_provider(&config.identity)?;
/// let state = AppState::new(config, store, identity, Arc::new(SystemClock))?;
/// let app = build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{
    config::Config,
    error::ApiError,
    middleware::{
        auth::auth_layer,
        rate_limit::{rate_limit_layer, RateLimiter},
        security::SecurityHeadersLayer,
    },
};
use advocate_shared::auth::IdentityProvider;
use advocate_shared::calendar::{Calendar, Clock};
use advocate_shared::store::RecordStore;
use advocate_worker::sweep::ReminderSweep;
use axum::{
    http::{header, HeaderValue, Method, Uri},
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
/// Uses Arc internally for cheap cloning.
#[derive(Clone)]
pub struct AppState {
    /// Cases and users
    pub store: Arc<dyn RecordStore>,

    /// Verifies bearer tokens
    pub identity: Arc<dyn IdentityProvider>,

    pub clock: Arc<dyn Clock>,

    /// Calendar days are counted in the reminder time zone
    pub calendar: Calendar,

    /// Present when this process may run the reminder sweep
    pub sweep: Option<Arc<ReminderSweep>>,

    pub rate_limiter: Arc<RateLimiter>,

    /// Application configuration
    pub config: Arc<Config>,

    /// Process start, reported as uptime
    pub started_at: Instant,
}

impl AppState {
    /// Creates new application state
    ///
    /// # Errors
    ///
    /// Fails if the configured UTC offset is out of range.
    pub fn new(
        config: Config,
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentityProvider>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            identity,
            clock,
            calendar: config.reminder.calendar()?,
            sweep: None,
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit)),
            config: Arc::new(config),
            started_at: Instant::now(),
        })
    }

    /// Attaches the sweep behind the manual trigger
    pub fn with_sweep(mut self, sweep: Arc<ReminderSweep>) -> Self {
        self.sweep = Some(sweep);
        self
    }

    /// Today in the reminder time zone
    pub fn today(&self) -> chrono::NaiveDate {
        self.calendar.today(self.clock.as_ref())
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /api
/// ├── GET  /health                      # Health check (public)
/// ├── GET  /                            # Service info (public)
/// ├── /cases                            # authenticated, rate limited
/// │   ├── GET    /                      # list (?completed=)
/// │   ├── POST   /                      # create
/// │   ├── GET    /search?q=
/// │   ├── GET    /stats
/// │   ├── GET    /upcoming/:days
/// │   ├── GET    /overdue
/// │   ├── GET    /:id
/// │   ├── PUT    /:id
/// │   ├── DELETE /:id
/// │   ├── POST   /:id/complete
/// │   └── POST   /:id/reset-reminder
/// ├── /users/me                         # authenticated, rate limited
/// │   ├── GET    /
/// │   ├── PUT    /preferences
/// │   ├── POST   /devices
/// │   ├── DELETE /devices
/// │   └── DELETE /devices/all
/// └── POST /reminders/run               # authenticated, rate limited
/// ```
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. Security headers
/// 2. CORS (tower-http CorsLayer)
/// 3. Logging (tower-http TraceLayer)
/// 4. Authentication then rate limiting (protected routes only)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let public_routes = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/", get(routes::health::service_info));

    let case_routes = Router::new()
        .route("/", get(routes::cases::list_cases).post(routes::cases::create_case))
        .route("/search", get(routes::cases::search_cases))
        .route("/stats", get(routes::cases::case_stats))
        .route("/upcoming/:days", get(routes::cases::upcoming_cases))
        .route("/overdue", get(routes::cases::overdue_cases))
        .route(
            "/:id",
            get(routes::cases::get_case)
                .put(routes::cases::update_case)
                .delete(routes::cases::delete_case),
        )
        .route("/:id/complete", post(routes::cases::complete_case))
        .route("/:id/reset-reminder", post(routes::cases::reset_reminder));

    let user_routes = Router::new()
        .route("/", get(routes::users::get_me))
        .route("/preferences", put(routes::users::update_preferences))
        .route(
            "/devices",
            post(routes::users::register_device).delete(routes::users::remove_device),
        )
        .route("/devices/all", delete(routes::users::clear_devices));

    let protected_routes = Router::new()
        .nest("/cases", case_routes)
        .nest("/users/me", user_routes)
        .route("/reminders/run", post(routes::reminders::run_reminders))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            rate_limit_layer,
        ))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_layer));

    let api_routes = Router::new().merge(public_routes).merge(protected_routes);

    let cors = if state.config.api.cors_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .api
            .cors_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .allow_credentials(true)
            .max_age(std::time::Duration::from_secs(3600))
    };

    Router::new()
        .nest("/api", api_routes)
        .fallback(route_not_found)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .layer(SecurityHeadersLayer::new(state.config.api.production))
        .with_state(state)
}

async fn route_not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("Route not found: {}", uri.path()))
}
