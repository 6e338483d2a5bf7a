pub mod codes;
pub mod context;
pub mod effects;
pub mod error;
pub mod grading;
pub mod handlers;
pub mod identity;
pub mod jobs;
pub mod mailer;
pub mod models;
pub mod openapi;
pub mod response;
pub mod session;
pub mod social;
pub mod state;
pub mod store;
pub mod tokens;

use self::handlers::{
    email, goals, health, leads, modules, password, social as social_login, users, waitlist,
};
use self::jobs::{spawn_jobs, JobsConfig};
use self::mailer::Mailer;
use self::session::REFRESH_TOKEN_HEADER;
use self::social::SocialProviders;
use self::state::{AppState, AuthConfig};
use self::store::PgStore;
use self::tokens::TokenService;
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post, put},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub const API_PREFIX: &str = "/api/v0.1";

/// Everything the server needs besides the database.
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub tokens: TokenService,
    pub auth: AuthConfig,
    pub social: SocialProviders,
    pub mailer: Arc<dyn Mailer>,
    /// `None` keeps the background jobs off.
    pub jobs: Option<JobsConfig>,
}

/// Start the server
/// # Errors
/// Return error if failed to connect to the database or to start the server
pub async fn new(config: ServerConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(config.db_max_connections)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&config.dsn)
        .await
        .context("Failed to connect to database")?;

    let store: Arc<dyn store::Store> = Arc::new(PgStore::new(pool));

    let jobs = config.jobs.map(|jobs_config| {
        spawn_jobs(Arc::clone(&store), Arc::clone(&config.mailer), jobs_config)
    });

    let state = Arc::new(AppState::new(
        store,
        config.tokens,
        config.auth,
        config.social,
        config.mailer,
    ));

    let app = router(state);

    let listener = TcpListener::bind(format!("::0:{}", config.port)).await?;

    info!("Listening on [::]:{}", config.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            shutdown_signal().await;
            info!("Gracefully shutdown");
        })
        .await?;

    for handle in jobs.into_iter().flatten() {
        handle.abort();
    }

    Ok(())
}

/// The HTTP surface: health probes, the versioned API and its docs.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/user", post(users::create))
        .route("/user/login", post(users::login))
        .route("/user/token/refresh", get(users::refresh))
        .route("/user/password/forgotten", post(password::forgotten))
        .route("/user/password/reset", post(password::reset))
        .route("/user/social/login", post(social_login::login))
        .route("/user/social/signup", post(social_login::sign_up))
        .route("/user/self", get(users::get_self).put(users::update_self))
        .route("/user/self/password", put(password::change))
        .route("/user/self/learning_progress", get(users::learning_progress))
        .route("/user/self/quizzes/gradings", get(users::quiz_gradings))
        .route("/user/self/goals", get(goals::list).post(goals::create))
        .route("/user/self/goals/:id/complete", put(goals::complete))
        .route("/user/self/goals/:id/incomplete", put(goals::incomplete))
        .route("/user/goals/templates", get(goals::templates))
        .route("/modules", get(modules::list))
        .route("/modules/participants", get(modules::participants))
        .route("/modules/search", get(modules::search))
        .route("/modules/record_progress", post(modules::record_progress))
        .route("/modules/grade", post(modules::grade))
        .route("/waitlist", get(waitlist::list))
        .route("/waitlist/user", post(waitlist::join))
        .route("/email/preview", get(email::preview))
        .route("/leads/modules", get(leads::modules))
        .route("/leads/modules/record_progress", post(leads::record_progress))
        .route(
            "/leads/modules/learning_progress",
            get(leads::learning_progress),
        );

    let cors = CorsLayer::new()
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(REFRESH_TOKEN_HEADER),
            HeaderName::from_static("x-ggwp-device-unique-id"),
        ])
        .expose_headers([AUTHORIZATION, HeaderName::from_static(REFRESH_TOKEN_HEADER)])
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_origin(Any);

    Router::new()
        .route("/ping", get(health::ping))
        .route("/health", get(health::health).options(health::health))
        .nest(API_PREFIX, api)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(middleware::from_fn(error::attach_request_id))
                .layer(cors)
                .layer(Extension(state)),
        )
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
