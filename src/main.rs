use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

mod auth;
mod config;
mod db;
mod dto;
mod error;
mod events;
mod handlers;
mod models;
mod services;

use auth::rate_limit::RateLimitState;
use config::Config;
use events::EventBus;
use services::billing::StripeBilling;
use services::drafts::DraftStore;
use services::leads::{LeadPipeline, PgLeadStore, PipelineSettings};
use services::mailer::{Mailer, ResendMailer};
use services::subscription::{PgSubscriberStore, SubscriptionGate};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub events: EventBus,
    pub rate_limiter: RateLimitState,
    pub mailer: Arc<dyn Mailer>,
    pub leads: LeadPipeline,
    pub gate: SubscriptionGate,
    pub drafts: DraftStore,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainer_leads_api=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    let config = Config::from_env();
    let config = Arc::new(config);

    // Database
    let db = db::create_pool(&config.database_url).await;

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .expect("Failed to run database migrations");

    tracing::info!("Database migrations applied");

    if config.stripe_secret_key.is_empty() {
        tracing::warn!("STRIPE_SECRET_KEY not set, billing checks will fail");
    }
    if config.resend_api_key.is_empty() {
        tracing::warn!("RESEND_API_KEY not set, notification emails are disabled");
    }
    if !config.operator_bypass_emails.is_empty() {
        tracing::warn!(
            count = config.operator_bypass_emails.len(),
            "Operator billing bypass enabled"
        );
    }

    let events = EventBus::new(256);
    let rate_limiter = RateLimitState::new();
    let mailer: Arc<dyn Mailer> = Arc::new(ResendMailer::new(
        config.resend_api_key.clone(),
        config.email_from.clone(),
    ));

    let leads = LeadPipeline::new(
        Arc::new(PgLeadStore::new(db.clone())),
        mailer.clone(),
        rate_limiter.clone(),
        events.clone(),
        PipelineSettings::from_config(&config),
    );

    let gate = SubscriptionGate::new(
        Arc::new(StripeBilling::new(
            config.stripe_secret_key.clone(),
            config.subscription_monthly_cents,
            config.subscription_currency.clone(),
        )),
        Arc::new(PgSubscriberStore::new(db.clone())),
        events.clone(),
        config.operator_bypass_emails.clone(),
    );

    let state = AppState {
        db,
        config: config.clone(),
        events,
        rate_limiter,
        mailer,
        leads,
        gate,
        drafts: DraftStore::new(),
    };

    // Evicts expired cooldown and magic-link rate limit entries
    auth::rate_limit::spawn_rate_limit_cleanup_worker(state.rate_limiter.clone());

    let app = build_router(state, cors_layer(&config));

    let addr = config.listen_addr();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind listen address");
    // Client IP feeds the lead cooldowns and the magic-link rate limit
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("Server error");
}

fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let magic_link_routes = Router::new()
        .route("/api/auth/magic-link", post(handlers::auth::request_magic_link))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::rate_limit::rate_limit_auth,
        ));

    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/readyz", get(handlers::health::readyz))
        .route("/api/plans", get(handlers::plans::list_plans))
        .route("/api/contact", post(handlers::contact::submit_contact))
        .route("/api/auth/verify", post(handlers::auth::verify_magic_link))
        .route("/api/billing/webhook", post(handlers::billing::stripe_webhook))
        .route("/ws/chat", get(handlers::chat::chat_ws_handler))
        .route("/ws/admin", get(handlers::ws::admin_ws_handler))
        .merge(magic_link_routes);

    // Signed in, any subscription state
    let account_routes = Router::new()
        .route("/api/me", get(handlers::auth::me))
        .route("/api/billing/subscription", get(handlers::billing::get_subscription))
        .route("/api/billing/checkout", post(handlers::billing::create_checkout));

    // Signed in and entitled
    let lead_routes = Router::new()
        .route(
            "/api/leads",
            get(handlers::leads::list_leads).post(handlers::leads::create_lead),
        )
        .route("/api/leads/usage", get(handlers::leads::lead_usage))
        .route("/api/leads/cleanup", post(handlers::leads::cleanup_leads))
        .route(
            "/api/leads/draft",
            get(handlers::leads::get_draft)
                .put(handlers::leads::save_draft)
                .delete(handlers::leads::discard_draft),
        )
        .route(
            "/api/leads/:kind/:id",
            put(handlers::leads::update_lead).delete(handlers::leads::delete_lead),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_entitled,
        ));

    let admin_routes = account_routes
        .merge(lead_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_auth,
        ));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// FRONTEND_URL plus any comma-separated CORS_EXTRA_ORIGINS.
fn cors_layer(config: &Config) -> CorsLayer {
    let extra = std::env::var("CORS_EXTRA_ORIGINS").unwrap_or_default();
    let origins: Vec<HeaderValue> = std::iter::once(config.frontend_url.as_str())
        .chain(extra.split(',').map(str::trim).filter(|o| !o.is_empty()))
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::error!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::auth::jwt::create_access_token;
    use crate::config::test_config;
    use crate::models::subscriber::BillingStatus;
    use crate::services::billing::tests::{status, ScriptedBilling};
    use crate::services::leads::store::tests::MemoryLeadStore;
    use crate::services::mailer::tests::RecordingMailer;
    use crate::services::subscription::tests::gate_with;

    struct TestApp {
        router: Router,
        store: Arc<MemoryLeadStore>,
        config: Arc<Config>,
    }

    fn test_app() -> TestApp {
        let config = Arc::new(test_config());
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        let events = EventBus::new(16);
        let rate_limiter = RateLimitState::new();
        let mailer: Arc<dyn Mailer> = Arc::new(RecordingMailer::default());
        let store = Arc::new(MemoryLeadStore::with_contact_email("trainer@example.com"));

        let leads = LeadPipeline::new(
            store.clone(),
            mailer.clone(),
            rate_limiter.clone(),
            events.clone(),
            PipelineSettings::from_config(&config),
        );
        let billing = Arc::new(ScriptedBilling::new(vec![Ok(status(
            BillingStatus::Canceled,
            None,
        ))]));

        let state = AppState {
            db,
            config: config.clone(),
            events: events.clone(),
            rate_limiter,
            mailer,
            leads,
            gate: gate_with(billing, events),
            drafts: DraftStore::new(),
        };

        let router = build_router(state, cors_layer(&config))
            .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 4000))));
        TestApp {
            router,
            store,
            config,
        }
    }

    impl TestApp {
        fn bearer(&self, email: &str) -> String {
            let token = create_access_token(Uuid::new_v4(), email, &self.config).unwrap();
            format!("Bearer {}", token.access_token)
        }

        async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = response.into_body().collect().await.unwrap().to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_as(uri: &str, bearer: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::AUTHORIZATION, bearer)
            .body(Body::empty())
            .unwrap()
    }

    fn contact_body() -> Value {
        json!({
            "name": "Ana Souza",
            "email": "ana@example.com",
            "message": "Gostaria de saber os horários disponíveis"
        })
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = test_app();
        let (status, body) = app
            .call(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "trainer-leads-api");
    }

    #[tokio::test]
    async fn test_lead_routes_require_sign_in() {
        let app = test_app();
        let (status, _) = app
            .call(Request::builder().uri("/api/leads").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_lead_routes_require_entitlement() {
        let app = test_app();
        let bearer = app.bearer("admin@example.com");

        let (status, _) = app.call(get_as("/api/leads/usage", &bearer)).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        // Billing stays reachable while restricted
        let (status, body) = app.call(get_as("/api/me", &bearer)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["gate"]["view"]["view"], "restricted");
    }

    #[tokio::test]
    async fn test_operator_reaches_lead_routes() {
        let app = test_app();
        let bearer = app.bearer("owner@example.com");

        let (status, body) = app.call(get_as("/api/leads/usage", &bearer)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["label"], "0/25 leads");
    }

    #[tokio::test]
    async fn test_contact_form_stores_then_cools_down() {
        let app = test_app();

        let (status, body) = app.call(post_json("/api/contact", contact_body())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], true);
        assert_eq!(body["email_sent"], true);
        assert_eq!(app.store.contact_rows().len(), 1);

        let (status, body) = app.call(post_json("/api/contact", contact_body())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert!(body["error"]["retry_after_secs"].as_u64().unwrap() <= 180);
        assert_eq!(app.store.contact_rows().len(), 1);
    }

    #[tokio::test]
    async fn test_contact_form_rejects_links() {
        let app = test_app();
        let mut body = contact_body();
        body["message"] = json!("Visite https://exemplo.com para mais");

        let (status, body) = app.call(post_json("/api/contact", body)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["field"], "message");
        assert!(app.store.contact_rows().is_empty());
    }

    #[tokio::test]
    async fn test_draft_is_cleared_by_manual_create() {
        let app = test_app();
        let bearer = app.bearer("owner@example.com");

        let save = Request::builder()
            .method("PUT")
            .uri("/api/leads/draft")
            .header(header::AUTHORIZATION, &bearer)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "data": { "name": "Bruno" } }).to_string()))
            .unwrap();
        let (status, _) = app.call(save).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call(get_as("/api/leads/draft", &bearer)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["name"], "Bruno");

        let mut create = post_json(
            "/api/leads",
            json!({ "type": "contact", "name": "Bruno", "phone": "11987654321" }),
        );
        create
            .headers_mut()
            .insert(header::AUTHORIZATION, bearer.parse().unwrap());
        let (status, body) = app.call(create).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["type"], "contact");

        let (status, _) = app.call(get_as("/api/leads/draft", &bearer)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
