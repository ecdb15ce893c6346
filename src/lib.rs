pub mod clients;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod storefront;

use crate::clients::identity::AuthAdminClient;
use crate::clients::mail::ResendMailer;
use crate::clients::payment::StripeCheckoutClient;
use crate::services::checkout::CheckoutService;
use crate::services::fulfillment::FulfillmentService;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Services shared by the HTTP handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub fulfillment: Arc<FulfillmentService>,
}

impl AppServices {
    /// Wires the outbound clients and services from configuration.
    pub fn from_config(
        db: Arc<db::DbPool>,
        config: &config::AppConfig,
        event_sender: events::EventSender,
    ) -> Result<Self, errors::ServiceError> {
        let timeout = config.outbound_timeout();

        let payment = Arc::new(StripeCheckoutClient::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            timeout,
        )?);
        let identity = Arc::new(AuthAdminClient::new(
            config.auth_api_url.clone(),
            config.auth_service_key.clone(),
            timeout,
        )?);
        let mailer = match &config.resend_api_key {
            Some(api_key) => Some(Arc::new(ResendMailer::new(
                config.mail_api_base.clone(),
                api_key.clone(),
                config.mail_from.clone(),
                timeout,
            )?) as Arc<dyn clients::mail::MailSender>),
            None => {
                warn!("Mail API key not configured; credentials emails will be skipped");
                None
            }
        };

        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            payment,
            event_sender.clone(),
            config.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            db,
            identity,
            mailer,
            event_sender,
            config.login_url(),
        ));

        Ok(Self {
            checkout,
            fulfillment,
        })
    }
}

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: AppServices,
}

/// Versioned API surface.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/checkout/sessions",
            post(handlers::checkout::create_checkout_session),
        )
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
}

/// Builds the full application router with middleware applied.
pub fn app(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/", get(|| async { "academy-api up" }))
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

fn cors_layer(config: &config::AppConfig) -> CorsLayer {
    let configured: Vec<http::HeaderValue> = config
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .filter_map(|origin| {
            let trimmed = origin.trim();
            if trimmed.is_empty() {
                None
            } else {
                http::HeaderValue::from_str(trimmed).ok()
            }
        })
        .collect();

    if !configured.is_empty() {
        info!("CORS restricted to {} configured origin(s)", configured.len());
        CorsLayer::new()
            .allow_origin(configured)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        if config.is_production() {
            warn!("No CORS origins configured in production; defaulting to permissive");
        }
        CorsLayer::permissive()
    }
}
