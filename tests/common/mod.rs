//! Shared test fixtures: an in-memory database with the real schema, fake
//! outbound clients, and helpers to assemble the application under test.

use academy_api::clients::identity::{IdentityProvider, IdentityUser, NewIdentity};
use academy_api::clients::mail::{MailSender, OutboundEmail};
use academy_api::clients::payment::{CheckoutSessionRequest, HostedCheckout, PaymentProvider};
use academy_api::config::AppConfig;
use academy_api::entities::course;
use academy_api::errors::ServiceError;
use academy_api::events::EventSender;
use academy_api::services::checkout::CheckoutService;
use academy_api::services::fulfillment::FulfillmentService;
use academy_api::{AppServices, AppState};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveValue::Set, DatabaseConnection, EntityTrait};
use sea_orm_migration::MigratorTrait;
use sha2::Sha256;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub async fn setup_db() -> DatabaseConnection {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    academy_api::migrator::Migrator::up(&db, None)
        .await
        .expect("migrations");
    db
}

pub async fn seed_course(
    db: &DatabaseConnection,
    id: &str,
    price: Decimal,
    discounted: Option<Decimal>,
) {
    let now = Utc::now();
    course::Entity::insert(course::ActiveModel {
        id: Set(id.to_string()),
        title: Set(format!("Course {}", id)),
        description: Set(format!("Description for {}", id)),
        image: Set(None),
        price: Set(price),
        discounted_price: Set(discounted),
        lessons: Set(serde_json::json!([])),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .exec(db)
    .await
    .expect("seed course");
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 0,
        environment: "development".into(),
        log_level: "info".into(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        db_max_connections: 4,
        db_min_connections: 1,
        db_connect_timeout_secs: 5,
        db_acquire_timeout_secs: 5,
        storefront_url: "https://courses.example.com".into(),
        default_currency: "eur".into(),
        stripe_secret_key: "sk_test_123".into(),
        stripe_api_base: "https://api.stripe.example".into(),
        stripe_webhook_secret: Some(WEBHOOK_SECRET.into()),
        stripe_webhook_tolerance_secs: 300,
        auth_api_url: "https://auth.example.com".into(),
        auth_service_key: "service-role-key".into(),
        resend_api_key: Some("re_test".into()),
        mail_api_base: "https://mail.example.com".into(),
        mail_from: "Academy <no-reply@academy.example>".into(),
        outbound_timeout_secs: 5,
        event_channel_capacity: 64,
    }
}

/// Signs a webhook body the way the payment processor does.
pub fn sign_webhook(body: &[u8], secret: &str) -> String {
    let timestamp = Utc::now().timestamp();
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    )
}

/// Records checkout session requests; always returns the same hosted session.
#[derive(Default)]
pub struct FakePaymentProvider {
    pub requests: Mutex<Vec<CheckoutSessionRequest>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<HostedCheckout, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentProviderError(
                "simulated processor outage".into(),
            ));
        }
        self.requests.lock().unwrap().push(request);
        Ok(HostedCheckout {
            session_id: "cs_test_123".into(),
            redirect_url: "https://pay.example/session/cs_test_123".into(),
        })
    }
}

/// In-memory identity service with switchable failure modes.
#[derive(Default)]
pub struct FakeIdentityProvider {
    pub users: Mutex<Vec<IdentityUser>>,
    pub created: Mutex<Vec<NewIdentity>>,
    pub fail_lookup: AtomicBool,
    pub fail_create: AtomicBool,
}

impl FakeIdentityProvider {
    pub fn with_user(self, id: Uuid, email: &str) -> Self {
        self.users.lock().unwrap().push(IdentityUser {
            id,
            email: email.to_string(),
        });
        self
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentityProvider {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<IdentityUser>, ServiceError> {
        if self.fail_lookup.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "simulated identity outage".into(),
            ));
        }
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_user(&self, new_user: NewIdentity) -> Result<IdentityUser, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::IdentityProvisioning(
                "simulated creation failure".into(),
            ));
        }
        let user = IdentityUser {
            id: Uuid::new_v4(),
            email: new_user.email.clone(),
        };
        self.users.lock().unwrap().push(user.clone());
        self.created.lock().unwrap().push(new_user);
        Ok(user)
    }
}

/// Records sent emails; can be told to fail.
#[derive(Default)]
pub struct FakeMailSender {
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl MailSender for FakeMailSender {
    async fn send(&self, email: OutboundEmail) -> Result<String, ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::MailDelivery("simulated mail outage".into()));
        }
        self.sent.lock().unwrap().push(email);
        Ok(format!("delivery-{}", Uuid::new_v4()))
    }
}

/// The application wired against fakes, with handles to inspect them.
pub struct TestApp {
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub payment: Arc<FakePaymentProvider>,
    pub identity: Arc<FakeIdentityProvider>,
    pub mail: Arc<FakeMailSender>,
}

pub async fn build_app() -> TestApp {
    build_app_with(FakeIdentityProvider::default()).await
}

pub async fn build_app_with(identity: FakeIdentityProvider) -> TestApp {
    let db = Arc::new(setup_db().await);
    let config = test_config();

    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let event_sender = EventSender::new(event_tx);
    tokio::spawn(academy_api::events::process_events(event_rx));

    let payment = Arc::new(FakePaymentProvider::default());
    let identity = Arc::new(identity);
    let mail = Arc::new(FakeMailSender::default());

    let checkout = Arc::new(CheckoutService::new(
        db.clone(),
        payment.clone(),
        event_sender.clone(),
        config.clone(),
    ));
    let fulfillment = Arc::new(FulfillmentService::new(
        db.clone(),
        identity.clone(),
        Some(mail.clone()),
        event_sender.clone(),
        config.login_url(),
    ));

    let state = AppState {
        db: db.clone(),
        config,
        event_sender,
        services: AppServices {
            checkout,
            fulfillment,
        },
    };

    TestApp {
        state,
        db,
        payment,
        identity,
        mail,
    }
}
