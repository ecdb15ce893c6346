use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_CURRENCY: &str = "eur";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_OUTBOUND_TIMEOUT_SECS: u64 = 10;

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Storefront origin used to build success/cancel redirects and the login
    /// deep link in the credentials email (e.g. "https://courses.example.com")
    #[validate(length(min = 1), custom = "validate_origin")]
    pub storefront_url: String,

    /// Checkout currency (ISO 4217, lowercase as the processor expects)
    #[serde(default = "default_currency")]
    pub default_currency: String,

    /// Payment processor secret API key
    #[validate(length(min = 1))]
    pub stripe_secret_key: String,

    /// Payment processor API base URL (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Webhook signing secret for verifying payment notifications
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub stripe_webhook_tolerance_secs: u64,

    /// Hosted identity service admin API base URL
    #[validate(length(min = 1))]
    pub auth_api_url: String,

    /// Hosted identity service admin (service-role) key
    #[validate(length(min = 1))]
    pub auth_service_key: String,

    /// Transactional mail API key; credentials mail is skipped when absent
    #[serde(default)]
    pub resend_api_key: Option<String>,

    /// Transactional mail API base URL (overridable for tests)
    #[serde(default = "default_mail_api_base")]
    pub mail_api_base: String,

    /// Sender for the credentials email
    #[serde(default = "default_mail_from")]
    pub mail_from: String,

    /// Timeout for outbound HTTP calls (payment, identity, mail), seconds
    #[serde(default = "default_outbound_timeout_secs")]
    pub outbound_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Success redirect template; the processor substitutes the session id.
    /// The total hint is always rendered with two decimals regardless of the
    /// scale the storage backend hands back.
    pub fn checkout_success_url(&self, total: &rust_decimal::Decimal) -> String {
        format!(
            "{}/#/payment-success?session_id={{CHECKOUT_SESSION_ID}}&total={:.2}",
            self.storefront_url, total
        )
    }

    /// Cancel redirect back to the cart.
    pub fn checkout_cancel_url(&self) -> String {
        format!("{}/#/cart", self.storefront_url)
    }

    /// Login deep link used in the credentials email.
    pub fn login_url(&self) -> String {
        format!("{}/#/login", self.storefront_url)
    }

    pub fn outbound_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.outbound_timeout_secs)
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_stripe_api_base() -> String {
    "https://api.stripe.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_mail_api_base() -> String {
    "https://api.resend.com".to_string()
}

fn default_mail_from() -> String {
    "Academy <no-reply@academy.example>".to_string()
}

fn default_outbound_timeout_secs() -> u64 {
    DEFAULT_OUTBOUND_TIMEOUT_SECS
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// The storefront origin ends up embedded in redirect URLs and emails;
/// reject obviously broken values early.
fn validate_origin(url: &str) -> Result<(), ValidationError> {
    let trimmed = url.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        let mut err = ValidationError::new("storefront_url");
        err.message = Some("Must be an absolute http(s) origin".into());
        return Err(err);
    }
    if trimmed.ends_with('/') {
        let mut err = ValidationError::new("storefront_url");
        err.message = Some("Must not carry a trailing slash".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("academy_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Default config (config/default.toml)
/// 2. Environment-specific config (config/{env}.toml)
/// 3. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://academy.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", 8080)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    // Secrets have no defaults on purpose; report all the missing ones at
    // once instead of failing on the first.
    let required_secrets = [
        ("stripe_secret_key", "APP__STRIPE_SECRET_KEY"),
        ("auth_api_url", "APP__AUTH_API_URL"),
        ("auth_service_key", "APP__AUTH_SERVICE_KEY"),
        ("storefront_url", "APP__STOREFRONT_URL"),
    ];
    let missing: Vec<&str> = required_secrets
        .iter()
        .filter(|(key, _)| config.get_string(key).is_err())
        .map(|(_, env_var)| *env_var)
        .collect();
    if !missing.is_empty() {
        error!(
            "Required configuration missing; set {} (environment variables or config/*.toml)",
            missing.join(", ")
        );
        return Err(AppConfigError::Load(ConfigError::NotFound(format!(
            "required configuration not set: {}",
            missing.join(", ")
        ))));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

/// Baseline configuration for unit tests elsewhere in the crate.
#[cfg(test)]
pub(crate) fn test_app_config() -> AppConfig {
    AppConfig {
        database_url: "sqlite::memory:".into(),
        host: "127.0.0.1".into(),
        port: 8080,
        environment: "development".into(),
        log_level: default_log_level(),
        log_json: false,
        auto_migrate: false,
        cors_allowed_origins: None,
        db_max_connections: default_db_max_connections(),
        db_min_connections: default_db_min_connections(),
        db_connect_timeout_secs: default_db_connect_timeout_secs(),
        db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
        storefront_url: "https://courses.example.com".into(),
        default_currency: default_currency(),
        stripe_secret_key: "sk_test_123".into(),
        stripe_api_base: default_stripe_api_base(),
        stripe_webhook_secret: Some("whsec_test".into()),
        stripe_webhook_tolerance_secs: default_webhook_tolerance_secs(),
        auth_api_url: "https://auth.example.com".into(),
        auth_service_key: "service-role-key".into(),
        resend_api_key: None,
        mail_api_base: default_mail_api_base(),
        mail_from: default_mail_from(),
        outbound_timeout_secs: default_outbound_timeout_secs(),
        event_channel_capacity: default_event_channel_capacity(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn base_config() -> AppConfig {
        test_app_config()
    }

    #[test]
    fn success_url_embeds_session_placeholder_and_total() {
        let cfg = base_config();
        let url = cfg.checkout_success_url(&dec!(75.00));
        assert_eq!(
            url,
            "https://courses.example.com/#/payment-success?session_id={CHECKOUT_SESSION_ID}&total=75.00"
        );
        assert_eq!(
            cfg.checkout_cancel_url(),
            "https://courses.example.com/#/cart"
        );
    }

    #[test]
    fn success_url_total_is_two_decimals_at_any_scale() {
        let cfg = base_config();
        // Scale-0 and scale-3 decimals both render as a money amount
        assert!(cfg.checkout_success_url(&dec!(75)).ends_with("total=75.00"));
        assert!(cfg.checkout_success_url(&dec!(9.5)).ends_with("total=9.50"));
    }

    #[test]
    fn origin_validation_rejects_trailing_slash_and_bare_host() {
        assert!(validate_origin("https://courses.example.com").is_ok());
        assert!(validate_origin("https://courses.example.com/").is_err());
        assert!(validate_origin("courses.example.com").is_err());
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }
}
