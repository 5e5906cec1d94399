use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::Validate;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_NAMESPACE: &str = "feira:rl";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_PLATFORM_FEE_PERCENT: f64 = 7.5;
const DEFAULT_DELIVERY_GRACE_DAYS: i64 = 7;
const DEFAULT_CEP_CACHE_TTL_SECS: u64 = 24 * 3600;
const DEFAULT_CEP_LOOKUP_URL: &str = "https://viacep.com.br/ws";

/// Application configuration with validation.
///
/// Values are layered from `config/default.toml`, an environment-specific
/// file, and `FEIRA__`-prefixed environment variables, in that order.
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
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to bootstrap the database schema on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// Public site base URL, used to build payment redirect and webhook
    /// notification URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Payment provider API base URL
    #[serde(default = "default_payment_provider_url")]
    pub payment_provider_url: String,

    /// Payment provider access token
    #[serde(default)]
    pub payment_access_token: Option<String>,

    /// Webhook secret for verifying payment provider callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default = "default_webhook_tolerance_secs")]
    pub payment_webhook_tolerance_secs: u64,

    /// Postal code lookup service base URL
    #[serde(default = "default_cep_lookup_url")]
    pub cep_lookup_url: String,

    /// TTL for cached postal code resolutions (seconds)
    #[serde(default = "default_cep_cache_ttl_secs")]
    pub cep_cache_ttl_secs: u64,

    /// Fiscal document provider API base URL
    #[serde(default)]
    pub fiscal_provider_url: Option<String>,

    /// Fiscal document provider API key
    #[serde(default)]
    pub fiscal_api_key: Option<String>,

    /// Email API endpoint for transactional notifications
    #[serde(default)]
    pub email_api_url: Option<String>,

    /// Email API key
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for transactional email
    #[serde(default = "default_email_from")]
    pub email_from: String,

    /// Platform fee retained by the marketplace, in percent
    #[serde(default = "default_platform_fee_percent")]
    #[validate(custom = "validate_fee_percent")]
    pub platform_fee_percent: f64,

    /// Days after carrier confirmation before delivery is deemed accepted
    #[serde(default = "default_delivery_grace_days")]
    pub delivery_auto_confirm_days: i64,

    /// Rate limiting: requests per window (webhook endpoint, per source IP)
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests_per_window: u32,

    /// Rate limiting: window size (seconds)
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_seconds: u64,

    /// Redis URL for the distributed rate-limit backend; in-process counters
    /// are used when unset
    #[serde(default)]
    pub rate_limit_redis_url: Option<String>,

    /// Namespace for rate limiter keys when Redis is enabled
    #[serde(default = "default_rate_limit_namespace")]
    pub rate_limit_namespace: String,

    /// Event channel capacity for async side-effect processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Creates a minimal configuration, used by tests.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            base_url: default_base_url(),
            payment_provider_url: default_payment_provider_url(),
            payment_access_token: None,
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            cep_lookup_url: default_cep_lookup_url(),
            cep_cache_ttl_secs: default_cep_cache_ttl_secs(),
            fiscal_provider_url: None,
            fiscal_api_key: None,
            email_api_url: None,
            email_api_key: None,
            email_from: default_email_from(),
            platform_fee_percent: default_platform_fee_percent(),
            delivery_auto_confirm_days: default_delivery_grace_days(),
            rate_limit_requests_per_window: default_rate_limit_requests(),
            rate_limit_window_seconds: default_rate_limit_window_secs(),
            rate_limit_redis_url: None,
            rate_limit_namespace: default_rate_limit_namespace(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// URL the payment provider calls back on payment status changes.
    pub fn webhook_notification_url(&self) -> String {
        format!("{}/api/v1/payments/webhook", self.base_url.trim_end_matches('/'))
    }

    /// Redirect URL for a given checkout outcome ("success", "failure", "pending").
    pub fn checkout_return_url(&self, outcome: &str) -> String {
        format!("{}/checkout/{}", self.base_url.trim_end_matches('/'), outcome)
    }
}

fn validate_fee_percent(value: f64) -> Result<(), validator::ValidationError> {
    if !value.is_finite() || !(0.0..=100.0).contains(&value) {
        let mut err = validator::ValidationError::new("platform_fee_percent");
        err.message = Some("platform_fee_percent must be between 0 and 100".into());
        return Err(err);
    }
    Ok(())
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_min_connections() -> u32 {
    1
}

fn default_db_connect_timeout_secs() -> u64 {
    30
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_payment_provider_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_cep_lookup_url() -> String {
    DEFAULT_CEP_LOOKUP_URL.to_string()
}

fn default_cep_cache_ttl_secs() -> u64 {
    DEFAULT_CEP_CACHE_TTL_SECS
}

fn default_email_from() -> String {
    "no-reply@feira.dev".to_string()
}

fn default_platform_fee_percent() -> f64 {
    DEFAULT_PLATFORM_FEE_PERCENT
}

fn default_delivery_grace_days() -> i64 {
    DEFAULT_DELIVERY_GRACE_DAYS
}

fn default_rate_limit_requests() -> u32 {
    DEFAULT_RATE_LIMIT_REQUESTS
}

fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}

fn default_rate_limit_namespace() -> String {
    DEFAULT_RATE_LIMIT_NAMESPACE.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

/// Initialize the tracing subscriber.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("feira_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::try_new(filter_directive)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

/// Loads the application configuration from files and environment.
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

    let builder = Config::builder()
        .set_default("database_url", "sqlite://feira.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    let config = builder
        .add_source(Environment::with_prefix("FEIRA").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.is_production() && app_config.payment_webhook_secret.is_none() {
        error!(
            "payment_webhook_secret is not configured; inbound webhooks will be rejected. \
             Set FEIRA__PAYMENT_WEBHOOK_SECRET."
        );
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite://feira.db?mode=memory".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn notification_url_is_built_from_base_url() {
        let mut cfg = base_config();
        cfg.base_url = "https://shop.example.com/".into();
        assert_eq!(
            cfg.webhook_notification_url(),
            "https://shop.example.com/api/v1/payments/webhook"
        );
        assert_eq!(
            cfg.checkout_return_url("success"),
            "https://shop.example.com/checkout/success"
        );
    }

    #[test]
    fn fee_percent_must_be_a_percentage() {
        let mut cfg = base_config();
        cfg.platform_fee_percent = 150.0;
        assert!(cfg.validate().is_err());

        cfg.platform_fee_percent = 7.5;
        assert!(cfg.validate().is_ok());
    }
}
