use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_API_BASE_URL: &str = "https://api.paymongo.com/v1";
const DEFAULT_GATEWAY_TITLE: &str = "Credit Card via PayMongo";
const DEFAULT_GATEWAY_DESCRIPTION: &str = "Simple and easy payments.";

/// Storefront settings the gateway needs to build customer-facing URLs.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Store name, prefixed to every intent description
    #[serde(default = "default_store_name")]
    #[validate(length(min = 1))]
    pub name: String,

    /// Absolute base URL of the storefront (no trailing slash required)
    #[validate(custom = "validate_http_url")]
    pub home_url: String,
}

impl StoreConfig {
    /// Joins a path onto the storefront base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.home_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn is_https(&self) -> bool {
        self.home_url.to_ascii_lowercase().starts_with("https://")
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            name: default_store_name(),
            home_url: "http://localhost:8080".to_string(),
        }
    }
}

/// Which credential set the gateway talks to the processor with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayMode {
    Test,
    Live,
}

impl GatewayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayMode::Test => "test",
            GatewayMode::Live => "live",
        }
    }
}

/// Credentials for exactly one mode. Every processor call goes through one of
/// these, so a single call can never combine live and test keys.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    pub mode: GatewayMode,
    pub secret_key: &'a str,
    pub public_key: &'a str,
    pub webhook_secret: Option<&'a str>,
}

impl fmt::Debug for Credentials<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("mode", &self.mode)
            .field("public_key", &self.public_key)
            .field("secret_key", &"[redacted]")
            .finish()
    }
}

/// Payment gateway settings.
#[derive(Clone, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Title shown to the customer at checkout
    #[serde(default = "default_gateway_title")]
    pub title: String,

    /// Description shown under the card form
    #[serde(default = "default_gateway_description")]
    pub description: String,

    #[serde(default = "default_true_bool", alias = "testmode")]
    pub test_mode: bool,

    #[serde(default)]
    pub live_public_key: String,
    #[serde(default)]
    pub live_secret_key: String,
    #[serde(default)]
    pub test_public_key: String,
    #[serde(default)]
    pub test_secret_key: String,

    /// Webhook signing secret for live mode
    #[serde(default)]
    pub webhook_secret_key: Option<String>,
    /// Webhook signing secret for test mode
    #[serde(default)]
    pub test_webhook_secret_key: Option<String>,

    #[serde(default = "default_api_base_url")]
    #[validate(custom = "validate_http_url")]
    pub api_base_url: String,

    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    #[validate(range(min = 1, max = 60))]
    pub connect_timeout_secs: u64,

    /// Pause before the single status-query retry
    #[serde(default = "default_fetch_retry_delay_ms")]
    pub fetch_retry_delay_ms: u64,

    /// Accepted clock skew for webhook signatures
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            title: default_gateway_title(),
            description: default_gateway_description(),
            test_mode: true,
            live_public_key: String::new(),
            live_secret_key: String::new(),
            test_public_key: String::new(),
            test_secret_key: String::new(),
            webhook_secret_key: None,
            test_webhook_secret_key: None,
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            fetch_retry_delay_ms: default_fetch_retry_delay_ms(),
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("enabled", &self.enabled)
            .field("title", &self.title)
            .field("test_mode", &self.test_mode)
            .field("live_public_key", &self.live_public_key)
            .field("test_public_key", &self.test_public_key)
            .field("live_secret_key", &redact(&self.live_secret_key))
            .field("test_secret_key", &redact(&self.test_secret_key))
            .field("api_base_url", &self.api_base_url)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "[redacted]"
    }
}

impl GatewayConfig {
    pub fn mode(&self) -> GatewayMode {
        if self.test_mode {
            GatewayMode::Test
        } else {
            GatewayMode::Live
        }
    }

    /// Credential set of the active mode.
    pub fn credentials(&self) -> Credentials<'_> {
        match self.mode() {
            GatewayMode::Test => Credentials {
                mode: GatewayMode::Test,
                secret_key: &self.test_secret_key,
                public_key: &self.test_public_key,
                webhook_secret: non_empty(self.test_webhook_secret_key.as_deref()),
            },
            GatewayMode::Live => Credentials {
                mode: GatewayMode::Live,
                secret_key: &self.live_secret_key,
                public_key: &self.live_public_key,
                webhook_secret: non_empty(self.webhook_secret_key.as_deref()),
            },
        }
    }

    /// True when the active mode has both keys configured.
    pub fn has_keys(&self) -> bool {
        let creds = self.credentials();
        !creds.secret_key.trim().is_empty() && !creds.public_key.trim().is_empty()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn fetch_retry_delay(&self) -> Duration {
        Duration::from_millis(self.fetch_retry_delay_ms)
    }

    fn validate_keys(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        if self.enabled {
            let creds = self.credentials();
            if creds.secret_key.trim().is_empty() {
                let mut err = ValidationError::new("secret_key_required");
                err.message = Some(
                    format!(
                        "The gateway is enabled in {} mode but its secret key is not set",
                        creds.mode.as_str()
                    )
                    .into(),
                );
                errors.add("secret_key", err);
            }
            if creds.public_key.trim().is_empty() {
                let mut err = ValidationError::new("public_key_required");
                err.message = Some(
                    format!(
                        "The gateway is enabled in {} mode but its public key is not set",
                        creds.mode.as_str()
                    )
                    .into(),
                );
                errors.add("public_key", err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

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

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Upper bound for a whole inbound HTTP request
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub store: StoreConfig,

    #[serde(default)]
    #[validate]
    pub paymongo: GatewayConfig,
}

impl AppConfig {
    /// Creates a new configuration with a disabled gateway
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
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            http_timeout_secs: default_http_timeout_secs(),
            store: StoreConfig::default(),
            paymongo: GatewayConfig::default(),
        }
    }

    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        self.paymongo.validate_keys()?;

        if self.is_production() && self.paymongo.enabled && self.paymongo.test_mode {
            let mut errors = ValidationErrors::new();
            let mut err = ValidationError::new("test_mode_in_production");
            err.message = Some(
                "PayMongo test mode is enabled in production; set APP__PAYMONGO__TEST_MODE=false"
                    .into(),
            );
            errors.add("test_mode", err);
            return Err(errors);
        }

        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_store_name() -> String {
    "Store".to_string()
}

fn default_gateway_title() -> String {
    DEFAULT_GATEWAY_TITLE.to_string()
}

fn default_gateway_description() -> String {
    DEFAULT_GATEWAY_DESCRIPTION.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}
fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_fetch_retry_delay_ms() -> u64 {
    250
}
fn default_webhook_tolerance_secs() -> u64 {
    300
}
fn default_http_timeout_secs() -> u64 {
    60
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
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_true_bool() -> bool {
    true
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

fn validate_http_url(value: &str) -> Result<(), ValidationError> {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(()),
        _ => {
            let mut err = ValidationError::new("url");
            err.message = Some("Must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("paymongo_checkout={},tower_http=debug", level);
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
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*, nested with `__`, e.g. APP__PAYMONGO__TEST_SECRET_KEY)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
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
        .set_default("database_url", "sqlite://paymongo_checkout.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("store.home_url", "http://localhost:8080")?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Gateway configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!(
        mode = app_config.paymongo.mode().as_str(),
        enabled = app_config.paymongo.enabled,
        "Configuration loaded successfully"
    );
    Ok(app_config)
}
