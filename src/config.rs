use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use config::builder::DefaultState;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use validator::{Validate, ValidationError, ValidationErrors};

const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "APP";
const DEVELOPMENT: &str = "development";

/// Signing key used only when running in development with no key configured.
pub const DEV_DEFAULT_JWT_SECRET: &str =
    "development_only_custody_signing_key_replace_before_any_deployment";

/// Placeholder keys copied from sample files; never accepted.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "changeme",
    "change_me_before_deploying",
    "your-secret-key",
    "secret",
];

mod defaults {
    pub fn auth_issuer() -> String {
        "custody-api".into()
    }
    pub fn auth_audience() -> String {
        "custody-clients".into()
    }
    pub fn port() -> u16 {
        8080
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn db_max_connections() -> u32 {
        10
    }
    pub fn db_min_connections() -> u32 {
        1
    }
    pub fn db_connect_timeout_secs() -> u64 {
        10
    }
    pub fn db_idle_timeout_secs() -> u64 {
        300
    }
    pub fn db_acquire_timeout_secs() -> u64 {
        5
    }
    pub fn hierarchy_max_depth() -> usize {
        10
    }
    pub fn event_channel_capacity() -> usize {
        256
    }
    pub fn api_default_page_size() -> u64 {
        20
    }
    pub fn api_max_page_size() -> u64 {
        100
    }
}

/// Runtime settings for the custody service.
///
/// Every key can be set in `config/*.toml` or through `APP__<KEY>`.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// `sqlite://...` or `postgres://...`
    pub database_url: String,

    /// HS256 key for session tokens
    #[validate(length(min = 32), custom = "check_jwt_secret")]
    pub jwt_secret: String,

    /// Session token lifetime in seconds
    #[validate(range(min = 300, max = 86400))]
    pub jwt_expiration: usize,

    #[serde(default = "defaults::auth_issuer")]
    pub auth_issuer: String,
    #[serde(default = "defaults::auth_audience")]
    pub auth_audience: String,

    pub host: String,
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// `development`, `staging`, `production`...
    pub environment: String,

    #[serde(default = "defaults::log_level")]
    #[validate(custom = "check_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub auto_migrate: bool,

    /// Comma-separated origins allowed by CORS
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,
    /// Opt into a permissive CORS layer outside development
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "defaults::db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,
    #[serde(default = "defaults::db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "defaults::db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "defaults::db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "defaults::db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Deepest unit level a hierarchy walk may reach below its start.
    #[serde(default = "defaults::hierarchy_max_depth")]
    #[validate(range(min = 1, max = 64))]
    pub hierarchy_max_depth: usize,

    /// Buffered domain events before publishers start dropping
    #[serde(default = "defaults::event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    #[serde(default = "defaults::api_default_page_size")]
    #[validate(range(min = 1))]
    pub api_default_page_size: u64,
    #[serde(default = "defaults::api_max_page_size")]
    #[validate(range(min = 1))]
    pub api_max_page_size: u64,
}

impl AppConfig {
    /// Builds a configuration from the required keys; everything else takes
    /// its default.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        jwt_expiration: usize,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            jwt_expiration,
            auth_issuer: defaults::auth_issuer(),
            auth_audience: defaults::auth_audience(),
            host,
            port,
            environment,
            log_level: defaults::log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: defaults::db_max_connections(),
            db_min_connections: defaults::db_min_connections(),
            db_connect_timeout_secs: defaults::db_connect_timeout_secs(),
            db_idle_timeout_secs: defaults::db_idle_timeout_secs(),
            db_acquire_timeout_secs: defaults::db_acquire_timeout_secs(),
            hierarchy_max_depth: defaults::hierarchy_max_depth(),
            event_channel_capacity: defaults::event_channel_capacity(),
            api_default_page_size: defaults::api_default_page_size(),
            api_max_page_size: defaults::api_max_page_size(),
        }
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case(DEVELOPMENT)
    }

    /// Non-empty entries of `cors_allowed_origins`.
    pub fn cors_origins(&self) -> impl Iterator<Item = &str> {
        self.cors_allowed_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    pub fn jwt_ttl(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration as u64)
    }

    /// Clamps a requested page size into `1..=api_max_page_size`.
    pub fn page_size(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.api_default_page_size)
            .clamp(1, self.api_max_page_size)
    }

    /// Rules spanning several fields or depending on the environment.
    fn check_cross_field(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.cors_origins().next().is_none() && !self.should_allow_permissive_cors() {
            errors.add(
                "cors_allowed_origins",
                violation(
                    "cors_allowed_origins_required",
                    "outside development, list origins in APP__CORS_ALLOWED_ORIGINS or set APP__CORS_ALLOW_ANY_ORIGIN=true",
                ),
            );
        }
        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            errors.add(
                "jwt_secret",
                violation(
                    "jwt_secret_dev_default",
                    "the development signing key is only accepted in development",
                ),
            );
        }
        if self.db_min_connections > self.db_max_connections {
            errors.add(
                "db_min_connections",
                violation("db_pool_bounds", "must not exceed db_max_connections"),
            );
        }
        if self.api_default_page_size > self.api_max_page_size {
            errors.add(
                "api_default_page_size",
                violation("page_size_bounds", "must not exceed api_max_page_size"),
            );
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Field rules followed by the cross-field checks.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.check_cross_field()
    }
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("failed to read configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Validation(#[from] ValidationErrors),
}

fn violation(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn check_log_level(level: &str) -> Result<(), ValidationError> {
    match level.to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(violation(
            "log_level",
            "expected trace, debug, info, warn or error",
        )),
    }
}

fn check_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let secret = secret.trim();
    if PLACEHOLDER_SECRETS
        .iter()
        .any(|placeholder| secret.eq_ignore_ascii_case(placeholder))
    {
        return Err(violation("jwt_secret", "placeholder signing key"));
    }
    let distinct: HashSet<char> = secret.chars().collect();
    if distinct.len() < 10 {
        return Err(violation(
            "jwt_secret",
            "signing key needs at least 10 distinct characters",
        ));
    }
    Ok(())
}

/// Installs the global subscriber. `RUST_LOG`, when set, replaces the
/// default `custody_api=<level>,tower_http=debug` directive.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match env::var("RUST_LOG") {
        Ok(directive) if !directive.trim().is_empty() => EnvFilter::new(directive),
        _ => EnvFilter::new(format!("custody_api={},tower_http=debug", level)),
    };

    let installed = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).try_init()
    };
    if installed.is_err() {
        warn!("tracing subscriber already installed");
    }
}

/// Loads configuration from `./config`, see [`load_config_from`].
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Layers, lowest precedence first: built-in defaults, `<dir>/default.toml`,
/// `<dir>/<RUN_ENV>.toml`, then `APP__*` environment variables.
pub fn load_config_from(dir: &Path) -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEVELOPMENT.to_string());
    info!(run_env = %run_env, dir = %dir.display(), "loading configuration");

    let mut builder = builtin_defaults(&run_env)?;
    for layer in ["default", run_env.as_str()] {
        let path = dir.join(layer);
        builder = builder.add_source(File::with_name(&path.to_string_lossy()).required(false));
    }
    let layered = builder
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    if layered.get_string("jwt_secret").is_err() {
        error!("no signing key configured; set APP__JWT_SECRET");
        return Err(ConfigError::NotFound("jwt_secret".into()).into());
    }

    let cfg: AppConfig = layered.try_deserialize()?;
    if let Err(errors) = cfg.validate_all() {
        error!(?errors, "configuration rejected");
        return Err(errors.into());
    }

    info!(environment = %cfg.environment, "configuration loaded");
    Ok(cfg)
}

fn builtin_defaults(run_env: &str) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://custody.db?mode=rwc")?
        .set_default("jwt_expiration", 3600)?
        .set_default("host", "0.0.0.0")?
        .set_default("environment", run_env)?;
    if run_env.eq_ignore_ascii_case(DEVELOPMENT) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn production() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "a_sufficiently_long_and_varied_signing_key_0123456789".into(),
            3600,
            "127.0.0.1".into(),
            8080,
            "production".into(),
        )
    }

    fn write_default_toml(body: &str) -> tempfile::TempDir {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("default.toml"), body).unwrap();
        dir
    }

    #[test]
    fn production_needs_cors_origins() {
        let mut cfg = production();
        assert!(cfg.check_cross_field().is_err());

        cfg.cors_allowed_origins = Some(" https://ops.example.org , ".into());
        assert_eq!(cfg.cors_origins().collect::<Vec<_>>(), ["https://ops.example.org"]);
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn dev_signing_key_only_in_development() {
        let mut cfg = production();
        cfg.cors_allow_any_origin = true;
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        let errors = cfg.check_cross_field().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));

        cfg.environment = "Development".into();
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn hierarchy_depth_is_bounded() {
        let mut cfg = production();
        for (depth, ok) in [(0, false), (1, true), (10, true), (64, true), (65, false)] {
            cfg.hierarchy_max_depth = depth;
            assert_eq!(cfg.validate().is_ok(), ok, "depth {}", depth);
        }
    }

    #[test]
    fn weak_signing_keys_fail() {
        assert!(check_jwt_secret("ChangeMe").is_err());
        assert!(check_jwt_secret(&"ab".repeat(20)).is_err());
        assert!(check_jwt_secret("a_sufficiently_long_and_varied_signing_key").is_ok());

        let mut cfg = production();
        cfg.jwt_secret = "too-short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn pool_and_page_bounds_are_cross_checked() {
        let mut cfg = production();
        cfg.cors_allow_any_origin = true;
        cfg.db_min_connections = 20;
        cfg.api_default_page_size = 500;
        let errors = cfg.check_cross_field().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("db_min_connections"));
        assert!(fields.contains_key("api_default_page_size"));
    }

    #[test]
    fn page_size_is_clamped() {
        let cfg = production();
        assert_eq!(cfg.page_size(None), 20);
        assert_eq!(cfg.page_size(Some(0)), 1);
        assert_eq!(cfg.page_size(Some(10_000)), 100);
    }

    #[test]
    fn file_values_are_layered_over_defaults() {
        let dir = write_default_toml(
            r#"
                jwt_secret = "file_provided_signing_key_that_is_long_enough_42"
                environment = "development"
                hierarchy_max_depth = 4
                api_max_page_size = 50
            "#,
        );

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.hierarchy_max_depth, 4);
        assert_eq!(cfg.page_size(Some(500)), 50);
        assert!(cfg.is_development());
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = write_default_toml(
            r#"
                jwt_secret = "file_provided_signing_key_that_is_long_enough_42"
                environment = "development"
                hierarchy_max_depth = 0
            "#,
        );

        assert!(matches!(
            load_config_from(dir.path()),
            Err(AppConfigError::Validation(_))
        ));
    }
}
