use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matcher::MatchThresholds;
use crate::pricing::{GradeRatios, PricingSettings, RoundingRule};

#[derive(Clone, Debug, Serialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub matching: MatchingConfig,
    pub pricing: PricingConfig,
    pub cache: CacheConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchingConfig {
    pub medium_threshold: f64,
    pub low_threshold: f64,
}

impl MatchingConfig {
    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds { medium: self.medium_threshold, low: self.low_threshold }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PricingConfig {
    /// Upper bound on devices written per atomic chunk during bulk adjustment.
    pub batch_chunk_size: usize,
    pub rounding: String,
    pub rounding_increment: Decimal,
    pub currency: String,
    pub grade_ratios: GradeRatios,
}

impl PricingConfig {
    pub fn rounding_rule(&self) -> Result<RoundingRule, ConfigError> {
        RoundingRule::parse(&self.rounding, self.rounding_increment)
            .map_err(|error| ConfigError::Validation(format!("pricing.rounding: {error}")))
    }

    pub fn settings(&self) -> Result<PricingSettings, ConfigError> {
        Ok(PricingSettings { rounding: self.rounding_rule()?, ratios: self.grade_ratios })
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub batch_chunk_size: Option<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tradein.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            matching: MatchingConfig { medium_threshold: 0.75, low_threshold: 0.5 },
            pricing: PricingConfig {
                batch_chunk_size: 450,
                rounding: "nearest".to_string(),
                rounding_increment: Decimal::ONE,
                currency: "USD".to_string(),
                grade_ratios: GradeRatios::default(),
            },
            cache: CacheConfig { ttl_secs: 300 },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tradein.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(matching) = patch.matching {
            if let Some(medium) = matching.medium_threshold {
                self.matching.medium_threshold = medium;
            }
            if let Some(low) = matching.low_threshold {
                self.matching.low_threshold = low;
            }
        }

        if let Some(pricing) = patch.pricing {
            if let Some(chunk) = pricing.batch_chunk_size {
                self.pricing.batch_chunk_size = chunk;
            }
            if let Some(rounding) = pricing.rounding {
                self.pricing.rounding = rounding;
            }
            if let Some(increment) = pricing.rounding_increment {
                self.pricing.rounding_increment = increment;
            }
            if let Some(currency) = pricing.currency {
                self.pricing.currency = currency;
            }
            if let Some(ratios) = pricing.grade_ratios {
                self.pricing.grade_ratios = ratios;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(ttl_secs) = cache.ttl_secs {
                self.cache.ttl_secs = ttl_secs;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TRADEIN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TRADEIN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("TRADEIN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TRADEIN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("TRADEIN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TRADEIN_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TRADEIN_SERVER_PORT") {
            self.server.port = parse_env("TRADEIN_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TRADEIN_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("TRADEIN_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TRADEIN_LOGGING_LEVEL").or_else(|| read_env("TRADEIN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TRADEIN_LOGGING_FORMAT").or_else(|| read_env("TRADEIN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("TRADEIN_MATCHING_MEDIUM_THRESHOLD") {
            self.matching.medium_threshold =
                parse_env("TRADEIN_MATCHING_MEDIUM_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("TRADEIN_MATCHING_LOW_THRESHOLD") {
            self.matching.low_threshold = parse_env("TRADEIN_MATCHING_LOW_THRESHOLD", &value)?;
        }

        if let Some(value) = read_env("TRADEIN_PRICING_BATCH_CHUNK_SIZE") {
            self.pricing.batch_chunk_size =
                parse_env("TRADEIN_PRICING_BATCH_CHUNK_SIZE", &value)?;
        }
        if let Some(value) = read_env("TRADEIN_PRICING_ROUNDING") {
            self.pricing.rounding = value;
        }
        if let Some(value) = read_env("TRADEIN_PRICING_ROUNDING_INCREMENT") {
            self.pricing.rounding_increment =
                parse_env("TRADEIN_PRICING_ROUNDING_INCREMENT", &value)?;
        }
        if let Some(value) = read_env("TRADEIN_PRICING_CURRENCY") {
            self.pricing.currency = value;
        }

        if let Some(value) = read_env("TRADEIN_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_env("TRADEIN_CACHE_TTL_SECS", &value)?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(chunk) = overrides.batch_chunk_size {
            self.pricing.batch_chunk_size = chunk;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        validate_matching(&self.matching)?;
        validate_pricing(&self.pricing)?;
        validate_cache(&self.cache)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tradein.toml"), PathBuf::from("config/tradein.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_matching(matching: &MatchingConfig) -> Result<(), ConfigError> {
    MatchThresholds::new(matching.medium_threshold, matching.low_threshold)
        .map(|_| ())
        .map_err(|error| ConfigError::Validation(format!("matching thresholds: {error}")))
}

fn validate_pricing(pricing: &PricingConfig) -> Result<(), ConfigError> {
    if pricing.batch_chunk_size == 0 || pricing.batch_chunk_size > 500 {
        return Err(ConfigError::Validation(
            "pricing.batch_chunk_size must be in range 1..=500".to_string(),
        ));
    }
    if pricing.currency.trim().len() != 3 {
        return Err(ConfigError::Validation(
            "pricing.currency must be a three-letter currency code".to_string(),
        ));
    }
    pricing.rounding_rule()?;
    pricing
        .grade_ratios
        .validate()
        .map_err(|error| ConfigError::Validation(format!("pricing.grade_ratios: {error}")))
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.ttl_secs == 0 {
        return Err(ConfigError::Validation("cache.ttl_secs must be greater than zero".to_string()));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
    matching: Option<MatchingPatch>,
    pricing: Option<PricingPatch>,
    cache: Option<CachePatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct MatchingPatch {
    medium_threshold: Option<f64>,
    low_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct PricingPatch {
    batch_chunk_size: Option<usize>,
    rounding: Option<String>,
    rounding_increment: Option<Decimal>,
    currency: Option<String>,
    grade_ratios: Option<GradeRatios>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    ttl_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use rust_decimal::Decimal;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::pricing::RoundingRule;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.pricing.batch_chunk_size == 450, "default chunk size should be 450")?;
        ensure(
            config.pricing.rounding_rule().map_err(|err| err.to_string())?
                == RoundingRule::Nearest { increment: Decimal::ONE },
            "default rounding should be nearest whole unit",
        )?;
        ensure(
            matches!(config.logging.format, LogFormat::Compact),
            "default logging format should be compact",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_TRADEIN_DB_PATH", "/var/lib/tradein/data.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tradein.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_TRADEIN_DB_PATH}"

[pricing]
rounding = "down"
rounding_increment = "5"

[pricing.grade_ratios]
b = "90"
c = "75"
d = "55"
e = "35"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/tradein/data.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.pricing.grade_ratios.b == Decimal::from(90),
                "grade ratios should be read from file",
            )?;
            ensure(
                config.pricing.rounding_rule().map_err(|err| err.to_string())?
                    == RoundingRule::Down { increment: Decimal::from(5) },
                "rounding rule should be read from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_TRADEIN_DB_PATH"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_TRADEIN_UNSET_VAR"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("tradein.toml");
        fs::write(&path, "[database]\nurl = \"${TEST_TRADEIN_UNSET_VAR}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                .err()
                .ok_or_else(|| "expected interpolation failure".to_string())?;
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_TRADEIN_UNSET_VAR"),
            "error should name the missing variable",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRADEIN_LOG_LEVEL", "warn");
        env::set_var("TRADEIN_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["TRADEIN_LOG_LEVEL", "TRADEIN_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRADEIN_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("TRADEIN_MATCHING_MEDIUM_THRESHOLD", "0.8");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("tradein.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[matching]
medium_threshold = 0.9
low_threshold = 0.4

[pricing]
batch_chunk_size = 200

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                (config.matching.medium_threshold - 0.8).abs() < f64::EPSILON,
                "env threshold should win over file",
            )?;
            ensure(
                (config.matching.low_threshold - 0.4).abs() < f64::EPSILON,
                "file threshold should win over defaults",
            )?;
            ensure(config.pricing.batch_chunk_size == 200, "file chunk size should be applied")?;
            Ok(())
        })();

        clear_vars(&["TRADEIN_DATABASE_URL", "TRADEIN_MATCHING_MEDIUM_THRESHOLD"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRADEIN_PRICING_BATCH_CHUNK_SIZE", "900");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("pricing.batch_chunk_size")
            );
            ensure(has_message, "validation failure should mention pricing.batch_chunk_size")
        })();

        clear_vars(&["TRADEIN_PRICING_BATCH_CHUNK_SIZE"]);
        result
    }

    #[test]
    fn malformed_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TRADEIN_CACHE_TTL_SECS", "five minutes");
        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) if key == "TRADEIN_CACHE_TTL_SECS" => {
                Ok(())
            }
            Err(other) => Err(format!("unexpected error: {other}")),
            Ok(_) => Err("expected invalid override error".to_string()),
        };

        clear_vars(&["TRADEIN_CACHE_TTL_SECS"]);
        result
    }

    #[test]
    fn required_file_must_exist() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");
        let result = AppConfig::load(LoadOptions {
            config_path: Some(missing),
            require_file: true,
            ..LoadOptions::default()
        });
        ensure(
            matches!(result, Err(ConfigError::MissingConfigFile(_))),
            "missing required file should be reported",
        )
    }
}
