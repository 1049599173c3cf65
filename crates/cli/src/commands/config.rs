use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;
use tradein_core::config::{AppConfig, LoadOptions};

/// (key path, env override) for every value the report lists.
const REPORTED_KEYS: &[(&str, &str)] = &[
    ("database.url", "TRADEIN_DATABASE_URL"),
    ("database.max_connections", "TRADEIN_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "TRADEIN_DATABASE_TIMEOUT_SECS"),
    ("server.bind_address", "TRADEIN_SERVER_BIND_ADDRESS"),
    ("server.port", "TRADEIN_SERVER_PORT"),
    ("server.graceful_shutdown_secs", "TRADEIN_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("logging.level", "TRADEIN_LOGGING_LEVEL"),
    ("logging.format", "TRADEIN_LOGGING_FORMAT"),
    ("matching.medium_threshold", "TRADEIN_MATCHING_MEDIUM_THRESHOLD"),
    ("matching.low_threshold", "TRADEIN_MATCHING_LOW_THRESHOLD"),
    ("pricing.batch_chunk_size", "TRADEIN_PRICING_BATCH_CHUNK_SIZE"),
    ("pricing.rounding", "TRADEIN_PRICING_ROUNDING"),
    ("pricing.rounding_increment", "TRADEIN_PRICING_ROUNDING_INCREMENT"),
    ("pricing.currency", "TRADEIN_PRICING_CURRENCY"),
    ("cache.ttl_secs", "TRADEIN_CACHE_TTL_SECS"),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let effective = match Value::try_from(&config) {
        Ok(value) => value,
        Err(error) => return format!("config could not be rendered: {error}"),
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for &(key_path, env_key) in REPORTED_KEYS {
        let value = lookup(&effective, key_path).map(render_value).unwrap_or_else(|| "<unset>".to_string());
        lines.push(render_line(
            key_path,
            &value,
            field_source(key_path, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }
    lines.push(format!(
        "- pricing.grade_ratios = B {}% / C {}% / D {}% / E {}% (source: {})",
        config.pricing.grade_ratios.b,
        config.pricing.grade_ratios.c,
        config.pricing.grade_ratios.d,
        config.pricing.grade_ratios.e,
        field_source("pricing.grade_ratios", None, config_file_doc.as_ref(), config_file_path.as_deref()),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("tradein.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/tradein.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if lookup(doc, key_path).is_some() {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn lookup<'a>(root: &'a Value, key_path: &str) -> Option<&'a Value> {
    key_path.split('.').try_fold(root, |current, key| current.get(key))
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
