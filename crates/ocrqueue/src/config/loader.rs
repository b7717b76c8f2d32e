use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::schema::Config;
use crate::error::ConfigError;

/// Prefix of every environment variable that overrides configuration.
const ENV_PREFIX: &str = "OCRQ_";

/// Upper bound for `stale_claim_secs`: 30 days.
const MAX_STALE_CLAIM_SECS: u64 = 30 * 24 * 60 * 60;

/// Returns the canonical config path: `~/.ocrqueue/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".ocrqueue").join("config.json"))
}

/// Reads a JSON config file, applies `OCRQ_*` overrides from the process
/// environment and validates the result.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config: Config = serde_json::from_str(&content)?;
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Parses and validates a JSON config. Does not look at the environment.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Defaults plus `OCRQ_*` overrides, for running without a config file.
pub fn config_from_env() -> Result<Config, ConfigError> {
    let mut config = Config::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config)?;
    Ok(config)
}

/// Applies `OCRQ_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = |suffix: &str| {
        let name = format!("{}{}", ENV_PREFIX, suffix);
        lookup(&name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(|v| (name, v))
    };

    if let Some((name, value)) = var("NUM_WORKERS") {
        config.worker_count = parse(&name, &value)?;
    }
    if let Some((name, value)) = var("BACKEND") {
        config.backend = parse(&name, &value)?;
    }
    if let Some((name, value)) = var("OCR_MODE") {
        config.default_mode = parse(&name, &value)?;
    }
    if let Some((name, value)) = var("MAX_FILE_SIZE_MB") {
        config.max_file_size_mb = parse(&name, &value)?;
    }
    if let Some((name, value)) = var("MAX_QUEUE_DEPTH") {
        config.max_queue_depth = Some(parse(&name, &value)?);
    }
    if let Some((name, value)) = var("JOB_TIMEOUT_SECS") {
        config.job_timeout_secs = parse(&name, &value)?;
    }
    if let Some((name, value)) = var("PAGE_CONCURRENCY") {
        config.page_concurrency = parse(&name, &value)?;
    }
    if let Some((_, value)) = var("DB_PATH") {
        config.database_path = Some(PathBuf::from(value));
    }
    if let Some((_, value)) = var("HF_ENDPOINT") {
        config.backends.huggingface.endpoint = Some(value);
    }
    if let Some((_, value)) = var("HF_TOKEN") {
        config.backends.huggingface.token = Some(value);
    }
    if let Some((_, value)) = var("DEEPSEEK_ENDPOINT") {
        config.backends.deepseek.endpoint = Some(value);
    }
    if let Some((_, value)) = var("DEEPSEEK_TOKEN") {
        config.backends.deepseek.token = Some(value);
    }
    if let Some((_, value)) = var("OLLAMA_URL") {
        config.backends.ollama.url = Some(value);
    }
    if let Some((_, value)) = var("OLLAMA_MODEL") {
        config.backends.ollama.model = value;
    }
    if let Some((_, value)) = var("LOG_LEVEL") {
        config.log_level = value;
    }
    if let Some((name, value)) = var("LOG_JSON") {
        config.log_json = parse_bool(&name, &value)?;
    }

    Ok(())
}

fn parse<T>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        message: message.into(),
    }
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.worker_count == 0 {
        return Err(invalid("worker_count must be at least 1"));
    }
    if config.page_concurrency == 0 {
        return Err(invalid("page_concurrency must be at least 1"));
    }
    if config.max_file_size_mb == 0 {
        return Err(invalid("max_file_size_mb must be at least 1"));
    }
    if config.max_queue_depth == Some(0) {
        return Err(invalid("max_queue_depth must be at least 1 when set"));
    }
    if config.job_timeout_secs == 0 {
        return Err(invalid("job_timeout_secs must be at least 1"));
    }
    // Recovery must never steal a job that is still within its time budget.
    if config.stale_claim_secs <= config.job_timeout_secs {
        return Err(invalid(format!(
            "stale_claim_secs ({}) must be greater than job_timeout_secs ({})",
            config.stale_claim_secs, config.job_timeout_secs
        )));
    }
    if config.stale_claim_secs > MAX_STALE_CLAIM_SECS {
        return Err(invalid(format!(
            "stale_claim_secs must be at most {}, got {}",
            MAX_STALE_CLAIM_SECS, config.stale_claim_secs
        )));
    }
    if !(36..=1200).contains(&config.pdf_dpi) {
        return Err(invalid(format!(
            "pdf_dpi must be between 36 and 1200, got {}",
            config.pdf_dpi
        )));
    }

    let retry = &config.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("retry.max_attempts must be at least 1"));
    }
    if retry.base_backoff_ms > retry.max_backoff_ms {
        return Err(invalid(
            "retry.base_backoff_ms must not exceed retry.max_backoff_ms",
        ));
    }

    let poll = &config.poll;
    if poll.idle_backoff_min_ms == 0 || poll.idle_backoff_min_ms > poll.idle_backoff_max_ms {
        return Err(invalid(
            "poll.idle_backoff_min_ms must be at least 1 and not exceed poll.idle_backoff_max_ms",
        ));
    }
    if poll.recovery_interval_secs == 0 {
        return Err(invalid("poll.recovery_interval_secs must be at least 1"));
    }

    Ok(())
}
