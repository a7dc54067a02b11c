//! Process configuration, read once from the environment at startup
//!
//! ## Environment Variables
//! - `PORT` - listen port (default: `8000`)
//! - `REDIS_URL` - Redis connection string; when unset it is built from
//!   `REDIS_HOST`, `REDIS_PORT` (6379), `REDIS_DB` (0), `REDIS_PASSWORD`.
//!   Neither set → in-process cache.
//! - `CACHE_TTL_SECS` - verdict lifetime (default: `300`)
//! - `MEMORY_CACHE_MAX_ENTRIES` - in-process cache capacity (default: `10000`)
//! - `INFERENCE_WORKERS` - concurrent model calls (default: `4`)
//! - `INFERENCE_TIMEOUT_SECS` - per model call (default: `20`)
//! - `REQUEST_TIMEOUT_SECS` - per HTTP request (default: `30`)
//! - `MAX_UPLOAD_BYTES` - request body limit (default: 20 MiB)
//! - `NUDITY_MODEL_REPO`, `FACE_MODEL_REPO` - Hugging Face model ids
//! - `WARMUP_MODELS` - load models at startup (default: `true`)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants;
use crate::content_filter::{DEFAULT_FACE_MODEL_REPO, DEFAULT_NUDITY_MODEL_REPO};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_op_timeout: Duration,
    pub memory_cache_max_entries: usize,
    pub inference_workers: usize,
    pub inference_timeout: Duration,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub nudity_model_repo: String,
    pub face_model_repo: String,
    pub warmup_models: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: constants::DEFAULT_PORT,
            redis_url: None,
            cache_ttl: Duration::from_secs(constants::DEFAULT_CACHE_TTL_SECS),
            cache_op_timeout: Duration::from_secs(constants::CACHE_OP_TIMEOUT_SECS),
            memory_cache_max_entries: constants::DEFAULT_MEMORY_CACHE_MAX_ENTRIES,
            inference_workers: constants::DEFAULT_INFERENCE_WORKERS,
            inference_timeout: Duration::from_secs(constants::DEFAULT_INFERENCE_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(constants::DEFAULT_REQUEST_TIMEOUT_SECS),
            max_upload_bytes: constants::DEFAULT_MAX_UPLOAD_BYTES,
            nudity_model_repo: DEFAULT_NUDITY_MODEL_REPO.to_string(),
            face_model_repo: DEFAULT_FACE_MODEL_REPO.to_string(),
            warmup_models: true,
        }
    }
}

/// Parse `name` if set, falling back to `default` (with a warning) when the
/// value does not parse or fails `valid`
fn parsed<T, F>(vars: &impl Fn(&str) -> Option<String>, name: &str, default: T, valid: F) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
    F: Fn(&T) -> bool,
{
    match vars(name) {
        None => default,
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if valid(&value) => value,
            _ => {
                tracing::warn!("Ignoring {}={:?}, using default {:?}", name, raw, default);
                default
            }
        },
    }
}

fn non_empty(vars: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    vars(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// `redis://[:password@]host:port/db` from the discrete variables
fn redis_url_from_parts(vars: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let host = non_empty(vars, "REDIS_HOST")?;
    let port: u16 = parsed(vars, "REDIS_PORT", 6379, |_| true);
    let db: u32 = parsed(vars, "REDIS_DB", 0, |_| true);
    let auth = non_empty(vars, "REDIS_PASSWORD")
        .map(|password| format!(":{}@", password))
        .unwrap_or_default();

    Some(format!("redis://{}{}:{}/{}", auth, host, port, db))
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(vars: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let positive = |v: &u64| *v > 0;

        Self {
            port: parsed(&vars, "PORT", defaults.port, |_| true),
            redis_url: non_empty(&vars, "REDIS_URL").or_else(|| redis_url_from_parts(&vars)),
            cache_ttl: Duration::from_secs(parsed(
                &vars,
                "CACHE_TTL_SECS",
                constants::DEFAULT_CACHE_TTL_SECS,
                positive,
            )),
            cache_op_timeout: defaults.cache_op_timeout,
            memory_cache_max_entries: parsed(
                &vars,
                "MEMORY_CACHE_MAX_ENTRIES",
                defaults.memory_cache_max_entries,
                |v| *v > 0,
            ),
            inference_workers: parsed(&vars, "INFERENCE_WORKERS", defaults.inference_workers, |v| {
                *v > 0
            }),
            inference_timeout: Duration::from_secs(parsed(
                &vars,
                "INFERENCE_TIMEOUT_SECS",
                constants::DEFAULT_INFERENCE_TIMEOUT_SECS,
                positive,
            )),
            request_timeout: Duration::from_secs(parsed(
                &vars,
                "REQUEST_TIMEOUT_SECS",
                constants::DEFAULT_REQUEST_TIMEOUT_SECS,
                positive,
            )),
            max_upload_bytes: parsed(&vars, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes, |v| {
                *v > 0
            }),
            nudity_model_repo: non_empty(&vars, "NUDITY_MODEL_REPO").unwrap_or(defaults.nudity_model_repo),
            face_model_repo: non_empty(&vars, "FACE_MODEL_REPO").unwrap_or(defaults.face_model_repo),
            warmup_models: parsed(&vars, "WARMUP_MODELS", defaults.warmup_models, |_| true),
        }
    }

    /// Connection string with any password masked, for logs
    pub fn redis_url_redacted(&self) -> Option<String> {
        let url = self.redis_url.as_deref()?;
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                Some(format!("{}***{}", &url[..scheme_end + 3], &url[at..]))
            }
            _ => Some(url.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let cfg = config(&[]);
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.redis_url, None);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.inference_workers, 4);
        assert!(cfg.warmup_models);
        assert_eq!(cfg.nudity_model_repo, DEFAULT_NUDITY_MODEL_REPO);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let cfg = config(&[
            ("PORT", "9000"),
            ("CACHE_TTL_SECS", "0"),
            ("INFERENCE_WORKERS", "eight"),
            ("REQUEST_TIMEOUT_SECS", "5"),
            ("WARMUP_MODELS", "false"),
            ("FACE_MODEL_REPO", "acme/age-vit"),
        ]);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.inference_workers, 4);
        assert_eq!(cfg.request_timeout, Duration::from_secs(5));
        assert!(!cfg.warmup_models);
        assert_eq!(cfg.face_model_repo, "acme/age-vit");
    }

    #[test]
    fn test_redis_url_from_discrete_variables() {
        let cfg = config(&[
            ("REDIS_HOST", "cache.internal"),
            ("REDIS_DB", "2"),
            ("REDIS_PASSWORD", "hunter2"),
        ]);
        assert_eq!(
            cfg.redis_url.as_deref(),
            Some("redis://:hunter2@cache.internal:6379/2")
        );
        assert_eq!(
            cfg.redis_url_redacted().as_deref(),
            Some("redis://***@cache.internal:6379/2")
        );
    }

    #[test]
    fn test_redis_url_wins_over_parts() {
        let cfg = config(&[("REDIS_URL", "redis://localhost:6380"), ("REDIS_HOST", "ignored")]);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6380"));
        assert_eq!(cfg.redis_url_redacted().as_deref(), Some("redis://localhost:6380"));
    }
}
