//! Environment-derived configuration.
//!
//! Credentials are held as [`SecretReference`]s — an indirection that defers
//! resolving the actual secret value until [`SecretReference::resolve`] is called,
//! so a config struct built in demo mode never has to successfully read an
//! environment variable that demo mode doesn't need.

use std::env;
use std::time::Duration;
use thiserror::Error;

/// A secret that is resolved lazily from an environment variable.
#[derive(Debug, Clone)]
pub struct SecretReference {
    env_var: String,
}

impl SecretReference {
    pub fn from_env(env_var: impl Into<String>) -> Self {
        Self {
            env_var: env_var.into(),
        }
    }

    /// Resolve the secret, stripping surrounding whitespace.
    pub fn resolve(&self) -> Result<String, ConfigError> {
        let value = env::var(&self.env_var).map_err(|_| ConfigError::MissingSecret {
            env_var: self.env_var.clone(),
        })?;
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingSecret {
                env_var: self.env_var.clone(),
            });
        }
        Ok(trimmed)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("required secret {env_var} is not set (and demo mode is off)")]
    MissingSecret { env_var: String },

    #[error("invalid value for {field}: {value:?} ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// Per-level cache time-to-live, in days.
///
/// Federal programs change slowly; city-level programs are small and churn faster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTtlDays {
    pub federal: i64,
    pub state: i64,
    pub county: i64,
    pub city: i64,
}

impl Default for CacheTtlDays {
    fn default() -> Self {
        Self {
            federal: 30,
            state: 30,
            county: 14,
            city: 7,
        }
    }
}

/// Process-wide safety ceilings enforced by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub max_concurrent_sessions: usize,
    pub max_sessions_per_day: usize,
    pub max_search_calls_per_session: usize,
    pub max_llm_calls_per_session: usize,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 5,
            max_sessions_per_day: 50,
            max_search_calls_per_session: 20,
            max_llm_calls_per_session: 10,
        }
    }
}

/// Selects which [`crate::cache::ProgramCache`] implementation to construct.
#[derive(Debug, Clone)]
pub enum CacheBackendConfig {
    Sqlite { path: String },
    Postgres { connection_string: SecretReference },
}

impl Default for CacheBackendConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: "data/programs.db".to_string(),
        }
    }
}

/// Top-level application settings, loaded once at process start.
#[derive(Debug, Clone)]
pub struct Settings {
    pub anthropic_api_key: SecretReference,
    pub search_api_key: SecretReference,
    pub claude_model: String,
    pub thinking_budget_tokens: u32,

    /// Fallback state name used when the router cannot determine one by any strategy.
    pub default_state: String,

    pub cache_ttl: CacheTtlDays,
    pub cache_backend: CacheBackendConfig,

    pub demo_mode: bool,
    pub rate_limits: RateLimits,
    pub max_roi_refinement_rounds: u32,

    /// Delay between sequential search queries issued by the same worker, to
    /// dampen bursting against the search provider (see worker.rs §4.6.1).
    pub inter_query_delay: Duration,
}

impl Settings {
    /// Load settings from environment variables, validating eagerly.
    ///
    /// Outside demo mode, missing LLM/search credentials are a construction-time
    /// error rather than a surprise on first use.
    pub fn from_env() -> Result<Self, ConfigError> {
        let demo_mode = env_bool("DEMO_MODE", false);

        let settings = Self {
            anthropic_api_key: SecretReference::from_env("ANTHROPIC_API_KEY"),
            search_api_key: SecretReference::from_env("SEARCH_API_KEY"),
            claude_model: env::var("CLAUDE_MODEL")
                .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string()),
            thinking_budget_tokens: env_u32("THINKING_BUDGET_TOKENS", 12_000)?,
            default_state: env::var("DEFAULT_STATE").unwrap_or_else(|_| "Illinois".to_string()),
            cache_ttl: CacheTtlDays {
                federal: env_i64("CACHE_TTL_FEDERAL_DAYS", 30)?,
                state: env_i64("CACHE_TTL_STATE_DAYS", 30)?,
                county: env_i64("CACHE_TTL_COUNTY_DAYS", 14)?,
                city: env_i64("CACHE_TTL_CITY_DAYS", 7)?,
            },
            cache_backend: match env::var("DATABASE_URL") {
                Ok(url) if !url.trim().is_empty() => CacheBackendConfig::Postgres {
                    connection_string: SecretReference::from_env("DATABASE_URL"),
                },
                _ => CacheBackendConfig::Sqlite {
                    path: env::var("DATABASE_PATH")
                        .unwrap_or_else(|_| "data/programs.db".to_string()),
                },
            },
            demo_mode,
            rate_limits: RateLimits {
                max_concurrent_sessions: env_usize("MAX_CONCURRENT_SESSIONS", 5)?,
                max_sessions_per_day: env_usize("MAX_SESSIONS_PER_DAY", 50)?,
                max_search_calls_per_session: env_usize("MAX_SEARCH_QUERIES_PER_SESSION", 20)?,
                max_llm_calls_per_session: env_usize("MAX_LLM_CALLS_PER_SESSION", 10)?,
            },
            max_roi_refinement_rounds: env_u32("MAX_ROI_REFINEMENT_ROUNDS", 3)?,
            inter_query_delay: Duration::from_millis(500),
        };

        if !demo_mode {
            settings.anthropic_api_key.resolve()?;
            settings.search_api_key.resolve()?;
        }

        Ok(settings)
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: "u32 env var",
            value: v,
            reason: "not a valid non-negative integer".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_i64(name: &str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: "i64 env var",
            value: v,
            reason: "not a valid integer".to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(name) {
        Ok(v) => v.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: "usize env var",
            value: v,
            reason: "not a valid non-negative integer".to_string(),
        }),
        Err(_) => Ok(default),
    }
}
