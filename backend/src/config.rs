//! Runtime configuration from the environment.
//!
//! `.env` is loaded first when present. Command-line flags override what is
//! read here.
//!
//! | Variable                  | Default                     |
//! |---------------------------|-----------------------------|
//! | `REGEXFLOW_PORT`          | 3000                        |
//! | `REGEXFLOW_PREVIEW_LIMIT` | 10                          |
//! | `REGEXFLOW_PAGE_SIZE`     | 50                          |
//! | `REGEXFLOW_SESSION_TTL`   | 1800 (seconds idle)         |
//! | `ANTHROPIC_API_KEY`       | unset (generation disabled) |
//! | `REGEXFLOW_MODEL`         | generator default           |

use std::str::FromStr;
use std::time::Duration;

use crate::diff::DEFAULT_PREVIEW_LIMIT;
use crate::error::ConfigError;
use crate::session::DEFAULT_IDLE_TTL;
use crate::store::DEFAULT_PAGE_SIZE;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Diff entries shown per preview or apply.
    pub preview_limit: usize,
    pub page_size: usize,
    /// Chat sessions idle for longer than this are dropped.
    pub session_ttl: Duration,
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            page_size: DEFAULT_PAGE_SIZE,
            session_ttl: DEFAULT_IDLE_TTL,
            api_key: None,
            model: None,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            port: parse_var(&non_empty, "REGEXFLOW_PORT")?.unwrap_or(defaults.port),
            preview_limit: parse_positive(&non_empty, "REGEXFLOW_PREVIEW_LIMIT")?
                .unwrap_or(defaults.preview_limit),
            page_size: parse_positive(&non_empty, "REGEXFLOW_PAGE_SIZE")?
                .unwrap_or(defaults.page_size),
            session_ttl: parse_positive(&non_empty, "REGEXFLOW_SESSION_TTL")?
                .map(|secs| Duration::from_secs(secs as u64))
                .unwrap_or(defaults.session_ttl),
            api_key: non_empty("ANTHROPIC_API_KEY"),
            model: non_empty("REGEXFLOW_MODEL"),
        })
    }

    pub fn has_generator(&self) -> bool {
        self.api_key.is_some()
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_positive<F>(lookup: &F, key: &str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_var::<usize, F>(lookup, key)? {
        Some(0) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: "0".to_string(),
        }),
        other => Ok(other),
    }
}
