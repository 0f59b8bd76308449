use std::{str::FromStr, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Argon2 cost parameters. Fixed for the lifetime of the process.
#[derive(Debug, Clone, Deserialize)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicyConfig {
    pub min_length: usize,
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub start_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub database: DatabaseConfig,
    pub hashing: HashingConfig,
    pub password_policy: PasswordPolicyConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 10)?,
        };

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: parse_var("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            iterations: parse_var("ARGON2_ITERATIONS", defaults.iterations)?,
            parallelism: parse_var("ARGON2_PARALLELISM", defaults.parallelism)?,
        };

        Ok(Self {
            name: std::env::var("APP_NAME").unwrap_or_else(|_| "users-service".into()),
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_var("APP_PORT", 8080)?,
            start_timeout: Duration::from_secs(parse_var("START_TIMEOUT_SECS", 15)?),
            shutdown_timeout: Duration::from_secs(parse_var("SHUTDOWN_TIMEOUT_SECS", 10)?),
            database,
            hashing,
            password_policy: PasswordPolicyConfig {
                min_length: parse_var("PASSWORD_MIN_LENGTH", 8)?,
            },
        })
    }
}

/// Reads an optional variable, falling back to `default` only when it is unset.
fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: {raw:?}")),
        Err(std::env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(e).with_context(|| format!("{key} is not valid unicode")),
    }
}
