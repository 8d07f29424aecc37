//! Process configuration, read from the environment.

use std::env;
use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::aggregates::ShippingPolicy;

pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend { Postgres, Memory }

impl FromStr for StoreBackend {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected 'postgres' or 'memory', got '{other}'")),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub token_secret: String,
    pub token_ttl_hours: i64,
    pub nats_url: Option<String>,
    pub shipping: ShippingPolicy,
    pub seed_categories: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("backend", &self.backend)
            .field("database_max_connections", &self.database_max_connections)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("nats_url", &self.nats_url)
            .field("shipping", &self.shipping)
            .field("seed_categories", &self.seed_categories)
            .finish_non_exhaustive()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; `from_env` passes `std::env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str| lookup(name).filter(|v| !v.trim().is_empty());
        fn parse<T: FromStr>(name: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
        where
            T::Err: std::fmt::Display,
        {
            match raw {
                None => Ok(default),
                Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid { name, reason: e.to_string() }),
            }
        }

        let backend = parse("STORE_BACKEND", get("STORE_BACKEND"), StoreBackend::Postgres)?;
        let database_url = get("DATABASE_URL");
        if backend == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let token_secret = get("AUTH_TOKEN_SECRET").ok_or(ConfigError::Missing("AUTH_TOKEN_SECRET"))?;
        if token_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid { name: "AUTH_TOKEN_SECRET", reason: format!("must be at least {MIN_SECRET_LEN} characters") });
        }

        let token_ttl_hours: i64 = parse("AUTH_TOKEN_TTL_HOURS", get("AUTH_TOKEN_TTL_HOURS"), 24)?;
        if token_ttl_hours <= 0 {
            return Err(ConfigError::Invalid { name: "AUTH_TOKEN_TTL_HOURS", reason: "must be positive".into() });
        }

        let defaults = ShippingPolicy::default();
        let shipping = ShippingPolicy {
            fee: parse::<Decimal>("SHIPPING_FEE", get("SHIPPING_FEE"), defaults.fee)?,
            free_over: parse::<Decimal>("FREE_SHIPPING_THRESHOLD", get("FREE_SHIPPING_THRESHOLD"), defaults.free_over)?,
        };
        if shipping.fee.is_sign_negative() {
            return Err(ConfigError::Invalid { name: "SHIPPING_FEE", reason: "must not be negative".into() });
        }

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse("PORT", get("PORT"), 8000)?,
            backend,
            database_url,
            database_max_connections: parse("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 10)?,
            token_secret,
            token_ttl_hours,
            nats_url: get("NATS_URL"),
            shipping,
            seed_categories: parse("SEED_CATEGORIES", get("SEED_CATEGORIES"), false)?,
        })
    }

    pub fn bind_addr(&self) -> String { format!("{}:{}", self.host, self.port) }
}
