//! Runtime configuration, read from the environment (and `.env` via dotenvy).

use crate::error::{Result, StorefrontError};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://storefront.db";
pub const DEFAULT_PORT: u16 = 8083;
pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_PRICE_FIELD: &str = "Sale Price";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub port: u16,
    pub nats_url: Option<String>,
    /// ISO 4217 code used for checkout totals.
    pub currency: String,
    /// Name of the field whose frozen value is the unit price at checkout.
    pub price_field: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 10,
            port: DEFAULT_PORT,
            nats_url: None,
            currency: DEFAULT_CURRENCY.to_string(),
            price_field: DEFAULT_PRICE_FIELD.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; `from_env` passes the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port = match get("PORT") {
            Some(raw) => raw.parse().map_err(|_| StorefrontError::Config(format!("PORT is not a port number: {raw}")))?,
            None => defaults.port,
        };
        let max_connections = match get("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| StorefrontError::Config(format!("DATABASE_MAX_CONNECTIONS must be a positive integer: {raw}")))?,
            None => defaults.max_connections,
        };
        let currency = get("STOREFRONT_CURRENCY").map(|c| c.to_uppercase()).unwrap_or(defaults.currency);
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StorefrontError::Config(format!("STOREFRONT_CURRENCY must be a three letter code: {currency}")));
        }

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            max_connections,
            port,
            nats_url: get("NATS_URL"),
            currency,
            price_field: get("STOREFRONT_PRICE_FIELD").unwrap_or(defaults.price_field),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(Config::from_lookup(lookup(&[])).unwrap(), Config::default());
    }

    #[test]
    fn test_reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "sqlite://shop.db"),
            ("PORT", "9000"),
            ("NATS_URL", "nats://localhost:4222"),
            ("STOREFRONT_CURRENCY", "eur"),
            ("STOREFRONT_PRICE_FIELD", "Price"),
        ]))
        .unwrap();
        assert_eq!(config.database_url, "sqlite://shop.db");
        assert_eq!(config.port, 9000);
        assert_eq!(config.nats_url.as_deref(), Some("nats://localhost:4222"));
        assert_eq!(config.currency, "EUR");
        assert_eq!(config.price_field, "Price");
    }

    #[test]
    fn test_bad_values_are_configuration_faults() {
        let err = Config::from_lookup(lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.is_configuration_fault());
        assert!(Config::from_lookup(lookup(&[("STOREFRONT_CURRENCY", "dollars")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DATABASE_MAX_CONNECTIONS", "0")])).is_err());
    }

    #[test]
    fn test_blank_values_fall_back() {
        let config = Config::from_lookup(lookup(&[("NATS_URL", "  ")])).unwrap();
        assert_eq!(config.nats_url, None);
    }
}
