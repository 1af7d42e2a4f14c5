// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Environment variables kept for compatibility with the container setup.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("REDIS_HOST", "redis.host"),
    ("REDIS_PORT", "redis.port"),
    ("JWT_SECRET_KEY", "auth.jwt_secret"),
    ("USER_SERVICE_URL", "services.user"),
    ("ORDER_SERVICE_URL", "services.order"),
    ("PRODUCT_SERVICE_URL", "services.product"),
];

/// Load configuration from built-in defaults, an optional file (YAML, JSON or
/// TOML by extension) and the environment, in that order of precedence.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    load_config_with(path, |key| std::env::var(key).ok())
}

fn load_config_with<P, F>(path: P, env: F) -> Result<Config>
where
    P: AsRef<Path>,
    F: Fn(&str) -> Option<String>,
{
    let path = path.as_ref();

    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix("GATEWAY")
                .separator("__")
                .try_parsing(true),
        );

    for (var, key) in LEGACY_ENV {
        builder = builder
            .set_override_option(*key, env(var))
            .with_context(|| format!("Failed to apply {}", var))?;
    }

    let config: Config = builder
        .build()
        .context("Failed to assemble configuration")?
        .try_deserialize()
        .context("Failed to parse configuration")?;

    config.validate()?;
    Ok(config)
}
