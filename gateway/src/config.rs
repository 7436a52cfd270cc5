use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub database_url: String,
    pub working_dir: PathBuf,
    pub local_time_zone: Tz,
    pub jwt_secret: String,
    pub registry_path: PathBuf,
    pub queue_capacity: usize,
}

impl GatewayConfig {
    /// Reads `.env` (if any) and then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let listen_addr = lookup("PORTAL_LISTEN_ADDR")
            .unwrap_or_else(|| "0.0.0.0:3000".to_string())
            .parse()
            .context("PORTAL_LISTEN_ADDR must be a socket address")?;
        let database_url = lookup("PORTAL_DATABASE_URL").unwrap_or_else(|| "sqlite://portal.db".to_string());
        let working_dir = lookup("PORTAL_WORKING_DIR")
            .map(PathBuf::from)
            .context("PORTAL_WORKING_DIR must be set")?;
        let zone_name = lookup("PORTAL_LOCAL_TIME_ZONE").unwrap_or_else(|| "UTC".to_string());
        let local_time_zone = zone_name
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("PORTAL_LOCAL_TIME_ZONE '{}' is not a known zone: {}", zone_name, e))?;
        let jwt_secret = lookup("PORTAL_JWT_SECRET").context("PORTAL_JWT_SECRET must be set in .env")?;
        let registry_path = lookup("PORTAL_REGISTRY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("registry.json"));
        let queue_capacity = match lookup("PORTAL_QUEUE_CAPACITY") {
            Some(raw) => raw.parse().context("PORTAL_QUEUE_CAPACITY must be a positive integer")?,
            None => 64,
        };
        anyhow::ensure!(queue_capacity > 0, "PORTAL_QUEUE_CAPACITY must be a positive integer");

        Ok(Self {
            listen_addr,
            database_url,
            working_dir,
            local_time_zone,
            jwt_secret,
            registry_path,
            queue_capacity,
        })
    }
}
