//! Configuration for mies
//!
//! CLI arguments and environment variable handling using clap. Every flag
//! can also be set through the environment (or a `.env` file).

use clap::Parser;
use std::time::Duration;
use uuid::Uuid;

use crate::acting::{EnergyConfig, LifecycleConfig};
use crate::cache::CacheConfig;
use crate::dispatch::{NatsDispatcherConfig, PoolConfig};
use crate::life::SchedulerConfig;

/// mies - residents wandering buildings and processing what they find
#[derive(Parser, Debug, Clone)]
#[command(name = "mies")]
#[command(about = "Resident/building agent engine")]
pub struct Args {
    /// Unique node identifier, also names the NATS reply inbox
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Use in-memory stores and in-process workers when MongoDB or NATS
    /// are unavailable
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "mies")]
    pub mongodb_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Time between scheduler ticks in milliseconds
    #[arg(long, env = "TICK_INTERVAL_MS", default_value = "5000")]
    pub tick_interval_ms: u64,

    /// Energy assumed for buildings without one
    #[arg(long, env = "DEFAULT_BUILDING_ENERGY", default_value = "50")]
    pub default_building_energy: f64,

    /// Age at which a pending action is discarded, in seconds
    #[arg(long, env = "DISCARD_AFTER_SECS", default_value = "86400")]
    pub discard_after_secs: u64,

    /// Budget for one result poll in milliseconds (1-1000)
    #[arg(long, env = "POLL_WAIT_MS", default_value = "1000")]
    pub poll_wait_ms: u64,

    /// Expiry of mirrored buildings in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "86400")]
    pub cache_ttl_secs: u64,

    /// Maximum mirrored buildings kept in memory
    #[arg(long, env = "CACHE_MAX_ENTRIES", default_value = "10000")]
    pub cache_max_entries: usize,

    /// In-process workers (used when NATS is not available)
    #[arg(long, env = "WORKER_COUNT", default_value = "4")]
    pub worker_count: usize,

    /// Floor to seed in dev mode
    #[arg(long, env = "SEED_FLOOR", default_value = "0")]
    pub seed_floor: String,

    /// Numbered lots per floor a resident can wander onto, built or not
    #[arg(long, env = "FLOOR_LOTS", default_value = "0")]
    pub floor_lots: usize,

    /// Buildings to seed in dev mode
    #[arg(long, env = "SEED_BUILDINGS", default_value = "0")]
    pub seed_buildings: usize,

    /// Residents to seed in dev mode
    #[arg(long, env = "SEED_RESIDENTS", default_value = "0")]
    pub seed_residents: usize,
}

/// NATS connection arguments
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=1000).contains(&self.poll_wait_ms) {
            return Err("POLL_WAIT_MS must be between 1 and 1000".to_string());
        }

        if self.discard_after_secs == 0 {
            return Err("DISCARD_AFTER_SECS must be greater than 0".to_string());
        }

        if self.tick_interval_ms == 0 {
            return Err("TICK_INTERVAL_MS must be greater than 0".to_string());
        }

        if !self.default_building_energy.is_finite() || self.default_building_energy < 0.0 {
            return Err("DEFAULT_BUILDING_ENERGY must be a non-negative number".to_string());
        }

        if self.cache_max_entries == 0 {
            return Err("CACHE_MAX_ENTRIES must be greater than 0".to_string());
        }

        if self.nats.nats_user.is_some() != self.nats.nats_password.is_some() {
            return Err("NATS_USER and NATS_PASSWORD must be set together".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err("LOG_FORMAT must be text or json".to_string());
        }

        Ok(())
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            discard_after: Duration::from_secs(self.discard_after_secs),
            poll_wait: Duration::from_millis(self.poll_wait_ms),
        }
    }

    pub fn energy_config(&self) -> EnergyConfig {
        EnergyConfig {
            default_building_energy: self.default_building_energy,
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.cache_max_entries,
            building_ttl: Duration::from_secs(self.cache_ttl_secs),
            ..Default::default()
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            worker_count: self.worker_count,
            ..Default::default()
        }
    }

    pub fn dispatcher_config(&self) -> NatsDispatcherConfig {
        NatsDispatcherConfig {
            dispatcher_id: self.node_id.to_string(),
            ..Default::default()
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mies"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_are_valid() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.default_building_energy, 50.0);
        assert_eq!(args.lifecycle_config().discard_after, Duration::from_secs(86_400));
        assert_eq!(args.lifecycle_config().poll_wait, Duration::from_secs(1));
        assert_eq!(args.cache_config().building_ttl, Duration::from_secs(86_400));
    }

    #[test]
    fn test_poll_wait_is_bounded() {
        assert!(parse(&["--poll-wait-ms", "0"]).validate().is_err());
        assert!(parse(&["--poll-wait-ms", "1001"]).validate().is_err());
        assert!(parse(&["--poll-wait-ms", "250"]).validate().is_ok());
    }

    #[test]
    fn test_nats_credentials_come_in_pairs() {
        assert!(parse(&["--nats-user", "mies"]).validate().is_err());
        assert!(parse(&["--nats-user", "mies", "--nats-password", "pw"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_dispatcher_uses_node_id() {
        let args = parse(&[]);
        assert_eq!(args.dispatcher_config().dispatcher_id, args.node_id.to_string());
    }
}
