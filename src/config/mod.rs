//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing.
//! Sensitive values wrapped in secrecy::SecretString to prevent log leaks.

pub mod secrets;

use std::net::SocketAddr;
use std::time::Duration;

use crate::engine::{ExecutorConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::transport::pgmq::PgmqConfig;
use self::secrets::SecretString;

/// Connections beyond one per worker in the transport pool.
const TRANSPORT_POOL_HEADROOM: u32 = 4;

#[derive(Debug)]
pub struct Config {
    /// Postgres (pgmq) URL backing the delivery transport.
    pub transport_url: SecretString,
    /// Postgres URL backing the status store. May equal `transport_url`.
    pub store_url: SecretString,
    pub worker_count: usize,
    pub http_addr: SocketAddr,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Retry cap. `None` requeues failed tasks forever.
    pub max_attempts: Option<u32>,
    pub sim_min_latency: Duration,
    pub sim_max_latency: Duration,
    pub sim_failure_rate: f64,
    pub visibility_timeout_secs: i32,
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let worker_count: usize = parse_var("WORKER_COUNT", &required_var("WORKER_COUNT")?)?;
        if worker_count == 0 {
            return Err(Error::Config("WORKER_COUNT must be at least 1".to_string()));
        }

        let sim_min_latency = Duration::from_millis(optional_var("SIM_MIN_LATENCY_MS", 500)?);
        let sim_max_latency = Duration::from_millis(optional_var("SIM_MAX_LATENCY_MS", 1500)?);
        if sim_max_latency < sim_min_latency {
            return Err(Error::Config(
                "SIM_MAX_LATENCY_MS must not be below SIM_MIN_LATENCY_MS".to_string(),
            ));
        }

        let sim_failure_rate: f64 = optional_var("SIM_FAILURE_RATE", 0.1)?;
        if !(0.0..=1.0).contains(&sim_failure_rate) {
            return Err(Error::Config(
                "SIM_FAILURE_RATE must be within 0.0..=1.0".to_string(),
            ));
        }

        // The visibility timeout is the per-delivery lock: a message must not
        // reappear while its executor can still be running.
        let visibility_timeout_secs: i32 = optional_var("VISIBILITY_TIMEOUT_SECS", 30)?;
        if visibility_timeout_secs <= 0 {
            return Err(Error::Config(
                "VISIBILITY_TIMEOUT_SECS must be positive".to_string(),
            ));
        }
        if Duration::from_secs(visibility_timeout_secs.unsigned_abs().into()) <= sim_max_latency {
            return Err(Error::Config(format!(
                "VISIBILITY_TIMEOUT_SECS ({visibility_timeout_secs}s) must exceed SIM_MAX_LATENCY_MS ({}ms)",
                sim_max_latency.as_millis()
            )));
        }

        let max_attempts = match std::env::var("MAX_ATTEMPTS") {
            Ok(raw) => match parse_var::<u32>("MAX_ATTEMPTS", &raw)? {
                0 => None,
                n => Some(n),
            },
            Err(_) => None,
        };

        Ok(Self {
            transport_url: transport_url_from_env()?,
            store_url: store_url_from_env()?,
            worker_count,
            http_addr: optional_var("HTTP_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            max_attempts,
            sim_min_latency,
            sim_max_latency,
            sim_failure_rate,
            visibility_timeout_secs,
            poll_interval: Duration::from_millis(optional_var("POLL_INTERVAL_MS", 1000)?),
            shutdown_timeout: Duration::from_secs(optional_var("SHUTDOWN_TIMEOUT_SECS", 10)?),
        })
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_attempts: self.max_attempts,
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            min_latency: self.sim_min_latency,
            max_latency: self.sim_max_latency,
            failure_rate: self.sim_failure_rate,
        }
    }

    /// Pool size for the transport database: one connection per worker for
    /// reads and settlement, plus the shared listener and publishes.
    pub fn transport_pool_size(&self) -> u32 {
        u32::try_from(self.worker_count)
            .unwrap_or(u32::MAX)
            .saturating_add(TRANSPORT_POOL_HEADROOM)
    }

    pub fn pgmq_config(&self) -> PgmqConfig {
        PgmqConfig {
            visibility_timeout_secs: self.visibility_timeout_secs,
            poll_interval: self.poll_interval,
        }
    }
}

/// `TRANSPORT_URL` alone, for commands that only publish.
pub fn transport_url_from_env() -> Result<SecretString> {
    required_var("TRANSPORT_URL").map(SecretString::from)
}

/// `STORE_URL` alone, for commands that only read or write status.
pub fn store_url_from_env() -> Result<SecretString> {
    required_var("STORE_URL").map(SecretString::from)
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn optional_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match std::env::var(name) {
        Ok(raw) => parse_var(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {name}: {raw:?}")))
}
