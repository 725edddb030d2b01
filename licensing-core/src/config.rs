//! Configuration supplier (§10.1).
//!
//! Values are loaded from environment variables with the `LICENSING_` prefix
//! (e.g. `LICENSING_HTTP_LISTEN`, `LICENSING_DB_PATH`), mirroring the
//! env-var-driven configuration of the service this engine was distilled
//! from. Validation runs once at load time so a misconfigured deployment
//! fails before it binds a socket rather than misbehaving at request time.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    #[serde(with = "humantime_serde", default = "default_session_every")]
    pub session_every: Duration,
    #[serde(with = "humantime_serde", default = "default_burst_total")]
    pub burst_total: Duration,
    #[serde(with = "humantime_serde", default = "default_session_every_init")]
    pub session_every_init: Duration,
}

fn default_session_every() -> Duration {
    Duration::from_secs(10 * 60)
}
fn default_burst_total() -> Duration {
    Duration::from_secs(8 * 60 * 60)
}
fn default_session_every_init() -> Duration {
    Duration::from_secs(60)
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            session_every: default_session_every(),
            burst_total: default_burst_total(),
            session_every_init: default_session_every_init(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(with = "humantime_serde", default = "default_refresh_min")]
    pub min: Duration,
    #[serde(with = "humantime_serde", default = "default_refresh_max")]
    pub max: Duration,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_refresh_min() -> Duration {
    Duration::from_secs(5 * 60)
}
fn default_refresh_max() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}
fn default_jitter() -> f64 {
    0.1
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            min: default_refresh_min(),
            max: default_refresh_max(),
            jitter: default_jitter(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_http_listen")]
    pub http_listen: String,
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// 32-byte server identity seed, hex-encoded (64 hex chars).
    pub server_seed: String,
    #[serde(default)]
    pub limiter: LimiterConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(with = "humantime_serde", default = "default_max_time_drift")]
    pub max_time_drift: Duration,
    #[serde(with = "humantime_serde", default = "default_cleanup_interval")]
    pub cleanup_interval: Duration,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_http_listen() -> String {
    "0.0.0.0:8443".to_string()
}
fn default_db_path() -> String {
    "licensing.sqlite".to_string()
}
fn default_max_time_drift() -> Duration {
    Duration::from_secs(6 * 60 * 60)
}
fn default_cleanup_interval() -> Duration {
    Duration::from_secs(20 * 60)
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from `LICENSING_*` environment variables, then
    /// validate it.
    pub fn load() -> Result<Self> {
        let source = config::Environment::with_prefix("LICENSING")
            .separator("_")
            .try_parsing(true);
        let built = config::Config::builder()
            .add_source(source)
            .build()
            .map_err(|e| Error::InvalidInput(format!("failed to read configuration: {e}")))?;
        let cfg: Config = built
            .try_deserialize()
            .map_err(|e| Error::InvalidInput(format!("failed to parse configuration: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if hex::decode(&self.server_seed).map(|b| b.len()).unwrap_or(0) != 32 {
            return Err(Error::InvalidInput(
                "server_seed must be 64 hex characters (32 bytes)".to_string(),
            ));
        }
        if self.limiter.session_every_init > self.limiter.session_every {
            return Err(Error::InvalidInput(
                "limiter.session_every_init must not exceed limiter.session_every".to_string(),
            ));
        }
        if self.limiter.session_every.is_zero()
            || self.limiter.burst_total.is_zero()
            || self.limiter.session_every_init.is_zero()
        {
            return Err(Error::InvalidInput(
                "limiter durations must be positive".to_string(),
            ));
        }
        if self.refresh.min.is_zero() || self.refresh.max.is_zero() || self.refresh.min > self.refresh.max {
            return Err(Error::InvalidInput(
                "refresh.min must be positive and not exceed refresh.max".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.refresh.jitter) {
            return Err(Error::InvalidInput(
                "refresh.jitter must be in [0, 1)".to_string(),
            ));
        }
        if self.max_time_drift.is_zero() {
            return Err(Error::InvalidInput("max_time_drift must be positive".to_string()));
        }
        Ok(())
    }

    pub fn server_seed_bytes(&self) -> [u8; 32] {
        let bytes = hex::decode(&self.server_seed).expect("validated at load time");
        bytes.try_into().expect("validated at load time")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            http_listen: default_http_listen(),
            db_path: default_db_path(),
            server_seed: "00".repeat(32),
            limiter: LimiterConfig::default(),
            refresh: RefreshConfig::default(),
            max_time_drift: default_max_time_drift(),
            cleanup_interval: default_cleanup_interval(),
            log_level: default_log_level(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn rejects_short_seed() {
        let mut cfg = valid_config();
        cfg.server_seed = "00".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_warm_up_interval_coarser_than_steady_state() {
        let mut cfg = valid_config();
        cfg.limiter.session_every_init = cfg.limiter.session_every * 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_refresh_bounds() {
        let mut cfg = valid_config();
        cfg.refresh.max = Duration::from_secs(1);
        cfg.refresh.min = Duration::from_secs(2);
        assert!(cfg.validate().is_err());
    }
}
