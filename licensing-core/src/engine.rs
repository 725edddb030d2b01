//! The session engine (§4.4): skew checking, the adaptive refresh schedule,
//! and create/refresh/delete semantics.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;

use crate::config::{Config, RefreshConfig};
use crate::crypto::KeyPair;
use crate::error::{Error, Result};
use crate::limiter::RateLimiter;
use crate::model::{Id32, License, LicenseSession, LicenseValidity, SessionTimes};
use crate::store::SessionStore;

pub struct Engine<S: SessionStore> {
    store: S,
    limiter: RateLimiter,
    config: Config,
    server_identity: KeyPair,
}

pub struct CreateRequest {
    pub license_id: Id32,
    pub client_session_id: Id32,
    pub identifier: String,
    pub machine_id: Vec<u8>,
    pub app_version: String,
    pub client_timestamp: DateTime<Utc>,
}

pub struct CreateResponse {
    pub server_session_id: Id32,
    pub server_session_secret: Id32,
    pub times: SessionTimes,
    pub license: License,
}

pub struct RefreshRequest {
    pub client_session_id: Id32,
    pub client_timestamp: DateTime<Utc>,
}

pub struct RefreshResponse {
    pub times: SessionTimes,
    pub license: License,
}

impl<S: SessionStore> Engine<S> {
    pub fn new(store: S, config: Config) -> Self {
        let seed = config.server_seed_bytes();
        let server_identity = KeyPair::from_seed(&seed);
        Self {
            store,
            limiter: RateLimiter::new(),
            config,
            server_identity,
        }
    }

    pub fn server_identity(&self) -> &KeyPair {
        &self.server_identity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// `|Tc - Ts| < maxTimeDrift` (§4.4).
    fn check_skew(&self, client_timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let drift = (now - client_timestamp).num_milliseconds().unsigned_abs();
        if drift >= self.config.max_time_drift.as_millis() as u64 {
            return Err(Error::TimeOutOfSync);
        }
        Ok(())
    }

    /// Issuer-active and product-active checks (§4.4 step 4). License
    /// active/expired checks are done separately by the caller.
    async fn check_issuer_and_product(&self, license: &License) -> Result<()> {
        let issuer = self
            .store
            .select_license_issuer_by_id(license.issuer_id)
            .await?
            .ok_or(Error::NotFound)?;
        if !issuer.active {
            return Err(Error::LicenseIssuerDisabled);
        }
        if let Some(product_id) = license.product_id {
            let product = self.store.select_product_by_id(product_id).await?.ok_or(Error::NotFound)?;
            if !product.active {
                return Err(Error::ProductInactive);
            }
        }
        Ok(())
    }

    pub async fn create(&self, req: CreateRequest, now: DateTime<Utc>) -> Result<CreateResponse> {
        self.check_skew(req.client_timestamp, now)?;

        let license = self
            .store
            .select_license_by_id(req.license_id)
            .await?
            .ok_or(Error::NotFound)?;

        license.is_valid(now).map_err(|e| match e {
            LicenseValidity::Inactive => Error::LicenseInactive,
            LicenseValidity::Expired => Error::LicenseExpired,
        })?;

        if !self.limiter.allow(license.id, license.max_sessions, &self.config.limiter).await {
            return Err(Error::RateLimited);
        }

        self.check_issuer_and_product(&license).await?;

        let server_session = KeyPair::generate();
        let times = session_times(now, now, &self.config.refresh);

        self.store
            .delete_license_sessions_by_license_and_machine(license.id, &req.machine_id)
            .await?;

        let session = LicenseSession {
            client_session_id: req.client_session_id,
            server_session_id: server_session.public_bytes(),
            server_session_key: server_session.secret_bytes(),
            identifier: req.identifier,
            machine_id: req.machine_id,
            app_version: req.app_version,
            created: now,
            expire: times.expire,
            license_id: license.id,
        };
        self.store.insert_license_session(&session).await?;
        self.store.update_license_last_used(license.id, now).await?;

        Ok(CreateResponse {
            server_session_id: session.server_session_id,
            server_session_secret: session.server_session_key,
            times,
            license,
        })
    }

    pub async fn refresh(&self, req: RefreshRequest, now: DateTime<Utc>) -> Result<RefreshResponse> {
        self.check_skew(req.client_timestamp, now)?;

        let session = self
            .store
            .select_license_session_by_id(req.client_session_id)
            .await?
            .ok_or(Error::NotFound)?;

        let license = self
            .store
            .select_license_by_id(session.license_id)
            .await?
            .ok_or(Error::NotFound)?;

        license.is_valid(now).map_err(|e| match e {
            LicenseValidity::Inactive => Error::LicenseInactive,
            LicenseValidity::Expired => Error::LicenseExpired,
        })?;
        self.check_issuer_and_product(&license).await?;

        if now > session.expire {
            return Err(Error::LicenseSessionExpired);
        }

        let times = session_times(session.created, now, &self.config.refresh);
        self.store
            .update_license_session(session.client_session_id, times.expire)
            .await?;

        Ok(RefreshResponse { times, license })
    }

    pub async fn delete(&self, client_session_id: Id32) -> Result<()> {
        self.store.delete_license_session_by_client_session_id(client_session_id).await
    }
}

/// The §4.4 adaptive refresh/expire schedule.
///
/// `jitter = uniform(-J, +J)`; `uptime = now - start`; `delay = clamp((2 +
/// jitter) * uptime, min, max)`; `refresh = now + delay`; `expire = now + 2 *
/// delay`.
pub fn session_times(start: DateTime<Utc>, now: DateTime<Utc>, refresh: &RefreshConfig) -> SessionTimes {
    let jitter = if refresh.jitter > 0.0 {
        rand::thread_rng().gen_range(-refresh.jitter..refresh.jitter)
    } else {
        0.0
    };
    let uptime = (now - start).num_milliseconds().max(0) as f64;
    let raw_delay_ms = (2.0 + jitter) * uptime;
    let min_ms = refresh.min.as_millis() as f64;
    let max_ms = refresh.max.as_millis() as f64;
    let delay_ms = raw_delay_ms.clamp(min_ms, max_ms);

    let delay = ChronoDuration::milliseconds(delay_ms as i64);
    SessionTimes {
        refresh: now + delay,
        expire: now + delay * 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn refresh_config() -> RefreshConfig {
        RefreshConfig {
            min: Duration::from_secs(5 * 60),
            max: Duration::from_secs(2 * 60 * 60),
            jitter: 0.0,
        }
    }

    #[test]
    fn first_call_clamps_to_minimum() {
        let now = Utc::now();
        let times = session_times(now, now, &refresh_config());
        assert_eq!(times.refresh - now, ChronoDuration::minutes(5));
        assert_eq!(times.expire - now, ChronoDuration::minutes(10));
    }

    #[test]
    fn happy_path_s1_shape() {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let create_times = session_times(start, start, &refresh_config());
        assert_eq!(create_times.refresh, start + ChronoDuration::minutes(5));
        assert_eq!(create_times.expire, start + ChronoDuration::minutes(10));

        let refresh_now = start + ChronoDuration::minutes(5);
        let refresh_times = session_times(start, refresh_now, &refresh_config());
        assert_eq!(refresh_times.refresh, refresh_now + ChronoDuration::minutes(5));
        assert_eq!(refresh_times.expire, refresh_now + ChronoDuration::minutes(10));
    }

    #[test]
    fn delay_doubles_with_uptime_until_capped() {
        let start = Utc::now();
        let now = start + ChronoDuration::hours(1);
        let times = session_times(start, now, &refresh_config());
        // uptime = 1h, delay = 2h (clamped to max)
        assert_eq!(times.refresh - now, ChronoDuration::hours(2));
        assert_eq!(times.expire - now, ChronoDuration::hours(4));
    }

    #[test]
    fn expire_is_always_double_refresh_delay() {
        let start = Utc::now();
        let now = start + ChronoDuration::minutes(20);
        let times = session_times(start, now, &refresh_config());
        let refresh_delay = times.refresh - now;
        let expire_delay = times.expire - now;
        assert_eq!(expire_delay, refresh_delay * 2);
    }
}
