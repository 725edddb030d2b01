//! The cleanup driver (§4.5): periodically sweeps expired and overused
//! sessions, reporting through a callback.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::SessionStore;

/// `(message, error)` — `error` is `None` on success.
pub type CleanupCallback = Box<dyn Fn(&str, Option<&crate::error::Error>) + Send + Sync>;

/// Run one sweep: expired sessions first, then overused ones, in that order
/// (an expired row should never also occupy an overuse slot).
pub async fn sweep_once<S: SessionStore>(store: &S, report: &CleanupCallback) {
    match store.delete_expired_by_time(Utc::now()).await {
        Ok(count) => report(&format!("deleted {count} expired session(s)"), None),
        Err(e) => report("failed to delete expired sessions", Some(&e)),
    }
    match store.delete_overused().await {
        Ok(count) => report(&format!("deleted {count} overused session(s)"), None),
        Err(e) => report("failed to delete overused sessions", Some(&e)),
    }
}

/// Run the sweep once immediately, then on every tick of `interval`, until
/// `cancel` fires.
pub async fn run<S: SessionStore>(store: &S, interval: Duration, cancel: CancellationToken, report: CleanupCallback) {
    sweep_once(store, &report).await;

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the first tick fires immediately; we already swept above

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_once(store, &report).await,
            _ = cancel.cancelled() => {
                report("cleanup driver stopped", None);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{License, LicenseIssuer, LicenseSession, Product};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct FakeStore {
        sessions: Mutex<Vec<LicenseSession>>,
        max_sessions: u32,
    }

    #[async_trait]
    impl SessionStore for FakeStore {
        async fn select_license_by_id(&self, _id: [u8; 32]) -> Result<Option<License>> {
            Ok(None)
        }
        async fn select_license_issuer_by_id(&self, _id: [u8; 32]) -> Result<Option<LicenseIssuer>> {
            Ok(None)
        }
        async fn select_product_by_id(&self, _id: [u8; 32]) -> Result<Option<Product>> {
            Ok(None)
        }
        async fn update_license_last_used(&self, _id: [u8; 32], _now: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        async fn select_license_session_by_id(&self, _id: [u8; 32]) -> Result<Option<LicenseSession>> {
            Ok(None)
        }
        async fn select_all_license_sessions_by_license_id(&self, _id: [u8; 32]) -> Result<Vec<LicenseSession>> {
            Ok(self.sessions.lock().await.clone())
        }
        async fn insert_license_session(&self, session: &LicenseSession) -> Result<()> {
            self.sessions.lock().await.push(session.clone());
            Ok(())
        }
        async fn update_license_session(&self, _id: [u8; 32], _expire: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        async fn delete_license_session_by_client_session_id(&self, id: [u8; 32]) -> Result<()> {
            self.sessions.lock().await.retain(|s| s.client_session_id != id);
            Ok(())
        }
        async fn delete_license_sessions_by_license_and_machine(&self, _id: [u8; 32], _machine: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn delete_expired_by_time(&self, now: DateTime<Utc>) -> Result<u64> {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.retain(|s| s.expire > now);
            Ok((before - sessions.len()) as u64)
        }
        async fn delete_overused(&self) -> Result<u64> {
            let mut sessions = self.sessions.lock().await;
            let before = sessions.len();
            sessions.sort_by(|a, b| b.created.cmp(&a.created));
            sessions.truncate(self.max_sessions as usize);
            Ok((before - sessions.len()) as u64)
        }
    }

    #[tokio::test]
    async fn sweep_runs_expired_before_overused() {
        use chrono::Duration as ChronoDuration;
        let store = FakeStore {
            sessions: Mutex::new(vec![]),
            max_sessions: 1,
        };
        let now = Utc::now();
        for i in 0..3u8 {
            store
                .insert_license_session(&LicenseSession {
                    client_session_id: [i; 32],
                    server_session_id: [i; 32],
                    server_session_key: [i; 32],
                    identifier: "host".into(),
                    machine_id: vec![i],
                    app_version: "1.0".into(),
                    created: now + ChronoDuration::seconds(i as i64),
                    expire: now + ChronoDuration::hours(1),
                    license_id: [0; 32],
                })
                .await
                .unwrap();
        }

        let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(vec![]));
        let log_clone = log.clone();
        let report: CleanupCallback = Box::new(move |msg, _err| {
            let log = log_clone.clone();
            let msg = msg.to_string();
            tokio::spawn(async move { log.lock().await.push(msg) });
        });

        sweep_once(&store, &report).await;
        // give the spawned logging tasks a chance to run
        tokio::task::yield_now().await;

        let remaining = store.select_all_license_sessions_by_license_id([0; 32]).await.unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn driver_exits_on_cancellation() {
        let store = FakeStore {
            sessions: Mutex::new(vec![]),
            max_sessions: 5,
        };
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU64::new(0));
        let calls_clone = calls.clone();
        let report: CleanupCallback = Box::new(move |_msg, _err| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel_clone.cancel();
        });

        tokio::time::timeout(Duration::from_secs(1), run(&store, Duration::from_secs(3600), cancel, report))
            .await
            .unwrap();
        assert!(calls.load(Ordering::SeqCst) >= 2); // immediate sweep emits at least two reports
    }
}
