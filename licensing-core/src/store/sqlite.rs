//! SQLite-backed [`SessionStore`] (§10.4): the default, self-contained
//! persistence layer. The overuse sweep is expressed as a single windowed
//! ranking query so it stays atomic with respect to concurrent inserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::model::{License, LicenseIssuer, LicenseSession, Product};

use super::SessionStore;

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(path: &str) -> Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(&url)
            .await
            .map_err(|e| Error::sensitive("failed to open session store", e))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS license_issuer (
                id BLOB PRIMARY KEY,
                active INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS product (
                id BLOB PRIMARY KEY,
                active INTEGER NOT NULL,
                name TEXT,
                data TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS license (
                id BLOB PRIMARY KEY,
                key BLOB NOT NULL,
                active INTEGER NOT NULL,
                name TEXT,
                data TEXT,
                max_sessions INTEGER NOT NULL,
                valid_until TEXT,
                created TEXT NOT NULL,
                updated TEXT NOT NULL,
                last_used TEXT,
                issuer_id BLOB NOT NULL,
                product_id BLOB
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS license_session (
                client_session_id BLOB PRIMARY KEY,
                server_session_id BLOB NOT NULL,
                server_session_key BLOB NOT NULL,
                identifier TEXT NOT NULL,
                machine_id BLOB NOT NULL,
                app_version TEXT NOT NULL,
                created TEXT NOT NULL,
                expire TEXT NOT NULL,
                license_id BLOB NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS license_session_license_id_idx ON license_session(license_id);")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Provision an issuer row. The administrative resource API owns this
    /// data in a full deployment; this exists so a self-contained instance
    /// can seed the minimal rows the engine's joins need.
    pub async fn upsert_license_issuer(&self, issuer: &LicenseIssuer) -> Result<()> {
        sqlx::query("INSERT INTO license_issuer (id, active) VALUES (?, ?) ON CONFLICT(id) DO UPDATE SET active = excluded.active")
            .bind(issuer.id.as_slice())
            .bind(issuer.active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn upsert_product(&self, product: &Product) -> Result<()> {
        let data = product.data.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO product (id, active, name, data) VALUES (?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET active = excluded.active, name = excluded.name, data = excluded.data",
        )
        .bind(product.id.as_slice())
        .bind(product.active)
        .bind(&product.name)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_license(&self, license: &License) -> Result<()> {
        let data = license.data.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            "INSERT INTO license \
             (id, key, active, name, data, max_sessions, valid_until, created, updated, last_used, issuer_id, product_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET key = excluded.key, active = excluded.active, name = excluded.name, \
             data = excluded.data, max_sessions = excluded.max_sessions, valid_until = excluded.valid_until, \
             updated = excluded.updated, issuer_id = excluded.issuer_id, product_id = excluded.product_id",
        )
        .bind(license.id.as_slice())
        .bind(license.key.as_slice())
        .bind(license.active)
        .bind(&license.name)
        .bind(data)
        .bind(license.max_sessions as i64)
        .bind(license.valid_until.map(|t| t.to_rfc3339()))
        .bind(license.created.to_rfc3339())
        .bind(license.updated.to_rfc3339())
        .bind(license.last_used.map(|t| t.to_rfc3339()))
        .bind(license.issuer_id.as_slice())
        .bind(license.product_id.map(|id| id.to_vec()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn to_array32(bytes: Vec<u8>) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|_| Error::sensitive("stored identifier was not 32 bytes", InvariantError))
}

#[derive(Debug)]
struct InvariantError;
impl std::fmt::Display for InvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stored row violated a 32-byte identifier invariant")
    }
}
impl std::error::Error for InvariantError {}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::sensitive("stored timestamp was malformed", e))
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn select_license_by_id(&self, id: [u8; 32]) -> Result<Option<License>> {
        let row = sqlx::query(
            "SELECT id, key, active, name, data, max_sessions, valid_until, created, updated, last_used, issuer_id, product_id \
             FROM license WHERE id = ?",
        )
        .bind(id.as_slice())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(License {
            id: to_array32(row.get::<Vec<u8>, _>("id"))?,
            key: to_array32(row.get::<Vec<u8>, _>("key"))?,
            active: row.get::<bool, _>("active"),
            name: row.get::<Option<String>, _>("name"),
            data: row
                .get::<Option<String>, _>("data")
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e: serde_json::Error| Error::sensitive("stored license data was malformed", e))?,
            max_sessions: row.get::<i64, _>("max_sessions") as u32,
            valid_until: row
                .get::<Option<String>, _>("valid_until")
                .map(|s| parse_rfc3339(&s))
                .transpose()?,
            created: parse_rfc3339(&row.get::<String, _>("created"))?,
            updated: parse_rfc3339(&row.get::<String, _>("updated"))?,
            last_used: row
                .get::<Option<String>, _>("last_used")
                .map(|s| parse_rfc3339(&s))
                .transpose()?,
            issuer_id: to_array32(row.get::<Vec<u8>, _>("issuer_id"))?,
            product_id: row.get::<Option<Vec<u8>>, _>("product_id").map(to_array32).transpose()?,
        }))
    }

    async fn select_license_issuer_by_id(&self, id: [u8; 32]) -> Result<Option<LicenseIssuer>> {
        let row = sqlx::query("SELECT id, active FROM license_issuer WHERE id = ?")
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(LicenseIssuer {
            id: to_array32(row.get::<Vec<u8>, _>("id"))?,
            active: row.get::<bool, _>("active"),
        }))
    }

    async fn select_product_by_id(&self, id: [u8; 32]) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT id, active, name, data FROM product WHERE id = ?")
            .bind(id.as_slice())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(Product {
            id: to_array32(row.get::<Vec<u8>, _>("id"))?,
            active: row.get::<bool, _>("active"),
            name: row.get::<Option<String>, _>("name"),
            data: row
                .get::<Option<String>, _>("data")
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .map_err(|e: serde_json::Error| Error::sensitive("stored product data was malformed", e))?,
        }))
    }

    async fn update_license_last_used(&self, id: [u8; 32], now: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE license SET last_used = ? WHERE id = ?")
            .bind(now.to_rfc3339())
            .bind(id.as_slice())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn select_license_session_by_id(&self, client_session_id: [u8; 32]) -> Result<Option<LicenseSession>> {
        let row = sqlx::query(
            "SELECT client_session_id, server_session_id, server_session_key, identifier, machine_id, \
             app_version, created, expire, license_id FROM license_session WHERE client_session_id = ?",
        )
        .bind(client_session_id.as_slice())
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_session(row)?))
    }

    async fn select_all_license_sessions_by_license_id(&self, license_id: [u8; 32]) -> Result<Vec<LicenseSession>> {
        let rows = sqlx::query(
            "SELECT client_session_id, server_session_id, server_session_key, identifier, machine_id, \
             app_version, created, expire, license_id FROM license_session WHERE license_id = ?",
        )
        .bind(license_id.as_slice())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_session).collect()
    }

    async fn insert_license_session(&self, session: &LicenseSession) -> Result<()> {
        sqlx::query(
            "INSERT INTO license_session \
             (client_session_id, server_session_id, server_session_key, identifier, machine_id, app_version, created, expire, license_id) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.client_session_id.as_slice())
        .bind(session.server_session_id.as_slice())
        .bind(session.server_session_key.as_slice())
        .bind(&session.identifier)
        .bind(&session.machine_id)
        .bind(&session.app_version)
        .bind(session.created.to_rfc3339())
        .bind(session.expire.to_rfc3339())
        .bind(session.license_id.as_slice())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_license_session(&self, client_session_id: [u8; 32], expire: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE license_session SET expire = ? WHERE client_session_id = ?")
            .bind(expire.to_rfc3339())
            .bind(client_session_id.as_slice())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_license_session_by_client_session_id(&self, client_session_id: [u8; 32]) -> Result<()> {
        sqlx::query("DELETE FROM license_session WHERE client_session_id = ?")
            .bind(client_session_id.as_slice())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_license_sessions_by_license_and_machine(&self, license_id: [u8; 32], machine_id: &[u8]) -> Result<()> {
        sqlx::query("DELETE FROM license_session WHERE license_id = ? AND machine_id = ?")
            .bind(license_id.as_slice())
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired_by_time(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM license_session WHERE expire <= ?")
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_overused(&self) -> Result<u64> {
        // Rank each session within its license by created DESC; anything
        // ranked beyond the license's max_sessions is overused. A single
        // statement keeps this atomic with respect to concurrent inserts.
        let result = sqlx::query(
            r#"
            DELETE FROM license_session
            WHERE client_session_id IN (
                SELECT client_session_id FROM (
                    SELECT
                        ls.client_session_id AS client_session_id,
                        ROW_NUMBER() OVER (
                            PARTITION BY ls.license_id
                            ORDER BY ls.created DESC
                        ) AS rank,
                        l.max_sessions AS max_sessions
                    FROM license_session ls
                    JOIN license l ON l.id = ls.license_id
                ) ranked
                WHERE ranked.rank > ranked.max_sessions
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<LicenseSession> {
    Ok(LicenseSession {
        client_session_id: to_array32(row.get::<Vec<u8>, _>("client_session_id"))?,
        server_session_id: to_array32(row.get::<Vec<u8>, _>("server_session_id"))?,
        server_session_key: to_array32(row.get::<Vec<u8>, _>("server_session_key"))?,
        identifier: row.get::<String, _>("identifier"),
        machine_id: row.get::<Vec<u8>, _>("machine_id"),
        app_version: row.get::<String, _>("app_version"),
        created: parse_rfc3339(&row.get::<String, _>("created"))?,
        expire: parse_rfc3339(&row.get::<String, _>("expire"))?,
        license_id: to_array32(row.get::<Vec<u8>, _>("license_id"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn store() -> SqliteStore {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite");
        let store = SqliteStore::connect(path.to_str().unwrap()).await.unwrap();
        std::mem::forget(dir); // keep temp dir alive for the pool's lifetime in-test
        store
    }

    async fn seed_license(store: &SqliteStore, id: [u8; 32], max_sessions: i64) {
        sqlx::query("INSERT INTO license_issuer (id, active) VALUES (?, 1)")
            .bind(id.as_slice())
            .execute(&store.pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO license (id, key, active, name, data, max_sessions, valid_until, created, updated, last_used, issuer_id, product_id) \
             VALUES (?, ?, 1, NULL, NULL, ?, NULL, ?, ?, NULL, ?, NULL)",
        )
        .bind(id.as_slice())
        .bind(id.as_slice())
        .bind(max_sessions)
        .bind(Utc::now().to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .bind(id.as_slice())
        .execute(&store.pool)
        .await
        .unwrap();
    }

    fn session_for(license_id: [u8; 32], csid: u8, created: DateTime<Utc>) -> LicenseSession {
        LicenseSession {
            client_session_id: [csid; 32],
            server_session_id: [csid; 32],
            server_session_key: [csid; 32],
            identifier: "test-host".to_string(),
            machine_id: vec![csid],
            app_version: "1.0.0".to_string(),
            created,
            expire: created + ChronoDuration::hours(1),
            license_id,
        }
    }

    #[tokio::test]
    async fn insert_and_select_round_trip() {
        let store = store().await;
        let license_id = [9u8; 32];
        seed_license(&store, license_id, 5).await;
        let session = session_for(license_id, 1, Utc::now());
        store.insert_license_session(&session).await.unwrap();

        let fetched = store
            .select_license_session_by_id(session.client_session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.license_id, license_id);
    }

    #[tokio::test]
    async fn overuse_sweep_keeps_most_recent() {
        let store = store().await;
        let license_id = [5u8; 32];
        seed_license(&store, license_id, 2).await;

        let base = Utc::now();
        for (i, offset) in [0, 1, 2].into_iter().enumerate() {
            let session = session_for(license_id, i as u8 + 1, base + ChronoDuration::seconds(offset));
            store.insert_license_session(&session).await.unwrap();
        }

        let removed = store.delete_overused().await.unwrap();
        assert_eq!(removed, 1);

        let remaining = store.select_all_license_sessions_by_license_id(license_id).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().all(|s| s.client_session_id != [1u8; 32]));
    }

    #[tokio::test]
    async fn expired_sweep_removes_only_past_deadline() {
        let store = store().await;
        let license_id = [6u8; 32];
        seed_license(&store, license_id, 5).await;

        let past = session_for(license_id, 1, Utc::now() - ChronoDuration::hours(3));
        let future = session_for(license_id, 2, Utc::now());
        store.insert_license_session(&past).await.unwrap();
        store.insert_license_session(&future).await.unwrap();

        let removed = store.delete_expired_by_time(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store
            .select_license_session_by_id(future.client_session_id)
            .await
            .unwrap()
            .is_some());
    }
}
