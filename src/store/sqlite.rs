//! SQLite-backed persistent cache
//!
//! Embedded, file-backed engine. The pool is capped at a single
//! connection, which serializes writes; SQLite handles concurrent
//! writers poorly and the write volume of a cache does not need more.

use super::{now_unix, Store};
use crate::types::IpInfo;
use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, warn};

pub struct SqliteStore {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteStore {
    /// Open (creating if necessary) the database at `path`.
    pub async fn open(path: &str, ttl: Duration) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ip_cache (
                ip         TEXT PRIMARY KEY,
                data       TEXT NOT NULL,
                source     TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ip_cache_updated_at ON ip_cache(updated_at)")
            .execute(&pool)
            .await?;

        info!(path, ttl_secs = ttl.as_secs(), "sqlite persistent cache opened");
        Ok(Self { pool, ttl })
    }

    fn cutoff(&self) -> i64 {
        now_unix() - self.ttl.as_secs() as i64
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn get(&self, ip: &str) -> Option<IpInfo> {
        let row = sqlx::query("SELECT data FROM ip_cache WHERE ip = ? AND updated_at > ?")
            .bind(ip)
            .bind(self.cutoff())
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(Some(row)) => {
                let data: String = row.try_get("data").ok()?;
                serde_json::from_str(&data).ok()
            }
            Ok(None) => None,
            Err(e) => {
                warn!(ip, error = %e, "sqlite get failed, treating as miss");
                None
            }
        }
    }

    async fn set(&self, ip: &str, info: &IpInfo) {
        let data = match serde_json::to_string(info) {
            Ok(data) => data,
            Err(e) => {
                warn!(ip, error = %e, "failed to serialize result, not persisted");
                return;
            }
        };

        let result = sqlx::query(
            "INSERT INTO ip_cache (ip, data, source, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(ip) DO UPDATE SET
                 data = excluded.data,
                 source = excluded.source,
                 updated_at = excluded.updated_at",
        )
        .bind(ip)
        .bind(data)
        .bind(&info.source)
        .bind(now_unix())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            warn!(ip, error = %e, "sqlite set failed");
        }
    }

    async fn size(&self) -> u64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ip_cache")
            .fetch_one(&self.pool)
            .await
            .map(|n| n as u64)
            .unwrap_or(0)
    }

    async fn cleanup(&self) {
        match sqlx::query("DELETE FROM ip_cache WHERE updated_at <= ?")
            .bind(self.cutoff())
            .execute(&self.pool)
            .await
        {
            Ok(result) if result.rows_affected() > 0 => {
                info!(removed = result.rows_affected(), "sqlite cleanup removed expired rows");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "sqlite cleanup failed"),
        }
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("sqlite persistent cache closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp(ttl: Duration) -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cache.db");
        let store = SqliteStore::open(path.to_str().expect("path"), ttl)
            .await
            .expect("open");
        (dir, store)
    }

    fn sample(ip: &str) -> IpInfo {
        IpInfo {
            ip: ip.to_string(),
            is_vpn: true,
            asn: 9009,
            asn_org: "M247 / G-Core Labs".to_string(),
            source: "ipwhois".to_string(),
            ..IpInfo::default()
        }
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let (_dir, store) = open_temp(Duration::from_secs(3600)).await;
        let info = sample("1.2.3.4");
        store.set("1.2.3.4", &info).await;

        let got = store.get("1.2.3.4").await.expect("hit");
        assert_eq!(got, info);
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn test_miss() {
        let (_dir, store) = open_temp(Duration::from_secs(3600)).await;
        assert!(store.get("9.9.9.9").await.is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites() {
        let (_dir, store) = open_temp(Duration::from_secs(3600)).await;
        store.set("1.2.3.4", &sample("1.2.3.4")).await;

        let mut updated = sample("1.2.3.4");
        updated.is_tor = true;
        updated.source = "ipdata".to_string();
        store.set("1.2.3.4", &updated).await;

        let got = store.get("1.2.3.4").await.expect("hit");
        assert!(got.is_tor);
        assert_eq!(got.source, "ipdata");
        assert_eq!(store.size().await, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        // Zero TTL: every row is immediately older than the cutoff.
        let (_dir, store) = open_temp(Duration::ZERO).await;
        store.set("1.2.3.4", &sample("1.2.3.4")).await;
        assert!(store.get("1.2.3.4").await.is_none());
        // The row is still there until cleanup runs.
        assert_eq!(store.size().await, 1);

        store.cleanup().await;
        assert_eq!(store.size().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_rows() {
        let (_dir, store) = open_temp(Duration::from_secs(3600)).await;
        store.set("1.2.3.4", &sample("1.2.3.4")).await;
        store.cleanup().await;
        assert_eq!(store.size().await, 1);
    }
}
