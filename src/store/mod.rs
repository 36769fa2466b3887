//! Persistent second-tier cache
//!
//! Durable storage for lookup results, surviving process restarts.
//! Backends are interchangeable behind the [`Store`] trait; which one
//! runs is a configuration concern. Per-operation failures are logged
//! and treated as a miss/no-op, never propagated: a broken cache only
//! ever costs an extra provider call.

pub mod mysql;
pub mod sqlite;

use crate::types::IpInfo;
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How often expired rows are deleted.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

/// Durable cache keyed by IP, with its own TTL.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a stored result. Absent when missing, expired, or on
    /// backend error.
    async fn get(&self, ip: &str) -> Option<IpInfo>;

    /// Upsert a result keyed by IP. Errors are swallowed.
    async fn set(&self, ip: &str, info: &IpInfo);

    /// Number of rows currently stored, expired ones included.
    async fn size(&self) -> u64;

    /// Delete rows older than the TTL.
    async fn cleanup(&self);

    /// Close the backend.
    async fn close(&self);
}

/// Supported persistent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Mysql,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Backend::Sqlite),
            "mysql" => Ok(Backend::Mysql),
            other => Err(format!("unknown persistent cache backend: {other}")),
        }
    }
}

/// Open the configured backend.
pub async fn open(
    backend: Backend,
    dsn: &str,
    ttl: Duration,
) -> Result<Arc<dyn Store>, sqlx::Error> {
    match backend {
        Backend::Sqlite => Ok(Arc::new(sqlite::SqliteStore::open(dsn, ttl).await?)),
        Backend::Mysql => Ok(Arc::new(mysql::MysqlStore::open(dsn, ttl).await?)),
    }
}

/// Spawn the periodic cleanup task. Runs until `token` is cancelled.
pub fn spawn_cleanup(
    store: Arc<dyn Store>,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => store.cleanup().await,
                _ = token.cancelled() => return,
            }
        }
    })
}

/// Seconds since the Unix epoch, for `updated_at` columns.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
