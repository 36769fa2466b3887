//! External provider chain with per-provider rate limiting
//!
//! Each provider pairs a query capability with availability state: a
//! sliding 60-second window of call timestamps, a static per-minute
//! ceiling, and key-presence flags. The chain is tried strictly in
//! order; unavailable providers are skipped without consuming a slot,
//! and the first success wins.

pub mod sources;

use crate::config::Config;
use crate::types::{IpInfo, ProviderStatus};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

/// Width of the sliding rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Timeout applied to every outbound provider call.
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Error from a provider query.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure, timeouts included.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered but refused the lookup.
    #[error("{0}")]
    Api(String),

    /// No query capability; the provider is a disabled key-gated stub.
    #[error("no API key configured")]
    NoKey,
}

/// Capability of querying one external data source for an IP.
#[async_trait]
pub trait Query: Send + Sync {
    async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError>;
}

/// One external provider: query capability plus rate-limit state.
///
/// The call-time window is shared across concurrent lookups and guarded
/// by a per-provider mutex. The availability check and the call
/// recording are deliberately not atomic with each other; the limit is
/// advisory, guarding an external quota rather than a local invariant.
pub struct Provider {
    name: &'static str,
    rate_limit: u32,
    needs_key: bool,
    has_key: bool,
    query: Option<Box<dyn Query>>,
    calls: Mutex<Vec<Instant>>,
}

impl Provider {
    /// A free, unauthenticated provider with a per-minute ceiling.
    pub fn free(name: &'static str, rate_limit: u32, query: Box<dyn Query>) -> Self {
        Self {
            name,
            rate_limit,
            needs_key: false,
            has_key: true,
            query: Some(query),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A key-gated, unmetered provider. With no query capability it is a
    /// disabled stub: visible in status output, never available.
    pub fn keyed(name: &'static str, query: Option<Box<dyn Query>>) -> Self {
        let has_key = query.is_some();
        Self {
            name,
            rate_limit: 0,
            needs_key: true,
            has_key,
            query,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the provider can accept a call right now.
    ///
    /// Key-gated providers without a key are never available. Unmetered
    /// providers are available whenever their key is present. Metered
    /// providers prune the window and compare against the ceiling.
    pub fn is_available(&self) -> bool {
        if self.needs_key && !self.has_key {
            return false;
        }
        if self.rate_limit == 0 {
            return self.has_key;
        }
        let mut calls = self.calls.lock().expect("mutex poisoned");
        let now = Instant::now();
        calls.retain(|t| now.duration_since(*t) < RATE_WINDOW);
        (calls.len() as u32) < self.rate_limit
    }

    /// Record a call attempt in the sliding window.
    pub fn record_call(&self) {
        let mut calls = self.calls.lock().expect("mutex poisoned");
        calls.push(Instant::now());
    }

    /// Calls recorded within the last minute.
    pub fn used_last_minute(&self) -> u32 {
        let calls = self.calls.lock().expect("mutex poisoned");
        let now = Instant::now();
        calls
            .iter()
            .filter(|t| now.duration_since(**t) < RATE_WINDOW)
            .count() as u32
    }

    /// Query the provider for `ip`.
    pub async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
        match &self.query {
            Some(q) => q.query(ip).await,
            None => Err(ProviderError::NoKey),
        }
    }

    /// Snapshot for the stats endpoint.
    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            name: self.name.to_string(),
            available: self.is_available(),
            rate_limit: self.rate_limit,
            used_last_min: self.used_last_minute(),
            needs_key: self.needs_key,
            has_key: self.has_key,
        }
    }
}

/// Extract the ASN from strings like `"AS16509 Amazon.com, Inc."` or
/// `"16509"`. The `AS` prefix is matched case-insensitively; anything
/// after the leading digits is ignored. Yields 0 when no digits are
/// found.
pub fn parse_asn(s: &str) -> u32 {
    let digits = match s.get(..2) {
        Some(prefix) if prefix.eq_ignore_ascii_case("as") => &s[2..],
        _ => s,
    };
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    digits[..end].parse().unwrap_or(0)
}

/// Build the default provider chain: free providers first, then
/// key-gated ones (as disabled stubs when the key is absent). An
/// explicit priority list from configuration moves the named providers
/// to the front in the given order, keeping the rest in their original
/// relative order.
pub fn build_chain(cfg: &Config) -> Result<Vec<Provider>, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(QUERY_TIMEOUT).build()?;

    let mut providers = vec![
        Provider::free("ip-api", 40, Box::new(sources::IpApi::new(client.clone()))),
        Provider::free("ipwhois", 40, Box::new(sources::IpWhois::new(client.clone()))),
        Provider::free(
            "freeipapi",
            55,
            Box::new(sources::FreeIpApi::new(client.clone())),
        ),
        Provider::free(
            "ipapi-co",
            25,
            Box::new(sources::IpApiCo::new(client.clone())),
        ),
        Provider::keyed(
            "ipdata",
            cfg.ipdata_api_key
                .as_ref()
                .map(|key| Box::new(sources::IpData::new(client.clone(), key.clone())) as Box<dyn Query>),
        ),
        Provider::keyed(
            "ipinfo",
            cfg.ipinfo_token
                .as_ref()
                .map(|token| Box::new(sources::IpInfoIo::new(client, token.clone())) as Box<dyn Query>),
        ),
    ];

    if !cfg.enabled_providers.is_empty() {
        providers = reorder(providers, &cfg.enabled_providers);
    }

    info!(count = providers.len(), "initialized provider chain");
    for p in &providers {
        let state = if p.needs_key && !p.has_key { "no key" } else { "ready" };
        info!(provider = p.name, rate_limit = p.rate_limit, state, "provider registered");
    }

    Ok(providers)
}

/// Re-sort the chain by a preferred-name ordering. Named providers move
/// to the front in the given order; the remainder keep their original
/// relative order. Unknown names are ignored.
pub fn reorder(mut providers: Vec<Provider>, preferred: &[String]) -> Vec<Provider> {
    let mut front = Vec::with_capacity(providers.len());
    for name in preferred {
        if let Some(pos) = providers.iter().position(|p| p.name == name.as_str()) {
            front.push(providers.remove(pos));
        }
    }
    front.extend(providers);
    front
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopQuery;

    #[async_trait]
    impl Query for NoopQuery {
        async fn query(&self, ip: IpAddr) -> Result<IpInfo, ProviderError> {
            Ok(IpInfo::none(&ip.to_string()))
        }
    }

    fn metered(name: &'static str, limit: u32) -> Provider {
        Provider::free(name, limit, Box::new(NoopQuery))
    }

    #[test]
    fn test_parse_asn() {
        assert_eq!(parse_asn("AS16509 Amazon.com, Inc."), 16509);
        assert_eq!(parse_asn("as3356"), 3356);
        assert_eq!(parse_asn("16509"), 16509);
        assert_eq!(parse_asn(""), 0);
        assert_eq!(parse_asn("ASxyz"), 0);
        assert_eq!(parse_asn("AS"), 0);
        assert_eq!(parse_asn("no digits here"), 0);
    }

    #[test]
    fn test_rate_limit_ceiling() {
        let p = metered("test", 3);
        for used in 0..3 {
            assert_eq!(p.used_last_minute(), used);
            assert!(p.is_available());
            p.record_call();
        }
        // Fourth call within the window is refused.
        assert!(!p.is_available());
        assert_eq!(p.used_last_minute(), 3);
    }

    #[test]
    fn test_rate_limit_window_rollover() {
        let p = metered("test", 1);
        p.record_call();
        assert!(!p.is_available());

        // Backdate the recorded call past the window edge.
        {
            let mut calls = p.calls.lock().expect("mutex poisoned");
            let old = Instant::now()
                .checked_sub(RATE_WINDOW + Duration::from_secs(1))
                .expect("instant underflow");
            calls.clear();
            calls.push(old);
        }
        assert!(p.is_available());
        assert_eq!(p.used_last_minute(), 0);
    }

    #[test]
    fn test_keyed_stub_never_available() {
        let p = Provider::keyed("ipdata", None);
        assert!(!p.is_available());
        let status = p.status();
        assert!(status.needs_key);
        assert!(!status.has_key);
        assert_eq!(status.rate_limit, 0);
    }

    #[test]
    fn test_keyed_with_key_is_unmetered() {
        let p = Provider::keyed("ipinfo", Some(Box::new(NoopQuery)));
        assert!(p.is_available());
        for _ in 0..100 {
            p.record_call();
        }
        // No numeric ceiling; availability equals key possession.
        assert!(p.is_available());
    }

    #[tokio::test]
    async fn test_stub_query_fails() {
        let p = Provider::keyed("ipdata", None);
        let err = p.query("1.2.3.4".parse().expect("ip")).await.expect_err("stub");
        assert!(matches!(err, ProviderError::NoKey));
    }

    #[test]
    fn test_reorder_moves_named_to_front() {
        let chain = vec![metered("a", 1), metered("b", 1), metered("c", 1), metered("d", 1)];
        let preferred = vec!["c".to_string(), "a".to_string(), "zz".to_string()];
        let chain = reorder(chain, &preferred);
        let names: Vec<_> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["c", "a", "b", "d"]);
    }

    #[test]
    fn test_reorder_empty_preference_is_identity() {
        let chain = vec![metered("a", 1), metered("b", 1)];
        let chain = reorder(chain, &[]);
        let names: Vec<_> = chain.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
