//! Lookup orchestration
//!
//! [`LookupService`] composes the tiers into one resolution algorithm:
//! memory cache, then the offline database (with the datacenter
//! registry), then the persistent cache, then the external provider
//! chain, merging partial results along the way. `lookup` is total: it
//! always returns a result, down to a minimal `source = "none"`
//! placeholder when every tier is exhausted.

use crate::cache::{ResultCache, SWEEP_INTERVAL};
use crate::config::Config;
use crate::datacenter;
use crate::offline::{AsnResolver, MmdbResolver};
use crate::providers::{self, Provider};
use crate::store::{self, Store, CLEANUP_INTERVAL};
use crate::types::{IpInfo, ServiceStats};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The IP intelligence lookup service.
pub struct LookupService {
    cache: Arc<ResultCache>,
    offline: Option<Box<dyn AsnResolver>>,
    providers: Vec<Provider>,
    store: Option<Arc<dyn Store>>,
    tasks: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl LookupService {
    /// Build the service from configuration.
    ///
    /// A missing offline database or an unreachable persistent backend
    /// disables the respective tier with a warning; neither is fatal.
    pub async fn new(cfg: &Config) -> anyhow::Result<Self> {
        let providers = providers::build_chain(cfg)?;
        let offline = MmdbResolver::open(&cfg.mmdb_path)
            .map(|r| Box::new(r) as Box<dyn AsnResolver>);

        let store = if cfg.persistent_cache {
            match store::open(
                cfg.persistent_cache_type,
                &cfg.persistent_cache_dsn,
                cfg.persistent_cache_ttl,
            )
            .await
            {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(error = %e, "failed to open persistent cache, tier disabled");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self::with_parts(
            ResultCache::new(cfg.cache_ttl),
            offline,
            providers,
            store,
        ))
    }

    /// Assemble a service from already-built tiers and start the
    /// background sweep/cleanup tasks. Must be called within a Tokio
    /// runtime.
    pub fn with_parts(
        cache: ResultCache,
        offline: Option<Box<dyn AsnResolver>>,
        providers: Vec<Provider>,
        store: Option<Arc<dyn Store>>,
    ) -> Self {
        let cache = Arc::new(cache);
        let shutdown_token = CancellationToken::new();

        let mut tasks = vec![ResultCache::spawn_sweeper(
            cache.clone(),
            SWEEP_INTERVAL,
            shutdown_token.clone(),
        )];
        if let Some(store) = &store {
            tasks.push(store::spawn_cleanup(
                store.clone(),
                CLEANUP_INTERVAL,
                shutdown_token.clone(),
            ));
        }

        Self {
            cache,
            offline,
            providers,
            store,
            tasks,
            shutdown_token,
        }
    }

    /// Resolve an IP to intelligence attributes.
    ///
    /// Tiers are consulted in priority order, short-circuiting on the
    /// first confident answer. Never fails; the worst case is a
    /// placeholder with `source = "none"`, which is cached like any
    /// other result so a consistently failing IP does not hammer the
    /// chain (the flip side: a transient all-providers-down event
    /// pollutes the cache with empty results for one TTL).
    pub async fn lookup(&self, ip: IpAddr) -> IpInfo {
        let key = ip.to_string();

        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        if let Some(resolver) = &self.offline {
            if let Ok(record) = resolver.lookup(ip) {
                let mut local = IpInfo {
                    ip: key.clone(),
                    asn: record.asn,
                    asn_org: record.org.clone(),
                    isp: record.org,
                    source: "local".to_string(),
                    ..IpInfo::default()
                };

                if let Some(org) = datacenter::known_datacenter(record.asn) {
                    // Definitively a datacenter address; the external
                    // chain is never consulted on this path.
                    local.is_datacenter = true;
                    local.asn_org = org.to_string();
                    debug!(ip = %key, asn = record.asn, org, "datacenter match from offline database");
                    self.cache.set(&key, local.clone());
                    return local;
                }

                // The local answer cannot rule out proxy/VPN/Tor; try
                // the cheaper persistent tier before paying for an
                // external call.
                if let Some(stored) = self.store_get(&key).await {
                    let merged = backfill_asn(stored, &local);
                    self.cache.set(&key, merged.clone());
                    return merged;
                }

                if let Some(enriched) = self.query_providers(ip).await {
                    // Provider flags win; a missing provider ASN is
                    // backfilled from the offline resolution.
                    let mut merged = enriched;
                    if merged.asn == 0 {
                        merged.asn = local.asn;
                        merged.asn_org = local.asn_org.clone();
                    }
                    self.cache.set(&key, merged.clone());
                    self.persist(&key, &merged).await;
                    return merged;
                }

                // Chain exhausted; the partial local result beats nothing.
                self.cache.set(&key, local.clone());
                return local;
            }
        }

        // No offline resolution: persistent cache, then the chain.
        if let Some(mut stored) = self.store_get(&key).await {
            stored.cached = true;
            self.cache.set(&key, stored.clone());
            return stored;
        }

        if let Some(mut info) = self.query_providers(ip).await {
            if datacenter::known_datacenter(info.asn).is_some() {
                info.is_datacenter = true;
            }
            self.cache.set(&key, info.clone());
            self.persist(&key, &info).await;
            return info;
        }

        let fallback = IpInfo::none(&key);
        self.cache.set(&key, fallback.clone());
        fallback
    }

    /// Try each provider in order until one succeeds. Unavailable
    /// providers are skipped without consuming a call slot; failures are
    /// logged and the chain advances. `None` means exhausted, which is a
    /// valid outcome rather than an error.
    async fn query_providers(&self, ip: IpAddr) -> Option<IpInfo> {
        for provider in &self.providers {
            if !provider.is_available() {
                continue;
            }

            provider.record_call();
            match provider.query(ip).await {
                Ok(info) => {
                    debug!(
                        ip = %ip,
                        provider = provider.name(),
                        datacenter = info.is_datacenter,
                        proxy = info.is_proxy,
                        vpn = info.is_vpn,
                        "provider answered"
                    );
                    return Some(info);
                }
                Err(e) => {
                    warn!(ip = %ip, provider = provider.name(), error = %e, "provider query failed");
                }
            }
        }

        debug!(ip = %ip, "all providers exhausted");
        None
    }

    async fn store_get(&self, key: &str) -> Option<IpInfo> {
        match &self.store {
            Some(store) => {
                let stored = store.get(key).await?;
                debug!(ip = key, source = %stored.source, "persistent cache hit");
                Some(stored)
            }
            None => None,
        }
    }

    async fn persist(&self, key: &str, info: &IpInfo) {
        if let Some(store) = &self.store {
            store.set(key, info).await;
        }
    }

    /// Snapshot of service state.
    pub async fn stats(&self) -> ServiceStats {
        let mut stats = ServiceStats {
            cache_size: self.cache.size(),
            cache_ttl: format!("{:?}", self.cache.ttl()),
            persistent_cache_enabled: self.store.is_some(),
            persistent_cache_size: None,
            providers: self.providers.iter().map(Provider::status).collect(),
            offline_db_loaded: self.offline.is_some(),
            known_datacenter_asns: datacenter::known_asn_count(),
        };
        if let Some(store) = &self.store {
            stats.persistent_cache_size = Some(store.size().await);
        }
        stats
    }

    /// Shut down in order: stop and join the background tasks, then
    /// close the persistent backend. Consumes the service, so it can
    /// only run once.
    pub async fn shutdown(mut self) {
        self.shutdown_token.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        if let Some(store) = self.store.take() {
            store.close().await;
        }
    }
}

/// Merge a persistent-cache hit with a fresh offline resolution: the
/// stored flags stand, missing ASN/org fields are filled in from the
/// local record, and the result reads as cached.
fn backfill_asn(mut stored: IpInfo, local: &IpInfo) -> IpInfo {
    if stored.asn == 0 {
        stored.asn = local.asn;
        stored.asn_org = local.asn_org.clone();
    }
    stored.cached = true;
    stored
}
