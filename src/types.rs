//! Core data model for IP intelligence lookups

use serde::{Deserialize, Serialize};

/// Result of an IP intelligence lookup.
///
/// A lookup always produces one of these; how much of it is filled in
/// depends on which tier answered. `source` names that tier: `"local"`
/// for the offline database, a provider name for the external chain,
/// or `"none"` when every tier came up empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpInfo {
    /// The address that was looked up.
    pub ip: String,
    /// Whether the address belongs to known hosting/cloud infrastructure.
    pub is_datacenter: bool,
    /// Whether the address is a known proxy or anonymizer.
    pub is_proxy: bool,
    /// Whether the address is a known VPN endpoint.
    pub is_vpn: bool,
    /// Whether the address is a Tor exit node.
    pub is_tor: bool,
    /// Autonomous System Number, 0 when unknown.
    pub asn: u32,
    /// Organization operating the ASN. Empty whenever `asn` is 0.
    pub asn_org: String,
    /// ISP name as reported by the answering tier.
    pub isp: String,
    /// Country name.
    pub country: String,
    /// ISO country code.
    pub country_code: String,
    /// City name.
    pub city: String,
    /// Which tier produced this result.
    pub source: String,
    /// Set only by the cache tiers on read, never by producers.
    pub cached: bool,
}

impl IpInfo {
    /// Minimal placeholder returned when every tier is exhausted.
    pub fn none(ip: &str) -> Self {
        Self {
            ip: ip.to_string(),
            source: "none".to_string(),
            ..Self::default()
        }
    }
}

/// Status of one external provider, as reported by [`crate::service::LookupService::stats`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub available: bool,
    #[serde(rename = "rate_limit_per_min")]
    pub rate_limit: u32,
    pub used_last_min: u32,
    pub needs_key: bool,
    pub has_key: bool,
}

/// Snapshot of service state. No side effects to produce one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStats {
    pub cache_size: usize,
    pub cache_ttl: String,
    pub persistent_cache_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_cache_size: Option<u64>,
    pub providers: Vec<ProviderStatus>,
    #[serde(rename = "local_db_loaded")]
    pub offline_db_loaded: bool,
    pub known_datacenter_asns: usize,
}
