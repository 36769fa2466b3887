//! ipintel - IP intelligence lookups with layered caching
//!
//! This library resolves an IP address to intelligence attributes
//! (datacenter/proxy/VPN/Tor flags, ASN, ISP, geolocation) by
//! consulting, in priority order: an in-memory cache, a local offline
//! ASN database, an optional persistent cache, and a chain of
//! rate-limited external providers, merging partial results across
//! tiers.

pub mod cache;
pub mod config;
pub mod datacenter;
pub mod offline;
pub mod providers;
pub mod service;
pub mod store;
pub mod types;

// Re-export core types for library users
pub use config::Config;
pub use service::LookupService;
pub use types::{IpInfo, ProviderStatus, ServiceStats};
