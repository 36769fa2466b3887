//! Offline ASN resolution backed by a local MMDB file
//!
//! The offline tier is strictly optional: a missing or unreadable
//! database degrades the service to provider-only lookups rather than
//! failing startup.

use std::net::IpAddr;
use std::path::Path;
use tracing::{info, warn};

/// ASN and organization for an address, as read from the offline database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnRecord {
    pub asn: u32,
    pub org: String,
}

/// Error from the offline resolver.
#[derive(Debug, thiserror::Error)]
pub enum OfflineError {
    /// The database holds no ASN for this address.
    #[error("address not present in offline database")]
    NotFound,

    /// The underlying reader failed.
    #[error("offline database read failed: {0}")]
    Db(String),
}

/// Capability of resolving an IP to its ASN without network access.
///
/// Implementations must be safe for unlimited parallel reads.
pub trait AsnResolver: Send + Sync {
    fn lookup(&self, ip: IpAddr) -> Result<AsnRecord, OfflineError>;
}

/// [`AsnResolver`] over a GeoLite2-ASN style MMDB file.
pub struct MmdbResolver {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl MmdbResolver {
    /// Open the database at `path`. Returns `None` when the file is
    /// missing or corrupt; callers then run without the offline tier.
    pub fn open(path: &Path) -> Option<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "MMDB file not found, offline lookup disabled");
            return None;
        }
        match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), "loaded offline ASN database");
                Some(Self { reader })
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open MMDB, offline lookup disabled");
                None
            }
        }
    }
}

impl AsnResolver for MmdbResolver {
    fn lookup(&self, ip: IpAddr) -> Result<AsnRecord, OfflineError> {
        let record: maxminddb::geoip2::Asn = self.reader.lookup(ip).map_err(|e| match e {
            maxminddb::MaxMindDBError::AddressNotFoundError(_) => OfflineError::NotFound,
            other => OfflineError::Db(other.to_string()),
        })?;

        let asn = record.autonomous_system_number.unwrap_or(0);
        if asn == 0 {
            return Err(OfflineError::NotFound);
        }
        Ok(AsnRecord {
            asn,
            org: record
                .autonomous_system_organization
                .unwrap_or_default()
                .to_string(),
        })
    }
}
