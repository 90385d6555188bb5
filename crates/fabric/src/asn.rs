//! Origin AS lookups for hop and ping addresses.

use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use tracing::warn;

/// Autonomous system lookup backed by a GeoLite2-ASN database.
///
/// Without a readable database every lookup yields `None`.
pub struct AsnDatabase {
    reader: Option<Reader<Vec<u8>>>,
}

impl AsnDatabase {
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match Reader::open_readfile(path) {
            Ok(reader) => Self { reader: Some(reader) },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ASN database unavailable, hops will carry no ASN");
                Self::disabled()
            }
        }
    }

    #[must_use]
    pub const fn disabled() -> Self {
        Self { reader: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.reader.is_some()
    }

    #[must_use]
    pub fn lookup(&self, ip: IpAddr) -> Option<u32> {
        let asn: geoip2::Asn = self.reader.as_ref()?.lookup(ip).ok()?;
        asn.autonomous_system_number
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_disables_lookup() {
        let db = AsnDatabase::open("/nonexistent/GeoLite2-ASN.mmdb");
        assert!(!db.is_enabled());
        assert_eq!(db.lookup("8.8.8.8".parse().unwrap()), None);
    }
}
