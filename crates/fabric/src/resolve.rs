//! Forward/reverse name resolution and the system nameserver list.

use crate::error::FabricError;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, warn};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::system_conf::read_system_conf;
use trust_dns_resolver::TokioAsyncResolver;

/// Nameserver used when the system configuration lists none.
pub const FALLBACK_NAMESERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Clone)]
pub struct Resolver {
    inner: TokioAsyncResolver,
}

impl Resolver {
    /// Resolver over the system configuration, or Google's public servers
    /// when that cannot be read.
    #[must_use]
    pub fn from_system() -> Self {
        let (config, mut opts) = read_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "system resolver configuration unavailable, using public resolvers");
            (ResolverConfig::google(), ResolverOpts::default())
        });
        opts.timeout = LOOKUP_TIMEOUT;
        opts.attempts = 1;
        Self {
            inner: TokioAsyncResolver::tokio(config, opts),
        }
    }

    /// IP literals are returned unchanged; names resolve to their first
    /// address, IPv4 preferred.
    pub async fn resolve_forward(&self, name: &str) -> Result<IpAddr, FabricError> {
        let name = name.trim();
        if let Ok(ip) = name.parse::<IpAddr>() {
            return Ok(ip);
        }
        let lookup = self
            .inner
            .lookup_ip(name.trim_end_matches('.'))
            .await
            .map_err(|e| {
                debug!(name, error = %e, "forward lookup failed");
                FabricError::Resolution(name.to_string())
            })?;
        let mut first = None;
        for ip in lookup.iter() {
            if ip.is_ipv4() {
                return Ok(ip);
            }
            first.get_or_insert(ip);
        }
        first.ok_or_else(|| FabricError::Resolution(name.to_string()))
    }

    /// Forward resolution restricted to IPv4 destinations.
    pub async fn resolve_ipv4(&self, name: &str) -> Result<Ipv4Addr, FabricError> {
        match self.resolve_forward(name).await? {
            IpAddr::V4(ip) => Ok(ip),
            IpAddr::V6(ip) => Err(FabricError::Unsupported(format!(
                "Destination '{name}' resolved to IPv6 address {ip}; only IPv4 is supported."
            ))),
        }
    }

    /// PTR name for `ip` without the trailing dot, `None` when there is none.
    pub async fn resolve_reverse(&self, ip: IpAddr) -> Option<String> {
        match self.inner.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|ptr| ptr.to_string().trim_end_matches('.').to_string()),
            Err(e) => {
                debug!(%ip, error = %e, "reverse lookup failed");
                None
            }
        }
    }
}

/// Nameservers from the system configuration, in order and deduplicated,
/// falling back to [`FALLBACK_NAMESERVER`].
#[must_use]
pub fn system_nameservers() -> Vec<IpAddr> {
    let mut servers = Vec::new();
    if let Ok((config, _)) = read_system_conf() {
        for ns in config.name_servers() {
            let ip = ns.socket_addr.ip();
            if !servers.contains(&ip) {
                servers.push(ip);
            }
        }
    }
    if servers.is_empty() {
        servers.push(FALLBACK_NAMESERVER);
    }
    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_addresses_pass_through() {
        let resolver = Resolver::from_system();
        assert_eq!(
            resolver.resolve_forward("192.0.2.7").await.unwrap(),
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7))
        );
        assert_eq!(
            resolver.resolve_ipv4(" 10.1.2.3 ").await.unwrap(),
            Ipv4Addr::new(10, 1, 2, 3)
        );
    }

    #[tokio::test]
    async fn ipv6_literal_rejected_for_ipv4_probes() {
        let resolver = Resolver::from_system();
        let err = resolver.resolve_ipv4("::1").await.unwrap_err();
        assert!(matches!(err, FabricError::Unsupported(_)));
    }

    #[tokio::test]
    async fn unresolvable_name_is_resolution_error() {
        let resolver = Resolver::from_system();
        let err = resolver.resolve_forward("no-such-host.invalid").await.unwrap_err();
        assert_eq!(err.to_string(), "Unable to resolve host 'no-such-host.invalid'.");
    }

    #[test]
    fn nameserver_list_is_never_empty() {
        let servers = system_nameservers();
        assert!(!servers.is_empty());
        let mut deduped = servers.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), servers.len());
    }
}
