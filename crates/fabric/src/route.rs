//! Egress interface and local source address toward a destination.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::process::Command;
use tracing::debug;

/// Egress interface for `ip` according to `ip route get`, `None` when the
/// command fails or prints no device.
pub async fn route_interface(ip: IpAddr) -> Option<String> {
    let output = match Command::new("ip")
        .args(["route", "get", &ip.to_string()])
        .output()
        .await
    {
        Ok(output) if output.status.success() => output,
        Ok(output) => {
            debug!(%ip, status = %output.status, "route lookup failed");
            return None;
        }
        Err(e) => {
            debug!(%ip, error = %e, "route lookup unavailable");
            return None;
        }
    };
    parse_route_dev(&String::from_utf8_lossy(&output.stdout))
}

/// Token following `dev` in `ip route get` output.
#[must_use]
pub fn parse_route_dev(output: &str) -> Option<String> {
    let mut tokens = output.split_whitespace();
    while let Some(token) = tokens.next() {
        if token == "dev" {
            return tokens.next().map(str::to_string);
        }
    }
    None
}

/// Local IPv4 address the kernel would use to reach `dst`. Connecting a
/// UDP socket sends nothing.
pub async fn source_address(dst: Ipv4Addr) -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").await.ok()?;
    socket.connect((dst, 53)).await.ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) => Some(*addr.ip()),
        SocketAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_token() {
        let out = "8.8.8.8 via 192.168.1.1 dev wlp2s0 src 192.168.1.20 uid 1000 \n    cache \n";
        assert_eq!(parse_route_dev(out).as_deref(), Some("wlp2s0"));
        assert_eq!(parse_route_dev("local 127.0.0.1 dev lo table local src 127.0.0.1").as_deref(), Some("lo"));
        assert_eq!(parse_route_dev("RTNETLINK answers: Network is unreachable"), None);
        assert_eq!(parse_route_dev("trailing dev"), None);
    }

    #[tokio::test]
    async fn loopback_source_address() {
        assert_eq!(
            source_address(Ipv4Addr::LOCALHOST).await,
            Some(Ipv4Addr::LOCALHOST)
        );
    }
}
