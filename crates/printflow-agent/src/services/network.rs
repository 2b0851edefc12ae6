// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local host identity: hostname, LAN addresses, and the URLs the operator
// opens once to trust the certificate.

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

use tracing::debug;

/// Any routable address works; no packet is sent by `connect` on UDP.
const ROUTE_PROBE: (Ipv4Addr, u16) = (Ipv4Addr::new(8, 8, 8, 8), 80);

/// Machine hostname as the OS reports it, falling back to `localhost`.
pub fn hostname() -> String {
    let name = gethostname::gethostname();
    let name = name.to_string_lossy();
    let name = name.trim();
    if name.is_empty() {
        "localhost".into()
    } else {
        name.to_string()
    }
}

/// Non-loopback IPv4 addresses of this machine.
///
/// Combines the source address of the default route with whatever the
/// hostname resolves to.  Either source may come up empty offline.
pub fn local_addresses(hostname: &str) -> Vec<IpAddr> {
    let mut addresses = Vec::new();

    if let Some(ip) = default_route_address() {
        addresses.push(ip);
    }
    match (hostname, 0).to_socket_addrs() {
        Ok(resolved) => {
            for addr in resolved {
                addresses.push(addr.ip());
            }
        }
        Err(e) => debug!(hostname, error = %e, "hostname does not resolve"),
    }

    let mut unique = Vec::new();
    for ip in addresses {
        if ip.is_ipv4() && !ip.is_loopback() && !ip.is_unspecified() && !unique.contains(&ip) {
            unique.push(ip);
        }
    }
    unique
}

fn default_route_address() -> Option<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_PROBE).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip())
}

/// `https://localhost:<port>` followed by one URL per address.
pub fn trust_urls(port: u16, addresses: &[IpAddr]) -> Vec<String> {
    std::iter::once(format!("https://localhost:{port}"))
        .chain(addresses.iter().map(|ip| format!("https://{ip}:{port}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_urls_start_with_localhost() {
        let urls = trust_urls(5000, &["192.168.1.20".parse().expect("ip")]);
        assert_eq!(
            urls,
            vec!["https://localhost:5000", "https://192.168.1.20:5000"]
        );
    }

    #[test]
    fn local_addresses_exclude_loopback() {
        for ip in local_addresses("localhost") {
            assert!(!ip.is_loopback());
            assert!(ip.is_ipv4());
        }
    }

    #[test]
    fn hostname_comes_from_the_os_not_the_environment() {
        let name = hostname();
        assert!(!name.is_empty());
        let os = gethostname::gethostname();
        let os = os.to_string_lossy();
        if !os.trim().is_empty() {
            assert_eq!(name, os.trim());
        }
    }
}
