//! Address ranges that never belong to a company network

use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

static NON_ROUTABLE_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",          // "this" network
        "10.0.0.0/8",         // private
        "100.64.0.0/10",      // carrier-grade NAT
        "127.0.0.0/8",        // loopback
        "169.254.0.0/16",     // link-local
        "172.16.0.0/12",      // private
        "192.0.0.0/24",       // IETF protocol assignments
        "192.0.2.0/24",       // TEST-NET-1
        "192.88.99.0/24",     // 6to4 relay anycast
        "192.168.0.0/16",     // private
        "198.18.0.0/15",      // benchmarking
        "198.51.100.0/24",    // TEST-NET-2
        "203.0.113.0/24",     // TEST-NET-3
        "224.0.0.0/4",        // multicast
        "240.0.0.0/4",        // reserved, includes broadcast
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

static NON_ROUTABLE_V6: LazyLock<Vec<Ipv6Net>> = LazyLock::new(|| {
    [
        "::/128",        // unspecified
        "::1/128",       // loopback
        "100::/64",      // discard-only
        "2001:2::/48",   // benchmarking
        "2001:db8::/32", // documentation
        "fc00::/7",      // unique local
        "fe80::/10",     // link-local
        "fec0::/10",     // deprecated site-local
        "ff00::/8",      // multicast
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

fn is_non_routable_v4(ip: Ipv4Addr) -> bool {
    NON_ROUTABLE_V4.iter().any(|net| net.contains(&ip))
}

fn is_non_routable_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_non_routable_v4(v4);
    }
    NON_ROUTABLE_V6.iter().any(|net| net.contains(&ip))
}

/// True for private, loopback, reserved, link-local, CGNAT, multicast and
/// documentation addresses. IPv4-mapped IPv6 addresses are judged by their
/// IPv4 part.
pub fn is_non_routable(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_non_routable_v4(v4),
        IpAddr::V6(v6) => is_non_routable_v6(v6),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(ip: &str) -> bool {
        is_non_routable(ip.parse().unwrap())
    }

    #[test]
    fn test_all_ranges_parse() {
        assert_eq!(NON_ROUTABLE_V4.len(), 15);
        assert_eq!(NON_ROUTABLE_V6.len(), 9);
    }

    #[test]
    fn test_ipv4_special_ranges() {
        for ip in [
            "10.1.2.3",
            "172.31.255.255",
            "192.168.0.10",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.1",
            "100.127.255.254",
            "224.0.0.251",
            "255.255.255.255",
            "192.0.2.1",
            "198.51.100.7",
            "203.0.113.9",
            "0.0.0.0",
        ] {
            assert!(check(ip), "{ip} should be non-routable");
        }
    }

    #[test]
    fn test_ipv6_special_ranges() {
        for ip in ["::1", "::", "fe80::1", "fd12:3456::1", "ff02::1", "2001:db8::42"] {
            assert!(check(ip), "{ip} should be non-routable");
        }
    }

    #[test]
    fn test_ipv4_mapped_addresses_use_ipv4_rules() {
        assert!(check("::ffff:192.168.1.1"));
        assert!(check("::ffff:127.0.0.1"));
        assert!(!check("::ffff:8.8.8.8"));
    }

    #[test]
    fn test_public_addresses() {
        for ip in ["8.8.8.8", "1.1.1.1", "100.128.0.1", "172.32.0.1", "2606:4700::1111"] {
            assert!(!check(ip), "{ip} should be routable");
        }
    }
}
