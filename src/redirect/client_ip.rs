//! Client IP extraction from proxy headers with trust validation
//!
//! - `none`: the socket address, headers ignored
//! - `cloudflare`: `CF-Connecting-IP`
//! - `standard`: RFC 7239 `Forwarded`, then `X-Forwarded-For`, walked from
//!   the right and skipping hops that are trusted proxies

use axum::http::HeaderMap;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{ClientIpConfig, TrustedProxyMode};

pub fn extract_client_ip(headers: &HeaderMap, socket_addr: IpAddr, config: &ClientIpConfig) -> IpAddr {
    match config.trusted_proxy_mode {
        TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
            warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
            socket_addr
        }),
        TrustedProxyMode::Standard => {
            let chain = forwarded_chain(headers);
            if chain.is_empty() {
                socket_addr
            } else {
                pick_from_chain(&chain, socket_addr, config)
            }
        }
        TrustedProxyMode::None => socket_addr,
    }
}

fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Hop addresses, client first. `Forwarded` wins over `X-Forwarded-For`.
fn forwarded_chain(headers: &HeaderMap) -> Vec<IpAddr> {
    let from_forwarded: Vec<IpAddr> = headers
        .get_all("forwarded")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .filter_map(|element| {
            element.split(';').find_map(|param| {
                let (key, value) = param.trim().split_once('=')?;
                key.eq_ignore_ascii_case("for").then(|| parse_forwarded_for(value))?
            })
        })
        .collect();
    if !from_forwarded.is_empty() {
        return from_forwarded;
    }

    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(','))
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect()
}

/// `for=192.0.2.60`, `for="[2001:db8::1]:4711"`, `for="198.51.100.17:80"`
fn parse_forwarded_for(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }
    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    // IPv4 with port
    value.rsplit_once(':')?.0.parse().ok()
}

fn is_trusted(ip: IpAddr, config: &ClientIpConfig) -> bool {
    config.trusted_proxies.iter().any(|net| net.contains(&ip))
}

fn pick_from_chain(chain: &[IpAddr], socket_addr: IpAddr, config: &ClientIpConfig) -> IpAddr {
    if let Some(num_trusted) = config.num_trusted_proxies {
        // The last `num_trusted` entries were appended by our own proxies
        return if chain.len() > num_trusted {
            chain[chain.len() - num_trusted - 1]
        } else {
            chain[0]
        };
    }

    if !config.trusted_proxies.is_empty() {
        // Headers are only believed when they came through a trusted proxy
        if !is_trusted(socket_addr, config) {
            return socket_addr;
        }
        return chain
            .iter()
            .rev()
            .copied()
            .find(|ip| !is_trusted(*ip, config))
            .unwrap_or(chain[0]);
    }

    chain[chain.len() - 1]
}
