//! Client IP extraction from HTTP headers with trust validation
//!
//! This module implements secure client IP extraction that:
//! - Validates trust chains for X-Forwarded-For and Forwarded headers
//! - Supports vendor-specific headers (e.g., CF-Connecting-IP)
//! - Falls back to socket remote address when headers are untrusted
//! - Handles both IPv4 and IPv6

use axum::http::HeaderMap;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::warn;

use crate::config::{AnalyticsConfig, TrustedProxyMode};

/// Resolves the visitor address for a request according to proxy trust settings
#[derive(Debug, Clone)]
pub struct ClientIpExtractor {
    mode: TrustedProxyMode,
    trusted_proxies: Vec<IpNet>,
    num_trusted_proxies: Option<usize>,
    anonymize: bool,
}

impl ClientIpExtractor {
    pub fn from_config(config: &AnalyticsConfig) -> Self {
        let trusted_proxies = config
            .trusted_proxies
            .iter()
            .filter_map(|raw| match parse_net(raw) {
                Some(net) => Some(net),
                None => {
                    warn!(entry = %raw, "ignoring invalid TRUSTED_PROXIES entry");
                    None
                }
            })
            .collect();

        Self {
            mode: config.trusted_proxy_mode.clone(),
            trusted_proxies,
            num_trusted_proxies: config.num_trusted_proxies,
            anonymize: config.ip_anonymization,
        }
    }

    /// Extract the client IP address, anonymized if configured
    pub fn extract(&self, headers: &HeaderMap, socket_addr: IpAddr) -> IpAddr {
        let client_ip = match self.mode {
            TrustedProxyMode::Cloudflare => extract_cloudflare_ip(headers).unwrap_or_else(|| {
                warn!("CF-Connecting-IP header missing in Cloudflare mode, using socket address");
                socket_addr
            }),
            TrustedProxyMode::Standard => {
                if !self.trusted_proxies.is_empty() && !self.is_trusted(socket_addr) {
                    // Direct connection from an untrusted peer; headers are forgeable
                    socket_addr
                } else {
                    self.extract_standard_ip(headers).unwrap_or(socket_addr)
                }
            }
            TrustedProxyMode::None => socket_addr,
        };

        if self.anonymize {
            anonymize_ip(client_ip)
        } else {
            client_ip
        }
    }

    fn is_trusted(&self, ip: IpAddr) -> bool {
        self.trusted_proxies.iter().any(|net| net.contains(&ip))
    }

    /// Extract IP from standard headers (Forwarded, X-Forwarded-For)
    fn extract_standard_ip(&self, headers: &HeaderMap) -> Option<IpAddr> {
        // Prefer RFC 7239 Forwarded header
        if let Some(chain) = forwarded_chain(headers) {
            return self.pick_from_chain(&chain);
        }

        let chain = x_forwarded_for_chain(headers)?;
        self.pick_from_chain(&chain)
    }

    /// Walk a proxy chain from the right, skipping trusted hops
    fn pick_from_chain(&self, chain: &[IpAddr]) -> Option<IpAddr> {
        if chain.is_empty() {
            return None;
        }

        // If num_trusted_proxies is specified, skip that many from the right
        if let Some(num_trusted) = self.num_trusted_proxies {
            if chain.len() > num_trusted {
                return Some(chain[chain.len() - num_trusted - 1]);
            }
            // Not enough IPs in chain, return the leftmost (least trusted)
            return chain.first().copied();
        }

        if !self.trusted_proxies.is_empty() {
            return chain
                .iter()
                .rev()
                .find(|ip| !self.is_trusted(**ip))
                .or_else(|| chain.first())
                .copied();
        }

        // No trust configuration, return the rightmost IP
        chain.last().copied()
    }
}

fn parse_net(raw: &str) -> Option<IpNet> {
    let raw = raw.trim();
    if let Ok(net) = raw.parse::<IpNet>() {
        return Some(net);
    }

    // Bare address: a single-host network
    let addr = raw.parse::<IpAddr>().ok()?;
    let prefix = if addr.is_ipv4() { 32 } else { 128 };
    IpNet::new(addr, prefix).ok()
}

/// Extract IP from Cloudflare-specific header
fn extract_cloudflare_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("cf-connecting-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
}

/// Parse the `for=` parameters of an RFC 7239 Forwarded header, in order
fn forwarded_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let forwarded = headers.get("forwarded")?.to_str().ok()?;

    let chain: Vec<IpAddr> = forwarded
        .split(',')
        .flat_map(|element| element.split(';'))
        .filter_map(|param| {
            let param = param.trim();
            let value = param
                .strip_prefix("for=")
                .or_else(|| param.strip_prefix("For="))?;
            parse_forwarded_node(value)
        })
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// `192.0.2.60`, `"192.0.2.60:4711"`, `"[2001:db8::1]:4711"`
fn parse_forwarded_node(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }

    // IPv4 with port
    value.split(':').next()?.parse().ok()
}

fn x_forwarded_for_chain(headers: &HeaderMap) -> Option<Vec<IpAddr>> {
    let xff = headers.get("x-forwarded-for")?.to_str().ok()?;

    let chain: Vec<IpAddr> = xff
        .split(',')
        .filter_map(|s| s.trim().parse::<IpAddr>().ok())
        .collect();

    (!chain.is_empty()).then_some(chain)
}

/// Anonymize an IP address by truncating to network prefix
///
/// - IPv4: Truncate to /24 (zero last octet)
/// - IPv6: Truncate to /48 (zero last 80 bits)
pub fn anonymize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(addr) => {
            let octets = addr.octets();
            IpAddr::V4(std::net::Ipv4Addr::new(octets[0], octets[1], octets[2], 0))
        }
        IpAddr::V6(addr) => {
            let segments = addr.segments();
            IpAddr::V6(std::net::Ipv6Addr::new(
                segments[0],
                segments[1],
                segments[2],
                0,
                0,
                0,
                0,
                0,
            ))
        }
    }
}
