//! Client IP resolution.
//!
//! Mirrors the usual reverse-proxy heuristic: the leftmost non-private
//! `X-Forwarded-For` entry wins, then `X-Real-IP`, then the socket peer.

use std::net::{IpAddr, SocketAddr};

use hyper::header::HeaderMap;
use ipnet::IpNet;
use once_cell::sync::Lazy;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

static PRIVATE_NETS: Lazy<Vec<IpNet>> = Lazy::new(|| {
    [
        "127.0.0.0/8",
        "10.0.0.0/8",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "169.254.0.0/16",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .map(|s| s.parse().expect("static CIDR table"))
    .collect()
});

fn is_private(ip: IpAddr) -> bool {
    PRIVATE_NETS.iter().any(|net| net.contains(&ip))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Resolve the client IP for a request.
///
/// When either forwarding header is present, `X-Forwarded-For` is scanned
/// left to right for the first non-private address, with `X-Real-IP` as the
/// fallback (private addresses are accepted there: a trusted edge sets it).
/// Without headers, or when neither yields an address, the socket peer is
/// used.
pub fn from_request(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
    let xff = header_str(headers, X_FORWARDED_FOR);
    let xri = header_str(headers, X_REAL_IP);

    if xff.is_some() || xri.is_some() {
        if let Some(xff) = xff {
            for entry in xff.split(',') {
                if let Ok(ip) = entry.trim().parse::<IpAddr>() {
                    if !is_private(ip) {
                        return Some(ip);
                    }
                }
            }
        }
        if let Some(ip) = xri.and_then(|v| v.trim().parse::<IpAddr>().ok()) {
            return Some(ip);
        }
    }

    peer.map(|addr| addr.ip())
}
