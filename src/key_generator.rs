//! Client identity for rate limiting.
//!
//! Clients are keyed by network origin address only. Forwarding headers are
//! trivially forged, so they are honoured only when the service is known to
//! sit behind a proxy that sets them.

use axum::http::HeaderMap;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStrategy {
    /// Peer address of the TCP connection
    PeerAddress,
    /// First hop of X-Forwarded-For / X-Real-IP, falling back to the peer
    ProxyHeaders,
}

impl KeyStrategy {
    pub fn from_trust_proxy(trust_proxy_headers: bool) -> Self {
        if trust_proxy_headers {
            KeyStrategy::ProxyHeaders
        } else {
            KeyStrategy::PeerAddress
        }
    }

    pub fn client_key(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
        if *self == KeyStrategy::ProxyHeaders {
            if let Some(ip) = forwarded_ip(headers) {
                return ip;
            }
        }

        peer.map(|addr| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}
