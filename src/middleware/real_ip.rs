use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::{HeaderName, Request};

static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
static X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// How the client address is resolved for `remote_ip`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpExtractor {
    /// `X-Forwarded-For`, then `X-Real-IP`, then the socket address.
    #[default]
    ProxyHeaders,
    /// Socket address only; proxy headers are ignored.
    DirectAddr,
}

pub fn real_ip<B>(request: &Request<B>, extractor: IpExtractor) -> String {
    if extractor == IpExtractor::ProxyHeaders {
        if let Some(ip) = forwarded_for(request).or_else(|| header_ip(request, &X_REAL_IP)) {
            return ip;
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn forwarded_for<B>(request: &Request<B>) -> Option<String> {
    let value = header_ip(request, &X_FORWARDED_FOR)?;
    match value.split_once(',') {
        Some((first, _)) => Some(strip_brackets(first.trim()).to_string()),
        None => Some(value),
    }
}

fn header_ip<B>(request: &Request<B>, name: &HeaderName) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .map(|value| strip_brackets(value).to_string())
}

fn strip_brackets(ip: &str) -> &str {
    let ip = ip.strip_prefix('[').unwrap_or(ip);
    ip.strip_suffix(']').unwrap_or(ip)
}
