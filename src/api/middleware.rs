//! Security middleware for the registry API
//!
//! - Client IP resolution (socket peer; proxy headers only from trusted proxies)
//! - Rate limiting per IP
//! - Request body size limits
//! - Security headers
//! - Request logging with masked client addresses

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::config::sanitize_for_logging;

#[derive(Debug, Clone)]
pub struct SecurityMiddlewareConfig {
    /// Requests per minute per IP
    pub rate_limit_per_minute: u32,
    /// Maximum request body size in bytes
    pub max_request_size: usize,
    pub log_requests: bool,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed
    pub trusted_proxies: Vec<IpAddr>,
}

impl Default for SecurityMiddlewareConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_minute: 60,
            max_request_size: 64 * 1024,
            log_requests: true,
            trusted_proxies: Vec::new(),
        }
    }
}

/// Fixed-window request counter per IP
#[derive(Debug)]
pub struct RateLimiter {
    /// IP -> (request count, window start)
    requests: DashMap<String, (u32, Instant)>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        Self {
            requests: DashMap::new(),
            limit: requests_per_minute,
            window: Duration::from_secs(60),
        }
    }

    /// Returns (allowed, remaining, reset_after_secs)
    pub fn check_request(&self, ip: &str) -> (bool, u32, u64) {
        let now = Instant::now();

        let mut entry = self.requests.entry(ip.to_string()).or_insert((0, now));
        let (count, window_start) = entry.value_mut();

        if now.duration_since(*window_start) >= self.window {
            *count = 0;
            *window_start = now;
        }

        let remaining = self.limit.saturating_sub(*count);
        let reset_after = self
            .window
            .checked_sub(now.duration_since(*window_start))
            .map(|d| d.as_secs())
            .unwrap_or(0);

        if *count >= self.limit {
            return (false, 0, reset_after);
        }

        *count += 1;
        (true, remaining.saturating_sub(1), reset_after)
    }

    /// Drop windows that expired long ago
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.requests
            .retain(|_, (_, window_start)| now.duration_since(*window_start) < self.window * 2);
    }

    pub fn tracked_clients(&self) -> usize {
        self.requests.len()
    }
}

#[derive(Clone)]
pub struct SecurityState {
    pub config: SecurityMiddlewareConfig,
    pub rate_limiter: Arc<RateLimiter>,
}

impl SecurityState {
    pub fn new(config: SecurityMiddlewareConfig) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit_per_minute));
        Self {
            config,
            rate_limiter,
        }
    }
}

/// Resolved caller address, inserted by [`client_ip_middleware`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn as_key(&self) -> &str {
        self.0.as_deref().unwrap_or("unknown")
    }
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Resolve the caller address
///
/// The socket peer is authoritative. Proxy headers are read only when the
/// peer is a trusted proxy; `X-Forwarded-For` is walked from the right and
/// the first hop that is not itself a trusted proxy is the client.
pub fn get_client_ip(
    headers: &HeaderMap,
    addr: Option<&SocketAddr>,
    trusted_proxies: &[IpAddr],
) -> Option<String> {
    let peer = addr?.ip();
    if !trusted_proxies.contains(&peer) {
        return Some(peer.to_string());
    }

    if let Some(forwarded) = headers.get("x-forwarded-for")
        && let Ok(value) = forwarded.to_str()
    {
        let hops: Option<Vec<IpAddr>> = value.split(',').map(parse_ip).collect();
        if let Some(hops) = hops
            && let Some(client) = hops.iter().rev().find(|ip| !trusted_proxies.contains(*ip))
        {
            return Some(client.to_string());
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip")
        && let Ok(value) = real_ip.to_str()
        && let Some(ip) = parse_ip(value)
    {
        return Some(ip.to_string());
    }

    Some(peer.to_string())
}

/// Resolve the caller address once for every later layer and handler
pub async fn client_ip_middleware(
    State(state): State<SecurityState>,
    mut request: Request,
    next: Next,
) -> Response {
    let addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let ip = get_client_ip(
        request.headers(),
        addr.as_ref(),
        &state.config.trusted_proxies,
    );
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

fn client_key(request: &Request) -> String {
    request
        .extensions()
        .get::<ClientIp>()
        .map(|ip| ip.as_key().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Result<Response, Response> {
    let client_ip = client_key(&request);
    let (allowed, remaining, reset_after) = state.rate_limiter.check_request(&client_ip);

    if !allowed {
        warn!(
            client_ip = %sanitize_for_logging(&client_ip),
            path = %request.uri().path(),
            "Rate limit exceeded"
        );

        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from(state.config.rate_limit_per_minute),
        );
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));
        headers.insert("Retry-After", HeaderValue::from(reset_after));

        return Err(response);
    }

    let mut response = next.run(request).await;

    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Limit",
        HeaderValue::from(state.config.rate_limit_per_minute),
    );
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(reset_after));

    Ok(response)
}

pub async fn security_headers_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    // Responses carry live provider state
    headers.insert(
        "Cache-Control",
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    headers.remove("Server");

    response
}

pub async fn logging_middleware(
    State(state): State<SecurityState>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.log_requests {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let log_ip = sanitize_for_logging(&client_key(&request));

    let response = next.run(request).await;
    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Request failed"
        );
    } else if status.is_client_error() {
        warn!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Client error"
        );
    } else {
        info!(
            method = %method,
            path = %path,
            status = %status.as_u16(),
            duration_ms = %duration.as_millis(),
            client_ip = %log_ip,
            "Request completed"
        );
    }

    response
}

/// Reject bodies whose declared length exceeds the limit
pub async fn body_size_middleware(
    State(state): State<SecurityState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(content_length) = headers.get("content-length")
        && let Ok(length_str) = content_length.to_str()
        && let Ok(length) = length_str.parse::<usize>()
        && length > state.config.max_request_size
    {
        warn!(
            "Request body too large: {} bytes (max: {})",
            length, state.config.max_request_size
        );
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter() {
        let limiter = RateLimiter::new(3);

        assert!(limiter.check_request("127.0.0.1").0);
        assert!(limiter.check_request("127.0.0.1").0);
        assert!(limiter.check_request("127.0.0.1").0);

        let (allowed, remaining, _) = limiter.check_request("127.0.0.1");
        assert!(!allowed);
        assert_eq!(remaining, 0);

        // Separate budget per IP
        assert!(limiter.check_request("192.168.1.1").0);
        assert_eq!(limiter.tracked_clients(), 2);
    }

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(value));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.9"));
        headers
    }

    #[test]
    fn test_untrusted_peer_cannot_set_its_address() {
        let addr: SocketAddr = "203.0.113.7:4000".parse().unwrap();
        let resolved: Vec<Option<String>> = ["10.9.9.0", "10.9.9.1", "10.9.9.2"]
            .into_iter()
            .map(|spoofed| get_client_ip(&forwarded(spoofed), Some(&addr), &[]))
            .collect();

        assert!(
            resolved
                .iter()
                .all(|ip| ip.as_deref() == Some("203.0.113.7"))
        );
    }

    #[test]
    fn test_trusted_proxy_forwards_client_address() {
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();
        let addr = SocketAddr::new(proxy, 4000);
        let headers = forwarded("198.51.100.4, 10.0.0.2");

        assert_eq!(
            get_client_ip(&headers, Some(&addr), &[proxy]).as_deref(),
            Some("198.51.100.4")
        );
    }

    #[test]
    fn test_trusted_proxy_with_garbage_header_falls_back() {
        let proxy: IpAddr = "10.0.0.2".parse().unwrap();
        let addr = SocketAddr::new(proxy, 4000);

        assert_eq!(
            get_client_ip(&forwarded("not-an-ip"), Some(&addr), &[proxy]).as_deref(),
            Some("10.0.0.9")
        );
        assert_eq!(
            get_client_ip(&HeaderMap::new(), Some(&addr), &[proxy]).as_deref(),
            Some("10.0.0.2")
        );
    }

    #[test]
    fn test_client_ip_without_socket_is_unknown() {
        assert_eq!(get_client_ip(&forwarded("10.0.0.1"), None, &[]), None);
    }
}
