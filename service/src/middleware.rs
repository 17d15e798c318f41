use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::set_rate_limit_headers;
use crate::{ApiError, RsvpService};

/// Client address used as the rate-limit key.
///
/// Forwarding headers are only honored when the socket peer is one of
/// `trusted` proxies; otherwise a client could pick a fresh key per request.
/// From a trusted peer the order is:
/// 1. first hop of `X-Forwarded-For`
/// 2. `X-Real-IP`
/// 3. the peer itself
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trusted: &[IpAddr]) -> Option<IpAddr> {
    let peer = peer.map(|addr| addr.ip())?;
    if !trusted.contains(&peer) {
        return Some(peer);
    }

    let forwarded: Option<IpAddr> = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    };

    forwarded.or_else(real_ip).or(Some(peer))
}

pub async fn rate_limit(State(state): State<RsvpService>, request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let key = client_ip(request.headers(), peer, &state.trusted_proxies).map(|ip| ip.to_string());

    let decision = state
        .limiter
        .check(key.as_deref(), &state.rate_limit)
        .await;
    match decision.into_result() {
        Ok(decision) => {
            let mut response = next.run(request).await;
            set_rate_limit_headers(response.headers_mut(), decision.limit, decision.remaining);
            response
        }
        Err(e) => ApiError(e).into_response(),
    }
}
