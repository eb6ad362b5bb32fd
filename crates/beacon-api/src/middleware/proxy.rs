//! Client address resolution, honouring a fronting proxy when trusted.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use crate::state::AppState;

/// Who is on the other end of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    /// Client address, if known.
    pub ip: Option<IpAddr>,
    /// Whether the client reached us over TLS.
    pub secure: bool,
}

/// Attaches a [`ClientInfo`] extension to every request.
pub async fn resolve_client(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let direct_tls = request.uri().scheme_str() == Some("https");

    let info = client_info(
        request.headers(),
        peer,
        direct_tls,
        state.config.server.trust_proxy,
    );
    request.extensions_mut().insert(info);
    next.run(request).await
}

fn client_info(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    direct_tls: bool,
    trust_proxy: bool,
) -> ClientInfo {
    if !trust_proxy {
        return ClientInfo {
            ip: peer,
            secure: direct_tls,
        };
    }

    // Left-most entry is the original client.
    let forwarded_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|v| v.trim().parse::<IpAddr>().ok());
    let forwarded_tls = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or_default().trim().eq_ignore_ascii_case("https"));

    ClientInfo {
        ip: forwarded_ip.or(peer),
        secure: forwarded_tls.unwrap_or(direct_tls),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.2"));
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers
    }

    #[test]
    fn test_untrusted_proxy_headers_ignored() {
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let info = client_info(&forwarded(), Some(peer), false, false);
        assert_eq!(info.ip, Some(peer));
        assert!(!info.secure);
    }

    #[test]
    fn test_trusted_proxy_headers_used() {
        let peer: IpAddr = "10.0.0.2".parse().unwrap();
        let info = client_info(&forwarded(), Some(peer), false, true);
        assert_eq!(info.ip, Some("203.0.113.7".parse().unwrap()));
        assert!(info.secure);
    }

    #[test]
    fn test_trusted_proxy_falls_back_to_peer() {
        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        let info = client_info(&HeaderMap::new(), Some(peer), false, true);
        assert_eq!(info.ip, Some(peer));
        assert!(!info.secure);
    }
}
