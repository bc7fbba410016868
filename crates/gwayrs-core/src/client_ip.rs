use std::net::IpAddr;

use http::HeaderMap;
use ipnet::IpNet;

/// Resolve the client IP for the RPM/IP-lock gates. Prefers the first hop of
/// `X-Forwarded-For`, then `X-Real-IP`, then the socket peer address —
/// forwarded headers are only honored when the peer is one of the configured
/// trusted proxies (or no trusted-proxy list is configured at all).
pub fn resolve_client_ip(headers: &HeaderMap, peer: IpAddr, trusted_proxies: &[IpNet]) -> IpAddr {
    let trust_forwarded = trusted_proxies.is_empty() || trusted_proxies.iter().any(|net| net.contains(&peer));

    if trust_forwarded {
        if let Some(ip) = first_hop(headers, "x-forwarded-for") {
            return ip;
        }
        if let Some(ip) = single_value(headers, "x-real-ip") {
            return ip;
        }
    }

    peer
}

fn first_hop(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    let value = headers.get(name)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    first.parse().ok()
}

fn single_value(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn prefers_forwarded_for_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4, 5.6.7.8"));
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(resolve_client_ip(&headers, peer, &[]), "1.2.3.4".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn falls_back_to_peer_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("1.2.3.4"));
        let peer: IpAddr = "9.9.9.9".parse().unwrap();
        let trusted: Vec<IpNet> = vec!["10.0.0.0/8".parse().unwrap()];
        assert_eq!(resolve_client_ip(&headers, peer, &trusted), peer);
    }

    #[test]
    fn rejects_malformed_address_and_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        headers.insert("x-real-ip", HeaderValue::from_static("5.5.5.5"));
        let peer: IpAddr = "127.0.0.1".parse().unwrap();
        assert_eq!(resolve_client_ip(&headers, peer, &[]), "5.5.5.5".parse::<IpAddr>().unwrap());
    }
}
