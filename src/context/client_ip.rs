//! Client IP resolution from proxy headers and the socket peer address.

use std::net::{IpAddr, SocketAddr};

use crate::Request;

// Consulted after `x-forwarded-for`, in order.
const CDN_HEADERS: [&str; 5] = [
    "cf-connecting-ip",
    "fastly-client-ip",
    "true-client-ip",
    "x-real-ip",
    "x-cluster-client-ip",
];

/// Resolves the address of the client that originated `request`.
///
/// Proxy headers are consulted before the socket address, in this order:
/// `x-client-ip`, `x-forwarded-for` (first valid hop), `cf-connecting-ip`,
/// `fastly-client-ip`, `true-client-ip`, `x-real-ip`, `x-cluster-client-ip`,
/// `x-forwarded`, `forwarded-for`, `forwarded`. Values that do not parse as an
/// IP address are skipped rather than trusted.
///
/// # Examples
///
/// ```
/// use fileroute::{Request, context::client_ip};
///
/// let raw = b"GET / HTTP/1.1\r\nX-Forwarded-For: unknown, 203.0.113.9:5100\r\n\r\n";
/// let (request, _) = Request::parse(raw).unwrap();
/// assert_eq!(client_ip(&request), Some("203.0.113.9".parse().unwrap()));
/// ```
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    let headers = request.headers();

    let single = |name: &str| headers.get(name).and_then(parse_candidate);
    let list = |name: &str| headers.get_list(name).find_map(parse_candidate);

    single("x-client-ip")
        .or_else(|| list("x-forwarded-for"))
        .or_else(|| CDN_HEADERS.into_iter().find_map(|name| single(name)))
        .or_else(|| list("x-forwarded"))
        .or_else(|| list("forwarded-for"))
        .or_else(|| {
            headers
                .get_list("forwarded")
                .flat_map(|element| element.split(';'))
                .filter_map(forwarded_for)
                .find_map(parse_candidate)
        })
        .or_else(|| request.peer_addr().map(|addr| addr.ip()))
}

// Extracts the node from a `for=` pair of an RFC 7239 `Forwarded` element.
fn forwarded_for(pair: &str) -> Option<&str> {
    let (name, value) = pair.trim().split_once('=')?;
    name.trim().eq_ignore_ascii_case("for").then_some(value.trim())
}

// Accepts a bare address, an address with port, or a bracketed IPv6 node.
fn parse_candidate(raw: &str) -> Option<IpAddr> {
    let value = raw.trim().trim_matches('"');
    if value.is_empty() {
        return None;
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(ip);
    }
    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(addr.ip());
    }
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.split(']').next()) {
        return inner.parse().ok();
    }

    // IPv4 with a port that SocketAddr rejected, e.g. a non-numeric port.
    match value.split_once(':') {
        Some((host, _)) if !host.contains(':') => host.parse().ok(),
        _ => None,
    }
}
