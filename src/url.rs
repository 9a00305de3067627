//! Decomposition of the single accepted endpoint form:
//! `wss://HOST[:PORT]/TARGET`.

/// Parts of a `wss://` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    pub host: String,
    pub port: u16,
    pub target: String,
}

/// Parses `wss://HOST[:PORT]/TARGET`. Port defaults to 443, target to `/`.
/// Any other scheme is rejected.
pub fn parse_wss_url(input: &str) -> Option<WsUrl> {
    let scheme = input.get(..6)?;
    if !scheme.eq_ignore_ascii_case("wss://") {
        return None;
    }
    let rest = &input[6..];

    let (host_port, target) = match rest.find('/') {
        Some(slash) => (&rest[..slash], rest[slash..].to_string()),
        None => (rest, "/".to_string()),
    };

    let (host, port) = match host_port.find(':') {
        Some(colon) => {
            let port: u16 = host_port[colon + 1..].parse().ok()?;
            (&host_port[..colon], port)
        }
        None => (host_port, 443),
    };

    if host.is_empty() {
        return None;
    }

    Some(WsUrl {
        host: host.to_string(),
        port,
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_form() {
        let u = parse_wss_url("wss://fstream.binance.com:9443/ws/btcusdt@bookTicker").unwrap();
        assert_eq!(u.host, "fstream.binance.com");
        assert_eq!(u.port, 9443);
        assert_eq!(u.target, "/ws/btcusdt@bookTicker");
    }

    #[test]
    fn defaults() {
        let u = parse_wss_url("wss://example.com").unwrap();
        assert_eq!(u.port, 443);
        assert_eq!(u.target, "/");

        let u = parse_wss_url("wss://example.com/").unwrap();
        assert_eq!(u.target, "/");
    }

    #[test]
    fn scheme_case_insensitive() {
        assert!(parse_wss_url("WSS://example.com/ws").is_some());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(parse_wss_url("ws://example.com/ws").is_none());
        assert!(parse_wss_url("https://example.com/").is_none());
        assert!(parse_wss_url("example.com").is_none());
        assert!(parse_wss_url("").is_none());
    }

    #[test]
    fn rejects_bad_port_and_empty_host() {
        assert!(parse_wss_url("wss://example.com:notaport/").is_none());
        assert!(parse_wss_url("wss://example.com:99999/").is_none());
        assert!(parse_wss_url("wss://:443/").is_none());
    }
}
