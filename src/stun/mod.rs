//! STUN client: wire codec, socket pool, rate limiting and NAT discovery.

pub mod client;
pub mod codec;
pub mod pool;
pub mod throttle;

pub use client::{NatType, StunClient, StunResponse};

/// Default public STUN server for server-reflexive candidate gathering.
pub const DEFAULT_STUN_SERVER: &str = "stun.l.google.com:19302";

/// Split a `host:port` server entry.
pub fn split_server(entry: &str) -> Option<(&str, u32)> {
    let (host, port) = entry.rsplit_once(':')?;
    let port = port.parse().ok()?;
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_server() {
        assert_eq!(
            split_server(DEFAULT_STUN_SERVER),
            Some(("stun.l.google.com", 19302))
        );
        assert_eq!(split_server("no-port"), None);
        assert_eq!(split_server("host:abc"), None);
    }
}
