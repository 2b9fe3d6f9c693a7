use shared::DEFAULT_PORT;
use std::net::{AddrParseError, IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub max_clients: usize,
    /// Silence after which a client is dropped and its leave broadcast
    pub client_timeout: Duration,
    pub timeout_check_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: (Ipv4Addr::LOCALHOST, DEFAULT_PORT).into(),
            max_clients: 8,
            client_timeout: Duration::from_secs(5),
            timeout_check_interval: Duration::from_secs(1),
        }
    }
}

/// Builds a bind address from a literal IP (v4 or bare v6) and a port.
pub fn parse_bind_addr(host: &str, port: u16) -> Result<SocketAddr, AddrParseError> {
    let ip: IpAddr = host.parse()?;
    Ok(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[test]
    fn test_parse_ipv4_bind_addr() {
        let addr = parse_bind_addr("127.0.0.1", 9000).unwrap();
        assert_eq!(addr, SocketAddr::from((Ipv4Addr::LOCALHOST, 9000)));
    }

    #[test]
    fn test_parse_bare_ipv6_bind_addr() {
        let addr = parse_bind_addr("::1", 9000).unwrap();
        assert_eq!(addr, SocketAddr::from((Ipv6Addr::LOCALHOST, 9000)));

        let any = parse_bind_addr("::", DEFAULT_PORT).unwrap();
        assert!(any.is_ipv6());
        assert_eq!(any.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_rejects_hostnames() {
        assert!(parse_bind_addr("localhost", 9000).is_err());
        assert!(parse_bind_addr("[::1]", 9000).is_err());
    }
}
