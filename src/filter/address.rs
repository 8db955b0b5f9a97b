use thiserror::Error;

/// A socket address or Host value that could not be split.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing port in address {0}")]
    MissingPort(String),

    #[error("too many colons in address {0}")]
    TooManyColons(String),

    #[error("malformed bracketed address {0}")]
    Brackets(String),

    #[error("invalid port {port} in address {address}")]
    InvalidPort { address: String, port: String },
}

/// Split `host:port` or `[v6]:port` into its parts. The port is not checked.
pub fn split_host_port(address: &str) -> Result<(&str, &str), AddressError> {
    let colon = address
        .rfind(':')
        .ok_or_else(|| AddressError::MissingPort(address.to_string()))?;

    let (host, port) = (&address[..colon], &address[colon + 1..]);

    if let Some(rest) = host.strip_prefix('[') {
        let inner = rest
            .strip_suffix(']')
            .ok_or_else(|| AddressError::Brackets(address.to_string()))?;
        if inner.contains('[') || inner.contains(']') {
            return Err(AddressError::Brackets(address.to_string()));
        }
        return Ok((inner, port));
    }

    if host.contains(':') {
        return Err(AddressError::TooManyColons(address.to_string()));
    }
    if host.contains('[') || host.contains(']') || port.contains('[') || port.contains(']') {
        return Err(AddressError::Brackets(address.to_string()));
    }

    Ok((host, port))
}

/// Parse a downstream socket address into ip and numeric port.
pub fn parse_socket_address(address: &str) -> Result<(&str, u16), AddressError> {
    let (ip, port) = split_host_port(address)?;
    let port = port.parse::<u16>().map_err(|_| AddressError::InvalidPort {
        address: address.to_string(),
        port: port.to_string(),
    })?;
    Ok((ip, port))
}

/// Server name from a Host value: any `:port` suffix is stripped.
pub fn server_name(host: &str) -> Result<&str, AddressError> {
    if host.contains(':') {
        split_host_port(host).map(|(name, _)| name)
    } else {
        Ok(host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ipv4() {
        assert_eq!(parse_socket_address("10.0.0.1:51234"), Ok(("10.0.0.1", 51234)));
    }

    #[test]
    fn test_parse_ipv6() {
        assert_eq!(parse_socket_address("[::1]:8080"), Ok(("::1", 8080)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(parse_socket_address("10.0.0.1"), Err(AddressError::MissingPort(_))));
        assert!(matches!(parse_socket_address("::1:80"), Err(AddressError::TooManyColons(_))));
        assert!(matches!(parse_socket_address("[::1:80"), Err(AddressError::Brackets(_))));
        assert!(matches!(
            parse_socket_address("10.0.0.1:http"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(
            parse_socket_address("10.0.0.1:70000"),
            Err(AddressError::InvalidPort { .. })
        ));
        assert!(matches!(parse_socket_address("10.0.0.1:"), Err(AddressError::InvalidPort { .. })));
    }

    #[test]
    fn test_server_name_strips_port() {
        assert_eq!(server_name("example.com"), Ok("example.com"));
        assert_eq!(server_name("example.com:8443"), Ok("example.com"));
        assert_eq!(server_name("[2001:db8::1]:443"), Ok("2001:db8::1"));
        assert!(server_name("a:b:c").is_err());
    }
}
