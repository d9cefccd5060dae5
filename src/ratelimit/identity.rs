//! Client identity resolution.

use std::borrow::Borrow;
use std::net::IpAddr;

/// Key used when a request carries neither a forwarded address nor a
/// transport address.
const UNKNOWN_CLIENT: &str = "unknown";

/// The parts of an incoming request that admission control looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Target path of the request
    pub path: String,
    /// Raw `X-Forwarded-For` header value, if present
    pub forwarded_for: Option<String>,
    /// Transport-level peer address, if known
    pub remote_addr: Option<IpAddr>,
}

impl RequestInfo {
    /// Describe a request to `path` with no client address information.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            forwarded_for: None,
            remote_addr: None,
        }
    }

    /// Set the transport peer address.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Set the `X-Forwarded-For` header value.
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }
}

/// A key that identifies the client a request came from.
///
/// The forwarded header is taken at face value; this is best-effort
/// identification and not a security boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

impl ClientKey {
    /// Create a key from an arbitrary string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key for a request.
    ///
    /// The first comma-separated `X-Forwarded-For` entry wins; otherwise
    /// the transport address is used.
    pub fn resolve(request: &RequestInfo) -> Self {
        let forwarded = request
            .forwarded_for
            .as_deref()
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|first| !first.is_empty());

        match (forwarded, request.remote_addr) {
            (Some(first), _) => Self(first.to_string()),
            (None, Some(addr)) => Self(addr.to_string()),
            (None, None) => Self(UNKNOWN_CLIENT.to_string()),
        }
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ClientKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn remote() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))
    }

    #[test]
    fn test_forwarded_first_entry_wins() {
        let request = RequestInfo::new("/api/auth/signin")
            .with_remote_addr(remote())
            .with_forwarded_for(" 1.2.3.4 , 172.16.0.1, 10.0.0.1");

        assert_eq!(ClientKey::resolve(&request).as_str(), "1.2.3.4");
    }

    #[test]
    fn test_single_forwarded_value() {
        let request = RequestInfo::new("/").with_forwarded_for("203.0.113.9");
        assert_eq!(ClientKey::resolve(&request).as_str(), "203.0.113.9");
    }

    #[test]
    fn test_falls_back_to_remote_addr() {
        let request = RequestInfo::new("/").with_remote_addr(remote());
        assert_eq!(ClientKey::resolve(&request).as_str(), "10.0.0.7");
    }

    #[test]
    fn test_empty_forwarded_falls_back() {
        let request = RequestInfo::new("/")
            .with_remote_addr(remote())
            .with_forwarded_for("  , 1.2.3.4");
        assert_eq!(ClientKey::resolve(&request).as_str(), "10.0.0.7");
    }

    #[test]
    fn test_forwarded_value_is_not_validated() {
        let request = RequestInfo::new("/").with_forwarded_for("not-an-ip");
        assert_eq!(ClientKey::resolve(&request).as_str(), "not-an-ip");
    }

    #[test]
    fn test_no_address_information() {
        let request = RequestInfo::new("/");
        assert_eq!(ClientKey::resolve(&request).as_str(), UNKNOWN_CLIENT);
    }

    #[test]
    fn test_key_display_and_equality() {
        let key1 = ClientKey::new("5.6.7.8");
        let key2 = ClientKey::resolve(&RequestInfo::new("/").with_forwarded_for("5.6.7.8"));

        assert_eq!(key1, key2);
        assert_eq!(key1.to_string(), "5.6.7.8");
    }
}
