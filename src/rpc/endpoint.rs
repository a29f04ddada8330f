use core::fmt;

use serde::{Deserialize, Serialize};

// ENDPOINT
// ================================================================================================

/// Network address of a full node: a protocol, a host, and an optional port.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Endpoint {
    /// The protocol used to connect to the endpoint (e.g. "wss").
    protocol: String,
    /// The hostname or IP address of the endpoint.
    host: String,
    /// The port number of the endpoint.
    port: Option<u16>,
}

impl Endpoint {
    pub(crate) const FULL_NODE_PORT: u16 = 8444;

    pub const fn new(protocol: String, host: String, port: Option<u16>) -> Self {
        Self { protocol, host, port }
    }

    /// Returns the [Endpoint] of a full node running on `localhost` with the default port.
    pub fn localhost() -> Self {
        Self::new("wss".into(), "localhost".into(), Some(Self::FULL_NODE_PORT))
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Returns true if `other` names the same host and port, ignoring the protocol. A missing
    /// port stands for the default full node port.
    pub fn same_address(&self, other: &Endpoint) -> bool {
        self.host == other.host
            && self.port.unwrap_or(Self::FULL_NODE_PORT) == other.port.unwrap_or(Self::FULL_NODE_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}://{}:{}", self.protocol, self.host, port),
            None => write!(f, "{}://{}", self.protocol, self.host),
        }
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::localhost()
    }
}

impl TryFrom<&str> for Endpoint {
    type Error = String;

    fn try_from(endpoint: &str) -> Result<Self, Self::Error> {
        let (protocol, rest) = match endpoint.find("://") {
            Some(index) => (&endpoint[..index], &endpoint[index + 3..]),
            None => ("wss", endpoint),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rfind(':') {
            Some(index) => {
                let port = rest[index + 1..].parse::<u16>().map_err(|err| err.to_string())?;
                (&rest[..index], Some(port))
            },
            None => (rest, None),
        };

        if host.is_empty() {
            return Err(format!("endpoint `{endpoint}` has no host"));
        }

        Ok(Endpoint::new(protocol.to_string(), host.to_string(), port))
    }
}

#[cfg(test)]
mod test {
    use super::Endpoint;

    #[test]
    fn test_endpoint_parsing_with_hostname_only() {
        let endpoint = Endpoint::try_from("node.chia.test").unwrap();
        assert_eq!(endpoint, Endpoint::new("wss".to_string(), "node.chia.test".to_string(), None));
    }

    #[test]
    fn test_endpoint_parsing_with_ip_and_port() {
        let endpoint = Endpoint::try_from("10.0.0.7:8444").unwrap();
        assert_eq!(endpoint, Endpoint::new("wss".to_string(), "10.0.0.7".to_string(), Some(8444)));
    }

    #[test]
    fn test_endpoint_parsing_with_protocol_and_port() {
        let endpoint = Endpoint::try_from("ws://node.chia.test:58444/").unwrap();
        assert_eq!(
            endpoint,
            Endpoint::new("ws".to_string(), "node.chia.test".to_string(), Some(58444))
        );
        assert_eq!(endpoint.to_string(), "ws://node.chia.test:58444");
    }

    #[test]
    fn test_endpoint_parsing_should_fail_for_invalid_port() {
        assert!(Endpoint::try_from("node.chia.test:8444/hello").is_err());
        assert!(Endpoint::try_from("wss://:8444").is_err());
    }

    #[test]
    fn test_same_address_uses_default_port() {
        let pinned = Endpoint::try_from("node.chia.test").unwrap();
        let connected = Endpoint::try_from("ws://node.chia.test:8444").unwrap();
        assert!(pinned.same_address(&connected));
        assert!(!pinned.same_address(&Endpoint::localhost()));
    }
}
