use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
};

use crate::error::TransportError;

/// An opaque `protocol:key=value,key=value` service locator, e.g.
/// `tcp:host=127.0.0.1,port=11111`.
///
/// This transport accepts the `tcp` and `kernelTcp` protocol tokens; the only
/// recognised options are `host` and `port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLocator {
    pub protocol: String,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl ServiceLocator {
    pub fn parse(locator: &str) -> Result<Self, TransportError> {
        let (protocol, rest) = locator.split_once(':').ok_or_else(|| {
            TransportError::InvalidLocator {
                locator: locator.to_string(),
                reason: "missing ':' protocol separator".to_string(),
            }
        })?;

        if !is_tcp_protocol(protocol) {
            return Err(TransportError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("unrecognised protocol token {protocol:?}"),
            });
        }

        let mut host = None;
        let mut port = None;
        for pair in rest.split(',') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| TransportError::InvalidLocator {
                locator: locator.to_string(),
                reason: format!("malformed option {pair:?}, expected key=value"),
            })?;
            match key {
                "host" => host = Some(value.to_string()),
                "port" => {
                    let parsed = value.parse::<u16>().map_err(|_| TransportError::InvalidLocator {
                        locator: locator.to_string(),
                        reason: format!("invalid port {value:?}"),
                    })?;
                    port = Some(parsed);
                }
                _ => {}
            }
        }

        Ok(Self { protocol: protocol.to_string(), host, port })
    }

    /// Resolves `host`/`port` to a `SocketAddr`. Both options are required;
    /// this is used identically by server (bind) and client (connect)
    /// locators.
    pub fn socket_addr(&self) -> Result<SocketAddr, TransportError> {
        let host = self.host.as_deref().ok_or_else(|| TransportError::InvalidLocator {
            locator: self.to_string(),
            reason: "missing host".to_string(),
        })?;
        let port = self.port.ok_or_else(|| TransportError::InvalidLocator {
            locator: self.to_string(),
            reason: "missing port".to_string(),
        })?;

        (host, port)
            .to_socket_addrs()
            .map_err(TransportError::Io)?
            .next()
            .ok_or_else(|| TransportError::InvalidLocator {
                locator: self.to_string(),
                reason: format!("could not resolve host {host:?}"),
            })
    }
}

impl fmt::Display for ServiceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:host={},port={}",
            self.protocol,
            self.host.as_deref().unwrap_or(""),
            self.port.map(|p| p.to_string()).unwrap_or_default(),
        )
    }
}

fn is_tcp_protocol(protocol: &str) -> bool {
    protocol == "tcp" || protocol == "kernelTcp"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let loc = ServiceLocator::parse("tcp:host=127.0.0.1,port=11111").unwrap();
        assert_eq!(loc.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(loc.port, Some(11111));
    }

    #[test]
    fn accepts_kernel_tcp_alias() {
        let loc = ServiceLocator::parse("kernelTcp:host=localhost,port=80").unwrap();
        assert_eq!(loc.protocol, "kernelTcp");
    }

    #[test]
    fn rejects_unknown_protocol() {
        assert!(ServiceLocator::parse("rdma:host=127.0.0.1,port=1").is_err());
    }

    #[test]
    fn rejects_missing_port() {
        let loc = ServiceLocator::parse("tcp:host=127.0.0.1").unwrap();
        assert!(loc.socket_addr().is_err());
    }
}
