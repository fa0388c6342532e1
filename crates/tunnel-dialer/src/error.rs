//! Error types for tunnel dialing and port forwarding

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Boxed error returned by external collaborators (locator, readiness waiter, session factory)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while dialing an address through a tunnel
///
/// Every variant is terminal for the dial attempt. Any tunnel resources
/// allocated before the failure are torn down before the error is returned.
#[derive(Debug, Error)]
pub enum DialError {
    #[error("network {0:?} unsupported")]
    UnsupportedNetwork(String),

    #[error("unable to resolve TCP address {address:?}: {source}")]
    AddressResolution {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to find workload for IP {ip}: {source}")]
    WorkloadLookup {
        ip: IpAddr,
        #[source]
        source: BoxError,
    },

    #[error("failed waiting for workload for IP {ip}: {source}")]
    WorkloadNotReady {
        ip: IpAddr,
        #[source]
        source: BoxError,
    },

    #[error("unable to open tunnel session: {0}")]
    SessionOpen(#[source] BoxError),

    #[error("expected 1 port but found {found}")]
    PortMapping { found: usize },

    #[error("port forwarding stopped unexpectedly")]
    TunnelStoppedUnexpectedly,

    #[error("port forwarding failed: {0}")]
    TunnelSetup(#[source] ForwardError),

    #[error("unable to dial local tunnel endpoint {addr}: {source}")]
    LocalDial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("dial cancelled")]
    Cancelled,

    #[error("dial deadline exceeded")]
    DeadlineExceeded,

    #[error("tunnel did not become ready within {0:?}")]
    SetupTimeout(Duration),
}

impl DialError {
    /// Whether the error came from the caller's context rather than the tunnel
    pub fn is_context_error(&self) -> bool {
        matches!(self, DialError::Cancelled | DialError::DeadlineExceeded)
    }
}

/// Errors raised by the forwarding activity of a tunnel session
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to listen on {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("failed to open tunnel stream to remote port {port}: {source}")]
    Stream {
        port: u16,
        #[source]
        source: BoxError,
    },

    #[error("IO error during forwarding: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<DialError> for std::io::Error {
    fn from(err: DialError) -> Self {
        let kind = match &err {
            DialError::UnsupportedNetwork(_) => std::io::ErrorKind::Unsupported,
            DialError::AddressResolution { .. } => std::io::ErrorKind::InvalidInput,
            DialError::Cancelled => std::io::ErrorKind::Interrupted,
            DialError::DeadlineExceeded | DialError::SetupTimeout(_) => {
                std::io::ErrorKind::TimedOut
            }
            DialError::LocalDial { source, .. } => source.kind(),
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dial_error_display() {
        let err = DialError::UnsupportedNetwork("udp".to_string());
        assert_eq!(err.to_string(), "network \"udp\" unsupported");

        let err = DialError::PortMapping { found: 2 };
        assert_eq!(err.to_string(), "expected 1 port but found 2");
    }

    #[test]
    fn test_tunnel_setup_keeps_source() {
        let err = DialError::TunnelSetup(ForwardError::Transport("upgrade rejected".into()));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("upgrade rejected"));
    }

    #[test]
    fn test_into_io_error_kind() {
        let err: std::io::Error = DialError::SetupTimeout(Duration::from_secs(1)).into();
        assert_eq!(err.kind(), std::io::ErrorKind::TimedOut);

        let err: std::io::Error = DialError::Cancelled.into();
        assert_eq!(err.kind(), std::io::ErrorKind::Interrupted);
        assert!(DialError::Cancelled.is_context_error());
    }
}
