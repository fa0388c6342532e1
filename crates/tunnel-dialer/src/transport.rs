//! Stream transport for the tunnel's remote side
//!
//! A port-forward session multiplexes one logical stream per local
//! connection over its control-plane transport. [`StreamOpener`] is that
//! seam: the forwarder asks it for a fresh stream to a remote port each time
//! a local connection is accepted.

use crate::error::BoxError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A bidirectional byte stream over the tunnel
pub trait TunnelStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens logical streams to ports on the remote workload
#[async_trait]
pub trait StreamOpener: Send + Sync + Debug {
    /// Open a new stream to `remote_port` on the workload
    async fn open_stream(&self, remote_port: u16) -> Result<Box<dyn TunnelStream>, BoxError>;
}

/// Opens plain TCP connections to the workload's address
///
/// Useful when the private network happens to be routable from the caller,
/// and as a stand-in for a real multiplexed session in tests.
#[derive(Debug, Clone)]
pub struct DirectStreamOpener {
    host: IpAddr,
}

impl DirectStreamOpener {
    pub fn new(host: IpAddr) -> Self {
        Self { host }
    }
}

#[async_trait]
impl StreamOpener for DirectStreamOpener {
    async fn open_stream(&self, remote_port: u16) -> Result<Box<dyn TunnelStream>, BoxError> {
        let addr = SocketAddr::new(self.host, remote_port);
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(remote = %addr, "Opened direct tunnel stream");
        Ok(Box::new(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_direct_stream_opener_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(b"pong").await.unwrap();
        });

        let opener = DirectStreamOpener::new("127.0.0.1".parse().unwrap());
        let mut stream = opener.open_stream(port).await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_direct_stream_opener_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let opener = DirectStreamOpener::new("127.0.0.1".parse().unwrap());
        assert!(opener.open_stream(port).await.is_err());
    }
}
