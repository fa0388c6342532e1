//! Connection handed back to dial callers
//!
//! [`TunnelConnection`] behaves like the loopback socket it wraps. It also
//! owns the tunnel session behind that socket, so the tunnel lives exactly as
//! long as the connection.

use crate::session::TunnelSession;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::{Instant, Sleep};

fn closed_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        "use of closed network connection",
    )
}

fn timeout_error() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "i/o timeout")
}

/// An I/O deadline, polled alongside the stream
struct Deadline {
    sleep: Pin<Box<Sleep>>,
}

impl Deadline {
    fn new(at: Instant) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep_until(at)),
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        self.sleep.as_mut().poll(cx).is_ready()
    }
}

fn expired(deadline: &mut Option<Deadline>, cx: &mut Context<'_>) -> bool {
    match deadline {
        Some(deadline) => deadline.poll_expired(cx),
        None => false,
    }
}

/// A loopback connection through a tunnel
///
/// Reads and writes go straight to the loopback socket. [`close`](Self::close)
/// closes the socket and then tears the tunnel down. Dropping the connection
/// without closing it stops the tunnel without waiting for it.
pub struct TunnelConnection {
    stream: Option<TcpStream>,
    session: Option<TunnelSession>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    read_deadline: Option<Deadline>,
    write_deadline: Option<Deadline>,
}

impl TunnelConnection {
    pub fn new(stream: TcpStream, session: TunnelSession) -> Self {
        let mut conn = Self::from_stream(stream);
        conn.session = Some(session);
        conn
    }

    /// A connection with no tunnel behind it
    pub fn from_stream(stream: TcpStream) -> Self {
        Self {
            local_addr: stream.local_addr().ok(),
            peer_addr: stream.peer_addr().ok(),
            stream: Some(stream),
            session: None,
            read_deadline: None,
            write_deadline: None,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.local_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "local address unknown"))
    }

    /// The tunnel's loopback endpoint this connection is attached to
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.peer_addr
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "peer address unknown"))
    }

    /// Set both read and write deadlines. `None` clears them.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.set_read_deadline(deadline);
        self.set_write_deadline(deadline);
    }

    pub fn set_read_deadline(&mut self, deadline: Option<Instant>) {
        self.read_deadline = deadline.map(Deadline::new);
    }

    pub fn set_write_deadline(&mut self, deadline: Option<Instant>) {
        self.write_deadline = deadline.map(Deadline::new);
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    pub fn session(&self) -> Option<&TunnelSession> {
        self.session.as_ref()
    }

    /// Close the socket, then tear down the tunnel
    ///
    /// The tunnel is torn down even if closing the socket fails; that error is
    /// what gets returned. Closing twice returns a "use of closed network
    /// connection" error and does nothing else.
    pub async fn close(&mut self) -> io::Result<()> {
        let mut stream = self.stream.take().ok_or_else(closed_error)?;
        let result = stream.shutdown().await;
        drop(stream);

        if let Some(mut session) = self.session.take() {
            session.teardown().await;
        }
        result
    }
}

impl AsyncRead for TunnelConnection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        if expired(&mut this.read_deadline, cx) {
            return Poll::Ready(Err(timeout_error()));
        }
        Pin::new(stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelConnection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        if expired(&mut this.write_deadline, cx) {
            return Poll::Ready(Err(timeout_error()));
        }
        Pin::new(stream).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(stream) = this.stream.as_mut() else {
            return Poll::Ready(Err(closed_error()));
        };
        if expired(&mut this.write_deadline, cx) {
            return Poll::Ready(Err(timeout_error()));
        }
        Pin::new(stream).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.is_write_vectored())
            .unwrap_or(false)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_flush(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }

    /// Half-closes the socket; the tunnel stays up until `close` or drop
    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match this.stream.as_mut() {
            Some(stream) => Pin::new(stream).poll_shutdown(cx),
            None => Poll::Ready(Err(closed_error())),
        }
    }
}

impl std::fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TunnelConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (
            TunnelConnection::from_stream(client.unwrap()),
            accepted.unwrap().0,
        )
    }

    #[tokio::test]
    async fn test_delegates_io_and_addresses() {
        let (mut conn, mut server) = pair().await;
        assert_eq!(conn.peer_addr().unwrap(), server.local_addr().unwrap());
        assert_eq!(conn.local_addr().unwrap(), server.peer_addr().unwrap());

        conn.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write_all(b"pong").await.unwrap();
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }

    #[tokio::test]
    async fn test_close_twice() {
        let (mut conn, mut server) = pair().await;
        conn.close().await.unwrap();
        assert!(conn.is_closed());

        let err = conn.close().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        let mut buf = [0u8; 1];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);

        // Peer observes EOF
        assert_eq!(server.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let (mut conn, _server) = pair().await;
        conn.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));

        let mut buf = [0u8; 1];
        let err = conn.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        // Clearing the deadline makes the connection usable again
        conn.set_deadline(None);
        conn.write_all(b"x").await.unwrap();
    }

    #[tokio::test]
    async fn test_write_deadline_elapsed() {
        let (mut conn, _server) = pair().await;
        conn.set_write_deadline(Some(Instant::now() + Duration::from_millis(10)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = conn.write(b"late").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
