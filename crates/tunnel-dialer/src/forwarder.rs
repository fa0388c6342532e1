//! Port forwarding activity
//!
//! A [`PortForwarder`] keeps a tunnel's local binding alive: it binds the
//! local listener, reports readiness with the ports it actually bound, and
//! forwards every accepted connection until it is told to stop.

use crate::error::ForwardError;
use crate::signal::{ForwardedPort, ReadySignal};
use crate::sink::SinkWriter;
use crate::transport::StreamOpener;
use async_trait::async_trait;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the tunnel's local end listens and which remote port it exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalBinding {
    pub address: Ipv4Addr,
    /// 0 picks an ephemeral port
    pub local_port: u16,
    pub remote_port: u16,
}

impl LocalBinding {
    /// Bind an ephemeral local port on `address` for `remote_port`
    pub fn ephemeral(address: Ipv4Addr, remote_port: u16) -> Self {
        Self {
            address,
            local_port: 0,
            remote_port,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(self.address, self.local_port))
    }
}

/// Everything a forwarder gets from its session
pub struct ForwardContext {
    /// Fire once the local listeners are bound
    pub ready: ReadySignal,
    /// Cancelled when the session is torn down
    pub stop: CancellationToken,
    /// Informational output
    pub out: SinkWriter,
    /// Error output
    pub err: SinkWriter,
}

/// The background activity behind one tunnel session
///
/// `forward` runs until `ctx.stop` is cancelled or forwarding fails. It must
/// only fire `ctx.ready` after its local binding is fully established.
/// Returning `Ok` before firing ready is observed as a premature stop.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    async fn forward(self: Box<Self>, ctx: ForwardContext) -> Result<(), ForwardError>;
}

/// Pause after a failed accept so persistent errors (e.g. EMFILE) don't spin
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Wait out [`ACCEPT_BACKOFF`]; false if `stop` fired first
async fn accept_backoff(stop: &CancellationToken) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
    }
}

fn emit(sink: &mut SinkWriter, line: String) {
    if let Err(e) = sink.write_all(line.as_bytes()) {
        debug!("Failed to write forwarder output: {}", e);
    }
}

/// Forwards a loopback listener through a [`StreamOpener`]
#[derive(Debug)]
pub struct LoopbackForwarder {
    binding: LocalBinding,
    opener: Arc<dyn StreamOpener>,
}

impl LoopbackForwarder {
    pub fn new(binding: LocalBinding, opener: Arc<dyn StreamOpener>) -> Self {
        Self { binding, opener }
    }

    /// Copy data bidirectionally between a local connection and a tunnel stream
    ///
    /// Returns (bytes_to_remote, bytes_to_local)
    async fn handle_connection(
        mut local: TcpStream,
        opener: Arc<dyn StreamOpener>,
        remote_port: u16,
    ) -> Result<(u64, u64), ForwardError> {
        let mut remote = opener
            .open_stream(remote_port)
            .await
            .map_err(|source| ForwardError::Stream {
                port: remote_port,
                source,
            })?;

        let (to_remote, to_local) = tokio::io::copy_bidirectional(&mut local, &mut remote).await?;
        Ok((to_remote, to_local))
    }
}

#[async_trait]
impl PortForwarder for LoopbackForwarder {
    async fn forward(self: Box<Self>, ctx: ForwardContext) -> Result<(), ForwardError> {
        let ForwardContext {
            ready,
            stop,
            mut out,
            mut err,
        } = ctx;
        let remote_port = self.binding.remote_port;

        let address = self.binding.socket_addr();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ForwardError::Bind { address, source })?;
        let local_addr = listener.local_addr()?;

        emit(
            &mut out,
            format!("Forwarding from {} -> {}\n", local_addr, remote_port),
        );

        let port = ForwardedPort {
            local: local_addr.port(),
            remote: remote_port,
        };
        if !ready.ready(vec![port]) {
            debug!(local_port = port.local, "Session already settled, not forwarding");
            return Ok(());
        }

        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    debug!(local_port = port.local, "Stop requested, closing listener");
                    break;
                }

                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    match joined {
                        Ok(Ok((to_remote, to_local))) => {
                            debug!(
                                bytes_to_remote = to_remote,
                                bytes_to_local = to_local,
                                "Forwarded connection completed"
                            );
                        }
                        Ok(Err(e)) => {
                            emit(
                                &mut err,
                                format!("an error occurred forwarding {} -> {}: {}\n", port.local, remote_port, e),
                            );
                        }
                        Err(e) if e.is_panic() => {
                            warn!("Forwarded connection task panicked: {}", e);
                        }
                        Err(_) => {}
                    }
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, local_port = port.local, "Accepted local connection");
                            emit(&mut out, format!("Handling connection for {}\n", remote_port));
                            connections.spawn(Self::handle_connection(
                                stream,
                                self.opener.clone(),
                                remote_port,
                            ));
                        }
                        Err(e) => {
                            emit(&mut err, format!("failed to accept connection: {}\n", e));
                            if !accept_backoff(&stop).await {
                                break;
                            }
                        }
                    }
                }
            }
        }

        connections.shutdown().await;
        info!(local_port = port.local, remote_port, "Port forwarding stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::{outcome_slot, SessionOutcome};
    use crate::sink::{writer_from_fn, LogSinks};
    use crate::transport::DirectStreamOpener;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_server() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (mut read, mut write) = stream.split();
                    let _ = tokio::io::copy(&mut read, &mut write).await;
                });
            }
        });
        port
    }

    fn discard() -> SinkWriter {
        Box::new(writer_from_fn(|p: &[u8]| Ok(p.len())))
    }

    #[test]
    fn test_ephemeral_binding() {
        let binding = LocalBinding::ephemeral(Ipv4Addr::LOCALHOST, 9090);
        assert_eq!(binding.socket_addr(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(binding.remote_port, 9090);
    }

    #[tokio::test]
    async fn test_loopback_forwarder_round_trip() {
        let remote_port = echo_server().await;
        let opener = Arc::new(DirectStreamOpener::new("127.0.0.1".parse().unwrap()));
        let forwarder = Box::new(LoopbackForwarder::new(
            LocalBinding::ephemeral(Ipv4Addr::LOCALHOST, remote_port),
            opener,
        ));

        let (sender, rx) = outcome_slot();
        let stop = CancellationToken::new();
        let logs = LogSinks::tracing();
        let ctx = ForwardContext {
            ready: ReadySignal::new(sender),
            stop: stop.clone(),
            out: logs.out(),
            err: logs.err(),
        };
        let task = tokio::spawn(forwarder.forward(ctx));

        let ports = match rx.await.unwrap() {
            SessionOutcome::Ready { ports } => ports,
            other => panic!("unexpected outcome: {:?}", other),
        };
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].remote, remote_port);
        assert_ne!(ports[0].local, 0);

        let mut conn = TcpStream::connect(("127.0.0.1", ports[0].local))
            .await
            .unwrap();
        conn.write_all(b"through the tunnel").await.unwrap();
        let mut buf = [0u8; 18];
        conn.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"through the tunnel");

        stop.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_loopback_forwarder_bind_failure() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut binding = LocalBinding::ephemeral(Ipv4Addr::LOCALHOST, 80);
        binding.local_port = taken.local_addr().unwrap().port();

        let forwarder = Box::new(LoopbackForwarder::new(
            binding,
            Arc::new(DirectStreamOpener::new("127.0.0.1".parse().unwrap())),
        ));
        let (sender, _rx) = outcome_slot();
        let ctx = ForwardContext {
            ready: ReadySignal::new(sender),
            stop: CancellationToken::new(),
            out: discard(),
            err: discard(),
        };

        let result = forwarder.forward(ctx).await;
        assert!(matches!(result, Err(ForwardError::Bind { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_backoff_waits_before_retrying() {
        let stop = CancellationToken::new();
        let started = tokio::time::Instant::now();

        assert!(accept_backoff(&stop).await);
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_backoff_yields_to_stop() {
        let stop = CancellationToken::new();
        stop.cancel();
        let started = tokio::time::Instant::now();

        assert!(!accept_backoff(&stop).await);
        assert!(started.elapsed() < ACCEPT_BACKOFF);
    }
}
