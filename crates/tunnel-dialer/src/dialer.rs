//! Dial adapter
//!
//! [`TunnelDialer::dial`] turns `dial("tcp", "10.0.0.5:9090")` into:
//! locate the workload, wait for it, open a tunnel session, wait for the
//! session to become ready, dial the tunnel's loopback port. The returned
//! connection owns the session; setup failures tear it down before returning.

use crate::config::DialerConfig;
use crate::context::DialContext;
use crate::connection::TunnelConnection;
use crate::error::DialError;
use crate::forwarder::LocalBinding;
use crate::session::{SessionFactory, TunnelSession};
use crate::signal::{ForwardedPort, SessionOutcome};
use crate::sink::{LogSinks, TunnelLog};
use crate::target::{Network, TargetAddress};
use crate::workload::{ReadinessWaiter, WorkloadLocator};
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

/// Dials private-network addresses through port-forwarding tunnels
#[derive(Clone)]
pub struct TunnelDialer {
    locator: Arc<dyn WorkloadLocator>,
    waiter: Arc<dyn ReadinessWaiter>,
    factory: Arc<dyn SessionFactory>,
    logs: LogSinks,
    config: DialerConfig,
}

impl TunnelDialer {
    pub fn new(
        locator: Arc<dyn WorkloadLocator>,
        waiter: Arc<dyn ReadinessWaiter>,
        factory: Arc<dyn SessionFactory>,
    ) -> Self {
        Self {
            locator,
            waiter,
            factory,
            logs: LogSinks::tracing(),
            config: DialerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: DialerConfig) -> Self {
        self.config = config;
        self
    }

    /// Route forwarder output to `log` instead of `tracing`
    pub fn with_log(mut self, log: Arc<dyn TunnelLog>) -> Self {
        self.logs = LogSinks::new(log);
        self
    }

    pub fn config(&self) -> &DialerConfig {
        &self.config
    }

    /// Dial `address` on `network` through a fresh tunnel
    ///
    /// Only `"tcp"` is supported. The context bounds every wait made here;
    /// it does not stop the tunnel once a connection has been returned.
    pub async fn dial(
        &self,
        ctx: &DialContext,
        network: &str,
        address: &str,
    ) -> Result<TunnelConnection, DialError> {
        let network: Network = network.parse()?;
        let target = ctx.run(TargetAddress::resolve(network, address)).await??;
        let ip = target.ip();

        let workload = ctx
            .run(self.locator.locate(ctx, &target))
            .await?
            .map_err(|source| DialError::WorkloadLookup { ip, source })?;

        debug!(
            address = %target.addr,
            workload = %workload.workload_id,
            container = %workload.container_id,
            "Resolved workload, waiting for readiness"
        );

        ctx.run(self.waiter.await_ready(ctx, &workload))
            .await?
            .map_err(|source| DialError::WorkloadNotReady { ip, source })?;

        // The waiter may finish in the same poll that finished the context
        if let Some(e) = ctx.err() {
            return Err(e);
        }

        let binding = LocalBinding::ephemeral(self.config.local_address, target.port());
        let forwarder = ctx
            .run(self.factory.open_session(&workload, &binding, &self.logs))
            .await?
            .map_err(DialError::SessionOpen)?;

        let mut session = TunnelSession::new(
            forwarder,
            self.logs.clone(),
            self.config.teardown_timeout,
        );
        session.start();

        let port = match self.await_ready(ctx, &mut session).await {
            Ok(port) => port,
            Err(e) => {
                warn!(address = %target.addr, "Tunnel setup failed: {}", e);
                session.teardown().await;
                return Err(e);
            }
        };

        let local = SocketAddrV4::new(self.config.local_address, port.local);
        let stream = match ctx.run(Self::dial_loopback(local)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                session.teardown().await;
                return Err(DialError::LocalDial {
                    addr: SocketAddr::V4(local),
                    source,
                });
            }
            Err(e) => {
                session.teardown().await;
                return Err(e);
            }
        };

        info!(
            address = %target.addr,
            workload = %workload,
            local_port = port.local,
            "Tunnel established"
        );

        Ok(TunnelConnection::new(stream, session))
    }

    /// Race the session outcome against the caller's context and the setup bound
    async fn await_ready(
        &self,
        ctx: &DialContext,
        session: &mut TunnelSession,
    ) -> Result<ForwardedPort, DialError> {
        let setup_timeout = self.config.setup_timeout;
        let outcome = ctx
            .run(tokio::time::timeout(setup_timeout, session.await_outcome()))
            .await?
            .map_err(|_| DialError::SetupTimeout(setup_timeout))?;

        match outcome {
            SessionOutcome::Ready { ports } => match ports.as_slice() {
                [port] => Ok(*port),
                _ => Err(DialError::PortMapping { found: ports.len() }),
            },
            SessionOutcome::Stopped => Err(DialError::TunnelStoppedUnexpectedly),
            SessionOutcome::Failed(e) => Err(DialError::TunnelSetup(e)),
        }
    }

    /// IPv4 only, never dual-stack
    async fn dial_loopback(addr: SocketAddrV4) -> std::io::Result<TcpStream> {
        let socket = TcpSocket::new_v4()?;
        socket.connect(SocketAddr::V4(addr)).await
    }
}

impl std::fmt::Debug for TunnelDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDialer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
