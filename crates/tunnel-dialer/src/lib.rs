//! Tunnel dialer - dial private-network addresses through port-forward tunnels
//!
//! [`TunnelDialer`] looks like an ordinary TCP dialer: give it `"tcp"` and an
//! address such as a pod IP, get back a connection. Behind the scenes it
//! resolves the workload serving that address, waits for it to be ready,
//! opens a port-forwarding tunnel to it through the control plane, and dials
//! the tunnel's ephemeral loopback port.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tunnel_dialer::{DialContext, TunnelDialer};
//!
//! # async fn example(
//! #     locator: Arc<dyn tunnel_dialer::WorkloadLocator>,
//! #     waiter: Arc<dyn tunnel_dialer::ReadinessWaiter>,
//! #     factory: Arc<dyn tunnel_dialer::SessionFactory>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let dialer = TunnelDialer::new(locator, waiter, factory);
//!
//! let ctx = DialContext::new().with_timeout(std::time::Duration::from_secs(30));
//! let mut conn = dialer.dial(&ctx, "tcp", "10.0.0.5:9090").await?;
//!
//! // ... use conn as an AsyncRead + AsyncWrite ...
//!
//! // Closes the socket and tears the tunnel down
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! For HTTP, [`port_forward_client`] wraps a dialer into a `hyper-util`
//! client.
//!
//! # Collaborators
//!
//! - [`WorkloadLocator`]: address to workload/container
//! - [`ReadinessWaiter`]: blocks until the container is ready
//! - [`SessionFactory`]: builds the authenticated transport and returns a
//!   [`PortForwarder`]; [`LoopbackForwarder`] over a [`StreamOpener`] covers
//!   the common case
//! - [`TunnelLog`]: receives forwarder output, [`TracingLog`] by default

pub mod config;
pub mod connection;
pub mod connector;
pub mod context;
pub mod dialer;
pub mod error;
pub mod forwarder;
pub mod session;
pub mod signal;
pub mod sink;
pub mod target;
pub mod transport;
pub mod workload;

pub use config::{DialerConfig, DialerConfigBuilder};
pub use connection::TunnelConnection;
pub use connector::{port_forward_client, TunnelConnector, TunnelHttpClient};
pub use context::DialContext;
pub use dialer::TunnelDialer;
pub use error::{BoxError, DialError, ForwardError};
pub use forwarder::{ForwardContext, LocalBinding, LoopbackForwarder, PortForwarder};
pub use session::{SessionFactory, SessionState, TunnelSession};
pub use signal::{ForwardedPort, ReadySignal, SessionOutcome};
pub use sink::{writer_from_fn, LogSinks, SinkWriter, TracingLog, TunnelLog, WriterFn};
pub use target::{Network, TargetAddress};
pub use transport::{DirectStreamOpener, StreamOpener, TunnelStream};
pub use workload::{ReadinessWaiter, WorkloadIdentity, WorkloadLocator};
