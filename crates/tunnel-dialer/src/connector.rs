//! HTTP client integration
//!
//! Plugs [`TunnelDialer`] into `hyper-util`'s client as its connector, so
//! HTTP requests to private-network addresses travel through tunnels.

use crate::connection::TunnelConnection;
use crate::context::DialContext;
use crate::dialer::TunnelDialer;
use crate::error::DialError;
use bytes::Bytes;
use futures::future::BoxFuture;
use http::Uri;
use http_body_util::Full;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::IpAddr;
use std::task::{Context, Poll};
use tower::Service;

impl Connection for TunnelConnection {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// `tower::Service<Uri>` that dials every request's authority through a tunnel
#[derive(Debug, Clone)]
pub struct TunnelConnector {
    dialer: TunnelDialer,
}

impl TunnelConnector {
    pub fn new(dialer: TunnelDialer) -> Self {
        Self { dialer }
    }
}

/// `host:port` for `uri`, defaulting the port from the scheme
fn authority_address(uri: &Uri) -> Result<String, DialError> {
    let host = uri.host().ok_or_else(|| DialError::AddressResolution {
        address: uri.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "missing host"),
    })?;
    let port = uri
        .port_u16()
        .unwrap_or(match uri.scheme_str() {
            Some("https") => 443,
            _ => 80,
        });

    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{}]:{}", ip, port),
        _ => format!("{}:{}", host, port),
    })
}

impl Service<Uri> for TunnelConnector {
    type Response = TokioIo<TunnelConnection>;
    type Error = DialError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let dialer = self.dialer.clone();
        Box::pin(async move {
            let address = authority_address(&uri)?;
            let ctx = DialContext::new().with_timeout(dialer.config().connect_timeout);
            let conn = dialer.dial(&ctx, "tcp", &address).await?;
            Ok(TokioIo::new(conn))
        })
    }
}

/// HTTP client whose connections are tunnelled
pub type TunnelHttpClient = Client<TunnelConnector, Full<Bytes>>;

/// Build an HTTP client that port-forwards every request through `dialer`
pub fn port_forward_client(dialer: TunnelDialer) -> TunnelHttpClient {
    Client::builder(TokioExecutor::new()).build(TunnelConnector::new(dialer))
}
