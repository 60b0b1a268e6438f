//! TCP listener and serve loop.

use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{TransportError, TransportResult};

/// A bound HTTP server waiting to be started.
#[derive(Debug)]
pub struct HttpServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Binds `addr`. Port `0` picks an ephemeral port.
    pub async fn bind(addr: &str) -> TransportResult<Self> {
        let bind_err = |source| TransportError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves `router` until `shutdown` is cancelled, then drains in-flight
    /// connections.
    pub async fn serve(self, router: Router, shutdown: CancellationToken) -> TransportResult<()> {
        info!(addr = %self.local_addr, "HTTP server listening");
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;
        info!(addr = %self.local_addr, "HTTP server stopped");
        Ok(())
    }
}
