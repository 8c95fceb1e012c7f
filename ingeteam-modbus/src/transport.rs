//! Modbus/TCP transport and its exclusive-access wrapper.

use crate::error::TransportError;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;
use tracing::{debug, info, warn};

/// A client able to read input registers from one device.
///
/// Implementations are driven exclusively through [`TransportConnection`],
/// which guarantees that at most one operation runs at a time.
#[async_trait]
pub trait RegisterTransport: Send {
    /// Open the connection. Must succeed immediately if already open.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Whether the connection is believed to be usable.
    fn is_open(&self) -> bool;

    /// Read `count` input registers starting at `address` (function code 0x04).
    async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Release the connection. Closing a closed transport is a no-op.
    async fn close(&mut self);

    /// Human-readable peer description, for logs.
    fn endpoint(&self) -> String;
}

/// Modbus/TCP client built on tokio-modbus.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpTransport {
    /// Create a transport. No connection is made until [`connect`](RegisterTransport::connect).
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            ctx: None,
        }
    }

    /// Resolve `host:port` to the first socket address.
    ///
    /// Must not borrow `self`: the client context is not `Sync`.
    async fn resolve(
        host: String,
        port: u16,
        limit: Duration,
    ) -> Result<SocketAddr, TransportError> {
        let endpoint = format!("{}:{}", host, port);
        let lookup = timeout(limit, tokio::net::lookup_host((host.as_str(), port)))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(|e| TransportError::InvalidAddress(format!("{}: {}", endpoint, e)))?;

        lookup
            .into_iter()
            .next()
            .ok_or(TransportError::InvalidAddress(endpoint))
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.ctx.is_some() {
            return Ok(());
        }

        let limit = self.timeout;
        let addr = Self::resolve(self.host.clone(), self.port, limit).await?;
        let ctx = timeout(limit, tcp::connect(addr))
            .await
            .map_err(|_| TransportError::Timeout(limit))?
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                message: e.to_string(),
            })?;

        self.ctx = Some(ctx);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read_input_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let ctx = self.ctx.as_mut().ok_or(TransportError::NotConnected)?;
        ctx.set_slave(Slave(unit_id));

        let result = match timeout(self.timeout, ctx.read_input_registers(address, count)).await {
            Err(_) => Err(TransportError::Timeout(self.timeout)),
            Ok(Err(e)) => Err(TransportError::Modbus(e.to_string())),
            Ok(Ok(Err(exception))) => Err(TransportError::Exception(format!("{:?}", exception))),
            Ok(Ok(Ok(words))) => Ok(words),
        };

        if let Err(e) = &result {
            if e.is_connection_lost() {
                // The socket state is unknown after a timeout or I/O error.
                debug!(endpoint = %self.endpoint(), error = %e, "Dropping Modbus connection");
                self.ctx = None;
            }
        }

        result
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(e) = ctx.disconnect().await {
                debug!(endpoint = %self.endpoint(), error = %e, "Error while disconnecting");
            }
        }
    }

    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Thread-safe wrapper around a single [`RegisterTransport`].
///
/// Every operation holds the same lock for its whole duration, so any
/// number of callers can share one connection without interleaving at the
/// socket level.
pub struct TransportConnection<T> {
    transport: Mutex<T>,
}

impl<T: RegisterTransport> TransportConnection<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Open the connection, logging the outcome.
    pub async fn connect(&self) -> bool {
        let mut transport = self.transport.lock().await;
        Self::connect_locked(&mut transport).await
    }

    pub async fn is_open(&self) -> bool {
        self.transport.lock().await.is_open()
    }

    /// Reconnect if the connection has dropped. Returns whether it is open.
    pub async fn ensure_connected(&self) -> bool {
        let mut transport = self.transport.lock().await;
        if transport.is_open() {
            return true;
        }

        info!(
            endpoint = %transport.endpoint(),
            "Modbus client is not connected, trying to reconnect"
        );
        Self::connect_locked(&mut transport).await
    }

    /// Read exactly `count` input registers.
    pub async fn read_registers(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut transport = self.transport.lock().await;
        let mut words = transport
            .read_input_registers(unit_id, address, count)
            .await?;

        if words.len() < count as usize {
            return Err(TransportError::ShortResponse {
                expected: count as usize,
                received: words.len(),
            });
        }

        words.truncate(count as usize);
        Ok(words)
    }

    pub async fn close(&self) {
        self.transport.lock().await.close().await;
    }

    async fn connect_locked(transport: &mut T) -> bool {
        if transport.is_open() {
            return true;
        }

        match transport.connect().await {
            Ok(()) => {
                info!(endpoint = %transport.endpoint(), "Successfully connected");
                true
            }
            Err(e) => {
                warn!(endpoint = %transport.endpoint(), error = %e, "Could not connect");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_close_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let connection =
            TransportConnection::new(TcpTransport::new("127.0.0.1", port, Duration::from_secs(3)));
        assert!(!connection.is_open().await);

        assert!(connection.connect().await);
        assert!(connection.is_open().await);
        // Already open: no second connection attempt
        assert!(connection.connect().await);

        connection.close().await;
        assert!(!connection.is_open().await);
        // Closing twice is harmless
        connection.close().await;
    }

    #[tokio::test]
    async fn test_connect_on_spawned_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(3));
        let (transport, result) = tokio::spawn(async move {
            let result = transport.connect().await;
            (transport, result)
        })
        .await
        .unwrap();
        result.unwrap();
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new("127.0.0.1", port, Duration::from_secs(3));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn test_read_requires_connection() {
        let connection =
            TransportConnection::new(TcpTransport::new("127.0.0.1", 502, Duration::from_secs(3)));
        let err = connection.read_registers(1, 0, 81).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }

    #[test]
    fn test_endpoint() {
        let transport = TcpTransport::new("inverter.local", 1502, Duration::from_secs(9));
        assert_eq!(transport.endpoint(), "inverter.local:1502");
    }

    #[test]
    fn test_connection_lost_classification() {
        assert!(TransportError::Timeout(Duration::from_secs(3)).is_connection_lost());
        assert!(TransportError::Modbus("broken pipe".into()).is_connection_lost());
        assert!(!TransportError::Exception("IllegalDataAddress".into()).is_connection_lost());
        assert!(
            !TransportError::ShortResponse {
                expected: 81,
                received: 3
            }
            .is_connection_lost()
        );
    }
}
