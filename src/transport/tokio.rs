use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::transport::AsyncTransport;

/// Tokio UDP transport for RMCP/RMCP+.
pub struct UdpTransport {
    socket: UdpSocket,
    buffer_size: usize,
    timeout: Duration,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `target`.
    pub async fn connect(target: SocketAddr, timeout: Duration, buffer_size: usize) -> Result<Self> {
        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await?;

        Ok(Self {
            socket,
            buffer_size,
            timeout,
        })
    }

    async fn send_recv_impl(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.socket.send(request).await?;
        self.recv_impl().await
    }

    async fn recv_impl(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.buffer_size];
        match tokio::time::timeout(self.timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(buf)
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_elapsed) => Err(Error::Timeout { attempts: 1 }),
        }
    }
}

impl AsyncTransport for UdpTransport {
    fn send_recv<'a>(
        &'a self,
        request: &'a [u8],
    ) -> core::pin::Pin<Box<dyn core::future::Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { self.send_recv_impl(request).await })
    }

    fn recv<'a>(
        &'a self,
    ) -> core::pin::Pin<Box<dyn core::future::Future<Output = Result<Vec<u8>>> + Send + 'a>> {
        Box::pin(async move { self.recv_impl().await })
    }
}
