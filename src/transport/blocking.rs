use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Blocking UDP transport for RMCP/RMCP+.
pub struct UdpTransport {
    socket: UdpSocket,
    buffer_size: usize,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `target`.
    pub fn connect(target: SocketAddr, timeout: Duration, buffer_size: usize) -> Result<Self> {
        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(target)?;
        socket.set_read_timeout(Some(timeout))?;

        Ok(Self {
            socket,
            buffer_size,
        })
    }
}

impl Transport for UdpTransport {
    fn send_recv(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.socket.send(request)?;
        self.recv()
    }

    fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.buffer_size];
        match self.socket.recv(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if is_timeout(&e) => Err(Error::Timeout { attempts: 1 }),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
