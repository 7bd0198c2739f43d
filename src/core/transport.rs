//! Socket transport
//!
//! The stream provider underneath a connection: connect, blocking read,
//! serialized write and shutdown. [`TcpTransport`] wraps a `TcpStream`;
//! anything else implementing [`Transport`] can stand in for it.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelnetError {
    #[error("Failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("No address found for {host}:{port}")]
    NoAddress { host: String, port: u16 },

    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Failed to read from socket: {0}")]
    Read(#[source] io::Error),

    #[error("Failed to write to socket: {0}")]
    Write(#[source] io::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Function key F{0} out of range (1-12)")]
    InvalidFunctionKey(u8),
}

impl TelnetError {
    /// A read that only ran into the receive timeout
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TelnetError::Read(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
        )
    }
}

pub type Result<T> = std::result::Result<T, TelnetError>;

/// Byte stream the connection reads from and writes to
pub trait Transport: Send + Sync {
    /// Block until data arrives; `Ok(0)` means the peer closed
    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Write all bytes; concurrent writers are serialized
    fn write_all(&self, bytes: &[u8]) -> Result<()>;

    /// Unblock pending reads and refuse further I/O
    fn shutdown(&self);
}

/// TCP implementation of [`Transport`]
pub struct TcpTransport {
    stream: TcpStream,
    write_lock: Mutex<()>,
}

impl TcpTransport {
    /// Connect to the first reachable address of `host:port`.
    ///
    /// `timeout` bounds the connect itself and is then used as the
    /// receive and send timeout of the socket.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        let timeout = timeout.max(Duration::from_millis(100));
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|source| TelnetError::Resolve {
                host: host.to_string(),
                port,
                source,
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Self::from_stream(stream, timeout),
                Err(source) => {
                    tracing::debug!("Connect to {} failed: {}", addr, source);
                    last_error = Some(TelnetError::Connect { addr, source });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| TelnetError::NoAddress {
            host: host.to_string(),
            port,
        }))
    }

    /// Wrap an already connected stream
    pub fn from_stream(stream: TcpStream, timeout: Duration) -> Result<Self> {
        let setup = |e| TelnetError::Connect {
            addr: stream
                .peer_addr()
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0))),
            source: e,
        };
        stream.set_read_timeout(Some(timeout)).map_err(setup)?;
        stream.set_write_timeout(Some(timeout)).map_err(setup)?;
        stream.set_nodelay(true).map_err(setup)?;
        Ok(Self {
            stream,
            write_lock: Mutex::new(()),
        })
    }
}

impl Transport for TcpTransport {
    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (&self.stream).read(buf).map_err(TelnetError::Read)
    }

    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        (&self.stream).write_all(bytes).map_err(TelnetError::Write)?;
        (&self.stream).flush().map_err(TelnetError::Write)
    }

    fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
