use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::{info, warn};

use crate::server::ServerError;

/// Non-blocking listening socket that hands out at most one connection per call.
///
/// Readiness is edge-triggered, so the acceptor remembers that the listener fired
/// and keeps accepting on later ticks until the backlog reports would-block.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    ready: bool,
    stalled: bool,
}

impl Acceptor {
    pub fn bind(addr: &str) -> Result<Self, ServerError> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|source| ServerError::Bind {
                addr: addr.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::InvalidAddr(addr.to_string()))?;

        let listener = TcpListener::bind(socket_addr).map_err(|source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        info!("Listening on {}", local_addr);

        Ok(Self {
            listener,
            local_addr,
            ready: false,
            stalled: false,
        })
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.listener, token, Interest::READABLE)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn mark_ready(&mut self) {
        self.ready = true;
    }

    /// True while the backlog may still hold connections.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Accepts one pending connection, if the listener has any.
    ///
    /// The returned stream is already non-blocking.
    pub fn accept_one(&mut self) -> Option<(TcpStream, SocketAddr)> {
        if !self.ready {
            return None;
        }

        match self.listener.accept() {
            Ok(accepted) => Some(accepted),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.ready = false;
                None
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                ) =>
            {
                None
            }
            Err(e) => {
                self.stall(&e);
                None
            }
        }
    }

    /// Parks the acceptor after a hard accept error such as descriptor
    /// exhaustion. The backlog is retried by `retry_stalled`.
    fn stall(&mut self, e: &io::Error) {
        warn!(error = %e, "accept failed, retrying later");
        self.ready = false;
        self.stalled = true;
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Re-arms a stalled acceptor so the pending backlog is drained again.
    pub fn retry_stalled(&mut self) {
        if self.stalled {
            self.stalled = false;
            self.ready = true;
        }
    }
}
