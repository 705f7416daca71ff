//! Listener, connection pool and the event loop tying them together.
//!
//! ```ignore
//! use pageserve::{Config, Server};
//!
//! let server = Server::bind(&Config::default())?;
//! let shutdown = server.shutdown_handle();
//! ctrlc::set_handler(move || shutdown.shutdown())?;
//! server.run()?;
//! ```

pub mod event_loop;
pub mod listener;
pub mod pool;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use mio::{Poll, Waker};
use thiserror::Error;
use tracing::warn;

use crate::config::{Config, ConfigError};
use event_loop::{EventLoop, LISTENER, WAKER};
use listener::Acceptor;

/// Setup-level failures. Any of these means the server never starts.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("listen address {0} did not resolve")]
    InvalidAddr(String),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Stops a running server from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake event loop");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// A bound, not yet running, static page server.
pub struct Server {
    event_loop: EventLoop,
    local_addr: SocketAddr,
    shutdown: ShutdownHandle,
}

impl Server {
    /// Validates `cfg`, binds the listener and sets up the poller.
    pub fn bind(cfg: &Config) -> Result<Self, ServerError> {
        cfg.validate()?;

        let poll = Poll::new()?;
        let mut acceptor = Acceptor::bind(&cfg.server.listen_addr)?;
        acceptor.register(poll.registry(), LISTENER)?;
        let local_addr = acceptor.local_addr();

        let waker = Arc::new(Waker::new(poll.registry(), WAKER)?);
        let flag = Arc::new(AtomicBool::new(false));

        Ok(Self {
            event_loop: EventLoop::new(poll, acceptor, cfg, Arc::clone(&flag)),
            local_addr,
            shutdown: ShutdownHandle { flag, waker },
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Serves until the shutdown handle fires.
    pub fn run(mut self) -> Result<(), ServerError> {
        self.event_loop.run()
    }
}
