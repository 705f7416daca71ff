use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use mio::{Events, Poll, Token};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::http::connection::{Closed, Drive, ServeOptions};
use crate::server::ServerError;
use crate::server::listener::Acceptor;
use crate::server::pool::{ConnId, ConnectionPool, PoolExhausted};

pub(crate) const LISTENER: Token = Token(usize::MAX - 1);
pub(crate) const WAKER: Token = Token(usize::MAX - 2);

const EVENTS_CAPACITY: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Single-threaded readiness loop driving the acceptor and every pooled
/// connection.
///
/// Each tick: poll, record readiness, accept at most one connection, then drive
/// every active connection once. Connections that finish or fail are released in
/// the same tick.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    acceptor: Acceptor,
    pool: ConnectionPool,
    opts: ServeOptions,
    idle_timeout: Option<Duration>,
    last_sweep: Instant,
    shutdown: Arc<AtomicBool>,
    scratch: Vec<ConnId>,
}

impl EventLoop {
    pub(crate) fn new(
        poll: Poll,
        acceptor: Acceptor,
        cfg: &Config,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            acceptor,
            pool: ConnectionPool::new(cfg.pool.capacity, cfg.pool.request_buffer_size),
            opts: ServeOptions::from(cfg),
            idle_timeout: cfg.connection.idle_timeout(),
            last_sweep: Instant::now(),
            shutdown,
            scratch: Vec::with_capacity(cfg.pool.capacity),
        }
    }

    /// Runs until shutdown is requested. Only a failing poll ends it early.
    pub fn run(&mut self) -> Result<(), ServerError> {
        info!(
            capacity = self.pool.capacity(),
            routes_root = %self.opts.routes_root,
            "event loop started"
        );

        while !self.shutdown.load(Ordering::Acquire) {
            let timeout = self.poll_timeout();
            match self.poll.poll(&mut self.events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "poll failed");
                    self.close_all();
                    return Err(e.into());
                }
            }

            self.record_readiness();
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.tick(Instant::now());
        }

        let released = self.close_all();
        info!(released, "event loop stopped");
        Ok(())
    }

    fn poll_timeout(&self) -> Option<Duration> {
        let pending = self.acceptor.is_ready()
            || self
                .pool
                .active_ids()
                .any(|id| self.pool.get(id).is_some_and(|c| c.has_pending_work()));

        if pending {
            Some(Duration::ZERO)
        } else if self.acceptor.is_stalled()
            || (self.idle_timeout.is_some() && self.pool.active_count() > 0)
        {
            Some(SWEEP_INTERVAL)
        } else {
            None
        }
    }

    fn record_readiness(&mut self) {
        for event in self.events.iter() {
            match event.token() {
                LISTENER => self.acceptor.mark_ready(),
                WAKER => {}
                token => {
                    if let Some(conn) = self.pool.get_mut(ConnId::from(token)) {
                        // Errors and hang-ups surface through the next read or write.
                        let hangup =
                            event.is_error() || event.is_read_closed() || event.is_write_closed();
                        conn.mark_ready(
                            event.is_readable() || hangup,
                            event.is_writable() || hangup,
                        );
                    }
                }
            }
        }
    }

    /// One scheduling pass: listener first, then existing connections.
    fn tick(&mut self, now: Instant) {
        self.accept_one(now);
        self.service(now);

        if now.saturating_duration_since(self.last_sweep) >= SWEEP_INTERVAL {
            self.last_sweep = now;
            self.acceptor.retry_stalled();
            self.sweep_idle(now);
        }
    }

    fn accept_one(&mut self, now: Instant) {
        let Some((stream, peer)) = self.acceptor.accept_one() else {
            return;
        };

        let id = match self.pool.acquire(stream, peer, now) {
            Ok(id) => id,
            Err(PoolExhausted(stream)) => {
                warn!(%peer, capacity = self.pool.capacity(), "connection pool exhausted, dropping");
                drop(stream);
                return;
            }
        };

        let registered = match self.pool.get_mut(id) {
            Some(conn) => {
                let interest = conn.interest();
                conn.stream_mut().map_or(Ok(()), |stream| {
                    self.poll.registry().register(stream, id.token(), interest)
                })
            }
            None => Ok(()),
        };

        if let Err(e) = registered {
            error!(conn = id.index(), %peer, error = %e, "register failed");
            self.pool.release(id);
            return;
        }

        debug!(conn = id.index(), %peer, active = self.pool.active_count(), "accepted");
    }

    fn service(&mut self, now: Instant) {
        let mut ids = std::mem::take(&mut self.scratch);
        ids.clear();
        ids.extend(self.pool.active_ids());

        for &id in &ids {
            let Some(conn) = self.pool.get_mut(id) else {
                continue;
            };

            let before = conn.phase();
            match conn.drive(&self.opts, now) {
                Drive::Close(closed) => {
                    log_close(id, &closed);
                    self.close(id);
                }
                Drive::Idle | Drive::Busy => {
                    if conn.phase() == before {
                        continue;
                    }
                    let interest = conn.interest();
                    let rearmed = match conn.stream_mut() {
                        Some(stream) => self.poll.registry().reregister(stream, id.token(), interest),
                        None => Ok(()),
                    };
                    if let Err(e) = rearmed {
                        error!(conn = id.index(), error = %e, "reregister failed");
                        self.close(id);
                    }
                }
            }
        }

        self.scratch = ids;
    }

    fn sweep_idle(&mut self, now: Instant) {
        let Some(timeout) = self.idle_timeout else {
            return;
        };

        let mut ids = std::mem::take(&mut self.scratch);
        ids.clear();
        ids.extend(
            self.pool
                .active_ids()
                .filter(|&id| self.pool.get(id).is_some_and(|c| c.idle_for(now) > timeout)),
        );

        for &id in &ids {
            warn!(conn = id.index(), timeout_secs = timeout.as_secs(), "idle timeout");
            self.close(id);
        }
        self.scratch = ids;
    }

    /// Deregisters and releases one connection.
    fn close(&mut self, id: ConnId) {
        self.deregister(id);
        self.pool.release(id);
    }

    fn close_all(&mut self) -> usize {
        let mut ids = std::mem::take(&mut self.scratch);
        ids.clear();
        ids.extend(self.pool.active_ids());
        for &id in &ids {
            self.deregister(id);
        }
        self.scratch = ids;
        self.pool.release_all()
    }

    fn deregister(&mut self, id: ConnId) {
        if let Some(stream) = self.pool.get_mut(id).and_then(|conn| conn.stream_mut()) {
            if let Err(e) = self.poll.registry().deregister(stream) {
                debug!(conn = id.index(), error = %e, "deregister failed");
            }
        }
    }
}

fn log_close(id: ConnId, closed: &Closed) {
    let conn = id.index();
    match closed {
        Closed::Completed { status, bytes_sent } => {
            debug!(conn, status = status.as_u16(), bytes = bytes_sent, "response sent")
        }
        Closed::PeerClosed => debug!(conn, "peer closed connection"),
        Closed::ReadFailed(e) => error!(conn, error = %e, "read failed"),
        Closed::TransmitFailed { status, error } => {
            error!(conn, status = status.as_u16(), error = %error, "transmit failed")
        }
    }
}
