use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use mio::Interest;
use tracing::{debug, warn};

use crate::config::Config;
use crate::http::parser::{ParseError, parse_request_line, request_line_complete};
use crate::http::request::Method;
use crate::http::resolver::resolve;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{Progress, ResponseWriter, TransmitError};

/// Per-request settings every connection needs while it is driven.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub routes_root: String,
    pub chunk_size: usize,
    pub lenient_request_line: bool,
}

impl From<&Config> for ServeOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            routes_root: cfg.static_files.routes_root.clone(),
            chunk_size: cfg.static_files.chunk_size,
            lenient_request_line: cfg.connection.lenient_request_line,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Receiving,
    Transmitting,
}

/// Result of one read into the request buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// Nothing to do until the next readable event.
    Waiting,
    /// Bytes arrived but the request line is not complete yet.
    Partial,
    /// The buffered bytes should be parsed now.
    Ready,
    /// Buffer full without a complete request line.
    Overflow,
    /// Orderly close by the peer.
    Closed,
}

/// What the event loop should do with a connection after driving it.
#[derive(Debug)]
pub enum Drive {
    /// Waiting on readiness.
    Idle,
    /// Made progress and can make more without a new event.
    Busy,
    /// Terminal; release the slot.
    Close(Closed),
}

#[derive(Debug)]
pub enum Closed {
    Completed { status: StatusCode, bytes_sent: u64 },
    PeerClosed,
    ReadFailed(io::Error),
    TransmitFailed { status: StatusCode, error: TransmitError },
}

/// One in-flight client.
///
/// Records live in the connection pool and are reused: `attach` resets every
/// field for a new socket and `detach` hands the socket back for closing. A record
/// without a stream is vacant.
pub struct Connection<S> {
    id: usize,
    stream: Option<S>,
    peer: Option<SocketAddr>,
    phase: Phase,

    buffer: Box<[u8]>,
    len: usize,
    method: Option<Method>,
    path: String,

    writer: Option<ResponseWriter>,

    readable: bool,
    writable: bool,
    last_active: Instant,
}

impl<S> Connection<S> {
    pub fn vacant(id: usize, buffer_size: usize) -> Self {
        Self {
            id,
            stream: None,
            peer: None,
            phase: Phase::Receiving,
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            len: 0,
            method: None,
            path: String::new(),
            writer: None,
            readable: false,
            writable: false,
            last_active: Instant::now(),
        }
    }

    /// Takes ownership of a freshly accepted socket, resetting all request and
    /// response state.
    pub fn attach(&mut self, stream: S, peer: SocketAddr, now: Instant) {
        self.stream = Some(stream);
        self.peer = Some(peer);
        self.phase = Phase::Receiving;
        self.len = 0;
        self.method = None;
        self.path.clear();
        self.writer = None;
        self.readable = false;
        self.writable = false;
        self.last_active = now;
    }

    /// Drops the open file and returns the socket. Leaves the record vacant.
    pub fn detach(&mut self) -> Option<S> {
        self.writer = None;
        self.peer = None;
        self.readable = false;
        self.writable = false;
        self.stream.take()
    }

    pub fn is_vacant(&self) -> bool {
        self.stream.is_none()
    }

    pub fn stream_mut(&mut self) -> Option<&mut S> {
        self.stream.as_mut()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Bytes currently held in the request buffer.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[..self.len]
    }

    pub fn writer(&self) -> Option<&ResponseWriter> {
        self.writer.as_ref()
    }

    /// Readiness the connection wants in its current phase.
    pub fn interest(&self) -> Interest {
        match self.phase {
            Phase::Receiving => Interest::READABLE,
            Phase::Transmitting => Interest::WRITABLE,
        }
    }

    /// Records readiness reported by the poller. Flags stay set until an operation
    /// hits would-block.
    pub fn mark_ready(&mut self, readable: bool, writable: bool) {
        self.readable |= readable;
        self.writable |= writable;
    }

    /// True when the current phase has readiness it has not used up yet.
    pub fn has_pending_work(&self) -> bool {
        match self.phase {
            Phase::Receiving => self.readable,
            Phase::Transmitting => self.writable,
        }
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_active)
    }

    fn respond(&mut self, response: Response, opts: &ServeOptions) {
        debug!(
            conn = self.id,
            status = response.status.as_u16(),
            file_size = response.file_size(),
            "response prepared"
        );
        self.writer = Some(ResponseWriter::new(response, opts.chunk_size));
        self.phase = Phase::Transmitting;
        // Optimistic first write; would-block clears it.
        self.writable = true;
    }

    fn build_response(&mut self, opts: &ServeOptions) -> Response {
        let request = match parse_request_line(&self.buffer[..self.len]) {
            Ok(request) => request,
            Err(e) => {
                if let ParseError::PathTraversal(path) = &e {
                    self.path.clone_from(path);
                }
                warn!(conn = self.id, peer = ?self.peer, error = %e, "bad request");
                return Response::error(StatusCode::BadRequest);
            }
        };

        self.path.clone_from(&request.path);
        self.method = Some(request.method.clone());

        if !request.method.is_get() {
            warn!(conn = self.id, method = request.method.as_str(), path = %request.path, "method not allowed");
            return Response::error(StatusCode::MethodNotAllowed);
        }

        debug!(conn = self.id, path = %request.path, version = request.version(), "parsed request");

        match resolve(&opts.routes_root, &request.path) {
            Ok(file_path) => Response::for_file(&file_path),
            Err(e) => {
                warn!(conn = self.id, error = %e, "path resolution failed");
                Response::error(StatusCode::InternalServerError)
            }
        }
    }
}

impl<S: Read + Write> Connection<S> {
    /// Advances the connection as far as its readiness allows.
    pub fn drive(&mut self, opts: &ServeOptions, now: Instant) -> Drive {
        if self.stream.is_none() {
            return Drive::Idle;
        }

        if self.phase == Phase::Receiving {
            if !self.readable {
                return Drive::Idle;
            }
            match self.receive(opts, now) {
                Ok(Received::Waiting) => return Drive::Idle,
                Ok(Received::Partial) => return Drive::Busy,
                Ok(Received::Closed) => return Drive::Close(Closed::PeerClosed),
                Ok(Received::Overflow) => {
                    warn!(conn = self.id, peer = ?self.peer, bytes = self.len, "request buffer full");
                    self.respond(Response::error(StatusCode::BadRequest), opts);
                }
                Ok(Received::Ready) => {
                    let response = self.build_response(opts);
                    self.respond(response, opts);
                }
                Err(e) => return Drive::Close(Closed::ReadFailed(e)),
            }
        }

        self.transmit(now)
    }

    /// Performs a single read into the remaining buffer capacity.
    pub fn receive(&mut self, opts: &ServeOptions, now: Instant) -> io::Result<Received> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Received::Waiting);
        };
        if self.len == self.buffer.len() {
            return Ok(Received::Overflow);
        }

        match stream.read(&mut self.buffer[self.len..]) {
            Ok(0) => Ok(Received::Closed),
            Ok(n) => {
                self.len += n;
                self.last_active = now;
                if self.request_ready(opts) {
                    Ok(Received::Ready)
                } else if self.len == self.buffer.len() {
                    Ok(Received::Overflow)
                } else {
                    Ok(Received::Partial)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.readable = false;
                if self.len > 0 && opts.lenient_request_line {
                    Ok(Received::Ready)
                } else {
                    Ok(Received::Waiting)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(Received::Partial),
            Err(e) => Err(e),
        }
    }

    fn request_ready(&self, opts: &ServeOptions) -> bool {
        if opts.lenient_request_line {
            self.len > 0
        } else {
            request_line_complete(&self.buffer[..self.len])
        }
    }

    fn transmit(&mut self, now: Instant) -> Drive {
        if !self.writable {
            return Drive::Idle;
        }
        let (Some(writer), Some(stream)) = (self.writer.as_mut(), self.stream.as_mut()) else {
            return Drive::Idle;
        };

        let before = (writer.headers_sent(), writer.bytes_sent());
        let result = writer.transmit(stream);
        // Any accepted byte counts as activity, even when the step then blocked.
        if (writer.headers_sent(), writer.bytes_sent()) != before {
            self.last_active = now;
        }

        match result {
            Ok(Progress::WouldBlock) => {
                self.writable = false;
                Drive::Idle
            }
            Ok(Progress::Yielded) => Drive::Busy,
            Ok(Progress::Complete) => Drive::Close(Closed::Completed {
                status: writer.status(),
                bytes_sent: writer.bytes_sent(),
            }),
            Err(error) => Drive::Close(Closed::TransmitFailed {
                status: writer.status(),
                error,
            }),
        }
    }
}
