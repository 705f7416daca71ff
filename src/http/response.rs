use std::fmt::Write as _;
use std::fs::File;
use std::path::Path;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tracing::warn;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Largest header block (plus inline body) a response may render to.
pub const MAX_HEADER_LEN: usize = 2048;

/// HTTP status codes the server answers with.
///
/// - `Ok` (200): page served
/// - `BadRequest` (400): malformed, oversized or traversing request line
/// - `NotFound` (404): no regular file at the resolved path
/// - `MethodNotAllowed` (405): anything but GET
/// - `InternalServerError` (500): path construction, open or render failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 200 OK
    Ok,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 405 Method Not Allowed
    MethodNotAllowed,
    /// 500 Internal Server Error
    InternalServerError,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use pageserve::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::NotFound.as_u16(), 404);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Ok => 200,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::MethodNotAllowed => 405,
            StatusCode::InternalServerError => 500,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::MethodNotAllowed => "Method Not Allowed",
            StatusCode::InternalServerError => "Internal Server Error",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("formatting the response head failed")]
    Format,

    #[error("response head is {len} bytes, limit is {max}")]
    TooLarge { len: usize, max: usize },
}

/// Minimal HTML page carried inline by every error response.
pub fn error_body(status: StatusCode) -> String {
    format!(
        "<html><body><h1>{} {}</h1></body></html>",
        status.as_u16(),
        status.reason_phrase()
    )
}

/// Builder for the rendered head of a response.
///
/// Headers keep their insertion order. `Content-Length` is appended from the inline
/// body when no header sets it, so file responses set it explicitly for the body
/// streamed afterwards.
///
/// # Example
///
/// ```
/// # use pageserve::http::response::{ResponseBuilder, StatusCode};
/// let head = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "text/html")
///     .header("Content-Length", "42")
///     .build()
///     .unwrap();
/// assert!(head.starts_with(b"HTTP/1.1 200 OK\r\n"));
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl ResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((key, value.into()));
        self
    }

    /// Sets a body rendered inline after the blank line.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Renders status line, headers, blank line and inline body.
    pub fn build(self) -> Result<Bytes, RenderError> {
        let mut buf = BytesMut::with_capacity(256 + self.body.len());

        write!(
            buf,
            "{} {} {}\r\n",
            HTTP_VERSION,
            self.status.as_u16(),
            self.status.reason_phrase()
        )
        .map_err(|_| RenderError::Format)?;

        let mut wrote_length = false;
        for (key, value) in &self.headers {
            if *key == "Content-Length" {
                wrote_length = true;
            }
            write!(buf, "{key}: {value}\r\n").map_err(|_| RenderError::Format)?;
        }
        if !wrote_length {
            write!(buf, "Content-Length: {}\r\n", self.body.len()).map_err(|_| RenderError::Format)?;
        }

        buf.put_slice(b"\r\n");
        buf.put_slice(&self.body);

        if buf.len() > MAX_HEADER_LEN {
            return Err(RenderError::TooLarge {
                len: buf.len(),
                max: MAX_HEADER_LEN,
            });
        }
        Ok(buf.freeze())
    }
}

/// Body streamed from disk after the head.
#[derive(Debug)]
pub struct FileBody<F = File> {
    pub file: F,
    pub size: u64,
}

/// A response ready for the transmitter.
#[derive(Debug)]
pub struct Response<F = File> {
    pub status: StatusCode,
    /// Rendered head; error responses carry their whole body here.
    pub head: Bytes,
    pub body: Option<FileBody<F>>,
}

impl<F> Response<F> {
    /// Builds an error response with its HTML body inline.
    pub fn error(status: StatusCode) -> Self {
        let head = render_error(status).unwrap_or_else(|e| {
            warn!(status = status.as_u16(), error = %e, "error page render failed");
            Bytes::from_static(
                b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            )
        });
        Self {
            status,
            head,
            body: None,
        }
    }

    /// Response for a file of `size` bytes the caller already opened.
    pub fn file(file: F, size: u64) -> Self {
        let head = ResponseBuilder::new(StatusCode::Ok)
            .header("Content-Type", "text/html")
            .header("Content-Length", size.to_string())
            .header("Connection", "close")
            .build();

        match head {
            Ok(head) => Self {
                status: StatusCode::Ok,
                head,
                body: Some(FileBody { file, size }),
            },
            Err(e) => {
                warn!(error = %e, "success head render failed");
                Self::error(StatusCode::InternalServerError)
            }
        }
    }

    pub fn file_size(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.size)
    }
}

impl Response<File> {
    /// Stats and opens `path`, producing a 200 with a file body or the matching
    /// error response.
    pub fn for_file(path: &Path) -> Self {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "stat failed");
                return Self::error(StatusCode::NotFound);
            }
        };

        if !meta.is_file() {
            warn!(path = %path.display(), "not a regular file");
            return Self::error(StatusCode::NotFound);
        }

        match File::open(path) {
            Ok(file) => Self::file(file, meta.len()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "open failed");
                Self::error(StatusCode::InternalServerError)
            }
        }
    }
}

fn render_error(status: StatusCode) -> Result<Bytes, RenderError> {
    let body = error_body(status);
    ResponseBuilder::new(status)
        .header("Content-Type", "text/html")
        .header("Content-Length", body.len().to_string())
        .header("Connection", "close")
        .body(body)
        .build()
}
