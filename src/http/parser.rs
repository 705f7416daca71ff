use thiserror::Error;

use crate::http::request::{Method, Request};

pub const METHOD_MAX_LEN: usize = 15;
pub const PATH_MAX_LEN: usize = 255;
pub const VERSION_MAX_LEN: usize = 15;

/// Why a buffered request line was rejected. Every variant maps to 400.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("request line has fewer than two tokens")]
    TooFewTokens,

    #[error("{field} token longer than {max} bytes")]
    TokenTooLong { field: &'static str, max: usize },

    #[error("request line is not valid UTF-8")]
    InvalidEncoding,

    #[error("path traversal attempt: {0}")]
    PathTraversal(String),
}

/// True once the buffer holds a whole request line.
pub fn request_line_complete(buf: &[u8]) -> bool {
    buf.contains(&b'\n')
}

/// Parses `METHOD SP PATH [SP VERSION]` from the start of `buf`.
///
/// Only the first line is considered; if there is no line break yet the whole
/// buffer is treated as the request line. Non-GET methods are not an error here,
/// the caller decides how to answer them.
pub fn parse_request_line(buf: &[u8]) -> Result<Request, ParseError> {
    let line = match buf.iter().position(|&b| b == b'\n') {
        Some(end) => &buf[..end],
        None => buf,
    };
    let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;

    let mut tokens = line.split_ascii_whitespace();
    let method = tokens.next().ok_or(ParseError::TooFewTokens)?;
    let path = tokens.next().ok_or(ParseError::TooFewTokens)?;
    let version = tokens.next();

    bounded("method", method, METHOD_MAX_LEN)?;
    bounded("path", path, PATH_MAX_LEN)?;
    if let Some(version) = version {
        bounded("version", version, VERSION_MAX_LEN)?;
    }

    // Coarse guard, applied before the method is looked at.
    if path.contains("..") {
        return Err(ParseError::PathTraversal(path.to_string()));
    }

    Ok(Request {
        method: Method::from_token(method),
        path: path.to_string(),
        version: version.map(str::to_string),
    })
}

fn bounded(field: &'static str, token: &str, max: usize) -> Result<(), ParseError> {
    if token.len() > max {
        return Err(ParseError::TokenTooLong { field, max });
    }
    Ok(())
}
