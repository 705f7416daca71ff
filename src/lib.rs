//! pageserve - single-threaded static page server
//!
//! Answers `GET /path` with `<routes_root>/path/page.html`, multiplexing every
//! client over one readiness loop and a fixed-size connection pool.

pub mod config;
pub mod http;
pub mod server;

pub use config::Config;
pub use server::{Server, ServerError, ShutdownHandle};
