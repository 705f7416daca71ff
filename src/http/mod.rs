//! HTTP request handling for the static page server.
//!
//! # Architecture
//!
//! - **`connection`**: the per-connection state machine driven by the event loop
//! - **`parser`**: tokenizes the request line
//! - **`request`**: request line representation
//! - **`resolver`**: maps a request path to a file under the routes root
//! - **`response`**: status codes and rendered response heads
//! - **`writer`**: resumable transmitter for head and file body
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │  Receiving  │ ← one read per readable tick
//!        └──────┬──────┘
//!               │ request line complete (or buffer full)
//!               ▼
//!        ┌──────────────────┐
//!        │  parse/resolve   │ ← 400 / 404 / 405 / 500 or a file
//!        └──────┬───────────┘
//!               │ response prepared
//!               ▼
//!        ┌──────────────────┐
//!        │  Transmitting    │ ← head, then file chunks
//!        └──────┬───────────┘
//!               │ done or failed
//!               └─ Closed (slot released)
//! ```
//!
//! Every connection serves exactly one response.

pub mod connection;
pub mod parser;
pub mod request;
pub mod resolver;
pub mod response;
pub mod writer;
