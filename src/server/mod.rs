//! HTTP surface for Bloatprobe
//!
//! Accepts TCP (optionally TLS) connections, serves HTTP/1.1 or HTTP/2
//! and routes requests to the probe, the saturator and the absorber.

mod assets;
mod connection_limit;
mod listener;
mod router;
mod tls;

pub use assets::{Asset, StaticAssets};
pub use connection_limit::{ConnectionLimit, ConnectionPermit};
pub use listener::{Server, ServerHandle};
pub use router::{Router, DOWNLOAD_PATH, PING_PATH, UPLOAD_PATH};
pub use tls::load_acceptor;

use std::convert::Infallible;

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;

/// Body type shared by every response
pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// Maximum number of concurrent connections
pub const MAX_CONNECTIONS: usize = 4096;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
