//! Downstream saturator
//!
//! Streams the shared fill buffer to a client for as long as the
//! connection stays open. Each stream checks the shutdown signal before
//! every chunk and pauses every `yield_every` chunks so cancellation is
//! observed within a bounded number of chunks.

mod fill;
mod session;

pub use fill::FillBuffer;
pub use session::{DownloadSession, SaturatorBody, Step};

use std::sync::Arc;
use std::time::Duration;

use crate::config::DownloadConfig;
use crate::shutdown::ShutdownSignal;
use crate::stats::ServerStats;

/// Factory for download streams sharing one fill buffer
#[derive(Debug, Clone)]
pub struct Saturator {
    fill: FillBuffer,
    yield_every: u32,
    yield_pause: Duration,
    stats: Arc<ServerStats>,
}

impl Saturator {
    /// Allocate the fill buffer described by `config`
    #[must_use]
    pub fn new(config: &DownloadConfig, stats: Arc<ServerStats>) -> Self {
        Self {
            fill: FillBuffer::new(config.chunk_size),
            yield_every: config.yield_every,
            yield_pause: config.yield_pause(),
            stats,
        }
    }

    /// Start a new stream that ends when `cancel` fires or the body is dropped
    #[must_use]
    pub fn open(&self, cancel: ShutdownSignal) -> SaturatorBody {
        let session = DownloadSession::new(
            self.fill.clone(),
            self.yield_every,
            cancel,
            Arc::clone(&self.stats),
        );
        SaturatorBody::new(session, self.yield_pause)
    }

    /// The shared fill buffer
    #[must_use]
    pub fn fill(&self) -> &FillBuffer {
        &self.fill
    }
}
