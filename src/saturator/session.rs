//! Per-connection download session and its response body

use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use hyper::body::{Body, Frame};
use tokio::time::Sleep;
use tracing::{debug, info};

use crate::shutdown::ShutdownSignal;
use crate::stats::ServerStats;

use super::FillBuffer;

/// What the session does next
#[derive(Debug)]
pub enum Step {
    /// Emit this chunk
    Chunk(Bytes),
    /// Cancellation observed; end the stream
    Stop,
}

/// State of one download stream
///
/// Lives exactly as long as the response body. Dropping it (client gone,
/// write error, shutdown) logs the final chunk count.
#[derive(Debug)]
pub struct DownloadSession {
    fill: FillBuffer,
    yield_every: u64,
    cancel: ShutdownSignal,
    stats: Arc<ServerStats>,
    chunks_sent: u64,
    started: Instant,
    stopped: bool,
}

impl DownloadSession {
    /// Start a session
    ///
    /// # Panics
    ///
    /// Panics if `yield_every` is 0
    #[must_use]
    pub fn new(
        fill: FillBuffer,
        yield_every: u32,
        cancel: ShutdownSignal,
        stats: Arc<ServerStats>,
    ) -> Self {
        assert!(yield_every > 0, "yield_every must be > 0");

        stats.download_started();
        debug!("Download session opened ({} byte chunks)", fill.len());

        Self {
            fill,
            yield_every: u64::from(yield_every),
            cancel,
            stats,
            chunks_sent: 0,
            started: Instant::now(),
            stopped: false,
        }
    }

    /// Check for cancellation, then hand out the next chunk
    pub fn next_step(&mut self) -> Step {
        if self.stopped || self.cancel.is_triggered() {
            self.stopped = true;
            return Step::Stop;
        }

        self.chunks_sent += 1;
        Step::Chunk(self.fill.chunk())
    }

    /// True right after every `yield_every`-th chunk
    #[must_use]
    pub fn pause_due(&self) -> bool {
        self.chunks_sent > 0 && self.chunks_sent % self.yield_every == 0
    }

    /// Chunks emitted so far
    #[must_use]
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    /// Bytes emitted so far
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.chunks_sent * self.fill.len() as u64
    }

    /// Whether cancellation has ended the stream
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

impl Drop for DownloadSession {
    fn drop(&mut self) {
        let bytes = self.bytes_sent();
        let elapsed = self.started.elapsed();
        let mbps = if elapsed.is_zero() {
            0.0
        } else {
            (bytes as f64 * 8.0) / elapsed.as_secs_f64() / 1_000_000.0
        };

        info!(
            "Download session closed: {} chunks, {} bytes in {:.2?} ({:.1} Mbit/s){}",
            self.chunks_sent,
            bytes,
            elapsed,
            mbps,
            if self.stopped { ", cancelled" } else { "" }
        );

        self.stats.download_finished(bytes);
    }
}

enum Pause {
    Sleep(Pin<Box<Sleep>>),
    Yield,
}

/// Unbounded response body repeating the fill buffer
///
/// Chunks are produced only when the connection asks for the next frame,
/// so a slow reader suspends the session instead of queueing data.
pub struct SaturatorBody {
    session: DownloadSession,
    pause_for: Duration,
    pause: Option<Pause>,
}

impl SaturatorBody {
    /// Wrap a session
    #[must_use]
    pub fn new(session: DownloadSession, pause_for: Duration) -> Self {
        Self {
            session,
            pause_for,
            pause: None,
        }
    }

    /// The underlying session
    #[must_use]
    pub fn session(&self) -> &DownloadSession {
        &self.session
    }
}

impl fmt::Debug for SaturatorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaturatorBody")
            .field("session", &self.session)
            .field("pause_for", &self.pause_for)
            .field("paused", &self.pause.is_some())
            .finish()
    }
}

impl Body for SaturatorBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        match this.pause.as_mut() {
            Some(Pause::Sleep(sleep)) => {
                ready!(sleep.as_mut().poll(cx));
                this.pause = None;
            }
            Some(Pause::Yield) => {
                this.pause = None;
                cx.waker().wake_by_ref();
                return Poll::Pending;
            }
            None => {}
        }

        match this.session.next_step() {
            Step::Stop => Poll::Ready(None),
            Step::Chunk(chunk) => {
                if this.session.pause_due() {
                    this.pause = Some(if this.pause_for.is_zero() {
                        Pause::Yield
                    } else {
                        Pause::Sleep(Box::pin(tokio::time::sleep(this.pause_for)))
                    });
                }
                Poll::Ready(Some(Ok(Frame::data(chunk))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.session.is_stopped()
    }
}
