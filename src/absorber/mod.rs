//! Upstream absorber
//!
//! Reads an upload body frame by frame and throws it away, enforcing a
//! cumulative size ceiling (rejects) and an ingestion rate ceiling
//! (throttles). Only the frame currently being accounted is held in
//! memory.

mod rate;

pub use rate::RateWindow;

use std::fmt::Display;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper::header::{HeaderMap, CONTENT_LENGTH};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;
use crate::{BloatError, Result};

/// Ceilings applied to every upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Maximum cumulative body size in bytes
    pub max_size: u64,
    /// Maximum sustained rate in bytes per second
    pub max_rate: u64,
    /// Largest slice accounted against the rate window at once
    pub granularity: usize,
    /// Rate window length
    pub check_interval: Duration,
}

impl From<&UploadConfig> for UploadLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_size: config.max_size,
            max_rate: config.max_rate,
            granularity: config.granularity,
            check_interval: config.check_interval(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

/// Summary of a completed upload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IngestReport {
    /// Bytes read and discarded
    pub total_bytes: u64,
    /// Wall time from first poll to end of body
    pub elapsed: Duration,
    /// Time spent sleeping in throttle delays
    pub throttled: Duration,
}

impl IngestReport {
    /// Overall ingestion rate in bytes per second
    #[must_use]
    pub fn bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Streaming upload sink
#[derive(Debug, Clone)]
pub struct Absorber {
    limits: UploadLimits,
}

impl Absorber {
    /// Create an absorber enforcing `limits`
    ///
    /// # Panics
    ///
    /// Panics if `max_size` or `granularity` is zero
    #[must_use]
    pub fn new(limits: UploadLimits) -> Self {
        assert!(limits.max_size > 0, "max_size must be > 0");
        assert!(limits.granularity > 0, "granularity must be > 0");

        Self { limits }
    }

    /// Configured ceilings
    #[must_use]
    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Reject a request whose declared length already exceeds the ceiling
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if `Content-Length` is above `max_size`
    pub fn check_declared_length(&self, headers: &HeaderMap) -> Result<()> {
        let declared = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok());

        match declared {
            Some(length) if length > self.limits.max_size => {
                warn!(
                    "Upload rejected before reading: declared {} bytes, limit {}",
                    length, self.limits.max_size
                );
                Err(BloatError::PayloadTooLarge {
                    size: length,
                    limit: self.limits.max_size,
                })
            }
            _ => Ok(()),
        }
    }

    /// Read `body` to the end, discarding it
    ///
    /// Stops reading as soon as the size ceiling is crossed. Rate
    /// violations only add delay.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` when the ceiling is crossed and
    /// `Ingestion` when the body stream fails
    pub async fn absorb<B>(&self, body: B) -> Result<IngestReport>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let mut body = std::pin::pin!(body);
        let started = Instant::now();
        let mut window = RateWindow::new(self.limits.max_rate, self.limits.check_interval, started);
        let mut total_bytes: u64 = 0;
        let mut throttled = Duration::ZERO;

        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(|e| {
                warn!("Upload read failed after {} bytes: {}", total_bytes, e);
                BloatError::Ingestion(format!("Failed to read body: {e}"))
            })?;

            let Ok(data) = frame.into_data() else {
                continue;
            };

            total_bytes += data.len() as u64;
            if total_bytes > self.limits.max_size {
                warn!(
                    "Upload rejected: {} bytes exceeds limit {}",
                    total_bytes, self.limits.max_size
                );
                return Err(BloatError::PayloadTooLarge {
                    size: total_bytes,
                    limit: self.limits.max_size,
                });
            }

            for slice in data.chunks(self.limits.granularity) {
                if let Some(delay) = window.record(slice.len(), Instant::now()) {
                    debug!("Throttling upload for {:?}", delay);
                    throttled += delay;
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let report = IngestReport {
            total_bytes,
            elapsed: started.elapsed(),
            throttled,
        };

        info!(
            "Received upload of {} bytes in {:.2?} ({:.1} Mbit/s, throttled {:.2?})",
            report.total_bytes,
            report.elapsed,
            report.bytes_per_sec() * 8.0 / 1_000_000.0,
            report.throttled
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use http_body_util::{Empty, Full, StreamBody};
    use hyper::body::Frame;
    use hyper::header::HeaderValue;
    use proptest::prelude::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const MIB: u64 = 1024 * 1024;

    fn limits(max_size: u64, max_rate: u64) -> UploadLimits {
        UploadLimits {
            max_size,
            max_rate,
            granularity: 64 * 1024,
            check_interval: Duration::from_millis(100),
        }
    }

    fn pieces(
        sizes: Vec<usize>,
    ) -> StreamBody<impl futures_util::Stream<Item = std::result::Result<Frame<Bytes>, Infallible>>>
    {
        StreamBody::new(stream::iter(
            sizes
                .into_iter()
                .map(|size| Ok(Frame::data(Bytes::from(vec![0u8; size])))),
        ))
    }

    #[test]
    fn test_limits_from_config() {
        let mut config = UploadConfig::default();
        config.max_size = 2 * MIB;
        config.check_interval_ms = 250;

        let absorber = Absorber::new(UploadLimits::from(&config));
        let limits = absorber.limits();
        assert_eq!(limits.max_size, 2 * MIB);
        assert_eq!(limits.max_rate, config.max_rate);
        assert_eq!(limits.granularity, config.granularity);
        assert_eq!(limits.check_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_absorb_within_ceiling() {
        let absorber = Absorber::new(limits(8 * MIB, 1024 * MIB));

        let report = absorber
            .absorb(Full::new(Bytes::from(vec![7u8; 1_000_000])))
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 1_000_000);
    }

    #[tokio::test]
    async fn test_absorb_empty_body() {
        let absorber = Absorber::new(UploadLimits::default());

        let report = absorber.absorb(Empty::<Bytes>::new()).await.unwrap();
        assert_eq!(report.total_bytes, 0);
        assert_eq!(report.throttled, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_absorb_exactly_at_ceiling() {
        let absorber = Absorber::new(limits(1000, 1024 * MIB));

        let report = absorber.absorb(pieces(vec![400, 600])).await.unwrap();
        assert_eq!(report.total_bytes, 1000);
    }

    #[tokio::test]
    async fn test_absorb_over_ceiling_rejected() {
        let absorber = Absorber::new(limits(1000, 1024 * MIB));

        let err = absorber.absorb(pieces(vec![600, 600])).await.unwrap_err();
        match err {
            BloatError::PayloadTooLarge { size, limit } => {
                assert_eq!(size, 1200);
                assert_eq!(limit, 1000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_rejection_stops_reading() {
        let absorber = Absorber::new(limits(1024, 1024 * MIB));
        let polled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&polled);

        let body = StreamBody::new(stream::iter((0..100).map(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Infallible>(Frame::data(Bytes::from(vec![0u8; 512])))
        })));

        let result = absorber.absorb(body).await;
        assert!(matches!(result, Err(BloatError::PayloadTooLarge { .. })));
        assert_eq!(polled.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_read_error_is_ingestion_failure() {
        let absorber = Absorber::new(UploadLimits::default());

        let body = StreamBody::new(stream::iter(vec![
            Ok(Frame::data(Bytes::from_static(b"partial"))),
            Err("connection reset by peer"),
        ]));

        let err = absorber.absorb(body).await.unwrap_err();
        assert_eq!(err.kind(), "ingestion_failed");
        assert!(err.to_string().contains("connection reset by peer"));
    }

    #[test]
    fn test_declared_length_check() {
        let absorber = Absorber::new(limits(8 * MIB, 100 * MIB));
        let mut headers = HeaderMap::new();

        assert!(absorber.check_declared_length(&headers).is_ok());

        headers.insert(CONTENT_LENGTH, HeaderValue::from(8 * MIB));
        assert!(absorber.check_declared_length(&headers).is_ok());

        headers.insert(CONTENT_LENGTH, HeaderValue::from(9 * MIB));
        let err = absorber.check_declared_length(&headers).unwrap_err();
        assert_eq!(err.limit(), Some(8 * MIB));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_feed_is_throttled() {
        let absorber = Absorber::new(limits(64 * MIB, 10 * MIB));

        // 5 MiB in 256 KiB pieces, available instantly
        let report = absorber.absorb(pieces(vec![256 * 1024; 20])).await.unwrap();

        assert_eq!(report.total_bytes, 5 * MIB);
        assert!(report.elapsed >= Duration::from_millis(450), "{:?}", report.elapsed);
        assert!(report.elapsed <= Duration::from_millis(550), "{:?}", report.elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_feed_is_not_delayed() {
        let absorber = Absorber::new(limits(64 * MIB, 10 * MIB));

        // 64 KiB every 50 ms is 1.25 MiB/s
        let body = StreamBody::new(stream::unfold(0, |sent| async move {
            if sent == 10 {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some((
                Ok::<_, Infallible>(Frame::data(Bytes::from(vec![0u8; 64 * 1024]))),
                sent + 1,
            ))
        }));

        let report = absorber.absorb(body).await.unwrap();
        assert_eq!(report.total_bytes, 640 * 1024);
        assert_eq!(report.throttled, Duration::ZERO);
    }

    proptest! {
        #[test]
        fn prop_total_matches_pieces(sizes in prop::collection::vec(0usize..200_000, 0..16)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap();

            let expected: u64 = sizes.iter().map(|s| *s as u64).sum();
            let absorber = Absorber::new(limits(2 * MIB, 100 * MIB));

            let result = runtime.block_on(absorber.absorb(pieces(sizes)));
            if expected <= 2 * MIB {
                prop_assert_eq!(result.unwrap().total_bytes, expected);
            } else {
                let too_large = matches!(result, Err(BloatError::PayloadTooLarge { .. }));
                prop_assert!(too_large);
            }
        }
    }
}
