//! Request routing and response construction

use std::fmt::Display;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::Body;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, CACHE_CONTROL, CONNECTION,
    CONTENT_LENGTH, CONTENT_TYPE, PRAGMA,
};
use hyper::{Method, Request, Response, StatusCode, Version};
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::absorber::{Absorber, UploadLimits};
use crate::config::Config;
use crate::probe;
use crate::saturator::Saturator;
use crate::shutdown::ShutdownSignal;
use crate::stats::ServerStats;
use crate::BloatError;

use super::{ResponseBody, StaticAssets};

/// Latency probe route
pub const PING_PATH: &str = "/ping";

/// Download saturation route
pub const DOWNLOAD_PATH: &str = "/download";

/// Upload saturation route
pub const UPLOAD_PATH: &str = "/upload";

const OCTET_STREAM: &str = "application/octet-stream";

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: String,
    kind: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    limit: Option<u64>,
}

/// Dispatches requests to the probe, saturator, absorber or static files
#[derive(Debug)]
pub struct Router {
    saturator: Saturator,
    absorber: Absorber,
    assets: Option<StaticAssets>,
    stats: Arc<ServerStats>,
    shutdown: ShutdownSignal,
}

impl Router {
    /// Build the router for `config`
    #[must_use]
    pub fn new(config: &Config, stats: Arc<ServerStats>, shutdown: ShutdownSignal) -> Self {
        Self {
            saturator: Saturator::new(&config.download, Arc::clone(&stats)),
            absorber: Absorber::new(UploadLimits::from(&config.upload)),
            assets: config.server.static_dir.clone().map(StaticAssets::new),
            stats,
            shutdown,
        }
    }

    /// Handle one request
    pub async fn route<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        debug!("{} {}", method, path);

        let mut response = match (&method, path.as_str()) {
            (&Method::OPTIONS, _) => Self::preflight(),
            (&Method::GET | &Method::HEAD, PING_PATH) => {
                no_store(probe::respond(&self.stats).map(BodyExt::boxed_unsync))
            }
            (&Method::GET, DOWNLOAD_PATH) => self.download(),
            (&Method::POST, UPLOAD_PATH) => self.upload(request).await,
            (_, PING_PATH | DOWNLOAD_PATH | UPLOAD_PATH) => Self::method_not_allowed(&method),
            (&Method::GET | &Method::HEAD, _) => self.asset(&method, &path).await,
            _ => Self::method_not_allowed(&method),
        };

        response
            .headers_mut()
            .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        response
    }

    fn download(&self) -> Response<ResponseBody> {
        let body = self.saturator.open(self.shutdown.clone());

        let mut response = no_store(Response::new(body.boxed_unsync()));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(OCTET_STREAM));
        response
    }

    async fn upload<B>(&self, request: Request<B>) -> Response<ResponseBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let version = request.version();

        let result = match self.absorber.check_declared_length(request.headers()) {
            Ok(()) => self.absorber.absorb(request.into_body()).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(report) => {
                self.stats
                    .upload_accepted(report.total_bytes, report.throttled);

                let mut response = no_store(Self::empty_response(StatusCode::OK));
                if version < Version::HTTP_2 {
                    response
                        .headers_mut()
                        .insert(CONNECTION, HeaderValue::from_static("keep-alive"));
                }
                response
            }
            Err(e) => {
                self.stats.upload_rejected();
                if !matches!(e, BloatError::PayloadTooLarge { .. }) {
                    error!("Upload error: {}", e);
                }
                Self::error_response(&e)
            }
        }
    }

    async fn asset(&self, method: &Method, path: &str) -> Response<ResponseBody> {
        let Some(assets) = &self.assets else {
            return Self::not_found(path);
        };
        let Some(asset) = assets.load(path).await else {
            return Self::not_found(path);
        };

        let length = asset.body.len();
        let body = if method == Method::HEAD {
            Empty::new().boxed_unsync()
        } else {
            Full::new(asset.body).boxed_unsync()
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(asset.content_type));
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
        response
    }

    /// Create an empty response
    #[must_use]
    pub fn empty_response(status: StatusCode) -> Response<ResponseBody> {
        let mut response = Response::new(Empty::new().boxed_unsync());
        *response.status_mut() = status;
        response
    }

    /// Create a JSON error response
    ///
    /// The body is `{"error": <message>, "kind": <kind>}`, plus `"limit"`
    /// for policy violations.
    #[must_use]
    pub fn error_response(error: &BloatError) -> Response<ResponseBody> {
        Self::json_error(error.status(), error.kind(), error.to_string(), error.limit())
    }

    fn json_error(
        status: StatusCode,
        kind: &str,
        message: String,
        limit: Option<u64>,
    ) -> Response<ResponseBody> {
        let body = ErrorBody {
            error: message,
            kind,
            limit,
        };
        let json = serde_json::to_vec(&body).unwrap_or_default();

        let mut response = no_store(Response::new(Full::new(Bytes::from(json)).boxed_unsync()));
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        response
    }

    fn not_found(path: &str) -> Response<ResponseBody> {
        Self::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("No route for {path}"),
            None,
        )
    }

    fn method_not_allowed(method: &Method) -> Response<ResponseBody> {
        warn!("Rejected {} request", method);
        Self::json_error(
            StatusCode::METHOD_NOT_ALLOWED,
            "method_not_allowed",
            format!("Method {method} not allowed"),
            None,
        )
    }

    fn preflight() -> Response<ResponseBody> {
        let mut response = Self::empty_response(StatusCode::NO_CONTENT);
        let headers = response.headers_mut();
        headers.insert(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, HEAD, POST, OPTIONS"),
        );
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
        response
    }
}

/// Mark a response as uncacheable
fn no_store<B>(mut response: Response<B>) -> Response<B> {
    let headers = response.headers_mut();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    response
}
