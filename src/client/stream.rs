//! Streaming response bodies.

use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use super::RateLimitInfo;
use crate::{Error, Result};

/// A successful response whose body has not been read yet.
///
/// Body reads stay bound to the dispatch's cancellation token and deadline.
pub struct ResponseStream {
    response: reqwest::Response,
    cancel: CancellationToken,
    timeout: Duration,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub rate_limit: Option<RateLimitInfo>,
}

impl ResponseStream {
    pub(crate) fn new(
        response: reqwest::Response,
        cancel: &CancellationToken,
        timeout: Duration,
    ) -> Self {
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Self {
            content_length: response.content_length(),
            rate_limit: RateLimitInfo::from_headers(response.headers()),
            content_type,
            response,
            cancel: cancel.clone(),
            timeout,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Whether the body is a gzip stream.
    pub fn is_gzip(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("gzip"))
    }

    pub fn into_response(self) -> reqwest::Response {
        self.response
    }

    /// Chunked body. Ends early on cancellation; a stalled chunk fails
    /// with the client's read timeout.
    pub fn bytes_stream(
        self,
    ) -> impl futures::Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> {
        self.response
            .bytes_stream()
            .take_until(self.cancel.cancelled_owned())
    }

    /// Whole body, within the dispatch deadline.
    pub async fn bytes(self) -> Result<bytes::Bytes> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, self.response.bytes()) => {
                result
                    .map_err(|_| Error::Timeout(self.timeout))?
                    .map_err(Error::Network)
            }
        }
    }
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseStream")
            .field("status", &self.response.status())
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("timeout", &self.timeout)
            .finish()
    }
}
