//! Network seam for the fetch core.
//!
//! The fetch core only sees [`Transport`]; production wiring uses
//! [`ReqwestTransport`], tests plug in scripted transports.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

/// One outbound HTTP exchange.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The transport's own deadline elapsed.
    #[error("transport timeout")]
    Timeout,

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// Reading the response body failed.
    #[error("failed to read response body: {0}")]
    Body(String),

    /// The request could not be built (bad header, unsupported URL).
    #[error("invalid request: {0}")]
    Request(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::Request(e.to_string())
        } else if e.is_connect() || e.is_request() {
            TransportError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            TransportError::Body(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Performs a single HTTP exchange. Implementations must stop work promptly
/// once `cancel` fires.
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;
}

/// [`Transport`] backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(TransportError::from)?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: TransportRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let exchange = async {
                let response = builder.send().await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await?;
                Ok::<_, reqwest::Error>(TransportResponse { status, headers, body })
            };

            tokio::select! {
                _ = cancel.cancelled() => Err(TransportError::Cancelled),
                result = exchange => result.map_err(TransportError::from),
            }
        })
    }
}
