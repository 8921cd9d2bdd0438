//! HTTP transport backed by `reqwest`.

use futures::StreamExt;
use reqwest::header::{
    HeaderName, ACCEPT_RANGES, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RANGE,
};
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use super::metadata::resolve_filename;
use super::{
    BoxFuture, ResourceInfo, Transport, TransportConfig, TransportError, TransportResponse,
};
use crate::model::{ByteRange, RequestHeaders};

/// Streaming HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    /// Wraps an existing client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn apply_headers(builder: RequestBuilder, headers: &RequestHeaders) -> RequestBuilder {
        headers
            .pairs()
            .into_iter()
            .fold(builder, |b, (name, value)| b.header(name, value))
    }

    fn connection_error(url: &str, e: reqwest::Error) -> TransportError {
        TransportError::Connection {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

impl Transport for ReqwestTransport {
    fn request<'a>(
        &'a self,
        url: &'a str,
        range: Option<ByteRange>,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<TransportResponse, TransportError>> {
        Box::pin(async move {
            let mut builder = Self::apply_headers(self.client.get(url), headers);
            if let Some(range) = range {
                builder = builder.header(RANGE, range.header_value());
            }

            let response = builder
                .send()
                .await
                .map_err(|e| Self::connection_error(url, e))?;

            let status = response.status().as_u16();
            let content_length = response.content_length();
            debug!(url, status, ?range, ?content_length, "range request answered");

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| TransportError::Stream(e.to_string())));

            Ok(TransportResponse {
                status,
                content_length,
                body: Box::pin(body),
            })
        })
    }

    fn probe<'a>(
        &'a self,
        url: &'a str,
        headers: &'a RequestHeaders,
    ) -> BoxFuture<'a, Result<ResourceInfo, TransportError>> {
        Box::pin(async move {
            let response = Self::apply_headers(self.client.head(url), headers)
                .send()
                .await
                .map_err(|e| Self::connection_error(url, e))?;

            if !response.status().is_success() {
                return Err(TransportError::Status {
                    status: response.status().as_u16(),
                    url: url.to_string(),
                });
            }

            let header = |name: HeaderName| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            };

            let total_size = header(CONTENT_LENGTH)
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|size| *size > 0);
            let accepts_ranges = header(ACCEPT_RANGES)
                .map(|v| v.eq_ignore_ascii_case("bytes"))
                .unwrap_or(false);
            let filename = Some(resolve_filename(
                header(CONTENT_DISPOSITION).as_deref(),
                url,
            ));
            let content_type = header(CONTENT_TYPE);

            debug!(url, ?total_size, accepts_ranges, ?filename, "probed resource");

            Ok(ResourceInfo {
                total_size,
                accepts_ranges,
                filename,
                content_type,
            })
        })
    }
}
