use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Response, StatusCode, Url};
use std::time::Duration;

use super::download::{Error, Result};
use crate::util::parse_content_disposition;

pub const DEFAULT_USER_AGENT: &str = "updater";

/// Statuses that are worth asking again for before giving up on the handshake.
pub const RETRY_STATUSES: [StatusCode; 5] = [
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Applies to each connection attempt separately
    pub connect_timeout: Duration,
    pub max_retries: u32,
    /// Delay before the first retry, doubled for every following one
    pub backoff: Duration,
    pub headers: HeaderMap,
}

impl Default for FetchConfig {
    fn default() -> Self {
        let mut config = FetchConfig {
            connect_timeout: Duration::from_secs(2),
            max_retries: 2,
            backoff: Duration::from_secs(2),
            headers: HeaderMap::new(),
        };
        config.headers.insert(
            header::USER_AGENT,
            HeaderValue::from_static(DEFAULT_USER_AGENT),
        );
        config
    }
}

/// `base * 2^retry`, retry being 0 for the first retry.
pub fn retry_delay(retry: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}

/// HTTP session used by a download. Retries only cover getting a 200 response,
/// once the body is being streamed every error is final.
#[derive(Debug, Clone)]
pub struct FetchClient {
    client: Client,
    config: FetchConfig,
}

impl FetchClient {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(config.headers.clone())
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub async fn open_stream(&self, url: &Url) -> Result<FetchResponse> {
        let mut retry = 0u32;
        loop {
            let can_retry = retry < self.config.max_retries;
            match self.client.get(url.clone()).send().await {
                Ok(resp) if resp.status() == StatusCode::OK => {
                    return Ok(FetchResponse::new(resp));
                }
                Ok(resp) if can_retry && RETRY_STATUSES.contains(&resp.status()) => {
                    log::warn!(
                        "Request to {} answered with {}, retrying ({}/{})",
                        url,
                        resp.status(),
                        retry + 1,
                        self.config.max_retries
                    );
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::DownloadNotOk(status, body));
                }
                Err(e) if can_retry && (e.is_connect() || e.is_timeout()) => {
                    log::warn!(
                        "Connecting to {} failed: {}, retrying ({}/{})",
                        url,
                        e,
                        retry + 1,
                        self.config.max_retries
                    );
                }
                Err(e) => return Err(Error::Request(e)),
            }
            tokio::time::sleep(retry_delay(retry, self.config.backoff)).await;
            retry += 1;
        }
    }
}

/// A 200 response whose body has not been read yet.
#[derive(Debug)]
pub struct FetchResponse {
    pub status: StatusCode,
    /// 0 when the server didn't send a Content-Length
    pub content_length: u64,
    /// Suggested by the Content-Disposition header
    pub filename: Option<String>,
    pub(crate) response: Response,
}

impl FetchResponse {
    fn new(response: Response) -> Self {
        Self {
            status: response.status(),
            content_length: response.content_length().unwrap_or(0),
            filename: parse_content_disposition(response.headers()),
            response,
        }
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }
}
