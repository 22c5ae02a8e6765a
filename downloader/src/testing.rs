//! axum server for tests, serves a scripted list of responses.
//! The n-th request gets the n-th response, the last response is repeated once the
//! script runs out.

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Bytes, StreamBody};
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures_util::{stream, StreamExt};
use reqwest::Url;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct TestResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    content_length: Option<u64>,
    piece: usize,
    delay: Duration,
}

impl TestResponse {
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            content_length: Some(body.len() as u64),
            body,
            piece: usize::MAX,
            delay: Duration::ZERO,
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            ..Self::ok(body.as_bytes().to_vec())
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Streams the body in pieces of `piece` bytes, sleeping `delay` before each one.
    pub fn trickle(mut self, piece: usize, delay: Duration) -> Self {
        self.piece = piece.max(1);
        self.delay = delay;
        self
    }

    /// Announce a different Content-Length than the body actually has.
    pub fn content_length(mut self, length: u64) -> Self {
        self.content_length = Some(length);
        self
    }

    /// Chunked body without Content-Length.
    pub fn without_content_length(mut self) -> Self {
        self.content_length = None;
        self
    }
}

impl IntoResponse for TestResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let delay = self.delay;
        let pieces: Vec<Bytes> = self
            .body
            .chunks(self.piece)
            .map(Bytes::copy_from_slice)
            .collect();
        let body = StreamBody::new(stream::iter(pieces).then(move |piece| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, std::io::Error>(piece)
        }));
        let mut response = (status, body).into_response();
        let headers = response.headers_mut();
        if let Some(length) = self.content_length {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
        }
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }
        response
    }
}

#[derive(Clone)]
struct Script {
    responses: Arc<Vec<TestResponse>>,
    hits: Arc<AtomicUsize>,
}

async fn scripted(State(script): State<Script>) -> TestResponse {
    let n = script.hits.fetch_add(1, Ordering::SeqCst);
    script.responses[n.min(script.responses.len() - 1)].clone()
}

pub struct TestServer {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start(responses: Vec<TestResponse>) -> std::io::Result<Self> {
        assert!(!responses.is_empty(), "TestServer needs at least one response");
        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let hits = Arc::new(AtomicUsize::new(0));
        let script = Script {
            responses: Arc::new(responses),
            hits: hits.clone(),
        };
        let app = Router::new().fallback(scripted).with_state(script);
        let server = axum::Server::from_tcp(listener)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
            .serve(app.into_make_service());
        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                log::warn!("Test server stopped: {}", e);
            }
        });
        log::info!("Test server listening on {}", addr);
        Ok(Self { addr, hits, task })
    }

    pub fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).expect("valid test url")
    }

    /// Number of requests received so far
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
