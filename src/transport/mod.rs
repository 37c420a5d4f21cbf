//! HTTP plumbing between the engine and a provider.
//!
//! [`TransportClient::send`] runs each exchange on its own tokio task and
//! waits on a oneshot channel for the decoded result. The sender is consumed
//! exactly once: by the result, or by being dropped when the task ends any
//! other way, so a failure inside the decoder can never leave the caller
//! waiting. The wait itself is bounded by the read timeout.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{ProviderError, TransportError};
use crate::llm::{Decoded, ResponseDecoder};

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    /// JSON body; `Null` for requests without one.
    pub body: Value,
}

impl HttpRequest {
    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: Vec::new(),
            body,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: Value::Null,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct HttpReply {
    pub status: u16,
    pub body: ByteStream,
}

impl std::fmt::Debug for HttpReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReply")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl HttpReply {
    pub fn new(status: u16, body: ByteStream) -> Self {
        Self { status, body }
    }

    pub fn full(status: u16, body: impl Into<Bytes>) -> Self {
        Self::chunked(status, [body.into()])
    }

    pub fn chunked<I, B>(status: u16, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let chunks = chunks
            .into_iter()
            .map(|chunk| Ok(chunk.into()))
            .collect::<Vec<Result<Bytes, TransportError>>>();
        Self::new(status, stream::iter(chunks).boxed())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body into a string, replacing invalid UTF-8.
    pub async fn text(mut self) -> Result<String, TransportError> {
        let mut buffer = Vec::new();
        while let Some(chunk) = self.body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpReply, TransportError>;
}

/// reqwest-backed transport: JSON POST or bare GET, streamed response body.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_connect_timeout(Duration::from_secs(10))
    }

    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|err| TransportError::Client(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpReply, TransportError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url).json(&request.body),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| TransportError::Body(err.to_string())))
            .boxed();

        Ok(HttpReply::new(status, body))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { after: Duration },
    GiveUp,
}

/// Decides whether a failed send (no response received) is attempted again.
pub trait RetryHandler: Send + Sync {
    /// `attempt` counts the retries already made for this request.
    fn on_transport_error(&self, error: &TransportError, attempt: u32) -> RetryDecision;
}

/// Retries a connection failure exactly once, immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetryOnce;

impl RetryHandler for RetryOnce {
    fn on_transport_error(&self, error: &TransportError, attempt: u32) -> RetryDecision {
        match error {
            TransportError::Connect(_) if attempt == 0 => RetryDecision::Retry {
                after: Duration::ZERO,
            },
            _ => RetryDecision::GiveUp,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Delivery {
    Complete(Decoded),
    TimedOut { partial: String },
}

#[derive(Clone)]
pub struct TransportClient {
    transport: Arc<dyn Transport>,
    retry: Arc<dyn RetryHandler>,
    timeout: Duration,
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TransportClient {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            retry: Arc::new(RetryOnce),
            timeout,
        }
    }

    pub fn with_retry_handler(mut self, handler: Arc<dyn RetryHandler>) -> Self {
        self.retry = handler;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn send(
        &self,
        request: HttpRequest,
        decoder: Box<dyn ResponseDecoder>,
    ) -> Result<Delivery, ProviderError> {
        let decoder = Arc::new(Mutex::new(decoder));
        let (sender, receiver) = oneshot::channel();

        let transport = self.transport.clone();
        let retry = self.retry.clone();
        let task_decoder = decoder.clone();
        debug!(url = %request.url, "dispatching provider request");

        let task = tokio::spawn(async move {
            let outcome = exchange(transport.as_ref(), retry.as_ref(), request, &task_decoder).await;
            // the receiver is gone if the wait already timed out
            let _ = sender.send(outcome);
        });

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(outcome)) => outcome.map(Delivery::Complete),
            Ok(Err(_)) => Err(ProviderError::Task),
            Err(_) => {
                task.abort();
                let partial = decoder
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .partial_text();
                warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    partial_len = partial.len(),
                    "provider response timed out; returning partial text"
                );
                Ok(Delivery::TimedOut { partial })
            }
        }
    }

    /// Sends `request` and drains the reply, bounded by the read timeout.
    /// A non-2xx reply is `ProviderError::Status`.
    pub async fn check_reachable(&self, request: HttpRequest) -> Result<(), ProviderError> {
        debug!(url = %request.url, "checking provider connection");
        let exchange = async {
            let reply =
                execute_with_retry(self.transport.as_ref(), self.retry.as_ref(), request).await?;
            let status = reply.status;
            let success = reply.is_success();
            let body = reply.text().await?;
            if success {
                Ok(())
            } else {
                Err(ProviderError::Status { status, body })
            }
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => Err(TransportError::Connect(format!(
                "no reply within {} ms",
                self.timeout.as_millis()
            ))
            .into()),
        }
    }
}

async fn exchange(
    transport: &dyn Transport,
    retry: &dyn RetryHandler,
    request: HttpRequest,
    decoder: &Mutex<Box<dyn ResponseDecoder>>,
) -> Result<Decoded, ProviderError> {
    let reply = execute_with_retry(transport, retry, request).await?;

    if !reply.is_success() {
        let status = reply.status;
        let body = match reply.text().await {
            Ok(body) => body,
            Err(err) => format!("<body unavailable: {err}>"),
        };
        return Err(ProviderError::Status { status, body });
    }

    let mut body = reply.body;
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let mut guard = decoder.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(decoded) = guard.feed(&chunk)? {
            return Ok(decoded);
        }
    }

    decoder
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .finish()
}

async fn execute_with_retry(
    transport: &dyn Transport,
    retry: &dyn RetryHandler,
    request: HttpRequest,
) -> Result<HttpReply, ProviderError> {
    let mut attempt = 0;
    loop {
        match transport.execute(request.clone()).await {
            Ok(reply) => return Ok(reply),
            Err(err) => match retry.on_transport_error(&err, attempt) {
                RetryDecision::Retry { after } => {
                    warn!(attempt, error = %err, "transport failure; retrying request");
                    if !after.is_zero() {
                        tokio::time::sleep(after).await;
                    }
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(err.into()),
            },
        }
    }
}
