use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use fitclub_shared::types::{
    ApiErrorResponse, ApiResponse, BatchOutcome, ChangeEvent, CountResponse, NotificationRecord, Platform,
    RegisterTokenResponse, RegisteredResponse, RegistrationOutcome, RemovedResponse,
};

use crate::backend::{ChangeFeedSource, ChangeStream, FeedSignal, NotificationBackend, PushTokenBackend};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Talks to the notification service over HTTP. The caller is identified by
/// the bearer token, so `user_id` arguments only feed logging.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    stream_client: Client,
    base_url: String,
    access_token: Arc<RwLock<Option<String>>>,
}

#[derive(Serialize)]
struct RegisterTokenBody<'a> {
    token: &'a str,
    platform: Platform,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> ClientResult<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let client = Client::builder().timeout(timeout).build()?;
        // the change stream stays open, so only connecting is bounded
        let stream_client = Client::builder().connect_timeout(timeout).build()?;
        Ok(Self {
            client,
            stream_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    /// Set or clear the bearer token. Without one every call fails fast with
    /// `NotAuthenticated`.
    pub fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write() = token;
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> ClientResult<RequestBuilder> {
        match self.access_token.read().as_deref() {
            Some(token) => Ok(request.bearer_auth(token)),
            None => Err(ClientError::NotAuthenticated),
        }
    }

    async fn send<T: DeserializeOwned + Serialize>(&self, request: RequestBuilder) -> ClientResult<T> {
        let response = self.authorized(request)?.send().await?;
        let bytes = check_status(response).await?.bytes().await?;
        let body: ApiResponse<T> = serde_json::from_slice(&bytes)?;
        Ok(body.into_data())
    }
}

/// Map a non-2xx response onto `ClientError::Api`, keeping the service's
/// error code when the body carries one.
async fn check_status(response: Response) -> ClientResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let bytes = response.bytes().await?;
    let (code, message) = match serde_json::from_slice::<ApiErrorResponse>(&bytes) {
        Ok(body) => (body.error.code, body.error.message),
        Err(_) => (
            status.as_u16().to_string(),
            String::from_utf8_lossy(&bytes).into_owned(),
        ),
    };
    Err(ClientError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl NotificationBackend for HttpBackend {
    async fn list(&self, tenant_id: Uuid, _user_id: Uuid) -> ClientResult<Vec<NotificationRecord>> {
        self.send(self.client.get(self.url("/notifications")).query(&[("tenant_id", tenant_id)]))
            .await
    }

    async fn unread_count(&self, tenant_id: Uuid, _user_id: Uuid) -> ClientResult<usize> {
        let body: CountResponse = self
            .send(self.client.get(self.url("/notifications/unread-count")).query(&[("tenant_id", tenant_id)]))
            .await?;
        Ok(body.count)
    }

    async fn mark_read(&self, notification_id: Uuid, _user_id: Uuid) -> ClientResult<()> {
        self.send(self.client.post(self.url(&format!("/notifications/{notification_id}/read"))))
            .await
    }

    async fn mark_all_read(&self, tenant_id: Uuid, _user_id: Uuid) -> ClientResult<BatchOutcome> {
        self.send(self.client.post(self.url("/notifications/mark-all-read")).query(&[("tenant_id", tenant_id)]))
            .await
    }

    async fn delete(&self, notification_id: Uuid, _user_id: Uuid) -> ClientResult<()> {
        self.send(self.client.delete(self.url(&format!("/notifications/{notification_id}"))))
            .await
    }

    async fn delete_all(&self, tenant_id: Uuid, _user_id: Uuid) -> ClientResult<BatchOutcome> {
        self.send(self.client.delete(self.url("/notifications")).query(&[("tenant_id", tenant_id)]))
            .await
    }
}

#[async_trait]
impl PushTokenBackend for HttpBackend {
    async fn register_token(&self, user_id: Uuid, token: &str, platform: Platform) -> ClientResult<RegistrationOutcome> {
        let body: RegisterTokenResponse = self
            .send(self.client.post(self.url("/push-tokens")).json(&RegisterTokenBody { token, platform }))
            .await?;
        tracing::debug!(user_id = %user_id, outcome = ?body.outcome, "push token registered over http");
        Ok(body.outcome)
    }

    async fn is_token_registered(&self, _user_id: Uuid, token: &str) -> ClientResult<bool> {
        let body: RegisteredResponse = self
            .send(self.client.get(self.url("/push-tokens/check")).query(&[("token", token)]))
            .await?;
        Ok(body.registered)
    }

    async fn remove_token(&self, _user_id: Uuid, token: &str) -> ClientResult<bool> {
        let body: RemovedResponse = self
            .send(self.client.delete(self.url("/push-tokens")).query(&[("token", token)]))
            .await?;
        Ok(body.removed)
    }

    async fn remove_all_tokens(&self, _user_id: Uuid) -> ClientResult<bool> {
        let body: RemovedResponse = self.send(self.client.delete(self.url("/push-tokens/all"))).await?;
        Ok(body.removed)
    }
}

/// One parsed Server-Sent Events frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser. Chunks may split frames, lines,
/// or UTF-8 sequences anywhere. Line endings may be `\r\n`, `\r` or `\n`.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    /// Bytes of `buf` already known not to hold a frame boundary.
    scanned: usize,
    after_cr: bool,
}

impl SseParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buf.push(b'\n');
                    self.after_cr = true;
                }
                // second half of a CRLF, possibly split across chunks
                b'\n' if self.after_cr => self.after_cr = false,
                _ => {
                    self.buf.push(byte);
                    self.after_cr = false;
                }
            }
        }

        let mut frames = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].windows(2).position(|w| w == b"\n\n") {
            let end = self.scanned + offset + 2;
            let raw: Vec<u8> = self.buf.drain(..end).collect();
            self.scanned = 0;
            if let Some(frame) = parse_frame(&String::from_utf8_lossy(&raw)) {
                frames.push(frame);
            }
        }
        self.scanned = self.buf.len().saturating_sub(1);
        frames
    }
}

fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut data_lines = Vec::new();

    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => frame.event = Some(value.to_string()),
            "id" => frame.id = Some(value.to_string()),
            "data" => data_lines.push(value),
            _ => {}
        }
    }

    if frame.event.is_none() && data_lines.is_empty() {
        return None;
    }
    frame.data = data_lines.join("\n");
    Some(frame)
}

fn to_signal(frame: SseFrame) -> Option<FeedSignal> {
    match frame.event.as_deref() {
        Some("created" | "updated" | "deleted") => match serde_json::from_str::<ChangeEvent>(&frame.data) {
            Ok(change) => Some(FeedSignal::Change(change)),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable change frame, resyncing");
                Some(FeedSignal::Resync)
            }
        },
        Some("resync") => Some(FeedSignal::Resync),
        other => {
            tracing::debug!(event = ?other, "ignoring sse frame");
            None
        }
    }
}

#[async_trait]
impl ChangeFeedSource for HttpBackend {
    async fn subscribe(&self, tenant_id: Uuid) -> ClientResult<ChangeStream> {
        let request = self
            .stream_client
            .get(self.url("/notifications/stream"))
            .query(&[("tenant_id", tenant_id)])
            .header(reqwest::header::ACCEPT, "text/event-stream");
        let request = self.authorized(request)?;
        let response = check_status(request.send().await?).await?;

        tracing::info!(tenant_id = %tenant_id, "change stream opened");

        let mut body = response.bytes_stream();
        let stream = async_stream::stream! {
            let mut parser = SseParser::default();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        for frame in parser.push(&bytes) {
                            if let Some(signal) = to_signal(frame) {
                                yield signal;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "change stream interrupted");
                        break;
                    }
                }
            }
        };

        Ok(stream.boxed())
    }
}
