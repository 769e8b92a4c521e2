use std::time::Duration;

use async_trait::async_trait;
use futures_util::TryStreamExt;
use http::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::config::{Config, HttpCfg};
use crate::error::{ChatStreamError, CoreResult};
use crate::model::{ChatHistory, ChatRequest, ChatSummary, Envelope};
use crate::transport::{ByteStream, ChatTransport};

/// Header the backend reads the session token from.
pub const AUTH_HEADER: &str = "x-auth-token";

/// Thin wrapper around reqwest::Client bound to one backend.
///
/// The client itself has no total timeout so a streaming body can stay open
/// for as long as the reply takes; plain JSON calls apply `request_timeout`
/// per request.
#[derive(Debug)]
pub struct HttpClient {
    inner: Client,
    base_url: Url,
    token: Option<SecretString>,
    request_timeout: Duration,
    user_agent: String,
}

impl HttpClient {
    pub fn new(
        base_url: impl Into<String>,
        http: &HttpCfg,
        token: Option<SecretString>,
    ) -> CoreResult<Self> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_millis(http.connect_timeout_ms));
        if let Some(n) = http.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let base_url = base_url.into();
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            ChatStreamError::Validation(format!("invalid base_url '{base_url}': {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(ChatStreamError::Validation(format!(
                "base_url '{base_url}' cannot carry a path"
            )));
        }
        let inner = builder
            .build()
            .map_err(|e| ChatStreamError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            base_url,
            token,
            request_timeout: Duration::from_millis(http.request_timeout_ms),
            user_agent: concat!("chatstream/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        Self::new(cfg.base_url.clone(), &cfg.http, cfg.auth_token())
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Base URL with `segments` appended, each percent-encoded as one path segment.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn chat_endpoint(&self, chat_id: &str) -> CoreResult<Url> {
        let id = chat_id.trim();
        if id.is_empty() || id == "." || id == ".." {
            return Err(ChatStreamError::Validation(format!("invalid chat id '{chat_id}'")));
        }
        Ok(self.endpoint(&["chats", id]))
    }

    fn prepare(&self, req: RequestBuilder) -> RequestBuilder {
        let req = req.header(USER_AGENT, &self.user_agent);
        match &self.token {
            Some(token) => req.header(AUTH_HEADER, token.expose_secret()),
            None => req,
        }
    }

    /// Send and turn transport failures and non-success statuses into errors.
    async fn send(&self, req: RequestBuilder) -> CoreResult<Response> {
        let resp = self
            .prepare(req)
            .send()
            .await
            .map_err(|e| ChatStreamError::Unavailable {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let ra = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, ra, &body));
        }
        Ok(resp)
    }

    async fn decode_json<R: DeserializeOwned>(resp: Response) -> CoreResult<R> {
        let status = resp.status();
        resp.json::<R>()
            .await
            .map_err(|e| ChatStreamError::Decode(format!("json decode error ({status}): {e}")))
    }

    pub async fn get_json<R: DeserializeOwned>(&self, url: Url) -> CoreResult<R> {
        let req = self.inner.get(url).timeout(self.request_timeout);
        let resp = self.send(req).await?;
        Self::decode_json(resp).await
    }

    pub async fn delete_json<R: DeserializeOwned>(&self, url: Url) -> CoreResult<R> {
        let req = self.inner.delete(url).timeout(self.request_timeout);
        let resp = self.send(req).await?;
        Self::decode_json(resp).await
    }

    /// `GET /chats`
    pub async fn list_chats(&self) -> CoreResult<Vec<ChatSummary>> {
        let env: Envelope<Vec<ChatSummary>> = self.get_json(self.endpoint(&["chats"])).await?;
        Ok(env.data)
    }

    /// `GET /chats/:id`
    pub async fn chat_history(&self, chat_id: &str) -> CoreResult<ChatHistory> {
        let url = self.chat_endpoint(chat_id)?;
        let env: Envelope<serde_json::Value> = self.get_json(url).await?;
        if !env.data.get("messages").is_some_and(|m| m.is_array()) {
            return Err(ChatStreamError::Decode("invalid response format".into()));
        }
        serde_json::from_value(env.data).map_err(|e| ChatStreamError::Decode(e.to_string()))
    }

    /// `DELETE /chats/:id`; returns the backend's acknowledgement as-is.
    pub async fn delete_chat(&self, chat_id: &str) -> CoreResult<serde_json::Value> {
        let url = self.chat_endpoint(chat_id)?;
        self.delete_json(url).await
    }
}

#[async_trait]
impl ChatTransport for HttpClient {
    async fn open_stream(&self, req: &ChatRequest) -> CoreResult<ByteStream> {
        let builder = self
            .inner
            .post(self.endpoint(&["chat"]))
            .header(ACCEPT, "text/event-stream")
            .json(req);
        let resp = self.send(builder).await?;
        tracing::debug!(status = resp.status().as_u16(), "chat stream opened");

        let body = resp
            .bytes_stream()
            .map_err(|e| ChatStreamError::Unavailable {
                reason: format!("stream interrupted: {e}"),
            });
        Ok(Box::pin(body))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get(reqwest::header::RETRY_AFTER)
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    // HTTP-date forms are ignored.
    None
}

fn map_http_error(status: StatusCode, retry_after: Option<u64>, body: &str) -> ChatStreamError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatStreamError::RateLimited { retry_after },
        s if s.is_server_error() => ChatStreamError::Unavailable {
            reason: format!("status {}", s.as_u16()),
        },
        s => ChatStreamError::Status {
            code: s.as_u16(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut t = s[..end].to_string();
    t.push_str("...");
    t
}
