//! Hub REST 客户端
//!
//! `HubApi` 是同步引擎、连接管理器与委托模式共用的接缝；`HttpHubClient`
//! 用 reqwest 实现，每个调用点都带着显式的 `RetryPolicy`。

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use super::protocol::{
    ChatRequest, DeviceInfo, DeviceRegistration, HubStreamEvent, Identity, RemoteMessage,
    RemoteSession, SkillDescriptor,
};
use super::retry::{with_retry, RetryPolicy};
use super::HubError;

/// 委托模式的事件流
pub type HubEventStream = Pin<Box<dyn Stream<Item = Result<HubStreamEvent, HubError>> + Send>>;

/// 追加到远端会话的消息
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessageUpload {
    pub role: String,
    pub content: String,
    /// 本地消息 ID，Hub 据此去重
    pub client_message_id: String,
    pub sequence: i64,
}

#[async_trait]
pub trait HubApi: Send + Sync {
    async fn health(&self) -> Result<(), HubError>;

    async fn whoami(&self) -> Result<Identity, HubError>;

    /// 注册设备，返回 Hub 分配（或确认）的设备 ID
    async fn register_device(&self, device: &DeviceInfo) -> Result<String, HubError>;

    async fn create_session(
        &self,
        title: &str,
        client_session_id: &str,
    ) -> Result<RemoteSession, HubError>;

    async fn list_sessions(&self) -> Result<Vec<RemoteSession>, HubError>;

    async fn get_session(&self, remote_id: &str) -> Result<RemoteSession, HubError>;

    async fn update_session(&self, remote_id: &str, title: &str) -> Result<(), HubError>;

    async fn delete_session(&self, remote_id: &str) -> Result<(), HubError>;

    async fn append_message(&self, remote_id: &str, message: &MessageUpload) -> Result<(), HubError>;

    async fn list_messages(&self, remote_id: &str) -> Result<Vec<RemoteMessage>, HubError>;

    /// 打开委托模式对话流（Hub 执行工具）
    async fn chat_stream(&self, request: &ChatRequest) -> Result<HubEventStream, HubError>;

    async fn register_skills(
        &self,
        device_id: Option<&str>,
        skills: &[SkillDescriptor],
    ) -> Result<(), HubError>;

    async fn heartbeat(&self, device_id: Option<&str>) -> Result<(), HubError>;
}

pub struct HttpHubClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    health_timeout: Duration,
    retry: RetryPolicy,
}

impl HttpHubClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        request_timeout: Duration,
        health_timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, HubError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HubError::Transport(format!("http client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
            health_timeout,
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, HubError> {
        let token = self.token.as_deref().ok_or(HubError::MissingToken)?;
        Ok(self
            .http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(token))
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, HubError> {
        let response = check_status(builder.send().await?).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| HubError::Protocol(format!("decode: {e}")))
    }

    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), HubError> {
        check_status(builder.send().await?).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, HubError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("detail").or_else(|| v.get("error")).cloned())
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .unwrap_or(body);
    Err(HubError::from_status(status.as_u16(), message))
}

#[async_trait]
impl HubApi for HttpHubClient {
    async fn health(&self) -> Result<(), HubError> {
        let url = format!("{}/health", self.base_url);
        let call = self.http.get(&url).timeout(self.health_timeout).send();
        match tokio::time::timeout(self.health_timeout, call).await {
            Ok(result) => {
                check_status(result?).await?;
                Ok(())
            }
            Err(_) => Err(HubError::Timeout(format!(
                "health probe exceeded {}s",
                self.health_timeout.as_secs()
            ))),
        }
    }

    async fn whoami(&self) -> Result<Identity, HubError> {
        with_retry(&self.retry, "whoami", || async move {
            self.send_json(self.request(Method::GET, "/auth/me")?).await
        })
        .await
    }

    async fn register_device(&self, device: &DeviceInfo) -> Result<String, HubError> {
        let registration: DeviceRegistration = with_retry(&self.retry, "register_device", || async move {
            self.send_json(self.request(Method::POST, "/devices/register")?.json(device))
                .await
        })
        .await?;
        Ok(registration.device_id)
    }

    async fn create_session(
        &self,
        title: &str,
        client_session_id: &str,
    ) -> Result<RemoteSession, HubError> {
        let body = json!({ "title": title, "client_session_id": client_session_id });
        let body = &body;
        with_retry(&self.retry, "create_session", || async move {
            self.send_json(self.request(Method::POST, "/sessions")?.json(body))
                .await
        })
        .await
    }

    async fn list_sessions(&self) -> Result<Vec<RemoteSession>, HubError> {
        with_retry(&self.retry, "list_sessions", || async move {
            self.send_json(self.request(Method::GET, "/sessions")?).await
        })
        .await
    }

    async fn get_session(&self, remote_id: &str) -> Result<RemoteSession, HubError> {
        let path = format!("/sessions/{remote_id}");
        let path = path.as_str();
        with_retry(&self.retry, "get_session", || async move {
            self.send_json(self.request(Method::GET, path)?).await
        })
        .await
    }

    async fn update_session(&self, remote_id: &str, title: &str) -> Result<(), HubError> {
        let path = format!("/sessions/{remote_id}");
        let path = path.as_str();
        let body = json!({ "title": title });
        let body = &body;
        with_retry(&self.retry, "update_session", || async move {
            self.send_empty(self.request(Method::PATCH, path)?.json(body))
                .await
        })
        .await
    }

    async fn delete_session(&self, remote_id: &str) -> Result<(), HubError> {
        let path = format!("/sessions/{remote_id}");
        let path = path.as_str();
        with_retry(&self.retry, "delete_session", || async move {
            self.send_empty(self.request(Method::DELETE, path)?).await
        })
        .await
    }

    async fn append_message(&self, remote_id: &str, message: &MessageUpload) -> Result<(), HubError> {
        let path = format!("/sessions/{remote_id}/messages");
        let path = path.as_str();
        with_retry(&self.retry, "append_message", || async move {
            self.send_empty(self.request(Method::POST, path)?.json(message))
                .await
        })
        .await
    }

    async fn list_messages(&self, remote_id: &str) -> Result<Vec<RemoteMessage>, HubError> {
        let path = format!("/sessions/{remote_id}/messages");
        let path = path.as_str();
        with_retry(&self.retry, "list_messages", || async move {
            self.send_json(self.request(Method::GET, path)?).await
        })
        .await
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<HubEventStream, HubError> {
        let response = with_retry(&self.retry, "chat_stream", || async move {
            let builder = self
                .request(Method::POST, "/chat/completions")?
                .header("Accept", "text/event-stream")
                .json(request);
            check_status(builder.send().await?).await
        })
        .await?;
        Ok(decode_event_stream(response))
    }

    async fn register_skills(
        &self,
        device_id: Option<&str>,
        skills: &[SkillDescriptor],
    ) -> Result<(), HubError> {
        let body = json!({ "device_id": device_id, "skills": skills });
        let body = &body;
        with_retry(&self.retry, "register_skills", || async move {
            self.send_empty(self.request(Method::POST, "/skills/register")?.json(body))
                .await
        })
        .await
    }

    async fn heartbeat(&self, device_id: Option<&str>) -> Result<(), HubError> {
        let body = json!({ "device_id": device_id });
        self.send_empty(self.request(Method::POST, "/skills/heartbeat")?.json(&body))
            .await
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, reqwest::Error>> + Send>>;

/// 把 SSE 响应体拆成事件：按行缓冲，只取 `data:` 行
fn decode_event_stream(response: Response) -> HubEventStream {
    let bytes: ByteStream = Box::pin(response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())));

    let stream = futures_util::stream::unfold(
        (bytes, Vec::<u8>::new(), false),
        |(mut bytes, mut buffer, finished)| async move {
            loop {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    if let Some(event) = parse_sse_line(&String::from_utf8_lossy(&line)) {
                        return Some((event, (bytes, buffer, finished)));
                    }
                    continue;
                }
                if finished {
                    // 结尾没有换行的残行
                    let rest = String::from_utf8_lossy(&buffer).into_owned();
                    buffer.clear();
                    return parse_sse_line(&rest).map(|event| (event, (bytes, buffer, true)));
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(HubError::from(e)), (bytes, Vec::new(), true)));
                    }
                    None => {
                        return match parse_remaining(&mut buffer) {
                            Some(event) => Some((event, (bytes, buffer, true))),
                            None => None,
                        };
                    }
                }
            }
        },
    );

    Box::pin(stream)
}

fn parse_remaining(buffer: &mut Vec<u8>) -> Option<Result<HubStreamEvent, HubError>> {
    let rest = String::from_utf8_lossy(buffer).into_owned();
    buffer.clear();
    parse_sse_line(&rest)
}

/// 解析单行 SSE；注释、空行与非 data 行返回 None
pub(crate) fn parse_sse_line(line: &str) -> Option<Result<HubStreamEvent, HubError>> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))?
        .trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(HubStreamEvent::Done {
            variant: None,
            is_fallback: None,
        }));
    }
    Some(
        serde_json::from_str::<HubStreamEvent>(data)
            .map_err(|e| HubError::Protocol(format!("bad stream event: {e}"))),
    )
}
