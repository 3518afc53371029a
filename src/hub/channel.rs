//! 保活通道
//!
//! 连接管理器只依赖 `ChannelConnector` / `KeepAliveChannel` 两个 trait；
//! 生产实现是带 Bearer 头的 WebSocket。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::ChannelMessage;
use super::HubError;

#[async_trait]
pub trait KeepAliveChannel: Send {
    async fn send(&mut self, message: &ChannelMessage) -> Result<(), HubError>;

    /// 下一条消息；通道关闭返回 None。需可安全地在 select! 中取消
    async fn recv(&mut self) -> Option<Result<ChannelMessage, HubError>>;

    async fn close(&mut self);
}

#[async_trait]
pub trait ChannelConnector: Send + Sync {
    async fn open(
        &self,
        hub_url: &str,
        token: &str,
        device_id: Option<&str>,
    ) -> Result<Box<dyn KeepAliveChannel>, HubError>;
}

/// http(s)://host → ws(s)://host/ws?device_id=...
pub(crate) fn channel_url(hub_url: &str, device_id: Option<&str>) -> String {
    let base = hub_url.trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    match device_id {
        Some(id) => format!("{base}/ws?device_id={id}"),
        None => format!("{base}/ws"),
    }
}

#[derive(Debug, Default, Clone)]
pub struct WsConnector;

#[async_trait]
impl ChannelConnector for WsConnector {
    async fn open(
        &self,
        hub_url: &str,
        token: &str,
        device_id: Option<&str>,
    ) -> Result<Box<dyn KeepAliveChannel>, HubError> {
        let url = channel_url(hub_url, device_id);
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| HubError::Protocol(format!("bad channel url {url}: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| HubError::Protocol(format!("bad token header: {e}")))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| match e {
                tokio_tungstenite::tungstenite::Error::Http(response) => HubError::from_status(
                    response.status().as_u16(),
                    "channel handshake rejected".to_string(),
                ),
                other => HubError::Transport(format!("channel connect: {other}")),
            })?;

        tracing::debug!(url = %url, "Keep-alive channel opened");
        Ok(Box::new(WsChannel { stream }))
    }
}

struct WsChannel {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl KeepAliveChannel for WsChannel {
    async fn send(&mut self, message: &ChannelMessage) -> Result<(), HubError> {
        let text = message
            .to_json()
            .map_err(|e| HubError::Protocol(e.to_string()))?;
        self.stream
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| HubError::Transport(format!("channel send: {e}")))
    }

    async fn recv(&mut self) -> Option<Result<ChannelMessage, HubError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(HubError::Transport(format!("channel recv: {e}")))),
            };
            match frame {
                WsMessage::Text(text) => match ChannelMessage::from_json(&text) {
                    Ok(message) => return Some(Ok(message)),
                    Err(e) => {
                        tracing::warn!(error = %e, "Ignoring malformed channel message");
                    }
                },
                WsMessage::Close(_) => return None,
                // tungstenite 自动回复协议层 ping；二进制帧不在协议内
                _ => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "Channel close error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url() {
        assert_eq!(channel_url("http://hub:8700/", None), "ws://hub:8700/ws");
        assert_eq!(
            channel_url("https://hub.example.com", Some("dev-1")),
            "wss://hub.example.com/ws?device_id=dev-1"
        );
    }
}
