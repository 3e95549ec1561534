//! Generic webhook channel.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, header::HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::{ChannelSink, DeliveryError};
use crate::Result;
use crate::domain::{ChannelKind, ChannelTarget};
use crate::notification::message::NotificationMessage;
use crate::utils::http_client::build_client;

/// Webhook channel configuration. The destination URL comes from each
/// subscription's channel target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Custom headers.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Authentication type.
    pub auth: Option<WebhookAuth>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_timeout() -> u64 {
    30
}

/// Webhook authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WebhookAuth {
    /// Bearer token authentication.
    Bearer { token: String },
    /// Basic authentication.
    Basic { username: String, password: String },
    /// Custom header authentication.
    Header { name: String, value: String },
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            auth: None,
            timeout_secs: default_timeout(),
        }
    }
}

/// Delivers notifications as JSON `POST`s.
pub struct WebhookSink {
    config: WebhookConfig,
    client: Client,
}

impl WebhookSink {
    pub fn new(config: WebhookConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(config.timeout_secs), None)?;
        Ok(Self { config, client })
    }

    /// Build the request headers.
    fn build_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        for (name, value) in &self.config.headers {
            if let (Ok(name), Ok(value)) = (
                name.parse::<reqwest::header::HeaderName>(),
                value.parse::<reqwest::header::HeaderValue>(),
            ) {
                headers.insert(name, value);
            }
        }

        match &self.config.auth {
            Some(WebhookAuth::Bearer { token }) => {
                if let Ok(value) = format!("Bearer {}", token).parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, value);
                }
            }
            Some(WebhookAuth::Header { name, value }) => {
                if let (Ok(name), Ok(value)) = (
                    name.parse::<reqwest::header::HeaderName>(),
                    value.parse::<reqwest::header::HeaderValue>(),
                ) {
                    headers.insert(name, value);
                }
            }
            // Applied on the request builder.
            Some(WebhookAuth::Basic { .. }) | None => {}
        }

        headers
    }

    fn build_payload(&self, message: &NotificationMessage) -> serde_json::Value {
        json!({
            "title": message.title,
            "body": message.body,
            "link": message.link,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }
}

#[async_trait]
impl ChannelSink for WebhookSink {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Webhook
    }

    async fn send(
        &self,
        destination: &ChannelTarget,
        message: &NotificationMessage,
    ) -> std::result::Result<(), DeliveryError> {
        let ChannelTarget::Webhook { url } = destination else {
            return Err(DeliveryError::InvalidTarget(format!(
                "webhook sink cannot deliver to {}",
                destination.kind()
            )));
        };
        let url = Url::parse(url)
            .map_err(|e| DeliveryError::InvalidTarget(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DeliveryError::InvalidTarget(format!(
                "unsupported scheme {}",
                url.scheme()
            )));
        }

        let mut request = self
            .client
            .post(url)
            .headers(self.build_headers())
            .json(&self.build_payload(message));

        if let Some(WebhookAuth::Basic { username, password }) = &self.config.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout(Duration::from_secs(self.config.timeout_secs))
            } else {
                DeliveryError::from(e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Webhook failed: {} - {}", status, body);
            return Err(DeliveryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!("Webhook notification sent: {}", message.title);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Received = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn receive(
        State(received): State<Received>,
        headers: AxumHeaders,
        axum::Json(body): axum::Json<serde_json::Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        received.lock().unwrap().push((auth, body));
        StatusCode::OK
    }

    async fn spawn_receiver() -> (String, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route("/hook", post(receive))
            .route("/fail", post(|| async { (StatusCode::BAD_GATEWAY, "down") }))
            .with_state(received.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), received)
    }

    fn message() -> NotificationMessage {
        NotificationMessage {
            title: "acme/widget release v4".to_string(),
            body: "notes".to_string(),
            link: Some("https://example.com/v4".to_string()),
        }
    }

    #[test]
    fn test_webhook_config_default() {
        let config = WebhookConfig::default();
        assert!(config.headers.is_empty());
        assert!(config.auth.is_none());
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_build_headers_with_bearer() {
        let sink = WebhookSink::new(WebhookConfig {
            auth: Some(WebhookAuth::Bearer {
                token: "test-token".to_string(),
            }),
            headers: vec![("X-Relay".to_string(), "1".to_string())],
            ..Default::default()
        })
        .unwrap();
        let headers = sink.build_headers();

        assert!(headers.contains_key(reqwest::header::AUTHORIZATION));
        assert!(headers.contains_key("x-relay"));
    }

    #[tokio::test]
    async fn test_send_posts_json() {
        let (base, received) = spawn_receiver().await;
        let sink = WebhookSink::new(WebhookConfig {
            auth: Some(WebhookAuth::Bearer {
                token: "t0k".to_string(),
            }),
            ..Default::default()
        })
        .unwrap();

        sink.send(
            &ChannelTarget::Webhook {
                url: format!("{base}/hook"),
            },
            &message(),
        )
        .await
        .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0.as_deref(), Some("Bearer t0k"));
        assert_eq!(received[0].1["title"], "acme/widget release v4");
        assert_eq!(received[0].1["link"], "https://example.com/v4");
    }

    #[tokio::test]
    async fn test_send_failures() {
        let (base, _) = spawn_receiver().await;
        let sink = WebhookSink::new(WebhookConfig::default()).unwrap();

        let err = sink
            .send(
                &ChannelTarget::Webhook {
                    url: format!("{base}/fail"),
                },
                &message(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 502, .. }));

        let err = sink
            .send(
                &ChannelTarget::Webhook {
                    url: "not a url".to_string(),
                },
                &message(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidTarget(_)));

        let err = sink
            .send(
                &ChannelTarget::Email {
                    address: "ops@example.com".to_string(),
                },
                &message(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidTarget(_)));
    }
}
