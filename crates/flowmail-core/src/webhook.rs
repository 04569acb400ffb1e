//! Outbound webhook calls to flow accounts.
//!
//! One POST per logical send, no retries. Outcomes are classified so the
//! dispatcher can record them as `success` or `failed` results.

use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{Instrument, debug, info_span, warn};

use flowmail_types::api::ConnectionTestResponse;

/// Response bodies longer than this are truncated before being stored.
const MAX_BODY_BYTES: usize = 4096;

const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: concat!("flowmail/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("Request failed with status code {status}")]
    Status { status: u16, body: String },

    #[error("invalid webhook client configuration: {0}")]
    Client(String),
}

impl DeliveryError {
    /// Text stored on a failed result.
    pub fn detail(&self) -> String {
        match self {
            Self::Status { body, .. } if !body.is_empty() => format!("{}: {}", self, body),
            _ => self.to_string(),
        }
    }
}

/// JSON body posted to the flow endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload<'a> {
    pub sender_email: &'a str,
    pub email_subject: &'a str,
    pub email_description: &'a str,
}

#[derive(Debug, Clone)]
pub struct WebhookSender {
    client: reqwest::Client,
    config: WebhookConfig,
}

impl WebhookSender {
    pub fn new(config: WebhookConfig) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| DeliveryError::Client(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn with_defaults() -> Result<Self, DeliveryError> {
        Self::new(WebhookConfig::default())
    }

    /// Post one email to `url`. Returns the response body on a 2xx.
    pub async fn send(
        &self,
        url: &str,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<String, DeliveryError> {
        let payload = WebhookPayload {
            sender_email: recipient,
            email_subject: subject,
            email_description: html_content,
        };
        let span = info_span!("webhook_send", recipient = %recipient);

        async move {
            let response = self
                .client
                .post(url)
                .json(&payload)
                .send()
                .await
                .map_err(|e| self.classify(e))?;

            let status = response.status();
            let body = read_body(response).await;

            if status.is_success() {
                debug!(status = status.as_u16(), "webhook accepted");
                Ok(body)
            } else {
                warn!(status = status.as_u16(), "webhook rejected");
                Err(DeliveryError::Status {
                    status: status.as_u16(),
                    body,
                })
            }
        }
        .instrument(span)
        .await
    }

    /// Post a connection-test payload with a fixed 10s timeout.
    pub async fn test_connection(&self, url: &str) -> ConnectionTestResponse {
        let body = serde_json::json!({
            "test": "connection test",
            "timestamp": Utc::now().to_rfc3339(),
        });

        let outcome = self
            .client
            .post(url)
            .timeout(CONNECTION_TEST_TIMEOUT)
            .json(&body)
            .send()
            .await;

        match outcome {
            Ok(response) => {
                let ok = response.status().is_success();
                let data = body_value(read_body(response).await);
                ConnectionTestResponse {
                    status: if ok { "success" } else { "failed" }.to_string(),
                    data,
                }
            }
            Err(e) => {
                warn!("Connection test to {} failed: {}", url, e);
                ConnectionTestResponse {
                    status: "failed".to_string(),
                    data: serde_json::Value::String(self.classify(e).to_string()),
                }
            }
        }
    }

    fn classify(&self, e: reqwest::Error) -> DeliveryError {
        if e.is_timeout() {
            DeliveryError::Timeout(self.config.timeout.as_secs())
        } else if e.is_connect() {
            DeliveryError::Network(format!("connection failed: {}", e))
        } else {
            DeliveryError::Network(e.to_string())
        }
    }
}

/// Parse a body as JSON, falling back to the raw text.
pub fn body_value(body: String) -> serde_json::Value {
    serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body))
}

async fn read_body(response: reqwest::Response) -> String {
    match response.text().await {
        Ok(text) => truncate(text, MAX_BODY_BYTES),
        Err(e) => format!("<unreadable body: {}>", e),
    }
}

fn truncate(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut cut = max;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        let text = "é".repeat(10);
        let cut = truncate(text, 5);
        assert_eq!(cut.len(), 4);
    }

    #[test]
    fn status_failure_detail_includes_body() {
        let err = DeliveryError::Status {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.to_string(), "Request failed with status code 500");
        assert_eq!(err.detail(), "Request failed with status code 500: boom");
    }

    #[tokio::test]
    async fn posts_the_flow_payload() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/flow"))
            .and(body_json(serde_json::json!({
                "senderEmail": "a@x.com",
                "emailSubject": "Hi",
                "emailDescription": "<p>x</p>",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("queued"))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::with_defaults().unwrap();
        let body = sender
            .send(&format!("{}/flow", server.uri()), "a@x.com", "Hi", "<p>x</p>")
            .await
            .unwrap();
        assert_eq!(body, "queued");
    }

    #[tokio::test]
    async fn server_errors_are_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let sender = WebhookSender::with_defaults().unwrap();
        let err = sender
            .send(&server.uri(), "a@x.com", "Hi", "")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn slow_endpoints_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(WebhookConfig {
            timeout: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let err = sender
            .send(&server.uri(), "a@x.com", "Hi", "")
            .await
            .unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(_)));
    }

    #[tokio::test]
    async fn connection_test_reports_json_data() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let sender = WebhookSender::with_defaults().unwrap();
        let report = sender.test_connection(&server.uri()).await;
        assert_eq!(report.status, "success");
        assert_eq!(report.data["ok"], true);
    }
}
