use serde::{Deserialize, Serialize};

use crate::models::{Campaign, CampaignStatus};

// -- Campaigns --

/// Body of `POST /campaigns`. Everything except the counters and status is
/// supplied by the client; missing optional fields take their defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub name: Option<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub html_content: String,
    #[serde(default)]
    pub flow_account: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub delay_between_emails: Option<u32>,
    pub batch_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct UpdateCampaignRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub flow_account: Option<String>,
    pub delay_between_emails: Option<u32>,
    pub batch_size: Option<u32>,
}

/// Progress snapshot rendered by polling clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignProgress {
    pub status: CampaignStatus,
    pub total: u32,
    pub processed: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub remaining: u32,
    pub percent_complete: u32,
    pub success_rate: u32,
}

impl From<&Campaign> for CampaignProgress {
    fn from(c: &Campaign) -> Self {
        let total = c.total_recipients();
        let processed = c.processed_count.min(total);
        let percent = |part: u32, whole: u32| {
            if whole == 0 {
                0
            } else {
                ((part as f64 / whole as f64) * 100.0).round() as u32
            }
        };
        Self {
            status: c.status,
            total,
            processed,
            succeeded: c.success_count,
            failed: c.failed_count,
            remaining: total - processed,
            percent_complete: percent(processed, total),
            success_rate: percent(c.success_count, processed),
        }
    }
}

/// Body of `POST /campaigns/:id/send-email`. When `email` is present it must
/// match the campaign's next recipient.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendEmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEmailResponse {
    /// "success", "failed", "completed", "stopped" or "idle".
    pub status: String,
    pub email: Option<String>,
    pub response: Option<String>,
    pub campaign: Option<Campaign>,
}

// -- Flow accounts --

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountRequest {
    pub name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountRequest {
    pub new_name: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestConnectionRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResponse {
    /// "success" or "failed".
    pub status: String,
    pub data: serde_json::Value,
}

// -- One-off sends --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestEmailRequest {
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub html_content: String,
    pub flow_account: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub flow_account: String,
    pub email: String,
    pub subject: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OneOffSendResponse {
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub response: serde_json::Value,
}

// -- Templates --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateRequest {
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub html_content: String,
    pub flow_account: String,
    pub delay_between_emails: Option<u32>,
    pub batch_size: Option<u32>,
}

// -- Generic --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}
