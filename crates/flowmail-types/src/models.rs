use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_DELAY_SECS: u32 = 1;
pub const DEFAULT_BATCH_SIZE: u32 = 25;

// -- Campaigns --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
        }
    }

    /// `completed` and `stopped` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown campaign status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub flow_account: String,
    pub recipients: Vec<String>,
    pub delay_between_emails: u32,
    pub batch_size: u32,
    pub status: CampaignStatus,
    pub processed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn total_recipients(&self) -> u32 {
        self.recipients.len() as u32
    }

    /// The next recipient to send to. The cursor is `processed_count`.
    pub fn next_recipient(&self) -> Option<&str> {
        self.recipients
            .get(self.processed_count as usize)
            .map(String::as_str)
    }

    pub fn is_exhausted(&self) -> bool {
        self.processed_count >= self.total_recipients()
    }
}

/// A validated campaign ready to be persisted. Always created as `draft`.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub flow_account: String,
    pub recipients: Vec<String>,
    pub delay_between_emails: u32,
    pub batch_size: u32,
}

/// Merge-style update: `Some` fields overwrite, `None` fields are kept.
#[derive(Debug, Clone, Default)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub flow_account: Option<String>,
    pub delay_between_emails: Option<u32>,
    pub batch_size: Option<u32>,
}

impl CampaignPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.subject.is_none()
            && self.html_content.is_none()
            && self.flow_account.is_none()
            && self.delay_between_emails.is_none()
            && self.batch_size.is_none()
    }

    pub fn apply(&self, campaign: &mut Campaign) {
        if let Some(name) = &self.name {
            campaign.name = name.clone();
        }
        if let Some(subject) = &self.subject {
            campaign.subject = subject.clone();
        }
        if let Some(html) = &self.html_content {
            campaign.html_content = html.clone();
        }
        if let Some(account) = &self.flow_account {
            campaign.flow_account = account.clone();
        }
        if let Some(delay) = self.delay_between_emails {
            campaign.delay_between_emails = delay;
        }
        if let Some(batch) = self.batch_size {
            campaign.batch_size = batch;
        }
    }
}

// -- Results --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Failed,
}

impl ResultStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown result status '{}'", other)),
        }
    }
}

/// One attempted send. Append-only, owned by its campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailResult {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub email: String,
    pub status: ResultStatus,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEmailResult {
    pub email: String,
    pub status: ResultStatus,
    pub response: String,
}

// -- Templates --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub flow_account: String,
    pub delay_between_emails: u32,
    pub batch_size: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub html_content: Option<String>,
    pub flow_account: Option<String>,
    pub delay_between_emails: Option<u32>,
    pub batch_size: Option<u32>,
}

impl TemplatePatch {
    pub fn apply(&self, template: &mut EmailTemplate) {
        if let Some(name) = &self.name {
            template.name = name.clone();
        }
        if let Some(subject) = &self.subject {
            template.subject = subject.clone();
        }
        if let Some(html) = &self.html_content {
            template.html_content = html.clone();
        }
        if let Some(account) = &self.flow_account {
            template.flow_account = account.clone();
        }
        if let Some(delay) = self.delay_between_emails {
            template.delay_between_emails = delay;
        }
        if let Some(batch) = self.batch_size {
            template.batch_size = batch;
        }
    }
}
