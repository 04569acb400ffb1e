//! Database row types. These map directly to SQLite rows and are converted
//! into the shared models at the edge of the query layer.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use uuid::Uuid;

use flowmail_types::models::{Campaign, EmailResult, EmailTemplate};

pub const CAMPAIGN_COLUMNS: &str = "id, name, subject, html_content, flow_account, recipients, \
     delay_between_emails, batch_size, status, processed_count, success_count, failed_count, created_at";

pub const RESULT_COLUMNS: &str = "id, campaign_id, email, status, response, timestamp";

pub const TEMPLATE_COLUMNS: &str =
    "id, name, subject, html_content, flow_account, delay_between_emails, batch_size";

pub struct CampaignRow {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub flow_account: String,
    pub recipients: String,
    pub delay_between_emails: u32,
    pub batch_size: u32,
    pub status: String,
    pub processed_count: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub created_at: String,
}

impl CampaignRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            subject: row.get(2)?,
            html_content: row.get(3)?,
            flow_account: row.get(4)?,
            recipients: row.get(5)?,
            delay_between_emails: row.get(6)?,
            batch_size: row.get(7)?,
            status: row.get(8)?,
            processed_count: row.get(9)?,
            success_count: row.get(10)?,
            failed_count: row.get(11)?,
            created_at: row.get(12)?,
        })
    }

    pub fn into_campaign(self) -> Result<Campaign> {
        Ok(Campaign {
            id: parse_id(&self.id)?,
            recipients: serde_json::from_str(&self.recipients)
                .with_context(|| format!("campaign {} has malformed recipients", self.id))?,
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            created_at: parse_timestamp(&self.created_at)?,
            name: self.name,
            subject: self.subject,
            html_content: self.html_content,
            flow_account: self.flow_account,
            delay_between_emails: self.delay_between_emails,
            batch_size: self.batch_size,
            processed_count: self.processed_count,
            success_count: self.success_count,
            failed_count: self.failed_count,
        })
    }
}

pub struct EmailResultRow {
    pub id: String,
    pub campaign_id: String,
    pub email: String,
    pub status: String,
    pub response: String,
    pub timestamp: String,
}

impl EmailResultRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            campaign_id: row.get(1)?,
            email: row.get(2)?,
            status: row.get(3)?,
            response: row.get(4)?,
            timestamp: row.get(5)?,
        })
    }

    pub fn into_result(self) -> Result<EmailResult> {
        Ok(EmailResult {
            id: parse_id(&self.id)?,
            campaign_id: parse_id(&self.campaign_id)?,
            status: self.status.parse().map_err(|e: String| anyhow!(e))?,
            timestamp: parse_timestamp(&self.timestamp)?,
            email: self.email,
            response: self.response,
        })
    }
}

pub struct TemplateRow {
    pub id: String,
    pub name: String,
    pub subject: String,
    pub html_content: String,
    pub flow_account: String,
    pub delay_between_emails: u32,
    pub batch_size: u32,
}

impl TemplateRow {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            subject: row.get(2)?,
            html_content: row.get(3)?,
            flow_account: row.get(4)?,
            delay_between_emails: row.get(5)?,
            batch_size: row.get(6)?,
        })
    }

    pub fn into_template(self) -> Result<EmailTemplate> {
        Ok(EmailTemplate {
            id: parse_id(&self.id)?,
            name: self.name,
            subject: self.subject,
            html_content: self.html_content,
            flow_account: self.flow_account,
            delay_between_emails: self.delay_between_emails,
            batch_size: self.batch_size,
        })
    }
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid id in database: {}", raw))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp in database: {}", raw))?
        .with_timezone(&Utc))
}
