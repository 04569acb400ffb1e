use uuid::Uuid;
use validator::ValidateEmail;

use flowmail_types::api::{CreateCampaignRequest, CreateTemplateRequest, UpdateCampaignRequest};
use flowmail_types::models::{
    CampaignPatch, DEFAULT_BATCH_SIZE, DEFAULT_DELAY_SECS, EmailTemplate, NewCampaign,
    TemplatePatch,
};

use crate::{Error, Result};

/// Trim and check one address. The domain must contain a dot.
pub fn email_address(raw: &str) -> Result<String> {
    let address = raw.trim();
    let dotted = address
        .rsplit_once('@')
        .is_some_and(|(_, domain)| domain.contains('.'));
    if !address.validate_email() || !dotted {
        return Err(Error::Validation(format!(
            "invalid email address '{}'",
            address
        )));
    }
    Ok(address.to_string())
}

fn positive(field: &str, value: Option<u32>, default: u32) -> Result<u32> {
    match value {
        Some(0) => Err(Error::Validation(format!("{} must be at least 1", field))),
        Some(v) => Ok(v),
        None => Ok(default),
    }
}

fn required(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Validate a create payload. Recipients are trimmed and blank lines
/// dropped; order is preserved and defines send order.
pub fn new_campaign(req: CreateCampaignRequest) -> Result<NewCampaign> {
    let subject = required("subject", &req.subject)?;
    let flow_account = required("flowAccount", &req.flow_account)?;

    let recipients = req
        .recipients
        .iter()
        .filter(|r| !r.trim().is_empty())
        .map(|r| email_address(r))
        .collect::<Result<Vec<_>>>()?;

    if recipients.is_empty() {
        return Err(Error::Validation(
            "at least one recipient is required".into(),
        ));
    }

    let name = req
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("Campaign - {}", subject));

    Ok(NewCampaign {
        name,
        subject,
        html_content: req.html_content,
        flow_account,
        recipients,
        delay_between_emails: positive("delayBetweenEmails", req.delay_between_emails, DEFAULT_DELAY_SECS)?,
        batch_size: positive("batchSize", req.batch_size, DEFAULT_BATCH_SIZE)?,
    })
}

pub fn campaign_patch(req: UpdateCampaignRequest) -> Result<CampaignPatch> {
    let name = req.name.as_deref().map(|n| required("name", n)).transpose()?;
    let subject = req.subject.as_deref().map(|s| required("subject", s)).transpose()?;
    let flow_account = req
        .flow_account
        .as_deref()
        .map(|a| required("flowAccount", a))
        .transpose()?;
    let delay = req
        .delay_between_emails
        .map(|d| positive("delayBetweenEmails", Some(d), d))
        .transpose()?;
    let batch = req
        .batch_size
        .map(|b| positive("batchSize", Some(b), b))
        .transpose()?;

    Ok(CampaignPatch {
        name,
        subject,
        html_content: req.html_content,
        flow_account,
        delay_between_emails: delay,
        batch_size: batch,
    })
}

pub fn new_template(req: CreateTemplateRequest) -> Result<EmailTemplate> {
    Ok(EmailTemplate {
        id: Uuid::new_v4(),
        name: required("name", &req.name)?,
        subject: required("subject", &req.subject)?,
        html_content: req.html_content,
        flow_account: required("flowAccount", &req.flow_account)?,
        delay_between_emails: positive("delayBetweenEmails", req.delay_between_emails, DEFAULT_DELAY_SECS)?,
        batch_size: positive("batchSize", req.batch_size, DEFAULT_BATCH_SIZE)?,
    })
}

pub fn template_patch(patch: TemplatePatch) -> Result<TemplatePatch> {
    if patch.delay_between_emails == Some(0) || patch.batch_size == Some(0) {
        return Err(Error::Validation(
            "delayBetweenEmails and batchSize must be at least 1".into(),
        ));
    }
    Ok(TemplatePatch {
        name: patch.name.as_deref().map(|n| required("name", n)).transpose()?,
        subject: patch.subject.as_deref().map(|s| required("subject", s)).transpose()?,
        flow_account: patch
            .flow_account
            .as_deref()
            .map(|a| required("flowAccount", a))
            .transpose()?,
        ..patch
    })
}
