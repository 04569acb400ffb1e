//! Storage seams. The dispatcher and lifecycle controller only ever see
//! these traits; `MemoryStore` and the SQLite `Database` implement them.
//!
//! Every method is a short, synchronous critical section. Writes to one
//! campaign are atomic: a concurrent reader sees either the old or the new
//! row, never a half-applied update.

use std::collections::BTreeMap;

use uuid::Uuid;

use flowmail_types::models::{
    Campaign, CampaignPatch, CampaignStatus, EmailResult, EmailTemplate, NewCampaign,
    NewEmailResult, TemplatePatch,
};

use crate::Result;

pub trait CampaignStore: Send + Sync {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign>;

    fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// All campaigns, oldest first.
    fn list_campaigns(&self) -> Result<Vec<Campaign>>;

    fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>>;

    /// Merge `patch` into the stored campaign. `None` if it does not exist.
    fn update_campaign(&self, id: Uuid, patch: &CampaignPatch) -> Result<Option<Campaign>>;

    /// Set `status = to` only if the current status is one of `from`.
    /// Returns the updated campaign, or `None` when the campaign is missing
    /// or its status is no longer in `from`.
    fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>>;

    /// Delete a campaign together with its results.
    fn delete_campaign(&self, id: Uuid) -> Result<bool>;

    /// Delete every `completed` or `stopped` campaign of `flow_account`,
    /// results included. Returns the ids removed.
    fn delete_finished_campaigns_for_account(&self, flow_account: &str) -> Result<Vec<Uuid>>;

    /// Append one result and advance the counters in a single atomic step.
    ///
    /// Applies only while `processed_count == expected_processed`; otherwise
    /// nothing is written and `None` is returned.
    fn record_send(
        &self,
        id: Uuid,
        expected_processed: u32,
        result: NewEmailResult,
    ) -> Result<Option<(Campaign, EmailResult)>>;

    /// Results in append order.
    fn list_results(&self, campaign_id: Uuid) -> Result<Vec<EmailResult>>;

    fn clear_results(&self, campaign_id: Uuid) -> Result<usize>;

    /// Rebuild processed/success/failed from the result log.
    fn reconcile_counts(&self, id: Uuid) -> Result<Option<Campaign>>;
}

/// Named webhook destinations.
pub trait AccountDirectory: Send + Sync {
    /// Name → URL, sorted by name.
    fn list_accounts(&self) -> Result<BTreeMap<String, String>>;

    /// Fails with `Conflict` if the name is taken.
    fn create_account(&self, name: &str, url: &str) -> Result<()>;

    /// Rename and/or re-point an account. Fails with `NotFound` for an
    /// unknown `name` and `Conflict` if `new_name` is taken by another account.
    fn update_account(&self, name: &str, new_name: &str, url: &str) -> Result<()>;

    fn delete_account(&self, name: &str) -> Result<()>;

    fn resolve(&self, name: &str) -> Result<Option<String>>;
}

pub trait TemplateStore: Send + Sync {
    fn list_templates(&self) -> Result<Vec<EmailTemplate>>;

    fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplate>>;

    /// Persist a template; its `id` is assigned by the caller.
    fn create_template(&self, template: EmailTemplate) -> Result<EmailTemplate>;

    fn update_template(&self, id: Uuid, patch: &TemplatePatch) -> Result<Option<EmailTemplate>>;

    fn delete_template(&self, id: Uuid) -> Result<bool>;
}
