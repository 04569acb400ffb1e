use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use uuid::Uuid;

use flowmail_types::models::{
    Campaign, CampaignPatch, CampaignStatus, EmailResult, EmailTemplate, NewCampaign,
    NewEmailResult, ResultStatus, TemplatePatch,
};

use crate::store::{AccountDirectory, CampaignStore, TemplateStore};
use crate::{Error, Result};

/// In-process backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    campaigns: Vec<Campaign>,
    results: Vec<EmailResult>,
    accounts: BTreeMap<String, String>,
    templates: Vec<EmailTemplate>,
}

impl MemoryInner {
    fn campaign_mut(&mut self, id: Uuid) -> Option<&mut Campaign> {
        self.campaigns.iter_mut().find(|c| c.id == id)
    }

    fn remove_campaigns(&mut self, ids: &[Uuid]) {
        self.campaigns.retain(|c| !ids.contains(&c.id));
        self.results.retain(|r| !ids.contains(&r.campaign_id));
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| Error::Storage(anyhow::anyhow!("memory store lock poisoned: {}", e)))
    }
}

impl CampaignStore for MemoryStore {
    fn create_campaign(&self, new: NewCampaign) -> Result<Campaign> {
        let campaign = Campaign {
            id: Uuid::new_v4(),
            name: new.name,
            subject: new.subject,
            html_content: new.html_content,
            flow_account: new.flow_account,
            recipients: new.recipients,
            delay_between_emails: new.delay_between_emails,
            batch_size: new.batch_size,
            status: CampaignStatus::Draft,
            processed_count: 0,
            success_count: 0,
            failed_count: 0,
            created_at: Utc::now(),
        };
        self.lock()?.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    fn get_campaign(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.lock()?.campaigns.iter().find(|c| c.id == id).cloned())
    }

    fn list_campaigns(&self) -> Result<Vec<Campaign>> {
        Ok(self.lock()?.campaigns.clone())
    }

    fn list_campaigns_by_status(&self, status: CampaignStatus) -> Result<Vec<Campaign>> {
        Ok(self
            .lock()?
            .campaigns
            .iter()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    fn update_campaign(&self, id: Uuid, patch: &CampaignPatch) -> Result<Option<Campaign>> {
        let mut inner = self.lock()?;
        Ok(inner.campaign_mut(id).map(|c| {
            patch.apply(c);
            c.clone()
        }))
    }

    fn transition_status(
        &self,
        id: Uuid,
        from: &[CampaignStatus],
        to: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut inner = self.lock()?;
        Ok(inner
            .campaign_mut(id)
            .filter(|c| from.contains(&c.status))
            .map(|c| {
                c.status = to;
                c.clone()
            }))
    }

    fn delete_campaign(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let existed = inner.campaigns.iter().any(|c| c.id == id);
        inner.remove_campaigns(&[id]);
        Ok(existed)
    }

    fn delete_finished_campaigns_for_account(&self, flow_account: &str) -> Result<Vec<Uuid>> {
        let mut inner = self.lock()?;
        let finished: Vec<Uuid> = inner
            .campaigns
            .iter()
            .filter(|c| c.flow_account == flow_account && c.status.is_terminal())
            .map(|c| c.id)
            .collect();
        inner.remove_campaigns(&finished);
        Ok(finished)
    }

    fn record_send(
        &self,
        id: Uuid,
        expected_processed: u32,
        result: NewEmailResult,
    ) -> Result<Option<(Campaign, EmailResult)>> {
        let mut inner = self.lock()?;
        let Some(campaign) = inner.campaign_mut(id) else {
            return Ok(None);
        };
        if campaign.processed_count != expected_processed {
            return Ok(None);
        }

        campaign.processed_count += 1;
        match result.status {
            ResultStatus::Success => campaign.success_count += 1,
            ResultStatus::Failed => campaign.failed_count += 1,
        }
        let updated = campaign.clone();

        let row = EmailResult {
            id: Uuid::new_v4(),
            campaign_id: id,
            email: result.email,
            status: result.status,
            response: result.response,
            timestamp: Utc::now(),
        };
        inner.results.push(row.clone());
        Ok(Some((updated, row)))
    }

    fn list_results(&self, campaign_id: Uuid) -> Result<Vec<EmailResult>> {
        Ok(self
            .lock()?
            .results
            .iter()
            .filter(|r| r.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    fn clear_results(&self, campaign_id: Uuid) -> Result<usize> {
        let mut inner = self.lock()?;
        let before = inner.results.len();
        inner.results.retain(|r| r.campaign_id != campaign_id);
        Ok(before - inner.results.len())
    }

    fn reconcile_counts(&self, id: Uuid) -> Result<Option<Campaign>> {
        let mut inner = self.lock()?;
        let (mut success, mut failed) = (0u32, 0u32);
        for r in inner.results.iter().filter(|r| r.campaign_id == id) {
            match r.status {
                ResultStatus::Success => success += 1,
                ResultStatus::Failed => failed += 1,
            }
        }
        Ok(inner.campaign_mut(id).map(|c| {
            c.success_count = success;
            c.failed_count = failed;
            c.processed_count = success + failed;
            c.clone()
        }))
    }
}

impl AccountDirectory for MemoryStore {
    fn list_accounts(&self) -> Result<BTreeMap<String, String>> {
        Ok(self.lock()?.accounts.clone())
    }

    fn create_account(&self, name: &str, url: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.accounts.contains_key(name) {
            return Err(Error::Conflict("Account name already exists".into()));
        }
        inner.accounts.insert(name.to_string(), url.to_string());
        Ok(())
    }

    fn update_account(&self, name: &str, new_name: &str, url: &str) -> Result<()> {
        let mut inner = self.lock()?;
        if !inner.accounts.contains_key(name) {
            return Err(Error::account_not_found(name));
        }
        if name != new_name {
            if inner.accounts.contains_key(new_name) {
                return Err(Error::Conflict(format!(
                    "Account name \"{}\" already exists",
                    new_name
                )));
            }
            inner.accounts.remove(name);
        }
        inner.accounts.insert(new_name.to_string(), url.to_string());
        Ok(())
    }

    fn delete_account(&self, name: &str) -> Result<()> {
        self.lock()?
            .accounts
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::account_not_found(name))
    }

    fn resolve(&self, name: &str) -> Result<Option<String>> {
        Ok(self.lock()?.accounts.get(name).cloned())
    }
}

impl TemplateStore for MemoryStore {
    fn list_templates(&self) -> Result<Vec<EmailTemplate>> {
        Ok(self.lock()?.templates.clone())
    }

    fn get_template(&self, id: Uuid) -> Result<Option<EmailTemplate>> {
        Ok(self.lock()?.templates.iter().find(|t| t.id == id).cloned())
    }

    fn create_template(&self, template: EmailTemplate) -> Result<EmailTemplate> {
        self.lock()?.templates.push(template.clone());
        Ok(template)
    }

    fn update_template(&self, id: Uuid, patch: &TemplatePatch) -> Result<Option<EmailTemplate>> {
        let mut inner = self.lock()?;
        Ok(inner.templates.iter_mut().find(|t| t.id == id).map(|t| {
            patch.apply(t);
            t.clone()
        }))
    }

    fn delete_template(&self, id: Uuid) -> Result<bool> {
        let mut inner = self.lock()?;
        let before = inner.templates.len();
        inner.templates.retain(|t| t.id != id);
        Ok(inner.templates.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_campaign(account: &str, recipients: &[&str]) -> NewCampaign {
        NewCampaign {
            name: "Campaign".into(),
            subject: "Hello".into(),
            html_content: "<p>hi</p>".into(),
            flow_account: account.into(),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            delay_between_emails: 1,
            batch_size: 25,
        }
    }

    fn sent(email: &str, status: ResultStatus) -> NewEmailResult {
        NewEmailResult {
            email: email.into(),
            status,
            response: "ok".into(),
        }
    }

    #[test]
    fn record_send_is_conditional_on_cursor() {
        let store = MemoryStore::new();
        let c = store
            .create_campaign(new_campaign("acct", &["a@x.com", "b@x.com"]))
            .unwrap();

        let (after, result) = store
            .record_send(c.id, 0, sent("a@x.com", ResultStatus::Success))
            .unwrap()
            .unwrap();
        assert_eq!(after.processed_count, 1);
        assert_eq!(after.success_count, 1);
        assert_eq!(result.email, "a@x.com");

        // Stale cursor: nothing written.
        assert!(store
            .record_send(c.id, 0, sent("a@x.com", ResultStatus::Success))
            .unwrap()
            .is_none());
        assert_eq!(store.list_results(c.id).unwrap().len(), 1);
    }

    #[test]
    fn transition_only_from_listed_states() {
        let store = MemoryStore::new();
        let c = store.create_campaign(new_campaign("acct", &["a@x.com"])).unwrap();

        assert!(store
            .transition_status(c.id, &[CampaignStatus::Paused], CampaignStatus::Running)
            .unwrap()
            .is_none());
        let running = store
            .transition_status(c.id, &[CampaignStatus::Draft], CampaignStatus::Running)
            .unwrap()
            .unwrap();
        assert_eq!(running.status, CampaignStatus::Running);
    }

    #[test]
    fn purges_only_finished_campaigns_of_the_account() {
        let store = MemoryStore::new();
        let done = store.create_campaign(new_campaign("acct1", &["a@x.com"])).unwrap();
        let stopped = store.create_campaign(new_campaign("acct1", &["a@x.com"])).unwrap();
        let running = store.create_campaign(new_campaign("acct1", &["a@x.com"])).unwrap();
        let other = store.create_campaign(new_campaign("acct2", &["a@x.com"])).unwrap();

        store
            .record_send(done.id, 0, sent("a@x.com", ResultStatus::Success))
            .unwrap();
        store
            .transition_status(done.id, &[CampaignStatus::Draft], CampaignStatus::Completed)
            .unwrap();
        store
            .transition_status(stopped.id, &[CampaignStatus::Draft], CampaignStatus::Stopped)
            .unwrap();
        store
            .transition_status(running.id, &[CampaignStatus::Draft], CampaignStatus::Running)
            .unwrap();
        store
            .transition_status(other.id, &[CampaignStatus::Draft], CampaignStatus::Stopped)
            .unwrap();

        let purged = store.delete_finished_campaigns_for_account("acct1").unwrap();
        assert_eq!(purged, vec![done.id, stopped.id]);
        assert!(store.get_campaign(done.id).unwrap().is_none());
        assert!(store.get_campaign(stopped.id).unwrap().is_none());
        assert!(store.list_results(done.id).unwrap().is_empty());
        assert!(store.get_campaign(running.id).unwrap().is_some());
        assert!(store.get_campaign(other.id).unwrap().is_some());
    }

    #[test]
    fn reconcile_rebuilds_counters_from_results() {
        let store = MemoryStore::new();
        let c = store
            .create_campaign(new_campaign("acct", &["a@x.com", "b@x.com"]))
            .unwrap();
        store
            .record_send(c.id, 0, sent("a@x.com", ResultStatus::Success))
            .unwrap();
        store
            .record_send(c.id, 1, sent("b@x.com", ResultStatus::Failed))
            .unwrap();

        let fixed = store.reconcile_counts(c.id).unwrap().unwrap();
        assert_eq!(fixed.processed_count, 2);
        assert_eq!(fixed.success_count, 1);
        assert_eq!(fixed.failed_count, 1);
    }

    #[test]
    fn account_rename_conflicts_are_rejected() {
        let store = MemoryStore::new();
        store.create_account("a", "https://a.example").unwrap();
        store.create_account("b", "https://b.example").unwrap();

        assert!(matches!(
            store.create_account("a", "https://other.example"),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.update_account("a", "b", "https://a.example"),
            Err(Error::Conflict(_))
        ));
        assert!(matches!(
            store.update_account("missing", "c", "https://c.example"),
            Err(Error::NotFound { .. })
        ));

        store.update_account("a", "c", "https://c.example").unwrap();
        assert_eq!(store.resolve("a").unwrap(), None);
        assert_eq!(store.resolve("c").unwrap().as_deref(), Some("https://c.example"));
    }
}
