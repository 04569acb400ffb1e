//! The campaign dispatch loop.
//!
//! A tick is one attempted send for one campaign: load, pick
//! `recipients[processed_count]`, resolve the flow account, post, then
//! record the result and advance the cursor in one store call. A
//! per-campaign async lock keeps at most one tick (and so at most one
//! outstanding webhook request) in flight per campaign, whichever driver
//! invokes it.
//!
//! Store calls are synchronous and may block on a database lock, so the
//! async paths here run them on the blocking pool.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use flowmail_types::api::ConnectionTestResponse;
use flowmail_types::models::{
    Campaign, CampaignStatus, EmailResult, NewEmailResult, ResultStatus,
};

use crate::store::{AccountDirectory, CampaignStore};
use crate::webhook::WebhookSender;
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub enum TickOutcome {
    /// One recipient was attempted. `campaign` reflects the advanced cursor
    /// and is already `completed` if that was the last recipient.
    Sent {
        campaign: Campaign,
        result: EmailResult,
    },
    /// The cursor was already exhausted; the campaign is now `completed`.
    Completed(Campaign),
    /// The flow account did not resolve; the campaign is now `stopped`.
    Halted { campaign: Campaign, reason: String },
    /// Nothing to do: the campaign is missing or not running.
    Idle { status: Option<CampaignStatus> },
}

impl TickOutcome {
    /// Whether a driver should schedule another tick.
    pub fn should_continue(&self) -> bool {
        match self {
            Self::Sent { campaign, .. } => {
                campaign.status == CampaignStatus::Running && !campaign.is_exhausted()
            }
            _ => false,
        }
    }

    pub fn campaign(&self) -> Option<&Campaign> {
        match self {
            Self::Sent { campaign, .. } | Self::Completed(campaign) | Self::Halted { campaign, .. } => {
                Some(campaign)
            }
            Self::Idle { .. } => None,
        }
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    campaigns: Arc<dyn CampaignStore>,
    accounts: Arc<dyn AccountDirectory>,
    sender: WebhookSender,
    /// campaign_id -> lock held for the duration of a tick
    in_flight: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        accounts: Arc<dyn AccountDirectory>,
        sender: WebhookSender,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                campaigns,
                accounts,
                sender,
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn campaigns(&self) -> &Arc<dyn CampaignStore> {
        &self.inner.campaigns
    }

    pub fn accounts(&self) -> &Arc<dyn AccountDirectory> {
        &self.inner.accounts
    }

    pub fn sender(&self) -> &WebhookSender {
        &self.inner.sender
    }

    fn campaign_lock(&self, id: Uuid) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .inner
            .in_flight
            .lock()
            .map_err(|e| Error::Storage(anyhow::anyhow!("dispatch lock map poisoned: {}", e)))?;
        Ok(locks.entry(id).or_default().clone())
    }

    /// Drop the per-campaign lock entries of campaigns that are gone.
    pub fn forget(&self, ids: &[Uuid]) {
        if let Ok(mut locks) = self.inner.in_flight.lock() {
            for id in ids {
                locks.remove(id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_locks(&self) -> usize {
        self.inner.in_flight.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    /// Run a campaign store call on the blocking pool.
    pub async fn with_campaigns<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CampaignStore) -> Result<T> + Send + 'static,
    {
        let store = self.inner.campaigns.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| Error::Storage(anyhow::anyhow!("store task failed: {}", e)))?
    }

    pub async fn load(&self, id: Uuid) -> Result<Option<Campaign>> {
        self.with_campaigns(move |store| store.get_campaign(id)).await
    }

    async fn resolve(&self, flow_account: &str) -> Result<Option<String>> {
        let accounts = self.inner.accounts.clone();
        let name = flow_account.to_string();
        tokio::task::spawn_blocking(move || accounts.resolve(&name))
            .await
            .map_err(|e| Error::Storage(anyhow::anyhow!("account lookup failed: {}", e)))?
    }

    /// Conditional move out of `running`.
    async fn transition(&self, id: Uuid, to: CampaignStatus) -> Result<Option<Campaign>> {
        self.with_campaigns(move |store| {
            store.transition_status(id, &[CampaignStatus::Running], to)
        })
        .await
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<CampaignStatus>> {
        Ok(self.load(id).await?.map(|c| c.status))
    }

    /// Run one tick for `id`, waiting for any tick already in flight for the
    /// same campaign to finish first.
    pub async fn tick(&self, id: Uuid) -> Result<TickOutcome> {
        self.tick_expecting(id, None).await
    }

    /// Like [`tick`](Self::tick), but refuses with `Conflict` when the
    /// campaign is running and its next recipient is not `expected`. Used by
    /// the client driver so a stale client cannot skip or repeat a recipient.
    pub async fn tick_expecting(&self, id: Uuid, expected: Option<&str>) -> Result<TickOutcome> {
        let lock = self.campaign_lock(id)?;
        let _guard = lock.lock().await;

        if let Some(expected) = expected {
            if let Some(campaign) = self.load(id).await? {
                let next = campaign.next_recipient();
                if campaign.status == CampaignStatus::Running && next.is_some_and(|n| n != expected) {
                    return Err(Error::Conflict(format!(
                        "next recipient is {}, not {}",
                        next.unwrap_or_default(),
                        expected
                    )));
                }
            }
        }

        self.tick_locked(id)
            .instrument(info_span!("tick", campaign_id = %id))
            .await
    }

    async fn tick_locked(&self, id: Uuid) -> Result<TickOutcome> {
        let Some(campaign) = self.load(id).await? else {
            return Ok(TickOutcome::Idle { status: None });
        };
        if campaign.status != CampaignStatus::Running {
            return Ok(TickOutcome::Idle {
                status: Some(campaign.status),
            });
        }
        if campaign.is_exhausted() {
            return self.complete(campaign).await;
        }

        let cursor = campaign.processed_count;
        let recipient = campaign.recipients[cursor as usize].clone();

        let Some(url) = self.resolve(&campaign.flow_account).await? else {
            let reason = Error::Configuration(campaign.flow_account.clone()).to_string();
            warn!("Stopping campaign: {}", reason);
            return Ok(match self.transition(id, CampaignStatus::Stopped).await? {
                Some(campaign) => TickOutcome::Halted { campaign, reason },
                None => TickOutcome::Idle {
                    status: self.status_of(id).await?,
                },
            });
        };

        let result = match self
            .inner
            .sender
            .send(&url, &recipient, &campaign.subject, &campaign.html_content)
            .await
        {
            Ok(body) => NewEmailResult {
                email: recipient.clone(),
                status: ResultStatus::Success,
                response: body,
            },
            Err(e) => {
                warn!(recipient = %recipient, "Send failed: {}", e);
                NewEmailResult {
                    email: recipient.clone(),
                    status: ResultStatus::Failed,
                    response: e.detail(),
                }
            }
        };

        let recorded = self
            .with_campaigns(move |store| store.record_send(id, cursor, result))
            .await?;
        let Some((updated, result)) = recorded else {
            // Deleted while the request was out, or the cursor moved.
            return match self.load(id).await? {
                None => Ok(TickOutcome::Idle { status: None }),
                Some(_) => Err(Error::Concurrent(id)),
            };
        };

        debug!(
            recipient = %recipient,
            status = result.status.as_str(),
            processed = updated.processed_count,
            total = updated.total_recipients(),
            "Recorded send"
        );

        if updated.status == CampaignStatus::Running && updated.is_exhausted() {
            if let Some(done) = self.transition(id, CampaignStatus::Completed).await? {
                info!(
                    succeeded = done.success_count,
                    failed = done.failed_count,
                    "Campaign completed"
                );
                return Ok(TickOutcome::Sent {
                    campaign: done,
                    result,
                });
            }
        }

        Ok(TickOutcome::Sent {
            campaign: updated,
            result,
        })
    }

    async fn complete(&self, campaign: Campaign) -> Result<TickOutcome> {
        Ok(match self.transition(campaign.id, CampaignStatus::Completed).await? {
            Some(c) => {
                info!("Campaign completed");
                TickOutcome::Completed(c)
            }
            None => TickOutcome::Idle {
                status: self.status_of(campaign.id).await?,
            },
        })
    }

    /// Post one email outside any campaign (test sends, legacy submit).
    pub async fn send_one_off(
        &self,
        flow_account: &str,
        recipient: &str,
        subject: &str,
        html_content: &str,
    ) -> Result<String> {
        let url = self
            .resolve(flow_account)
            .await?
            .ok_or_else(|| Error::Configuration(flow_account.to_string()))?;
        let body = self
            .inner
            .sender
            .send(&url, recipient, subject, html_content)
            .await?;
        info!(recipient = %recipient, account = %flow_account, "One-off send delivered");
        Ok(body)
    }

    pub async fn test_connection(&self, flow_account: &str) -> Result<ConnectionTestResponse> {
        let url = self
            .resolve(flow_account)
            .await?
            .ok_or_else(|| Error::account_not_found(flow_account))?;
        Ok(self.inner.sender.test_connection(&url).await)
    }

    /// Tick `id` repeatedly, sleeping `delay_between_emails` before each
    /// tick, until the campaign halts or `cancel` fires. Cancellation only
    /// interrupts the sleep; a send already in flight completes.
    ///
    /// The delay is re-read every iteration so edits made while paused apply
    /// after resume.
    pub async fn drive(&self, id: Uuid, cancel: CancellationToken) -> TickOutcome {
        loop {
            let campaign = match self.load(id).await {
                Ok(Some(c)) => c,
                Ok(None) => return TickOutcome::Idle { status: None },
                Err(e) => {
                    warn!(campaign_id = %id, "Driver could not load campaign: {}", e);
                    return TickOutcome::Idle { status: None };
                }
            };
            if campaign.status != CampaignStatus::Running {
                return TickOutcome::Idle {
                    status: Some(campaign.status),
                };
            }

            let delay = Duration::from_secs(u64::from(campaign.delay_between_emails.max(1)));
            tokio::select! {
                _ = cancel.cancelled() => {
                    return TickOutcome::Idle { status: Some(campaign.status) };
                }
                _ = tokio::time::sleep(delay) => {}
            }

            match self.tick(id).await {
                Ok(outcome) if outcome.should_continue() => continue,
                Ok(outcome) => return outcome,
                Err(e) => warn!(campaign_id = %id, "Tick failed: {}", e),
            }
        }
    }
}
