//! Campaign lifecycle controller.
//!
//! ```text
//! draft ──start──▶ running ──pause──▶ paused
//!                   │  ▲                 │
//!                   │  └─────start───────┘
//!                   ├──stop──▶ stopped ◀──stop── paused
//!                   └──(cursor exhausted)──▶ completed
//! ```
//!
//! Status writes are conditional on the status read just before them, so a
//! concurrent transition or dispatcher completion is detected and the
//! request is re-evaluated against the fresh state.

use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};
use uuid::Uuid;

use flowmail_types::api::{CampaignProgress, CreateCampaignRequest, UpdateCampaignRequest};
use flowmail_types::models::{Campaign, CampaignStatus, EmailResult};

use crate::dispatch::{Dispatcher, TickOutcome};
use crate::scheduler::Scheduler;
use crate::validation;
use crate::{Error, Result};

const TRANSITION_ATTEMPTS: usize = 3;

/// Which actor advances running campaigns. Exactly one per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverMode {
    /// A per-campaign task armed on start, ticking every `delayBetweenEmails`.
    Interval,
    /// A periodic trigger running `batchSize` ticks per campaign per firing.
    Cron,
    /// The API client posts `send-email` once per recipient.
    Client,
}

impl DriverMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Interval => "interval",
            Self::Cron => "cron",
            Self::Client => "client",
        }
    }
}

impl fmt::Display for DriverMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(Self::Interval),
            "cron" => Ok(Self::Cron),
            "client" => Ok(Self::Client),
            other => Err(format!("unknown driver '{}' (expected interval, cron or client)", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Pause,
    Stop,
}

impl Action {
    fn verb(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Stop => "stop",
        }
    }

    /// `Ok(None)` means the campaign is already where the action would put it.
    fn target(self, from: CampaignStatus) -> Result<Option<CampaignStatus>> {
        use CampaignStatus::*;
        match (self, from) {
            (Self::Start, Draft | Paused) => Ok(Some(Running)),
            (Self::Start, Running) => Ok(None),
            (Self::Pause, Running) => Ok(Some(Paused)),
            (Self::Pause, Paused) => Ok(None),
            (Self::Stop, Running | Paused) => Ok(Some(Stopped)),
            (Self::Stop, Stopped | Completed) => Ok(None),
            _ => Err(Error::InvalidTransition {
                action: self.verb(),
                from,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Lifecycle {
    dispatcher: Dispatcher,
    mode: DriverMode,
    scheduler: Option<Scheduler>,
}

impl Lifecycle {
    pub fn new(dispatcher: Dispatcher, mode: DriverMode) -> Self {
        let scheduler = (mode == DriverMode::Interval).then(|| Scheduler::new(dispatcher.clone()));
        Self {
            dispatcher,
            mode,
            scheduler,
        }
    }

    pub fn mode(&self) -> DriverMode {
        self.mode
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> Option<&Scheduler> {
        self.scheduler.as_ref()
    }

    // -- CRUD --

    /// Validate and persist a new draft. Finished campaigns of the same
    /// flow account are purged first, so at most the newest run's history
    /// is kept per account.
    pub fn create(&self, req: CreateCampaignRequest) -> Result<Campaign> {
        let new = validation::new_campaign(req)?;
        let store = self.dispatcher.campaigns();

        let purged = store.delete_finished_campaigns_for_account(&new.flow_account)?;
        if !purged.is_empty() {
            self.dispatcher.forget(&purged);
            info!(account = %new.flow_account, "Purged {} finished campaign(s)", purged.len());
        }

        let campaign = store.create_campaign(new)?;
        info!(
            campaign_id = %campaign.id,
            recipients = campaign.recipients.len(),
            "Campaign created"
        );
        Ok(campaign)
    }

    pub fn get(&self, id: Uuid) -> Result<Campaign> {
        self.dispatcher
            .campaigns()
            .get_campaign(id)?
            .ok_or_else(|| Error::campaign_not_found(id))
    }

    pub fn list(&self) -> Result<Vec<Campaign>> {
        self.dispatcher.campaigns().list_campaigns()
    }

    /// Edit a draft or paused campaign. Recipients and counters are fixed.
    pub fn update(&self, id: Uuid, req: UpdateCampaignRequest) -> Result<Campaign> {
        let patch = validation::campaign_patch(req)?;
        let current = self.get(id)?;
        if !matches!(current.status, CampaignStatus::Draft | CampaignStatus::Paused) {
            return Err(Error::InvalidTransition {
                action: "edit",
                from: current.status,
            });
        }
        if patch.is_empty() {
            return Ok(current);
        }
        self.dispatcher
            .campaigns()
            .update_campaign(id, &patch)?
            .ok_or_else(|| Error::campaign_not_found(id))
    }

    pub fn delete(&self, id: Uuid) -> Result<()> {
        self.disarm(id);
        if !self.dispatcher.campaigns().delete_campaign(id)? {
            return Err(Error::campaign_not_found(id));
        }
        self.dispatcher.forget(&[id]);
        info!(campaign_id = %id, "Campaign deleted");
        Ok(())
    }

    // -- Transitions --

    pub fn start(&self, id: Uuid) -> Result<Campaign> {
        self.transition(id, Action::Start)
    }

    pub fn pause(&self, id: Uuid) -> Result<Campaign> {
        self.transition(id, Action::Pause)
    }

    pub fn stop(&self, id: Uuid) -> Result<Campaign> {
        self.transition(id, Action::Stop)
    }

    fn transition(&self, id: Uuid, action: Action) -> Result<Campaign> {
        let store = self.dispatcher.campaigns();

        for _ in 0..TRANSITION_ATTEMPTS {
            let current = self.get(id)?;
            let campaign = match action.target(current.status)? {
                None => current,
                Some(to) => match store.transition_status(id, &[current.status], to)? {
                    Some(updated) => {
                        info!(
                            campaign_id = %id,
                            from = %current.status,
                            to = %to,
                            "Campaign {}",
                            action.verb()
                        );
                        updated
                    }
                    // Status moved underneath us; re-evaluate.
                    None => continue,
                },
            };

            match action {
                Action::Start => self.arm(&campaign),
                Action::Pause | Action::Stop => self.disarm(id),
            }
            return Ok(campaign);
        }

        warn!(campaign_id = %id, "Gave up on {} after repeated conflicts", action.verb());
        Err(Error::Concurrent(id))
    }

    fn arm(&self, campaign: &Campaign) {
        if let Some(scheduler) = &self.scheduler {
            if campaign.status == CampaignStatus::Running && !scheduler.is_armed(campaign.id) {
                scheduler.arm(campaign.id);
            }
        }
    }

    fn disarm(&self, id: Uuid) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.disarm(id);
        }
    }

    // -- Results and progress --

    pub fn results(&self, id: Uuid) -> Result<Vec<EmailResult>> {
        self.get(id)?;
        self.dispatcher.campaigns().list_results(id)
    }

    /// Results of a live run back its cursor, so they can only be cleared
    /// once the campaign is finished or before it starts.
    pub fn clear_results(&self, id: Uuid) -> Result<usize> {
        let campaign = self.get(id)?;
        if matches!(campaign.status, CampaignStatus::Running | CampaignStatus::Paused) {
            return Err(Error::InvalidTransition {
                action: "clear results of",
                from: campaign.status,
            });
        }
        self.dispatcher.campaigns().clear_results(id)
    }

    pub fn progress(&self, id: Uuid) -> Result<CampaignProgress> {
        Ok(CampaignProgress::from(&self.get(id)?))
    }

    // -- Client driver --

    /// A single tick on behalf of a polling client. Only the client driver
    /// accepts these; the server-side drivers own dispatch otherwise.
    pub async fn send_next(&self, id: Uuid, expected: Option<&str>) -> Result<TickOutcome> {
        if self.mode != DriverMode::Client {
            return Err(Error::DriverMismatch(self.mode.as_str()));
        }
        if self.dispatcher.load(id).await?.is_none() {
            return Err(Error::campaign_not_found(id));
        }
        self.dispatcher.tick_expecting(id, expected).await
    }

    // -- Process lifecycle --

    /// Rebuild the counters of every unfinished campaign from its result
    /// log, then re-arm running campaigns when this process owns dispatch.
    pub fn recover(&self) -> Result<usize> {
        let store = self.dispatcher.campaigns();
        let mut recovered = 0;

        for status in [CampaignStatus::Running, CampaignStatus::Paused] {
            for campaign in store.list_campaigns_by_status(status)? {
                if let Some(fixed) = store.reconcile_counts(campaign.id)? {
                    if fixed.processed_count != campaign.processed_count {
                        warn!(
                            campaign_id = %campaign.id,
                            stored = campaign.processed_count,
                            logged = fixed.processed_count,
                            "Cursor rebuilt from result log"
                        );
                    }
                    if fixed.status == CampaignStatus::Running {
                        self.arm(&fixed);
                    }
                    recovered += 1;
                }
            }
        }

        Ok(recovered)
    }

    pub async fn shutdown(&self) {
        if let Some(scheduler) = &self.scheduler {
            scheduler.shutdown().await;
        }
    }
}
