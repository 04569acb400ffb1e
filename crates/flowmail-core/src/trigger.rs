use std::time::Duration;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowmail_types::models::{Campaign, CampaignStatus};

use crate::Result;
use crate::dispatch::Dispatcher;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FiringReport {
    pub campaigns: usize,
    pub sends: u32,
}

/// Periodic trigger for the cron deployment.
///
/// Each firing runs up to `batch_size` ticks for every running campaign.
/// A firing completes before the next one starts. Cancelling `shutdown`
/// lets in-flight sends finish but starts no further tick.
pub async fn run_trigger_loop(dispatcher: Dispatcher, interval_secs: u64, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Trigger loop stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        match fire(&dispatcher, &shutdown).await {
            Ok(report) => {
                if report.campaigns > 0 {
                    info!(
                        "Trigger: {} send(s) across {} running campaign(s)",
                        report.sends, report.campaigns
                    );
                }
            }
            Err(e) => warn!("Trigger error: {}", e),
        }
    }
}

/// One firing: all running campaigns in parallel, serial within each.
pub async fn fire(dispatcher: &Dispatcher, cancel: &CancellationToken) -> Result<FiringReport> {
    let running = dispatcher
        .with_campaigns(|store| store.list_campaigns_by_status(CampaignStatus::Running))
        .await?;

    let sends = join_all(running.iter().map(|c| run_batch(dispatcher, c, cancel))).await;

    Ok(FiringReport {
        campaigns: running.len(),
        sends: sends.into_iter().sum(),
    })
}

/// Up to `batch_size` ticks, spaced by `delay_between_emails`. Stops early
/// once the campaign leaves `running`, runs out of recipients, or `cancel`
/// fires.
pub async fn run_batch(
    dispatcher: &Dispatcher,
    campaign: &Campaign,
    cancel: &CancellationToken,
) -> u32 {
    let delay = Duration::from_secs(u64::from(campaign.delay_between_emails.max(1)));
    let mut sends = 0;

    for i in 0..campaign.batch_size.max(1) {
        if i > 0 {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if cancel.is_cancelled() {
            break;
        }
        match dispatcher.tick(campaign.id).await {
            Ok(outcome) => {
                if matches!(outcome, crate::TickOutcome::Sent { .. }) {
                    sends += 1;
                }
                if !outcome.should_continue() {
                    break;
                }
            }
            Err(e) => {
                warn!(campaign_id = %campaign.id, "Batch tick failed: {}", e);
                break;
            }
        }
    }

    sends
}
