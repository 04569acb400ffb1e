use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dispatch::{Dispatcher, TickOutcome};

/// Owns one driver task per running campaign (interval deployment).
///
/// Each armed campaign gets its own cancellation token and join handle.
/// Pausing or stopping a campaign cancels that handle; a driver that halts
/// on its own (completion, configuration failure) removes its entry.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    dispatcher: Dispatcher,
    /// campaign_id -> armed driver
    armed: Mutex<HashMap<Uuid, ArmedDriver>>,
    shutdown: CancellationToken,
}

struct ArmedDriver {
    generation: Uuid,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SchedulerInner {
    /// Remove the entry, but only if it still belongs to `generation`.
    fn release(&self, campaign_id: Uuid, generation: Uuid) {
        let Ok(mut armed) = self.armed.lock() else {
            return;
        };
        if armed
            .get(&campaign_id)
            .is_some_and(|d| d.generation == generation)
        {
            armed.remove(&campaign_id);
        }
    }
}

impl Scheduler {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                dispatcher,
                armed: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Spawn a driver for `campaign_id`, replacing any existing one.
    pub fn arm(&self, campaign_id: Uuid) {
        let generation = Uuid::new_v4();
        let cancel = self.inner.shutdown.child_token();

        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let outcome = inner.dispatcher.drive(campaign_id, token).await;
            match &outcome {
                TickOutcome::Completed(_) | TickOutcome::Sent { .. } => {
                    info!(campaign_id = %campaign_id, "Driver finished: campaign completed")
                }
                TickOutcome::Halted { reason, .. } => {
                    warn!(campaign_id = %campaign_id, "Driver halted: {}", reason)
                }
                TickOutcome::Idle { status } => {
                    debug!(campaign_id = %campaign_id, ?status, "Driver released")
                }
            }
            inner.release(campaign_id, generation);
        });

        let previous = match self.inner.armed.lock() {
            Ok(mut armed) => armed.insert(
                campaign_id,
                ArmedDriver {
                    generation,
                    cancel,
                    handle,
                },
            ),
            Err(e) => {
                warn!("Scheduler map poisoned, driver for {} left unmanaged: {}", campaign_id, e);
                return;
            }
        };
        if let Some(old) = previous {
            old.cancel.cancel();
        }
        debug!(campaign_id = %campaign_id, "Driver armed");
    }

    /// Cancel the driver for `campaign_id`. Returns whether one was armed.
    pub fn disarm(&self, campaign_id: Uuid) -> bool {
        let removed = self
            .inner
            .armed
            .lock()
            .ok()
            .and_then(|mut armed| armed.remove(&campaign_id));
        match removed {
            Some(driver) => {
                driver.cancel.cancel();
                debug!(campaign_id = %campaign_id, "Driver disarmed");
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, campaign_id: Uuid) -> bool {
        self.inner
            .armed
            .lock()
            .map(|armed| {
                armed
                    .get(&campaign_id)
                    .is_some_and(|d| !d.handle.is_finished())
            })
            .unwrap_or(false)
    }

    pub fn armed_count(&self) -> usize {
        self.inner
            .armed
            .lock()
            .map(|armed| armed.values().filter(|d| !d.handle.is_finished()).count())
            .unwrap_or(0)
    }

    /// Cancel every driver and wait for in-flight sends to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let handles: Vec<JoinHandle<()>> = match self.inner.armed.lock() {
            Ok(mut armed) => armed.drain().map(|(_, d)| d.handle).collect(),
            Err(_) => Vec::new(),
        };
        info!("Waiting for {} campaign driver(s) to stop", handles.len());
        for handle in handles {
            let _ = handle.await;
        }
    }
}
