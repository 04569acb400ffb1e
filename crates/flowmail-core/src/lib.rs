//! Campaign dispatch core: storage traits, the webhook sender, the
//! per-tick dispatch loop and the lifecycle controller that gates it.

pub mod dispatch;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod scheduler;
pub mod store;
pub mod trigger;
pub mod validation;
pub mod webhook;

pub use dispatch::{Dispatcher, TickOutcome};
pub use error::{Error, Result};
pub use lifecycle::{DriverMode, Lifecycle};
pub use memory::MemoryStore;
pub use scheduler::Scheduler;
pub use store::{AccountDirectory, CampaignStore, TemplateStore};
pub use webhook::{DeliveryError, WebhookConfig, WebhookSender};
