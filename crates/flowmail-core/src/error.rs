use thiserror::Error;
use uuid::Uuid;

use flowmail_types::models::CampaignStatus;

use crate::webhook::DeliveryError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input, rejected before any state change.
    #[error("{0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    /// Unique-name collision (accounts) or a request that contradicts the
    /// campaign's current cursor.
    #[error("{0}")]
    Conflict(String),

    #[error("cannot {action} a campaign that is {from}")]
    InvalidTransition {
        action: &'static str,
        from: CampaignStatus,
    },

    /// The campaign kept changing underneath a conditional update.
    #[error("campaign {0} was modified concurrently, try again")]
    Concurrent(Uuid),

    /// The flow account does not resolve to a destination URL.
    #[error("flow account '{0}' has no webhook URL")]
    Configuration(String),

    /// Dispatch is owned by a server-side driver in this deployment.
    #[error("campaign dispatch is driven by the {0} driver")]
    DriverMismatch(&'static str),

    /// A one-off send that the destination rejected or never answered.
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl Error {
    pub fn campaign_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "campaign", id: id.to_string() }
    }

    pub fn template_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "template", id: id.to_string() }
    }

    pub fn account_not_found(name: &str) -> Self {
        Self::NotFound { kind: "account", id: name.to_string() }
    }
}
