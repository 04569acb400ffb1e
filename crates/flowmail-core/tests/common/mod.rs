#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use flowmail_core::{
    AccountDirectory, CampaignStore, Dispatcher, DriverMode, Lifecycle, MemoryStore, WebhookSender,
};
use flowmail_types::api::CreateCampaignRequest;
use flowmail_types::models::Campaign;

pub const ACCOUNT: &str = "acct1";

pub struct Harness {
    pub server: MockServer,
    pub store: Arc<MemoryStore>,
    pub lifecycle: Lifecycle,
}

impl Harness {
    pub async fn new(mode: DriverMode) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(MemoryStore::new());
        store
            .create_account(ACCOUNT, &format!("{}/flow", server.uri()))
            .expect("seed account");

        let dispatcher = Dispatcher::new(
            store.clone(),
            store.clone(),
            WebhookSender::with_defaults().expect("webhook client"),
        );
        let lifecycle = Lifecycle::new(dispatcher, mode);
        Self {
            server,
            store,
            lifecycle,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        self.lifecycle.dispatcher()
    }

    pub async fn respond_with(&self, status: u16) {
        self.server.reset().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_string(format!("status {}", status)))
            .mount(&self.server)
            .await;
    }

    /// Accept every post, but only answer after `delay`.
    pub async fn respond_slowly(&self, delay: Duration) {
        self.server.reset().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("status 200")
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    pub fn create(&self, recipients: &[&str]) -> Campaign {
        self.lifecycle
            .create(campaign_request(ACCOUNT, recipients))
            .expect("create campaign")
    }

    pub fn campaign(&self, campaign: &Campaign) -> Campaign {
        self.store
            .get_campaign(campaign.id)
            .expect("load campaign")
            .expect("campaign exists")
    }

    /// processed == success + failed == number of results.
    pub fn assert_consistent(&self, campaign: &Campaign) {
        let c = self.campaign(campaign);
        let results = self.store.list_results(c.id).expect("results");
        assert_eq!(c.processed_count, c.success_count + c.failed_count);
        assert_eq!(c.processed_count as usize, results.len());
    }

    pub async fn requests(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

pub fn campaign_request(account: &str, recipients: &[&str]) -> CreateCampaignRequest {
    CreateCampaignRequest {
        subject: "Spring update".into(),
        html_content: "<p>Hello</p>".into(),
        flow_account: account.into(),
        recipients: recipients.iter().map(|r| r.to_string()).collect(),
        delay_between_emails: Some(1),
        ..Default::default()
    }
}

/// Poll `check` every 100ms until it holds or `limit` elapses.
pub async fn eventually<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}
