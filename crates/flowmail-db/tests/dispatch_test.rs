//! The dispatch loop running against the SQLite store.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use flowmail_core::{
    AccountDirectory, CampaignStore, Dispatcher, DriverMode, Lifecycle, TickOutcome, WebhookSender,
    trigger,
};
use flowmail_db::Database;
use flowmail_types::api::CreateCampaignRequest;
use flowmail_types::models::{CampaignStatus, ResultStatus};

async fn setup(mode: DriverMode) -> (MockServer, Arc<Database>, Lifecycle) {
    let server = MockServer::start().await;
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.create_account("acct1", &format!("{}/flow", server.uri()))
        .unwrap();

    let dispatcher = Dispatcher::new(
        db.clone(),
        db.clone(),
        WebhookSender::with_defaults().unwrap(),
    );
    (server, db, Lifecycle::new(dispatcher, mode))
}

async fn respond_with(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string(format!("status {}", status)))
        .mount(server)
        .await;
}

fn request(recipients: &[&str]) -> CreateCampaignRequest {
    CreateCampaignRequest {
        subject: "Spring update".into(),
        html_content: "<p>Hello</p>".into(),
        flow_account: "acct1".into(),
        recipients: recipients.iter().map(|r| r.to_string()).collect(),
        delay_between_emails: Some(1),
        ..Default::default()
    }
}

#[tokio::test]
async fn success_then_failure_is_recorded_in_sqlite() {
    let (server, db, lifecycle) = setup(DriverMode::Client).await;
    let c = lifecycle.create(request(&["a@x.com", "b@x.com"])).unwrap();
    lifecycle.start(c.id).unwrap();

    respond_with(&server, 200).await;
    let first = lifecycle.send_next(c.id, Some("a@x.com")).await.unwrap();
    assert!(first.should_continue());

    respond_with(&server, 500).await;
    let second = lifecycle.send_next(c.id, Some("b@x.com")).await.unwrap();
    assert!(matches!(second, TickOutcome::Sent { .. }));
    assert!(!second.should_continue());

    let done = db.get_campaign(c.id).unwrap().unwrap();
    assert_eq!(done.status, CampaignStatus::Completed);
    assert_eq!(done.processed_count, 2);
    assert_eq!(done.success_count, 1);
    assert_eq!(done.failed_count, 1);

    let results = db.list_results(c.id).unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].email, "a@x.com");
    assert_eq!(results[0].status, ResultStatus::Success);
    assert_eq!(results[1].email, "b@x.com");
    assert_eq!(results[1].status, ResultStatus::Failed);
    assert!(results[1].response.contains("500"));
}

#[tokio::test]
async fn concurrent_ticks_send_each_recipient_once() {
    let (server, db, lifecycle) = setup(DriverMode::Client).await;
    respond_with(&server, 200).await;
    let c = lifecycle
        .create(request(&["a@x.com", "b@x.com", "c@x.com"]))
        .unwrap();
    lifecycle.start(c.id).unwrap();

    let dispatcher = lifecycle.dispatcher().clone();
    let ticks: Vec<_> = (0..5)
        .map(|_| {
            let dispatcher = dispatcher.clone();
            tokio::spawn(async move { dispatcher.tick(c.id).await })
        })
        .collect();
    for tick in ticks {
        tick.await.unwrap().unwrap();
    }

    let done = db.get_campaign(c.id).unwrap().unwrap();
    assert_eq!(done.status, CampaignStatus::Completed);
    assert_eq!(done.processed_count, 3);
    let emails: Vec<_> = db
        .list_results(c.id)
        .unwrap()
        .into_iter()
        .map(|r| r.email)
        .collect();
    assert_eq!(emails, vec!["a@x.com", "b@x.com", "c@x.com"]);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn cron_firing_advances_sqlite_campaign() {
    let (server, db, lifecycle) = setup(DriverMode::Cron).await;
    respond_with(&server, 200).await;
    let mut req = request(&["a@x.com", "b@x.com"]);
    req.batch_size = Some(5);
    let c = lifecycle.create(req).unwrap();
    lifecycle.start(c.id).unwrap();

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        trigger::fire(lifecycle.dispatcher(), &CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(report.sends, 2);

    let done = db.get_campaign(c.id).unwrap().unwrap();
    assert_eq!(done.status, CampaignStatus::Completed);
    assert_eq!(
        done.processed_count as usize,
        db.list_results(c.id).unwrap().len()
    );
}
