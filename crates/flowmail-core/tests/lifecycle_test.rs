//! Lifecycle transitions and the three driver shapes.

mod common;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use flowmail_core::trigger;
use flowmail_core::{CampaignStore, DriverMode, Error, TickOutcome};
use flowmail_types::models::CampaignStatus;

use common::{ACCOUNT, Harness, campaign_request, eventually};

#[tokio::test]
async fn empty_recipient_list_is_rejected_and_not_persisted() {
    let h = Harness::new(DriverMode::Client).await;
    let err = h
        .lifecycle
        .create(campaign_request(ACCOUNT, &[]))
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(h.store.list_campaigns().unwrap().is_empty());
}

#[tokio::test]
async fn creating_a_campaign_purges_finished_runs_of_the_account() {
    let h = Harness::new(DriverMode::Client).await;
    h.respond_with(200).await;

    let completed = h.create(&["a@x.com"]);
    h.lifecycle.start(completed.id).unwrap();
    h.dispatcher().tick(completed.id).await.unwrap();
    assert_eq!(h.campaign(&completed).status, CampaignStatus::Completed);

    let stopped = h.create(&["a@x.com"]);
    h.lifecycle.start(stopped.id).unwrap();
    h.lifecycle.stop(stopped.id).unwrap();

    let running = h.create(&["a@x.com", "b@x.com"]);
    h.lifecycle.start(running.id).unwrap();

    let fresh = h.create(&["c@x.com"]);

    let ids: Vec<_> = h
        .store
        .list_campaigns()
        .unwrap()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![running.id, fresh.id]);
    assert!(h.store.list_results(completed.id).unwrap().is_empty());
}

#[tokio::test]
async fn stop_is_terminal_and_pause_is_idempotent() {
    let h = Harness::new(DriverMode::Client).await;
    let c = h.create(&["a@x.com"]);

    assert!(matches!(
        h.lifecycle.pause(c.id),
        Err(Error::InvalidTransition { .. })
    ));

    h.lifecycle.start(c.id).unwrap();
    let paused = h.lifecycle.pause(c.id).unwrap();
    let again = h.lifecycle.pause(c.id).unwrap();
    assert_eq!(paused, again);
    assert!(h.store.list_results(c.id).unwrap().is_empty());

    assert_eq!(h.lifecycle.stop(c.id).unwrap().status, CampaignStatus::Stopped);
    assert_eq!(h.lifecycle.stop(c.id).unwrap().status, CampaignStatus::Stopped);
    assert!(matches!(
        h.lifecycle.start(c.id),
        Err(Error::InvalidTransition { action: "start", from: CampaignStatus::Stopped })
    ));
}

#[tokio::test]
async fn edits_are_limited_to_draft_and_paused() {
    let h = Harness::new(DriverMode::Client).await;
    let c = h.create(&["a@x.com"]);

    let edited = h
        .lifecycle
        .update(
            c.id,
            flowmail_types::api::UpdateCampaignRequest {
                subject: Some("Edited".into()),
                delay_between_emails: Some(3),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(edited.subject, "Edited");
    assert_eq!(edited.delay_between_emails, 3);
    assert_eq!(edited.recipients, c.recipients);

    h.lifecycle.start(c.id).unwrap();
    assert!(h
        .lifecycle
        .update(c.id, Default::default())
        .is_err());
}

#[tokio::test]
async fn results_of_a_live_run_cannot_be_cleared() {
    let h = Harness::new(DriverMode::Client).await;
    h.respond_with(200).await;
    let c = h.create(&["a@x.com", "b@x.com"]);
    h.lifecycle.start(c.id).unwrap();
    h.dispatcher().tick(c.id).await.unwrap();

    assert!(h.lifecycle.clear_results(c.id).is_err());

    h.lifecycle.stop(c.id).unwrap();
    assert_eq!(h.lifecycle.clear_results(c.id).unwrap(), 1);
    assert!(h.lifecycle.results(c.id).unwrap().is_empty());
}

#[tokio::test]
async fn interval_driver_runs_campaign_to_completion() {
    let h = Harness::new(DriverMode::Interval).await;
    h.respond_with(200).await;
    let c = h.create(&["a@x.com", "b@x.com"]);

    h.lifecycle.start(c.id).unwrap();
    let scheduler = h.lifecycle.scheduler().unwrap().clone();
    assert!(scheduler.is_armed(c.id));

    let store = h.store.clone();
    let done = eventually(Duration::from_secs(10), || {
        store
            .get_campaign(c.id)
            .unwrap()
            .is_some_and(|c| c.status == CampaignStatus::Completed)
    })
    .await;
    assert!(done, "campaign did not complete");
    assert!(eventually(Duration::from_secs(2), || !scheduler.is_armed(c.id)).await);
    assert_eq!(h.campaign(&c).success_count, 2);
    h.assert_consistent(&c);
}

#[tokio::test]
async fn pause_disarms_the_interval_driver() {
    let h = Harness::new(DriverMode::Interval).await;
    h.respond_with(200).await;
    let c = h.create(&["a@x.com", "b@x.com"]);

    h.lifecycle.start(c.id).unwrap();
    h.lifecycle.pause(c.id).unwrap();
    assert!(!h.lifecycle.scheduler().unwrap().is_armed(c.id));

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.campaign(&c).processed_count, 0);
    assert_eq!(h.requests().await, 0);
}

#[tokio::test]
async fn cron_firing_sends_up_to_batch_size() {
    let h = Harness::new(DriverMode::Cron).await;
    h.respond_with(200).await;
    let mut req = campaign_request(ACCOUNT, &["a@x.com", "b@x.com", "c@x.com"]);
    req.batch_size = Some(2);
    let c = h.lifecycle.create(req).unwrap();
    h.lifecycle.start(c.id).unwrap();
    let idle = CancellationToken::new();

    let first = trigger::fire(h.dispatcher(), &idle).await.unwrap();
    assert_eq!(first.campaigns, 1);
    assert_eq!(first.sends, 2);
    assert_eq!(h.campaign(&c).processed_count, 2);

    let second = trigger::fire(h.dispatcher(), &idle).await.unwrap();
    assert_eq!(second.sends, 1);
    assert_eq!(h.campaign(&c).status, CampaignStatus::Completed);

    let third = trigger::fire(h.dispatcher(), &idle).await.unwrap();
    assert_eq!(third.campaigns, 0);
}

#[tokio::test]
async fn trigger_shutdown_abandons_the_rest_of_a_batch() {
    let h = Harness::new(DriverMode::Cron).await;
    h.respond_with(200).await;
    let mut req = campaign_request(ACCOUNT, &["a@x.com", "b@x.com", "c@x.com", "d@x.com"]);
    req.delay_between_emails = Some(2);
    req.batch_size = Some(4);
    let c = h.lifecycle.create(req).unwrap();
    h.lifecycle.start(c.id).unwrap();

    let shutdown = CancellationToken::new();
    let trigger_loop = tokio::spawn(trigger::run_trigger_loop(
        h.dispatcher().clone(),
        3600,
        shutdown.clone(),
    ));

    // The first firing is immediate; cancel while it waits out the delay.
    let store = h.store.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            store
                .get_campaign(c.id)
                .unwrap()
                .is_some_and(|c| c.processed_count == 1)
        })
        .await
    );
    shutdown.cancel();

    tokio::time::timeout(Duration::from_secs(1), trigger_loop)
        .await
        .expect("trigger loop kept running after shutdown")
        .unwrap();

    let after = h.campaign(&c);
    assert_eq!(after.processed_count, 1);
    assert_eq!(after.status, CampaignStatus::Running);
    assert_eq!(h.requests().await, 1);
    h.assert_consistent(&c);
}

#[tokio::test]
async fn pause_during_a_send_keeps_its_result() {
    let h = Harness::new(DriverMode::Client).await;
    h.respond_slowly(Duration::from_millis(800)).await;
    let c = h.create(&["a@x.com", "b@x.com"]);
    h.lifecycle.start(c.id).unwrap();

    let tick = {
        let dispatcher = h.dispatcher().clone();
        tokio::spawn(async move { dispatcher.tick(c.id).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    let paused = h.lifecycle.pause(c.id).unwrap();
    assert_eq!(paused.processed_count, 0);

    let outcome = tick.await.unwrap().unwrap();
    assert!(matches!(outcome, TickOutcome::Sent { .. }));
    assert!(!outcome.should_continue());

    let after = h.campaign(&c);
    assert_eq!(after.status, CampaignStatus::Paused);
    assert_eq!(after.processed_count, 1);
    assert_eq!(h.store.list_results(c.id).unwrap()[0].email, "a@x.com");

    assert!(matches!(
        h.dispatcher().tick(c.id).await.unwrap(),
        TickOutcome::Idle {
            status: Some(CampaignStatus::Paused)
        }
    ));
    assert_eq!(h.requests().await, 1);
    h.assert_consistent(&c);
}

#[tokio::test]
async fn stop_during_a_send_lets_it_finish_then_disarms() {
    let h = Harness::new(DriverMode::Interval).await;
    h.respond_slowly(Duration::from_secs(1)).await;
    let c = h.create(&["a@x.com", "b@x.com", "c@x.com"]);
    h.lifecycle.start(c.id).unwrap();

    // The driver posts after its 1s delay; stop while that post is pending.
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let stopped = h.lifecycle.stop(c.id).unwrap();
    assert_eq!(stopped.processed_count, 0);
    assert!(!h.lifecycle.scheduler().unwrap().is_armed(c.id));

    tokio::time::sleep(Duration::from_millis(2500)).await;
    let after = h.campaign(&c);
    assert_eq!(after.status, CampaignStatus::Stopped);
    assert_eq!(after.processed_count, 1);
    assert_eq!(h.requests().await, 1);
    h.assert_consistent(&c);
}

#[tokio::test]
async fn client_driven_session_stops_on_pause() {
    let h = Harness::new(DriverMode::Client).await;
    h.respond_with(200).await;
    let c = h.create(&["a@x.com", "b@x.com", "c@x.com"]);
    h.lifecycle.start(c.id).unwrap();

    // One send, then the operator pauses before the next delay elapses.
    let outcome = h.lifecycle.send_next(c.id, None).await.unwrap();
    assert!(outcome.should_continue());
    h.lifecycle.pause(c.id).unwrap();

    let drained = h
        .dispatcher()
        .drive(c.id, CancellationToken::new())
        .await;
    assert!(matches!(
        drained,
        TickOutcome::Idle {
            status: Some(CampaignStatus::Paused)
        }
    ));
    assert_eq!(h.campaign(&c).processed_count, 1);
}

#[tokio::test]
async fn server_driven_deployments_refuse_client_ticks() {
    let h = Harness::new(DriverMode::Cron).await;
    let c = h.create(&["a@x.com"]);
    h.lifecycle.start(c.id).unwrap();

    let err = h.lifecycle.send_next(c.id, None).await.unwrap_err();
    assert!(matches!(err, Error::DriverMismatch("cron")));
}

#[tokio::test]
async fn recover_rearms_running_campaigns() {
    let h = Harness::new(DriverMode::Interval).await;
    h.respond_with(200).await;
    let c = h.create(&["a@x.com"]);
    h.store
        .transition_status(c.id, &[CampaignStatus::Draft], CampaignStatus::Running)
        .unwrap();

    assert_eq!(h.lifecycle.recover().unwrap(), 1);
    assert!(h.lifecycle.scheduler().unwrap().is_armed(c.id));

    h.lifecycle.shutdown().await;
    assert_eq!(h.lifecycle.scheduler().unwrap().armed_count(), 0);
}
