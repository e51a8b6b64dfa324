//! Bounded fixed-delay retry.

mod common;

use std::time::Duration;

use callbox::{Client, Failure, RequestOptions, ResponseSource, Ttl};
use callbox_test::{MockTransport, Reply};
use serde_json::json;
use tokio::time::{Instant, sleep};

use common::client;

fn retrying(limit: u32, buffer: Duration) -> RequestOptions {
    RequestOptions::default()
        .retry_limit(limit)
        .retry_buffer(buffer)
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_is_sent_limit_plus_one_times() {
    let mock = MockTransport::new();
    mock.reply("/flaky", Reply::status(500, ""));
    let client = client(&mock);
    let start = Instant::now();

    let failure = client
        .get("/flaky", retrying(2, Duration::from_secs(1)))
        .unwrap()
        .outcome()
        .await
        .unwrap_err();

    assert!(matches!(failure, Failure::Status(_)));
    assert_eq!(failure.status(), 500);
    assert_eq!(
        mock.sent_at("/flaky"),
        vec![
            start,
            start + Duration::from_secs(1),
            start + Duration::from_secs(2),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn success_after_failures_is_delivered_once() {
    let mock = MockTransport::new();
    mock.reply_sequence(
        "/eventually",
        [
            Reply::status(503, ""),
            Reply::connection_error("connection reset"),
            Reply::json(200, json!({"ok": true})),
        ],
    );
    let client = client(&mock);
    let call = client
        .get("/eventually", retrying(5, Duration::from_millis(200)))
        .unwrap();

    let response = call.outcome().await.unwrap();
    assert_eq!(response.json(), Some(&json!({"ok": true})));
    assert_eq!(mock.send_count(), 3);
    assert_eq!(call.retries_left(), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_limit_never_retries() {
    let mock = MockTransport::new();
    mock.reply("/once", Reply::status(400, "{}"));
    let client = client(&mock);

    let failure = client
        .get("/once", RequestOptions::default())
        .unwrap()
        .outcome()
        .await
        .unwrap_err();
    assert_eq!(failure.status(), 400);
    sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.send_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_fail_with_status_zero() {
    let mock = MockTransport::new();
    mock.reply("/down", Reply::connection_error("connection refused"));
    let client = client(&mock);

    let failure = client
        .get("/down", RequestOptions::default())
        .unwrap()
        .outcome()
        .await
        .unwrap_err();
    assert_eq!(failure.status(), 0);
    assert!(failure.response().status_text.contains("connection refused"));
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_are_cancelled_and_retried() {
    let mock = MockTransport::new().with_delay(Duration::from_secs(5));
    mock.reply("/slow", Reply::status(200, "{}"));
    let client = client(&mock);
    let start = Instant::now();

    let failure = client
        .get(
            "/slow",
            retrying(1, Duration::from_millis(500)).timeout(Duration::from_secs(1)),
        )
        .unwrap()
        .outcome()
        .await
        .unwrap_err();

    assert_eq!(failure.status(), 0);
    assert!(failure.response().status_text.contains("timed out"));
    assert_eq!(
        mock.sent_at("/slow"),
        vec![start, start + Duration::from_millis(1500)]
    );
    assert_eq!(mock.completed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn waiters_extend_the_leader_budget_when_auto_retry_is_on() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(100));
    mock.reply_sequence(
        "/report",
        [Reply::status(500, ""), Reply::json(200, json!({"rows": 1}))],
    );
    let client = client(&mock);
    client.set_strategy(Client::create_strategy(
        "/report",
        Duration::from_secs(60),
        true,
    ));

    let leader = client
        .get("/report", retrying(0, Duration::from_millis(50)))
        .unwrap();
    let waiter = client.get("/report", RequestOptions::default()).unwrap();

    let led = leader.outcome().await.unwrap();
    let waited = waiter.outcome().await.unwrap();
    assert_eq!(led.json(), Some(&json!({"rows": 1})));
    assert_eq!(waited.json(), Some(&json!({"rows": 1})));
    assert_eq!(waited.source, ResponseSource::Leader);
    assert_eq!(mock.send_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn without_auto_retry_waiters_share_the_leader_failure() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(100));
    mock.reply_sequence(
        "/report",
        [Reply::status(500, ""), Reply::json(200, json!({"rows": 1}))],
    );
    let client = client(&mock);
    client.set_strategy(Client::create_strategy("/report", Ttl::Forever, false));

    let leader = client.get("/report", RequestOptions::default()).unwrap();
    let waiter = client.get("/report", RequestOptions::default()).unwrap();

    assert_eq!(leader.outcome().await.unwrap_err().status(), 500);
    let failure = waiter.outcome().await.unwrap_err();
    assert_eq!(failure.status(), 500);
    assert_eq!(failure.response().source, ResponseSource::Leader);
    assert_eq!(mock.send_count(), 1);
}
