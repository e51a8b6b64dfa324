//! Dispatch order, delivery order, interceptors and abort.

mod common;

use std::time::Duration;

use callbox::{Client, Headers, RequestOptions, ResponseSource, Ttl};
use callbox_test::{MockTransport, Reply};
use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::time::sleep;

use common::{Journal, client};

#[tokio::test(start_paused = true)]
async fn subscribers_run_in_completion_order() {
    let mock = MockTransport::new();
    mock.reply("/slow", Reply::status(200, "{}"))
        .delay("/slow", Duration::from_millis(200))
        .reply("/fast", Reply::status(200, "{}"))
        .delay("/fast", Duration::from_millis(50));
    let client = client(&mock);
    let journal = Journal::new();

    let slow = client.get("/slow", RequestOptions::default()).unwrap();
    let fast = client.get("/fast", RequestOptions::default()).unwrap();
    journal.track(&slow, "slow");
    journal.track(&fast, "fast");

    Client::all([slow, fast]).await.unwrap();
    assert_eq!(journal.entries(), vec!["fast", "slow"]);
    assert_eq!(mock.sent_urls(), vec!["/slow", "/fast"]);
}

#[tokio::test(start_paused = true)]
async fn request_interceptor_runs_in_submission_order_before_url_resolution() {
    let mock = MockTransport::new();
    mock.reply("/v2/a", Reply::status(200, "{}"))
        .reply("/v2/b", Reply::status(200, "{}"))
        .reply("/v2/c", Reply::status(200, "{}"));
    let client = client(&mock);
    let journal = Journal::new();

    let seen = journal.clone();
    client.set_request_interceptor(move |config| {
        seen.record(config.url.clone());
        config.url = format!("/v2{}", config.url);
        config.headers.insert("X-Intercepted", "1");
    });

    let calls: Vec<_> = ["/a", "/b", "/c"]
        .into_iter()
        .map(|url| client.get(url, RequestOptions::default()).unwrap())
        .collect();
    let responses = Client::all(calls.clone()).await.unwrap();

    assert_eq!(journal.entries(), vec!["/a", "/b", "/c"]);
    assert_eq!(mock.sent_urls(), vec!["/v2/a", "/v2/b", "/v2/c"]);
    assert!(
        mock.sent()
            .iter()
            .all(|sent| sent.request.headers.get("X-Intercepted") == Some("1"))
    );
    assert_eq!(calls[0].url(), Some("/v2/a"));
    assert_eq!(responses[2].config.url, "/v2/c");
}

#[tokio::test(start_paused = true)]
async fn response_interceptor_can_rewrite_the_status() {
    let mock = MockTransport::new();
    let client = client(&mock);
    client.set_response_interceptor(|response| {
        if response.status == 404 {
            response.status = 200;
            response.status_text = "Not Found (tolerated)".to_owned();
        }
    });

    let response = client
        .get("/missing", RequestOptions::default())
        .unwrap()
        .outcome()
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.status_text, "Not Found (tolerated)");
}

#[tokio::test(start_paused = true)]
async fn abort_before_hand_off_never_sends() {
    let mock = MockTransport::new();
    mock.reply("/never", Reply::status(200, "{}"));
    let client = client(&mock);

    let call = client.get("/never", RequestOptions::default()).unwrap();
    call.abort();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(mock.send_count(), 0);
    assert!(call.is_aborted());
    assert!(!call.is_settled());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn abort_cancels_an_uncached_attempt() {
    let mock = MockTransport::new().with_delay(Duration::from_secs(1));
    mock.reply("/long", Reply::status(200, "{}"));
    let client = client(&mock);
    let journal = Journal::new();

    let call = client.get("/long", RequestOptions::default()).unwrap();
    journal.track(&call, "long");
    sleep(Duration::from_millis(10)).await;
    assert_eq!(mock.send_count(), 1);

    call.abort();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(mock.completed_count(), 0);
    assert!(journal.entries().is_empty());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn aborted_leader_still_serves_its_waiters() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(100));
    mock.reply("/shared", Reply::json(200, json!({"id": 1})));
    let client = client(&mock);
    client.set_strategy(Client::create_strategy("/shared", Ttl::Forever, false));
    let journal = Journal::new();

    let leader = client.get("/shared", RequestOptions::default()).unwrap();
    let waiter = client.get("/shared", RequestOptions::default()).unwrap();
    journal.track(&leader, "leader");
    journal.track(&waiter, "waiter");
    sleep(Duration::from_millis(10)).await;
    leader.abort();

    let response = waiter.outcome().await.unwrap();
    assert_eq!(response.source, ResponseSource::Leader);
    assert_eq!(response.json(), Some(&json!({"id": 1})));
    assert_eq!(mock.completed_count(), 1);
    assert_eq!(journal.entries(), vec!["waiter"]);
    assert!(!leader.is_settled());
}

#[tokio::test(start_paused = true)]
async fn aborted_waiter_is_skipped_at_fan_out() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(100));
    mock.reply("/shared", Reply::status(200, "{}"));
    let client = client(&mock);
    client.set_strategy(Client::create_strategy("/shared", Ttl::Forever, false));

    let leader = client.get("/shared", RequestOptions::default()).unwrap();
    let waiter = client.get("/shared", RequestOptions::default()).unwrap();
    sleep(Duration::from_millis(10)).await;
    waiter.abort();

    leader.outcome().await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert!(!waiter.is_settled());
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn late_subscribers_fire_with_the_stored_outcome() {
    let mock = MockTransport::new();
    mock.reply("/done", Reply::status(200, "{}"));
    let client = client(&mock);
    let journal = Journal::new();

    let call = client.get("/done", RequestOptions::default()).unwrap();
    call.outcome().await.unwrap();
    journal.track(&call, "late");
    assert_eq!(journal.entries(), vec!["late"]);
}

#[tokio::test(start_paused = true)]
async fn request_body_and_headers_reach_the_transport() {
    let mock = MockTransport::new();
    mock.reply("/users", Reply::status(201, "{}"));
    let client = client(&mock);

    client
        .post(
            "/users",
            json!({"name": "ada"}),
            RequestOptions::default().header("Authorization", "Bearer t"),
        )
        .unwrap()
        .outcome()
        .await
        .unwrap();

    let sent = mock.sent();
    let request = &sent[0].request;
    assert_eq!(request.method, callbox::Method::Post);
    assert_eq!(
        request.body.as_deref(),
        Some(br#"{"name":"ada"}"#.as_slice())
    );
    let expected: Headers = [
        ("Authorization", "Bearer t"),
        ("Content-Type", "application/json"),
    ]
    .into();
    assert_eq!(request.headers, expected);
}
