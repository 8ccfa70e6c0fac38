//! Multiplexing behavior: reply correlation under concurrency, per-call
//! timeouts with late-reply discard, and broken-transport semantics.

mod common;

use std::sync::Arc;
use std::time::Duration;

use hearth_client::mock_engine::{MockEngine, Script};
use hearth_client::{Error, Query, Session};
use serde_json::json;

#[tokio::test]
async fn concurrent_queries_get_their_own_replies() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script(
            "slow",
            Script::DelayedData(Duration::from_millis(150), json!({"which": "slow"})),
        )
        .script("fast", Script::Data(json!({"which": "fast"})))
        .start()
        .await;
    let session = Arc::new(
        Session::connect(mock.config().build().unwrap())
            .await
            .unwrap(),
    );

    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.execute(Query::new("{ slow }")).await })
    };
    let fast = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.execute(Query::new("{ fast }")).await })
    };

    // The fast reply arrives while the slow query is still in flight.
    assert_eq!(fast.await.unwrap().unwrap(), json!({"which": "fast"}));
    assert_eq!(slow.await.unwrap().unwrap(), json!({"which": "slow"}));
    session.close().await;
}

#[tokio::test]
async fn replies_stay_correlated_when_delivered_out_of_order() {
    common::init_logging();
    let mut builder = MockEngine::builder();
    for i in 0..8u64 {
        // Later queries answer sooner, reversing delivery order.
        builder = builder.script(
            format!("q{i} "),
            Script::DelayedData(Duration::from_millis((8 - i) * 20), json!({ "i": i })),
        );
    }
    let mock = builder.start().await;
    let session = Arc::new(
        Session::connect(mock.config().build().unwrap())
            .await
            .unwrap(),
    );

    let mut calls = Vec::new();
    for i in 0..8u64 {
        let session = Arc::clone(&session);
        calls.push(tokio::spawn(async move {
            session.execute(Query::new(format!("{{ q{i} }}"))).await
        }));
    }
    for (i, call) in calls.into_iter().enumerate() {
        assert_eq!(call.await.unwrap().unwrap(), json!({ "i": i }));
    }
    session.close().await;
}

#[tokio::test]
async fn per_call_timeout_leaves_the_session_usable() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script("stuck", Script::Silent)
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session
        .execute_with_timeout(Query::new("{ stuck }"), Duration::from_millis(50))
        .await
        .unwrap_err();
    match err {
        Error::ExecuteTimeout { limit } => assert_eq!(limit, Duration::from_millis(50)),
        other => panic!("expected execute timeout, got {other:?}"),
    }

    session.execute(Query::new("{ ok }")).await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn late_replies_are_discarded_after_a_timeout() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script(
            "slow",
            Script::DelayedData(Duration::from_millis(200), json!({"which": "slow"})),
        )
        .script("fast", Script::Data(json!({"which": "fast"})))
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session
        .execute_with_timeout(Query::new("{ slow }"), Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ExecuteTimeout { .. }));

    // Let the stale reply arrive; it must not be delivered to anyone.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let data = session.execute(Query::new("{ fast }")).await.unwrap();
    assert_eq!(data, json!({"which": "fast"}));
    session.close().await;
}

#[tokio::test]
async fn default_timeout_comes_from_the_config() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script("stuck", Script::Silent)
        .start()
        .await;
    let config = mock
        .config()
        .request_timeout(Duration::from_millis(80))
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();

    let err = session.execute(Query::new("{ stuck }")).await.unwrap_err();
    match err {
        Error::ExecuteTimeout { limit } => assert_eq!(limit, Duration::from_millis(80)),
        other => panic!("expected execute timeout, got {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
async fn hangup_breaks_in_flight_and_later_calls_differently() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script("boom", Script::Hangup)
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    // The call in flight when the engine hangs up reports the transport
    // failure itself.
    let err = session.execute(Query::new("{ boom }")).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    // Everything after that reports the session as broken.
    let err = session.execute(Query::new("{ after }")).await.unwrap_err();
    assert!(matches!(err, Error::Session(_)));

    // Closing a broken session still succeeds quietly.
    session.close().await;
}
