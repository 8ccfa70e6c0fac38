//! Session lifecycle against an in-process mock engine: connect, handshake
//! outcomes, query failure kinds, close semantics.

mod common;

use std::sync::Arc;

use hearth_client::mock_engine::{MockEngine, Script};
use hearth_client::{
    with_session, Config, Error, ErrorCode, ErrorPayload, Operation, Query, Session, Version,
    VersionRange, ENV_SESSION_ENDPOINT, ENV_SESSION_TOKEN,
};
use serde_json::json;

#[tokio::test]
async fn connect_execute_close() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script(
            "engine",
            Script::Data(json!({"engine": {"version": "0.9.2"}})),
        )
        .start()
        .await;

    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();
    assert_eq!(session.engine_version(), mock.version());

    let data = session
        .execute(Query::new("{ engine { version } }"))
        .await
        .unwrap();
    assert_eq!(data, json!({"engine": {"version": "0.9.2"}}));

    session.close().await;
}

#[tokio::test]
async fn close_is_idempotent_and_breaks_later_calls() {
    common::init_logging();
    let mock = MockEngine::start().await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    session.close().await;
    session.close().await;

    let err = session.execute(Query::new("{ ping }")).await.unwrap_err();
    match err {
        Error::Session(msg) => assert!(msg.contains("closed")),
        other => panic!("expected session error, got {other:?}"),
    }
}

#[tokio::test]
async fn version_mismatch_aborts_connect() {
    common::init_logging();
    let mock = MockEngine::builder()
        .version(Version::new(0, 2, 0))
        .start()
        .await;

    let err = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap_err();
    match err {
        Error::VersionMismatch { engine, required } => {
            assert_eq!(engine, Version::new(0, 2, 0));
            assert!(!required.contains(engine));
        }
        other => panic!("expected version mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn compat_override_accepts_an_old_engine() {
    common::init_logging();
    let mock = MockEngine::builder()
        .version(Version::new(0, 2, 0))
        .start()
        .await;

    let config = mock
        .config()
        .compat(VersionRange::between(
            Version::new(0, 1, 0),
            Version::new(0, 3, 0),
        ))
        .build()
        .unwrap();
    let session = Session::connect(config).await.unwrap();
    assert_eq!(session.engine_version(), Version::new(0, 2, 0));
    session.close().await;
}

#[tokio::test]
async fn missing_token_is_rejected_by_the_engine() {
    common::init_logging();
    let mock = MockEngine::start().await;

    let config = Config::builder().endpoint(mock.endpoint()).build().unwrap();
    let err = Session::connect(config).await.unwrap_err();
    match err {
        Error::Session(msg) => assert!(msg.contains("token")),
        other => panic!("expected session error, got {other:?}"),
    }
}

// Keep this the only test in this binary that mutates process env; tests in
// one binary share it.
#[tokio::test]
async fn adopts_session_from_environment() {
    common::init_logging();
    let mock = MockEngine::start().await;

    std::env::set_var(ENV_SESSION_ENDPOINT, mock.endpoint().to_string());
    std::env::set_var(ENV_SESSION_TOKEN, mock.token());
    let config = Config::from_env();
    std::env::remove_var(ENV_SESSION_ENDPOINT);
    std::env::remove_var(ENV_SESSION_TOKEN);

    let session = Session::connect(config.unwrap()).await.unwrap();
    assert_eq!(session.engine_version(), mock.version());
    session.execute(Query::new("{ ok }")).await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn query_errors_leave_the_session_usable() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script(
            "bad",
            Script::Errors(vec![ErrorPayload::query("no such field `bad`")]),
        )
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session.execute(Query::new("{ bad }")).await.unwrap_err();
    match err {
        Error::Query(failure) => {
            assert_eq!(failure.errors.len(), 1);
            assert!(failure.errors[0].message.contains("no such field"));
        }
        other => panic!("expected query failure, got {other:?}"),
    }

    session.execute(Query::new("{ good }")).await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn exec_failures_carry_command_detail() {
    common::init_logging();
    let payload = ErrorPayload {
        code: ErrorCode::ExecFailed,
        message: "process \"cc\" exited 127".to_string(),
        path: vec!["build".to_string(), "run".to_string()],
        operation: None,
        exit_code: Some(127),
        stderr: Some("sh: cc: not found".to_string()),
    };
    let mock = MockEngine::builder()
        .script("run", Script::Errors(vec![payload]))
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session
        .execute(Query::new("{ build { run } }"))
        .await
        .unwrap_err();
    match err {
        Error::Exec(failure) => {
            assert_eq!(failure.operation, "run");
            assert_eq!(failure.exit_code, Some(127));
            assert_eq!(failure.stderr.as_deref(), Some("sh: cc: not found"));
        }
        other => panic!("expected exec failure, got {other:?}"),
    }
    session.close().await;
}

#[tokio::test]
async fn invalid_documents_never_reach_the_engine() {
    common::init_logging();
    let mock = MockEngine::start().await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session
        .execute(Query::new("{ unbalanced "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));

    // The rejected call must not have consumed the session.
    session.execute(Query::new("{ ok }")).await.unwrap();
    session.close().await;
}

#[tokio::test]
async fn with_session_closes_after_the_closure() {
    common::init_logging();
    let mock = MockEngine::start().await;
    let config = mock.config().build().unwrap();

    let stash: Arc<std::sync::Mutex<Option<Arc<Session>>>> =
        Arc::new(std::sync::Mutex::new(None));
    let stash_in = Arc::clone(&stash);
    let data = with_session(config, move |session| async move {
        *stash_in.lock().unwrap() = Some(Arc::clone(&session));
        session.execute(Query::new("{ ok }")).await
    })
    .await
    .unwrap();
    assert_eq!(data, json!({"ok": true}));

    let kept = stash.lock().unwrap().take().unwrap();
    let err = kept.execute(Query::new("{ late }")).await.unwrap_err();
    assert!(matches!(err, Error::Session(_)));
}

#[derive(Debug, serde::Deserialize)]
struct VersionReply {
    engine: EngineField,
}

#[derive(Debug, serde::Deserialize)]
struct EngineField {
    version: String,
}

struct EngineVersion;

impl Operation for EngineVersion {
    type Output = VersionReply;

    fn document(&self) -> String {
        "{ engine { version } }".to_string()
    }
}

#[tokio::test]
async fn typed_operations_decode_reply_data() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script(
            "engine",
            Script::Data(json!({"engine": {"version": "0.9.2"}})),
        )
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let reply = session.run(&EngineVersion).await.unwrap();
    assert_eq!(reply.engine.version, "0.9.2");
    session.close().await;
}

#[tokio::test]
async fn shape_mismatch_is_a_decode_error() {
    common::init_logging();
    let mock = MockEngine::builder()
        .script("engine", Script::Data(json!({"unexpected": 1})))
        .start()
        .await;
    let session = Session::connect(mock.config().build().unwrap())
        .await
        .unwrap();

    let err = session.run(&EngineVersion).await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)));
    session.close().await;
}

#[test]
fn blocking_facade_round_trips() {
    common::init_logging();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mock = runtime.block_on(MockEngine::start());

    let session = hearth_client::blocking::Session::connect(mock.config().build().unwrap())
        .unwrap();
    assert_eq!(session.engine_version(), mock.version());
    let data = session.execute(Query::new("{ ok }")).unwrap();
    assert_eq!(data, json!({"ok": true}));
    session.close();
}
