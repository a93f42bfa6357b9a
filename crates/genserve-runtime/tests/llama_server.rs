//! Tests for `LlamaServerBackend` against an in-process fake llama-server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures_util::{StreamExt, stream};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use genserve_core::{
    BackendError, FinishReason, GenerationBackend, Prompt, RequestId, SamplingParams,
};
use genserve_runtime::{LlamaServerBackend, LlamaServerConfig, check_health};

#[derive(Clone, Default)]
struct FakeServer {
    /// `/health` answers 503 this many times before 200.
    loading_probes: Arc<AtomicUsize>,
    bodies: Arc<Mutex<Vec<Value>>>,
    /// Keep the completion stream open after the scripted chunks.
    hold_open: bool,
    completion_status: Option<StatusCode>,
    /// Raw `data:` payloads sent instead of the default chunks.
    script: Option<Vec<String>>,
}

async fn health(State(fake): State<FakeServer>) -> StatusCode {
    let remaining = fake.loading_probes.load(Ordering::SeqCst);
    if remaining > 0 {
        fake.loading_probes.store(remaining - 1, Ordering::SeqCst);
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

async fn completion(State(fake): State<FakeServer>, axum::Json(body): axum::Json<Value>) -> Response {
    fake.bodies.lock().unwrap().push(body);

    if let Some(status) = fake.completion_status {
        return (status, r#"{"error":{"message":"nope"}}"#).into_response();
    }

    let mut chunks = fake.script.clone().unwrap_or_else(|| {
        vec![
            json!({"content": "Hi", "tokens": [10], "stop": false}).to_string(),
            json!({"content": " there", "tokens": [11], "stop": true, "stop_type": "limit"})
                .to_string(),
        ]
    });
    if fake.hold_open {
        chunks.truncate(1);
    }
    let events = stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok::<_, std::io::Error>(format!("data: {chunk}\n\n"))),
    );
    let body = if fake.hold_open {
        Body::from_stream(events.chain(stream::pending()))
    } else {
        Body::from_stream(events)
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(body)
        .unwrap()
}

async fn spawn_fake(fake: FakeServer) -> LlamaServerConfig {
    let app = Router::new()
        .route("/health", get(health))
        .route("/completion", post(completion))
        .with_state(fake);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    LlamaServerConfig::new(format!("http://{addr}"))
        .with_ready_timeout(Duration::from_secs(5))
        .with_poll_interval(Duration::from_millis(20))
}

fn params(max_tokens: u32) -> SamplingParams {
    SamplingParams {
        max_tokens: Some(max_tokens),
        ..SamplingParams::default()
    }
}

#[tokio::test]
async fn connect_waits_for_model_load() {
    let fake = FakeServer::default();
    fake.loading_probes.store(3, Ordering::SeqCst);
    let config = spawn_fake(fake.clone()).await;

    let backend = LlamaServerBackend::connect(config).await.unwrap();
    assert_eq!(fake.loading_probes.load(Ordering::SeqCst), 0);
    assert!(check_health(&reqwest::Client::new(), backend.config()).await);
}

#[tokio::test]
async fn connect_times_out_when_never_ready() {
    let fake = FakeServer::default();
    fake.loading_probes.store(usize::MAX, Ordering::SeqCst);
    let config = spawn_fake(fake)
        .await
        .with_ready_timeout(Duration::from_millis(200));

    let err = LlamaServerBackend::connect(config).await.unwrap_err();
    assert!(matches!(err, BackendError::Unavailable(_)));
}

#[tokio::test]
async fn deltas_become_cumulative_snapshots() {
    let fake = FakeServer::default();
    let backend = LlamaServerBackend::connect(spawn_fake(fake.clone()).await)
        .await
        .unwrap();

    let id = RequestId::random();
    let outputs: Vec<_> = backend
        .generate(id, Prompt::Text("Hello".into()), params(2))
        .await
        .unwrap()
        .collect()
        .await;

    let outputs: Vec<_> = outputs.into_iter().map(Result::unwrap).collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].outputs[0].text, "Hi");
    assert_eq!(outputs[1].outputs[0].text, "Hi there");
    assert_eq!(outputs[1].outputs[0].token_ids, vec![10, 11]);
    assert_eq!(outputs[1].outputs[0].finish_reason, Some(FinishReason::Length));
    assert!(outputs[1].finished);
    assert_eq!(backend.active_requests(), 0);

    let bodies = fake.bodies.lock().unwrap();
    assert_eq!(bodies[0]["prompt"], "Hello");
    assert_eq!(bodies[0]["n_predict"], 2);
    assert_eq!(bodies[0]["stream"], true);
}

#[tokio::test]
async fn token_prompt_is_forwarded_as_array() {
    let fake = FakeServer::default();
    let backend = LlamaServerBackend::connect(spawn_fake(fake.clone()).await)
        .await
        .unwrap();

    let _: Vec<_> = backend
        .generate(RequestId::random(), Prompt::Tokens(vec![1, 2, 3]), params(2))
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(fake.bodies.lock().unwrap()[0]["prompt"], json!([1, 2, 3]));
}

#[tokio::test]
async fn abort_ends_a_held_stream() {
    let fake = FakeServer {
        hold_open: true,
        ..FakeServer::default()
    };
    let backend = LlamaServerBackend::connect(spawn_fake(fake).await)
        .await
        .unwrap();

    let id = RequestId::random();
    let mut outputs = backend
        .generate(id, Prompt::Text("Hello".into()), params(16))
        .await
        .unwrap();

    let first = outputs.next().await.unwrap().unwrap();
    assert_eq!(first.outputs[0].text, "Hi");
    assert_eq!(backend.active_requests(), 1);

    backend.abort(id);
    assert!(outputs.next().await.is_none());
    assert_eq!(backend.active_requests(), 0);

    // Safe to repeat, and after completion.
    backend.abort(id);
}

#[tokio::test]
async fn upstream_client_error_is_rejected() {
    let fake = FakeServer {
        completion_status: Some(StatusCode::BAD_REQUEST),
        ..FakeServer::default()
    };
    let backend = LlamaServerBackend::connect(spawn_fake(fake).await)
        .await
        .unwrap();

    let err = backend
        .generate(RequestId::random(), Prompt::Text("Hello".into()), params(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BackendError::Rejected(msg) if msg.contains("400")));
    assert_eq!(backend.active_requests(), 0);
}

#[tokio::test]
async fn upstream_server_error_is_upstream() {
    let fake = FakeServer {
        completion_status: Some(StatusCode::INTERNAL_SERVER_ERROR),
        ..FakeServer::default()
    };
    let backend = LlamaServerBackend::connect(spawn_fake(fake).await)
        .await
        .unwrap();

    let err = backend
        .generate(RequestId::random(), Prompt::Text("Hello".into()), params(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BackendError::Upstream(_)));
}

#[tokio::test]
async fn multiple_candidates_never_reach_upstream() {
    let fake = FakeServer::default();
    let backend = LlamaServerBackend::connect(spawn_fake(fake.clone()).await)
        .await
        .unwrap();

    let err = backend
        .generate(
            RequestId::random(),
            Prompt::Text("Hello".into()),
            SamplingParams {
                n: 2,
                ..SamplingParams::default()
            },
        )
        .await
        .err()
        .unwrap();

    assert!(matches!(err, BackendError::Rejected(_)));
    assert!(fake.bodies.lock().unwrap().is_empty());
}

async fn run_script(script: &[&str]) -> (Vec<Result<String, BackendError>>, LlamaServerBackend) {
    let fake = FakeServer {
        script: Some(script.iter().map(ToString::to_string).collect()),
        ..FakeServer::default()
    };
    let backend = LlamaServerBackend::connect(spawn_fake(fake).await)
        .await
        .unwrap();

    let items: Vec<_> = backend
        .generate(RequestId::random(), Prompt::Text("Hello".into()), params(16))
        .await
        .unwrap()
        .map(|item| item.map(|output| output.outputs[0].text.clone()))
        .collect()
        .await;
    (items, backend)
}

#[tokio::test]
async fn malformed_chunk_is_a_protocol_error() {
    let (items, backend) = run_script(&[
        r#"{"content": "Hi", "tokens": [10], "stop": false}"#,
        r#"{"content": 42"#,
    ])
    .await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Hi");
    assert!(matches!(&items[1], Err(BackendError::Protocol(_))));
    assert_eq!(backend.active_requests(), 0);
}

#[tokio::test]
async fn error_chunk_mid_stream_is_an_upstream_error() {
    let (items, backend) = run_script(&[
        r#"{"content": "Hi", "tokens": [10], "stop": false}"#,
        r#"{"error": {"code": 500, "message": "slot unavailable"}}"#,
    ])
    .await;

    assert_eq!(items.len(), 2);
    assert!(matches!(&items[1], Err(BackendError::Upstream(msg)) if msg == "slot unavailable"));
    assert_eq!(backend.active_requests(), 0);
}

#[tokio::test]
async fn stream_closed_before_final_chunk_is_a_protocol_error() {
    let (items, backend) =
        run_script(&[r#"{"content": "Hi", "tokens": [10], "stop": false}"#]).await;

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Hi");
    assert!(matches!(&items[1], Err(BackendError::Protocol(msg)) if msg.contains("final chunk")));
    assert_eq!(backend.active_requests(), 0);
}

#[tokio::test]
async fn zero_logprobs_align_with_token_ids() {
    let fake = FakeServer {
        script: Some(vec![
            json!({
                "content": "Hi", "tokens": [10], "stop": true, "stop_type": "eos",
                "completion_probabilities": [{
                    "id": 10, "token": "Hi", "logprob": -0.25,
                    "top_logprobs": [{"id": 10, "token": "Hi", "logprob": -0.25}]
                }]
            })
            .to_string(),
        ]),
        ..FakeServer::default()
    };
    let backend = LlamaServerBackend::connect(spawn_fake(fake.clone()).await)
        .await
        .unwrap();

    let outputs: Vec<_> = backend
        .generate(
            RequestId::random(),
            Prompt::Text("Hello".into()),
            SamplingParams {
                logprobs: Some(0),
                ..SamplingParams::default()
            },
        )
        .await
        .unwrap()
        .collect()
        .await;

    let last = outputs.last().unwrap().as_ref().unwrap();
    let completion = &last.outputs[0];
    assert_eq!(completion.finish_reason, Some(FinishReason::Stop));
    assert_eq!(completion.logprobs.as_ref().map(Vec::len), Some(completion.token_ids.len()));
    assert_eq!(fake.bodies.lock().unwrap()[0]["n_probs"], 1);
}
