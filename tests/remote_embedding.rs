use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

use kex_mem::config::{ProviderKind, VectorConfig};
use kex_mem::embedding::{Embedder, RemoteEmbedder};

const DIM: usize = 4;

#[derive(Default)]
struct MockState {
    /// Inputs of every request, in arrival order.
    batches: Mutex<Vec<Vec<String>>>,
    auth: Mutex<Vec<String>>,
    /// Statuses to return before answering normally.
    failures: Mutex<Vec<StatusCode>>,
}

/// Embeds text "n" as `[n, 0, 0, 0]` and returns the items in reverse order.
async fn embeddings(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.auth.lock().unwrap().push(auth.to_string());
    }

    let inputs: Vec<String> = body["input"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    state.batches.lock().unwrap().push(inputs.clone());

    if let Some(status) = state.failures.lock().unwrap().pop() {
        return (status, Json(json!({"error": {"message": "mock failure"}})));
    }

    let mut data: Vec<Value> = inputs
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let n: f32 = text.parse().unwrap_or(0.0);
            let mut embedding = vec![0.0f32; DIM];
            embedding[0] = n;
            json!({"object": "embedding", "index": i, "embedding": embedding})
        })
        .collect();
    data.reverse();

    (
        StatusCode::OK,
        Json(json!({"object": "list", "model": body["model"], "data": data})),
    )
}

async fn start_mock(state: Arc<MockState>) -> String {
    let app = Router::new()
        .route("/v1/embeddings", post(embeddings))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/v1", addr)
}

fn config(api_base: String, max_batch_size: usize, max_retries: u32) -> VectorConfig {
    VectorConfig {
        enabled: true,
        provider: ProviderKind::Remote,
        dimension: Some(DIM),
        credential: Some("sk-test".to_string()),
        api_base,
        max_batch_size,
        max_retries,
        timeout_secs: 5,
        ..VectorConfig::default()
    }
}

fn texts(n: usize) -> Vec<String> {
    (1..=n).map(|i| i.to_string()).collect()
}

#[tokio::test]
async fn test_shuffled_response_is_reordered() {
    let state = Arc::new(MockState::default());
    let base = start_mock(state.clone()).await;
    let embedder = RemoteEmbedder::new(&config(base, 512, 0)).unwrap();

    let vectors = embedder.embed_batch(&texts(3)).await.unwrap();
    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, vec![1.0, 2.0, 3.0]);

    assert_eq!(state.auth.lock().unwrap().as_slice(), ["Bearer sk-test"]);
}

#[tokio::test]
async fn test_large_input_is_split_into_sequential_batches() {
    let state = Arc::new(MockState::default());
    let base = start_mock(state.clone()).await;
    let embedder = RemoteEmbedder::new(&config(base, 2, 0)).unwrap();

    let vectors = embedder.embed_batch(&texts(5)).await.unwrap();
    assert_eq!(vectors.len(), 5);
    let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
    assert_eq!(firsts, vec![1.0, 2.0, 3.0, 4.0, 5.0]);

    let sizes: Vec<usize> = state.batches.lock().unwrap().iter().map(|b| b.len()).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn test_single_embed() {
    let state = Arc::new(MockState::default());
    let base = start_mock(state).await;
    let embedder = RemoteEmbedder::new(&config(base, 512, 0)).unwrap();

    let vector = embedder.embed("7").await.unwrap();
    assert_eq!(vector, vec![7.0, 0.0, 0.0, 0.0]);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let state = Arc::new(MockState::default());
    state
        .failures
        .lock()
        .unwrap()
        .push(StatusCode::SERVICE_UNAVAILABLE);
    let base = start_mock(state.clone()).await;
    let embedder = RemoteEmbedder::new(&config(base, 512, 1)).unwrap();

    let vectors = embedder.embed_batch(&texts(2)).await.unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(state.batches.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let state = Arc::new(MockState::default());
    state.failures.lock().unwrap().push(StatusCode::BAD_REQUEST);
    let base = start_mock(state.clone()).await;
    let embedder = RemoteEmbedder::new(&config(base, 512, 3)).unwrap();

    let err = embedder.embed_batch(&texts(1)).await.unwrap_err();
    assert!(err.to_string().contains("400"), "{}", err);
    assert_eq!(state.batches.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_wrong_dimension_is_rejected() {
    let state = Arc::new(MockState::default());
    let base = start_mock(state).await;
    let mut cfg = config(base, 512, 0);
    cfg.dimension = Some(8);
    let embedder = RemoteEmbedder::new(&cfg).unwrap();

    assert!(embedder.embed_batch(&texts(1)).await.is_err());
}

#[test]
fn test_missing_credential_fails_fast() {
    if std::env::var("OPENAI_API_KEY").is_ok() {
        return;
    }
    let mut cfg = config("http://127.0.0.1:9/v1".to_string(), 512, 0);
    cfg.credential = None;
    assert!(RemoteEmbedder::new(&cfg).is_err());
}
