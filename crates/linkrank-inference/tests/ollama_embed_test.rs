//! Ollama embedding backend against a mock HTTP server.
//!
//! Verifies the `/api/embed` request shape and how non-success responses
//! and malformed payloads map onto the error taxonomy.

#![cfg(feature = "ollama")]

use linkrank_core::{EmbeddingBackend, Error};
use linkrank_inference::{OllamaConfig, OllamaEmbedder};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> OllamaEmbedder {
    OllamaEmbedder::with_config(
        OllamaConfig::default()
            .with_base_url(server.uri())
            .with_model("test-embed", 3),
    )
    .expect("client builds")
}

#[tokio::test]
async fn test_embed_texts_posts_model_and_inputs() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "test-embed",
            "input": ["first page", "second page"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let texts = vec!["first page".to_string(), "second page".to_string()];
    let vectors = backend(&server).embed_texts(&texts).await.unwrap();

    assert_eq!(vectors.len(), 2);
    assert_eq!(vectors[1].as_slice(), &[0.4, 0.5, 0.6]);
}

#[tokio::test]
async fn test_server_error_is_embedding_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .embed_texts(&["x".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Embedding(ref m) if m.contains("model not loaded")));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_count_mismatch_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.1, 0.2, 0.3]]
        })))
        .mount(&server)
        .await;

    let err = backend(&server)
        .embed_texts(&["a".to_string(), "b".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Embedding(ref m) if m.contains("1 embeddings for 2 inputs")));
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .embed_texts(&["a".to_string()])
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Embedding(ref m) if m.contains("parse")));
}
