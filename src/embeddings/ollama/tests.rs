use super::*;

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        generation_model: "test-llm".to_string(),
        batch_size: 128,
        embedding_dimension: 384,
        timeout_seconds: 5,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.generation_model(), "test-llm");
    assert_eq!(client.batch_size, 128);
    assert_eq!(client.dimension(), 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&OllamaConfig::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60));

    assert_eq!(client.dimension(), DEFAULT_EMBEDDING_DIMENSION as usize);
}

#[test]
fn zero_batch_size_is_clamped() {
    let config = OllamaConfig {
        batch_size: 0,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.batch_size, 1);
}

#[test]
fn error_classification() {
    assert!(classify_error(ureq::Error::StatusCode(503)).is_transient());
    assert!(classify_error(ureq::Error::StatusCode(429)).is_transient());
    assert!(classify_error(ureq::Error::ConnectionFailed).is_transient());
    assert!(classify_error(ureq::Error::HostNotFound).is_transient());
    assert!(!classify_error(ureq::Error::StatusCode(404)).is_transient());
    assert!(!classify_error(ureq::Error::StatusCode(400)).is_transient());
}

#[test]
fn empty_batch_needs_no_request() {
    // nothing listens on port 9; an empty batch must not touch the network
    let config = OllamaConfig {
        port: 9,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    let vectors = client.embed_blocking(&[]).expect("empty batch should succeed");
    assert!(vectors.is_empty());
}
