use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.model, "nomic-embed-text:latest");
    assert_eq!(config.ollama.batch_size, 16);
    assert_eq!(config.chunking.max_tokens, 256);
    assert_eq!(config.chunking.overlap_tokens, 32);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.retrieval.metric, DistanceMetric::Cosine);
    assert_eq!(config.retry.max_attempts, 3);
}

#[test]
fn section_defaults() {
    let retrieval = RetrievalConfig::default();
    assert_eq!(retrieval.max_context_tokens, 1024);
    assert_eq!(retrieval.embed_concurrency, 4);
    assert!(retrieval.merge_adjacent);

    let retry = RetryConfig::default();
    assert_eq!(retry.base_delay_ms, 1000);
    assert_eq!(retry.max_delay_ms, 30_000);
    assert!((retry.jitter - 0.2).abs() < f64::EPSILON);

    let policy = retry.policy();
    assert_eq!(policy.base_delay, Duration::from_millis(1000));
    assert_eq!(policy.max_delay, Duration::from_secs(30));
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.embedding_dimension = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.ollama.host = String::new();
    assert!(invalid_config.validate().is_err());
}

#[test]
fn chunking_validation() {
    let mut config = Config::default();
    config.chunking.overlap_tokens = config.chunking.max_tokens;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::OverlapTooLarge(256, 256))
    ));

    config.chunking.max_tokens = 0;
    config.chunking.overlap_tokens = 0;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidMaxTokens(0))
    ));
}

#[test]
fn retrieval_and_retry_validation() {
    let mut config = Config::default();
    config.retrieval.top_k = 0;
    assert!(matches!(config.validate(), Err(ConfigError::InvalidTopK(0))));

    let mut config = Config::default();
    config.retrieval.embed_concurrency = 0;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retry.jitter = 1.5;
    assert!(config.validate().is_err());

    let mut config = Config::default();
    config.retry.max_delay_ms = 10;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidRetryDelay(10, 1000))
    ));
}

#[test]
fn retry_policy_from_config() {
    let retry = RetryConfig {
        max_attempts: 5,
        base_delay_ms: 200,
        max_delay_ms: 2000,
        jitter: 0.0,
    };
    let policy = retry.policy();

    assert_eq!(policy.max_attempts, 5);
    assert_eq!(policy.base_delay, Duration::from_millis(200));
    assert_eq!(policy.max_delay, Duration::from_secs(2));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;

    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_config_uses_defaults() {
    let partial_toml = r#"
        [ollama]
        host = "gpu-box"

        [retrieval]
        metric = "euclidean"
    "#;

    let config: Config = toml::from_str(partial_toml).expect("should parse partial toml");
    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.retrieval.metric, DistanceMetric::Euclidean);
    assert_eq!(config.retrieval.top_k, 3);
    assert_eq!(config.chunking, ChunkingConfig::default());
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load default config");

    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.index_path(), temp_dir.path().join("index.bin"));
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let data_dir = temp_dir.path().join("nested").join("data");

    let mut config = Config {
        base_dir: data_dir.clone(),
        ..Config::default()
    };
    config.ollama.embedding_dimension = 384;
    config.chunking.max_tokens = 128;
    config.retrieval.metric = DistanceMetric::Dot;
    config.save().expect("should save config");

    let loaded = Config::load(&data_dir).expect("should load saved config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nmax_tokens = 8\noverlap_tokens = 8\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn save_rejects_invalid_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().to_path_buf(),
        ..Config::default()
    };
    config.ollama.protocol = "gopher".to_string();

    assert!(config.save().is_err());
    assert!(!config.config_file_path().exists());
}
