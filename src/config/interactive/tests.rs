use super::load_existing_config as load_existing_config_impl;
use tempfile::TempDir;

#[test]
fn load_existing_config_falls_back_to_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path());

    assert_eq!(config.base_dir, temp_dir.path());
    assert!(!config.ollama.host.is_empty());
    assert!(config.ollama.port > 0);
    assert!(!config.ollama.embedding_model.is_empty());
    assert!(config.ollama.batch_size > 0);
}

#[test]
fn load_existing_config_ignores_broken_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "[ollama")
        .expect("should write broken config");

    let config = load_existing_config_impl(temp_dir.path());
    assert_eq!(config.retrieval.top_k, 4);
}
