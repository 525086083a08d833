// Configuration management module
// TOML settings for the Ollama adapters, chunking and retrieval

pub mod interactive;
pub mod settings;

pub use interactive::{run_interactive_config, show_config};
pub use settings::{
    Config, ConfigError, OllamaConfig, RetrievalConfig, validate_collection_name,
};

/// Resolve the directory holding `config.toml` and the vector database
#[inline]
pub fn resolve_config_dir(
    explicit: Option<std::path::PathBuf>,
) -> Result<std::path::PathBuf, ConfigError> {
    match explicit {
        Some(dir) => Ok(dir),
        None => Config::default_dir(),
    }
}
