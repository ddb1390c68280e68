// Configuration management module
// TOML settings stored in the data directory next to the index

pub mod settings;


pub use settings::{
    Config, ConfigError, DATA_DIR_ENV, OllamaConfig, RetrievalConfig, RetryConfig,
};

/// Get the data directory path
#[inline]
pub fn get_data_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_data_dir()
}

/// Print the effective configuration
#[inline]
pub fn show_config(config: &Config) -> anyhow::Result<()> {
    println!("Data directory: {}", config.get_base_dir().display());
    println!("Config file:    {}", config.config_file_path().display());
    println!("Index file:     {}", config.index_path().display());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
