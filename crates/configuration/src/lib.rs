// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{AlertSettings, CacheSettings, FeedSettings, IndicatorSettings, Settings};

/// Loads the application configuration from the `config.toml` file.
///
/// Every field has a default, so a missing file yields the default
/// configuration rather than an error; a present file only needs to name
/// the values it overrides.
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config.toml").required(false))
        .add_source(config::Environment::with_prefix("TICKMUX").separator("__"))
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;

    Ok(settings)
}
