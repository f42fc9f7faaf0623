mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    BrokerSettings, LoggingSettings, PersistenceSettings, ServerSettings, Settings,
    TimeSyncSettings,
};

/// Prefix of environment variables, e.g. `NT__SERVER__PORT=5811`.
pub const ENV_PREFIX: &str = "NT";

/// Loads `config/default.*` (if present) and `NT__*` environment variables,
/// then fills anything missing from `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    load_config_from("config/default")
}

pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}
