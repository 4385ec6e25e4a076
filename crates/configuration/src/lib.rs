use crate::error::ConfigError;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{Batch, Config, Ledger, Margin};

/// Loads the engine configuration.
///
/// Reads `tally.toml` if present and applies `TALLY_`-prefixed environment
/// overrides (e.g. `TALLY_BATCH__MAX_WORKERS=16`). Every setting has a
/// default, so a missing file is not an error.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("tally").required(false))
        .add_source(config::Environment::with_prefix("TALLY").separator("__"))
        .build()?;

    let config = builder.try_deserialize::<Config>()?;

    if config.ledger.money_scale > 8 {
        return Err(ConfigError::ValidationError(
            "ledger.money_scale above 8 is not a currency scale".to_string(),
        ));
    }
    Ok(config)
}
