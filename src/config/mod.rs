//! Configuration loading
//!
//! Settings come from an optional `config/default` file overlaid with
//! environment variables. Variables may carry a prefix so several brokers or
//! clients can share one environment: with prefix `orders` the port is read
//! from `ORDERS_BROADCAST_PORT`.

mod settings;

use config::{Config, ConfigError, Environment, File};

use settings::PartialSettings;

pub use settings::{
    ClientSettings, ConnectionSettings, DEFAULT_HOST, DEFAULT_RECONNECT_DELAY_MS, Settings,
    TransportSettings,
};

/// Upper-case `prefix` and terminate it with `_`. Empty stays empty.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        String::new()
    } else if prefix.ends_with('_') {
        prefix.to_uppercase()
    } else {
        format!("{}_", prefix.to_uppercase())
    }
}

/// Loads settings from `config/default` and the environment, then merges
/// them onto the defaults.
pub fn load_config(prefix: &str) -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(environment(prefix));

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(Settings::merge(partial))
}

fn environment(prefix: &str) -> Environment {
    let prefix = normalize_prefix(prefix);
    let env = match prefix.strip_suffix('_') {
        Some(stem) => Environment::with_prefix(stem).prefix_separator("_"),
        None => Environment::default(),
    };
    env.try_parsing(true)
}
