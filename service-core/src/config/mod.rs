use config::{Config, ConfigError, Environment, Map};
use serde::de::DeserializeOwned;
use std::collections::HashMap;

/// Snapshot of the process environment, after loading `.env` if one exists.
pub fn snapshot_env() -> HashMap<String, String> {
    dotenvy::dotenv().ok();

    std::env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

/// Deserializes a flat key/value snapshot through the `config` crate.
///
/// Keys are matched case-insensitively against lowercase field names, so
/// `NODE_ENV` lands on `node_env`. Empty values count as unset and unknown
/// keys are ignored.
pub fn from_key_values<T: DeserializeOwned>(
    raw: &HashMap<String, String>,
) -> Result<T, ConfigError> {
    // config parses keys as path expressions; anything else would abort the build.
    let source: Map<String, String> = raw
        .iter()
        .filter(|(key, _)| key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        .map(|(key, value)| (key.to_lowercase(), value.clone()))
        .collect();

    let config = Config::builder()
        .add_source(
            Environment::default()
                .source(Some(source))
                .ignore_empty(true),
        )
        .build()?;

    config.try_deserialize()
}
