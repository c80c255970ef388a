//! Configuration loading for the ZNP crates
//!
//! Sources are layered with figment. Priority (highest to lowest):
//! 1. Environment variables (prefixed, `__` separates nested keys)
//! 2. Config file (format picked by extension)
//! 3. `Default` values of the target type

use crate::{Error, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Build the default + environment layers shared by every loader
fn base_figment<T>(env_prefix: Option<&str>) -> Figment
where
    T: Serialize + Default,
{
    let figment = Figment::from(Serialized::defaults(T::default()));
    match env_prefix {
        Some(prefix) => figment.merge(Env::prefixed(prefix).split("__")),
        None => figment,
    }
}

/// Load configuration from defaults and environment variables only
pub fn load_config<T>(env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
{
    base_figment::<T>(Some(env_prefix))
        .extract()
        .map_err(Error::from)
}

/// Load configuration from a specific file, optionally overlaid with
/// prefixed environment variables
pub fn load_config_from_file<T, P>(path: P, env_prefix: Option<&str>) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Serialize + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::config_file(path, "no extension"))?;

    if !path.exists() {
        return Err(Error::config_file(path, "not found"));
    }

    let file_layer = match extension {
        "toml" => Figment::new().merge(Toml::file(path)),
        "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
        "json" => Figment::new().merge(Json::file(path)),
        _ => {
            return Err(Error::config_file(
                path,
                format!("unsupported format: {}", extension),
            ));
        },
    };

    debug!("Loading config: {}", path.display());

    // File sits between defaults and env
    let mut figment = Figment::from(Serialized::defaults(T::default())).merge(file_layer);
    if let Some(prefix) = env_prefix {
        figment = figment.merge(Env::prefixed(prefix).split("__"));
    }

    figment
        .extract()
        .map_err(|e| Error::config_file(path, e.to_string()))
}
