//! Configuration loading helpers
//!
//! A config file is picked up by extension, then environment variables with
//! the service prefix override individual keys (`MONSRV_DEVICE__NAME=inv1`).

use std::path::Path;

use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::Deserialize;
use tracing::info;

use crate::{Error, Result};

/// Build the figment for a config file without extracting it
pub fn figment_for_file<P: AsRef<Path>>(path: P) -> Result<Figment> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::Config("Config file must have an extension".to_string()))?;

    match extension {
        "toml" => Ok(Figment::new().merge(Toml::file(path))),
        "yaml" | "yml" => Ok(Figment::new().merge(Yaml::file(path))),
        "json" => Ok(Figment::new().merge(Json::file(path))),
        _ => Err(Error::Config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

/// Load configuration from a specific file
pub fn load_config_from_file<T, P>(path: P) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    figment_for_file(path)?
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration from file: {}", e)))
}

/// Load configuration from a file with `<PREFIX>_` environment overrides
///
/// Nested keys use a double underscore: `MONSRV_MQTT__HOST`.
pub fn load_config<T, P>(path: P, env_prefix: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if !path.exists() {
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let prefix = format!("{}_", env_prefix.to_uppercase());
    info!("Loading config from {} (env prefix {})", path.display(), prefix);

    figment_for_file(path)?
        .merge(Env::prefixed(&prefix).split("__"))
        .extract()
        .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize)]
    struct Sample {
        name: String,
        #[serde(default)]
        inner: Inner,
    }

    #[derive(Debug, Default, Deserialize)]
    struct Inner {
        #[serde(default)]
        port: u16,
    }

    fn write_temp(suffix: &str, body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_temp(".yaml", "name: inverter\ninner:\n  port: 7\n");
        let sample: Sample = load_config_from_file(file.path()).unwrap();
        assert_eq!(sample.name, "inverter");
        assert_eq!(sample.inner.port, 7);
    }

    #[test]
    fn test_load_toml_file() {
        let file = write_temp(".toml", "name = \"bms\"\n");
        let sample: Sample = load_config_from_file(file.path()).unwrap();
        assert_eq!(sample.name, "bms");
        assert_eq!(sample.inner.port, 0);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_temp(".ini", "name=x\n");
        let err = load_config_from_file::<Sample, _>(file.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported config file format"));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config_from_file::<Sample, _>("/nonexistent/monsrv.yaml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_env_override() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("svc.yaml", "name: from-file\ninner:\n  port: 1\n")?;
            jail.set_env("TESTSVC_INNER__PORT", "42");
            let sample: Sample = load_config("svc.yaml", "testsvc").unwrap();
            assert_eq!(sample.name, "from-file");
            assert_eq!(sample.inner.port, 42);
            Ok(())
        });
    }
}
