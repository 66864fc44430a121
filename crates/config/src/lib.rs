// SPDX-License-Identifier: PolyForm-Shield-1.0

//! Startup configuration: a single JSON document read once at process
//! start (§6). Unknown keys are ignored; missing required keys fail
//! startup loudly rather than silently defaulting.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_CACHE_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("config file {path} is missing required field '{field}'")]
    MissingField { path: PathBuf, field: &'static str },
}

/// Resolved, validated startup configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub model_dir: PathBuf,
    pub static_dir: Option<PathBuf>,
    /// Path to the process-wide `SessionConfig` blob, read once (§3, §5).
    pub session_config_path: Option<PathBuf>,
    pub base: String,
    pub log_file: Option<PathBuf>,
    pub verbose: u8,
    pub server_key: Option<PathBuf>,
    pub server_crt: Option<PathBuf>,
    pub cache_limit: usize,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    port: Option<u16>,
    #[serde(rename = "modelDir")]
    model_dir: Option<String>,
    #[serde(rename = "staticDir", default)]
    static_dir: Option<String>,
    #[serde(rename = "configProto", default)]
    config_proto: Option<String>,
    #[serde(default)]
    base: Option<String>,
    #[serde(rename = "logFile", default)]
    log_file: Option<String>,
    #[serde(default)]
    verbose: Option<u8>,
    #[serde(rename = "serverKey", default)]
    server_key: Option<String>,
    #[serde(rename = "serverCrt", default)]
    server_crt: Option<String>,
    #[serde(rename = "cacheLimit", default)]
    cache_limit: Option<usize>,
}

/// Read and validate a config document from `path`.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let raw_text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&raw_text, path)
}

fn parse(raw_text: &str, path: &Path) -> Result<Config, ConfigError> {
    let raw: RawConfig = serde_json::from_str(raw_text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let port = raw.port.ok_or_else(|| ConfigError::MissingField {
        path: path.to_path_buf(),
        field: "port",
    })?;
    let model_dir = raw.model_dir.ok_or_else(|| ConfigError::MissingField {
        path: path.to_path_buf(),
        field: "modelDir",
    })?;

    let cache_limit = match raw.cache_limit {
        None | Some(0) => DEFAULT_CACHE_LIMIT,
        Some(n) => n,
    };

    Ok(Config {
        port,
        model_dir: PathBuf::from(model_dir),
        static_dir: raw.static_dir.map(PathBuf::from),
        session_config_path: raw.config_proto.map(PathBuf::from),
        base: raw.base.unwrap_or_else(|| "/".to_string()),
        log_file: raw.log_file.map(PathBuf::from),
        verbose: raw.verbose.unwrap_or(0),
        server_key: raw.server_key.map(PathBuf::from),
        server_crt: raw.server_crt.map(PathBuf::from),
        cache_limit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_required_field_fails() {
        let err = parse(r#"{"port": 8183}"#, Path::new("config.json")).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "modelDir", .. }));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let config = parse(
            r#"{"port": 8183, "modelDir": "/tmp/models", "totallyUnknown": true}"#,
            Path::new("config.json"),
        )
        .unwrap();
        assert_eq!(config.port, 8183);
        assert_eq!(config.model_dir, PathBuf::from("/tmp/models"));
    }

    #[test]
    fn cache_limit_defaults_when_absent_or_zero() {
        let absent = parse(r#"{"port": 1, "modelDir": "m"}"#, Path::new("c.json")).unwrap();
        assert_eq!(absent.cache_limit, DEFAULT_CACHE_LIMIT);

        let zero = parse(
            r#"{"port": 1, "modelDir": "m", "cacheLimit": 0}"#,
            Path::new("c.json"),
        )
        .unwrap();
        assert_eq!(zero.cache_limit, DEFAULT_CACHE_LIMIT);

        let explicit = parse(
            r#"{"port": 1, "modelDir": "m", "cacheLimit": 25}"#,
            Path::new("c.json"),
        )
        .unwrap();
        assert_eq!(explicit.cache_limit, 25);
    }

    #[test]
    fn load_from_file_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"port": 8183, "modelDir": "models"}"#).unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.port, 8183);
    }
}
