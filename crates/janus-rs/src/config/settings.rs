//! Configuration loading.
//!
//! The config file path comes from `JANUS_CONFIG_PATH`, falling back to
//! `./config.json`. The file must resolve to somewhere inside the working
//! directory and stay under a size bound; `${VAR}` placeholders in the raw
//! text are expanded from the environment before parsing, which is how
//! origin URLs are overridden per deployment.

use crate::models::settings::Settings;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Size bound on the config file, enforced before the file is read.
const CONFIG_SIZE_LIMIT: u64 = 1024 * 1024;

/// Problems that stop configuration from loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config path '{path}' escapes the working directory")]
    OutsideWorkingDir { path: String },

    #[error("config file '{path}' is {size} bytes, limit is {limit}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("config file '{path}' is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Loads proxy configuration from the file system.
///
/// # Errors
///
/// Returns a [`ConfigError`] when the file is missing or unreadable,
/// resolves outside the working directory, exceeds the size bound, or does
/// not parse as [`Settings`].
pub fn load_settings() -> Result<Settings, ConfigError> {
    let config_path =
        std::env::var("JANUS_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("Loading configuration from: {}", config_path);

    let resolved = resolve_config_path(&config_path)?;
    let raw = read_bounded(&resolved, &config_path)?;

    let settings: Settings =
        serde_json::from_str(&expand_env(&raw)).map_err(|source| ConfigError::Parse {
            path: config_path.clone(),
            source,
        })?;

    debug!(
        "Successfully loaded configuration with {} backends",
        settings.backends.len()
    );

    Ok(settings)
}

/// Resolves the config path and pins it inside the working directory.
///
/// Canonicalization covers the existence check and strips symlinks and
/// relative segments, so the containment test sees the real location.
fn resolve_config_path(config_path: &str) -> Result<PathBuf, ConfigError> {
    let io = |source| ConfigError::Io {
        path: config_path.to_string(),
        source,
    };

    let resolved = Path::new(config_path).canonicalize().map_err(io)?;
    let working_dir = std::env::current_dir().map_err(io)?;

    if resolved.starts_with(&working_dir) {
        Ok(resolved)
    } else {
        Err(ConfigError::OutsideWorkingDir {
            path: config_path.to_string(),
        })
    }
}

/// Reads the file after checking its size against [`CONFIG_SIZE_LIMIT`].
fn read_bounded(resolved: &Path, config_path: &str) -> Result<String, ConfigError> {
    let io = |source| ConfigError::Io {
        path: config_path.to_string(),
        source,
    };

    let size = fs::metadata(resolved).map_err(io)?.len();
    if size > CONFIG_SIZE_LIMIT {
        return Err(ConfigError::TooLarge {
            path: config_path.to_string(),
            size,
            limit: CONFIG_SIZE_LIMIT,
        });
    }

    fs::read_to_string(resolved).map_err(io)
}

/// Replaces `${NAME}` placeholders with environment variable values.
///
/// Placeholders whose variable is unset are left untouched so that the
/// subsequent parse (or validation) reports them instead of silently
/// producing an empty string.
pub fn expand_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        log::warn!("Config placeholder ${{{}}} has no environment value", name);
                        out.push_str(&rest[start..start + 2 + end + 1]);
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep the remainder verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::{expand_env, resolve_config_path, ConfigError};

    #[test]
    fn missing_file_is_an_io_error() {
        let result = resolve_config_path("./no-such-janus-config.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn paths_outside_the_working_directory_are_rejected() {
        let outside = std::env::temp_dir().join("janus-config-escape-test.json");
        std::fs::write(&outside, "{}").unwrap();

        let result = resolve_config_path(outside.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::OutsideWorkingDir { .. })));

        std::fs::remove_file(&outside).ok();
    }

    #[test]
    fn expands_known_variables() {
        std::env::set_var("JANUS_TEST_ORIGIN", "http://10.0.0.5:9001");
        let raw = r#"{"url": "${JANUS_TEST_ORIGIN}"}"#;
        assert_eq!(expand_env(raw), r#"{"url": "http://10.0.0.5:9001"}"#);
        std::env::remove_var("JANUS_TEST_ORIGIN");
    }

    #[test]
    fn leaves_unknown_variables_in_place() {
        let raw = r#"{"url": "${JANUS_TEST_MISSING_VAR}"}"#;
        assert_eq!(expand_env(raw), raw);
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let raw = r#"{"url": "http://127.0.0.1:9001"}"#;
        assert_eq!(expand_env(raw), raw);
    }
}
