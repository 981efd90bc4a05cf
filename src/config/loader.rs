//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::LedgerConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// Relative artifact paths are resolved against the config file's directory.
pub fn load_config(path: &Path) -> Result<LedgerConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_config(&content, base, |name| std::env::var(name).ok())
}

/// Parse, apply environment overrides, resolve paths and validate.
///
/// `env` looks up environment variables; tests pass a closure over a fixed map.
pub fn parse_config(
    content: &str,
    base_dir: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> Result<LedgerConfig, ConfigError> {
    let mut config: LedgerConfig = toml::from_str(content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config, &env);
    resolve_paths(&mut config, base_dir);

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut LedgerConfig, env: &impl Fn(&str) -> Option<String>) {
    for network in &mut config.networks {
        let Some(var) = &network.rpc_url_env else {
            continue;
        };
        if let Some(url) = env(var).filter(|url| !url.trim().is_empty()) {
            tracing::debug!(network = %network.name, env = %var, "RPC URL taken from environment");
            network.rpc_url = url;
        }
    }
}

fn resolve_paths(config: &mut LedgerConfig, base_dir: &Path) {
    let resolve = |path: &PathBuf| -> PathBuf {
        if path.is_absolute() {
            path.clone()
        } else {
            base_dir.join(path)
        }
    };

    config.contracts.address_book = resolve(&config.contracts.address_book);
    for abi in &mut config.contracts.abis {
        abi.path = resolve(&abi.path);
    }
    if let Some(cursor_path) = &config.events.cursor_path {
        config.events.cursor_path = Some(resolve(cursor_path));
    }
}
