use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{BridgeError, ErrorCode};
use crate::subprocess::DEFAULT_MAX_LINE_LENGTH;

const CONFIG_FILE_NAME: &str = "pmbridge.toml";

/// Directory holding the user-level `pmbridge.toml`
pub fn get_config_dir() -> Result<PathBuf, BridgeError> {
    ProjectDirs::from("dev", "pmbridge", "pmbridge")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| {
            BridgeError::config_with_code(
                ErrorCode::CONFIG_PATH_ERROR,
                "Could not determine home directory",
                None,
            )
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Package manager executable
    pub program: String,
    /// Value passed to `--reporter`
    pub reporter: String,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Longest stdout/stderr line kept; longer lines are truncated
    pub max_line_length: Option<usize>,
    /// Time between SIGTERM and SIGKILL when stopping the installer
    #[serde(with = "humantime_serde")]
    pub kill_grace: Duration,
    /// Fail otherwise successful installs that reported unknown events
    pub strict_protocol: bool,
    /// Extra environment for the installer
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: "pnpm".to_string(),
            reporter: "ndjson".to_string(),
            timeout: None,
            max_line_length: Some(DEFAULT_MAX_LINE_LENGTH),
            kill_grace: Duration::from_millis(100),
            strict_protocol: false,
            env: HashMap::new(),
        }
    }
}

impl BridgeConfig {
    /// Defaults, then the config file, then `PMBRIDGE_*` environment variables.
    ///
    /// An explicit `path` must exist; the user-level file is optional.
    pub async fn load(path: Option<&Path>) -> Result<Self, BridgeError> {
        let mut config = match path {
            Some(path) => Self::from_file(path).await?,
            None => {
                let default_path = get_config_dir()?.join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(&default_path).await?
                } else {
                    tracing::trace!("No config file at {}", default_path.display());
                    Self::default()
                }
            }
        };

        config.merge_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    pub async fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            let code = if e.kind() == std::io::ErrorKind::NotFound {
                ErrorCode::CONFIG_NOT_FOUND
            } else {
                ErrorCode::CONFIG_GENERIC
            };
            BridgeError::config_with_code(
                code,
                format!("Failed to read config file: {}", e),
                Some(path.to_path_buf()),
            )
            .with_source(e)
        })?;

        tracing::debug!("Loading config from {}", path.display());
        Self::parse(&content).map_err(|e| match e {
            BridgeError::Config { code, message, .. } => {
                BridgeError::config_with_code(code, message, Some(path.to_path_buf()))
            }
            other => other,
        })
    }

    pub fn parse(content: &str) -> Result<Self, BridgeError> {
        toml::from_str(content).map_err(|e| {
            BridgeError::config_with_code(
                ErrorCode::CONFIG_INVALID_TOML,
                format!("Invalid config: {}", e),
                None,
            )
        })
    }

    pub fn merge_env_vars(&mut self) -> Result<(), BridgeError> {
        self.merge_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn merge_vars<F>(&mut self, lookup: F) -> Result<(), BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(program) = lookup("PMBRIDGE_PROGRAM") {
            self.program = program;
        }

        if let Some(timeout) = lookup("PMBRIDGE_TIMEOUT") {
            self.timeout = parse_optional(&timeout, "PMBRIDGE_TIMEOUT", |v| {
                humantime_serde::re::humantime::parse_duration(v).map_err(|e| e.to_string())
            })?;
        }

        if let Some(limit) = lookup("PMBRIDGE_MAX_LINE_LENGTH") {
            self.max_line_length = parse_optional(&limit, "PMBRIDGE_MAX_LINE_LENGTH", |v| {
                v.parse::<usize>().map_err(|e| e.to_string())
            })?;
        }

        if let Some(strict) = lookup("PMBRIDGE_STRICT_PROTOCOL") {
            self.strict_protocol = strict
                .parse::<bool>()
                .map_err(|_| invalid_value("PMBRIDGE_STRICT_PROTOCOL", &strict, "expected true or false"))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.program.trim().is_empty() {
            return Err(invalid_value("program", &self.program, "must not be empty"));
        }
        if self.reporter.trim().is_empty() {
            return Err(invalid_value("reporter", &self.reporter, "must not be empty"));
        }
        if self.max_line_length == Some(0) {
            return Err(invalid_value("max_line_length", "0", "must be positive"));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(invalid_value("timeout", "0s", "must be positive"));
        }
        Ok(())
    }
}

/// `none` (or an empty value) clears the setting
fn parse_optional<T, F>(value: &str, key: &str, parse: F) -> Result<Option<T>, BridgeError>
where
    F: Fn(&str) -> Result<T, String>,
{
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse(value)
        .map(Some)
        .map_err(|why| invalid_value(key, value, &why))
}

fn invalid_value(key: &str, value: &str, why: &str) -> BridgeError {
    BridgeError::config_with_code(
        ErrorCode::CONFIG_INVALID_VALUE,
        format!("Invalid value '{}' for {}: {}", value, key, why),
        None,
    )
}
