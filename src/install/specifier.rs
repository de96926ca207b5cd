use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, ErrorCode};

/// A module the caller wants installed: a package name plus an optional range
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModuleRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<String>,
}

impl ModuleRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, range: impl Into<String>) -> Self {
        self.range = Some(range.into());
        self
    }

    /// The `name[@range]` form the installer accepts on its command line
    pub fn npm_specifier(&self) -> String {
        match &self.range {
            Some(range) => format!("{}@{}", self.name, range),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ModuleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.npm_specifier())
    }
}

impl FromStr for ModuleRequest {
    type Err = BridgeError;

    /// Accepts `name`, `name@range`, `@scope/name` and `@scope/name@range`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |why: &str| {
            BridgeError::config_with_code(
                ErrorCode::CONFIG_INVALID_VALUE,
                format!("invalid module specifier '{}': {}", s, why),
                None,
            )
        };

        // Skip the leading '@' of a scope when looking for the range separator
        let search_from = usize::from(s.starts_with('@'));
        let (name, range) = match s[search_from..].find('@') {
            Some(idx) => {
                let split = search_from + idx;
                (&s[..split], Some(&s[split + 1..]))
            }
            None => (s, None),
        };

        if name.is_empty() || name == "@" {
            return Err(invalid("missing package name"));
        }
        if name.starts_with('@') && !name.contains('/') {
            return Err(invalid("scoped name needs a '/'"));
        }
        if name.chars().any(char::is_whitespace) {
            return Err(invalid("whitespace in package name"));
        }

        Ok(Self {
            name: name.to_string(),
            range: range.filter(|r| !r.is_empty()).map(str::to_string),
        })
    }
}
