//! Typed events decoded from the installer's ndjson reporter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity attached to user-facing messages and log entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Progress,
    Warn,
    Error,
}

impl LogLevel {
    /// Levels a reporter record may carry as a user-facing message
    pub fn from_reporter(level: &str) -> Option<Self> {
        match level {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Progress => "progress",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Package resolution state reported by `pnpm:progress`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Fetched,
    FoundInStore,
    Resolved,
}

impl ProgressStatus {
    pub fn parse(status: &str) -> Option<Self> {
        match status {
            "fetched" => Some(Self::Fetched),
            "found_in_store" => Some(Self::FoundInStore),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetched => "fetched",
            Self::FoundInStore => "found_in_store",
            Self::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    Prod,
    Dev,
    Optional,
}

/// A package named in a `pnpm:root` change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_type: Option<DependencyType>,
}

impl fmt::Display for PackageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} ({})", self.name, version),
            None => f.write_str(&self.name),
        }
    }
}

/// One decoded reporter record.
///
/// Produced once per input record and consumed in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    Info {
        level: LogLevel,
        message: String,
    },
    Progress {
        package_id: String,
        status: ProgressStatus,
    },
    Link {
        target: String,
        link: String,
    },
    Importing {
        from: String,
        method: String,
        to: String,
    },
    RootChange {
        added: Option<PackageRef>,
        removed: Option<PackageRef>,
    },
    Stats {
        added: Option<u64>,
        removed: Option<u64>,
        /// The full record, kept for the stats log line
        payload: serde_json::Value,
    },
    Unrecognized {
        raw: Vec<u8>,
    },
    DecodeError {
        raw: Vec<u8>,
        cause: String,
    },
}

impl ProtocolEvent {
    pub fn decode_error(raw: &[u8], cause: impl Into<String>) -> Self {
        Self::DecodeError {
            raw: raw.to_vec(),
            cause: cause.into(),
        }
    }

    /// Short name of the variant, for tracing
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Info { .. } => "info",
            Self::Progress { .. } => "progress",
            Self::Link { .. } => "link",
            Self::Importing { .. } => "importing",
            Self::RootChange { .. } => "root",
            Self::Stats { .. } => "stats",
            Self::Unrecognized { .. } => "unrecognized",
            Self::DecodeError { .. } => "decode_error",
        }
    }
}
