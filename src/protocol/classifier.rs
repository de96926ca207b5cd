//! Maps decoded reporter JSON onto [`ProtocolEvent`] variants.
//!
//! Tolerant reader: a record with a recognised `name` but the wrong shape is a
//! [`ProtocolEvent::DecodeError`], anything with an unknown `name` (or none at
//! all) is [`ProtocolEvent::Unrecognized`]. Extra fields are ignored.

use serde::Deserialize;
use serde_json::Value;

use super::event::{LogLevel, PackageRef, ProgressStatus, ProtocolEvent};

pub const PROGRESS: &str = "pnpm:progress";
pub const LINK: &str = "pnpm:link";
pub const IMPORTING: &str = "pnpm:importing";
pub const ROOT: &str = "pnpm:root";
pub const STATS: &str = "pnpm:stats";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressRecord {
    package_id: String,
    status: String,
}

#[derive(Deserialize)]
struct LinkRecord {
    target: String,
    link: String,
}

#[derive(Deserialize)]
struct ImportingRecord {
    from: String,
    method: String,
    to: String,
}

#[derive(Deserialize)]
struct RootRecord {
    #[serde(default)]
    added: Option<PackageRef>,
    #[serde(default)]
    removed: Option<PackageRef>,
}

#[derive(Deserialize)]
struct StatsRecord {
    #[serde(default)]
    added: Option<u64>,
    #[serde(default)]
    removed: Option<u64>,
}

/// Classify one decoded record. Total: every value maps to exactly one event.
pub fn classify(value: &Value, raw: &[u8]) -> ProtocolEvent {
    if !value.is_object() {
        return ProtocolEvent::Unrecognized { raw: raw.to_vec() };
    }

    if let Some((level, message)) = user_message(value) {
        return ProtocolEvent::Info {
            level,
            message: message.to_string(),
        };
    }

    let Some(name) = value.get("name").and_then(Value::as_str) else {
        return ProtocolEvent::Unrecognized { raw: raw.to_vec() };
    };

    let result = match name {
        PROGRESS => parse_progress(value, raw),
        LINK => LinkRecord::deserialize(value).map(|r| ProtocolEvent::Link {
            target: r.target,
            link: r.link,
        }),
        IMPORTING => ImportingRecord::deserialize(value).map(|r| ProtocolEvent::Importing {
            from: r.from,
            method: r.method,
            to: r.to,
        }),
        ROOT => RootRecord::deserialize(value).map(|r| ProtocolEvent::RootChange {
            added: r.added,
            removed: r.removed,
        }),
        STATS => StatsRecord::deserialize(value).map(|r| ProtocolEvent::Stats {
            added: r.added,
            removed: r.removed,
            payload: value.clone(),
        }),
        _ => return ProtocolEvent::Unrecognized { raw: raw.to_vec() },
    };

    result.unwrap_or_else(|e| {
        ProtocolEvent::decode_error(raw, format!("malformed {} record: {}", name, e))
    })
}

/// A record carrying a user-facing `level` and a string `message`
fn user_message(value: &Value) -> Option<(LogLevel, &str)> {
    let level = value
        .get("level")
        .and_then(Value::as_str)
        .and_then(LogLevel::from_reporter)?;
    let message = value.get("message").and_then(Value::as_str)?;
    Some((level, message))
}

fn parse_progress(value: &Value, raw: &[u8]) -> Result<ProtocolEvent, serde_json::Error> {
    let record = ProgressRecord::deserialize(value)?;
    Ok(match ProgressStatus::parse(&record.status) {
        Some(status) => ProtocolEvent::Progress {
            package_id: record.package_id,
            status,
        },
        // Newer pnpm releases add statuses; treat them like unknown events
        None => ProtocolEvent::Unrecognized { raw: raw.to_vec() },
    })
}
