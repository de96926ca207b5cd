use serde_json::Value;

use super::classifier::classify;
use super::event::ProtocolEvent;

/// Decode one framed stdout record.
///
/// Never fails: a record that is not valid JSON becomes
/// [`ProtocolEvent::DecodeError`] carrying the raw bytes and the parser's
/// message, so the stream keeps flowing.
pub fn decode_record(record: &[u8]) -> ProtocolEvent {
    match serde_json::from_slice::<Value>(record) {
        Ok(value) => classify(&value, record),
        Err(e) => ProtocolEvent::decode_error(record, e.to_string()),
    }
}

/// Whitespace-only records carry nothing to decode
pub fn is_blank(record: &[u8]) -> bool {
    record.iter().all(u8::is_ascii_whitespace)
}
