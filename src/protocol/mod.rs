//! pnpm ndjson reporter protocol.
//!
//! `decoder` turns a framed record into JSON, `classifier` maps that JSON onto
//! the closed [`ProtocolEvent`] set.

pub mod classifier;
pub mod decoder;
pub mod event;

pub use classifier::classify;
pub use decoder::{decode_record, is_blank};
pub use event::{DependencyType, LogLevel, PackageRef, ProgressStatus, ProtocolEvent};
