//! # pmbridge
//!
//! Drives `pnpm install` as a child process and turns its ndjson reporter
//! output into counts, log entries and a single pass/fail outcome.
//!
//! ## Usage
//!
//! ```bash
//! pmbridge install [--dev] [--cwd DIR] left-pad @babel/core@7
//! ```
//!
//! ## Modules
//!
//! - `config` - Layered configuration (defaults, `pmbridge.toml`, `PMBRIDGE_*` variables)
//! - `error` - Crate error type and numeric error codes
//! - `install` - Install entry point, aggregation, diagnostics and outcome reconciliation
//! - `protocol` - Decoding and classification of reporter records
//! - `subprocess` - Process spawning, line framing and a scripted runner for tests
pub mod config;
pub mod error;
pub mod install;
pub mod protocol;
pub mod subprocess;

pub use config::BridgeConfig;
pub use error::{BridgeError, ErrorCode};
pub use install::{
    InstallOutcome, InstallRequest, InstallSummary, ModuleRequest, PackageInstaller,
    PnpmInstaller,
};
