//! Periscope Telemetry - logging setup for the MCP inspector.
//!
//! The inspector owns the terminal while it runs, so diagnostics normally go
//! to a rolling log file instead of stderr. This crate wires `tracing` to
//! the configured target and format.
//!
//! # Example
//!
//! ```rust,no_run
//! use periscope_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), periscope_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_file_logging("/tmp/periscope-logs", "periscope")
//!     .with_directive("periscope_mcp=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("Inspector starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
