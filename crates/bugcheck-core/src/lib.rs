//! Core types and errors for the bugcheck runtime.
//!
//! This crate provides the value types every other bugcheck crate shares:
//!
//! - **Status**: the normalized verdict a diagnostic unit reports ([`StatusRecord`])
//! - **Commands**: the immutable result of running a command on one or many hosts ([`CommandResult`])
//! - **Versions**: product and engine version parsing and comparison ([`Version`])
//! - **Errors**: structural and environmental failures ([`BugcheckError`])
//!
//! # Example
//!
//! ```rust,ignore
//! use bugcheck_core::{CommandOutput, CommandResult};
//!
//! let result = CommandResult::fan_out(vec![
//!     ("cvp1".into(), CommandOutput::lines(&["ok"], 0)),
//!     ("cvp2".into(), CommandOutput::lines(&[], 2)),
//! ]);
//! assert_eq!(result.exit_code(), 2);
//! ```

mod error;
pub mod types;

pub use error::{BugcheckError, Result};
pub use types::*;
