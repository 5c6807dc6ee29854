//! Shared domain types for the vigil alerting core.
//!
//! Everything that crosses a crate boundary lives here: rule definitions,
//! label sets, evaluation verdicts, alert states, alert instances, and the
//! transition events handed to the notification fan-out.

pub mod types;
