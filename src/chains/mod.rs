//! Per-coin-family transaction encoders.
//!
//! Each module walks a proposed transaction, builds the device-facing
//! signing request and applies the device's results back onto the proposal.

pub mod bitcoin;
pub mod ethereum;
