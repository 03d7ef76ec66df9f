//! Keystore adapter for an external hardware signing device.
//!
//! This crate translates coin-agnostic transaction proposals coming from a
//! multi-coin wallet backend into the message sequence the device firmware
//! protocol expects, and maps the device's responses back into signatures and
//! proposal mutations.
//!
//! The physical transport (USB/HID framing, encryption, wire encoding), the
//! wallet account layer and blockchain clients are external collaborators:
//! they sit behind the [`device::Device`] and
//! [`chains::bitcoin::AccountSource`] traits and are out of scope here.

pub mod chains;
pub mod device;
pub mod error;
pub mod features;
pub mod keystore;
pub mod messages;
pub mod types;

pub use error::{Error, Result};
pub use keystore::{Keystore, KeystoreType, TransactionProposal};
