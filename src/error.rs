use bitcoin::OutPoint;
use thiserror::Error;

use crate::device::DeviceError;
use crate::types::ScriptType;

#[derive(Error, Debug)]
pub enum Error {
    #[error("coin not supported: {0}")]
    UnsupportedCoin(String),

    #[error("unsupported script type {0:?}")]
    UnsupportedScriptType(ScriptType),

    #[error("unsupported output type")]
    UnsupportedOutputType,

    #[error("unsupported transaction type {0}")]
    UnsupportedTransactionType(u8),

    #[error("contract creation not supported")]
    ContractCreationUnsupported,

    #[error("input spends unknown previous output {0}")]
    MissingPreviousOutput(OutPoint),

    #[error("a firmware upgrade is required for this feature")]
    FirmwareUpgradeRequired,

    /// The user declined the operation on the device. Not a failure that
    /// should alarm callers; the proposal is left unsigned but consistent.
    #[error("signing aborted by user")]
    SigningAborted,

    /// Opaque device error, surfaced verbatim. Also used for protocol
    /// violations in device responses (e.g. a signature count mismatch).
    #[error("device error: {0}")]
    Device(#[source] anyhow::Error),

    #[error("key derivation failed: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),

    /// The caller handed over a proposal that cannot be encoded, e.g. a
    /// silent payment send whose input addresses carry no tweak pubkey.
    #[error("invalid proposal: {0}")]
    InvalidProposal(String),
}

impl From<DeviceError> for Error {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Aborted => Error::SigningAborted,
            DeviceError::Other(err) => Error::Device(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
