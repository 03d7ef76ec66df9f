//! The opaque boundary to a connected hardware signing device.
//!
//! Every operation is a single blocking request/response round trip; the
//! device may take seconds to minutes while it waits for physical user
//! confirmation. Cancellation happens only through the device's own abort
//! mechanism, which surfaces as [`DeviceError::Aborted`]. This layer never
//! retries.

use async_trait::async_trait;
use ethers_core::types::Address;
use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::{
    BtcCoin, BtcScriptConfigWithKeypath, BtcSignMessageResult, BtcSignRequest, BtcSignResult,
    BtcSimpleType, BtcXpubType, EthPubKind, EthSignEip1559Request, EthSignRequest,
};

#[derive(Error, Debug)]
pub enum DeviceError {
    /// The user declined the operation on the device.
    #[error("operation aborted on the device")]
    Aborted,

    /// Any other firmware or transport failure, passed through verbatim.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub name: String,
    pub initialized: bool,
    pub version: String,
}

/// One method per firmware operation. Implementations own the transport,
/// encryption and wire encoding.
#[async_trait]
pub trait Device: Send + Sync {
    async fn device_info(&self) -> DeviceResult<DeviceInfo>;

    async fn root_fingerprint(&self) -> DeviceResult<Vec<u8>>;

    /// Firmware version, used for capability gating.
    fn version(&self) -> &Version;

    fn supports_ltc(&self) -> bool;

    fn supports_eth(&self, chain_id: u64) -> bool;

    fn supports_erc20(&self, contract_address: Address) -> bool;

    async fn btc_address(
        &self,
        coin: BtcCoin,
        keypath: Vec<u32>,
        simple_type: BtcSimpleType,
        display: bool,
    ) -> DeviceResult<String>;

    async fn btc_xpub(
        &self,
        coin: BtcCoin,
        keypath: Vec<u32>,
        xpub_type: BtcXpubType,
        display: bool,
    ) -> DeviceResult<String>;

    /// Ethereum address or xpub retrieval. `contract_address` is non-empty
    /// for ERC-20 display so the device shows the token unit.
    async fn eth_pub(
        &self,
        chain_id: u64,
        keypath: Vec<u32>,
        kind: EthPubKind,
        display: bool,
        contract_address: Vec<u8>,
    ) -> DeviceResult<String>;

    async fn btc_sign(&self, request: BtcSignRequest) -> DeviceResult<BtcSignResult>;

    async fn btc_sign_message(
        &self,
        coin: BtcCoin,
        script_config: BtcScriptConfigWithKeypath,
        message: Vec<u8>,
    ) -> DeviceResult<BtcSignMessageResult>;

    async fn eth_sign(&self, request: EthSignRequest) -> DeviceResult<Vec<u8>>;

    async fn eth_sign_eip1559(&self, request: EthSignEip1559Request) -> DeviceResult<Vec<u8>>;

    async fn eth_sign_message(
        &self,
        chain_id: u64,
        keypath: Vec<u32>,
        message: Vec<u8>,
    ) -> DeviceResult<Vec<u8>>;

    async fn eth_sign_typed_message(
        &self,
        chain_id: u64,
        keypath: Vec<u32>,
        data: Vec<u8>,
    ) -> DeviceResult<Vec<u8>>;
}
