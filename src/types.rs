//! Account-layer data model shared across coin families.

use bitcoin::ScriptBuf;
use serde::{Deserialize, Serialize};

use crate::messages;

/// Coin identifiers of the bitcoin family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BtcCode {
    Btc,
    Tbtc,
    Rbtc,
    Ltc,
    Tltc,
}

impl BtcCode {
    /// The device protocol's coin enum value.
    pub fn msg_coin(self) -> messages::BtcCoin {
        match self {
            BtcCode::Btc => messages::BtcCoin::Btc,
            BtcCode::Tbtc => messages::BtcCoin::Tbtc,
            BtcCode::Rbtc => messages::BtcCoin::Rbtc,
            BtcCode::Ltc => messages::BtcCoin::Ltc,
            BtcCode::Tltc => messages::BtcCoin::Tltc,
        }
    }

    pub fn is_mainnet(self) -> bool {
        matches!(self, BtcCode::Btc | BtcCode::Ltc)
    }
}

/// Bitcoin-family address/output formats an account can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptType {
    P2pkh,
    P2wpkhP2sh,
    P2wpkh,
    P2tr,
}

impl ScriptType {
    /// The device's simple script configuration type. Legacy P2PKH has no
    /// device-side equivalent.
    pub fn msg_simple_type(self) -> Option<messages::BtcSimpleType> {
        match self {
            ScriptType::P2pkh => None,
            ScriptType::P2wpkhP2sh => Some(messages::BtcSimpleType::P2wpkhP2sh),
            ScriptType::P2wpkh => Some(messages::BtcSimpleType::P2wpkh),
            ScriptType::P2tr => Some(messages::BtcSimpleType::P2tr),
        }
    }
}

/// Ethereum-family coin: a chain, optionally narrowed to an ERC-20 token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthCoin {
    pub chain_id: u64,
    pub erc20_token: Option<Erc20Token>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Erc20Token {
    pub contract_address: ethers_core::types::Address,
}

/// Closed set of coin families the keystore can serve. Adding a family is a
/// compile-time visible change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coin {
    Bitcoin(BtcCode),
    Ethereum(EthCoin),
}

/// How one account derives its keys and constructs its scripts. Immutable
/// once the account exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfiguration {
    pub script_type: ScriptType,
    /// Account-level absolute keypath.
    pub keypath: Vec<u32>,
}

/// Script type and absolute keypath identifying one verification or signing
/// target. The script type is absent for ethereum keypaths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningConfiguration {
    pub script_type: Option<ScriptType>,
    pub keypath: Vec<u32>,
}

/// A wallet-controlled address as the account layer hands it to the signer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletAddress {
    pub account_configuration: AccountConfiguration,
    /// Absolute keypath of this address.
    pub keypath: Vec<u32>,
    pub pubkey_script: ScriptBuf,
    /// Tweak pubkey for silent payment sends, when the account supports it.
    pub bip352_pubkey: Option<Vec<u8>>,
}

/// A signed payment request to be displayed and validated on the device. At
/// most one per transaction in the current protocol version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub recipient_name: String,
    pub nonce: Vec<u8>,
    pub total_amount: u64,
    pub signature: Vec<u8>,
    pub memos: Vec<String>,
}

/// One per-input signature as the device returns it, split into its
/// big-endian halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub r: [u8; 32],
    pub s: [u8; 32],
}
