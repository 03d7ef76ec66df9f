//! Request and response shapes of the device firmware protocol.
//!
//! These model the fixed protocol schema referenced by the signing flows.
//! The wire encoding and transport framing live behind the
//! [`Device`](crate::device::Device) boundary and are out of scope.

use std::collections::BTreeMap;

use bitcoin::Transaction;
use ethers_core::types::{H160, U256};

/// Coins of the bitcoin family known to the firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtcCoin {
    Btc,
    Tbtc,
    Ltc,
    Tltc,
    Rbtc,
}

/// Simple (single-signature) script configuration types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtcSimpleType {
    P2wpkhP2sh,
    P2wpkh,
    P2tr,
}

/// Extended public key display families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtcXpubType {
    Xpub,
    Ypub,
    Zpub,
    Tpub,
}

/// Display unit for amounts during confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BtcFormatUnit {
    #[default]
    Default,
    Sat,
}

/// A simple script configuration paired with its account keypath. Inputs and
/// outputs reference these by index; the index assignment order is part of
/// the wire contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcScriptConfigWithKeypath {
    pub simple_type: BtcSimpleType,
    pub keypath: Vec<u32>,
}

/// Output script kinds the firmware can render and commit to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BtcOutputType {
    /// Placeholder for outputs whose script the device derives itself.
    Unknown,
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    P2tr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcSignInputRequest {
    pub prev_out_hash: Vec<u8>,
    pub prev_out_index: u32,
    pub prev_out_value: u64,
    pub sequence: u32,
    /// Absolute keypath of the spent address.
    pub keypath: Vec<u32>,
    pub script_config_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcTxInput {
    pub input: BtcSignInputRequest,
    /// Per-input tweak pubkey, set for silent payment sends.
    pub bip352_pubkey: Option<Vec<u8>>,
    /// Full previous transaction, when the script configurations require it.
    pub prev_tx: Option<BtcPrevTx>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcSignOutputRequest {
    /// Whether the output pays back to an address of this keystore.
    pub ours: bool,
    pub output_type: BtcOutputType,
    pub value: u64,
    /// Hash payload extracted from the output script; empty for silent
    /// payment outputs.
    pub payload: Vec<u8>,
    /// Absolute keypath of the receiving address, when ours.
    pub keypath: Vec<u32>,
    /// Index into the input-side script configuration list.
    pub script_config_index: u32,
    /// Silent payment address, replacing the decoded script type.
    pub silent_payment: Option<String>,
    /// Index into the output-side script configuration list, for outputs of
    /// other accounts under the same keystore.
    pub output_script_config_index: Option<u32>,
    pub payment_request_index: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPrevTxInput {
    pub prev_out_hash: Vec<u8>,
    pub prev_out_index: u32,
    pub signature_script: Vec<u8>,
    pub sequence: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPrevTxOutput {
    pub value: u64,
    pub pubkey_script: Vec<u8>,
}

/// A full previous transaction streamed to the device for input validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPrevTx {
    pub version: u32,
    pub inputs: Vec<BtcPrevTxInput>,
    pub outputs: Vec<BtcPrevTxOutput>,
    pub locktime: u32,
}

impl BtcPrevTx {
    pub fn from_transaction(transaction: &Transaction) -> Self {
        use bitcoin::hashes::Hash;
        Self {
            version: transaction.version as u32,
            inputs: transaction
                .input
                .iter()
                .map(|tx_in| BtcPrevTxInput {
                    prev_out_hash: tx_in.previous_output.txid.to_byte_array().to_vec(),
                    prev_out_index: tx_in.previous_output.vout,
                    signature_script: tx_in.script_sig.to_bytes(),
                    sequence: tx_in.sequence.to_consensus_u32(),
                })
                .collect(),
            outputs: transaction
                .output
                .iter()
                .map(|tx_out| BtcPrevTxOutput {
                    value: tx_out.value,
                    pubkey_script: tx_out.script_pubkey.to_bytes(),
                })
                .collect(),
            locktime: transaction.lock_time.to_consensus_u32(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcPaymentRequestRequest {
    pub recipient_name: String,
    pub nonce: Vec<u8>,
    pub total_amount: u64,
    pub signature: Vec<u8>,
    pub memos: Vec<String>,
}

/// The complete signing request for one bitcoin-family transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcSignRequest {
    pub coin: BtcCoin,
    pub script_configs: Vec<BtcScriptConfigWithKeypath>,
    pub output_script_configs: Vec<BtcScriptConfigWithKeypath>,
    pub version: u32,
    pub inputs: Vec<BtcTxInput>,
    pub outputs: Vec<BtcSignOutputRequest>,
    pub locktime: u32,
    pub payment_requests: Vec<BtcPaymentRequestRequest>,
    pub format_unit: BtcFormatUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BtcSignResult {
    /// One 64-byte compact signature per input, in input order.
    pub signatures: Vec<Vec<u8>>,
    /// Output scripts the device derived itself (silent payment outputs),
    /// keyed by output index.
    pub generated_outputs: BTreeMap<usize, Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BtcSignMessageResult {
    /// 65-byte Electrum-style message signature.
    pub electrum_sig65: Vec<u8>,
}

/// Whether the chosen script configurations require streaming the full
/// previous transaction of every input. Only taproot spends can skip it;
/// the rule varies with the configuration set, not with a fixed list.
pub fn btc_sign_needs_prev_txs(script_configs: &[BtcScriptConfigWithKeypath]) -> bool {
    script_configs
        .iter()
        .any(|config| config.simple_type != BtcSimpleType::P2tr)
}

/// Letter casing of the recipient address as the user entered it, so the
/// device renders it identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthAddressCase {
    Mixed,
    Upper,
    Lower,
}

/// What an ethereum public-key request should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EthPubKind {
    Address,
    Xpub,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthSignRequest {
    pub chain_id: u64,
    pub keypath: Vec<u32>,
    pub nonce: U256,
    pub gas_price: U256,
    pub gas_limit: U256,
    pub recipient: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub address_case: EthAddressCase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthSignEip1559Request {
    pub chain_id: u64,
    pub keypath: Vec<u32>,
    pub nonce: U256,
    pub max_priority_fee_per_gas: U256,
    pub max_fee_per_gas: U256,
    pub gas_limit: U256,
    pub recipient: H160,
    pub value: U256,
    pub data: Vec<u8>,
    pub address_case: EthAddressCase,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(simple_type: BtcSimpleType) -> BtcScriptConfigWithKeypath {
        BtcScriptConfigWithKeypath {
            simple_type,
            keypath: vec![84 | 1 << 31, 1 << 31, 1 << 31],
        }
    }

    #[test]
    fn test_prev_txs_needed_unless_all_taproot() {
        assert!(!btc_sign_needs_prev_txs(&[]));
        assert!(!btc_sign_needs_prev_txs(&[config(BtcSimpleType::P2tr)]));
        assert!(btc_sign_needs_prev_txs(&[config(BtcSimpleType::P2wpkh)]));
        assert!(btc_sign_needs_prev_txs(&[
            config(BtcSimpleType::P2tr),
            config(BtcSimpleType::P2wpkhP2sh),
        ]));
    }
}
