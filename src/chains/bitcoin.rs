//! Bitcoin-family transaction signing.
//!
//! Walks a proposed transaction's inputs and outputs, resolves each to a
//! script configuration index, classifies output ownership and submits the
//! signing request to the device. On success the device's signatures and
//! generated scripts are applied back onto the proposal.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bitcoin::hashes::Hash;
use bitcoin::{OutPoint, Script, ScriptBuf, Transaction, TxOut, Txid};
use tracing::{error, info};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::features;
use crate::messages::{
    self, BtcFormatUnit, BtcOutputType, BtcPaymentRequestRequest, BtcPrevTx,
    BtcScriptConfigWithKeypath, BtcSignInputRequest, BtcSignOutputRequest, BtcSignRequest,
    BtcTxInput,
};
use crate::types::{BtcCode, PaymentRequest, Signature, WalletAddress};

/// Previous output spent by one input, with the wallet address that owns it.
#[derive(Debug, Clone)]
pub struct PreviousOutput {
    pub tx_out: TxOut,
    pub address: WalletAddress,
}

/// Account-layer lookups the encoder needs while classifying outputs and
/// provisioning previous transactions.
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Resolves a pubkey script to a wallet-controlled address, if any,
    /// along with whether that address belongs to the sending account.
    /// Same-account status and raw ownership are two different predicates.
    fn address_for_script(&self, script: &Script) -> Result<(Option<WalletAddress>, bool)>;

    /// Fetches the full previous transaction spent by an input.
    async fn previous_transaction(&self, txid: Txid) -> Result<Transaction>;
}

/// A bitcoin-family transaction proposal handed over by the account layer.
/// All descriptors derived from it live for one signing call only.
pub struct BtcProposedTransaction {
    pub coin: BtcCode,
    pub transaction: Transaction,
    /// Every input must resolve to exactly one entry here.
    pub previous_outputs: HashMap<OutPoint, PreviousOutput>,
    pub change_address: Option<WalletAddress>,
    /// Index of the recipient output; the silent payment address and the
    /// payment request, when present, refer to this output.
    pub recipient_output_index: usize,
    pub silent_payment_address: Option<String>,
    pub payment_request: Option<PaymentRequest>,
    pub format_unit: BtcFormatUnit,
    /// Filled with one signature per input on success.
    pub signatures: Vec<Option<Signature>>,
    pub accounts: Arc<dyn AccountSource>,
}

/// Ordered, deduplicated list of simple script configurations. Indices are
/// stable within one signing call; first-appearance order is part of the
/// wire contract.
#[derive(Default)]
struct ScriptConfigRegistry {
    configs: Vec<BtcScriptConfigWithKeypath>,
}

impl ScriptConfigRegistry {
    /// Returns the index of a structurally equal simple configuration,
    /// appending the entry if none exists. Equality is on the simple type;
    /// keypaths match at the account level by construction.
    fn add_or_reuse(&mut self, config: BtcScriptConfigWithKeypath) -> u32 {
        if let Some(index) = self
            .configs
            .iter()
            .position(|existing| existing.simple_type == config.simple_type)
        {
            return index as u32;
        }
        self.configs.push(config);
        (self.configs.len() - 1) as u32
    }

    fn configs(&self) -> &[BtcScriptConfigWithKeypath] {
        &self.configs
    }

    fn into_configs(self) -> Vec<BtcScriptConfigWithKeypath> {
        self.configs
    }
}

/// Decodes an output script into the firmware's output type plus the hash
/// payload it commits to.
fn output_type_and_payload(script: &Script) -> Result<(BtcOutputType, Vec<u8>)> {
    let bytes = script.as_bytes();
    if script.is_p2pkh() {
        Ok((BtcOutputType::P2pkh, bytes[3..23].to_vec()))
    } else if script.is_p2sh() {
        Ok((BtcOutputType::P2sh, bytes[2..22].to_vec()))
    } else if script.is_v0_p2wpkh() {
        Ok((BtcOutputType::P2wpkh, bytes[2..22].to_vec()))
    } else if script.is_v0_p2wsh() {
        Ok((BtcOutputType::P2wsh, bytes[2..34].to_vec()))
    } else if script.is_v1_p2tr() {
        Ok((BtcOutputType::P2tr, bytes[2..34].to_vec()))
    } else {
        Err(Error::UnsupportedOutputType)
    }
}

fn script_config_for(address: &WalletAddress) -> Result<BtcScriptConfigWithKeypath> {
    let account = &address.account_configuration;
    let simple_type = account
        .script_type
        .msg_simple_type()
        .ok_or(Error::UnsupportedScriptType(account.script_type))?;
    Ok(BtcScriptConfigWithKeypath {
        simple_type,
        keypath: account.keypath.clone(),
    })
}

pub(crate) async fn sign_transaction(
    device: &dyn Device,
    proposal: &mut BtcProposedTransaction,
) -> Result<()> {
    let version = device.version().clone();
    let accounts = Arc::clone(&proposal.accounts);
    let tx = &proposal.transaction;

    // Input-side script configurations, also referenced by change outputs
    // and same-account outputs.
    let mut script_configs = ScriptConfigRegistry::default();

    let mut inputs = Vec::with_capacity(tx.input.len());
    for tx_in in &tx.input {
        let prev_out = proposal
            .previous_outputs
            .get(&tx_in.previous_output)
            .ok_or_else(|| {
                error!(
                    "input spends {} but no previous output is known for it",
                    tx_in.previous_output
                );
                Error::MissingPreviousOutput(tx_in.previous_output)
            })?;
        let input_address = &prev_out.address;
        let script_config_index = script_configs.add_or_reuse(script_config_for(input_address)?);

        let bip352_pubkey = if proposal.silent_payment_address.is_some() {
            Some(input_address.bip352_pubkey.clone().ok_or_else(|| {
                Error::InvalidProposal(
                    "silent payment send requires a tweak pubkey for every input address".into(),
                )
            })?)
        } else {
            None
        };

        inputs.push(BtcTxInput {
            input: BtcSignInputRequest {
                prev_out_hash: tx_in.previous_output.txid.to_byte_array().to_vec(),
                prev_out_index: tx_in.previous_output.vout,
                prev_out_value: prev_out.tx_out.value,
                sequence: tx_in.sequence.to_consensus_u32(),
                keypath: input_address.keypath.clone(),
                script_config_index,
            },
            bip352_pubkey,
            prev_tx: None,
        });
    }

    // Script configurations for outputs paying to a different account under
    // the same keystore. Only populated on firmware that supports them.
    let mut output_script_configs = ScriptConfigRegistry::default();

    let mut outputs = Vec::with_capacity(tx.output.len());
    for (index, tx_out) in tx.output.iter().enumerate() {
        let is_silent_payment_output = index == proposal.recipient_output_index
            && proposal.silent_payment_address.is_some();
        let (output_type, payload, silent_payment) = if is_silent_payment_output {
            // The real script is only known after the device derives it.
            (
                BtcOutputType::Unknown,
                Vec::new(),
                proposal.silent_payment_address.clone(),
            )
        } else {
            let (output_type, payload) = output_type_and_payload(&tx_out.script_pubkey)?;
            (output_type, payload, None)
        };

        // Change detection is exact script equality, independent of any
        // firmware version gate.
        let is_change = proposal
            .change_address
            .as_ref()
            .map_or(false, |change| change.pubkey_script == tx_out.script_pubkey);

        let (output_address, same_account) = accounts.address_for_script(&tx_out.script_pubkey)?;

        let mut is_ours = output_address.is_some();
        if !is_change && !features::supports_internal_non_change_outputs(&version) {
            // Older firmware only accepts the change output as internal.
            is_ours = false;
        }

        let mut keypath = Vec::new();
        let mut script_config_index = 0u32;
        let mut output_script_config_index = None;
        if let Some(output_address) = output_address.as_ref().filter(|_| is_ours) {
            let config = script_config_for(output_address)?;
            if same_account {
                keypath = output_address.keypath.clone();
                script_config_index = script_configs.add_or_reuse(config);
            } else if features::supports_output_script_configs(&version) {
                keypath = output_address.keypath.clone();
                output_script_config_index = Some(output_script_configs.add_or_reuse(config));
            } else {
                // Another account of ours, but the firmware cannot express
                // that; treat the output as external.
                is_ours = false;
            }
        }

        outputs.push(BtcSignOutputRequest {
            ours: is_ours,
            output_type,
            value: tx_out.value,
            payload,
            keypath,
            script_config_index,
            silent_payment,
            output_script_config_index,
            payment_request_index: None,
        });
    }

    let mut payment_requests = Vec::new();
    if let Some(request) = &proposal.payment_request {
        features::supports_payment_requests(&version)?;
        let output = outputs
            .get_mut(proposal.recipient_output_index)
            .ok_or_else(|| {
                Error::InvalidProposal(
                    "payment request targets an output index outside the transaction".into(),
                )
            })?;
        output.payment_request_index = Some(0);
        payment_requests.push(BtcPaymentRequestRequest {
            recipient_name: request.recipient_name.clone(),
            nonce: request.nonce.clone(),
            total_amount: request.total_amount,
            signature: request.signature.clone(),
            memos: request.memos.clone(),
        });
    }

    // Some script configurations require the device to validate input
    // amounts against the full previous transactions.
    if messages::btc_sign_needs_prev_txs(script_configs.configs()) {
        for (input_index, tx_in) in tx.input.iter().enumerate() {
            info!(
                "fetching previous transaction for input {}/{}",
                input_index + 1,
                tx.input.len()
            );
            let prev_tx = accounts
                .previous_transaction(tx_in.previous_output.txid)
                .await
                .map_err(|err| {
                    error!(
                        "fetching previous transaction failed for input {}/{}: {}",
                        input_index + 1,
                        tx.input.len(),
                        err
                    );
                    err
                })?;
            inputs[input_index].prev_tx = Some(BtcPrevTx::from_transaction(&prev_tx));
        }
    }

    let request = BtcSignRequest {
        coin: proposal.coin.msg_coin(),
        script_configs: script_configs.into_configs(),
        output_script_configs: output_script_configs.into_configs(),
        version: tx.version as u32,
        inputs,
        outputs,
        locktime: tx.lock_time.to_consensus_u32(),
        payment_requests,
        format_unit: proposal.format_unit,
    };

    let result = device.btc_sign(request).await?;

    // Validate the whole response before touching the proposal, so a
    // protocol violation never leaves it partially signed.
    let input_count = proposal.transaction.input.len();
    if result.signatures.len() != input_count {
        return Err(Error::Device(anyhow!(
            "device returned {} signatures for {} inputs",
            result.signatures.len(),
            input_count
        )));
    }
    if let Some(signature) = result.signatures.iter().find(|sig| sig.len() != 64) {
        return Err(Error::Device(anyhow!(
            "device returned a {}-byte signature, expected 64",
            signature.len()
        )));
    }
    for index in result.generated_outputs.keys() {
        let is_silent_payment_output = *index == proposal.recipient_output_index
            && proposal.silent_payment_address.is_some();
        if !is_silent_payment_output || *index >= proposal.transaction.output.len() {
            return Err(Error::Device(anyhow!(
                "device generated a script for output {}, which is not the silent payment output",
                index
            )));
        }
    }

    for (index, script) in &result.generated_outputs {
        proposal.transaction.output[*index].script_pubkey = ScriptBuf::from_bytes(script.clone());
    }
    proposal.signatures = result
        .signatures
        .iter()
        .map(|signature| {
            let mut r = [0u8; 32];
            let mut s = [0u8; 32];
            r.copy_from_slice(&signature[..32]);
            s.copy_from_slice(&signature[32..]);
            Some(Signature { r, s })
        })
        .collect();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::BtcSimpleType;

    fn config(simple_type: BtcSimpleType, keypath: Vec<u32>) -> BtcScriptConfigWithKeypath {
        BtcScriptConfigWithKeypath { simple_type, keypath }
    }

    #[test]
    fn test_registry_dedup_and_order() {
        let mut registry = ScriptConfigRegistry::default();
        let account = vec![84 | 1 << 31, 1 << 31, 1 << 31];
        assert_eq!(registry.add_or_reuse(config(BtcSimpleType::P2wpkh, account.clone())), 0);
        assert_eq!(registry.add_or_reuse(config(BtcSimpleType::P2tr, account.clone())), 1);
        // Structural equality on the simple type, not entry identity.
        assert_eq!(registry.add_or_reuse(config(BtcSimpleType::P2wpkh, account.clone())), 0);
        assert_eq!(registry.add_or_reuse(config(BtcSimpleType::P2tr, account)), 1);
        assert_eq!(registry.into_configs().len(), 2);
    }

    #[test]
    fn test_output_classification() {
        let p2pkh = {
            let mut script = vec![0x76, 0xa9, 0x14];
            script.extend([0xaa; 20]);
            script.extend([0x88, 0xac]);
            ScriptBuf::from_bytes(script)
        };
        let (output_type, payload) = output_type_and_payload(&p2pkh).unwrap();
        assert_eq!(output_type, BtcOutputType::P2pkh);
        assert_eq!(payload, vec![0xaa; 20]);

        let p2sh = {
            let mut script = vec![0xa9, 0x14];
            script.extend([0xbb; 20]);
            script.push(0x87);
            ScriptBuf::from_bytes(script)
        };
        let (output_type, payload) = output_type_and_payload(&p2sh).unwrap();
        assert_eq!(output_type, BtcOutputType::P2sh);
        assert_eq!(payload, vec![0xbb; 20]);

        let p2wpkh = {
            let mut script = vec![0x00, 0x14];
            script.extend([0xcc; 20]);
            ScriptBuf::from_bytes(script)
        };
        let (output_type, payload) = output_type_and_payload(&p2wpkh).unwrap();
        assert_eq!(output_type, BtcOutputType::P2wpkh);
        assert_eq!(payload, vec![0xcc; 20]);

        let p2wsh = {
            let mut script = vec![0x00, 0x20];
            script.extend([0xdd; 32]);
            ScriptBuf::from_bytes(script)
        };
        let (output_type, payload) = output_type_and_payload(&p2wsh).unwrap();
        assert_eq!(output_type, BtcOutputType::P2wsh);
        assert_eq!(payload, vec![0xdd; 32]);

        let p2tr = {
            let mut script = vec![0x51, 0x20];
            script.extend([0xee; 32]);
            ScriptBuf::from_bytes(script)
        };
        let (output_type, payload) = output_type_and_payload(&p2tr).unwrap();
        assert_eq!(output_type, BtcOutputType::P2tr);
        assert_eq!(payload, vec![0xee; 32]);

        // OP_RETURN and anything else is not addressable.
        let op_return = ScriptBuf::from_bytes(vec![0x6a, 0x01, 0x00]);
        assert!(matches!(
            output_type_and_payload(&op_return),
            Err(Error::UnsupportedOutputType)
        ));
    }
}
