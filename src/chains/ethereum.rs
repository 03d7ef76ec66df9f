//! Ethereum-family transaction signing.
//!
//! Dispatches legacy and fee-market (EIP-1559) transactions to the matching
//! device call and reapplies the returned signature to the transaction.

use anyhow::anyhow;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Bytes, NameOrAddress, Signature as EthSignature, H160, U256};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::messages::{EthAddressCase, EthSignEip1559Request, EthSignRequest};
use crate::types::EthCoin;

/// An ethereum transaction proposal handed over by the account layer.
pub struct EthTxProposal {
    pub coin: EthCoin,
    pub transaction: TypedTransaction,
    /// Absolute keypath of the sending address.
    pub keypath: Vec<u32>,
    /// Recipient string as the user entered it; its letter casing is
    /// forwarded to the device for display.
    pub recipient_address: String,
    pub signature: Option<EthSignature>,
    /// RLP encoding of the signed transaction, set on success.
    pub signed_transaction: Option<Bytes>,
}

fn recipient(transaction: &TypedTransaction) -> Result<H160> {
    match transaction.to() {
        Some(NameOrAddress::Address(address)) => Ok(*address),
        Some(NameOrAddress::Name(_)) => Err(Error::InvalidProposal(
            "recipient must be a resolved address".into(),
        )),
        // Signing blind contract deployment is out of scope.
        None => Err(Error::ContractCreationUnsupported),
    }
}

/// Classifies the letter casing of a recipient address string so the device
/// renders it the way the user saw it.
pub(crate) fn identify_case(recipient: &str) -> EthAddressCase {
    let hex_part = recipient
        .strip_prefix("0x")
        .or_else(|| recipient.strip_prefix("0X"))
        .unwrap_or(recipient);
    let mut has_upper = false;
    let mut has_lower = false;
    for c in hex_part.chars() {
        if c.is_ascii_uppercase() {
            has_upper = true;
        }
        if c.is_ascii_lowercase() {
            has_lower = true;
        }
    }
    match (has_upper, has_lower) {
        (true, false) => EthAddressCase::Upper,
        (false, true) => EthAddressCase::Lower,
        _ => EthAddressCase::Mixed,
    }
}

/// Converts the device's fixed 65-byte r||s||recid blob into a signature
/// carrying the v encoding the transaction envelope expects.
pub(crate) fn signature_from_device(
    bytes: &[u8],
    chain_id: u64,
    legacy: bool,
) -> Result<EthSignature> {
    if bytes.len() != 65 {
        return Err(Error::Device(anyhow!(
            "device returned a {}-byte signature, expected 65",
            bytes.len()
        )));
    }
    let recid = u64::from(bytes[64]);
    let v = if legacy { recid + 35 + chain_id * 2 } else { recid };
    Ok(EthSignature {
        r: U256::from_big_endian(&bytes[..32]),
        s: U256::from_big_endian(&bytes[32..64]),
        v,
    })
}

pub(crate) async fn sign_transaction(
    device: &dyn Device,
    proposal: &mut EthTxProposal,
) -> Result<()> {
    let to = recipient(&proposal.transaction)?;
    let address_case = identify_case(&proposal.recipient_address);
    let chain_id = proposal.coin.chain_id;
    let keypath = proposal.keypath.clone();
    let nonce = proposal.transaction.nonce().copied().unwrap_or_default();
    let gas_limit = proposal.transaction.gas().copied().unwrap_or_default();
    let value = proposal.transaction.value().copied().unwrap_or_default();
    let data = proposal
        .transaction
        .data()
        .map(|data| data.to_vec())
        .unwrap_or_default();

    // Dispatch on the EIP-2718 envelope type.
    let (signature_bytes, legacy) = match &proposal.transaction {
        TypedTransaction::Eip1559(tx) => {
            let request = EthSignEip1559Request {
                chain_id,
                keypath,
                nonce,
                max_priority_fee_per_gas: tx.max_priority_fee_per_gas.unwrap_or_default(),
                max_fee_per_gas: tx.max_fee_per_gas.unwrap_or_default(),
                gas_limit,
                recipient: to,
                value,
                data,
                address_case,
            };
            (device.eth_sign_eip1559(request).await?, false)
        }
        TypedTransaction::Legacy(tx) => {
            let request = EthSignRequest {
                chain_id,
                keypath,
                nonce,
                gas_price: tx.gas_price.unwrap_or_default(),
                gas_limit,
                recipient: to,
                value,
                data,
                address_case,
            };
            (device.eth_sign(request).await?, true)
        }
        TypedTransaction::Eip2930(_) => return Err(Error::UnsupportedTransactionType(1)),
    };

    let signature = signature_from_device(&signature_bytes, chain_id, legacy)?;
    proposal.signed_transaction = Some(proposal.transaction.rlp_signed(&signature));
    proposal.signature = Some(signature);
    Ok(())
}
