//! The public keystore facade over a connected signing device.

use std::str::FromStr;
use std::sync::Arc;

use bitcoin::bip32::{ChildNumber, ExtendedPubKey};
use bitcoin::secp256k1::Secp256k1;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::NameOrAddress;
use tokio::sync::Mutex;
use tracing::debug;

use crate::chains::{bitcoin as btc, ethereum as eth};
use crate::device::{Device, DeviceError};
use crate::error::{Error, Result};
use crate::features;
use crate::messages::{
    BtcCoin, BtcScriptConfigWithKeypath, BtcXpubType, EthAddressCase, EthPubKind, EthSignRequest,
};
use crate::types::{BtcCode, Coin, ScriptType, SigningConfiguration};

/// Broad class of a keystore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeystoreType {
    Hardware,
    Software,
}

/// A coin-tagged transaction proposal. The match in
/// [`Keystore::sign_transaction`] is exhaustive, so adding a coin family is
/// a compile-time visible change.
pub enum TransactionProposal {
    Bitcoin(btc::BtcProposedTransaction),
    Ethereum(eth::EthTxProposal),
}

pub struct Keystore {
    device: Arc<dyn Device>,
    /// Memoized root fingerprint; immutable once set.
    root_fingerprint: Mutex<Option<Vec<u8>>>,
}

impl Keystore {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self {
            device,
            root_fingerprint: Mutex::new(None),
        }
    }

    pub fn keystore_type(&self) -> KeystoreType {
        KeystoreType::Hardware
    }

    pub async fn name(&self) -> Result<String> {
        let info = self.device.device_info().await?;
        Ok(info.name)
    }

    /// Cached after the first successful device round trip. Concurrent
    /// callers queue on the same cell, so at most one round trip happens
    /// and all callers observe the same bytes.
    pub async fn root_fingerprint(&self) -> Result<Vec<u8>> {
        let mut cached = self.root_fingerprint.lock().await;
        if let Some(fingerprint) = cached.as_ref() {
            return Ok(fingerprint.clone());
        }
        let fingerprint = self.device.root_fingerprint().await?;
        debug!("root fingerprint fetched: {}", hex::encode(&fingerprint));
        *cached = Some(fingerprint.clone());
        Ok(fingerprint)
    }

    pub fn supports_coin(&self, coin: &Coin) -> bool {
        match coin {
            Coin::Bitcoin(code) => {
                if matches!(code, BtcCode::Ltc | BtcCode::Tltc) && !self.device.supports_ltc() {
                    return false;
                }
                true
            }
            Coin::Ethereum(eth_coin) => match &eth_coin.erc20_token {
                Some(token) => self.device.supports_erc20(token.contract_address),
                None => self.device.supports_eth(eth_coin.chain_id),
            },
        }
    }

    /// Whether an account with the given script type can be set up on this
    /// device. Legacy P2PKH accounts are never supported for new setups.
    pub fn supports_account(&self, coin: &Coin, script_type: Option<ScriptType>) -> bool {
        if !self.supports_coin(coin) {
            return false;
        }
        match coin {
            Coin::Bitcoin(code) => match script_type {
                Some(ScriptType::P2tr) => {
                    features::supports_taproot(self.device.version(), *code)
                }
                Some(ScriptType::P2pkh) | None => false,
                Some(_) => true,
            },
            Coin::Ethereum(_) => true,
        }
    }

    pub fn supports_unified_accounts(&self) -> bool {
        true
    }

    pub fn supports_multiple_accounts(&self) -> bool {
        true
    }

    /// Returns (supported, optional). Only bitcoin- and ethereum-family
    /// addresses can be visually verified on the device.
    pub fn can_verify_address(&self, coin: &Coin) -> (bool, bool) {
        const OPTIONAL: bool = false;
        match coin {
            Coin::Bitcoin(_) | Coin::Ethereum(_) => (true, OPTIONAL),
        }
    }

    /// Shows the address on the device for visual verification. A user
    /// abort on the device is treated as success; verification is advisory.
    ///
    /// # Panics
    ///
    /// Panics if called for a coin `can_verify_address` rejects, or for a
    /// bitcoin configuration without a supported script type. Those are
    /// defects in the caller, not runtime conditions.
    pub async fn verify_address(
        &self,
        coin: &Coin,
        configuration: &SigningConfiguration,
    ) -> Result<()> {
        let (can_verify, _) = self.can_verify_address(coin);
        if !can_verify {
            panic!("verify_address called for a coin that cannot be verified");
        }
        match coin {
            Coin::Bitcoin(code) => {
                let script_type = configuration
                    .script_type
                    .unwrap_or_else(|| panic!("bitcoin address verification requires a script type"));
                let simple_type = script_type
                    .msg_simple_type()
                    .unwrap_or_else(|| panic!("unsupported script type {script_type:?}"));
                match self
                    .device
                    .btc_address(code.msg_coin(), configuration.keypath.clone(), simple_type, true)
                    .await
                {
                    Ok(_) | Err(DeviceError::Aborted) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Coin::Ethereum(eth_coin) => {
                // A non-empty contract address makes the device display the
                // token unit instead of the base coin.
                let contract_address = eth_coin
                    .erc20_token
                    .as_ref()
                    .map(|token| token.contract_address.as_bytes().to_vec())
                    .unwrap_or_default();
                match self
                    .device
                    .eth_pub(
                        eth_coin.chain_id,
                        configuration.keypath.clone(),
                        EthPubKind::Address,
                        true,
                        contract_address,
                    )
                    .await
                {
                    Ok(_) | Err(DeviceError::Aborted) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
        }
    }

    pub fn can_verify_extended_public_key(&self, coin: &Coin) -> bool {
        matches!(coin, Coin::Bitcoin(_))
    }

    /// Shows an account xpub on the device, in the display family matching
    /// the network and script type. The network takes precedence over the
    /// script type. A user abort is treated as success.
    pub async fn verify_extended_public_key(
        &self,
        coin: &Coin,
        configuration: &SigningConfiguration,
    ) -> Result<()> {
        match coin {
            Coin::Bitcoin(code) => {
                let xpub_type = if code.is_mainnet() {
                    match configuration.script_type {
                        Some(ScriptType::P2wpkhP2sh) => BtcXpubType::Ypub,
                        Some(ScriptType::P2wpkh) => BtcXpubType::Zpub,
                        _ => BtcXpubType::Xpub,
                    }
                } else {
                    BtcXpubType::Tpub
                };
                match self
                    .device
                    .btc_xpub(code.msg_coin(), configuration.keypath.clone(), xpub_type, true)
                    .await
                {
                    Ok(_) | Err(DeviceError::Aborted) => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            Coin::Ethereum(_) => Err(Error::UnsupportedCoin(
                "extended public keys can only be verified for bitcoin-family coins".into(),
            )),
        }
    }

    pub async fn extended_public_key(
        &self,
        coin: &Coin,
        keypath: &[u32],
    ) -> Result<ExtendedPubKey> {
        match coin {
            Coin::Bitcoin(code) => {
                let xpub = self
                    .device
                    .btc_xpub(code.msg_coin(), keypath.to_vec(), BtcXpubType::Xpub, false)
                    .await?;
                Ok(ExtendedPubKey::from_str(&xpub)?)
            }
            Coin::Ethereum(eth_coin) => {
                // The device only accepts four-element ethereum keypaths,
                // but the account is selected by the fifth element (e.g. the
                // 10th account is m/44'/60'/0'/0/9). Fetch the base xpub and
                // derive the last, non-hardened step locally.
                if keypath.len() == 5 {
                    let xpub = self
                        .device
                        .eth_pub(
                            eth_coin.chain_id,
                            keypath[..4].to_vec(),
                            EthPubKind::Xpub,
                            false,
                            Vec::new(),
                        )
                        .await?;
                    let xpub = ExtendedPubKey::from_str(&xpub)?;
                    let secp = Secp256k1::verification_only();
                    Ok(xpub.ckd_pub(&secp, ChildNumber::from_normal_idx(keypath[4])?)?)
                } else {
                    let xpub = self
                        .device
                        .eth_pub(
                            eth_coin.chain_id,
                            keypath.to_vec(),
                            EthPubKind::Xpub,
                            false,
                            Vec::new(),
                        )
                        .await?;
                    Ok(ExtendedPubKey::from_str(&xpub)?)
                }
            }
        }
    }

    /// Signs the proposal in place: bitcoin proposals receive per-input
    /// signatures (and generated silent payment scripts), ethereum proposals
    /// receive the signature and the signed RLP encoding.
    pub async fn sign_transaction(&self, proposal: &mut TransactionProposal) -> Result<()> {
        match proposal {
            TransactionProposal::Bitcoin(proposal) => {
                btc::sign_transaction(self.device.as_ref(), proposal).await
            }
            TransactionProposal::Ethereum(proposal) => {
                eth::sign_transaction(self.device.as_ref(), proposal).await
            }
        }
    }

    /// Message signing is offered for the two base coins only, never for
    /// tokens or test networks.
    pub fn can_sign_message(&self, coin: &Coin) -> bool {
        match coin {
            Coin::Bitcoin(code) => *code == BtcCode::Btc,
            Coin::Ethereum(eth_coin) => eth_coin.erc20_token.is_none() && eth_coin.chain_id == 1,
        }
    }

    /// Returns the 65-byte Electrum-style message signature.
    pub async fn sign_btc_message(
        &self,
        message: &[u8],
        keypath: &[u32],
        script_type: ScriptType,
    ) -> Result<Vec<u8>> {
        let simple_type = script_type
            .msg_simple_type()
            .ok_or(Error::UnsupportedScriptType(script_type))?;
        let result = self
            .device
            .btc_sign_message(
                BtcCoin::Btc,
                BtcScriptConfigWithKeypath {
                    simple_type,
                    keypath: keypath.to_vec(),
                },
                message.to_vec(),
            )
            .await?;
        Ok(result.electrum_sig65)
    }

    pub async fn sign_eth_message(&self, message: &[u8], keypath: &[u32]) -> Result<Vec<u8>> {
        const ETH_MAINNET_CHAIN_ID: u64 = 1;
        Ok(self
            .device
            .eth_sign_message(ETH_MAINNET_CHAIN_ID, keypath.to_vec(), message.to_vec())
            .await?)
    }

    pub async fn sign_eth_typed_message(
        &self,
        chain_id: u64,
        data: &[u8],
        keypath: &[u32],
    ) -> Result<Vec<u8>> {
        Ok(self
            .device
            .eth_sign_typed_message(chain_id, keypath.to_vec(), data.to_vec())
            .await?)
    }

    /// Signs a WalletConnect-supplied legacy transaction. The recipient is
    /// displayed mixed-case since WalletConnect carries no user casing.
    pub async fn sign_eth_wallet_connect_transaction(
        &self,
        chain_id: u64,
        transaction: &TypedTransaction,
        keypath: &[u32],
    ) -> Result<Vec<u8>> {
        let to = match transaction.to() {
            Some(NameOrAddress::Address(address)) => *address,
            _ => return Err(Error::ContractCreationUnsupported),
        };
        let gas_price = match transaction {
            TypedTransaction::Legacy(tx) => tx.gas_price.unwrap_or_default(),
            TypedTransaction::Eip2930(tx) => tx.tx.gas_price.unwrap_or_default(),
            TypedTransaction::Eip1559(_) => return Err(Error::UnsupportedTransactionType(2)),
        };
        let request = EthSignRequest {
            chain_id,
            keypath: keypath.to_vec(),
            nonce: transaction.nonce().copied().unwrap_or_default(),
            gas_price,
            gas_limit: transaction.gas().copied().unwrap_or_default(),
            recipient: to,
            value: transaction.value().copied().unwrap_or_default(),
            data: transaction.data().map(|data| data.to_vec()).unwrap_or_default(),
            address_case: EthAddressCase::Mixed,
        };
        Ok(self.device.eth_sign(request).await?)
    }

    pub fn supports_eip1559(&self) -> bool {
        features::supports_eip1559(self.device.version())
    }

    /// Returns `FirmwareUpgradeRequired` rather than a bool, since callers
    /// must branch on the distinct kind.
    pub fn supports_payment_requests(&self) -> Result<()> {
        features::supports_payment_requests(self.device.version())
    }
}
