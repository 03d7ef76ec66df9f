//! Firmware capability gating.
//!
//! Each feature is a pure function of the device firmware version (and coin
//! context where relevant) against a fixed threshold. A missing capability
//! is a synchronous policy decision, never a device error, and nothing here
//! retries.

use semver::Version;

use crate::error::{Error, Result};
use crate::types::BtcCode;

/// Taproot accounts, available since 9.10.0 and only for the BTC networks.
pub fn supports_taproot(version: &Version, code: BtcCode) -> bool {
    matches!(code, BtcCode::Btc | BtcCode::Tbtc | BtcCode::Rbtc)
        && *version >= Version::new(9, 10, 0)
}

/// Whether non-change outputs may be marked as belonging to the wallet.
/// Older firmware only accepts the change output as internal.
pub fn supports_internal_non_change_outputs(version: &Version) -> bool {
    *version >= Version::new(9, 15, 0)
}

/// Whether outputs paying to a different account under the same keystore can
/// carry their own script configuration list, separate from the input side.
pub fn supports_output_script_configs(version: &Version) -> bool {
    *version >= Version::new(9, 22, 0)
}

/// EIP-1559 (fee market) transaction signing, available since 9.16.0.
pub fn supports_eip1559(version: &Version) -> bool {
    *version >= Version::new(9, 16, 0)
}

/// Payment request embedding, available since 9.20.0. Returns an error
/// rather than a bool so callers can branch on the distinct kind.
pub fn supports_payment_requests(version: &Version) -> Result<()> {
    if *version >= Version::new(9, 20, 0) {
        Ok(())
    } else {
        Err(Error::FirmwareUpgradeRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taproot_gate() {
        assert!(!supports_taproot(&Version::new(9, 9, 9), BtcCode::Btc));
        assert!(supports_taproot(&Version::new(9, 10, 0), BtcCode::Btc));
        assert!(supports_taproot(&Version::new(9, 10, 0), BtcCode::Tbtc));
        assert!(supports_taproot(&Version::new(9, 10, 0), BtcCode::Rbtc));
        assert!(supports_taproot(&Version::new(10, 0, 0), BtcCode::Btc));
        // Never for litecoin, regardless of version.
        assert!(!supports_taproot(&Version::new(10, 0, 0), BtcCode::Ltc));
        assert!(!supports_taproot(&Version::new(10, 0, 0), BtcCode::Tltc));
    }

    #[test]
    fn test_output_marking_gates() {
        assert!(!supports_internal_non_change_outputs(&Version::new(9, 14, 9)));
        assert!(supports_internal_non_change_outputs(&Version::new(9, 15, 0)));
        assert!(!supports_output_script_configs(&Version::new(9, 21, 0)));
        assert!(supports_output_script_configs(&Version::new(9, 22, 0)));
    }

    #[test]
    fn test_eip1559_gate() {
        assert!(!supports_eip1559(&Version::new(9, 15, 9)));
        assert!(supports_eip1559(&Version::new(9, 16, 0)));
    }

    #[test]
    fn test_payment_request_gate() {
        assert!(matches!(
            supports_payment_requests(&Version::new(9, 19, 9)),
            Err(Error::FirmwareUpgradeRequired)
        ));
        assert!(supports_payment_requests(&Version::new(9, 20, 0)).is_ok());
    }
}
