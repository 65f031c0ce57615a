//! Security manager protocol values

use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// Reason carried in a pairing failed PDU
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingFailure {
    PasskeyEntryFailed = 0x01,
    OobNotAvailable = 0x02,
    AuthenticationRequirements = 0x03,
    ConfirmValueFailed = 0x04,
    PairingNotSupported = 0x05,
    EncryptionKeySize = 0x06,
    CommandNotSupported = 0x07,
    UnspecifiedReason = 0x08,
    RepeatedAttempts = 0x09,
    InvalidParameters = 0x0A,
    DhKeyCheckFailed = 0x0B,
    NumericComparisonFailed = 0x0C,
    BrEdrPairingInProgress = 0x0D,
    CrossTransportKeyNotAllowed = 0x0E,
    KeyRejected = 0x0F,
    /// Not an SMP reason: the 30 second SMP timer expired
    Timeout = 0xFF,
}

impl PairingFailure {
    pub fn from_code(code: u8) -> Self {
        Self::from_repr(code).unwrap_or(PairingFailure::UnspecifiedReason)
    }
}
