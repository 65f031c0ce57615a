//! Pairing policy values

use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// How this device reacts to pairing
#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingMode {
    /// Pairing is not allowed
    NoPairing = 0,
    /// Wait for the peer to request pairing or encryption
    #[default]
    WaitForRequest = 1,
    /// Start pairing as soon as a link is established
    Initiate = 2,
}

/// Input/output capabilities advertised in pairing requests
#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IoCapability {
    DisplayOnly = 0,
    DisplayYesNo = 1,
    KeyboardOnly = 2,
    #[default]
    NoInputNoOutput = 3,
    KeyboardDisplay = 4,
}

/// LE secure connections policy
#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SecureConnections {
    /// Legacy pairing only. Rejected as a policy value.
    None = 0,
    /// Secure connections when both sides support it
    #[default]
    Allow = 1,
    /// Reject peers without secure connections support
    Only = 2,
}

/// What a central does when the peer rejects the stored encryption key
#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondFailAction {
    NoAction = 0,
    #[default]
    InitiatePairing = 1,
    TerminateLink = 2,
    TerminateAndEraseAll = 3,
}

/// Controller privacy mode for a resolving list entry
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PrivacyMode {
    /// Only accept the peer's resolvable private address
    Network = 0,
    /// Also accept the peer's identity address
    Device = 1,
}

/// Link layer role of this device on a connection
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    Central,
    Peripheral,
}

/// Address this device uses over the air
#[repr(u8)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OwnAddressMode {
    #[default]
    Public = 0,
    RandomStatic = 1,
    /// Resolvable private address with a public identity
    RpaWithPublicIdentity = 2,
    /// Resolvable private address with a random static identity
    RpaWithRandomIdentity = 3,
}

impl OwnAddressMode {
    /// Peers can only recognize us again if we hand out our IRK.
    pub const fn uses_private_address(self) -> bool {
        matches!(
            self,
            OwnAddressMode::RpaWithPublicIdentity | OwnAddressMode::RpaWithRandomIdentity
        )
    }
}
