//! Events the host stack feeds into the bond manager, and the observer the
//! manager reports to.

use blebond_types::address::Address;
use blebond_types::flags::AuthReq;
use blebond_types::keys::{EccKeys, KeyMaterial};
use blebond_types::policy::Role;
use blebond_types::smp::PairingFailure;

use crate::error::BondError;
use crate::host::{ConnHandle, PairingRequest};

/// Longest characteristic value the manager cares about
pub const CHAR_VALUE_SIZE: usize = 8;

pub type CharValue = heapless::Vec<u8, CHAR_VALUE_SIZE>;

/// Why a characteristic read returned no value
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReadError {
    /// The peer has no such characteristic
    NotFound,
    /// ATT error code
    Att(u8),
}

/// Result of a successful pairing
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AuthOutcome {
    /// Negotiated requirements: bonding if both sides asked for it, MITM if
    /// the pairing was authenticated, secure connections if LE SC was used.
    pub auth_req: AuthReq,
    pub keys: KeyMaterial,
    /// Identity address the peer distributed along with its IRK
    pub identity: Option<Address>,
}

/// What the security layer needs from the user
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PasskeyRequest {
    /// Show this passkey to the user
    Display(u32),
    /// Ask the user for the passkey shown on the peer
    Input,
    /// Ask the user to confirm both sides show this value
    NumericComparison(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondEvent {
    LinkEstablished {
        conn: ConnHandle,
        /// Over-the-air address of the peer
        peer: Address,
        role: Role,
    },
    LinkTerminated {
        conn: ConnHandle,
        reason: u8,
    },
    /// The peer sent a pairing request, peripheral only
    PairingRequest {
        conn: ConnHandle,
        request: PairingRequest,
    },
    /// The peer sent a security request, central only
    SecurityRequest {
        conn: ConnHandle,
        auth_req: AuthReq,
    },
    PasskeyNeeded {
        conn: ConnHandle,
        request: PasskeyRequest,
    },
    AuthenticationComplete {
        conn: ConnHandle,
        result: Result<AuthOutcome, PairingFailure>,
    },
    /// Encryption with a stored key finished
    EncryptionComplete {
        conn: ConnHandle,
        result: Result<(), PairingFailure>,
    },
    CharacteristicRead {
        conn: ConnHandle,
        uuid: u16,
        result: Result<CharValue, ReadError>,
    },
    /// The peer confirmed the service changed indication
    ServiceChangedConfirmed {
        conn: ConnHandle,
    },
    /// The signed write counter of the peer moved
    SignCounterUpdated {
        conn: ConnHandle,
        counter: u32,
    },
    /// The peer wrote a client characteristic configuration descriptor
    ClientConfigWritten {
        conn: ConnHandle,
        handle: u16,
        value: u16,
    },
    /// Not scanning, advertising or initiating
    RadioIdle,
    EccKeysGenerated(EccKeys),
}

/// Step of the bonding procedure reported to the observer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondStage {
    Started,
    Complete,
    BondSaved,
    Encrypted,
    RpaOnlyRead,
    CentralAddressResolutionRead,
}

/// Observer of the bonding procedure. At most one is registered.
pub trait BondCallbacks {
    /// The security layer needs a passkey, answer with
    /// [`BondManager::passcode_response`](crate::manager::BondManager::passcode_response).
    fn passcode_needed(&self, conn: ConnHandle, request: PasskeyRequest);

    /// A step of the bonding procedure finished on `conn`.
    fn pairing_state(&self, conn: ConnHandle, stage: BondStage, status: Result<(), BondError>);

    fn ecc_keys_generated(&self, _keys: &EccKeys) {}
}
