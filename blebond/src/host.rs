//! Interfaces of the host stack collaborators
//!
//! The bond manager never blocks on the host stack. Every call below only
//! issues a request, the outcome comes back later as a [`BondEvent`](crate::event::BondEvent).

use blebond_types::address::Address;
use blebond_types::flags::{AuthReq, KeyDistribution};
use blebond_types::keys::{EccKeys, Irk, LongTermKeyInfo, OobScData, SigningInfo};
use blebond_types::policy::{IoCapability, PrivacyMode, Role};
use blebond_types::smp::PairingFailure;

use crate::error::HostError;

/// Connection handle assigned by the controller
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// GATT characteristic UUID of "Central Address Resolution"
pub const CENTRAL_ADDRESS_RESOLUTION_UUID: u16 = 0x2AA6;
/// GATT characteristic UUID of "Resolvable Private Address Only"
pub const RPA_ONLY_UUID: u16 = 0x2AC9;

/// HCI reason used when the link is dropped after a failed security procedure
pub const DISCONNECT_AUTHENTICATION_FAILURE: u8 = 0x05;

/// Pairing request received from a peer, kept with its queue node so that
/// the security layer can answer it once the node is promoted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingRequest {
    pub io_capability: IoCapability,
    pub oob_data_present: bool,
    pub auth_req: AuthReq,
    pub max_key_size: u8,
    /// Keys requested, from the point of view of the receiver: `peer_*` bits are
    /// the keys the initiator will distribute.
    pub key_distribution: KeyDistribution,
}

/// Policy handed to the security layer to run a pairing
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AuthParams {
    pub io_capability: IoCapability,
    /// Legacy OOB temporary key, if OOB is enabled
    pub oob_data: Option<[u8; 16]>,
    pub local_oob_sc: Option<OobScData>,
    pub remote_oob_sc: Option<OobScData>,
    pub auth_req: AuthReq,
    pub max_key_size: u8,
    pub key_distribution: KeyDistribution,
    /// Fail the pairing if the peer doesn't support secure connections
    pub sc_only: bool,
    /// Reuse these keys instead of generating a new pair
    pub ecc_keys: Option<EccKeys>,
}

/// Security manager of the host stack
pub trait SecurityLayer {
    /// Start a pairing, or answer `peer_request` if the peer started it.
    async fn authenticate(
        &mut self,
        conn: ConnHandle,
        params: &AuthParams,
        peer_request: Option<&PairingRequest>,
    ) -> Result<(), HostError>;

    /// Abort the pairing running on `conn`.
    async fn terminate_authentication(&mut self, conn: ConnHandle, reason: PairingFailure) -> Result<(), HostError>;

    /// Resume encryption with a stored key.
    async fn start_encryption(&mut self, conn: ConnHandle, ltk: &LongTermKeyInfo, role: Role) -> Result<(), HostError>;

    /// Ask the central to secure the link, peripheral only.
    async fn send_security_request(&mut self, conn: ConnHandle, auth_req: AuthReq) -> Result<(), HostError>;

    /// Answer a passkey request.
    async fn passkey_update(&mut self, conn: ConnHandle, passkey: u32) -> Result<(), HostError>;

    /// Use the peer's signing key to verify signed writes on `conn`.
    async fn load_signing_info(&mut self, conn: ConnHandle, signing: &SigningInfo) -> Result<(), HostError>;
}

pub trait GattClient {
    async fn read_characteristic_by_uuid(&mut self, conn: ConnHandle, uuid: u16) -> Result<(), HostError>;
}

pub trait GattServer {
    /// Restore the client characteristic configurations of a bonded peer.
    async fn load_client_config(&mut self, conn: ConnHandle, table: &[(u16, u16)]) -> Result<(), HostError>;

    async fn indicate_service_changed(&mut self, conn: ConnHandle) -> Result<(), HostError>;
}

/// Controller privacy and filtering interface
pub trait PrivacyController {
    /// Whether the radio is idle, the resolving list can only change then.
    fn is_radio_idle(&self) -> bool;

    async fn clear_resolving_list(&mut self) -> Result<(), HostError>;

    /// Put this device's own IRK in the resolving list, so the controller
    /// generates our resolvable private addresses.
    async fn add_local_identity(&mut self, local_irk: &Irk) -> Result<(), HostError>;

    async fn add_resolving_list_entry(
        &mut self,
        peer: &Address,
        peer_irk: &Irk,
        local_irk: &Irk,
    ) -> Result<(), HostError>;

    async fn set_privacy_mode(&mut self, peer: &Address, mode: PrivacyMode) -> Result<(), HostError>;

    async fn clear_allow_list(&mut self) -> Result<(), HostError>;

    async fn add_allow_list_entry(&mut self, peer: &Address) -> Result<(), HostError>;
}

pub trait LinkControl {
    async fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError>;
}

/// Everything the bond manager needs from the host stack
pub trait HostStack: SecurityLayer + GattClient + GattServer + PrivacyController + LinkControl {}

impl<T: SecurityLayer + GattClient + GattServer + PrivacyController + LinkControl> HostStack for T {}
