//! Pairing policy parameters
//!
//! [`ParameterStore`] holds every tunable policy value of the bond manager and
//! validates updates. Invalid values are rejected with
//! [`BondError::InvalidParameter`] and leave the store untouched.

use blebond_types::flags::{AuthReq, KeyDistribution};
use blebond_types::keys::{EccKeys, MAX_ENC_KEY_SIZE, MIN_ENC_KEY_SIZE, OobScData};
use blebond_types::policy::{BondFailAction, IoCapability, OwnAddressMode, PairingMode, SecureConnections};
use strum::FromRepr;

use crate::error::BondError;
use crate::host::AuthParams;

/// Identifier of a parameter, used for reads.
#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParamId {
    PairingMode = 0x400,
    MitmProtection = 0x402,
    IoCapabilities = 0x403,
    OobEnabled = 0x404,
    OobData = 0x405,
    Bonding = 0x406,
    KeyDistribution = 0x407,
    KeySize = 0x408,
    SecureConnections = 0x409,
    EccKeyRegeneration = 0x40A,
    EccKeys = 0x40B,
    LocalOobSc = 0x40C,
    RemoteOobSc = 0x40D,
    LruReplacement = 0x40E,
    EraseBondInConnection = 0x40F,
    AutoSyncAllowList = 0x410,
    BondFailAction = 0x411,
    AuthenticatedPairingOnly = 0x412,
    EraseLocalInfo = 0x413,
    BondCount = 0x414,
}

/// A parameter together with its value
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Parameter {
    PairingMode(PairingMode),
    MitmProtection(bool),
    IoCapabilities(IoCapability),
    OobEnabled(bool),
    /// Legacy OOB temporary key
    OobData([u8; 16]),
    Bonding(bool),
    KeyDistribution(KeyDistribution),
    /// Maximum encryption key size requested when pairing
    KeySize(u8),
    SecureConnections(SecureConnections),
    /// Number of pairings allowed to reuse one ECC key pair, 0 regenerates every time
    EccKeyRegeneration(u8),
    EccKeys(Option<EccKeys>),
    LocalOobSc(Option<OobScData>),
    RemoteOobSc(Option<OobScData>),
    /// Evict the least recently used bond when the store is full
    LruReplacement(bool),
    /// Erase bonds right away even while connected
    EraseBondInConnection(bool),
    /// Mirror the bonds into the controller allow list
    AutoSyncAllowList(bool),
    BondFailAction(BondFailAction),
    /// Reject pairings without MITM protection
    AuthenticatedPairingOnly(bool),
    /// Write only: erase the local identity and the LRU list
    EraseLocalInfo,
    /// Read only: number of bonds
    BondCount(u8),
}

impl Parameter {
    pub fn id(&self) -> ParamId {
        match self {
            Parameter::PairingMode(_) => ParamId::PairingMode,
            Parameter::MitmProtection(_) => ParamId::MitmProtection,
            Parameter::IoCapabilities(_) => ParamId::IoCapabilities,
            Parameter::OobEnabled(_) => ParamId::OobEnabled,
            Parameter::OobData(_) => ParamId::OobData,
            Parameter::Bonding(_) => ParamId::Bonding,
            Parameter::KeyDistribution(_) => ParamId::KeyDistribution,
            Parameter::KeySize(_) => ParamId::KeySize,
            Parameter::SecureConnections(_) => ParamId::SecureConnections,
            Parameter::EccKeyRegeneration(_) => ParamId::EccKeyRegeneration,
            Parameter::EccKeys(_) => ParamId::EccKeys,
            Parameter::LocalOobSc(_) => ParamId::LocalOobSc,
            Parameter::RemoteOobSc(_) => ParamId::RemoteOobSc,
            Parameter::LruReplacement(_) => ParamId::LruReplacement,
            Parameter::EraseBondInConnection(_) => ParamId::EraseBondInConnection,
            Parameter::AutoSyncAllowList(_) => ParamId::AutoSyncAllowList,
            Parameter::BondFailAction(_) => ParamId::BondFailAction,
            Parameter::AuthenticatedPairingOnly(_) => ParamId::AuthenticatedPairingOnly,
            Parameter::EraseLocalInfo => ParamId::EraseLocalInfo,
            Parameter::BondCount(_) => ParamId::BondCount,
        }
    }
}

/// Pairing policy values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondParameters {
    pub pairing_mode: PairingMode,
    pub mitm: bool,
    pub io_capability: IoCapability,
    pub oob_enabled: bool,
    pub oob_data: [u8; 16],
    pub bonding: bool,
    pub key_distribution: KeyDistribution,
    pub key_size: u8,
    pub secure_connections: SecureConnections,
    pub ecc_key_regeneration: u8,
    pub ecc_keys: Option<EccKeys>,
    pub local_oob_sc: Option<OobScData>,
    pub remote_oob_sc: Option<OobScData>,
    pub lru_replacement: bool,
    pub erase_bond_in_connection: bool,
    pub auto_sync_allow_list: bool,
    pub bond_fail_action: BondFailAction,
    pub authenticated_pairing_only: bool,
}

impl Default for BondParameters {
    fn default() -> Self {
        Self {
            pairing_mode: PairingMode::WaitForRequest,
            mitm: false,
            io_capability: IoCapability::NoInputNoOutput,
            oob_enabled: false,
            oob_data: [0; 16],
            bonding: true,
            key_distribution: KeyDistribution::DEFAULT,
            key_size: MAX_ENC_KEY_SIZE,
            secure_connections: SecureConnections::Allow,
            ecc_key_regeneration: 0,
            ecc_keys: None,
            local_oob_sc: None,
            remote_oob_sc: None,
            lru_replacement: true,
            erase_bond_in_connection: false,
            auto_sync_allow_list: false,
            bond_fail_action: BondFailAction::InitiatePairing,
            authenticated_pairing_only: false,
        }
    }
}

/// Validated storage of [`BondParameters`]
pub struct ParameterStore {
    params: BondParameters,
    /// Pairings done with the current ECC key pair
    ecc_key_uses: u8,
}

impl ParameterStore {
    pub fn new(params: BondParameters) -> Self {
        Self { params, ecc_key_uses: 0 }
    }

    pub fn values(&self) -> &BondParameters {
        &self.params
    }

    /// Read a parameter.
    ///
    /// `BondCount` is owned by the bond store and `EraseLocalInfo` can't be read,
    /// both return `InvalidParameter` here.
    pub fn get(&self, id: ParamId) -> Result<Parameter, BondError> {
        let p = &self.params;
        Ok(match id {
            ParamId::PairingMode => Parameter::PairingMode(p.pairing_mode),
            ParamId::MitmProtection => Parameter::MitmProtection(p.mitm),
            ParamId::IoCapabilities => Parameter::IoCapabilities(p.io_capability),
            ParamId::OobEnabled => Parameter::OobEnabled(p.oob_enabled),
            ParamId::OobData => Parameter::OobData(p.oob_data),
            ParamId::Bonding => Parameter::Bonding(p.bonding),
            ParamId::KeyDistribution => Parameter::KeyDistribution(p.key_distribution),
            ParamId::KeySize => Parameter::KeySize(p.key_size),
            ParamId::SecureConnections => Parameter::SecureConnections(p.secure_connections),
            ParamId::EccKeyRegeneration => Parameter::EccKeyRegeneration(p.ecc_key_regeneration),
            ParamId::EccKeys => Parameter::EccKeys(p.ecc_keys),
            ParamId::LocalOobSc => Parameter::LocalOobSc(p.local_oob_sc),
            ParamId::RemoteOobSc => Parameter::RemoteOobSc(p.remote_oob_sc),
            ParamId::LruReplacement => Parameter::LruReplacement(p.lru_replacement),
            ParamId::EraseBondInConnection => Parameter::EraseBondInConnection(p.erase_bond_in_connection),
            ParamId::AutoSyncAllowList => Parameter::AutoSyncAllowList(p.auto_sync_allow_list),
            ParamId::BondFailAction => Parameter::BondFailAction(p.bond_fail_action),
            ParamId::AuthenticatedPairingOnly => Parameter::AuthenticatedPairingOnly(p.authenticated_pairing_only),
            ParamId::EraseLocalInfo | ParamId::BondCount => return Err(BondError::InvalidParameter),
        })
    }

    /// Validate and write a parameter.
    pub fn set(&mut self, param: Parameter) -> Result<(), BondError> {
        let p = &mut self.params;
        match param {
            Parameter::PairingMode(mode) => p.pairing_mode = mode,
            Parameter::MitmProtection(mitm) => {
                if !mitm && p.authenticated_pairing_only {
                    return Err(BondError::InvalidParameter);
                }
                p.mitm = mitm
            }
            Parameter::IoCapabilities(io) => p.io_capability = io,
            Parameter::OobEnabled(enabled) => p.oob_enabled = enabled,
            Parameter::OobData(data) => p.oob_data = data,
            Parameter::Bonding(bonding) => p.bonding = bonding,
            Parameter::KeyDistribution(dist) => p.key_distribution = dist,
            Parameter::KeySize(size) => {
                if !(MIN_ENC_KEY_SIZE..=MAX_ENC_KEY_SIZE).contains(&size) {
                    return Err(BondError::InvalidParameter);
                }
                if p.secure_connections == SecureConnections::Only && size != MAX_ENC_KEY_SIZE {
                    return Err(BondError::InvalidParameter);
                }
                p.key_size = size
            }
            Parameter::SecureConnections(mode) => match mode {
                SecureConnections::None => return Err(BondError::InvalidParameter),
                SecureConnections::Allow => p.secure_connections = mode,
                SecureConnections::Only => {
                    p.secure_connections = mode;
                    p.key_size = MAX_ENC_KEY_SIZE;
                }
            },
            Parameter::EccKeyRegeneration(count) => p.ecc_key_regeneration = count,
            Parameter::EccKeys(keys) => {
                p.ecc_keys = keys;
                self.ecc_key_uses = 0;
            }
            Parameter::LocalOobSc(data) => p.local_oob_sc = data,
            Parameter::RemoteOobSc(data) => p.remote_oob_sc = data,
            Parameter::LruReplacement(enabled) => p.lru_replacement = enabled,
            Parameter::EraseBondInConnection(enabled) => p.erase_bond_in_connection = enabled,
            Parameter::AutoSyncAllowList(enabled) => p.auto_sync_allow_list = enabled,
            Parameter::BondFailAction(action) => p.bond_fail_action = action,
            Parameter::AuthenticatedPairingOnly(enabled) => {
                if enabled && !p.mitm {
                    return Err(BondError::InvalidParameter);
                }
                p.authenticated_pairing_only = enabled
            }
            Parameter::EraseLocalInfo | Parameter::BondCount(_) => return Err(BondError::InvalidParameter),
        }
        Ok(())
    }

    /// Keep freshly generated ECC keys if they may be reused.
    pub(crate) fn ecc_keys_generated(&mut self, keys: EccKeys) {
        if self.params.ecc_key_regeneration > 0 {
            self.params.ecc_keys = Some(keys);
            self.ecc_key_uses = 0;
        }
    }

    /// Authentication requirements this side asks for
    pub fn auth_req(&self) -> AuthReq {
        let p = &self.params;
        AuthReq::new()
            .with_bonding(p.bonding)
            .with_mitm(p.mitm)
            .with_secure_connections(p.secure_connections != SecureConnections::None)
    }

    /// Build the pairing parameters handed to the security layer.
    ///
    /// Counts one use of the stored ECC key pair; once it has been used for
    /// `ecc_key_regeneration` pairings it is dropped so that the security
    /// layer generates a new one next time.
    pub(crate) fn auth_params(&mut self, own_address_mode: OwnAddressMode) -> AuthParams {
        let p = &self.params;
        let key_distribution = if !p.bonding {
            KeyDistribution::new()
        } else if own_address_mode.uses_private_address() {
            p.key_distribution.with_local_id_key(true)
        } else {
            p.key_distribution
        };

        let ecc_keys = p.ecc_keys;
        let auth_req = self.auth_req();
        let params = AuthParams {
            io_capability: p.io_capability,
            oob_data: p.oob_enabled.then_some(p.oob_data),
            local_oob_sc: p.local_oob_sc,
            remote_oob_sc: p.remote_oob_sc,
            auth_req,
            max_key_size: p.key_size,
            key_distribution,
            sc_only: p.secure_connections == SecureConnections::Only,
            ecc_keys,
        };

        if ecc_keys.is_some() {
            self.ecc_key_uses = self.ecc_key_uses.saturating_add(1);
            if self.ecc_key_uses >= self.params.ecc_key_regeneration {
                self.params.ecc_keys = None;
                self.ecc_key_uses = 0;
            }
        }

        params
    }
}
