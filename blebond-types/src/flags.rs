use core::ops::{BitAnd, BitOr, BitOrAssign, Not};

use bitfield_struct::bitfield;
use serde::{Deserialize, Serialize};

/// State flags kept with every bond
#[bitfield(u8, defmt = cfg(feature = "defmt"))]
#[derive(Eq, PartialEq, Serialize, Deserialize)]
pub struct BondFlags {
    /// The bond was created with MITM protection
    #[bits(1)]
    pub authenticated: bool,
    /// The bond was created with LE secure connections
    #[bits(1)]
    pub secure_connections: bool,
    /// A service changed indication must be sent on next connection
    #[bits(1)]
    pub service_changed_pending: bool,
    /// Peer supports central address resolution
    #[bits(1)]
    pub central_address_resolution: bool,
    /// Peer only uses resolvable private addresses after bonding
    #[bits(1)]
    pub rpa_only: bool,
    #[bits(3)]
    _reserved: u8,
}

impl BitOr for BondFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self::from_bits(self.into_bits() | rhs.into_bits())
    }
}
impl BitAnd for BondFlags {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Self::from_bits(self.into_bits() & rhs.into_bits())
    }
}
impl Not for BondFlags {
    type Output = Self;

    fn not(self) -> Self::Output {
        Self::from_bits(!self.into_bits())
    }
}
impl BitOrAssign for BondFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

impl BondFlags {
    pub const AUTHENTICATED: Self = Self::new().with_authenticated(true);
    pub const SECURE_CONNECTIONS: Self = Self::new().with_secure_connections(true);
    pub const SERVICE_CHANGED_PENDING: Self = Self::new().with_service_changed_pending(true);
    pub const CENTRAL_ADDRESS_RESOLUTION: Self = Self::new().with_central_address_resolution(true);
    pub const RPA_ONLY: Self = Self::new().with_rpa_only(true);

    /// Set or clear every flag in `mask`, leaving the others untouched.
    pub fn apply(self, mask: BondFlags, set: bool) -> Self {
        if set { self | mask } else { self & !mask }
    }

    pub fn contains(self, mask: BondFlags) -> bool {
        (self & mask) == mask
    }
}

/// Authentication requirements field of pairing requests and security requests
#[bitfield(u8, defmt = cfg(feature = "defmt"))]
#[derive(Eq, PartialEq, Serialize, Deserialize)]
pub struct AuthReq {
    #[bits(1)]
    pub bonding: bool,
    #[bits(1)]
    _bonding_reserved: u8,
    #[bits(1)]
    pub mitm: bool,
    #[bits(1)]
    pub secure_connections: bool,
    #[bits(1)]
    pub keypress: bool,
    #[bits(1)]
    pub ct2: bool,
    #[bits(2)]
    _reserved: u8,
}

/// Which keys each side distributes.
///
/// The `local_*` half is what this device sends, the `peer_*` half is what
/// the remote sends.
#[bitfield(u8, defmt = cfg(feature = "defmt"))]
#[derive(Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyDistribution {
    #[bits(1)]
    pub local_enc_key: bool,
    #[bits(1)]
    pub local_id_key: bool,
    #[bits(1)]
    pub local_sign_key: bool,
    #[bits(1)]
    pub local_link_key: bool,
    #[bits(1)]
    pub peer_enc_key: bool,
    #[bits(1)]
    pub peer_id_key: bool,
    #[bits(1)]
    pub peer_sign_key: bool,
    #[bits(1)]
    pub peer_link_key: bool,
}

impl KeyDistribution {
    /// Encryption and identity keys both ways
    pub const DEFAULT: Self = Self::new()
        .with_local_enc_key(true)
        .with_local_id_key(true)
        .with_peer_enc_key(true)
        .with_peer_id_key(true);
}
