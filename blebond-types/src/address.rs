//! Bluetooth device addresses

use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// Peer address type, as reported by the controller.
///
/// The identity variants are reported when the controller resolved a private
/// address against its resolving list.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, FromRepr)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressType {
    Public = 0x00,
    Random = 0x01,
    PublicIdentity = 0x02,
    RandomIdentity = 0x03,
}

impl AddressType {
    /// Strip the "resolved identity" bit, mapping identity types to their base type.
    pub const fn base(self) -> Self {
        match self {
            AddressType::Public | AddressType::PublicIdentity => AddressType::Public,
            AddressType::Random | AddressType::RandomIdentity => AddressType::Random,
        }
    }

    pub const fn is_identity(self) -> bool {
        matches!(self, AddressType::PublicIdentity | AddressType::RandomIdentity)
    }

    pub const fn is_public(self) -> bool {
        matches!(self.base(), AddressType::Public)
    }
}

/// 48-bit device address, stored little-endian as sent over the air.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const ZERO: Self = Self([0; 6]);

    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub const fn into_inner(self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Random sub-type lives in the two most significant bits.
    pub const fn random_kind(&self) -> RandomAddressKind {
        match self.0[5] >> 6 {
            0b00 => RandomAddressKind::NonResolvable,
            0b01 => RandomAddressKind::Resolvable,
            0b11 => RandomAddressKind::Static,
            _ => RandomAddressKind::Reserved,
        }
    }

    /// The 24-bit `prand` part of a resolvable private address.
    pub const fn prand(&self) -> [u8; 3] {
        [self.0[3], self.0[4], self.0[5]]
    }

    /// The 24-bit `hash` part of a resolvable private address.
    pub const fn hash(&self) -> [u8; 3] {
        [self.0[0], self.0[1], self.0[2]]
    }

    /// Build a resolvable private address from its `hash` and `prand` parts.
    pub const fn from_rpa_parts(hash: [u8; 3], prand: [u8; 3]) -> Self {
        Self([hash[0], hash[1], hash[2], prand[0], prand[1], (prand[2] & 0x3F) | 0x40])
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RandomAddressKind {
    NonResolvable,
    Resolvable,
    Reserved,
    Static,
}

/// Typed device address
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddressType,
    pub addr: BdAddr,
}

impl Address {
    pub const fn new(kind: AddressType, addr: BdAddr) -> Self {
        Self { kind, addr }
    }

    pub const fn public(bytes: [u8; 6]) -> Self {
        Self::new(AddressType::Public, BdAddr(bytes))
    }

    pub const fn random(bytes: [u8; 6]) -> Self {
        Self::new(AddressType::Random, BdAddr(bytes))
    }

    /// Only random addresses can be resolvable private addresses.
    pub fn is_resolvable_private(&self) -> bool {
        self.kind == AddressType::Random && self.addr.random_kind() == RandomAddressKind::Resolvable
    }

    /// Compare two addresses ignoring the "resolved identity" bit of the type.
    pub fn same_device(&self, other: &Address) -> bool {
        self.addr == other.addr && self.kind.base() == other.kind.base()
    }
}
