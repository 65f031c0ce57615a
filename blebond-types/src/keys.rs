//! Key material exchanged during pairing

use serde::{Deserialize, Serialize};

/// Smallest encryption key size accepted when resuming encryption.
pub const MIN_ENC_KEY_SIZE: u8 = 7;
/// Largest encryption key size.
pub const MAX_ENC_KEY_SIZE: u8 = 16;

/// Long term key with the values needed to identify it in a legacy pairing.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LongTermKeyInfo {
    /// Key, little-endian
    pub key: [u8; 16],
    /// Encrypted diversifier
    pub div: u16,
    /// Random number
    pub rand: [u8; 8],
    /// Negotiated encryption key size in bytes
    pub key_size: u8,
}

impl LongTermKeyInfo {
    pub const fn new(key: [u8; 16], div: u16, rand: [u8; 8], key_size: u8) -> Self {
        Self {
            key,
            div,
            rand,
            key_size,
        }
    }

    /// Whether the key size is usable for starting encryption.
    pub const fn has_valid_size(&self) -> bool {
        self.key_size >= MIN_ENC_KEY_SIZE && self.key_size <= MAX_ENC_KEY_SIZE
    }
}

/// Identity resolving key, little-endian.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Irk(pub [u8; 16]);

impl Irk {
    /// An all-zero or all-`0xFF` IRK means the peer has no usable identity.
    pub fn is_usable(&self) -> bool {
        self.0.iter().any(|b| *b != 0) && self.0.iter().any(|b| *b != 0xFF)
    }
}

/// Connection signature resolving key, little-endian.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Csrk(pub [u8; 16]);

impl Csrk {
    pub fn is_blank(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

/// Signing key and its counter, which only moves forward.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SigningInfo {
    pub csrk: Csrk,
    pub sign_counter: u32,
}

/// Every secret stored for one bond.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyMaterial {
    /// Key this device distributed
    pub local_ltk: Option<LongTermKeyInfo>,
    /// Key the peer distributed
    pub peer_ltk: Option<LongTermKeyInfo>,
    pub peer_irk: Option<Irk>,
    pub peer_signing: Option<SigningInfo>,
}

/// P-256 key pair handed to the security layer for secure connections pairing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EccKeys {
    pub private_key: [u8; 32],
    pub public_x: [u8; 32],
    pub public_y: [u8; 32],
}

/// Out-of-band data for secure connections pairing.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OobScData {
    pub confirm: [u8; 16],
    pub rand: [u8; 16],
}

/// This device's own identity, generated once and kept until erased.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LocalIdentity {
    pub irk: Irk,
    pub csrk: Csrk,
}
