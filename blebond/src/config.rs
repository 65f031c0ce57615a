use blebond_types::policy::OwnAddressMode;

use crate::params::BondParameters;

/// Configurations of the bond manager
#[derive(Clone, Debug, Default)]
pub struct BondManagerConfig {
    pub storage_config: StorageConfig,
    /// Initial pairing policy
    pub parameters: BondParameters,
    /// Address this device uses over the air. With a private address mode the
    /// local IRK is always distributed when bonding.
    pub own_address_mode: OwnAddressMode,
}

/// Config for storage
#[derive(Clone, Copy, Debug)]
pub struct StorageConfig {
    /// Start address of local storage, MUST BE start of a sector.
    /// If start_addr is set to 0(this is the default value), the last `num_sectors` sectors will be used.
    pub start_addr: usize,
    // Number of sectors used for storage, >= 2.
    pub num_sectors: u8,
    pub clear_storage: bool,
    /// Percentage of live items below which the storage is compacted after erasing bonds.
    pub compact_threshold: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            start_addr: 0,
            num_sectors: 2,
            clear_storage: false,
            compact_threshold: 80,
        }
    }
}
