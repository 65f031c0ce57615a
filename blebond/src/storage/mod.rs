//! Persistence of bonds on NOR flash, through `sequential-storage`

pub mod mem_flash;

use core::ops::Range;

use blebond_types::keys::{Csrk, Irk, LocalIdentity, LongTermKeyInfo};
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;
use sequential_storage::Error as SSError;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{SerializationError, Value, fetch_all_items, store_item};
use strum::FromRepr;

use crate::config::StorageConfig;
use crate::error::BondError;
use crate::lru::LruList;
use crate::store::{BondRecord, ClientConfigTable};

/// StorageKeys is the prefix digit stored in the flash, it's used to identify the type of the stored data.
///
/// The whole storage item is a Rust enum, when deserializing the first byte tells how to parse the rest.
/// Per-bond keys also carry the slot number, see [`get_bond_key`].
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromRepr)]
pub(crate) enum StorageKeys {
    BondRecord = 1,
    LocalLtk = 2,
    PeerLtk = 3,
    PeerIrk = 4,
    PeerCsrk = 5,
    SignCounter = 6,
    ClientConfig = 7,
    LruList = 0x10,
    LocalIdentity = 0x11,
    Removed = 0xFF,
}

/// Per-bond fields. Removal goes in this order, so the record is dropped first.
pub(crate) const BOND_FIELDS: [StorageKeys; 7] = [
    StorageKeys::BondRecord,
    StorageKeys::PeerIrk,
    StorageKeys::LocalLtk,
    StorageKeys::PeerLtk,
    StorageKeys::PeerCsrk,
    StorageKeys::SignCounter,
    StorageKeys::ClientConfig,
];

/// Get the key of a per-bond field.
pub(crate) fn get_bond_key(field: StorageKeys, slot: u8) -> u32 {
    ((field as u32) << 8) | slot as u32
}

/// Split a key back into field and slot.
pub(crate) fn parse_key(key: u32) -> Option<(StorageKeys, u8)> {
    let field = StorageKeys::from_repr((key >> 8) as u8)?;
    Some((field, key as u8))
}

pub(crate) fn get_lru_key() -> u32 {
    (StorageKeys::LruList as u32) << 8
}

pub(crate) fn get_local_identity_key() -> u32 {
    (StorageKeys::LocalIdentity as u32) << 8
}

#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum StorageData<const BONDS: usize, const CCC: usize> {
    BondRecord(BondRecord),
    LocalLtk(LongTermKeyInfo),
    PeerLtk(LongTermKeyInfo),
    PeerIrk(Irk),
    PeerCsrk(Csrk),
    SignCounter(u32),
    ClientConfig(ClientConfigTable<CCC>),
    LruList(LruList<BONDS>),
    LocalIdentity(LocalIdentity),
    // Removing items is expensive, erased keys are overwritten by this marker instead
    Removed,
}

pub(crate) fn postcard_error_to_serialization_error(e: postcard::Error) -> SerializationError {
    match e {
        postcard::Error::SerializeBufferFull => SerializationError::BufferTooSmall,
        postcard::Error::DeserializeUnexpectedEnd => SerializationError::InvalidData,
        _ => SerializationError::InvalidFormat,
    }
}

/// Write the tag byte, then the postcard encoded value.
macro_rules! ser_storage_variant {
    ($buffer:expr, $key:expr, $value:expr) => {{
        $buffer[0] = $key as u8;
        let len = postcard::to_slice($value, &mut $buffer[1..])
            .map_err(postcard_error_to_serialization_error)?
            .len();
        Ok(1 + len)
    }};
}

impl<const BONDS: usize, const CCC: usize> Value<'_> for StorageData<BONDS, CCC> {
    fn serialize_into(&self, buffer: &mut [u8]) -> Result<usize, SerializationError> {
        if buffer.is_empty() {
            return Err(SerializationError::BufferTooSmall);
        }

        match self {
            StorageData::BondRecord(r) => ser_storage_variant!(buffer, StorageKeys::BondRecord, r),
            StorageData::LocalLtk(k) => ser_storage_variant!(buffer, StorageKeys::LocalLtk, k),
            StorageData::PeerLtk(k) => ser_storage_variant!(buffer, StorageKeys::PeerLtk, k),
            StorageData::PeerIrk(k) => ser_storage_variant!(buffer, StorageKeys::PeerIrk, k),
            StorageData::PeerCsrk(k) => ser_storage_variant!(buffer, StorageKeys::PeerCsrk, k),
            StorageData::SignCounter(c) => ser_storage_variant!(buffer, StorageKeys::SignCounter, c),
            StorageData::ClientConfig(t) => ser_storage_variant!(buffer, StorageKeys::ClientConfig, t),
            StorageData::LruList(l) => ser_storage_variant!(buffer, StorageKeys::LruList, l),
            StorageData::LocalIdentity(i) => ser_storage_variant!(buffer, StorageKeys::LocalIdentity, i),
            StorageData::Removed => {
                buffer[0] = StorageKeys::Removed as u8;
                Ok(1)
            }
        }
    }

    fn deserialize_from(buffer: &[u8]) -> Result<Self, SerializationError>
    where
        Self: Sized,
    {
        if buffer.is_empty() {
            return Err(SerializationError::InvalidFormat);
        }

        let key = StorageKeys::from_repr(buffer[0]).ok_or(SerializationError::InvalidFormat)?;
        let body = &buffer[1..];
        let data = match key {
            StorageKeys::BondRecord => {
                StorageData::BondRecord(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::LocalLtk => {
                StorageData::LocalLtk(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::PeerLtk => {
                StorageData::PeerLtk(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::PeerIrk => {
                StorageData::PeerIrk(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::PeerCsrk => {
                StorageData::PeerCsrk(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::SignCounter => {
                StorageData::SignCounter(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::ClientConfig => {
                StorageData::ClientConfig(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::LruList => {
                StorageData::LruList(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::LocalIdentity => {
                StorageData::LocalIdentity(postcard::from_bytes(body).map_err(postcard_error_to_serialization_error)?)
            }
            StorageKeys::Removed => StorageData::Removed,
        };
        Ok(data)
    }
}

/// Buffer used for every item. According to doc of `sequential-storage`, for some flashes it should be aligned in 32 bytes.
pub(crate) const BUFFER_SIZE: usize = 256;

pub struct Storage<F: AsyncNorFlash, const BONDS: usize, const CCC: usize> {
    pub(crate) flash: F,
    pub(crate) storage_range: Range<u32>,
    pub(crate) buffer: [u8; BUFFER_SIZE],
    /// Items written since the last compaction
    written_items: u32,
    /// Removed markers among `written_items`
    removed_items: u32,
}

impl<F: AsyncNorFlash, const BONDS: usize, const CCC: usize> Storage<F, BONDS, CCC> {
    pub async fn new(flash: F, config: &StorageConfig) -> Self {
        // Largest item is the client config table: tag, length and up to 3 bytes per varint
        const { assert!(1 + 5 + CCC * 6 <= BUFFER_SIZE, "Client config table doesn't fit the storage buffer") };
        // LRU list: tag, a varint length of at most 2 bytes and one byte per slot
        const { assert!(1 + 2 + BONDS <= BUFFER_SIZE, "LRU list doesn't fit the storage buffer") };

        // Check storage setting
        assert!(
            config.num_sectors >= 2,
            "Number of used sector for storage must larger than 1"
        );

        info!(
            "Flash capacity {} KB, using {} KB({} sectors) starting from 0x{:X} as bond storage",
            flash.capacity() / 1024,
            (F::ERASE_SIZE * config.num_sectors as usize) / 1024,
            config.num_sectors,
            config.start_addr,
        );

        // If config.start_addr == 0, use last `num_sectors` sectors
        let storage_range = if config.start_addr == 0 {
            (flash.capacity() - config.num_sectors as usize * F::ERASE_SIZE) as u32..flash.capacity() as u32
        } else {
            assert!(
                config.start_addr % F::ERASE_SIZE == 0,
                "Storage's start addr MUST BE a multiplier of sector size"
            );
            config.start_addr as u32..(config.start_addr + config.num_sectors as usize * F::ERASE_SIZE) as u32
        };

        let mut storage = Self {
            flash,
            storage_range,
            buffer: [0; BUFFER_SIZE],
            written_items: 0,
            removed_items: 0,
        };

        if config.clear_storage {
            debug!("Clearing storage!");
            let _ = storage.erase_all().await;
        }

        storage
    }

    pub(crate) async fn write(&mut self, key: u32, data: &StorageData<BONDS, CCC>) -> Result<(), BondError> {
        store_item::<u32, StorageData<BONDS, CCC>, _>(
            &mut self.flash,
            self.storage_range.clone(),
            &mut NoCache::new(),
            &mut self.buffer,
            &key,
            data,
        )
        .await
        .map_err(print_storage_error::<F>)?;

        self.written_items += 1;
        if matches!(data, StorageData::Removed) {
            self.removed_items += 1;
        }
        Ok(())
    }

    pub(crate) async fn remove(&mut self, key: u32) -> Result<(), BondError> {
        self.write(key, &StorageData::Removed).await
    }

    /// Visit every item in the storage, in no particular order. Removed markers are included.
    pub(crate) async fn for_each(
        &mut self,
        mut f: impl FnMut(u32, StorageData<BONDS, CCC>),
    ) -> Result<(), BondError> {
        let mut storage_cache = NoCache::new();
        let mut iterator = fetch_all_items::<u32, _, _>(
            &mut self.flash,
            self.storage_range.clone(),
            &mut storage_cache,
            &mut self.buffer,
        )
        .await
        .map_err(print_storage_error::<F>)?;

        self.written_items = 0;
        self.removed_items = 0;
        while let Some((key, item)) = iterator
            .next::<StorageData<BONDS, CCC>>(&mut self.buffer)
            .await
            .map_err(print_storage_error::<F>)?
        {
            self.written_items += 1;
            if matches!(item, StorageData::Removed) {
                self.removed_items += 1;
            }
            f(key, item);
        }

        Ok(())
    }

    pub(crate) async fn erase_all(&mut self) -> Result<(), BondError> {
        sequential_storage::erase_all(&mut self.flash, self.storage_range.clone())
            .await
            .map_err(print_storage_error::<F>)?;
        self.written_items = 0;
        self.removed_items = 0;
        Ok(())
    }

    /// Whether removed markers take up more than `100 - threshold` percent of the items.
    pub(crate) fn needs_compaction(&self, threshold: u8) -> bool {
        let dead_share = 100u32.saturating_sub(threshold.min(100) as u32);
        self.removed_items > 0 && self.removed_items * 100 >= self.written_items * dead_share
    }

    /// Give back the flash
    pub fn release(self) -> F {
        self.flash
    }
}

fn print_storage_error<F: AsyncNorFlash>(e: SSError<F::Error>) -> BondError {
    match e {
        #[cfg(feature = "defmt")]
        SSError::Storage { value: e } => error!("Flash error: {:?}", defmt::Debug2Format(&e)),
        #[cfg(not(feature = "defmt"))]
        SSError::Storage { value: _e } => error!("Flash error"),
        SSError::FullStorage => error!("Storage is full"),
        SSError::Corrupted {} => error!("Storage is corrupted"),
        SSError::BufferTooBig => error!("Buffer too big"),
        SSError::BufferTooSmall(x) => error!("Buffer too small, needs {} bytes", x),
        SSError::SerializationError(e) => error!("Map value error: {}", e),
        _ => error!("Unknown storage error"),
    }
    BondError::PersistenceFailure
}
