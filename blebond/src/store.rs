//! Fixed-capacity bond table
//!
//! [`BondStore`] keeps an in-memory copy of every bond and writes through to
//! flash. The flash is the source of truth: whenever a write fails the cache is
//! rebuilt from it, so a half-written bond is never visible.
//!
//! Erasing a bond while links are up can be deferred, the erasure then runs on
//! [`BondStore::run_pending`] once every link is gone.

use blebond_types::address::{Address, AddressType, BdAddr};
use blebond_types::flags::BondFlags;
use blebond_types::keys::{Csrk, Irk, KeyMaterial, LocalIdentity, SigningInfo};
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;
use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::BondError;
use crate::lru::LruList;
use crate::resolver;
use crate::storage::{
    BOND_FIELDS, Storage, StorageData, StorageKeys, get_bond_key, get_local_identity_key, get_lru_key, parse_key,
};

/// Client characteristic configuration value meaning "nothing enabled"
pub const CCC_NONE: u16 = 0;

/// Persistent part of a bond that isn't a secret
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    /// Identity address of the peer, or the address it bonded with if it has no identity
    pub identity: Address,
    pub flags: BondFlags,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharConfig {
    pub handle: u16,
    pub value: u16,
}

/// Client characteristic configurations a bonded peer wrote, at most one per handle.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClientConfigTable<const N: usize> {
    entries: Vec<CharConfig, N>,
}

impl<const N: usize> ClientConfigTable<N> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn get(&self, handle: u16) -> Option<u16> {
        self.entries.iter().find(|e| e.handle == handle).map(|e| e.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharConfig> {
        self.entries.iter()
    }

    /// `(handle, value)` pairs, the shape the GATT server loads
    pub fn pairs(&self) -> Vec<(u16, u16), N> {
        self.entries.iter().map(|e| (e.handle, e.value)).collect()
    }

    /// Apply a write. Returns whether the table changed.
    ///
    /// Handle 0 clears the table. Writing [`CCC_NONE`] removes the entry of a
    /// handle, and is ignored for a handle that has no entry.
    pub fn update(&mut self, handle: u16, value: u16) -> Result<bool, BondError> {
        if handle == 0 {
            let changed = !self.entries.is_empty();
            self.entries.clear();
            return Ok(changed);
        }

        match self.entries.iter().position(|e| e.handle == handle) {
            Some(pos) if value == CCC_NONE => {
                self.entries.remove(pos);
                Ok(true)
            }
            Some(pos) => {
                let changed = self.entries[pos].value != value;
                self.entries[pos].value = value;
                Ok(changed)
            }
            None if value == CCC_NONE => Ok(false),
            None => self
                .entries
                .push(CharConfig { handle, value })
                .map(|_| true)
                .map_err(|_| BondError::NoResources),
        }
    }
}

/// Everything stored for one bonded peer
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Bond<const CCC: usize> {
    pub record: BondRecord,
    pub keys: KeyMaterial,
    pub config: ClientConfigTable<CCC>,
}

/// Fixed-capacity bond table
pub struct BondStore<F: AsyncNorFlash, const BONDS: usize, const CCC: usize> {
    storage: Storage<F, BONDS, CCC>,
    slots: [Option<Bond<CCC>>; BONDS],
    lru: LruList<BONDS>,
    local: Option<LocalIdentity>,
    /// Single erasures waiting for all links to go down
    pending_erase: [bool; BONDS],
    pending_erase_all: bool,
    pending_local_erase: bool,
    compact_threshold: u8,
}

impl<F: AsyncNorFlash, const BONDS: usize, const CCC: usize> BondStore<F, BONDS, CCC> {
    /// Open the bond storage and load every bond from it.
    pub async fn new(flash: F, config: &StorageConfig) -> Self {
        let storage = Storage::new(flash, config).await;
        let mut store = Self {
            storage,
            slots: core::array::from_fn(|_| None),
            lru: LruList::new(),
            local: None,
            pending_erase: [false; BONDS],
            pending_erase_all: false,
            pending_local_erase: false,
            compact_threshold: config.compact_threshold,
        };
        if let Err(e) = store.reload().await {
            error!("Failed to load bonds: {:?}", e);
        }
        store
    }

    /// Rebuild the in-memory cache from flash.
    pub async fn reload(&mut self) -> Result<(), BondError> {
        let mut records: [Option<BondRecord>; BONDS] = [None; BONDS];
        let mut keys: [KeyMaterial; BONDS] = [KeyMaterial::default(); BONDS];
        let mut csrks: [Option<Csrk>; BONDS] = [None; BONDS];
        let mut counters = [0u32; BONDS];
        let mut configs: [ClientConfigTable<CCC>; BONDS] = core::array::from_fn(|_| ClientConfigTable::new());
        let mut lru = None;
        let mut local = None;

        self.slots = core::array::from_fn(|_| None);

        // Items come oldest first, so later writes of a key override earlier ones
        self.storage
            .for_each(|key, item| {
                let Some((field, slot)) = parse_key(key) else {
                    warn!("Unknown storage key 0x{:X}", key);
                    return;
                };
                let s = slot as usize;
                match field {
                    StorageKeys::LruList => {
                        lru = match item {
                            StorageData::LruList(l) => Some(l),
                            _ => None,
                        };
                        return;
                    }
                    StorageKeys::LocalIdentity => {
                        local = match item {
                            StorageData::LocalIdentity(i) => Some(i),
                            _ => None,
                        };
                        return;
                    }
                    _ if s >= BONDS => return,
                    _ => {}
                }
                match item {
                    StorageData::BondRecord(r) => records[s] = Some(r),
                    StorageData::LocalLtk(k) => keys[s].local_ltk = Some(k),
                    StorageData::PeerLtk(k) => keys[s].peer_ltk = Some(k),
                    StorageData::PeerIrk(k) => keys[s].peer_irk = Some(k),
                    StorageData::PeerCsrk(k) => csrks[s] = Some(k),
                    StorageData::SignCounter(c) => counters[s] = c,
                    StorageData::ClientConfig(t) => configs[s] = t,
                    StorageData::Removed => match field {
                        StorageKeys::BondRecord => records[s] = None,
                        StorageKeys::LocalLtk => keys[s].local_ltk = None,
                        StorageKeys::PeerLtk => keys[s].peer_ltk = None,
                        StorageKeys::PeerIrk => keys[s].peer_irk = None,
                        StorageKeys::PeerCsrk => csrks[s] = None,
                        StorageKeys::SignCounter => counters[s] = 0,
                        StorageKeys::ClientConfig => configs[s] = ClientConfigTable::new(),
                        _ => {}
                    },
                    _ => {}
                }
            })
            .await?;

        for (slot, record) in records.into_iter().enumerate() {
            if let Some(record) = record {
                let mut bond_keys = keys[slot];
                bond_keys.peer_signing = csrks[slot].map(|csrk| SigningInfo {
                    csrk,
                    sign_counter: counters[slot],
                });
                self.slots[slot] = Some(Bond {
                    record,
                    keys: bond_keys,
                    config: core::mem::take(&mut configs[slot]),
                });
            }
        }

        self.lru = match lru {
            Some(l) if l.is_valid() => l,
            Some(_) => {
                warn!("Stored LRU list is corrupted, resetting");
                LruList::new()
            }
            None => LruList::new(),
        };
        self.local = local;

        debug!("Loaded {} bonds", self.total_bonded());
        Ok(())
    }

    /// Number of bonds
    pub fn total_bonded(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn bond(&self, slot: u8) -> Option<&Bond<CCC>> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    /// Occupied slots
    pub fn iter(&self) -> impl Iterator<Item = (u8, &Bond<CCC>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|b| (i as u8, b)))
    }

    pub fn lru(&self) -> &LruList<BONDS> {
        &self.lru
    }

    pub fn local_identity(&self) -> Option<&LocalIdentity> {
        self.local.as_ref()
    }

    /// Slot of the bond whose identity is exactly `address`
    fn lookup_exact(&self, address: &Address) -> Option<u8> {
        self.iter()
            .find(|(_, b)| b.record.identity.same_device(address))
            .map(|(slot, _)| slot)
    }

    /// Resolve a private address against every stored IRK.
    pub fn resolve(&self, address: &Address) -> Option<u8> {
        resolver::resolve(
            self.iter().filter_map(|(slot, b)| b.keys.peer_irk.as_ref().map(|irk| (slot, irk))),
            address,
        )
    }

    /// Find the bond of a peer: exact identity match first, then private address resolution.
    ///
    /// Returns the slot and the identity address of the peer.
    pub fn find(&self, address: &Address) -> Result<(u8, Address), BondError> {
        let slot = self
            .lookup_exact(address)
            .or_else(|| self.resolve(address))
            .ok_or(BondError::NotFound)?;
        let identity = self.slots[slot as usize]
            .as_ref()
            .map(|b| b.record.identity)
            .ok_or(BondError::NotFound)?;
        Ok((slot, identity))
    }

    /// An address no stored bond uses, for peers that distributed an IRK with
    /// an all-zero identity address. Counts up from 1 on every call.
    pub fn placeholder_address(&self) -> Address {
        let mut counter: u32 = 1;
        loop {
            let c = counter.to_le_bytes();
            let candidate = Address::new(AddressType::RandomIdentity, BdAddr([c[0], c[1], c[2], c[3], 0, 0xC0]));
            if self.lookup_exact(&candidate).is_none() {
                return candidate;
            }
            counter += 1;
        }
    }

    /// Save a bond, reusing the slot of the same identity if there is one.
    ///
    /// When every slot is used the least recently used bond is evicted if
    /// `evict` is set, otherwise `StoreFull` is returned. The client config
    /// table of the bond starts empty.
    pub async fn create_or_update(&mut self, record: BondRecord, keys: KeyMaterial, evict: bool) -> Result<u8, BondError> {
        let slot = match self.lookup_exact(&record.identity) {
            Some(slot) => slot,
            None => match self.slots.iter().position(|s| s.is_none()) {
                Some(free) => free as u8,
                None if evict => {
                    let victim = self.lru.victim();
                    info!("Bond store full, evicting slot {}", victim);
                    self.erase_now(victim).await?;
                    victim
                }
                None => return Err(BondError::StoreFull),
            },
        };

        let bond = Bond {
            record,
            keys,
            config: ClientConfigTable::new(),
        };

        let mut lru = self.lru.clone();
        lru.touch(slot);
        let replacing = self.slots[slot as usize].is_some();
        if let Err(e) = self.replace_bond(slot, &bond, &lru, replacing).await {
            error!("Failed to save bond in slot {}, rolling back", slot);
            // Shadow whatever made it to flash, then trust only what's there
            let _ = self.remove_fields(slot).await;
            let _ = self.reload().await;
            return Err(e);
        }

        self.slots[slot as usize] = Some(bond);
        self.lru = lru;
        self.pending_erase[slot as usize] = false;
        info!("Bond saved in slot {}", slot);
        Ok(slot)
    }

    /// Drop the record of the bond being replaced before any of its fields
    /// change, so that an interrupted save never pairs old keys with new ones.
    async fn replace_bond(
        &mut self,
        slot: u8,
        bond: &Bond<CCC>,
        lru: &LruList<BONDS>,
        replacing: bool,
    ) -> Result<(), BondError> {
        if replacing {
            self.storage.remove(get_bond_key(StorageKeys::BondRecord, slot)).await?;
        }
        self.write_bond(slot, bond, lru).await
    }

    /// Write every field of a bond. The record goes last and commits the bond,
    /// a slot without a record is empty on reload whatever else it holds.
    async fn write_bond(&mut self, slot: u8, bond: &Bond<CCC>, lru: &LruList<BONDS>) -> Result<(), BondError> {
        let keys = &bond.keys;
        let s = &mut self.storage;
        Self::write_or_remove(s, get_bond_key(StorageKeys::PeerIrk, slot), keys.peer_irk.map(StorageData::PeerIrk)).await?;
        Self::write_or_remove(s, get_bond_key(StorageKeys::LocalLtk, slot), keys.local_ltk.map(StorageData::LocalLtk))
            .await?;
        Self::write_or_remove(s, get_bond_key(StorageKeys::PeerLtk, slot), keys.peer_ltk.map(StorageData::PeerLtk)).await?;
        Self::write_or_remove(
            s,
            get_bond_key(StorageKeys::PeerCsrk, slot),
            keys.peer_signing.map(|i| StorageData::PeerCsrk(i.csrk)),
        )
        .await?;
        Self::write_or_remove(
            s,
            get_bond_key(StorageKeys::SignCounter, slot),
            keys.peer_signing.map(|i| StorageData::SignCounter(i.sign_counter)),
        )
        .await?;
        s.write(
            get_bond_key(StorageKeys::ClientConfig, slot),
            &StorageData::ClientConfig(bond.config.clone()),
        )
        .await?;
        s.write(get_lru_key(), &StorageData::LruList(lru.clone())).await?;
        s.write(get_bond_key(StorageKeys::BondRecord, slot), &StorageData::BondRecord(bond.record))
            .await
    }

    async fn write_or_remove(
        storage: &mut Storage<F, BONDS, CCC>,
        key: u32,
        data: Option<StorageData<BONDS, CCC>>,
    ) -> Result<(), BondError> {
        match data {
            Some(data) => storage.write(key, &data).await,
            None => storage.remove(key).await,
        }
    }

    /// Overwrite every field of a slot with the removed marker, record first.
    async fn remove_fields(&mut self, slot: u8) -> Result<(), BondError> {
        for field in BOND_FIELDS {
            self.storage.remove(get_bond_key(field, slot)).await?;
        }
        Ok(())
    }

    async fn erase_now(&mut self, slot: u8) -> Result<(), BondError> {
        self.pending_erase[slot as usize] = false;
        if self.slots[slot as usize].is_none() {
            return Ok(());
        }
        if let Err(e) = self.remove_fields(slot).await {
            let _ = self.reload().await;
            return Err(e);
        }
        self.slots[slot as usize] = None;
        info!("Bond in slot {} erased", slot);
        Ok(())
    }

    /// Erase one bond. Erasing an empty slot succeeds and does nothing.
    ///
    /// With `defer` set the erasure only happens on the next [`run_pending`](Self::run_pending).
    pub async fn erase(&mut self, slot: u8, defer: bool) -> Result<(), BondError> {
        if slot as usize >= BONDS {
            return Err(BondError::NotFound);
        }
        if defer {
            if self.slots[slot as usize].is_some() {
                info!("Erasing slot {} once all links are down", slot);
                self.pending_erase[slot as usize] = true;
            }
            return Ok(());
        }
        self.erase_now(slot).await
    }

    /// Erase every bond, keeping the local identity.
    pub async fn erase_all(&mut self, defer: bool) -> Result<(), BondError> {
        if defer {
            info!("Erasing all bonds once all links are down");
            self.pending_erase_all = true;
            return Ok(());
        }
        self.erase_all_now().await
    }

    async fn erase_all_now(&mut self) -> Result<(), BondError> {
        self.pending_erase_all = false;
        self.pending_erase = [false; BONDS];
        self.slots = core::array::from_fn(|_| None);
        self.lru = LruList::new();
        let result = self.wipe_storage().await;
        if result.is_err() {
            let _ = self.reload().await;
        }
        info!("All bonds erased");
        result
    }

    /// Erase the whole flash range, then put the local identity back.
    async fn wipe_storage(&mut self) -> Result<(), BondError> {
        self.storage.erase_all().await?;
        if let Some(local) = self.local {
            self.storage
                .write(get_local_identity_key(), &StorageData::LocalIdentity(local))
                .await?;
        }
        Ok(())
    }

    /// Forget this device's identity keys and the LRU order.
    pub async fn erase_local_identity(&mut self, defer: bool) -> Result<(), BondError> {
        if defer {
            info!("Erasing local identity once all links are down");
            self.pending_local_erase = true;
            return Ok(());
        }
        self.pending_local_erase = false;
        self.local = None;
        self.lru = LruList::new();
        self.storage.remove(get_local_identity_key()).await?;
        self.storage.remove(get_lru_key()).await
    }

    pub async fn set_local_identity(&mut self, identity: LocalIdentity) -> Result<(), BondError> {
        self.storage
            .write(get_local_identity_key(), &StorageData::LocalIdentity(identity))
            .await?;
        self.local = Some(identity);
        Ok(())
    }

    pub fn has_pending(&self) -> bool {
        self.pending_erase_all || self.pending_local_erase || self.pending_erase.iter().any(|p| *p)
    }

    /// Run the deferred erasures, then compact and reload if anything was erased.
    ///
    /// Returns whether something was erased.
    pub async fn run_pending(&mut self) -> Result<bool, BondError> {
        if !self.has_pending() {
            return Ok(false);
        }

        let mut result = Ok(());
        if self.pending_erase_all {
            result = self.erase_all_now().await;
        }
        if self.pending_local_erase {
            result = result.and(self.erase_local_identity(false).await);
        }
        for slot in 0..BONDS {
            if self.pending_erase[slot] {
                result = result.and(self.erase_now(slot as u8).await);
            }
        }

        if self.storage.needs_compaction(self.compact_threshold) {
            result = result.and(self.compact().await);
        }
        result = result.and(self.reload().await);
        result.map(|_| true)
    }

    /// Erase the flash and write back only live items.
    pub async fn compact(&mut self) -> Result<(), BondError> {
        debug!("Compacting bond storage");
        let result = self.rewrite_live_items().await;
        if result.is_err() {
            error!("Compaction failed");
            let _ = self.reload().await;
        }
        result
    }

    async fn rewrite_live_items(&mut self) -> Result<(), BondError> {
        self.wipe_storage().await?;
        let lru = self.lru.clone();
        for slot in 0..BONDS {
            if let Some(bond) = self.slots[slot].take() {
                let written = self.write_bond(slot as u8, &bond, &lru).await;
                self.slots[slot] = Some(bond);
                written?;
            }
        }
        self.storage.write(get_lru_key(), &StorageData::LruList(lru)).await
    }

    pub fn flags(&self, slot: u8) -> Result<BondFlags, BondError> {
        self.bond(slot).map(|b| b.record.flags).ok_or(BondError::NotFound)
    }

    /// Set or clear flags of a bond, writing only if something changed.
    pub async fn update_flags(&mut self, slot: u8, mask: BondFlags, set: bool) -> Result<(), BondError> {
        let bond = self.bond(slot).ok_or(BondError::NotFound)?;
        let mut record = bond.record;
        let flags = record.flags.apply(mask, set);
        if flags == record.flags {
            return Ok(());
        }
        record.flags = flags;
        if let Err(e) = self
            .storage
            .write(get_bond_key(StorageKeys::BondRecord, slot), &StorageData::BondRecord(record))
            .await
        {
            let _ = self.reload().await;
            return Err(e);
        }
        if let Some(bond) = self.slots[slot as usize].as_mut() {
            bond.record = record;
        }
        Ok(())
    }

    /// Record a client characteristic configuration write of a bonded peer.
    pub async fn update_config(&mut self, slot: u8, handle: u16, value: u16) -> Result<(), BondError> {
        let bond = self.bond(slot).ok_or(BondError::NotFound)?;
        let mut config = bond.config.clone();
        if !config.update(handle, value)? {
            return Ok(());
        }
        if let Err(e) = self
            .storage
            .write(
                get_bond_key(StorageKeys::ClientConfig, slot),
                &StorageData::ClientConfig(config.clone()),
            )
            .await
        {
            let _ = self.reload().await;
            return Err(e);
        }
        if let Some(bond) = self.slots[slot as usize].as_mut() {
            bond.config = config;
        }
        Ok(())
    }

    /// Persist a new signed write counter. The counter never goes back.
    pub async fn update_sign_counter(&mut self, slot: u8, counter: u32) -> Result<(), BondError> {
        let bond = self.bond(slot).ok_or(BondError::NotFound)?;
        let current = bond.keys.peer_signing.ok_or(BondError::NotFound)?.sign_counter;
        if counter < current {
            warn!("Refusing to move sign counter of slot {} back", slot);
            return Err(BondError::InvalidParameter);
        }
        if counter == current {
            return Ok(());
        }
        if let Err(e) = self
            .storage
            .write(
                get_bond_key(StorageKeys::SignCounter, slot),
                &StorageData::SignCounter(counter),
            )
            .await
        {
            let _ = self.reload().await;
            return Err(e);
        }
        if let Some(signing) = self.slots[slot as usize]
            .as_mut()
            .and_then(|b| b.keys.peer_signing.as_mut())
        {
            signing.sign_counter = counter;
        }
        Ok(())
    }

    /// Mark a bond as the most recently used.
    pub async fn touch(&mut self, slot: u8) -> Result<(), BondError> {
        let mut lru = self.lru.clone();
        lru.touch(slot);
        if lru == self.lru {
            return Ok(());
        }
        self.storage.write(get_lru_key(), &StorageData::LruList(lru.clone())).await?;
        self.lru = lru;
        Ok(())
    }

    /// Stored IRK of a bond, if the peer has a usable identity
    pub fn peer_irk(&self, slot: u8) -> Option<&Irk> {
        self.bond(slot)
            .and_then(|b| b.keys.peer_irk.as_ref())
            .filter(|irk| irk.is_usable())
    }

    /// Close the store and give back the flash
    pub fn release(self) -> F {
        self.storage.release()
    }
}
