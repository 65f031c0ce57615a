//! Controller resolving list and allow list synchronization
//!
//! The controller only accepts changes to these lists while the radio is idle,
//! so changes to the bonds only mark the lists stale. They are rebuilt from
//! the bond store in one pass on the next idle notification.

use blebond_types::flags::BondFlags;
use blebond_types::keys::Irk;
use blebond_types::policy::PrivacyMode;
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;

use crate::host::PrivacyController;
use crate::store::BondStore;

#[derive(Debug, Default)]
pub struct PrivacySync {
    resolving_list_stale: bool,
    allow_list_stale: bool,
}

impl PrivacySync {
    pub const fn new() -> Self {
        Self {
            resolving_list_stale: false,
            allow_list_stale: false,
        }
    }

    /// The resolving list no longer matches the bonds.
    pub fn mark_stale(&mut self) {
        self.resolving_list_stale = true;
    }

    pub fn is_stale(&self) -> bool {
        self.resolving_list_stale
    }

    pub fn mark_allow_list_stale(&mut self) {
        self.allow_list_stale = true;
    }

    pub fn is_allow_list_stale(&self) -> bool {
        self.allow_list_stale
    }

    /// Rebuild the stale lists if the radio is idle.
    ///
    /// A list stays stale unless every entry made it into the controller, the
    /// next idle notification retries the whole pass.
    pub async fn flush_if_idle<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
        &mut self,
        store: &BondStore<F, BONDS, CCC>,
        host: &mut impl PrivacyController,
    ) {
        if !(self.resolving_list_stale || self.allow_list_stale) || !host.is_radio_idle() {
            return;
        }
        if self.resolving_list_stale {
            self.resolving_list_stale = !Self::write_resolving_list(store, host).await;
        }
        if self.allow_list_stale {
            self.allow_list_stale = !Self::write_allow_list(store, host).await;
        }
    }

    /// Mirror every bonded identity into the allow list, now if the radio is idle.
    pub async fn sync_allow_list<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
        &mut self,
        store: &BondStore<F, BONDS, CCC>,
        host: &mut impl PrivacyController,
    ) {
        self.allow_list_stale = true;
        self.flush_if_idle(store, host).await;
    }

    async fn write_resolving_list<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
        store: &BondStore<F, BONDS, CCC>,
        host: &mut impl PrivacyController,
    ) -> bool {
        if let Err(e) = host.clear_resolving_list().await {
            warn!("Failed to clear resolving list: {:?}", e);
            return false;
        }

        let local_irk = store.local_identity().map(|l| l.irk).filter(Irk::is_usable);
        let mut complete = true;
        if let Some(irk) = &local_irk {
            if let Err(e) = host.add_local_identity(irk).await {
                warn!("Failed to add own identity to resolving list: {:?}", e);
                complete = false;
            }
        }

        // Peer entries carry our IRK too, an all-zero key disables local privacy
        let local_irk = local_irk.unwrap_or_default();
        for (slot, bond) in store.iter() {
            let Some(peer_irk) = bond.keys.peer_irk.filter(Irk::is_usable) else {
                continue;
            };
            let identity = &bond.record.identity;
            if let Err(e) = host.add_resolving_list_entry(identity, &peer_irk, &local_irk).await {
                warn!("Failed to add slot {} to resolving list: {:?}", slot, e);
                complete = false;
                continue;
            }
            let mode = if bond.record.flags.contains(BondFlags::RPA_ONLY) {
                PrivacyMode::Network
            } else {
                PrivacyMode::Device
            };
            if let Err(e) = host.set_privacy_mode(identity, mode).await {
                warn!("Failed to set privacy mode of slot {}: {:?}", slot, e);
                complete = false;
            }
        }
        debug!("Resolving list written, complete: {}", complete);
        complete
    }

    async fn write_allow_list<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
        store: &BondStore<F, BONDS, CCC>,
        host: &mut impl PrivacyController,
    ) -> bool {
        if let Err(e) = host.clear_allow_list().await {
            warn!("Failed to clear allow list: {:?}", e);
            return false;
        }
        let mut complete = true;
        for (slot, bond) in store.iter() {
            if let Err(e) = host.add_allow_list_entry(&bond.record.identity).await {
                warn!("Failed to add slot {} to allow list: {:?}", slot, e);
                complete = false;
            }
        }
        complete
    }
}
