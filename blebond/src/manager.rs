//! Bond manager
//!
//! [`BondManager`] owns the bond store, the pairing queue, the link table and
//! the privacy synchronization state. All of them are driven from one place:
//! [`BondManager::process`] handles one [`BondEvent`] to completion before the
//! next one is looked at, so no locking is needed between them.

use blebond_types::address::{Address, BdAddr};
use blebond_types::flags::{AuthReq, BondFlags};
use blebond_types::keys::{Csrk, Irk, LocalIdentity};
use blebond_types::policy::{BondFailAction, OwnAddressMode, PairingMode, Role, SecureConnections};
use blebond_types::smp::PairingFailure;
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;
use rand_core::RngCore;

use crate::channel::BOND_EVENT_CHANNEL;
use crate::config::BondManagerConfig;
use crate::error::BondError;
use crate::event::{AuthOutcome, BondCallbacks, BondEvent, BondStage, CharValue, PasskeyRequest, ReadError};
use crate::host::{
    CENTRAL_ADDRESS_RESOLUTION_UUID, ConnHandle, DISCONNECT_AUTHENTICATION_FAILURE, HostStack, PairingRequest,
    RPA_ONLY_UUID,
};
use crate::link::{LinkInfo, LinkTable};
use crate::pairing::{Enqueued, PairingNode, PairingSerializer, PairingState};
use crate::params::{ParamId, Parameter, ParameterStore};
use crate::post_bond;
use crate::privacy::PrivacySync;
use crate::resolver;
use crate::store::{BondRecord, BondStore};

/// Largest passkey, six decimal digits
pub const MAX_PASSKEY: u32 = 999_999;

/// Who a service changed indication is for
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ServiceChangedTarget {
    /// Every bond, and every live link
    All,
    Conn(ConnHandle),
}

/// Bonding and pairing manager
///
/// - `BONDS`: capacity of the bond store
/// - `CCC`: client characteristic configurations kept per bond
/// - `LINKS`: simultaneous links, also the depth of the pairing queue
pub struct BondManager<
    'a,
    F: AsyncNorFlash,
    R: RngCore,
    const BONDS: usize = 8,
    const CCC: usize = 8,
    const LINKS: usize = 4,
> {
    store: BondStore<F, BONDS, CCC>,
    params: ParameterStore,
    queue: PairingSerializer<LINKS>,
    links: LinkTable<LINKS>,
    privacy: PrivacySync,
    own_address_mode: OwnAddressMode,
    callbacks: Option<&'a dyn BondCallbacks>,
    rng: R,
}

impl<'a, F: AsyncNorFlash, R: RngCore, const BONDS: usize, const CCC: usize, const LINKS: usize>
    BondManager<'a, F, R, BONDS, CCC, LINKS>
{
    /// Load the bonds from `flash`, generating this device's identity keys if there are none yet.
    pub async fn new(flash: F, config: &BondManagerConfig, rng: R) -> Self {
        let store = BondStore::new(flash, &config.storage_config).await;
        let mut manager = Self {
            store,
            params: ParameterStore::new(config.parameters),
            queue: PairingSerializer::new(),
            links: LinkTable::new(),
            privacy: PrivacySync::new(),
            own_address_mode: config.own_address_mode,
            callbacks: None,
            rng,
        };
        manager.ensure_local_identity().await;

        // The controller lists are empty after reset
        manager.privacy.mark_stale();
        if manager.params.values().auto_sync_allow_list {
            manager.privacy.mark_allow_list_stale();
        }
        info!("Bond manager started with {} bonds", manager.store.total_bonded());
        manager
    }

    /// Register the observer of the bonding procedure, replacing the previous one.
    pub fn register_callbacks(&mut self, callbacks: &'a dyn BondCallbacks) {
        self.callbacks = Some(callbacks);
    }

    pub fn total_bonded(&self) -> usize {
        self.store.total_bonded()
    }

    pub fn store(&self) -> &BondStore<F, BONDS, CCC> {
        &self.store
    }

    pub fn privacy(&self) -> &PrivacySync {
        &self.privacy
    }

    /// State of the pairing queued for `conn`
    pub fn pairing_state(&self, conn: ConnHandle) -> Option<PairingState> {
        self.queue.state(conn)
    }

    pub fn link(&self, conn: ConnHandle) -> Option<&LinkInfo> {
        self.links.get(conn)
    }

    /// Find the bond of a peer by identity or private address.
    pub fn find_bond(&self, address: &Address) -> Result<(u8, Address), BondError> {
        self.store.find(address)
    }

    /// A fresh resolvable private address built from the local IRK
    pub fn generate_private_address(&mut self) -> Option<BdAddr> {
        let irk = self.store.local_identity()?.irk;
        Some(resolver::generate_rpa(&irk, &mut self.rng))
    }

    /// Close the manager and give back the flash
    pub fn release(self) -> F {
        self.store.release()
    }

    /// Receive events from [`BOND_EVENT_CHANNEL`] forever.
    pub async fn run<H: HostStack>(&mut self, host: &mut H) -> ! {
        loop {
            let event = BOND_EVENT_CHANNEL.receive().await;
            self.process(event, host).await;
        }
    }

    /// Handle one event.
    pub async fn process<H: HostStack>(&mut self, event: BondEvent, host: &mut H) {
        trace!("Bond event: {:?}", event);
        match event {
            BondEvent::LinkEstablished { conn, peer, role } => self.on_link_established(conn, peer, role, host).await,
            BondEvent::LinkTerminated { conn, reason } => self.on_link_terminated(conn, reason, host).await,
            BondEvent::PairingRequest { conn, request } => self.on_pairing_request(conn, request, host).await,
            BondEvent::SecurityRequest { conn, auth_req } => self.on_security_request(conn, auth_req, host).await,
            BondEvent::PasskeyNeeded { conn, request } => self.on_passkey_needed(conn, request, host).await,
            BondEvent::AuthenticationComplete { conn, result } => match result {
                Ok(outcome) => self.on_authenticated(conn, outcome, host).await,
                Err(reason) => self.on_authentication_failed(conn, reason, host).await,
            },
            BondEvent::EncryptionComplete { conn, result } => self.on_encryption_complete(conn, result, host).await,
            BondEvent::CharacteristicRead { conn, uuid, result } => {
                self.on_characteristic_read(conn, uuid, result, host).await
            }
            BondEvent::ServiceChangedConfirmed { conn } => {
                if let Some(slot) = self.bonded_slot(conn) {
                    if let Err(e) = self
                        .store
                        .update_flags(slot, BondFlags::SERVICE_CHANGED_PENDING, false)
                        .await
                    {
                        error!("Failed to clear service changed flag: {:?}", e);
                    }
                }
            }
            BondEvent::SignCounterUpdated { conn, counter } => {
                if let Some(slot) = self.bonded_slot(conn) {
                    if let Err(e) = self.store.update_sign_counter(slot, counter).await {
                        error!("Failed to save sign counter of slot {}: {:?}", slot, e);
                    }
                }
            }
            BondEvent::ClientConfigWritten { conn, handle, value } => {
                if let Some(slot) = self.bonded_slot(conn) {
                    if let Err(e) = self.store.update_config(slot, handle, value).await {
                        error!("Failed to save client config of slot {}: {:?}", slot, e);
                    }
                }
            }
            BondEvent::RadioIdle => self.privacy.flush_if_idle(&self.store, host).await,
            BondEvent::EccKeysGenerated(keys) => {
                self.params.ecc_keys_generated(keys);
                if let Some(cb) = self.callbacks {
                    cb.ecc_keys_generated(&keys);
                }
            }
        }
    }

    fn notify(&self, conn: ConnHandle, stage: BondStage, status: Result<(), BondError>) {
        if let Err(e) = status {
            debug!("{:?} on {:?} failed: {:?}", stage, conn, e);
        }
        if let Some(cb) = self.callbacks {
            cb.pairing_state(conn, stage, status);
        }
    }

    fn bonded_slot(&self, conn: ConnHandle) -> Option<u8> {
        self.links.get(conn).and_then(|l| l.slot)
    }

    async fn ensure_local_identity(&mut self) {
        if self.store.local_identity().is_some() {
            return;
        }
        let mut irk = Irk::default();
        while !irk.is_usable() {
            self.rng.fill_bytes(&mut irk.0);
        }
        let mut csrk = Csrk::default();
        self.rng.fill_bytes(&mut csrk.0);
        match self.store.set_local_identity(LocalIdentity { irk, csrk }).await {
            Ok(()) => info!("Generated new local identity keys"),
            Err(e) => error!("Failed to save local identity: {:?}", e),
        }
    }

    /// The bonds changed, the controller lists must follow.
    async fn bonds_changed<H: HostStack>(&mut self, host: &mut H) {
        self.privacy.mark_stale();
        if self.params.values().auto_sync_allow_list {
            self.privacy.mark_allow_list_stale();
        }
        self.privacy.flush_if_idle(&self.store, host).await;
    }

    // Pairing queue

    /// Queue a pairing for `conn`, and hand it to the security layer if nothing else is pairing.
    async fn start_pairing<H: HostStack>(
        &mut self,
        conn: ConnHandle,
        peer_request: Option<PairingRequest>,
        host: &mut H,
    ) -> Result<(), BondError> {
        let peer = self.links.get(conn).ok_or(BondError::NotConnected)?.peer;
        match self.queue.request(conn, peer.kind, peer_request)? {
            Enqueued::Started(node) => {
                if let Err(e) = self.authenticate(&node, host).await {
                    self.queue.advance(conn, PairingState::End);
                    self.promote_next(host).await;
                    return Err(e);
                }
                Ok(())
            }
            Enqueued::Waiting => Ok(()),
            Enqueued::Existing(state) => {
                debug!("Pairing on {:?} already queued, state {:?}", conn, state);
                Ok(())
            }
        }
    }

    async fn authenticate<H: HostStack>(&mut self, node: &PairingNode, host: &mut H) -> Result<(), BondError> {
        let params = self.params.auth_params(self.own_address_mode);
        if node.peer_request.is_none() {
            self.notify(node.conn, BondStage::Started, Ok(()));
        }
        debug!("Starting pairing on {:?}", node.conn);
        host.authenticate(node.conn, &params, node.peer_request.as_ref())
            .await
            .map_err(BondError::from)
    }

    /// Start the oldest waiting pairing. A pairing the security layer refuses
    /// is reported and dropped, and the next one is tried.
    async fn promote_next<H: HostStack>(&mut self, host: &mut H) {
        while let Some(node) = self.queue.promote_next() {
            match self.authenticate(&node, host).await {
                Ok(()) => return,
                Err(e) => {
                    self.queue.advance(node.conn, PairingState::End);
                    self.notify(node.conn, BondStage::Complete, Err(e));
                }
            }
        }
    }

    /// Pair with the peer on `conn`.
    pub async fn pair<H: HostStack>(&mut self, conn: ConnHandle, host: &mut H) -> Result<(), BondError> {
        if self.links.get(conn).is_none() {
            return Err(BondError::NotConnected);
        }
        if self.queue.active() == Some(conn) {
            return Err(BondError::AlreadyInProgress);
        }
        self.start_pairing(conn, None, host).await
    }

    // Link events

    async fn on_link_established<H: HostStack>(&mut self, conn: ConnHandle, peer: Address, role: Role, host: &mut H) {
        let (slot, identity) = match self.store.find(&peer) {
            Ok((slot, identity)) => (Some(slot), identity),
            Err(_) => (None, peer),
        };
        info!("Link {:?} established, bonded slot: {:?}", conn, slot);
        if let Err(e) = self.links.add(LinkInfo {
            conn,
            peer,
            identity,
            role,
            slot,
        }) {
            error!("Too many links, ignoring {:?}: {:?}", conn, e);
            return;
        }

        if let Some(slot) = slot {
            self.restore_bond(conn, slot, role, host).await;
        }

        let bonded_central = role == Role::Central && slot.is_some();
        if self.params.values().pairing_mode != PairingMode::Initiate || bonded_central {
            return;
        }
        let result = match role {
            // Only the central can start pairing, ask it to
            Role::Peripheral => host
                .send_security_request(conn, self.params.auth_req())
                .await
                .map_err(BondError::from),
            Role::Central => self.start_pairing(conn, None, host).await,
        };
        if let Err(e) = result {
            self.notify(conn, BondStage::Complete, Err(e));
        }
    }

    /// Load what the host needs from the bond of a reconnecting peer.
    async fn restore_bond<H: HostStack>(&mut self, conn: ConnHandle, slot: u8, role: Role, host: &mut H) {
        let Some(bond) = self.store.bond(slot).cloned() else {
            return;
        };

        if let Err(e) = self.encrypt_with_bond(conn, slot, role, host).await {
            warn!("Can't start encryption on {:?}: {:?}", conn, e);
        }
        if let Some(signing) = bond.keys.peer_signing {
            if let Err(e) = host.load_signing_info(conn, &signing).await {
                warn!("Failed to load signing key: {:?}", e);
            }
        }
        if !bond.config.is_empty() {
            if let Err(e) = host.load_client_config(conn, &bond.config.pairs()).await {
                warn!("Failed to load client config: {:?}", e);
            }
        }
        if bond.record.flags.contains(BondFlags::SERVICE_CHANGED_PENDING) {
            if let Err(e) = host.indicate_service_changed(conn).await {
                warn!("Failed to indicate service changed: {:?}", e);
            }
        }
        if let Err(e) = self.store.touch(slot).await {
            error!("Failed to update LRU list: {:?}", e);
        }
    }

    /// Resume encryption with the stored key of `slot`.
    ///
    /// A legacy central uses the key the peripheral distributed. With secure
    /// connections both sides share the key stored as the local one.
    async fn encrypt_with_bond<H: HostStack>(
        &mut self,
        conn: ConnHandle,
        slot: u8,
        role: Role,
        host: &mut H,
    ) -> Result<(), BondError> {
        let bond = self.store.bond(slot).ok_or(BondError::NotFound)?;
        let secure = bond.record.flags.contains(BondFlags::SECURE_CONNECTIONS);
        let ltk = if role == Role::Central && !secure {
            bond.keys.peer_ltk
        } else {
            bond.keys.local_ltk
        };
        let ltk = ltk.filter(|k| k.has_valid_size()).ok_or(BondError::NotFound)?;
        host.start_encryption(conn, &ltk, role).await?;
        Ok(())
    }

    async fn on_link_terminated<H: HostStack>(&mut self, conn: ConnHandle, reason: u8, host: &mut H) {
        info!("Link {:?} terminated, reason 0x{:X}", conn, reason);
        self.links.remove(conn);
        if self.queue.remove(conn) {
            self.promote_next(host).await;
        }
        if !self.links.is_empty() {
            return;
        }

        match self.store.run_pending().await {
            Ok(true) => self.bonds_changed(host).await,
            Ok(false) => {}
            Err(e) => {
                error!("Deferred erasure failed: {:?}", e);
                self.bonds_changed(host).await;
            }
        }
        if self.store.local_identity().is_none() {
            self.ensure_local_identity().await;
            self.privacy.mark_stale();
            self.privacy.flush_if_idle(&self.store, host).await;
        }
    }

    // Security events

    async fn reject<H: HostStack>(&mut self, conn: ConnHandle, reason: PairingFailure, host: &mut H) {
        warn!("Rejecting pairing on {:?}: {:?}", conn, reason);
        if let Err(e) = host.terminate_authentication(conn, reason).await {
            error!("Failed to terminate pairing: {:?}", e);
        }
        self.notify(conn, BondStage::Complete, Err(BondError::AuthenticationFailed { reason }));
    }

    async fn on_pairing_request<H: HostStack>(&mut self, conn: ConnHandle, request: PairingRequest, host: &mut H) {
        self.notify(conn, BondStage::Started, Ok(()));
        let Some(peer) = self.links.get(conn).map(|l| l.peer) else {
            warn!("Pairing request on unknown link {:?}", conn);
            return;
        };

        let p = self.params.values();
        let reason = if p.pairing_mode == PairingMode::NoPairing {
            Some(PairingFailure::PairingNotSupported)
        } else if request.auth_req.bonding() && !peer.kind.is_public() && !request.key_distribution.peer_id_key() {
            // Without its identity the peer couldn't be recognized on the next connection
            Some(PairingFailure::AuthenticationRequirements)
        } else if p.secure_connections == SecureConnections::Only && !request.auth_req.secure_connections() {
            Some(PairingFailure::AuthenticationRequirements)
        } else {
            None
        };
        if let Some(reason) = reason {
            self.reject(conn, reason, host).await;
            return;
        }

        if let Err(e) = self.start_pairing(conn, Some(request), host).await {
            self.notify(conn, BondStage::Complete, Err(e));
        }
    }

    async fn on_security_request<H: HostStack>(&mut self, conn: ConnHandle, auth_req: AuthReq, host: &mut H) {
        let Some(link) = self.links.get(conn).copied() else {
            warn!("Security request on unknown link {:?}", conn);
            return;
        };

        let bonded = link.slot.and_then(|slot| self.store.bond(slot).map(|b| (slot, b.record.flags)));
        let result = match bonded {
            Some((slot, flags)) => {
                let mitm_missing = auth_req.mitm() && !flags.contains(BondFlags::AUTHENTICATED);
                let sc_missing = auth_req.secure_connections() && !flags.contains(BondFlags::SECURE_CONNECTIONS);
                if mitm_missing || sc_missing {
                    debug!("Bond of slot {} is too weak for the request, pairing again", slot);
                    self.start_pairing(conn, None, host).await
                } else {
                    self.encrypt_with_bond(conn, slot, link.role, host).await
                }
            }
            None if self.params.values().pairing_mode == PairingMode::NoPairing => {
                self.reject(conn, PairingFailure::PairingNotSupported, host).await;
                Ok(())
            }
            None => self.start_pairing(conn, None, host).await,
        };
        if let Err(e) = result {
            self.notify(conn, BondStage::Complete, Err(e));
        }
    }

    async fn on_passkey_needed<H: HostStack>(&mut self, conn: ConnHandle, request: PasskeyRequest, host: &mut H) {
        match self.callbacks {
            Some(cb) => cb.passcode_needed(conn, request),
            None => {
                warn!("No one to ask for a passkey");
                if let Err(e) = host
                    .terminate_authentication(conn, PairingFailure::PasskeyEntryFailed)
                    .await
                {
                    error!("Failed to terminate pairing: {:?}", e);
                }
            }
        }
    }

    /// Answer a [`BondCallbacks::passcode_needed`] request, or refuse it with a reason.
    pub async fn passcode_response<H: HostStack>(
        &mut self,
        conn: ConnHandle,
        response: Result<u32, PairingFailure>,
        host: &mut H,
    ) -> Result<(), BondError> {
        if self.links.get(conn).is_none() {
            return Err(BondError::NotConnected);
        }
        match response {
            Ok(passkey) => {
                if let Err(e) = host.passkey_update(conn, passkey.min(MAX_PASSKEY)).await {
                    let _ = host
                        .terminate_authentication(conn, PairingFailure::PasskeyEntryFailed)
                        .await;
                    return Err(e.into());
                }
                Ok(())
            }
            Err(reason) => host.terminate_authentication(conn, reason).await.map_err(BondError::from),
        }
    }

    async fn on_authentication_failed<H: HostStack>(&mut self, conn: ConnHandle, reason: PairingFailure, host: &mut H) {
        warn!("Pairing on {:?} failed: {:?}", conn, reason);
        let was_active = self.queue.advance(conn, PairingState::End);
        self.notify(conn, BondStage::Complete, Err(BondError::AuthenticationFailed { reason }));
        if was_active {
            self.promote_next(host).await;
        }
    }

    /// Identity to bond the peer under.
    fn bond_identity(&self, peer: Address, outcome: &AuthOutcome) -> Address {
        let irk_usable = outcome.keys.peer_irk.is_some_and(|irk| irk.is_usable());
        match outcome.identity {
            Some(identity) if irk_usable && identity.addr.is_zero() => self.store.placeholder_address(),
            Some(identity) if irk_usable => identity,
            _ => peer,
        }
    }

    async fn on_authenticated<H: HostStack>(&mut self, conn: ConnHandle, outcome: AuthOutcome, host: &mut H) {
        let Some(link) = self.links.get(conn).copied() else {
            warn!("Pairing complete on unknown link {:?}", conn);
            if self.queue.remove(conn) {
                self.promote_next(host).await;
            }
            return;
        };
        let authenticated = outcome.auth_req.mitm();

        if self.params.values().authenticated_pairing_only && !authenticated {
            let reason = PairingFailure::AuthenticationRequirements;
            self.queue.advance(conn, PairingState::End);
            self.notify(conn, BondStage::Complete, Err(BondError::AuthenticationFailed { reason }));
            if let Err(e) = host.disconnect(conn, DISCONNECT_AUTHENTICATION_FAILURE).await {
                error!("Failed to disconnect {:?}: {:?}", conn, e);
            }
            self.promote_next(host).await;
            return;
        }

        self.notify(conn, BondStage::Complete, Ok(()));
        if !outcome.auth_req.bonding() {
            debug!("Paired without bonding on {:?}", conn);
            self.queue.advance(conn, PairingState::End);
            self.promote_next(host).await;
            return;
        }

        let record = BondRecord {
            identity: self.bond_identity(link.peer, &outcome),
            flags: BondFlags::new()
                .with_authenticated(authenticated)
                .with_secure_connections(outcome.auth_req.secure_connections()),
        };
        let saved = self
            .store
            .create_or_update(record, outcome.keys, self.params.values().lru_replacement)
            .await;
        self.notify(conn, BondStage::BondSaved, saved.map(|_| ()));

        match saved {
            Ok(slot) => {
                // The slot may have been taken from an evicted bond
                self.links.unbind(slot);
                if let Some(link) = self.links.get_mut(conn) {
                    link.slot = Some(slot);
                    link.identity = record.identity;
                }
                self.bonds_changed(host).await;
                let next = match post_bond::start(host, conn).await {
                    Ok(next) => next,
                    Err(e) => {
                        self.notify(conn, BondStage::RpaOnlyRead, Err(BondError::Host(e)));
                        PairingState::End
                    }
                };
                self.queue.advance(conn, next);
            }
            Err(_) => {
                // A failed rebond may have dropped the old bond
                if let Some(slot) = self.links.get(conn).and_then(|l| l.slot) {
                    if self.store.bond(slot).is_none() {
                        self.links.unbind(slot);
                        self.bonds_changed(host).await;
                    }
                }
                self.queue.advance(conn, PairingState::End);
            }
        }
        self.promote_next(host).await;
    }

    async fn on_encryption_complete<H: HostStack>(
        &mut self,
        conn: ConnHandle,
        result: Result<(), PairingFailure>,
        host: &mut H,
    ) {
        let reason = match result {
            Ok(()) => {
                self.notify(conn, BondStage::Encrypted, Ok(()));
                return;
            }
            Err(reason) => reason,
        };
        self.notify(conn, BondStage::Encrypted, Err(BondError::AuthenticationFailed { reason }));

        let Some(link) = self.links.get(conn).copied() else {
            return;
        };
        if link.role != Role::Central || reason != PairingFailure::KeyRejected {
            return;
        }
        match self.params.values().bond_fail_action {
            BondFailAction::NoAction => {}
            BondFailAction::InitiatePairing => {
                if let Err(e) = self.start_pairing(conn, None, host).await {
                    self.notify(conn, BondStage::Complete, Err(e));
                }
            }
            BondFailAction::TerminateLink => {
                if let Err(e) = host.disconnect(conn, DISCONNECT_AUTHENTICATION_FAILURE).await {
                    error!("Failed to disconnect {:?}: {:?}", conn, e);
                }
            }
            BondFailAction::TerminateAndEraseAll => {
                if let Err(e) = host.disconnect(conn, DISCONNECT_AUTHENTICATION_FAILURE).await {
                    error!("Failed to disconnect {:?}: {:?}", conn, e);
                }
                if let Err(e) = self.erase_all(host).await {
                    error!("Failed to erase bonds: {:?}", e);
                }
            }
        }
    }

    // Post bond procedure

    async fn on_characteristic_read<H: HostStack>(
        &mut self,
        conn: ConnHandle,
        uuid: u16,
        result: Result<CharValue, ReadError>,
        host: &mut H,
    ) {
        let Some(state) = self.queue.state(conn) else {
            return;
        };
        let Some((slot, role)) = self.links.get(conn).and_then(|l| l.slot.map(|s| (s, l.role))) else {
            self.queue.advance(conn, PairingState::End);
            return;
        };

        match (state, uuid) {
            (PairingState::WaitDiscoverRpao, RPA_ONLY_UUID) => {
                let status = post_bond::apply_rpa_only(&mut self.store, slot, &result, &mut self.privacy, host).await;
                self.notify(conn, BondStage::RpaOnlyRead, status);
                let next = match post_bond::next(host, conn, role).await {
                    Ok(next) => next,
                    Err(e) => {
                        self.notify(conn, BondStage::CentralAddressResolutionRead, Err(BondError::Host(e)));
                        PairingState::End
                    }
                };
                self.queue.advance(conn, next);
            }
            (PairingState::WaitDiscoverCar, CENTRAL_ADDRESS_RESOLUTION_UUID) => {
                let status = post_bond::apply_central_address_resolution(&mut self.store, slot, &result).await;
                self.notify(conn, BondStage::CentralAddressResolutionRead, status);
                self.queue.advance(conn, PairingState::End);
            }
            _ => trace!("Read of 0x{:X} on {:?} isn't ours", uuid, conn),
        }
    }

    // Application requests

    fn defer_erase(&self) -> bool {
        !self.links.is_empty() && !self.params.values().erase_bond_in_connection
    }

    /// Erase the bond in `slot`. While links are up the erasure waits for the
    /// last one to go down, unless `EraseBondInConnection` is set.
    pub async fn erase<H: HostStack>(&mut self, slot: u8, host: &mut H) -> Result<(), BondError> {
        let defer = self.defer_erase();
        self.store.erase(slot, defer).await?;
        if !defer {
            self.links.unbind(slot);
            self.bonds_changed(host).await;
        }
        Ok(())
    }

    /// Erase every bond, see [`erase`](Self::erase).
    pub async fn erase_all<H: HostStack>(&mut self, host: &mut H) -> Result<(), BondError> {
        let defer = self.defer_erase();
        self.store.erase_all(defer).await?;
        if !defer {
            self.links.unbind_all();
            self.bonds_changed(host).await;
        }
        Ok(())
    }

    /// Set or clear the pending service changed indication, indicating right
    /// away on the targeted links when setting it.
    pub async fn service_changed_indication<H: HostStack>(
        &mut self,
        target: ServiceChangedTarget,
        set: bool,
        host: &mut H,
    ) -> Result<(), BondError> {
        match target {
            ServiceChangedTarget::All => {
                let slots: heapless::Vec<u8, BONDS> = self.store.iter().map(|(slot, _)| slot).collect();
                for slot in slots {
                    self.store
                        .update_flags(slot, BondFlags::SERVICE_CHANGED_PENDING, set)
                        .await?;
                }
                if set {
                    let conns: heapless::Vec<ConnHandle, LINKS> = self.links.iter().map(|l| l.conn).collect();
                    for conn in conns {
                        host.indicate_service_changed(conn).await?;
                    }
                }
            }
            ServiceChangedTarget::Conn(conn) => {
                let link = self.links.get(conn).copied().ok_or(BondError::NotConnected)?;
                if let Some(slot) = link.slot {
                    self.store
                        .update_flags(slot, BondFlags::SERVICE_CHANGED_PENDING, set)
                        .await?;
                }
                if set {
                    host.indicate_service_changed(conn).await?;
                }
            }
        }
        Ok(())
    }

    /// Write a policy parameter.
    pub async fn set_parameter<H: HostStack>(&mut self, param: Parameter, host: &mut H) -> Result<(), BondError> {
        match param {
            Parameter::EraseLocalInfo => {
                let defer = !self.links.is_empty();
                self.store.erase_local_identity(defer).await?;
                if !defer {
                    self.ensure_local_identity().await;
                    self.privacy.mark_stale();
                    self.privacy.flush_if_idle(&self.store, host).await;
                }
                Ok(())
            }
            Parameter::AutoSyncAllowList(true) if !self.params.values().auto_sync_allow_list => {
                self.params.set(param)?;
                self.privacy.sync_allow_list(&self.store, host).await;
                Ok(())
            }
            _ => self.params.set(param),
        }
    }

    /// Read a policy parameter.
    pub fn get_parameter(&self, id: ParamId) -> Result<Parameter, BondError> {
        match id {
            ParamId::BondCount => Ok(Parameter::BondCount(self.store.total_bonded() as u8)),
            _ => self.params.get(id),
        }
    }
}
