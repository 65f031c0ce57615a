//! Privacy characteristic reads done once a bond is saved
//!
//! First the peer's "Resolvable Private Address Only" characteristic is read,
//! then a peripheral also reads the central's "Central Address Resolution"
//! characteristic. A missing characteristic isn't an error, the flag of the
//! bond falls back to cleared.

use blebond_types::flags::BondFlags;
use blebond_types::policy::{PrivacyMode, Role};
use embedded_storage_async::nor_flash::NorFlash as AsyncNorFlash;

use crate::error::{BondError, HostError};
use crate::event::{CharValue, ReadError};
use crate::host::{CENTRAL_ADDRESS_RESOLUTION_UUID, ConnHandle, GattClient, PrivacyController, RPA_ONLY_UUID};
use crate::pairing::PairingState;
use crate::privacy::PrivacySync;
use crate::store::BondStore;

/// Value of the RPA only characteristic meaning "only private addresses will be used"
const RPA_ONLY_VALUE: u8 = 0;

/// Issue the first read. Returns the state the pairing node moves to.
pub async fn start(host: &mut impl GattClient, conn: ConnHandle) -> Result<PairingState, HostError> {
    host.read_characteristic_by_uuid(conn, RPA_ONLY_UUID)
        .await
        .inspect_err(|e| warn!("Failed to read RPA only characteristic on {:?}: {:?}", conn, e))?;
    Ok(PairingState::WaitDiscoverRpao)
}

/// Issue the read that follows the RPA only read, if `role` needs one.
pub async fn next(host: &mut impl GattClient, conn: ConnHandle, role: Role) -> Result<PairingState, HostError> {
    if role != Role::Peripheral {
        return Ok(PairingState::End);
    }
    host.read_characteristic_by_uuid(conn, CENTRAL_ADDRESS_RESOLUTION_UUID)
        .await
        .inspect_err(|e| warn!("Failed to read central address resolution on {:?}: {:?}", conn, e))?;
    Ok(PairingState::WaitDiscoverCar)
}

fn single_byte(value: &CharValue) -> Result<u8, BondError> {
    match value.as_slice() {
        [byte] => Ok(*byte),
        _ => Err(BondError::InvalidParameter),
    }
}

/// Apply the RPA only read result to the bond in `slot`.
///
/// When the characteristic is missing and the peer has an IRK, the privacy
/// mode of its resolving list entry goes back to device mode right away if
/// the radio is idle, otherwise the resolving list is marked stale.
pub async fn apply_rpa_only<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
    store: &mut BondStore<F, BONDS, CCC>,
    slot: u8,
    result: &Result<CharValue, ReadError>,
    privacy: &mut PrivacySync,
    host: &mut impl PrivacyController,
) -> Result<(), BondError> {
    match result {
        Ok(value) => {
            let rpa_only = single_byte(value)? == RPA_ONLY_VALUE;
            let before = store.flags(slot)?;
            store.update_flags(slot, BondFlags::RPA_ONLY, rpa_only).await?;
            if before.contains(BondFlags::RPA_ONLY) != rpa_only && store.peer_irk(slot).is_some() {
                privacy.mark_stale();
            }
            Ok(())
        }
        Err(ReadError::NotFound) => {
            store.update_flags(slot, BondFlags::RPA_ONLY, false).await?;
            let Some(identity) = store.bond(slot).map(|b| b.record.identity) else {
                return Ok(());
            };
            if store.peer_irk(slot).is_none() {
                return Ok(());
            }
            if host.is_radio_idle() {
                if let Err(e) = host.set_privacy_mode(&identity, PrivacyMode::Device).await {
                    warn!("Failed to set privacy mode: {:?}", e);
                    privacy.mark_stale();
                }
            } else {
                privacy.mark_stale();
            }
            Ok(())
        }
        Err(ReadError::Att(code)) => {
            warn!("RPA only read failed with ATT error 0x{:X}", code);
            Err(BondError::Host(HostError::Failed(*code)))
        }
    }
}

/// Apply the central address resolution read result to the bond in `slot`.
pub async fn apply_central_address_resolution<F: AsyncNorFlash, const BONDS: usize, const CCC: usize>(
    store: &mut BondStore<F, BONDS, CCC>,
    slot: u8,
    result: &Result<CharValue, ReadError>,
) -> Result<(), BondError> {
    match result {
        Ok(value) => {
            let supported = single_byte(value)? != 0;
            store
                .update_flags(slot, BondFlags::CENTRAL_ADDRESS_RESOLUTION, supported)
                .await
        }
        Err(e) => {
            debug!("Central address resolution unavailable: {:?}", e);
            store
                .update_flags(slot, BondFlags::CENTRAL_ADDRESS_RESOLUTION, false)
                .await
        }
    }
}
