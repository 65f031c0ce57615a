pub mod common;

use blebond::error::{BondError, HostError};
use blebond::event::{AuthOutcome, BondEvent, BondStage, CharValue, PasskeyRequest, ReadError};
use blebond::host::{CENTRAL_ADDRESS_RESOLUTION_UUID, ConnHandle, DISCONNECT_AUTHENTICATION_FAILURE, RPA_ONLY_UUID};
use blebond::manager::{BondManager, ServiceChangedTarget};
use blebond::pairing::PairingState;
use blebond::params::{ParamId, Parameter};
use blebond::resolver::{generate_rpa, resolve_rpa};
use blebond::types::address::{Address, AddressType, BdAddr};
use blebond::types::flags::{AuthReq, BondFlags};
use blebond::types::keys::EccKeys;
use blebond::types::policy::{BondFailAction, PairingMode, PrivacyMode, Role, SecureConnections};
use blebond::types::smp::PairingFailure;
use embassy_futures::block_on;

use crate::common::*;

fn value(bytes: &[u8]) -> CharValue {
    CharValue::from_slice(bytes).unwrap()
}

async fn link_up(manager: &mut TestManager<'_>, host: &mut MockHost, conn: ConnHandle, peer: Address, role: Role) {
    manager
        .process(BondEvent::LinkEstablished { conn, peer, role }, host)
        .await;
}

async fn link_down(manager: &mut TestManager<'_>, host: &mut MockHost, conn: ConnHandle) {
    manager
        .process(BondEvent::LinkTerminated { conn, reason: 0x13 }, host)
        .await;
}

async fn complete(manager: &mut TestManager<'_>, host: &mut MockHost, conn: ConnHandle, result: AuthOutcome) {
    manager
        .process(
            BondEvent::AuthenticationComplete {
                conn,
                result: Ok(result),
            },
            host,
        )
        .await;
}

async fn read(
    manager: &mut TestManager<'_>,
    host: &mut MockHost,
    conn: ConnHandle,
    uuid: u16,
    result: Result<CharValue, ReadError>,
) {
    manager
        .process(BondEvent::CharacteristicRead { conn, uuid, result }, host)
        .await;
}

/// Connect as central, pair and bond with peer `n`, skipping the privacy reads. Returns the slot.
async fn bond_peer(manager: &mut TestManager<'_>, host: &mut MockHost, conn: ConnHandle, n: u8, mitm: bool) -> u8 {
    link_up(manager, host, conn, peer(n), Role::Central).await;
    manager.pair(conn, host).await.unwrap();
    complete(manager, host, conn, outcome(n, mitm, false)).await;
    read(manager, host, conn, RPA_ONLY_UUID, Err(ReadError::NotFound)).await;
    assert_eq!(manager.pairing_state(conn), None);
    manager.find_bond(&peer(n)).unwrap().0
}

#[test]
fn test_peripheral_bonding_procedure() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        link_up(&mut manager, &mut host, C1, peer(1), Role::Peripheral).await;
        let request = pairing_request(true, true, true);
        manager
            .process(BondEvent::PairingRequest { conn: C1, request }, &mut host)
            .await;
        assert!(host.calls.iter().any(|c| matches!(
            c,
            HostCall::Authenticate { conn: C1, peer_request: Some(r), .. } if *r == request
        )));

        complete(&mut manager, &mut host, C1, outcome(1, true, true)).await;
        let (slot, identity) = manager.find_bond(&peer(1)).unwrap();
        assert_eq!(identity, peer(1));
        assert_eq!(manager.link(C1).unwrap().slot, Some(slot));
        let flags = manager.store().flags(slot).unwrap();
        assert!(flags.contains(BondFlags::AUTHENTICATED | BondFlags::SECURE_CONNECTIONS));
        assert_eq!(manager.pairing_state(C1), Some(PairingState::WaitDiscoverRpao));
        assert!(host.has_call(&HostCall::ReadCharacteristic {
            conn: C1,
            uuid: RPA_ONLY_UUID
        }));

        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Ok(value(&[0]))).await;
        assert!(manager.store().flags(slot).unwrap().contains(BondFlags::RPA_ONLY));
        assert_eq!(manager.pairing_state(C1), Some(PairingState::WaitDiscoverCar));
        assert!(host.has_call(&HostCall::ReadCharacteristic {
            conn: C1,
            uuid: CENTRAL_ADDRESS_RESOLUTION_UUID
        }));

        read(&mut manager, &mut host, C1, CENTRAL_ADDRESS_RESOLUTION_UUID, Ok(value(&[1]))).await;
        assert!(
            manager
                .store()
                .flags(slot)
                .unwrap()
                .contains(BondFlags::CENTRAL_ADDRESS_RESOLUTION)
        );
        assert_eq!(manager.pairing_state(C1), None);

        assert_eq!(
            recorder.stages(C1),
            [
                (BondStage::Started, Ok(())),
                (BondStage::Complete, Ok(())),
                (BondStage::BondSaved, Ok(())),
                (BondStage::RpaOnlyRead, Ok(())),
                (BondStage::CentralAddressResolutionRead, Ok(())),
            ]
        );
    });
}

#[test]
fn test_rpa_only_read_with_bad_length() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, false)).await;
        let slot = manager.find_bond(&peer(1)).unwrap().0;

        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Ok(value(&[0, 0]))).await;
        assert_eq!(
            recorder.stages(C1).last(),
            Some(&(BondStage::RpaOnlyRead, Err(BondError::InvalidParameter)))
        );
        assert!(!manager.store().flags(slot).unwrap().contains(BondFlags::RPA_ONLY));
        // A central doesn't read the central address resolution characteristic
        assert_eq!(manager.pairing_state(C1), None);
    });
}

#[test]
fn test_rpa_only_read_not_issued() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost {
            failing_read: Some(RPA_ONLY_UUID),
            ..Default::default()
        };
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        link_up(&mut manager, &mut host, C1, peer(1), Role::Peripheral).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, false)).await;

        assert_eq!(
            recorder.stages(C1),
            [
                (BondStage::Started, Ok(())),
                (BondStage::Complete, Ok(())),
                (BondStage::BondSaved, Ok(())),
                (BondStage::RpaOnlyRead, Err(BondError::Host(HostError::Busy))),
            ]
        );
        assert_eq!(manager.pairing_state(C1), None);
        // The bond itself stays
        assert!(manager.find_bond(&peer(1)).is_ok());
    });
}

#[test]
fn test_central_address_resolution_read_not_issued() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost {
            failing_read: Some(CENTRAL_ADDRESS_RESOLUTION_UUID),
            ..Default::default()
        };
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        link_up(&mut manager, &mut host, C1, peer(1), Role::Peripheral).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, false)).await;
        assert_eq!(manager.pairing_state(C1), Some(PairingState::WaitDiscoverRpao));

        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Ok(value(&[1]))).await;
        assert_eq!(
            recorder.stages(C1)[3..],
            [
                (BondStage::RpaOnlyRead, Ok(())),
                (
                    BondStage::CentralAddressResolutionRead,
                    Err(BondError::Host(HostError::Busy))
                ),
            ]
        );
        assert_eq!(manager.pairing_state(C1), None);
    });
}

#[test]
fn test_missing_rpa_only_sets_device_privacy_mode() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, false)).await;
        host.take_calls();

        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Err(ReadError::NotFound)).await;
        assert_eq!(
            host.take_calls(),
            [HostCall::SetPrivacyMode {
                peer: peer(1),
                mode: PrivacyMode::Device,
            }]
        );
        assert!(!manager.privacy().is_stale());
    });
}

#[test]
fn test_missing_rpa_only_while_busy_marks_stale() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, false)).await;
        host.take_calls();

        host.idle = false;
        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Err(ReadError::NotFound)).await;
        assert!(host.calls.is_empty());
        assert!(manager.privacy().is_stale());

        host.idle = true;
        manager.process(BondEvent::RadioIdle, &mut host).await;
        assert!(!manager.privacy().is_stale());
        assert_eq!(host.calls.first(), Some(&HostCall::ClearResolvingList));
    });
}

#[test]
fn test_bonded_central_reconnects() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        let slot = bond_peer(&mut manager, &mut host, C1, 1, false).await;
        manager
            .process(
                BondEvent::ClientConfigWritten {
                    conn: C1,
                    handle: 0x10,
                    value: 2,
                },
                &mut host,
            )
            .await;
        link_down(&mut manager, &mut host, C1).await;
        manager
            .service_changed_indication(ServiceChangedTarget::All, true, &mut host)
            .await
            .unwrap();
        assert!(
            manager
                .store()
                .flags(slot)
                .unwrap()
                .contains(BondFlags::SERVICE_CHANGED_PENDING)
        );
        host.take_calls();

        // The peer comes back with a fresh private address
        let rpa = Address::random(generate_rpa(&irk(1), &mut TestRng(5)).0);
        link_up(&mut manager, &mut host, C2, rpa, Role::Central).await;
        let link = *manager.link(C2).unwrap();
        assert_eq!(link.slot, Some(slot));
        assert_eq!(link.identity, peer(1));

        let calls = host.take_calls();
        assert!(calls.contains(&HostCall::StartEncryption {
            conn: C2,
            ltk: keys(1).peer_ltk.unwrap(),
            role: Role::Central,
        }));
        assert!(calls.contains(&HostCall::LoadClientConfig {
            conn: C2,
            table: vec![(0x10, 2)],
        }));
        assert!(calls.contains(&HostCall::IndicateServiceChanged { conn: C2 }));
        assert!(!calls.iter().any(|c| matches!(c, HostCall::Authenticate { .. })));

        manager
            .process(BondEvent::ServiceChangedConfirmed { conn: C2 }, &mut host)
            .await;
        assert!(
            !manager
                .store()
                .flags(slot)
                .unwrap()
                .contains(BondFlags::SERVICE_CHANGED_PENDING)
        );

        manager
            .process(BondEvent::EncryptionComplete { conn: C2, result: Ok(()) }, &mut host)
            .await;
        assert_eq!(recorder.stages(C2), [(BondStage::Encrypted, Ok(()))]);
    });
}

#[test]
fn test_pairing_request_rejections() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);

        // Bonding from a random address without identity distribution
        let random_peer = Address::random([1, 2, 3, 4, 5, 0xC6]);
        link_up(&mut manager, &mut host, C1, random_peer, Role::Peripheral).await;
        manager
            .process(
                BondEvent::PairingRequest {
                    conn: C1,
                    request: pairing_request(true, true, false),
                },
                &mut host,
            )
            .await;
        assert!(host.has_call(&HostCall::TerminateAuthentication {
            conn: C1,
            reason: PairingFailure::AuthenticationRequirements,
        }));

        // Secure connections only
        manager
            .set_parameter(Parameter::SecureConnections(SecureConnections::Only), &mut host)
            .await
            .unwrap();
        link_up(&mut manager, &mut host, C2, peer(2), Role::Peripheral).await;
        manager
            .process(
                BondEvent::PairingRequest {
                    conn: C2,
                    request: pairing_request(true, false, true),
                },
                &mut host,
            )
            .await;
        assert!(host.has_call(&HostCall::TerminateAuthentication {
            conn: C2,
            reason: PairingFailure::AuthenticationRequirements,
        }));

        // Pairing disabled
        manager
            .set_parameter(Parameter::PairingMode(PairingMode::NoPairing), &mut host)
            .await
            .unwrap();
        link_up(&mut manager, &mut host, C3, peer(3), Role::Peripheral).await;
        manager
            .process(
                BondEvent::PairingRequest {
                    conn: C3,
                    request: pairing_request(true, true, true),
                },
                &mut host,
            )
            .await;
        assert!(host.has_call(&HostCall::TerminateAuthentication {
            conn: C3,
            reason: PairingFailure::PairingNotSupported,
        }));
        assert_eq!(
            recorder.stages(C3),
            [
                (BondStage::Started, Ok(())),
                (
                    BondStage::Complete,
                    Err(BondError::AuthenticationFailed {
                        reason: PairingFailure::PairingNotSupported
                    })
                ),
            ]
        );

        assert!(host.authenticated().is_empty());
        assert_eq!(manager.total_bonded(), 0);
    });
}

#[test]
fn test_passkey_handling() {
    block_on(async {
        let mut host = MockHost::default();
        let recorder = Recorder::default();
        let mut manager = new_manager(&manager_config()).await;
        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();

        // Nobody to ask
        manager
            .process(
                BondEvent::PasskeyNeeded {
                    conn: C1,
                    request: PasskeyRequest::Input,
                },
                &mut host,
            )
            .await;
        assert!(host.has_call(&HostCall::TerminateAuthentication {
            conn: C1,
            reason: PairingFailure::PasskeyEntryFailed,
        }));

        manager.register_callbacks(&recorder);
        manager
            .process(
                BondEvent::PasskeyNeeded {
                    conn: C1,
                    request: PasskeyRequest::NumericComparison(123456),
                },
                &mut host,
            )
            .await;
        assert_eq!(
            *recorder.passkeys.borrow(),
            [(C1, PasskeyRequest::NumericComparison(123456))]
        );

        manager.passcode_response(C1, Ok(1_234_567), &mut host).await.unwrap();
        assert!(host.has_call(&HostCall::PasskeyUpdate {
            conn: C1,
            passkey: 999_999
        }));

        manager
            .passcode_response(C1, Err(PairingFailure::NumericComparisonFailed), &mut host)
            .await
            .unwrap();
        assert!(host.has_call(&HostCall::TerminateAuthentication {
            conn: C1,
            reason: PairingFailure::NumericComparisonFailed,
        }));

        assert_eq!(
            manager.passcode_response(C2, Ok(1), &mut host).await,
            Err(BondError::NotConnected)
        );
    });
}

#[test]
fn test_unauthenticated_pairing_rejected_when_required() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);
        manager
            .set_parameter(Parameter::MitmProtection(true), &mut host)
            .await
            .unwrap();
        manager
            .set_parameter(Parameter::AuthenticatedPairingOnly(true), &mut host)
            .await
            .unwrap();

        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(1, false, true)).await;

        assert_eq!(manager.total_bonded(), 0);
        assert!(host.has_call(&HostCall::Disconnect {
            conn: C1,
            reason: DISCONNECT_AUTHENTICATION_FAILURE,
        }));
        assert_eq!(
            recorder.stages(C1).last(),
            Some(&(
                BondStage::Complete,
                Err(BondError::AuthenticationFailed {
                    reason: PairingFailure::AuthenticationRequirements
                })
            ))
        );
        assert_eq!(manager.pairing_state(C1), None);
    });
}

#[test]
fn test_erase_deferred_until_links_are_down() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        let slot = bond_peer(&mut manager, &mut host, C1, 1, true).await;

        manager.erase(slot, &mut host).await.unwrap();
        assert_eq!(manager.total_bonded(), 1);

        link_down(&mut manager, &mut host, C1).await;
        assert_eq!(manager.total_bonded(), 0);
        assert_eq!(manager.find_bond(&peer(1)), Err(BondError::NotFound));

        // Immediate erasure when allowed
        manager
            .set_parameter(Parameter::EraseBondInConnection(true), &mut host)
            .await
            .unwrap();
        let slot = bond_peer(&mut manager, &mut host, C2, 2, true).await;
        manager.erase(slot, &mut host).await.unwrap();
        assert_eq!(manager.total_bonded(), 0);
        assert_eq!(manager.link(C2).unwrap().slot, None);
    });
}

#[test]
fn test_erase_all_twice() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        bond_peer(&mut manager, &mut host, C1, 1, true).await;
        bond_peer(&mut manager, &mut host, C2, 2, true).await;
        link_down(&mut manager, &mut host, C1).await;
        link_down(&mut manager, &mut host, C2).await;

        manager.erase_all(&mut host).await.unwrap();
        assert_eq!(manager.total_bonded(), 0);
        manager.erase_all(&mut host).await.unwrap();
        assert_eq!(manager.total_bonded(), 0);
    });
}

#[test]
fn test_full_store_evicts_oldest_bond() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        for (conn, n) in [(C1, 1), (C2, 2), (C3, 3)] {
            bond_peer(&mut manager, &mut host, conn, n, true).await;
            link_down(&mut manager, &mut host, conn).await;
        }
        let slot = bond_peer(&mut manager, &mut host, C4, 4, true).await;
        assert_eq!(manager.total_bonded(), 3);
        assert_eq!(manager.find_bond(&peer(1)), Err(BondError::NotFound));
        assert_eq!(manager.find_bond(&peer(4)), Ok((slot, peer(4))));

        manager
            .set_parameter(Parameter::LruReplacement(false), &mut host)
            .await
            .unwrap();
        manager.register_callbacks(&recorder);
        link_up(&mut manager, &mut host, C1, peer(5), Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();
        complete(&mut manager, &mut host, C1, outcome(5, true, false)).await;
        assert_eq!(
            recorder.stages(C1).last(),
            Some(&(BondStage::BondSaved, Err(BondError::StoreFull)))
        );
        assert_eq!(manager.pairing_state(C1), None);
    });
}

#[test]
fn test_zero_identity_gets_placeholder() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        let rpa = Address::random(generate_rpa(&irk(1), &mut TestRng(3)).0);
        link_up(&mut manager, &mut host, C1, rpa, Role::Central).await;
        manager.pair(C1, &mut host).await.unwrap();

        let mut result = outcome(1, true, true);
        result.identity = Some(Address::public([0; 6]));
        complete(&mut manager, &mut host, C1, result).await;

        let placeholder = Address::new(AddressType::RandomIdentity, BdAddr([1, 0, 0, 0, 0, 0xC0]));
        let (slot, identity) = manager.find_bond(&rpa).unwrap();
        assert_eq!(identity, placeholder);
        assert_eq!(manager.find_bond(&placeholder).unwrap().0, slot);
    });
}

#[test]
fn test_bond_fail_actions() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        bond_peer(&mut manager, &mut host, C1, 1, true).await;
        link_down(&mut manager, &mut host, C1).await;
        link_up(&mut manager, &mut host, C2, peer(1), Role::Central).await;
        host.take_calls();

        let rejected = BondEvent::EncryptionComplete {
            conn: C2,
            result: Err(PairingFailure::KeyRejected),
        };
        manager.process(rejected.clone(), &mut host).await;
        assert_eq!(host.authenticated(), [C2]);

        manager
            .set_parameter(Parameter::BondFailAction(BondFailAction::TerminateLink), &mut host)
            .await
            .unwrap();
        manager.process(rejected.clone(), &mut host).await;
        assert!(host.has_call(&HostCall::Disconnect {
            conn: C2,
            reason: DISCONNECT_AUTHENTICATION_FAILURE,
        }));

        manager
            .set_parameter(Parameter::BondFailAction(BondFailAction::TerminateAndEraseAll), &mut host)
            .await
            .unwrap();
        manager.process(rejected, &mut host).await;
        // Still connected, the erasure waits for the link to go down
        assert_eq!(manager.total_bonded(), 1);
        link_down(&mut manager, &mut host, C2).await;
        assert_eq!(manager.total_bonded(), 0);
    });
}

#[test]
fn test_security_request_from_bonded_peer() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        bond_peer(&mut manager, &mut host, C1, 1, false).await;
        host.take_calls();

        let plain = AuthReq::new().with_bonding(true);
        manager
            .process(
                BondEvent::SecurityRequest {
                    conn: C1,
                    auth_req: plain,
                },
                &mut host,
            )
            .await;
        assert_eq!(
            host.take_calls(),
            [HostCall::StartEncryption {
                conn: C1,
                ltk: keys(1).peer_ltk.unwrap(),
                role: Role::Central,
            }]
        );

        // The bond isn't authenticated, asking for MITM means pairing again
        manager
            .process(
                BondEvent::SecurityRequest {
                    conn: C1,
                    auth_req: plain.with_mitm(true),
                },
                &mut host,
            )
            .await;
        assert_eq!(host.authenticated(), [C1]);
    });
}

#[test]
fn test_initiate_mode_pairs_on_connection() {
    block_on(async {
        let mut config = manager_config();
        config.parameters.pairing_mode = PairingMode::Initiate;
        let mut host = MockHost::default();
        let mut manager = new_manager(&config).await;

        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        assert_eq!(host.authenticated(), [C1]);
        complete(&mut manager, &mut host, C1, outcome(1, true, false)).await;
        read(&mut manager, &mut host, C1, RPA_ONLY_UUID, Err(ReadError::NotFound)).await;
        link_down(&mut manager, &mut host, C1).await;
        host.take_calls();

        // A bonded central encrypts instead
        link_up(&mut manager, &mut host, C2, peer(1), Role::Central).await;
        assert!(host.authenticated().is_empty());
    });
}

#[test]
fn test_initiate_mode_peripheral_sends_security_request() {
    block_on(async {
        let mut config = manager_config();
        config.parameters.pairing_mode = PairingMode::Initiate;
        let mut host = MockHost::default();
        let mut manager = new_manager(&config).await;

        link_up(&mut manager, &mut host, C1, peer(1), Role::Peripheral).await;
        assert_eq!(host.take_calls(), [HostCall::SendSecurityRequest { conn: C1 }]);
        assert_eq!(manager.pairing_state(C1), None);
    });
}

#[test]
fn test_parameters() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        assert_eq!(manager.get_parameter(ParamId::BondCount), Ok(Parameter::BondCount(0)));
        bond_peer(&mut manager, &mut host, C1, 1, true).await;
        assert_eq!(manager.get_parameter(ParamId::BondCount), Ok(Parameter::BondCount(1)));

        assert_eq!(
            manager.set_parameter(Parameter::KeySize(3), &mut host).await,
            Err(BondError::InvalidParameter)
        );
        assert_eq!(
            manager.set_parameter(Parameter::BondCount(2), &mut host).await,
            Err(BondError::InvalidParameter)
        );
        assert_eq!(manager.get_parameter(ParamId::KeySize), Ok(Parameter::KeySize(16)));
    });
}

#[test]
fn test_enabling_allow_list_sync_mirrors_bonds() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        bond_peer(&mut manager, &mut host, C1, 1, true).await;
        host.take_calls();

        manager
            .set_parameter(Parameter::AutoSyncAllowList(true), &mut host)
            .await
            .unwrap();
        assert_eq!(
            host.take_calls(),
            [
                HostCall::ClearAllowList,
                HostCall::AddAllowListEntry { peer: peer(1) }
            ]
        );

        // Already enabled, nothing to do
        manager
            .set_parameter(Parameter::AutoSyncAllowList(true), &mut host)
            .await
            .unwrap();
        assert!(host.calls.is_empty());
    });
}

#[test]
fn test_erase_local_info_regenerates_identity() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        let first = *manager.store().local_identity().unwrap();

        manager
            .set_parameter(Parameter::EraseLocalInfo, &mut host)
            .await
            .unwrap();
        let second = *manager.store().local_identity().unwrap();
        assert_ne!(first.irk, second.irk);

        // Deferred while connected
        link_up(&mut manager, &mut host, C1, peer(1), Role::Central).await;
        manager
            .set_parameter(Parameter::EraseLocalInfo, &mut host)
            .await
            .unwrap();
        assert_eq!(manager.store().local_identity(), Some(&second));
        link_down(&mut manager, &mut host, C1).await;
        let third = *manager.store().local_identity().unwrap();
        assert_ne!(second.irk, third.irk);
    });
}

#[test]
fn test_local_identity_survives_restart() {
    block_on(async {
        let manager = new_manager(&manager_config()).await;
        let identity = *manager.store().local_identity().unwrap();
        let flash = manager.release();

        let manager: TestManager = BondManager::new(flash, &manager_config(), TestRng(77)).await;
        assert_eq!(manager.store().local_identity(), Some(&identity));
    });
}

#[test]
fn test_private_address_resolves_with_local_irk() {
    block_on(async {
        let mut manager = new_manager(&manager_config()).await;
        let irk = manager.store().local_identity().unwrap().irk;
        let addr = manager.generate_private_address().unwrap();
        assert!(resolve_rpa(&irk, &addr));
    });
}

#[test]
fn test_service_changed_needs_live_link() {
    block_on(async {
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        assert_eq!(
            manager
                .service_changed_indication(ServiceChangedTarget::Conn(C1), true, &mut host)
                .await,
            Err(BondError::NotConnected)
        );

        let slot = bond_peer(&mut manager, &mut host, C1, 1, true).await;
        manager
            .service_changed_indication(ServiceChangedTarget::Conn(C1), true, &mut host)
            .await
            .unwrap();
        assert!(host.has_call(&HostCall::IndicateServiceChanged { conn: C1 }));
        assert!(
            manager
                .store()
                .flags(slot)
                .unwrap()
                .contains(BondFlags::SERVICE_CHANGED_PENDING)
        );
    });
}

#[test]
fn test_ecc_keys_kept_for_reuse() {
    block_on(async {
        let recorder = Recorder::default();
        let mut host = MockHost::default();
        let mut manager = new_manager(&manager_config()).await;
        manager.register_callbacks(&recorder);
        manager
            .set_parameter(Parameter::EccKeyRegeneration(2), &mut host)
            .await
            .unwrap();

        let keys = EccKeys {
            private_key: [1; 32],
            public_x: [2; 32],
            public_y: [3; 32],
        };
        manager.process(BondEvent::EccKeysGenerated(keys), &mut host).await;
        assert_eq!(*recorder.ecc_keys.borrow(), 1);
        assert_eq!(manager.get_parameter(ParamId::EccKeys), Ok(Parameter::EccKeys(Some(keys))));
    });
}
