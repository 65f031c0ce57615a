#![allow(dead_code)]

use core::cell::RefCell;

use blebond::config::{BondManagerConfig, StorageConfig};
use blebond::error::{BondError, HostError};
use blebond::event::{AuthOutcome, BondCallbacks, BondStage, PasskeyRequest};
use blebond::host::{
    AuthParams, ConnHandle, GattClient, GattServer, LinkControl, PairingRequest, PrivacyController, SecurityLayer,
};
use blebond::manager::BondManager;
use blebond::storage::mem_flash::{MEM_FLASH_SECTOR_SIZE, MemFlash};
use blebond::store::{BondRecord, BondStore};
use blebond::types::address::Address;
use blebond::types::flags::{AuthReq, BondFlags, KeyDistribution};
use blebond::types::keys::{Irk, KeyMaterial, LongTermKeyInfo, SigningInfo};
use blebond::types::policy::{IoCapability, PrivacyMode, Role};
use blebond::types::smp::PairingFailure;
use rand_core::{RngCore, impls};

// Init logger for tests
#[ctor::ctor]
pub fn init_log() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

pub const NUM_SECTORS: u8 = 4;
pub const FLASH_SIZE: usize = NUM_SECTORS as usize * MEM_FLASH_SECTOR_SIZE;

pub type TestFlash = MemFlash<FLASH_SIZE>;
pub type TestStore<const BONDS: usize> = BondStore<TestFlash, BONDS, 4>;
pub type TestManager<'a> = BondManager<'a, TestFlash, TestRng, 3, 4, 4>;

pub const C1: ConnHandle = ConnHandle(1);
pub const C2: ConnHandle = ConnHandle(2);
pub const C3: ConnHandle = ConnHandle(3);
pub const C4: ConnHandle = ConnHandle(4);

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        num_sectors: NUM_SECTORS,
        ..Default::default()
    }
}

pub fn manager_config() -> BondManagerConfig {
    BondManagerConfig {
        storage_config: storage_config(),
        ..Default::default()
    }
}

pub async fn open_store<const BONDS: usize>(flash: TestFlash) -> TestStore<BONDS> {
    BondStore::new(flash, &storage_config()).await
}

pub async fn new_manager<'a>(config: &BondManagerConfig) -> TestManager<'a> {
    BondManager::new(TestFlash::new(), config, TestRng(1)).await
}

/// Public address of test peer `n`
pub fn peer(n: u8) -> Address {
    Address::public([n, 0x11, 0x22, 0x33, 0x44, 0x55])
}

pub fn irk(n: u8) -> Irk {
    Irk([n.wrapping_add(0x40); 16])
}

pub fn ltk(n: u8) -> LongTermKeyInfo {
    LongTermKeyInfo::new([n; 16], n as u16, [n; 8], 16)
}

pub fn keys(n: u8) -> KeyMaterial {
    KeyMaterial {
        local_ltk: Some(ltk(n)),
        peer_ltk: Some(ltk(n.wrapping_add(0x80))),
        peer_irk: Some(irk(n)),
        peer_signing: None,
    }
}

pub fn keys_with_signing(n: u8, sign_counter: u32) -> KeyMaterial {
    KeyMaterial {
        peer_signing: Some(SigningInfo {
            csrk: blebond::types::keys::Csrk([n; 16]),
            sign_counter,
        }),
        ..keys(n)
    }
}

pub fn record(identity: Address) -> BondRecord {
    BondRecord {
        identity,
        flags: BondFlags::new(),
    }
}

/// Bonded pairing outcome, the peer distributing its identity
pub fn outcome(n: u8, mitm: bool, sc: bool) -> AuthOutcome {
    AuthOutcome {
        auth_req: AuthReq::new()
            .with_bonding(true)
            .with_mitm(mitm)
            .with_secure_connections(sc),
        keys: keys(n),
        identity: Some(peer(n)),
    }
}

pub fn pairing_request(bonding: bool, sc: bool, distributes_id: bool) -> PairingRequest {
    PairingRequest {
        io_capability: IoCapability::NoInputNoOutput,
        oob_data_present: false,
        auth_req: AuthReq::new().with_bonding(bonding).with_secure_connections(sc),
        max_key_size: 16,
        key_distribution: KeyDistribution::new().with_peer_enc_key(true).with_peer_id_key(distributes_id),
    }
}

/// Deterministic generator, good enough for keys and private addresses in tests
pub struct TestRng(pub u64);

impl RngCore for TestRng {
    fn next_u32(&mut self) -> u32 {
        self.next_u64() as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 16
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        impls::fill_bytes_via_next(self, dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostCall {
    Authenticate {
        conn: ConnHandle,
        params: AuthParams,
        peer_request: Option<PairingRequest>,
    },
    TerminateAuthentication {
        conn: ConnHandle,
        reason: PairingFailure,
    },
    StartEncryption {
        conn: ConnHandle,
        ltk: LongTermKeyInfo,
        role: Role,
    },
    SendSecurityRequest {
        conn: ConnHandle,
    },
    PasskeyUpdate {
        conn: ConnHandle,
        passkey: u32,
    },
    LoadSigningInfo {
        conn: ConnHandle,
        signing: SigningInfo,
    },
    ReadCharacteristic {
        conn: ConnHandle,
        uuid: u16,
    },
    LoadClientConfig {
        conn: ConnHandle,
        table: Vec<(u16, u16)>,
    },
    IndicateServiceChanged {
        conn: ConnHandle,
    },
    ClearResolvingList,
    AddLocalIdentity {
        irk: Irk,
    },
    AddResolvingListEntry {
        peer: Address,
        peer_irk: Irk,
        local_irk: Irk,
    },
    SetPrivacyMode {
        peer: Address,
        mode: PrivacyMode,
    },
    ClearAllowList,
    AddAllowListEntry {
        peer: Address,
    },
    Disconnect {
        conn: ConnHandle,
        reason: u8,
    },
}

/// Host stack that records every request
pub struct MockHost {
    pub calls: Vec<HostCall>,
    pub idle: bool,
    pub fail_authenticate: bool,
    /// Resolving list entry the controller refuses
    pub failing_entry: Option<Address>,
    pub fail_local_identity: bool,
    /// Characteristic the GATT client can't read
    pub failing_read: Option<u16>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            idle: true,
            fail_authenticate: false,
            failing_entry: None,
            fail_local_identity: false,
            failing_read: None,
        }
    }
}

impl MockHost {
    pub fn take_calls(&mut self) -> Vec<HostCall> {
        core::mem::take(&mut self.calls)
    }

    /// Connections `authenticate` was called for, in call order
    pub fn authenticated(&self) -> Vec<ConnHandle> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                HostCall::Authenticate { conn, .. } => Some(*conn),
                _ => None,
            })
            .collect()
    }

    pub fn has_call(&self, call: &HostCall) -> bool {
        self.calls.contains(call)
    }
}

impl SecurityLayer for MockHost {
    async fn authenticate(
        &mut self,
        conn: ConnHandle,
        params: &AuthParams,
        peer_request: Option<&PairingRequest>,
    ) -> Result<(), HostError> {
        if self.fail_authenticate {
            return Err(HostError::Busy);
        }
        self.calls.push(HostCall::Authenticate {
            conn,
            params: *params,
            peer_request: peer_request.copied(),
        });
        Ok(())
    }

    async fn terminate_authentication(&mut self, conn: ConnHandle, reason: PairingFailure) -> Result<(), HostError> {
        self.calls.push(HostCall::TerminateAuthentication { conn, reason });
        Ok(())
    }

    async fn start_encryption(&mut self, conn: ConnHandle, ltk: &LongTermKeyInfo, role: Role) -> Result<(), HostError> {
        self.calls.push(HostCall::StartEncryption { conn, ltk: *ltk, role });
        Ok(())
    }

    async fn send_security_request(&mut self, conn: ConnHandle, _auth_req: AuthReq) -> Result<(), HostError> {
        self.calls.push(HostCall::SendSecurityRequest { conn });
        Ok(())
    }

    async fn passkey_update(&mut self, conn: ConnHandle, passkey: u32) -> Result<(), HostError> {
        self.calls.push(HostCall::PasskeyUpdate { conn, passkey });
        Ok(())
    }

    async fn load_signing_info(&mut self, conn: ConnHandle, signing: &SigningInfo) -> Result<(), HostError> {
        self.calls.push(HostCall::LoadSigningInfo {
            conn,
            signing: *signing,
        });
        Ok(())
    }
}

impl GattClient for MockHost {
    async fn read_characteristic_by_uuid(&mut self, conn: ConnHandle, uuid: u16) -> Result<(), HostError> {
        if self.failing_read == Some(uuid) {
            return Err(HostError::Busy);
        }
        self.calls.push(HostCall::ReadCharacteristic { conn, uuid });
        Ok(())
    }
}

impl GattServer for MockHost {
    async fn load_client_config(&mut self, conn: ConnHandle, table: &[(u16, u16)]) -> Result<(), HostError> {
        self.calls.push(HostCall::LoadClientConfig {
            conn,
            table: table.to_vec(),
        });
        Ok(())
    }

    async fn indicate_service_changed(&mut self, conn: ConnHandle) -> Result<(), HostError> {
        self.calls.push(HostCall::IndicateServiceChanged { conn });
        Ok(())
    }
}

impl PrivacyController for MockHost {
    fn is_radio_idle(&self) -> bool {
        self.idle
    }

    async fn clear_resolving_list(&mut self) -> Result<(), HostError> {
        self.calls.push(HostCall::ClearResolvingList);
        Ok(())
    }

    async fn add_local_identity(&mut self, local_irk: &Irk) -> Result<(), HostError> {
        if self.fail_local_identity {
            return Err(HostError::Failed(0x07));
        }
        self.calls.push(HostCall::AddLocalIdentity { irk: *local_irk });
        Ok(())
    }

    async fn add_resolving_list_entry(
        &mut self,
        peer: &Address,
        peer_irk: &Irk,
        local_irk: &Irk,
    ) -> Result<(), HostError> {
        if self.failing_entry == Some(*peer) {
            return Err(HostError::Failed(0x07));
        }
        self.calls.push(HostCall::AddResolvingListEntry {
            peer: *peer,
            peer_irk: *peer_irk,
            local_irk: *local_irk,
        });
        Ok(())
    }

    async fn set_privacy_mode(&mut self, peer: &Address, mode: PrivacyMode) -> Result<(), HostError> {
        self.calls.push(HostCall::SetPrivacyMode { peer: *peer, mode });
        Ok(())
    }

    async fn clear_allow_list(&mut self) -> Result<(), HostError> {
        self.calls.push(HostCall::ClearAllowList);
        Ok(())
    }

    async fn add_allow_list_entry(&mut self, peer: &Address) -> Result<(), HostError> {
        self.calls.push(HostCall::AddAllowListEntry { peer: *peer });
        Ok(())
    }
}

impl LinkControl for MockHost {
    async fn disconnect(&mut self, conn: ConnHandle, reason: u8) -> Result<(), HostError> {
        self.calls.push(HostCall::Disconnect { conn, reason });
        Ok(())
    }
}

/// Observer that records every report
#[derive(Default)]
pub struct Recorder {
    pub states: RefCell<Vec<(ConnHandle, BondStage, Result<(), BondError>)>>,
    pub passkeys: RefCell<Vec<(ConnHandle, PasskeyRequest)>>,
    pub ecc_keys: RefCell<usize>,
}

impl Recorder {
    pub fn stages(&self, conn: ConnHandle) -> Vec<(BondStage, Result<(), BondError>)> {
        self.states
            .borrow()
            .iter()
            .filter(|(c, _, _)| *c == conn)
            .map(|(_, stage, status)| (*stage, *status))
            .collect()
    }
}

impl BondCallbacks for Recorder {
    fn passcode_needed(&self, conn: ConnHandle, request: PasskeyRequest) {
        self.passkeys.borrow_mut().push((conn, request));
    }

    fn pairing_state(&self, conn: ConnHandle, stage: BondStage, status: Result<(), BondError>) {
        self.states.borrow_mut().push((conn, stage, status));
    }

    fn ecc_keys_generated(&self, _keys: &blebond::types::keys::EccKeys) {
        *self.ecc_keys.borrow_mut() += 1;
    }
}
