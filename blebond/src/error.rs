use blebond_types::smp::PairingFailure;

/// Error reported by a host stack collaborator when it can't take a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HostError {
    /// The collaborator is busy with another request
    Busy,
    /// The operation is not available on this host
    NotSupported,
    /// Controller or stack status code
    Failed(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BondError {
    /// No bond matches the address or slot
    NotFound,
    /// No free slot and eviction is disabled
    StoreFull,
    /// The flash backend failed
    PersistenceFailure,
    /// A policy value is out of range
    InvalidParameter,
    /// Pairing is already running on the connection
    AlreadyInProgress,
    /// No link with the given connection handle
    NotConnected,
    /// The security layer or the peer failed the pairing
    AuthenticationFailed { reason: PairingFailure },
    /// A fixed-size table (pairing queue, link table, client config table) is full
    NoResources,
    /// A host stack collaborator refused the request
    Host(HostError),
}

impl From<HostError> for BondError {
    fn from(e: HostError) -> Self {
        BondError::Host(e)
    }
}

impl core::fmt::Display for BondError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BondError::NotFound => write!(f, "bond not found"),
            BondError::StoreFull => write!(f, "bond store is full"),
            BondError::PersistenceFailure => write!(f, "persistent storage failure"),
            BondError::InvalidParameter => write!(f, "invalid parameter"),
            BondError::AlreadyInProgress => write!(f, "pairing already in progress"),
            BondError::NotConnected => write!(f, "not connected"),
            BondError::AuthenticationFailed { reason } => write!(f, "authentication failed: {:?}", reason),
            BondError::NoResources => write!(f, "no resources"),
            BondError::Host(e) => write!(f, "host error: {:?}", e),
        }
    }
}
