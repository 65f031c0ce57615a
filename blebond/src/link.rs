//! Live links and the bond each one maps to

use blebond_types::address::Address;
use blebond_types::policy::Role;
use heapless::Vec;

use crate::error::BondError;
use crate::host::ConnHandle;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkInfo {
    pub conn: ConnHandle,
    /// Over-the-air address of the peer
    pub peer: Address,
    /// Identity of the peer, once known
    pub identity: Address,
    pub role: Role,
    /// Bond slot, if the peer is bonded
    pub slot: Option<u8>,
}

pub struct LinkTable<const N: usize> {
    links: Vec<LinkInfo, N>,
}

impl<const N: usize> Default for LinkTable<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LinkTable<N> {
    pub const fn new() -> Self {
        Self { links: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn add(&mut self, info: LinkInfo) -> Result<(), BondError> {
        if let Some(link) = self.get_mut(info.conn) {
            *link = info;
            return Ok(());
        }
        self.links.push(info).map_err(|_| BondError::NoResources)
    }

    pub fn remove(&mut self, conn: ConnHandle) -> Option<LinkInfo> {
        let pos = self.links.iter().position(|l| l.conn == conn)?;
        Some(self.links.swap_remove(pos))
    }

    pub fn get(&self, conn: ConnHandle) -> Option<&LinkInfo> {
        self.links.iter().find(|l| l.conn == conn)
    }

    pub fn get_mut(&mut self, conn: ConnHandle) -> Option<&mut LinkInfo> {
        self.links.iter_mut().find(|l| l.conn == conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkInfo> {
        self.links.iter()
    }

    /// Forget the bond slot of every link to it, after the bond was erased
    pub fn unbind(&mut self, slot: u8) {
        for link in self.links.iter_mut().filter(|l| l.slot == Some(slot)) {
            link.slot = None;
        }
    }

    pub fn unbind_all(&mut self) {
        for link in self.links.iter_mut() {
            link.slot = None;
        }
    }
}
