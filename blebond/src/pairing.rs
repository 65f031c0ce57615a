//! Pairing queue
//!
//! One node per connection that wants to pair. Nodes are kept in arrival order
//! and only one of them can be in [`PairingState::IsPairing`] at any time, the
//! security layer handles a single negotiation. When the active node moves on,
//! the oldest waiting node is promoted.

use blebond_types::address::AddressType;
use heapless::Deque;

use crate::error::BondError;
use crate::host::{ConnHandle, PairingRequest};

/// State of a queued pairing
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingState {
    /// Queued behind another pairing
    WaitPairing,
    /// Negotiating with the security layer
    IsPairing,
    /// Bonded, reading the peer's "RPA only" characteristic
    WaitDiscoverRpao,
    /// Bonded, reading the peer's "central address resolution" characteristic
    WaitDiscoverCar,
    /// Done, the node is dropped
    End,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PairingNode {
    pub conn: ConnHandle,
    pub peer_address_type: AddressType,
    /// Set when the peer started the pairing
    pub peer_request: Option<PairingRequest>,
    pub state: PairingState,
}

/// Outcome of [`PairingSerializer::request`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Enqueued {
    /// The connection already had a node, left untouched
    Existing(PairingState),
    /// Queued behind the active pairing
    Waiting,
    /// Nothing else was pairing, the node is active and the security layer must be called
    Started(PairingNode),
}

pub struct PairingSerializer<const N: usize> {
    queue: Deque<PairingNode, N>,
}

impl<const N: usize> Default for PairingSerializer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> PairingSerializer<N> {
    pub const fn new() -> Self {
        Self { queue: Deque::new() }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn node(&self, conn: ConnHandle) -> Option<&PairingNode> {
        self.queue.iter().find(|n| n.conn == conn)
    }

    pub fn state(&self, conn: ConnHandle) -> Option<PairingState> {
        self.node(conn).map(|n| n.state)
    }

    /// The connection currently negotiating, if any
    pub fn active(&self) -> Option<ConnHandle> {
        self.queue
            .iter()
            .find(|n| n.state == PairingState::IsPairing)
            .map(|n| n.conn)
    }

    /// Queue a pairing for `conn`, starting it right away if nothing else is pairing.
    pub fn request(
        &mut self,
        conn: ConnHandle,
        peer_address_type: AddressType,
        peer_request: Option<PairingRequest>,
    ) -> Result<Enqueued, BondError> {
        if let Some(node) = self.node(conn) {
            return Ok(Enqueued::Existing(node.state));
        }

        let node = PairingNode {
            conn,
            peer_address_type,
            peer_request,
            state: PairingState::WaitPairing,
        };
        self.queue.push_back(node).map_err(|_| BondError::NoResources)?;

        if self.active().is_some() {
            debug!("Pairing on {:?} queued behind {:?}", conn, self.active());
            return Ok(Enqueued::Waiting);
        }
        self.set_state(conn, PairingState::IsPairing);
        Ok(Enqueued::Started(PairingNode {
            state: PairingState::IsPairing,
            ..node
        }))
    }

    fn set_state(&mut self, conn: ConnHandle, state: PairingState) {
        if let Some(node) = self.queue.iter_mut().find(|n| n.conn == conn) {
            node.state = state;
        }
    }

    /// Move `conn` to `state`. Reaching [`PairingState::End`] removes the node.
    ///
    /// Returns whether `conn` was the active pairing, in which case the caller
    /// should [`promote_next`](Self::promote_next).
    pub fn advance(&mut self, conn: ConnHandle, state: PairingState) -> bool {
        let was_active = self.state(conn) == Some(PairingState::IsPairing);
        if state == PairingState::End {
            self.remove(conn);
        } else {
            self.set_state(conn, state);
        }
        was_active && state != PairingState::IsPairing
    }

    /// Drop the node of `conn` whatever its state. Returns whether it was the active pairing.
    pub fn remove(&mut self, conn: ConnHandle) -> bool {
        let mut was_active = false;
        // Deque has no `retain`, rotate through it once
        for _ in 0..self.queue.len() {
            if let Some(node) = self.queue.pop_front() {
                if node.conn == conn {
                    was_active = node.state == PairingState::IsPairing;
                } else {
                    let _ = self.queue.push_back(node);
                }
            }
        }
        was_active
    }

    /// Promote the oldest waiting node if nothing is pairing.
    pub fn promote_next(&mut self) -> Option<PairingNode> {
        if self.active().is_some() {
            return None;
        }
        let node = self.queue.iter_mut().find(|n| n.state == PairingState::WaitPairing)?;
        node.state = PairingState::IsPairing;
        debug!("Promoting pairing on {:?}", node.conn);
        Some(*node)
    }
}
