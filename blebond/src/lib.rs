//! # BLE bond manager
//!
//! Bonding and pairing manager of a BLE host stack. It keeps the bonded peers
//! and their keys in flash, serializes pairing across connections and mirrors
//! the bonds into the controller's resolving list and allow list.
//!
//! ## Modules
//!
//! - [`store`] - Fixed-capacity bond table backed by `sequential-storage`, with LRU eviction
//! - [`resolver`] - Resolvable private address resolution against stored IRKs
//! - [`pairing`] - Pairing queue, at most one pairing negotiation at a time
//! - [`post_bond`] - Privacy characteristic reads that follow a new bond
//! - [`privacy`] - Deferred resolving list and allow list synchronization
//! - [`params`] - Pairing policy parameters
//! - [`manager`] - [`BondManager`](manager::BondManager), the event loop tying everything together
//! - [`host`] - Traits the host stack implements for the manager
//!
//! ## Feature flags
#![doc = document_features::document_features!()]
#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![allow(async_fn_in_trait)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod channel;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod link;
pub mod lru;
pub mod manager;
pub mod pairing;
pub mod params;
pub mod post_bond;
pub mod privacy;
pub mod resolver;
pub mod storage;
pub mod store;

pub use blebond_types as types;
pub use error::BondError;
pub use manager::BondManager;

pub type RawMutex = embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

/// Size of the bond event channel
pub const EVENT_CHANNEL_SIZE: usize = 8;
