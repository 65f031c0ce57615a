//! Channel the host stack sends bond events through

use embassy_sync::channel::Channel;
pub use embassy_sync::{blocking_mutex, channel};

use crate::event::BondEvent;
use crate::{EVENT_CHANNEL_SIZE, RawMutex};

/// Channel for security, link and GATT events consumed by [`BondManager::run`](crate::manager::BondManager::run)
pub static BOND_EVENT_CHANNEL: Channel<RawMutex, BondEvent, EVENT_CHANNEL_SIZE> = Channel::new();
