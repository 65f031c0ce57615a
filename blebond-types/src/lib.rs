//! # BLE bond types
//!
//! This crate provides the plain data types shared between the bond manager,
//! the host stack that drives it and the application that observes it.
//!
//! ## Modules
//!
//! - [`address`] - Device addresses, address types and resolvable private address helpers
//! - [`keys`] - Long term keys, identity resolving keys, signing keys and the per-bond key material
//! - [`flags`] - Bond state flags, authentication requirements and key distribution bitfields
//! - [`policy`] - Pairing policy values: pairing mode, IO capabilities, secure connections mode
//! - [`smp`] - Security manager pairing failure reasons
//!
//! All types are `no_std`, serializable with `serde` and cheap to copy.

#![no_std]

pub mod address;
pub mod flags;
pub mod keys;
pub mod policy;
pub mod smp;
