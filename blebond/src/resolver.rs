//! Resolvable private address resolution
//!
//! A resolvable private address is `hash || prand` where `hash = ah(IRK, prand)`,
//! `ah` being the low 24 bits of `AES-128(IRK, 0^104 || prand)`. Resolving an
//! address means recomputing the hash with every stored IRK until one matches.
//! This only happens on connection establishment, so the linear scan is fine.

use aes::Aes128;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use blebond_types::address::{Address, BdAddr};
use blebond_types::keys::Irk;
use rand_core::RngCore;

/// Random address hash function `ah`.
///
/// Both `irk` and `prand` are little-endian, as stored and as sent over the air.
pub fn ah(irk: &Irk, prand: [u8; 3]) -> [u8; 3] {
    // AES works on most significant byte first
    let mut key = irk.0;
    key.reverse();
    let cipher = Aes128::new(&GenericArray::from(key));

    let mut block = GenericArray::from([0u8; 16]);
    block[13] = prand[2];
    block[14] = prand[1];
    block[15] = prand[0];
    cipher.encrypt_block(&mut block);

    [block[15], block[14], block[13]]
}

/// Check whether `addr` was generated from `irk`.
pub fn resolve_rpa(irk: &Irk, addr: &BdAddr) -> bool {
    ah(irk, addr.prand()) == addr.hash()
}

/// Generate a new resolvable private address from `irk`.
pub fn generate_rpa(irk: &Irk, rng: &mut impl RngCore) -> BdAddr {
    loop {
        let mut prand = [0u8; 3];
        rng.fill_bytes(&mut prand);
        prand[2] = (prand[2] & 0x3F) | 0x40;

        // The random part of prand must not be all zeros or all ones
        let random = u32::from_le_bytes([prand[0], prand[1], prand[2] & 0x3F, 0]);
        if random == 0 || random == 0x3F_FFFF {
            continue;
        }

        return BdAddr::from_rpa_parts(ah(irk, prand), prand);
    }
}

/// Find the first candidate whose IRK generated `address`.
///
/// Returns `None` right away if `address` isn't a resolvable private address.
pub fn resolve<'a>(candidates: impl Iterator<Item = (u8, &'a Irk)>, address: &Address) -> Option<u8> {
    if !address.is_resolvable_private() {
        return None;
    }
    for (slot, irk) in candidates {
        if irk.is_usable() && resolve_rpa(irk, &address.addr) {
            trace!("Resolved private address to slot {}", slot);
            return Some(slot);
        }
    }
    None
}
