/*++

Licensed under the Apache-2.0 license.

File Name:

    key_handle.rs

Abstract:

    File contains the handle naming where a key lives: a local slot, the
    remote key store, or a reserved fallback slot.

--*/

use crate::kds::encode_reference;
use crate::key_slot::{is_reserved, KEYSLOT_COUNT};
use crate::regs::KdsRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyHandle {
    /// Key programmed into an allocated local slot.
    LocalSlot(u8),

    /// Key held by the KDS. Must be moved into a local slot before use.
    KdsRef { region: u8, id: u8 },

    /// Key inserted directly into a reserved slot.
    Reserved(u8),
}

impl KeyHandle {
    /// True if the key must be fetched into a local slot before an
    /// operation can use it.
    pub fn needs_fetch(&self) -> bool {
        matches!(self, KeyHandle::KdsRef { .. })
    }

    /// Local slot the key occupies, if any.
    pub fn slot(&self) -> Option<u8> {
        match *self {
            KeyHandle::LocalSlot(slot) | KeyHandle::Reserved(slot) => Some(slot),
            KeyHandle::KdsRef { .. } => None,
        }
    }

    /// Hardware reference used by move and invalidate commands.
    pub fn reference(&self) -> u32 {
        match *self {
            KeyHandle::LocalSlot(slot) | KeyHandle::Reserved(slot) => {
                (KdsRef::TABLE::LOCAL + KdsRef::KEY_ID.val(slot as u32)).into()
            }
            KeyHandle::KdsRef { region, id } => encode_reference(region, id),
        }
    }

    /// Consistency of the handle with the slot layout.
    pub fn is_well_formed(&self) -> bool {
        match *self {
            KeyHandle::LocalSlot(slot) => slot < KEYSLOT_COUNT && !is_reserved(slot),
            KeyHandle::Reserved(slot) => is_reserved(slot),
            KeyHandle::KdsRef { id, .. } => id != 0,
        }
    }
}
