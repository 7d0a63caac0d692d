/*++

Licensed under the Apache-2.0 license.

File Name:

    key_slot.rs

Abstract:

    File contains the allocator for the engine's local key slots.

--*/

use crate::{cprintln, SeResult};
use std::sync::{Mutex, MutexGuard};

pub const KEYSLOT_COUNT: u8 = 16;

/// Slot 0 is the engine's default key. Slots 14 and 15 are held back for
/// the block cipher fallback when every other slot is taken.
pub const RESERVED_SLOT_MASK: u16 = (1 << 0) | (1 << 14) | (1 << 15);

/// Fallback slot for the (first) key of a block cipher request.
pub const RESERVED_SLOT: u8 = 14;

/// Fallback slot for the second XTS key.
pub const RESERVED_SLOT_XTS2: u8 = 15;

pub const fn is_reserved(index: u8) -> bool {
    index < KEYSLOT_COUNT && RESERVED_SLOT_MASK & (1 << index) != 0
}

/// Local key slot allocator.
#[derive(Debug, Default)]
pub struct KeySlotTable {
    occupied: Mutex<u16>,
}

impl KeySlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, u16> {
        self.occupied.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the lowest free non-reserved slot.
    pub fn allocate(&self) -> Option<u8> {
        let mut occupied = self.lock();
        let taken = *occupied | RESERVED_SLOT_MASK;
        let index = (!taken).trailing_zeros();
        if index >= KEYSLOT_COUNT as u32 {
            cprintln!("[keyslot] no free slot");
            return None;
        }
        *occupied |= 1 << index;
        cprintln!("[keyslot] allocated {}", index);
        Some(index as u8)
    }

    /// Mark `index` free. Releasing a free or reserved slot is a no-op.
    pub fn release(&self, index: u8) {
        if index >= KEYSLOT_COUNT || is_reserved(index) {
            return;
        }
        let mut occupied = self.lock();
        *occupied &= !(1 << index);
        cprintln!("[keyslot] released {}", index);
    }

    /// Run `zeroize` on `index` and release the slot, both under the
    /// allocator lock. A slot whose zeroization fails stays allocated.
    pub fn release_zeroized<F>(&self, index: u8, zeroize: F) -> SeResult<()>
    where
        F: FnOnce(u8) -> SeResult<()>,
    {
        let mut occupied = self.lock();
        if let Err(err) = zeroize(index) {
            cprintln!("[keyslot] slot {} not zeroized, kept allocated", index);
            return Err(err);
        }
        if index < KEYSLOT_COUNT && !is_reserved(index) {
            *occupied &= !(1 << index);
            cprintln!("[keyslot] released {}", index);
        }
        Ok(())
    }

    pub fn is_allocated(&self, index: u8) -> bool {
        index < KEYSLOT_COUNT && *self.lock() & (1 << index) != 0
    }

    /// Number of slots `allocate` can still hand out.
    pub fn free_count(&self) -> u32 {
        let taken = *self.lock() | RESERVED_SLOT_MASK;
        taken.count_zeros()
    }
}
