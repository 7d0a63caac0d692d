/*++

Licensed under the Apache-2.0 license.

File Name:

    kds.rs

Abstract:

    File contains the client of the Key Distribution Store (KDS), the
    engine's remote key store: region setup over the hardware mutex, and
    the key id allocator for the region.

--*/

use crate::engine::EngineSubmitter;
use crate::manifest::{KeyOwner, KeySizeClass};
use crate::regs::{self, KdsMutexStatus, KdsOperation, KdsRef, KdsRegionAttr, KdsStatus};
use crate::{cprintln, SeError, SeResult};
use std::sync::{Mutex, MutexGuard};
use tock_registers::LocalRegisterCopy;

/// Key ids are drawn from `1..KDS_MAX_KEYS`. Id 0 means "no id".
pub const KDS_MAX_KEYS: u32 = 64;

/// Region parameters programmed by [`KdsClient::region_setup`].
#[derive(Debug, Clone, Copy)]
pub struct KdsRegionConfig {
    pub owner: KeyOwner,
    pub max_key_size: KeySizeClass,
    /// Keys requested for the region, at most 63.
    pub key_count: u8,
}

/// Pack a KDS key reference.
pub fn encode_reference(region: u8, id: u8) -> u32 {
    (KdsRef::TABLE::GLOBAL + KdsRef::REGION.val(region as u32) + KdsRef::KEY_ID.val(id as u32)).into()
}

/// Key id of a KDS reference.
pub fn reference_key_id(reference: u32) -> u8 {
    LocalRegisterCopy::<u32, KdsRef::Register>::new(reference).read(KdsRef::KEY_ID) as u8
}

pub struct KdsClient {
    region: u8,
    // Bit n set: id n belongs to the region.
    usable: u64,
    // Bit n set: id n unavailable. Bit 0 and ids past the region size are
    // set from the start.
    ids: Mutex<u64>,
}

impl KdsClient {
    pub(crate) fn new(region: u8, key_count: u8) -> Self {
        let usable = usable_ids(key_count);
        Self {
            region,
            usable,
            ids: Mutex::new(!usable),
        }
    }

    fn lock(&self) -> MutexGuard<'_, u64> {
        self.ids.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a region in the store. Runs once per device.
    ///
    /// # Arguments
    ///
    /// * `engine` - Engine whose KDS block is programmed
    /// * `config` - Region parameters
    ///
    /// # Returns
    ///
    /// * `KdsClient` - Client bound to the new region
    pub fn region_setup<E: EngineSubmitter>(engine: &mut E, config: KdsRegionConfig) -> SeResult<Self> {
        let key_count = config.key_count.min((KDS_MAX_KEYS - 1) as u8);
        let region = with_hw_mutex(engine, |engine| {
            engine.write_register(
                regs::KDS_REGION_ATTR,
                (KdsRegionAttr::OWNER.val(config.owner as u32)
                    + KdsRegionAttr::MAX_KEY_SIZE.val(config.max_key_size as u32)
                    + KdsRegionAttr::KEY_COUNT.val(key_count as u32))
                .into(),
            );
            engine.write_register(regs::KDS_REGION_OWNER, 1 << config.owner as u32);
            engine.write_register(regs::KDS_OPERATION, KdsOperation::OP::ALLOC_REGION.into());

            let status = engine.poll_register(
                regs::KDS_STATUS,
                &|v| LocalRegisterCopy::<u32, KdsStatus::Register>::new(v).matches_all(KdsStatus::STATE::IDLE),
                SeError::DRIVER_KDS_STATUS_TIMEOUT,
            )?;
            let status = LocalRegisterCopy::<u32, KdsStatus::Register>::new(status);
            if !status.matches_all(KdsStatus::RESULT::PASS) {
                return Err(SeError::DRIVER_KDS_REGION_ALLOC_FAILURE);
            }
            Ok(engine.read_register(regs::KDS_REGION_ID) as u8)
        });

        match region {
            Ok(region) => {
                cprintln!("[kds] region {} allocated, {} keys", region, key_count);
                Ok(Self::new(region, key_count))
            }
            Err(err) => {
                cprintln!("[kds] region setup failed: {}", u32::from(err));
                Err(err)
            }
        }
    }

    pub fn region(&self) -> u8 {
        self.region
    }

    /// Allocate the lowest free key id.
    pub fn keyid_alloc(&self) -> Option<u8> {
        let mut ids = self.lock();
        if *ids == u64::MAX {
            cprintln!("[kds] key ids exhausted");
            return None;
        }
        let id = (!*ids).trailing_zeros();
        *ids |= 1 << id;
        cprintln!("[kds] allocated id {}", id);
        Some(id as u8)
    }

    /// Free `id`. Freeing 0, an id outside the region or an unallocated id
    /// is a no-op.
    pub fn keyid_free(&self, id: u8) {
        if !self.in_region(id as u32) {
            return;
        }
        let mut ids = self.lock();
        *ids &= !(1 << id);
        cprintln!("[kds] freed id {}", id);
    }

    fn in_region(&self, id: u32) -> bool {
        id < KDS_MAX_KEYS && self.usable & (1 << id) != 0
    }

    /// Reference to key `id` of this client's region.
    pub fn reference(&self, id: u8) -> u32 {
        encode_reference(self.region, id)
    }

    /// True if `reference` names a currently allocated id of this region.
    pub fn is_reference_valid(&self, reference: u32) -> bool {
        let reference = LocalRegisterCopy::<u32, KdsRef::Register>::new(reference);
        if !reference.matches_all(KdsRef::TABLE::GLOBAL) {
            return false;
        }
        if reference.read(KdsRef::REGION) != self.region as u32 {
            return false;
        }
        let id = reference.read(KdsRef::KEY_ID);
        self.in_region(id) && *self.lock() & (1 << id) != 0
    }

    /// Snapshot of the id bitmap.
    pub fn bitmap(&self) -> u64 {
        *self.lock()
    }
}

fn usable_ids(key_count: u8) -> u64 {
    // Ids 1..=key_count.
    if key_count as u32 >= KDS_MAX_KEYS - 1 {
        u64::MAX << 1
    } else {
        ((1u64 << key_count) - 1) << 1
    }
}

/// Run `f` while holding the KDS hardware mutex. The mutex is released on
/// every exit path once granted.
pub fn with_hw_mutex<E, T, F>(engine: &mut E, f: F) -> SeResult<T>
where
    E: EngineSubmitter,
    F: FnOnce(&mut E) -> SeResult<T>,
{
    engine.poll_register(
        regs::KDS_MUTEX_STATUS,
        &|v| !LocalRegisterCopy::<u32, KdsMutexStatus::Register>::new(v).is_set(KdsMutexStatus::BUSY),
        SeError::DRIVER_KDS_MUTEX_TIMEOUT,
    )?;
    engine.write_register(regs::KDS_MUTEX_REQUEST, 1);
    let status = LocalRegisterCopy::<u32, KdsMutexStatus::Register>::new(engine.read_register(regs::KDS_MUTEX_STATUS));
    if !status.is_set(KdsMutexStatus::GRANTED) {
        cprintln!("[kds] hardware mutex not granted");
        return Err(SeError::DRIVER_KDS_MUTEX_NOT_GRANTED);
    }
    let result = f(engine);
    engine.write_register(regs::KDS_MUTEX_RELEASE, 1);
    result
}
