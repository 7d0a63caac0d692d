/*++

Licensed under the Apache-2.0 license.

File Name:

    key_store.rs

Abstract:

    File contains key installation, resolution and invalidation across the
    local key slots and the KDS.

--*/

use zeroize::Zeroizing;

use crate::alg_table::{Algorithm, Mode};
use crate::cmdbuf::{key_insert_cmd, key_invalidate_cmd, key_move_cmd, CMDBUF_WORDS};
use crate::device::SeRun;
use crate::engine::EngineSubmitter;
use crate::kds::{with_hw_mutex, KdsClient};
use crate::key_handle::KeyHandle;
use crate::key_slot::RESERVED_SLOT;
use crate::manifest::{self, KeyOwner};
use crate::{cprintln, SeError, SeResult};

/// Key programmed into the engine on behalf of one session.
pub struct InstalledKey {
    handle: KeyHandle,
    manifest: u32,
    // Raw material, kept for keys that may be staged through a reserved
    // slot.
    material: Option<Zeroizing<Vec<u8>>>,
}

impl InstalledKey {
    pub fn handle(&self) -> KeyHandle {
        self.handle
    }

    pub fn manifest(&self) -> u32 {
        self.manifest
    }
}

/// Key bytes as little-endian words, the order `KEY_DATA` takes them in.
fn key_words(key: &[u8]) -> Zeroizing<Vec<u32>> {
    let mut words = Zeroizing::new(Vec::with_capacity(8));
    for chunk in key.chunks(4).take(8) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        words.push(u32::from_le_bytes(word));
    }
    words
}

fn insert<E: EngineSubmitter>(engine: &mut E, manifest: u32, slot: u8, key: &[u32]) -> SeResult<()> {
    let mut buf = Zeroizing::new([0u32; CMDBUF_WORDS]);
    let len = key_insert_cmd(&mut buf[..], manifest, slot as u32, key, engine.syncpt_id())?;
    engine.submit(&buf[..], len)
}

/// Overwrite `slot` with zero key material.
fn zero_slot<E: EngineSubmitter>(engine: &mut E, owner: KeyOwner, slot: u8) -> SeResult<()> {
    let manifest = manifest::encode(owner, Algorithm::Aes(Mode::Ecb), 32)?;
    insert(engine, manifest, slot, &[0; 8])
}

/// Keep the first error, but run every cleanup step.
fn chain<T>(result: SeResult<T>, cleanup: SeResult<()>) -> SeResult<T> {
    let value = result?;
    cleanup?;
    Ok(value)
}

impl<'a, E: EngineSubmitter> SeRun<'a, E> {
    fn move_key(&mut self, src: u32, dst: u32) -> SeResult<()> {
        with_hw_mutex(self.engine, |engine| {
            let mut buf = [0u32; CMDBUF_WORDS];
            let len = key_move_cmd(&mut buf, src, dst, engine.syncpt_id())?;
            engine.submit(&buf, len)
        })
    }

    /// KDS client holding `key`, which must name a live id of its region.
    fn live_kds_key(&self, key: &InstalledKey) -> SeResult<&'a KdsClient> {
        let kds = self.kds.ok_or(SeError::DRIVER_KDS_UNAVAILABLE)?;
        if !kds.is_reference_valid(key.handle.reference()) {
            return Err(SeError::DRIVER_INVALID_KEY_HANDLE);
        }
        Ok(kds)
    }

    /// Zero `slot` and return it to the allocator, under the allocator lock.
    fn release_slot(&mut self, slot: u8) -> SeResult<()> {
        let owner = self.params.key_owner;
        let engine = &mut *self.engine;
        self.slots
            .release_zeroized(slot, |slot| zero_slot(engine, owner, slot))
    }

    /// Program `key` for use with `alg`.
    ///
    /// The key is inserted into a local slot. When the KDS is available it is
    /// then moved into a fresh KDS id and the local slot is zeroed and freed.
    /// If no local slot is free and `allow_reserved` is set, the key is kept
    /// in software and staged through a reserved slot at each use.
    ///
    /// # Arguments
    ///
    /// * `alg` - Algorithm the key will be used with
    /// * `key` - Raw key (one half for XTS)
    /// * `allow_reserved` - Permit the reserved slot fallback
    pub fn install_key(&mut self, alg: Algorithm, key: &[u8], allow_reserved: bool) -> SeResult<InstalledKey> {
        let manifest = manifest::encode(self.params.key_owner, alg, key.len())?;
        let material = allow_reserved.then(|| Zeroizing::new(key.to_vec()));

        let Some(slot) = self.slots.allocate() else {
            if allow_reserved {
                cprintln!("[keystore] slots exhausted, key staged through reserved slot");
                return Ok(InstalledKey {
                    handle: KeyHandle::Reserved(RESERVED_SLOT),
                    manifest,
                    material,
                });
            }
            return Err(SeError::DRIVER_KEYSLOT_EXHAUSTED);
        };

        let words = key_words(key);
        if let Err(err) = insert(self.engine, manifest, slot, &words) {
            return chain(Err(err), self.release_slot(slot));
        }

        let Some(kds) = self.kds else {
            return Ok(InstalledKey {
                handle: KeyHandle::LocalSlot(slot),
                manifest,
                material,
            });
        };
        let Some(id) = kds.keyid_alloc() else {
            cprintln!("[keystore] KDS ids exhausted, key kept in slot {}", slot);
            return Ok(InstalledKey {
                handle: KeyHandle::LocalSlot(slot),
                manifest,
                material,
            });
        };

        let handle = KeyHandle::KdsRef {
            region: kds.region(),
            id,
        };
        let moved = self.move_key(KeyHandle::LocalSlot(slot).reference(), handle.reference());
        let released = self.release_slot(slot);
        if let Err(err) = chain(moved, released) {
            kds.keyid_free(id);
            return Err(err);
        }
        Ok(InstalledKey {
            handle,
            manifest,
            material,
        })
    }

    /// Destroy an installed key. No key material remains in the engine and
    /// the slot or id is available again.
    pub fn invalidate_key(&mut self, key: &InstalledKey) -> SeResult<()> {
        match key.handle {
            KeyHandle::LocalSlot(slot) => self.release_slot(slot),
            KeyHandle::KdsRef { id, .. } => {
                let kds = self.live_kds_key(key)?;
                let target = key.handle.reference();
                with_hw_mutex(self.engine, |engine| {
                    let mut buf = [0u32; CMDBUF_WORDS];
                    let len = key_invalidate_cmd(&mut buf, target, engine.syncpt_id())?;
                    engine.submit(&buf, len)
                })?;
                kds.keyid_free(id);
                Ok(())
            }
            KeyHandle::Reserved(slot) => zero_slot(self.engine, self.params.key_owner, slot),
        }
    }

    /// Run `f` with `key` resident in a local slot.
    ///
    /// KDS keys are moved into a transient slot. If none is free and
    /// `fallback` names a reserved slot, the raw key is inserted there
    /// instead. Transient and reserved occupancy is zeroed and released on
    /// every exit path.
    pub fn with_key<T, F>(&mut self, key: &InstalledKey, fallback: Option<u8>, f: F) -> SeResult<T>
    where
        F: FnOnce(&mut Self, u8) -> SeResult<T>,
    {
        match key.handle {
            KeyHandle::LocalSlot(slot) => f(self, slot),
            KeyHandle::Reserved(slot) => {
                // XTS stages its second key through the second reserved slot.
                let slot = fallback.unwrap_or(slot);
                self.with_reserved(key, slot, f)
            }
            KeyHandle::KdsRef { .. } => {
                self.live_kds_key(key)?;
                match self.slots.allocate() {
                    Some(slot) => {
                        let result = self
                            .move_key(key.handle.reference(), KeyHandle::LocalSlot(slot).reference())
                            .and_then(|_| f(self, slot));
                        chain(result, self.release_slot(slot))
                    }
                    None => match fallback {
                        Some(reserved) if key.material.is_some() => {
                            cprintln!("[keystore] slots exhausted, using reserved slot {}", reserved);
                            self.with_reserved(key, reserved, f)
                        }
                        _ => Err(SeError::DRIVER_KEYSLOT_EXHAUSTED),
                    },
                }
            }
        }
    }

    fn with_reserved<T, F>(&mut self, key: &InstalledKey, slot: u8, f: F) -> SeResult<T>
    where
        F: FnOnce(&mut Self, u8) -> SeResult<T>,
    {
        let material = key.material.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        let words = key_words(material);
        let result = insert(self.engine, key.manifest, slot, &words).and_then(|_| f(self, slot));
        chain(result, zero_slot(self.engine, self.params.key_owner, slot))
    }
}
