/*++

Licensed under the Apache-2.0 license.

File Name:

    key_table.rs

Abstract:

    File contains the emulated local key table and KDS key store.

--*/

use arrayvec::ArrayVec;
use se_drivers::regs::KdsRef;
use se_drivers::{KeyManifest, KEYSLOT_COUNT, KDS_MAX_KEYS};
use tock_registers::LocalRegisterCopy;

use crate::Fault;

/// Maximum key size in bytes.
pub const KEY_SIZE_MAX: usize = 32;

/// Manifest and material of one stored key. An empty entry holds no
/// material.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub manifest: u32,
    pub key: ArrayVec<u8, KEY_SIZE_MAX>,
}

impl KeyEntry {
    /// Build an entry from little-endian key words, sized by the manifest.
    pub fn from_words(manifest: u32, words: &[u32; 8]) -> Result<Self, Fault> {
        let len = KeyManifest::from(manifest)
            .size_class()
            .ok_or(Fault::BadKey)?
            .key_len();
        let mut key = ArrayVec::new();
        for word in words.iter() {
            key.try_extend_from_slice(&word.to_le_bytes())
                .map_err(|_| Fault::BadKey)?;
        }
        key.truncate(len);
        Ok(Self { manifest, key })
    }

    pub fn purpose(&self) -> u8 {
        KeyManifest::from(self.manifest).purpose()
    }

    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// Location named by a key reference word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLocation {
    Local(usize),
    Kds { region: u8, id: u8 },
}

impl KeyLocation {
    pub fn decode(reference: u32) -> Result<Self, Fault> {
        let reference = LocalRegisterCopy::<u32, KdsRef::Register>::new(reference);
        let id = reference.read(KdsRef::KEY_ID);
        if reference.matches_all(KdsRef::TABLE::LOCAL) {
            if id >= KEYSLOT_COUNT as u32 {
                return Err(Fault::BadKey);
            }
            Ok(Self::Local(id as usize))
        } else if reference.matches_all(KdsRef::TABLE::GLOBAL) {
            Ok(Self::Kds {
                region: reference.read(KdsRef::REGION) as u8,
                id: id as u8,
            })
        } else {
            Err(Fault::BadKey)
        }
    }
}

/// Key region granted by the KDS block.
#[derive(Debug)]
pub struct KdsRegion {
    pub id: u8,
    pub owner_mask: u32,
    pub key_count: u8,
    keys: Vec<KeyEntry>,
}

impl KdsRegion {
    pub fn new(id: u8, owner_mask: u32, key_count: u8) -> Self {
        Self {
            id,
            owner_mask,
            key_count,
            keys: vec![KeyEntry::default(); KDS_MAX_KEYS as usize],
        }
    }

    fn index(&self, region: u8, id: u8) -> Result<usize, Fault> {
        if region != self.id || id == 0 || id as u32 >= KDS_MAX_KEYS {
            return Err(Fault::Kds);
        }
        Ok(id as usize)
    }

    pub fn get(&self, region: u8, id: u8) -> Result<&KeyEntry, Fault> {
        let index = self.index(region, id)?;
        Ok(&self.keys[index])
    }

    pub fn get_mut(&mut self, region: u8, id: u8) -> Result<&mut KeyEntry, Fault> {
        let index = self.index(region, id)?;
        Ok(&mut self.keys[index])
    }
}

/// Local key slots plus the optional KDS region.
#[derive(Debug)]
pub struct KeyTable {
    slots: [KeyEntry; KEYSLOT_COUNT as usize],
    pub kds: Option<KdsRegion>,
}

impl Default for KeyTable {
    fn default() -> Self {
        Self {
            slots: core::array::from_fn(|_| KeyEntry::default()),
            kds: None,
        }
    }
}

impl KeyTable {
    pub fn slot(&self, index: usize) -> Result<&KeyEntry, Fault> {
        self.slots.get(index).ok_or(Fault::BadKey)
    }

    pub fn slot_mut(&mut self, index: usize) -> Result<&mut KeyEntry, Fault> {
        self.slots.get_mut(index).ok_or(Fault::BadKey)
    }

    /// Key usable by a data-path operation: present and of the expected
    /// purpose.
    pub fn usable(&self, index: usize, purpose: u8) -> Result<&KeyEntry, Fault> {
        let entry = self.slot(index)?;
        if entry.is_empty() || entry.purpose() != purpose {
            return Err(Fault::BadKey);
        }
        Ok(entry)
    }

    /// Resolve `location`. KDS locations need the hardware mutex.
    pub fn entry(&self, location: KeyLocation, mutex_held: bool) -> Result<&KeyEntry, Fault> {
        match location {
            KeyLocation::Local(slot) => self.slot(slot),
            KeyLocation::Kds { region, id } => {
                let kds = self.kds.as_ref().filter(|_| mutex_held).ok_or(Fault::Kds)?;
                kds.get(region, id)
            }
        }
    }

    pub fn entry_mut(&mut self, location: KeyLocation, mutex_held: bool) -> Result<&mut KeyEntry, Fault> {
        match location {
            KeyLocation::Local(slot) => self.slot_mut(slot),
            KeyLocation::Kds { region, id } => {
                let kds = self.kds.as_mut().filter(|_| mutex_held).ok_or(Fault::Kds)?;
                kds.get_mut(region, id)
            }
        }
    }
}
