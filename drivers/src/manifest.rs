/*++

Licensed under the Apache-2.0 license.

File Name:

    manifest.rs

Abstract:

    File contains the key manifest, the descriptor that accompanies every key
    written into the engine's key table.

--*/

use bitfield::bitfield;

use crate::alg_table::{Algorithm, Mode};
use crate::{SeError, SeResult};

/// Requester identity recorded in the manifest and the KDS region owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOwner {
    Secure = 1,
    #[default]
    NonSecure = 2,
    Firmware = 3,
}

/// Permitted use of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    Enc = 0,
    Cmac = 1,
    Xts = 4,
    Gcm = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeySizeClass {
    Aes128 = 0,
    Aes192 = 1,
    #[default]
    Aes256 = 2,
}

impl KeySizeClass {
    pub fn from_len(len: usize) -> SeResult<Self> {
        match len {
            16 => Ok(Self::Aes128),
            24 => Ok(Self::Aes192),
            32 => Ok(Self::Aes256),
            _ => Err(SeError::DRIVER_INVALID_KEY_SIZE),
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(Self::Aes128),
            1 => Some(Self::Aes192),
            2 => Some(Self::Aes256),
            _ => None,
        }
    }

    /// Key length in bytes.
    pub fn key_len(self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

bitfield! {
    /// Key Manifest
    #[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
    pub struct KeyManifest(u32);

    /// Requester identity
    pub u8, user, set_user: 6, 4;

    /// Key purpose
    pub u8, purpose, set_purpose: 11, 8;

    /// Key may be exported out of the key table
    pub exportable, set_exportable: 12;

    /// Key may be copied to another slot
    pub clonable, set_clonable: 13;

    /// Key size class
    pub u8, size, set_size: 15, 14;
}

impl From<KeyManifest> for u32 {
    fn from(manifest: KeyManifest) -> Self {
        manifest.0
    }
}

impl From<u32> for KeyManifest {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl KeyManifest {
    /// Size class of the key described by this manifest.
    pub fn size_class(&self) -> Option<KeySizeClass> {
        KeySizeClass::from_bits(self.size() as u32)
    }
}

fn purpose_for(mode: Mode) -> KeyPurpose {
    match mode {
        Mode::Ecb | Mode::Cbc | Mode::Ctr | Mode::Ofb | Mode::Ccm => KeyPurpose::Enc,
        Mode::Xts => KeyPurpose::Xts,
        Mode::Gcm => KeyPurpose::Gcm,
        Mode::Cmac => KeyPurpose::Cmac,
    }
}

/// Build the manifest for a key of `key_len` bytes used by `alg`.
///
/// For XTS `key_len` is the length of one half of the key pair.
///
/// # Arguments
///
/// * `owner` - Requester identity
/// * `alg` - Algorithm the key will be used with
/// * `key_len` - Key length in bytes
///
/// # Returns
///
/// * `u32` - Manifest word
pub fn encode(owner: KeyOwner, alg: Algorithm, key_len: usize) -> SeResult<u32> {
    let size = KeySizeClass::from_len(key_len)?;
    let purpose = purpose_for(alg.mode());
    let supported = match purpose {
        KeyPurpose::Xts => size != KeySizeClass::Aes192,
        KeyPurpose::Enc | KeyPurpose::Cmac | KeyPurpose::Gcm => true,
    };
    if !supported {
        return Err(SeError::DRIVER_MANIFEST_UNSUPPORTED);
    }

    let mut manifest = KeyManifest::default();
    manifest.set_user(owner as u8);
    manifest.set_purpose(purpose as u8);
    manifest.set_exportable(false);
    manifest.set_clonable(false);
    manifest.set_size(size as u8);
    Ok(manifest.into())
}
