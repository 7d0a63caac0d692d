/*++

Licensed under the Apache-2.0 license.

File Name:

    aes_block.rs

Abstract:

    File contains single-block AES over all three key sizes.

--*/

use crate::AES_BLOCK_SIZE;
use aes::{Aes128, Aes192, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

/// Expanded AES key of any supported size.
#[derive(Clone)]
pub enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    /// Returns `None` unless `key` is 16, 24 or 32 bytes.
    pub fn new(key: &[u8]) -> Option<Self> {
        match key.len() {
            16 => Aes128::new_from_slice(key).ok().map(Self::Aes128),
            24 => Aes192::new_from_slice(key).ok().map(Self::Aes192),
            32 => Aes256::new_from_slice(key).ok().map(Self::Aes256),
            _ => None,
        }
    }

    pub fn encrypt_block(&self, block: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
        let mut block = GenericArray::from(*block);
        match self {
            Self::Aes128(c) => c.encrypt_block(&mut block),
            Self::Aes192(c) => c.encrypt_block(&mut block),
            Self::Aes256(c) => c.encrypt_block(&mut block),
        }
        block.into()
    }

    pub fn decrypt_block(&self, block: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
        let mut block = GenericArray::from(*block);
        match self {
            Self::Aes128(c) => c.decrypt_block(&mut block),
            Self::Aes192(c) => c.decrypt_block(&mut block),
            Self::Aes256(c) => c.decrypt_block(&mut block),
        }
        block.into()
    }
}
