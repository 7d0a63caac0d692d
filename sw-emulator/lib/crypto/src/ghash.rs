/*++

Licensed under the Apache-2.0 license.

File Name:

    ghash.rs

Abstract:

    File contains the GHASH universal hash used by GCM.

--*/

use crate::AES_BLOCK_SIZE;

/// Multiply in GF(2^128) with the GCM bit ordering.
pub fn gf128_mul(x: u128, y: u128) -> u128 {
    const R: u128 = 0xe1 << 120;
    let mut z = 0u128;
    let mut v = y;
    for i in 0..128 {
        if (x >> (127 - i)) & 1 != 0 {
            z ^= v;
        }
        v = if v & 1 != 0 { (v >> 1) ^ R } else { v >> 1 };
    }
    z
}

/// Running GHASH state.
#[derive(Clone, Copy, Default)]
pub struct Ghash {
    h: u128,
    y: u128,
}

impl Ghash {
    pub fn new(h: &[u8; AES_BLOCK_SIZE]) -> Self {
        Self {
            h: u128::from_be_bytes(*h),
            y: 0,
        }
    }

    pub fn update_block(&mut self, block: &[u8; AES_BLOCK_SIZE]) {
        self.y = gf128_mul(self.y ^ u128::from_be_bytes(*block), self.h);
    }

    /// Absorb `data`, zero-padding a trailing partial block.
    pub fn update(&mut self, data: &[u8]) {
        for chunk in data.chunks(AES_BLOCK_SIZE) {
            let mut block = [0u8; AES_BLOCK_SIZE];
            block[..chunk.len()].copy_from_slice(chunk);
            self.update_block(&block);
        }
    }

    /// Absorb the final lengths block, both lengths in bits.
    pub fn update_lengths(&mut self, aad_bits: u64, msg_bits: u64) {
        let mut block = [0u8; AES_BLOCK_SIZE];
        block[..8].copy_from_slice(&aad_bits.to_be_bytes());
        block[8..].copy_from_slice(&msg_bits.to_be_bytes());
        self.update_block(&block);
    }

    pub fn digest(&self) -> [u8; AES_BLOCK_SIZE] {
        self.y.to_be_bytes()
    }
}
