/*++

Licensed under the Apache-2.0 license.

File Name:

    gf128.rs

Abstract:

    File contains GF(2^128) doubling for the XTS tweak and CMAC subkeys.

--*/

use crate::{AesBlock, AES_BLOCK_SIZE};

/// Multiply the XTS tweak by alpha. The tweak is little-endian.
pub fn xts_mul_alpha(tweak: &mut [u8; AES_BLOCK_SIZE]) {
    let mut carry = 0u8;
    for byte in tweak.iter_mut() {
        let next = *byte >> 7;
        *byte = (*byte << 1) | carry;
        carry = next;
    }
    if carry != 0 {
        tweak[0] ^= 0x87;
    }
}

/// Big-endian doubling used to derive CMAC subkeys.
pub fn cmac_double(block: &[u8; AES_BLOCK_SIZE]) -> [u8; AES_BLOCK_SIZE] {
    let value = u128::from_be_bytes(*block);
    let mut doubled = value << 1;
    if value >> 127 != 0 {
        doubled ^= 0x87;
    }
    doubled.to_be_bytes()
}

/// CMAC subkeys `(K1, K2)` for `cipher`.
pub fn cmac_subkeys(cipher: &AesBlock) -> ([u8; AES_BLOCK_SIZE], [u8; AES_BLOCK_SIZE]) {
    let l = cipher.encrypt_block(&[0u8; AES_BLOCK_SIZE]);
    let k1 = cmac_double(&l);
    let k2 = cmac_double(&k1);
    (k1, k2)
}
