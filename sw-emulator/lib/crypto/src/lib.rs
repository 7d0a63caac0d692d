/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the emulated security engine crypto library.

--*/

mod aes_block;
mod gf128;
mod ghash;

pub use aes_block::AesBlock;
pub use gf128::{cmac_double, cmac_subkeys, xts_mul_alpha};
pub use ghash::{gf128_mul, Ghash};

pub const AES_BLOCK_SIZE: usize = 16;
