/*++

Licensed under the Apache-2.0 license.

File Name:

    alg_table.rs

Abstract:

    File contains the algorithm identities handled by the engine and the
    descriptors advertised to the crypto framework.

--*/

use crate::cmac::CmacState;

pub const AES_BLOCK_SIZE: usize = 16;
pub const AES_MIN_KEY_SIZE: usize = 16;
pub const AES_MAX_KEY_SIZE: usize = 32;
pub const GCM_IV_SIZE: usize = 12;

/// Cipher mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Ecb,
    Cbc,
    Ctr,
    Ofb,
    Xts,
    Gcm,
    Ccm,
    Cmac,
}

/// Algorithm identity. AES is the only block cipher the engine exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Aes(Mode),
}

impl Algorithm {
    pub fn mode(self) -> Mode {
        match self {
            Algorithm::Aes(mode) => mode,
        }
    }

    pub fn block_size(self) -> usize {
        match self {
            Algorithm::Aes(_) => AES_BLOCK_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Framework-facing class of an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgType {
    Skcipher,
    Aead,
    Ahash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgDescriptor {
    pub name: &'static str,
    pub driver_name: &'static str,
    pub alg: Algorithm,
    pub alg_type: AlgType,
    pub min_keysize: usize,
    pub max_keysize: usize,
    pub ivsize: usize,
    pub blocksize: usize,
    /// Largest tag (AEAD) or digest (hash).
    pub maxauthsize: usize,
    /// Software state carried per request.
    pub ctxsize: usize,
}

const IV_CTX: usize = AES_BLOCK_SIZE;
const AEAD_CTX: usize = 2 * AES_BLOCK_SIZE;

const fn skcipher(
    name: &'static str,
    driver_name: &'static str,
    mode: Mode,
    ivsize: usize,
    blocksize: usize,
) -> AlgDescriptor {
    AlgDescriptor {
        name,
        driver_name,
        alg: Algorithm::Aes(mode),
        alg_type: AlgType::Skcipher,
        min_keysize: AES_MIN_KEY_SIZE,
        max_keysize: AES_MAX_KEY_SIZE,
        ivsize,
        blocksize,
        maxauthsize: 0,
        ctxsize: IV_CTX,
    }
}

pub static ALGORITHMS: [AlgDescriptor; 8] = [
    skcipher("ecb(aes)", "ecb-aes-se", Mode::Ecb, 0, AES_BLOCK_SIZE),
    skcipher("cbc(aes)", "cbc-aes-se", Mode::Cbc, AES_BLOCK_SIZE, AES_BLOCK_SIZE),
    skcipher("ctr(aes)", "ctr-aes-se", Mode::Ctr, AES_BLOCK_SIZE, 1),
    skcipher("ofb(aes)", "ofb-aes-se", Mode::Ofb, AES_BLOCK_SIZE, 1),
    AlgDescriptor {
        min_keysize: 2 * AES_MIN_KEY_SIZE,
        max_keysize: 2 * AES_MAX_KEY_SIZE,
        ..skcipher("xts(aes)", "xts-aes-se", Mode::Xts, AES_BLOCK_SIZE, AES_BLOCK_SIZE)
    },
    AlgDescriptor {
        name: "gcm(aes)",
        driver_name: "gcm-aes-se",
        alg: Algorithm::Aes(Mode::Gcm),
        alg_type: AlgType::Aead,
        min_keysize: AES_MIN_KEY_SIZE,
        max_keysize: AES_MAX_KEY_SIZE,
        ivsize: GCM_IV_SIZE,
        blocksize: 1,
        maxauthsize: AES_BLOCK_SIZE,
        ctxsize: AEAD_CTX,
    },
    AlgDescriptor {
        name: "ccm(aes)",
        driver_name: "ccm-aes-se",
        alg: Algorithm::Aes(Mode::Ccm),
        alg_type: AlgType::Aead,
        min_keysize: AES_MIN_KEY_SIZE,
        max_keysize: AES_MAX_KEY_SIZE,
        ivsize: AES_BLOCK_SIZE,
        blocksize: 1,
        maxauthsize: AES_BLOCK_SIZE,
        ctxsize: AEAD_CTX,
    },
    AlgDescriptor {
        name: "cmac(aes)",
        driver_name: "cmac-aes-se",
        alg: Algorithm::Aes(Mode::Cmac),
        alg_type: AlgType::Ahash,
        min_keysize: AES_MIN_KEY_SIZE,
        max_keysize: AES_MAX_KEY_SIZE,
        ivsize: 0,
        blocksize: AES_BLOCK_SIZE,
        maxauthsize: AES_BLOCK_SIZE,
        ctxsize: core::mem::size_of::<CmacState>(),
    },
];

/// Look up a descriptor by framework name.
pub fn find(name: &str) -> Option<&'static AlgDescriptor> {
    ALGORITHMS.iter().find(|d| d.name == name)
}
