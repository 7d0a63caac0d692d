/*++

Licensed under the Apache-2.0 license.

File Name:

    datapath.rs

Abstract:

    File contains the emulated AES datapath: the configurable block
    pipeline, XTS, GCM, CMAC and CBC-MAC.

--*/

use se_drivers::regs::CryptoConfig;
use se_emu_crypto::{cmac_subkeys, xts_mul_alpha, AesBlock, Ghash, AES_BLOCK_SIZE};
use tock_registers::LocalRegisterCopy;

use crate::Fault;

type Block = [u8; AES_BLOCK_SIZE];

fn xor(a: &Block, b: &Block) -> Block {
    let mut out = *a;
    for (o, b) in out.iter_mut().zip(b.iter()) {
        *o ^= b;
    }
    out
}

/// Copy up to 16 bytes into a zero-padded block.
fn load(chunk: &[u8]) -> Block {
    let mut block = [0u8; AES_BLOCK_SIZE];
    block[..chunk.len()].copy_from_slice(chunk);
    block
}

fn cipher(key: &[u8]) -> Result<AesBlock, Fault> {
    AesBlock::new(key).ok_or(Fault::BadKey)
}

/// Run the block pipeline described by `crypto_config` over `data`.
///
/// Per block the input mux picks memory, the previous AES output or the
/// linear counter. The XOR stage sits before the cipher (TOP) or after it
/// (BOTTOM), and the VCTR register is reloaded from the output, the
/// previous input block or left at the IV.
pub fn basic(key: &[u8], decrypt: bool, crypto_config: u32, iv: &Block, data: &[u8]) -> Result<Vec<u8>, Fault> {
    let aes = cipher(key)?;
    let cfg = LocalRegisterCopy::<u32, CryptoConfig::Register>::new(crypto_config);
    let input_sel = cfg.read_as_enum(CryptoConfig::INPUT_SEL).ok_or(Fault::BadConfig)?;
    let xor_pos: CryptoConfig::XOR_POS::Value = cfg.read_as_enum(CryptoConfig::XOR_POS).ok_or(Fault::BadConfig)?;
    let vctram_sel = cfg.read_as_enum(CryptoConfig::VCTRAM_SEL).ok_or(Fault::BadConfig)?;
    let step = cfg.read(CryptoConfig::CTR_CNTN) as u128;

    let mut vctr = *iv;
    let mut ctr = u128::from_be_bytes(*iv);
    let mut feedback = *iv;
    let mut out = Vec::with_capacity(data.len());

    for chunk in data.chunks(AES_BLOCK_SIZE) {
        let block = load(chunk);
        let mut cin = match input_sel {
            CryptoConfig::INPUT_SEL::Value::MEMORY => block,
            CryptoConfig::INPUT_SEL::Value::AES_OUT => feedback,
            CryptoConfig::INPUT_SEL::Value::LINEAR_CTR => ctr.to_be_bytes(),
        };
        if xor_pos == CryptoConfig::XOR_POS::Value::TOP {
            cin = xor(&cin, &vctr);
        }
        let cout = if decrypt {
            aes.decrypt_block(&cin)
        } else {
            aes.encrypt_block(&cin)
        };
        let result = if xor_pos == CryptoConfig::XOR_POS::Value::BOTTOM {
            match input_sel {
                CryptoConfig::INPUT_SEL::Value::MEMORY => xor(&cout, &vctr),
                _ => xor(&cout, &block),
            }
        } else {
            cout
        };

        feedback = cout;
        match vctram_sel {
            CryptoConfig::VCTRAM_SEL::Value::AES_OUT => vctr = result,
            CryptoConfig::VCTRAM_SEL::Value::PREV_MEMORY => vctr = block,
            CryptoConfig::VCTRAM_SEL::Value::IV => {}
        }
        ctr = ctr.wrapping_add(step);
        out.extend_from_slice(&result[..chunk.len()]);
    }
    Ok(out)
}

/// XTS over whole blocks. The tweak is `E(key2, iv)`.
pub fn xts(key: &[u8], key2: &[u8], decrypt: bool, iv: &Block, data: &[u8]) -> Result<Vec<u8>, Fault> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(Fault::BadConfig);
    }
    let aes = cipher(key)?;
    let mut tweak = cipher(key2)?.encrypt_block(iv);
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(AES_BLOCK_SIZE) {
        let pp = xor(&load(chunk), &tweak);
        let cc = if decrypt {
            aes.decrypt_block(&pp)
        } else {
            aes.encrypt_block(&pp)
        };
        out.extend_from_slice(&xor(&cc, &tweak));
        xts_mul_alpha(&mut tweak);
    }
    Ok(out)
}

/// CBC-MAC of whole blocks chained from `iv`.
pub fn cbc_mac(key: &[u8], iv: &Block, data: &[u8]) -> Result<Block, Fault> {
    if data.len() % AES_BLOCK_SIZE != 0 {
        return Err(Fault::BadConfig);
    }
    let aes = cipher(key)?;
    let mut state = *iv;
    for chunk in data.chunks_exact(AES_BLOCK_SIZE) {
        state = aes.encrypt_block(&xor(&state, &load(chunk)));
    }
    Ok(state)
}

/// One CMAC operation chained from `iv`.
///
/// Without `last` the data must be whole blocks and the result is the
/// chaining value. With `last` the final block takes the K1 or K2 subkey.
pub fn cmac(key: &[u8], iv: &Block, data: &[u8], last: bool) -> Result<Block, Fault> {
    if !last {
        return cbc_mac(key, iv, data);
    }
    let aes = cipher(key)?;
    let (k1, k2) = cmac_subkeys(&aes);
    let split = data.len().saturating_sub(1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
    let (head, tail) = data.split_at(split);
    let mut state = cbc_mac(key, iv, head)?;

    let last_block = if tail.len() == AES_BLOCK_SIZE {
        xor(&load(tail), &k1)
    } else {
        let mut block = load(tail);
        block[tail.len()] = 0x80;
        xor(&block, &k2)
    };
    state = aes.encrypt_block(&xor(&state, &last_block));
    Ok(state)
}

fn inc32(block: &mut Block) {
    let ctr = u32::from_be_bytes([block[12], block[13], block[14], block[15]]).wrapping_add(1);
    block[12..].copy_from_slice(&ctr.to_be_bytes());
}

/// GCM running state, carried across sub-operations until the next INIT.
pub struct GcmState {
    aes: AesBlock,
    j0: Block,
    ctr: Block,
    ghash: Ghash,
    tag: Option<Block>,
}

impl GcmState {
    pub fn new(key: &[u8], j0: &Block) -> Result<Self, Fault> {
        let aes = cipher(key)?;
        let ghash = Ghash::new(&aes.encrypt_block(&[0u8; AES_BLOCK_SIZE]));
        let mut ctr = *j0;
        inc32(&mut ctr);
        Ok(Self {
            aes,
            j0: *j0,
            ctr,
            ghash,
            tag: None,
        })
    }

    pub fn gmac(&mut self, aad: &[u8]) {
        self.ghash.update(aad);
    }

    /// Counter mode from `J0 + 1`, hashing the ciphertext side.
    pub fn crypt(&mut self, decrypt: bool, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(AES_BLOCK_SIZE) {
            let keystream = self.aes.encrypt_block(&self.ctr);
            inc32(&mut self.ctr);
            let start = out.len();
            out.extend(chunk.iter().zip(keystream.iter()).map(|(d, k)| d ^ k));
            let ciphertext = if decrypt { chunk } else { &out[start..] };
            let block = load(ciphertext);
            self.ghash.update_block(&block);
        }
        out
    }

    /// Close the hash with the lengths block and produce the tag.
    pub fn finalize(&mut self, aad_bits: u64, msg_bits: u64) -> Block {
        self.ghash.update_lengths(aad_bits, msg_bits);
        let tag = xor(&self.aes.encrypt_block(&self.j0), &self.ghash.digest());
        self.tag = Some(tag);
        tag
    }

    /// Compare the computed tag against `received`.
    pub fn verify(&self, received: &[u8]) -> bool {
        match self.tag {
            Some(tag) => !received.is_empty() && received.len() <= AES_BLOCK_SIZE && tag[..received.len()] == *received,
            None => false,
        }
    }
}
