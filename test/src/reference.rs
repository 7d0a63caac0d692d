// Licensed under the Apache-2.0 license

//! Independent software references for every mode the engine offers.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use cipher::block_padding::NoPadding;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use ccm::consts::{U10, U11, U12 as N12, U13, U14, U16, U4, U6, U8};
use ccm::Ccm;
use cmac::{Cmac, Mac};
use se_emu_crypto::{xts_mul_alpha, AesBlock};

fn xor_in_place(block: &mut [u8; 16], other: &[u8; 16]) {
    for (b, o) in block.iter_mut().zip(other.iter()) {
        *b ^= o;
    }
}

fn block(chunk: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..chunk.len()].copy_from_slice(chunk);
    out
}

pub fn ecb_encrypt(key: &[u8], pt: &[u8]) -> Vec<u8> {
    let aes = AesBlock::new(key).unwrap();
    pt.chunks(16).flat_map(|c| aes.encrypt_block(&block(c))).collect()
}

pub fn cbc_encrypt(key: &[u8], iv: &[u8; 16], pt: &[u8]) -> Vec<u8> {
    match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<NoPadding>(pt),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<NoPadding>(pt),
        _ => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .unwrap()
            .encrypt_padded_vec_mut::<NoPadding>(pt),
    }
}

pub fn cbc_decrypt(key: &[u8], iv: &[u8; 16], ct: &[u8]) -> Vec<u8> {
    match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .unwrap()
            .decrypt_padded_vec_mut::<NoPadding>(ct)
            .unwrap(),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .unwrap()
            .decrypt_padded_vec_mut::<NoPadding>(ct)
            .unwrap(),
        _ => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .unwrap()
            .decrypt_padded_vec_mut::<NoPadding>(ct)
            .unwrap(),
    }
}

pub fn ctr_apply(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    match key.len() {
        16 => ctr::Ctr128BE::<Aes128>::new_from_slices(key, iv)
            .unwrap()
            .apply_keystream(&mut out),
        24 => ctr::Ctr128BE::<Aes192>::new_from_slices(key, iv)
            .unwrap()
            .apply_keystream(&mut out),
        _ => ctr::Ctr128BE::<Aes256>::new_from_slices(key, iv)
            .unwrap()
            .apply_keystream(&mut out),
    }
    out
}

pub fn ofb_apply(key: &[u8], iv: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let aes = AesBlock::new(key).unwrap();
    let mut state = *iv;
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks(16) {
        state = aes.encrypt_block(&state);
        out.extend(chunk.iter().zip(state.iter()).map(|(d, k)| d ^ k));
    }
    out
}

/// XTS over whole blocks with a 16-byte little-endian tweak input.
pub fn xts_apply(key: &[u8], iv: &[u8; 16], data: &[u8], decrypt: bool) -> Vec<u8> {
    let half = key.len() / 2;
    let aes = AesBlock::new(&key[..half]).unwrap();
    let mut tweak = AesBlock::new(&key[half..]).unwrap().encrypt_block(iv);
    let mut out = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(16) {
        let mut b = block(chunk);
        xor_in_place(&mut b, &tweak);
        let mut b = if decrypt {
            aes.decrypt_block(&b)
        } else {
            aes.encrypt_block(&b)
        };
        xor_in_place(&mut b, &tweak);
        out.extend_from_slice(&b);
        xts_mul_alpha(&mut tweak);
    }
    out
}

fn aead_seal<C: AeadInPlace + KeyInit>(key: &[u8], nonce: &[u8], aad: &[u8], pt: &[u8]) -> Vec<u8> {
    let cipher = C::new_from_slice(key).unwrap();
    let mut buf = pt.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buf)
        .unwrap();
    buf.extend_from_slice(&tag);
    buf
}

/// GCM ciphertext followed by the full 16-byte tag.
pub fn gcm_seal(key: &[u8], iv: &[u8; 12], aad: &[u8], pt: &[u8]) -> Vec<u8> {
    match key.len() {
        16 => aead_seal::<aes_gcm::Aes128Gcm>(key, iv, aad, pt),
        24 => aead_seal::<aes_gcm::AesGcm<Aes192, U12>>(key, iv, aad, pt),
        _ => aead_seal::<aes_gcm::Aes256Gcm>(key, iv, aad, pt),
    }
}

macro_rules! ccm_seal_tag {
    ($cipher:ty, $tag:expr, $nonce_len:expr, $key:expr, $nonce:expr, $aad:expr, $pt:expr) => {
        match ($tag, $nonce_len) {
            (4, 13) => aead_seal::<Ccm<$cipher, U4, U13>>($key, $nonce, $aad, $pt),
            (6, 13) => aead_seal::<Ccm<$cipher, U6, U13>>($key, $nonce, $aad, $pt),
            (8, 13) => aead_seal::<Ccm<$cipher, U8, U13>>($key, $nonce, $aad, $pt),
            (10, 13) => aead_seal::<Ccm<$cipher, U10, U13>>($key, $nonce, $aad, $pt),
            (12, 13) => aead_seal::<Ccm<$cipher, N12, U13>>($key, $nonce, $aad, $pt),
            (14, 13) => aead_seal::<Ccm<$cipher, U14, U13>>($key, $nonce, $aad, $pt),
            (16, 13) => aead_seal::<Ccm<$cipher, U16, U13>>($key, $nonce, $aad, $pt),
            (8, 11) => aead_seal::<Ccm<$cipher, U8, U11>>($key, $nonce, $aad, $pt),
            (16, 11) => aead_seal::<Ccm<$cipher, U16, U11>>($key, $nonce, $aad, $pt),
            _ => panic!("no reference for tag {} nonce {}", $tag, $nonce_len),
        }
    };
}

/// CCM ciphertext followed by a `tag_len` tag. `nonce` is 13 or 11 bytes.
pub fn ccm_seal(key: &[u8], tag_len: usize, nonce: &[u8], aad: &[u8], pt: &[u8]) -> Vec<u8> {
    match key.len() {
        16 => ccm_seal_tag!(Aes128, tag_len, nonce.len(), key, nonce, aad, pt),
        24 => ccm_seal_tag!(Aes192, tag_len, nonce.len(), key, nonce, aad, pt),
        _ => ccm_seal_tag!(Aes256, tag_len, nonce.len(), key, nonce, aad, pt),
    }
}

/// Engine IV for a CCM nonce: `L - 1` followed by the nonce.
pub fn ccm_iv(nonce: &[u8]) -> [u8; 16] {
    let l = 15 - nonce.len();
    let mut iv = [0u8; 16];
    iv[0] = (l - 1) as u8;
    iv[1..1 + nonce.len()].copy_from_slice(nonce);
    iv
}

fn cmac_with<M: Mac + KeyInit>(key: &[u8], data: &[u8]) -> [u8; 16] {
    let mut mac = <M as KeyInit>::new_from_slice(key).unwrap();
    mac.update(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

pub fn cmac(key: &[u8], data: &[u8]) -> [u8; 16] {
    match key.len() {
        16 => cmac_with::<Cmac<Aes128>>(key, data),
        24 => cmac_with::<Cmac<Aes192>>(key, data),
        _ => cmac_with::<Cmac<Aes256>>(key, data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ofb_first_block_is_encrypted_iv() {
        let key = [0u8; 16];
        let iv = [0u8; 16];
        let out = ofb_apply(&key, &iv, &[0u8; 16]);
        assert_eq!(out, ecb_encrypt(&key, &[0u8; 16]));
    }

    #[test]
    fn test_ccm_iv_layout() {
        let iv = ccm_iv(&[0xaa; 13]);
        assert_eq!(iv[0], 1);
        assert_eq!(&iv[1..14], &[0xaa; 13]);
        assert_eq!(&iv[14..], &[0, 0]);
    }
}
