// Licensed under the Apache-2.0 license

use se_drivers::{AesCcm, SeError};
use se_test::reference::{ccm_iv, ccm_seal, ecb_encrypt};
use se_test::{is_zeroized, random_bytes, rng, start_default_device, start_local_device, with_emulator};

const LENGTHS: [usize; 5] = [0, 1, 16, 17, 300];

#[test]
fn test_ccm_matches_reference() {
    let device = start_default_device();
    let mut rng = rng(40);
    for key_len in [16, 24, 32] {
        let key = random_bytes(&mut rng, key_len);
        let mut ccm = AesCcm::new(&device);
        ccm.setkey(&key).unwrap();
        for aad_len in LENGTHS {
            for pt_len in LENGTHS {
                let nonce = random_bytes(&mut rng, 13);
                let iv = ccm_iv(&nonce);
                let aad = random_bytes(&mut rng, aad_len);
                let pt = random_bytes(&mut rng, pt_len);
                let expected = ccm_seal(&key, 16, &nonce, &aad, &pt);

                let mut ct = vec![0u8; pt_len + 16];
                ccm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();
                assert_eq!(ct, expected, "key {key_len} aad {aad_len} pt {pt_len}");

                let mut back = vec![0u8; pt_len];
                ccm.decrypt(&iv, &aad, &ct, &mut back).unwrap();
                assert_eq!(back, pt, "key {key_len} aad {aad_len} pt {pt_len}");
            }
        }
    }
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_ccm_tag_sizes() {
    let device = start_default_device();
    let mut rng = rng(41);
    let key = random_bytes(&mut rng, 16);
    let aad = random_bytes(&mut rng, 24);
    let pt = random_bytes(&mut rng, 50);
    let mut ccm = AesCcm::new(&device);
    ccm.setkey(&key).unwrap();

    for authsize in [4, 6, 8, 10, 12, 14, 16] {
        let nonce = random_bytes(&mut rng, 13);
        ccm.setauthsize(authsize).unwrap();
        let mut ct = vec![0u8; pt.len() + authsize];
        ccm.encrypt(&ccm_iv(&nonce), &aad, &pt, &mut ct).unwrap();
        assert_eq!(ct, ccm_seal(&key, authsize, &nonce, &aad, &pt), "authsize {authsize}");
    }

    // Four-byte length field.
    for authsize in [8, 16] {
        let nonce = random_bytes(&mut rng, 11);
        let iv = ccm_iv(&nonce);
        assert_eq!(iv[0], 3);
        ccm.setauthsize(authsize).unwrap();
        let mut ct = vec![0u8; pt.len() + authsize];
        ccm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();
        assert_eq!(ct, ccm_seal(&key, authsize, &nonce, &aad, &pt), "L=4 authsize {authsize}");

        let mut back = vec![0u8; pt.len()];
        ccm.decrypt(&iv, &aad, &ct, &mut back).unwrap();
        assert_eq!(back, pt);
    }
}

#[test]
fn test_ccm_rejects_tampering() {
    let device = start_local_device();
    let mut rng = rng(42);
    let key = random_bytes(&mut rng, 32);
    let nonce = random_bytes(&mut rng, 13);
    let iv = ccm_iv(&nonce);
    let aad = random_bytes(&mut rng, 7);
    let pt = random_bytes(&mut rng, 64);

    let mut ccm = AesCcm::new(&device);
    ccm.setkey(&key).unwrap();
    ccm.setauthsize(8).unwrap();
    let mut ct = vec![0u8; pt.len() + 8];
    ccm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();

    let mut out = vec![0u8; pt.len()];
    for index in [0, 31, pt.len(), ct.len() - 1] {
        let mut bad = ct.clone();
        bad[index] ^= 0x10;
        assert_eq!(
            ccm.decrypt(&iv, &aad, &bad, &mut out),
            Err(SeError::DRIVER_CCM_TAG_MISMATCH),
            "byte {index}"
        );
    }
    assert_eq!(
        ccm.decrypt(&iv, &[], &ct, &mut out),
        Err(SeError::DRIVER_CCM_TAG_MISMATCH)
    );
    ccm.decrypt(&iv, &aad, &ct, &mut out).unwrap();
    assert_eq!(out, pt);
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_ccm_authenticates_plaintext() {
    let device = start_default_device();
    let mut rng = rng(43);
    let key = random_bytes(&mut rng, 16);
    let nonce = random_bytes(&mut rng, 13);
    let iv = ccm_iv(&nonce);
    let aad = random_bytes(&mut rng, 10);
    let pt = random_bytes(&mut rng, 45);

    let mut ccm = AesCcm::new(&device);
    ccm.setkey(&key).unwrap();
    let mut ct = vec![0u8; pt.len() + 16];
    ccm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();

    // The transmitted tag is the CBC-MAC over the plaintext masked with
    // E(K, A0); A0 is the IV with a zero counter.
    let s0 = ecb_encrypt(&key, &iv);
    let tag_over = |data: &[u8]| -> Vec<u8> {
        let mac = ccm.mac(&iv, &aad, data).unwrap();
        mac.iter().zip(s0.iter()).map(|(m, s)| m ^ s).collect()
    };
    assert_eq!(tag_over(&pt), ct[pt.len()..]);
    assert_ne!(tag_over(&ct[..pt.len()]), ct[pt.len()..]);
}

#[test]
fn test_ccm_argument_errors() {
    let device = start_default_device();
    let mut ccm = AesCcm::new(&device);
    let mut out = [0u8; 64];
    assert_eq!(
        ccm.encrypt(&ccm_iv(&[0; 13]), &[], &[0; 16], &mut out),
        Err(SeError::DRIVER_KEY_NOT_SET)
    );
    for authsize in [0, 3, 5, 18] {
        assert_eq!(ccm.setauthsize(authsize), Err(SeError::DRIVER_INVALID_TAG_SIZE));
    }
    ccm.setkey(&[1; 24]).unwrap();

    let mut iv = ccm_iv(&[0; 13]);
    for flags in [0, 8, 0xff] {
        iv[0] = flags;
        assert_eq!(
            ccm.encrypt(&iv, &[], &[0; 16], &mut out),
            Err(SeError::DRIVER_INVALID_IV),
            "flags {flags}"
        );
    }
    assert_eq!(
        ccm.decrypt(&ccm_iv(&[0; 13]), &[], &[0; 4], &mut out),
        Err(SeError::DRIVER_INVALID_LENGTH)
    );
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_ccm_decrypt_length_overflow_touches_nothing() {
    let device = start_default_device();
    let mut ccm = AesCcm::new(&device);
    ccm.setkey(&[3; 16]).unwrap();
    ccm.setauthsize(16).unwrap();

    // 13-byte nonce leaves a 2-byte length field.
    let iv = ccm_iv(&[0x5a; 13]);
    let src = vec![0x11u8; 0x1_0000 + 16];
    let mut dst = vec![0u8; 0x1_0000];
    let before = with_emulator(&device, |se| se.ops_executed());
    assert_eq!(
        ccm.decrypt(&iv, &[], &src, &mut dst),
        Err(SeError::DRIVER_INVALID_LENGTH)
    );
    assert_eq!(with_emulator(&device, |se| se.ops_executed()), before);
    assert!(is_zeroized(&dst));
    assert_eq!(device.dma().in_use(), 0);
}
