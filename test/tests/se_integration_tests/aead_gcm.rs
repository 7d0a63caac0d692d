// Licensed under the Apache-2.0 license

use se_drivers::{AesGcm, DeviceParams, SeError};
use se_emu_periph::SecurityEngineArgs;
use se_test::{random_array, random_bytes, reference, rng, start_default_device, start_device, TestDevice};

const LENGTHS: [usize; 5] = [0, 1, 16, 17, 1000];

fn software_verify_device() -> TestDevice {
    start_device(
        DeviceParams {
            gcm_hw_verify: false,
            ..Default::default()
        },
        SecurityEngineArgs::default(),
    )
}

#[test]
fn test_gcm_matches_reference() {
    let device = start_default_device();
    let mut rng = rng(30);
    for key_len in [16, 24, 32] {
        let key = random_bytes(&mut rng, key_len);
        let mut gcm = AesGcm::new(&device);
        gcm.setkey(&key).unwrap();
        for aad_len in LENGTHS {
            for pt_len in LENGTHS {
                let iv: [u8; 12] = random_array(&mut rng);
                let aad = random_bytes(&mut rng, aad_len);
                let pt = random_bytes(&mut rng, pt_len);
                let expected = reference::gcm_seal(&key, &iv, &aad, &pt);

                let mut ct = vec![0u8; pt_len + 16];
                gcm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();
                assert_eq!(ct, expected, "key {key_len} aad {aad_len} pt {pt_len}");

                let mut back = vec![0u8; pt_len];
                gcm.decrypt(&iv, &aad, &ct, &mut back).unwrap();
                assert_eq!(back, pt, "key {key_len} aad {aad_len} pt {pt_len}");
            }
        }
    }
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_gcm_truncated_tags() {
    let mut rng = rng(31);
    for device in [start_default_device(), software_verify_device()] {
        let key = random_bytes(&mut rng, 32);
        let iv: [u8; 12] = random_array(&mut rng);
        let aad = random_bytes(&mut rng, 20);
        let pt = random_bytes(&mut rng, 33);
        let full = reference::gcm_seal(&key, &iv, &aad, &pt);

        let mut gcm = AesGcm::new(&device);
        gcm.setkey(&key).unwrap();
        for authsize in [4, 8, 12, 13, 14, 15, 16] {
            gcm.setauthsize(authsize).unwrap();
            let mut ct = vec![0u8; pt.len() + authsize];
            gcm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();
            assert_eq!(ct, full[..pt.len() + authsize], "authsize {authsize}");

            let mut back = vec![0u8; pt.len()];
            gcm.decrypt(&iv, &aad, &ct, &mut back).unwrap();
            assert_eq!(back, pt);
        }
    }
}

#[test]
fn test_gcm_rejects_tampering() {
    let mut rng = rng(32);
    for device in [start_default_device(), software_verify_device()] {
        let key = random_bytes(&mut rng, 16);
        let iv: [u8; 12] = random_array(&mut rng);
        let aad = random_bytes(&mut rng, 16);
        let pt = random_bytes(&mut rng, 40);

        let mut gcm = AesGcm::new(&device);
        gcm.setkey(&key).unwrap();
        let mut ct = vec![0u8; pt.len() + 16];
        gcm.encrypt(&iv, &aad, &pt, &mut ct).unwrap();
        let mut out = vec![0u8; pt.len()];

        for index in [0, pt.len() - 1, pt.len(), ct.len() - 1] {
            let mut bad = ct.clone();
            bad[index] ^= 0x01;
            assert_eq!(
                gcm.decrypt(&iv, &aad, &bad, &mut out),
                Err(SeError::DRIVER_GCM_TAG_MISMATCH),
                "byte {index}"
            );
        }

        let mut bad_aad = aad.clone();
        bad_aad[3] ^= 0x80;
        assert_eq!(
            gcm.decrypt(&iv, &bad_aad, &ct, &mut out),
            Err(SeError::DRIVER_GCM_TAG_MISMATCH)
        );
        assert_eq!(
            gcm.decrypt(&[0; 12], &aad, &ct, &mut out),
            Err(SeError::DRIVER_GCM_TAG_MISMATCH)
        );

        gcm.decrypt(&iv, &aad, &ct, &mut out).unwrap();
        assert_eq!(out, pt);
        assert_eq!(device.dma().in_use(), 0);
    }
}

#[test]
fn test_gcm_argument_errors() {
    let device = start_default_device();
    let mut gcm = AesGcm::new(&device);
    let mut out = [0u8; 64];
    assert_eq!(
        gcm.encrypt(&[0; 12], &[], &[0; 16], &mut out),
        Err(SeError::DRIVER_KEY_NOT_SET)
    );
    assert_eq!(gcm.setkey(&[0; 17]), Err(SeError::DRIVER_INVALID_KEY_SIZE));
    for authsize in [0, 2, 5, 11, 17] {
        assert_eq!(gcm.setauthsize(authsize), Err(SeError::DRIVER_INVALID_TAG_SIZE));
    }
    gcm.setkey(&[0; 16]).unwrap();

    // Room for the ciphertext but not the tag.
    assert_eq!(
        gcm.encrypt(&[0; 12], &[], &[0; 16], &mut out[..20]),
        Err(SeError::DRIVER_INVALID_SLICE)
    );
    // Shorter than the tag.
    assert_eq!(
        gcm.decrypt(&[0; 12], &[], &[0; 15], &mut out),
        Err(SeError::DRIVER_INVALID_LENGTH)
    );
}
