// Licensed under the Apache-2.0 license

use se_drivers::{AesCmac, AesGcm, Mode, SkCipher, CMAC_DIGEST_SIZE};
use se_test::{random_array, random_bytes, reference, rng, start_default_device, start_local_device, TestDevice};

fn worker(device: &TestDevice, seed: u64) {
    let mut rng = rng(seed);
    let key = random_bytes(&mut rng, 32);
    let mut cbc = SkCipher::new(device, Mode::Cbc).unwrap();
    cbc.setkey(&key).unwrap();
    let mut gcm = AesGcm::new(device);
    gcm.setkey(&key[..16]).unwrap();
    let mut cmac = AesCmac::new(device);
    cmac.setkey(&key[..24]).unwrap();

    for _ in 0..10 {
        let iv: [u8; 16] = random_array(&mut rng);
        let pt = random_bytes(&mut rng, 128);

        let mut ct = vec![0u8; pt.len()];
        cbc.encrypt(&mut iv.clone(), &pt, &mut ct).unwrap();
        assert_eq!(ct, reference::cbc_encrypt(&key, &iv, &pt));

        let nonce: [u8; 12] = random_array(&mut rng);
        let mut sealed = vec![0u8; pt.len() + 16];
        gcm.encrypt(&nonce, &iv, &pt, &mut sealed).unwrap();
        assert_eq!(sealed, reference::gcm_seal(&key[..16], &nonce, &iv, &pt));

        let mut mac = [0u8; CMAC_DIGEST_SIZE];
        cmac.digest(&pt[..77], &mut mac).unwrap();
        assert_eq!(mac, reference::cmac(&key[..24], &pt[..77]));
    }
}

#[test]
fn test_parallel_sessions_with_kds() {
    let device = start_default_device();
    std::thread::scope(|s| {
        for seed in 0..4 {
            let device = &device;
            s.spawn(move || worker(device, 100 + seed));
        }
    });
    assert_eq!(device.slots().free_count(), 13);
    assert_eq!(device.kds().unwrap().bitmap(), 1);
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_parallel_sessions_local_slots() {
    // Four workers with three keys each fit in the local slots.
    let device = start_local_device();
    std::thread::scope(|s| {
        for seed in 0..4 {
            let device = &device;
            s.spawn(move || worker(device, 200 + seed));
        }
    });
    assert_eq!(device.slots().free_count(), 13);
    assert_eq!(device.dma().in_use(), 0);
}
