// Licensed under the Apache-2.0 license

use se_drivers::{AesGcm, KeyHandle, Mode, SeError, SkCipher, RESERVED_SLOT, RESERVED_SLOT_XTS2};
use se_test::{is_zeroized, random_array, random_bytes, reference, rng, slot_key, start_local_device};

const USABLE_SLOTS: usize = 13;

#[test]
fn test_slots_hold_session_keys() {
    let device = start_local_device();
    let mut rng = rng(1);
    let key = random_bytes(&mut rng, 32);

    let mut cipher = SkCipher::new(&device, Mode::Cbc).unwrap();
    cipher.setkey(&key).unwrap();
    let handle = cipher.keys().unwrap().0.handle();
    let KeyHandle::LocalSlot(slot) = handle else {
        panic!("unexpected handle {handle:?}");
    };
    assert!(handle.is_well_formed());
    assert!(device.slots().is_allocated(slot));
    assert_eq!(slot_key(&device, slot), key);

    drop(cipher);
    assert!(!device.slots().is_allocated(slot));
    assert!(is_zeroized(&slot_key(&device, slot)));
    assert_eq!(device.slots().free_count(), USABLE_SLOTS as u32);
}

#[test]
fn test_setkey_replaces_previous_key() {
    let device = start_local_device();
    let mut cipher = SkCipher::new(&device, Mode::Ecb).unwrap();
    cipher.setkey(&[1; 16]).unwrap();
    let first = cipher.keys().unwrap().0.handle().slot().unwrap();
    cipher.setkey(&[2; 16]).unwrap();
    let second = cipher.keys().unwrap().0.handle().slot().unwrap();

    assert_eq!(device.slots().free_count(), USABLE_SLOTS as u32 - 1);
    assert_eq!(slot_key(&device, second), vec![2; 16]);
    if first != second {
        assert!(is_zeroized(&slot_key(&device, first)));
    }
}

#[test]
fn test_exhaustion_falls_back_to_reserved_slot() {
    let device = start_local_device();
    let mut rng = rng(2);

    let mut sessions = Vec::new();
    for _ in 0..USABLE_SLOTS {
        let mut cipher = SkCipher::new(&device, Mode::Ecb).unwrap();
        cipher.setkey(&random_bytes(&mut rng, 16)).unwrap();
        assert!(matches!(cipher.keys().unwrap().0.handle(), KeyHandle::LocalSlot(_)));
        sessions.push(cipher);
    }
    assert_eq!(device.slots().free_count(), 0);

    let key = random_bytes(&mut rng, 24);
    let mut spill = SkCipher::new(&device, Mode::Ecb).unwrap();
    spill.setkey(&key).unwrap();
    assert_eq!(spill.keys().unwrap().0.handle(), KeyHandle::Reserved(RESERVED_SLOT));

    let pt = random_bytes(&mut rng, 64);
    let mut ct = vec![0u8; pt.len()];
    spill.encrypt(&mut [0; 16], &pt, &mut ct).unwrap();
    assert_eq!(ct, reference::ecb_encrypt(&key, &pt));
    // The reserved slot holds material only for the duration of a request.
    assert!(is_zeroized(&slot_key(&device, RESERVED_SLOT)));

    // Sessions that already own a slot are unaffected.
    let mut out = vec![0u8; 16];
    sessions[0].encrypt(&mut [0; 16], &pt[..16], &mut out).unwrap();
}

#[test]
fn test_aead_does_not_use_reserved_slot() {
    let device = start_local_device();
    let mut sessions = Vec::new();
    for i in 0..USABLE_SLOTS {
        let mut cipher = SkCipher::new(&device, Mode::Cbc).unwrap();
        cipher.setkey(&[i as u8; 16]).unwrap();
        sessions.push(cipher);
    }

    let mut gcm = AesGcm::new(&device);
    assert_eq!(gcm.setkey(&[7; 16]), Err(SeError::DRIVER_KEYSLOT_EXHAUSTED));

    sessions.pop();
    assert_eq!(gcm.setkey(&[7; 16]), Ok(()));
}

#[test]
fn test_xts_spills_into_both_reserved_slots() {
    let device = start_local_device();
    let mut rng = rng(3);
    let mut sessions = Vec::new();
    for _ in 0..USABLE_SLOTS {
        let mut cipher = SkCipher::new(&device, Mode::Ctr).unwrap();
        cipher.setkey(&random_bytes(&mut rng, 16)).unwrap();
        sessions.push(cipher);
    }

    let key = random_bytes(&mut rng, 64);
    let mut xts = SkCipher::new(&device, Mode::Xts).unwrap();
    xts.setkey(&key).unwrap();
    let (k1, k2) = xts.keys().unwrap();
    assert_eq!(k1.handle(), KeyHandle::Reserved(RESERVED_SLOT));
    assert!(matches!(k2.map(|k| k.handle()), Some(KeyHandle::Reserved(_))));

    let iv: [u8; 16] = random_array(&mut rng);
    let pt = random_bytes(&mut rng, 96);
    let mut ct = vec![0u8; pt.len()];
    xts.encrypt(&mut iv.clone(), &pt, &mut ct).unwrap();
    assert_eq!(ct, reference::xts_apply(&key, &iv, &pt, false));
    assert!(is_zeroized(&slot_key(&device, RESERVED_SLOT)));
    assert!(is_zeroized(&slot_key(&device, RESERVED_SLOT_XTS2)));
}

#[test]
fn test_no_slot_leak_after_many_sessions() {
    let device = start_local_device();
    for i in 0..100u8 {
        let mut cipher = SkCipher::new(&device, Mode::Ofb).unwrap();
        cipher.setkey(&[i; 32]).unwrap();
    }
    assert_eq!(device.slots().free_count(), USABLE_SLOTS as u32);
    assert_eq!(device.dma().in_use(), 0);
}
