// Licensed under the Apache-2.0 license

use se_drivers::{AesGcm, DeviceParams, Mode, SeError, SeErrorKind, SkCipher};
use se_emu_periph::SecurityEngineArgs;
use se_test::{
    is_zeroized, random_array, random_bytes, reference, rng, slot_key, start_default_device, start_device,
    start_local_device, with_emulator, CLOCK_STEP, DMA_SIZE,
};

#[test]
fn test_hung_engine_times_out() {
    let device = start_local_device();
    let mut cipher = SkCipher::new(&device, Mode::Cbc).unwrap();
    cipher.setkey(&[1; 16]).unwrap();
    with_emulator(&device, |se| se.args_mut().hang = true);

    let readings = || device.with_engine(|engine| engine.clock().readings()).unwrap();
    let before = readings();
    let mut out = [0u8; 32];
    let err = cipher.encrypt(&mut [0; 16], &[0; 32], &mut out).unwrap_err();
    assert_eq!(err, SeError::DRIVER_ENGINE_SYNCPT_TIMEOUT);
    assert_eq!(err.kind(), SeErrorKind::HardwareTimeout);
    // The wait is bounded by the configured budget on the clock.
    let budget = (device.params().timeout.as_nanos() / CLOCK_STEP.as_nanos()) as u64;
    assert!(readings() - before >= budget);
    assert_eq!(device.dma().in_use(), 0);
}

#[test]
fn test_failed_zeroization_keeps_slot_allocated() {
    let device = start_local_device();
    let free = device.slots().free_count();
    with_emulator(&device, |se| se.args_mut().hang = true);

    let mut cipher = SkCipher::new(&device, Mode::Ecb).unwrap();
    assert_eq!(cipher.setkey(&[2; 16]), Err(SeError::DRIVER_ENGINE_SYNCPT_TIMEOUT));
    // The slot could not be scrubbed, so it is not handed out again.
    assert_eq!(device.slots().free_count(), free - 1);
}

#[test]
fn test_error_status_is_reported_and_cleared() {
    let device = start_local_device();
    let mut rng = rng(60);
    let key = random_bytes(&mut rng, 32);
    let mut cipher = SkCipher::new(&device, Mode::Ecb).unwrap();
    cipher.setkey(&key).unwrap();

    with_emulator(&device, |se| se.args_mut().error_on_next_op = true);
    let pt = random_bytes(&mut rng, 48);
    let mut ct = vec![0u8; 48];
    let err = cipher.encrypt(&mut [0; 16], &pt, &mut ct).unwrap_err();
    assert_eq!(err, SeError::DRIVER_ENGINE_STATUS_ERROR);
    assert_eq!(err.kind(), SeErrorKind::HardwareReportedError);

    cipher.encrypt(&mut [0; 16], &pt, &mut ct).unwrap();
    assert_eq!(ct, reference::ecb_encrypt(&key, &pt));
}

#[test]
fn test_xts_second_key_failure_scrubs_first() {
    let device = start_local_device();
    let free = device.slots().free_count();
    let mut rng = rng(61);
    let key = random_bytes(&mut rng, 64);
    let mut cipher = SkCipher::new(&device, Mode::Xts).unwrap();

    // The first half lands in slot 1, the insert of the second half fails.
    with_emulator(&device, |se| se.args_mut().error_after_ops = Some(1));
    assert_eq!(cipher.setkey(&key), Err(SeError::DRIVER_ENGINE_STATUS_ERROR));
    assert_eq!(device.slots().free_count(), free);
    assert!(is_zeroized(&slot_key(&device, 1)));

    cipher.setkey(&key).unwrap();
    let iv = random_array::<16>(&mut rng);
    let pt = random_bytes(&mut rng, 64);
    let mut ct = vec![0u8; 64];
    cipher.encrypt(&mut iv.clone(), &pt, &mut ct).unwrap();
    assert_eq!(ct, reference::xts_apply(&key, &iv, &pt, false));
}

#[test]
fn test_aead_error_status() {
    let device = start_default_device();
    let mut gcm = AesGcm::new(&device);
    gcm.setkey(&[3; 16]).unwrap();
    with_emulator(&device, |se| se.args_mut().error_on_next_op = true);
    let mut out = [0u8; 48];
    assert_eq!(
        gcm.encrypt(&[0; 12], &[1; 8], &[2; 32], &mut out),
        Err(SeError::DRIVER_ENGINE_STATUS_ERROR)
    );
    assert_eq!(device.dma().in_use(), 0);
    assert_eq!(device.slots().free_count(), 13);
    assert!(!with_emulator(&device, |se| se.mutex_held()));
}

#[test]
fn test_delayed_completion() {
    let device = start_device(
        DeviceParams::default(),
        SecurityEngineArgs {
            completion_delay: 25,
            ..Default::default()
        },
    );
    let mut rng = rng(61);
    let key = random_bytes(&mut rng, 24);
    let iv: [u8; 16] = random_array(&mut rng);
    let pt = random_bytes(&mut rng, 64);

    let mut cipher = SkCipher::new(&device, Mode::Ofb).unwrap();
    cipher.setkey(&key).unwrap();
    let mut ct = vec![0u8; 64];
    cipher.encrypt(&mut iv.clone(), &pt, &mut ct).unwrap();
    assert_eq!(ct, reference::ofb_apply(&key, &iv, &pt));
}

#[test]
fn test_syncpt_wraparound() {
    let device = start_device(
        DeviceParams::default(),
        SecurityEngineArgs {
            syncpt_base: u32::MAX - 3,
            ..Default::default()
        },
    );
    let mut rng = rng(62);
    let key = random_bytes(&mut rng, 16);
    let mut cipher = SkCipher::new(&device, Mode::Ctr).unwrap();
    cipher.setkey(&key).unwrap();

    let iv: [u8; 16] = random_array(&mut rng);
    let pt = random_bytes(&mut rng, 20);
    for _ in 0..8 {
        let mut ct = vec![0u8; 20];
        cipher.encrypt(&mut iv.clone(), &pt, &mut ct).unwrap();
        assert_eq!(ct, reference::ctr_apply(&key, &iv, &pt));
    }
    let threshold = device.with_engine(|engine| engine.threshold()).unwrap();
    assert!(threshold < 1000);
}

#[test]
fn test_dma_exhaustion() {
    let device = start_default_device();
    let mut cipher = SkCipher::new(&device, Mode::Ecb).unwrap();
    cipher.setkey(&[4; 16]).unwrap();
    let big = vec![0u8; DMA_SIZE + 16];
    let mut out = vec![0u8; big.len()];
    assert_eq!(
        cipher.encrypt(&mut [0; 16], &big, &mut out),
        Err(SeError::DRIVER_DMA_EXHAUSTED)
    );
    assert_eq!(device.dma().in_use(), 0);

    let mut small = [0u8; 16];
    cipher.encrypt(&mut [0; 16], &[0; 16], &mut small).unwrap();
}
