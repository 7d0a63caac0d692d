// Licensed under the Apache-2.0 license

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use se_drivers::{DeviceParams, DmaPool, Engine, FakeClock, SeDevice};
use se_emu_periph::{SecurityEngine, SecurityEngineArgs};

pub mod reference;

/// Engine address of the DMA window.
pub const DMA_BASE: u64 = 0x1_8000_0000;
pub const DMA_SIZE: usize = 0x4_0000;

/// Simulated time per clock reading.
pub const CLOCK_STEP: Duration = Duration::from_micros(10);

pub type TestEngine = Engine<SecurityEngine, FakeClock>;
pub type TestDevice = SeDevice<TestEngine>;

/// Bring up a device over a fresh emulated engine.
pub fn start_device(params: DeviceParams, args: SecurityEngineArgs) -> TestDevice {
    let dma = DmaPool::new(DMA_BASE, DMA_SIZE);
    let se = SecurityEngine::new(dma.clone(), args);
    let engine = Engine::new(
        se,
        FakeClock::new(CLOCK_STEP),
        dma,
        params.syncpt_id,
        params.timeout,
    );
    SeDevice::create_on_device_init(engine, params)
}

pub fn start_default_device() -> TestDevice {
    start_device(DeviceParams::default(), SecurityEngineArgs::default())
}

/// Device with the KDS tier switched off, so keys stay in local slots.
pub fn start_local_device() -> TestDevice {
    start_device(
        DeviceParams {
            kds_enabled: false,
            ..Default::default()
        },
        SecurityEngineArgs::default(),
    )
}

/// Run `f` against the emulated engine behind `device`.
pub fn with_emulator<T>(device: &TestDevice, f: impl FnOnce(&mut SecurityEngine) -> T) -> T {
    device
        .with_engine(|engine| f(engine.channel_mut()))
        .unwrap()
}

pub fn slot_key(device: &TestDevice, slot: u8) -> Vec<u8> {
    with_emulator(device, |se| se.slot_key_bytes(slot as usize)).unwrap()
}

pub fn kds_key(device: &TestDevice, id: u8) -> Vec<u8> {
    with_emulator(device, |se| se.kds_key_bytes(id)).unwrap()
}

pub fn is_zeroized(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == 0)
}

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_bytes(rng: &mut StdRng, len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    bytes
}

pub fn random_array<const N: usize>(rng: &mut StdRng) -> [u8; N] {
    let mut bytes = [0u8; N];
    rng.fill_bytes(&mut bytes);
    bytes
}
