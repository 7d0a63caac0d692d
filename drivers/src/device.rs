/*++

Licensed under the Apache-2.0 license.

File Name:

    device.rs

Abstract:

    File contains the per-device state object: the key slot table, the KDS
    client and the engine, with their lifecycle and the request triad that
    serializes access to the engine.

--*/

use core::time::Duration;
use std::sync::Mutex;

use crate::cmdbuf::{crypto_op_cmd, CryptoOp, CMDBUF_WORDS};
use crate::dma::DmaPool;
use crate::engine::EngineSubmitter;
use crate::kds::{KdsClient, KdsRegionConfig};
use crate::key_slot::KeySlotTable;
use crate::manifest::{KeyOwner, KeySizeClass};
use crate::{cprintln, SeError, SeResult};

/// Device configuration.
#[derive(Debug, Clone, Copy)]
pub struct DeviceParams {
    /// Sync point named in every command buffer.
    pub syncpt_id: u32,

    /// Budget for every hardware wait.
    pub timeout: Duration,

    /// Attempt KDS region setup at init.
    pub kds_enabled: bool,

    /// Keys requested for the KDS region (at most 63).
    pub kds_key_count: u8,

    pub kds_max_key_size: KeySizeClass,

    /// Requester identity placed in manifests and the KDS region.
    pub key_owner: KeyOwner,

    /// Engine compares GCM tags itself.
    pub gcm_hw_verify: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            syncpt_id: 0x20,
            timeout: Duration::from_millis(100),
            kds_enabled: true,
            kds_key_count: 63,
            kds_max_key_size: KeySizeClass::Aes256,
            key_owner: KeyOwner::NonSecure,
            gcm_hw_verify: true,
        }
    }
}

/// Security engine instance.
pub struct SeDevice<E: EngineSubmitter> {
    params: DeviceParams,
    slots: KeySlotTable,
    kds: Option<KdsClient>,
    dma: DmaPool,
    engine: Mutex<E>,
}

/// Exclusive access to the engine for the duration of one request.
pub struct SeRun<'a, E: EngineSubmitter> {
    pub(crate) params: &'a DeviceParams,
    pub(crate) slots: &'a KeySlotTable,
    pub(crate) kds: Option<&'a KdsClient>,
    pub(crate) engine: &'a mut E,
}

/// A unit of work executed against the engine as `prepare -> run ->
/// unprepare`.
///
/// `prepare` and `unprepare` run without the engine lock; `run` holds it.
/// `unprepare` always runs once `prepare` succeeded, and sees the result of
/// `run`.
pub trait EngineRequest<E: EngineSubmitter> {
    type Output;

    fn prepare(&mut self, _device: &SeDevice<E>) -> SeResult<()> {
        Ok(())
    }

    fn run(&mut self, run: &mut SeRun<'_, E>) -> SeResult<Self::Output>;

    fn unprepare(&mut self, _device: &SeDevice<E>, _result: &SeResult<Self::Output>) {}
}

impl<E: EngineSubmitter> SeDevice<E> {
    /// Bring up the device. KDS region setup failure is not fatal: keys then
    /// live in local slots only.
    pub fn create_on_device_init(mut engine: E, params: DeviceParams) -> Self {
        let kds = if params.kds_enabled {
            let config = KdsRegionConfig {
                owner: params.key_owner,
                max_key_size: params.kds_max_key_size,
                key_count: params.kds_key_count,
            };
            match KdsClient::region_setup(&mut engine, config) {
                Ok(kds) => Some(kds),
                Err(err) => {
                    cprintln!("[device] KDS unavailable: {}", u32::from(err));
                    None
                }
            }
        } else {
            None
        };

        Self {
            params,
            slots: KeySlotTable::new(),
            kds,
            dma: engine.dma().clone(),
            engine: Mutex::new(engine),
        }
    }

    /// Tear the device down and hand the engine back.
    pub fn destroy_on_device_remove(self) -> E {
        self.engine.into_inner().unwrap_or_else(|e| e.into_inner())
    }

    pub fn params(&self) -> &DeviceParams {
        &self.params
    }

    pub fn slots(&self) -> &KeySlotTable {
        &self.slots
    }

    pub fn kds(&self) -> Option<&KdsClient> {
        self.kds.as_ref()
    }

    /// DMA-visible memory for request scratch buffers.
    pub fn dma(&self) -> &DmaPool {
        &self.dma
    }

    /// Run `f` with exclusive access to the engine.
    pub fn run<T, F>(&self, f: F) -> SeResult<T>
    where
        F: FnOnce(&mut SeRun<'_, E>) -> SeResult<T>,
    {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| SeError::DRIVER_ENGINE_POISONED)?;
        let mut run = SeRun {
            params: &self.params,
            slots: &self.slots,
            kds: self.kds.as_ref(),
            engine: &mut *engine,
        };
        f(&mut run)
    }

    /// Direct access to the engine, for diagnostics.
    pub fn with_engine<T, F>(&self, f: F) -> SeResult<T>
    where
        F: FnOnce(&mut E) -> T,
    {
        let mut engine = self
            .engine
            .lock()
            .map_err(|_| SeError::DRIVER_ENGINE_POISONED)?;
        Ok(f(&mut *engine))
    }

    /// Execute one request.
    pub fn transfer_one_request<R>(&self, req: &mut R) -> SeResult<R::Output>
    where
        R: EngineRequest<E>,
    {
        req.prepare(self)?;
        let result = self.run(|run| req.run(run));
        req.unprepare(self, &result);
        result
    }
}

impl<E: EngineSubmitter> SeRun<'_, E> {
    pub fn params(&self) -> &DeviceParams {
        self.params
    }

    pub fn engine(&mut self) -> &mut E {
        self.engine
    }

    pub fn dma(&self) -> &DmaPool {
        self.engine.dma()
    }

    /// Encode and submit one data-path operation.
    pub fn submit_op(&mut self, op: &CryptoOp) -> SeResult<()> {
        let mut buf = [0u32; CMDBUF_WORDS];
        let len = crypto_op_cmd(&mut buf, op, self.engine.syncpt_id())?;
        self.engine.submit(&buf, len)
    }
}
