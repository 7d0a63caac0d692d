/*++

Licensed under the Apache-2.0 license.

File Name:

    engine.rs

Abstract:

    File contains the boundary to the accelerator: the raw channel a command
    stream is pushed through, and the submitter that turns a push into a
    bounded, synchronous completion.

--*/

use core::time::Duration;

use crate::dma::DmaPool;
use crate::regs::{self, ErrStatus, Status};
use crate::wait::{self, Clock};
use crate::{cprint_slice, cprintln, SeError, SeResult};
use tock_registers::LocalRegisterCopy;

/// Raw access to the engine: the command FIFO, the sync point counters and
/// the register aperture.
pub trait SeChannel {
    /// Queue a command stream for execution.
    fn push(&mut self, words: &[u32]) -> SeResult<()>;

    /// Current value of sync point `id`.
    fn syncpt_read(&mut self, id: u32) -> u32;

    fn read_register(&mut self, offset: u32) -> u32;

    fn write_register(&mut self, offset: u32, value: u32);
}

/// Synchronous command submission, as consumed by the key store and the
/// cipher sessions.
pub trait EngineSubmitter {
    /// Execute the first `word_count` words of `buf` and block until the
    /// engine signals completion or the timeout budget runs out.
    fn submit(&mut self, buf: &[u32], word_count: usize) -> SeResult<()>;

    fn read_register(&mut self, offset: u32) -> u32;

    fn write_register(&mut self, offset: u32, value: u32);

    /// Poll `offset` until `done` accepts its value, within the timeout
    /// budget. Returns the accepted value.
    fn poll_register(&mut self, offset: u32, done: &dyn Fn(u32) -> bool, err: SeError) -> SeResult<u32>;

    /// Sync point named in every command buffer.
    fn syncpt_id(&self) -> u32;

    /// DMA-visible memory shared with the engine.
    fn dma(&self) -> &DmaPool;
}

/// True once `value` has reached `threshold`, allowing for wrap.
fn syncpt_reached(value: u32, threshold: u32) -> bool {
    (value.wrapping_sub(threshold) as i32) >= 0
}

/// Submitter over a [`SeChannel`].
pub struct Engine<C: SeChannel, K: Clock> {
    channel: C,
    clock: K,
    dma: DmaPool,
    syncpt_id: u32,
    timeout: Duration,
    threshold: u32,
}

impl<C: SeChannel, K: Clock> Engine<C, K> {
    pub fn new(mut channel: C, clock: K, dma: DmaPool, syncpt_id: u32, timeout: Duration) -> Self {
        let threshold = channel.syncpt_read(syncpt_id);
        Self {
            channel,
            clock,
            dma,
            syncpt_id,
            timeout,
            threshold,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Sync point value the last submission waited for.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    fn check_status(&mut self) -> SeResult<()> {
        let status = LocalRegisterCopy::<u32, Status::Register>::new(self.channel.read_register(regs::STATUS));
        if !status.is_set(Status::ERR) {
            return Ok(());
        }
        let code = LocalRegisterCopy::<u32, ErrStatus::Register>::new(self.channel.read_register(regs::ERR_STATUS))
            .read(ErrStatus::CODE);
        cprintln!("[engine] error status, code {}", code);
        // Write-one-to-clear.
        self.channel
            .write_register(regs::STATUS, Status::ERR::SET.into());
        Err(SeError::DRIVER_ENGINE_STATUS_ERROR)
    }
}

impl<C: SeChannel, K: Clock> EngineSubmitter for Engine<C, K> {
    fn submit(&mut self, buf: &[u32], word_count: usize) -> SeResult<()> {
        let words = buf.get(..word_count).ok_or(SeError::DRIVER_INVALID_SLICE)?;
        let threshold = self.threshold.wrapping_add(1);
        cprintln!(
            "[engine] submit {} words, syncpt {} threshold {}",
            word_count,
            self.syncpt_id,
            threshold
        );
        cprint_slice!("[engine] cmdbuf", words);
        self.channel.push(words)?;
        self.threshold = threshold;

        let Self {
            channel,
            clock,
            syncpt_id,
            timeout,
            ..
        } = self;
        let id = *syncpt_id;
        if let Err(err) = wait::until_timeout(
            clock,
            *timeout,
            || syncpt_reached(channel.syncpt_read(id), threshold),
            SeError::DRIVER_ENGINE_SYNCPT_TIMEOUT,
        ) {
            cprintln!("[engine] timeout waiting for syncpt {} to reach {}", id, threshold);
            return Err(err);
        }
        self.check_status()
    }

    fn read_register(&mut self, offset: u32) -> u32 {
        self.channel.read_register(offset)
    }

    fn write_register(&mut self, offset: u32, value: u32) {
        self.channel.write_register(offset, value)
    }

    fn poll_register(&mut self, offset: u32, done: &dyn Fn(u32) -> bool, err: SeError) -> SeResult<u32> {
        let Self {
            channel,
            clock,
            timeout,
            ..
        } = self;
        let mut last = 0;
        wait::until_timeout(
            clock,
            *timeout,
            || {
                last = channel.read_register(offset);
                done(last)
            },
            err,
        )?;
        Ok(last)
    }

    fn syncpt_id(&self) -> u32 {
        self.syncpt_id
    }

    fn dma(&self) -> &DmaPool {
        &self.dma
    }
}
