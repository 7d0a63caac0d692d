/*++

Licensed under the Apache-2.0 license.

File Name:

    dma.rs

Abstract:

    File contains the DMA-visible memory pool shared between the driver and
    the engine, and the scratch buffers allocated from it.

--*/

use crate::{cprintln, SeError, SeResult};
use std::sync::{Arc, Mutex, MutexGuard};

/// Allocation granule. Every buffer starts on a cipher block boundary.
const DMA_ALIGN: usize = 16;

struct DmaMem {
    base: u64,
    mem: Vec<u8>,
    // Sorted, non-overlapping (offset, len) allocations.
    used: Vec<(usize, usize)>,
}

impl DmaMem {
    fn range(&self, iova: u64, len: usize) -> SeResult<core::ops::Range<usize>> {
        let start = iova
            .checked_sub(self.base)
            .ok_or(SeError::DRIVER_DMA_FAULT)? as usize;
        let end = start.checked_add(len).ok_or(SeError::DRIVER_DMA_FAULT)?;
        if end > self.mem.len() {
            return Err(SeError::DRIVER_DMA_FAULT);
        }
        Ok(start..end)
    }
}

/// DMA-visible memory. Clones share the same memory, the way the driver and
/// the engine see the same physical pages.
#[derive(Clone)]
pub struct DmaPool {
    inner: Arc<Mutex<DmaMem>>,
}

impl DmaPool {
    /// Create a pool of `size` bytes mapped at `base` in the engine's
    /// address space.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DmaMem {
                base,
                mem: vec![0; size],
                used: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DmaMem> {
        // The pool holds plain bytes; a panic elsewhere cannot leave it
        // structurally inconsistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate a zero-filled scratch buffer of `len` bytes.
    pub fn alloc(&self, len: usize) -> SeResult<DmaBuf> {
        let size = len.max(1).next_multiple_of(DMA_ALIGN);
        let mut mem = self.lock();

        let mut candidate = 0;
        let mut slot = mem.used.len();
        for (i, &(off, used_len)) in mem.used.iter().enumerate() {
            if off - candidate >= size {
                slot = i;
                break;
            }
            candidate = off + used_len;
        }
        if slot == mem.used.len() && mem.mem.len().saturating_sub(candidate) < size {
            cprintln!("[dma] pool exhausted, {} bytes requested", len);
            return Err(SeError::DRIVER_DMA_EXHAUSTED);
        }
        mem.used.insert(slot, (candidate, size));
        let iova = mem.base + candidate as u64;
        Ok(DmaBuf {
            pool: self.clone(),
            iova,
            len,
            size,
        })
    }

    /// Copy `out.len()` bytes at `iova` into `out`.
    pub fn read(&self, iova: u64, out: &mut [u8]) -> SeResult<()> {
        let mem = self.lock();
        let range = mem.range(iova, out.len())?;
        out.copy_from_slice(&mem.mem[range]);
        Ok(())
    }

    /// Copy `data` into memory at `iova`.
    pub fn write(&self, iova: u64, data: &[u8]) -> SeResult<()> {
        let mut mem = self.lock();
        let range = mem.range(iova, data.len())?;
        mem.mem[range].copy_from_slice(data);
        Ok(())
    }

    /// Bytes currently allocated.
    pub fn in_use(&self) -> usize {
        self.lock().used.iter().map(|&(_, len)| len).sum()
    }

    fn free(&self, iova: u64, size: usize) {
        let mut mem = self.lock();
        if let Ok(range) = mem.range(iova, size) {
            mem.mem[range.clone()].fill(0);
            mem.used.retain(|&(off, _)| off != range.start);
        }
    }
}

/// Scratch buffer in DMA-visible memory. The contents are zeroed when the
/// buffer is dropped.
pub struct DmaBuf {
    pool: DmaPool,
    iova: u64,
    len: usize,
    size: usize,
}

impl DmaBuf {
    /// Engine-visible address of the buffer.
    pub fn iova(&self) -> u64 {
        self.iova
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size, `len` rounded up to the allocation granule.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Copy `data` into the buffer at byte offset `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> SeResult<()> {
        if offset + data.len() > self.size {
            return Err(SeError::DRIVER_DMA_FAULT);
        }
        self.pool.write(self.iova + offset as u64, data)
    }

    /// Copy bytes at `offset` into `out`.
    pub fn read_at(&self, offset: usize, out: &mut [u8]) -> SeResult<()> {
        if offset + out.len() > self.size {
            return Err(SeError::DRIVER_DMA_FAULT);
        }
        self.pool.read(self.iova + offset as u64, out)
    }
}

impl Drop for DmaBuf {
    fn drop(&mut self) {
        self.pool.free(self.iova, self.size);
    }
}
