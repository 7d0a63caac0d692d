/*++

Licensed under the Apache-2.0 license.

File Name:

    cmac.rs

Abstract:

    File contains the streaming AES-CMAC session.

    The engine applies the CMAC final-block subkey only to an operation
    flagged FINAL, so `update` always holds back the last 1 to 16 bytes
    for `finalize`.

--*/

use aes::{Aes128, Aes192, Aes256};
use cmac::{Cmac, Mac};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zeroize::Zeroizing;

use crate::alg_table::{Algorithm, Mode, AES_BLOCK_SIZE};
use crate::cmdbuf::{CryptoOp, DmaRegion};
use crate::device::{EngineRequest, SeDevice, SeRun};
use crate::dma::DmaBuf;
use crate::engine::EngineSubmitter;
use crate::key_store::InstalledKey;
use crate::regs::{self, Config, CryptoConfig, Operation};
use crate::skcipher::iv_words;
use crate::{cprintln, SeError, SeResult};

pub const CMAC_DIGEST_SIZE: usize = AES_BLOCK_SIZE;

/// Exportable streaming state.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct CmacState {
    /// Bytes passed to `update` since `init`.
    pub total_len: u64,
    /// Valid bytes in `residue`.
    pub residue_len: u32,
    /// Non-zero until the first hardware operation.
    pub first: u32,
    /// Held-back tail of the message.
    pub residue: [u8; AES_BLOCK_SIZE],
    /// Chaining value after the last processed block.
    pub digest: [u8; AES_BLOCK_SIZE],
}

impl CmacState {
    /// State of a message with no data absorbed yet.
    pub fn fresh() -> Self {
        Self {
            first: 1,
            ..Default::default()
        }
    }

    fn residue(&self) -> &[u8] {
        &self.residue[..self.residue_len as usize]
    }
}

fn cmac_cfg() -> u32 {
    (Config::ENC_ALG::AES_ENC + Config::ENC_MODE::CMAC + Config::DST::HASH_REG).into()
}

/// Library CMAC, for messages that never reached the engine.
fn software_cmac(key: &[u8], data: &[u8]) -> SeResult<[u8; CMAC_DIGEST_SIZE]> {
    fn run<M: Mac>(mut mac: M, data: &[u8]) -> [u8; CMAC_DIGEST_SIZE] {
        mac.update(data);
        let mut out = [0u8; CMAC_DIGEST_SIZE];
        out.copy_from_slice(&mac.finalize().into_bytes()[..CMAC_DIGEST_SIZE]);
        out
    }
    let bad_key = |_| SeError::DRIVER_INVALID_KEY_SIZE;
    match key.len() {
        16 => Ok(run(<Cmac<Aes128> as Mac>::new_from_slice(key).map_err(bad_key)?, data)),
        24 => Ok(run(<Cmac<Aes192> as Mac>::new_from_slice(key).map_err(bad_key)?, data)),
        32 => Ok(run(<Cmac<Aes256> as Mac>::new_from_slice(key).map_err(bad_key)?, data)),
        _ => Err(SeError::DRIVER_INVALID_KEY_SIZE),
    }
}

/// AES-CMAC session.
pub struct AesCmac<'d, E: EngineSubmitter> {
    device: &'d SeDevice<E>,
    key: Option<InstalledKey>,
    // Kept for the software path.
    raw_key: Option<Zeroizing<Vec<u8>>>,
    state: CmacState,
}

impl<'d, E: EngineSubmitter> AesCmac<'d, E> {
    pub fn new(device: &'d SeDevice<E>) -> Self {
        Self {
            device,
            key: None,
            raw_key: None,
            state: CmacState::fresh(),
        }
    }

    pub fn setkey(&mut self, key: &[u8]) -> SeResult<()> {
        self.clear_key()?;
        let installed = self
            .device
            .run(|run| run.install_key(Algorithm::Aes(Mode::Cmac), key, false))?;
        self.key = Some(installed);
        self.raw_key = Some(Zeroizing::new(key.to_vec()));
        Ok(())
    }

    fn clear_key(&mut self) -> SeResult<()> {
        self.raw_key = None;
        match self.key.take() {
            Some(key) => self.device.run(|run| run.invalidate_key(&key)),
            None => Ok(()),
        }
    }

    /// Start a new message. Stale results in the engine are cleared.
    pub fn init(&mut self) -> SeResult<()> {
        self.state = CmacState::fresh();
        self.device.run(|run| {
            clear_result(run.engine());
            Ok(())
        })
    }

    /// Absorb `data`.
    pub fn update(&mut self, data: &[u8]) -> SeResult<()> {
        let key = self.key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        let residue_len = self.state.residue_len as usize;
        if residue_len > AES_BLOCK_SIZE {
            return Err(SeError::DRIVER_CMAC_INVALID_STATE);
        }
        let pending = residue_len + data.len();
        if pending <= AES_BLOCK_SIZE {
            self.state.residue[residue_len..pending].copy_from_slice(data);
            self.state.residue_len = pending as u32;
            self.state.total_len += data.len() as u64;
            return Ok(());
        }

        // Process every whole block but the last; keep 1..=16 bytes back.
        let process = (pending - 1) / AES_BLOCK_SIZE * AES_BLOCK_SIZE;
        regs::check_transfer_len(process)?;
        let from_data = process - residue_len;
        let mut req = CmacRequest {
            key,
            state: &mut self.state,
            head: data,
            head_len: from_data,
            last: false,
            buf: None,
        };
        self.device.transfer_one_request(&mut req)?;

        let tail = &data[from_data..];
        self.state.residue[..tail.len()].copy_from_slice(tail);
        self.state.residue_len = tail.len() as u32;
        self.state.total_len += data.len() as u64;
        Ok(())
    }

    /// Complete the message and write the digest to `out`.
    pub fn finalize(&mut self, out: &mut [u8; CMAC_DIGEST_SIZE]) -> SeResult<()> {
        let result = self.finalize_inner(out);
        self.state = CmacState::fresh();
        result
    }

    fn finalize_inner(&mut self, out: &mut [u8; CMAC_DIGEST_SIZE]) -> SeResult<()> {
        let key = self.key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        if self.state.residue_len as usize > AES_BLOCK_SIZE {
            return Err(SeError::DRIVER_CMAC_INVALID_STATE);
        }
        if self.state.total_len == 0 && self.state.first != 0 {
            let raw = self.raw_key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
            *out = software_cmac(raw, &[])?;
            return Ok(());
        }
        let mut req = CmacRequest {
            key,
            state: &mut self.state,
            head: &[],
            head_len: 0,
            last: true,
            buf: None,
        };
        *out = self.device.transfer_one_request(&mut req)?;
        Ok(())
    }

    pub fn finup(&mut self, data: &[u8], out: &mut [u8; CMAC_DIGEST_SIZE]) -> SeResult<()> {
        if let Err(err) = self.update(data) {
            self.state = CmacState::fresh();
            return Err(err);
        }
        self.finalize(out)
    }

    pub fn digest(&mut self, data: &[u8], out: &mut [u8; CMAC_DIGEST_SIZE]) -> SeResult<()> {
        self.init()?;
        self.finup(data, out)
    }

    pub fn export(&self) -> CmacState {
        self.state
    }

    /// Exported state as bytes.
    pub fn export_bytes(&self) -> Vec<u8> {
        self.state.as_bytes().to_vec()
    }

    pub fn import(&mut self, state: &CmacState) -> SeResult<()> {
        if state.residue_len as usize > AES_BLOCK_SIZE {
            return Err(SeError::DRIVER_CMAC_INVALID_EXPORT);
        }
        self.state = *state;
        Ok(())
    }

    pub fn import_bytes(&mut self, bytes: &[u8]) -> SeResult<()> {
        let state = CmacState::read_from_bytes(bytes).map_err(|_| SeError::DRIVER_CMAC_INVALID_EXPORT)?;
        self.import(&state)
    }
}

impl<E: EngineSubmitter> Drop for AesCmac<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.clear_key() {
            cprintln!("[cmac] key invalidation failed: {}", u32::from(err));
        }
    }
}

fn clear_result<E: EngineSubmitter>(engine: &mut E) {
    for i in 0..regs::RESULT_WORDS as u32 {
        engine.write_register(regs::RESULT + 4 * i, 0);
    }
}

fn read_result<E: EngineSubmitter>(engine: &mut E) -> [u8; AES_BLOCK_SIZE] {
    let mut out = [0u8; AES_BLOCK_SIZE];
    for (i, chunk) in out.chunks_exact_mut(4).enumerate() {
        chunk.copy_from_slice(&engine.read_register(regs::RESULT + 4 * i as u32).to_le_bytes());
    }
    out
}

/// One CMAC operation over `residue ++ head[..head_len]`.
struct CmacRequest<'r> {
    key: &'r InstalledKey,
    state: &'r mut CmacState,
    head: &'r [u8],
    head_len: usize,
    last: bool,
    buf: Option<DmaBuf>,
}

impl CmacRequest<'_> {
    fn len(&self) -> usize {
        self.state.residue_len as usize + self.head_len
    }
}

impl<E: EngineSubmitter> EngineRequest<E> for CmacRequest<'_> {
    type Output = [u8; CMAC_DIGEST_SIZE];

    fn prepare(&mut self, device: &SeDevice<E>) -> SeResult<()> {
        let buf = device.dma().alloc(self.len())?;
        buf.write_at(0, self.state.residue())?;
        buf.write_at(self.state.residue_len as usize, &self.head[..self.head_len])?;
        self.buf = Some(buf);
        Ok(())
    }

    fn run(&mut self, run: &mut SeRun<'_, E>) -> SeResult<Self::Output> {
        let buf = self.buf.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let len = self.len();
        let iv = if self.state.first != 0 {
            [0; 4]
        } else {
            iv_words(&self.state.digest)
        };
        let flags = if self.last {
            Operation::FINAL::SET.into()
        } else {
            0
        };
        let op = CryptoOp {
            config: cmac_cfg(),
            crypto_config: 0,
            iv: Some(iv),
            lengths: None,
            last_block: regs::last_block(len)?,
            src: Some(DmaRegion {
                iova: buf.iova(),
                len,
            }),
            dst: None,
            op_flags: flags,
        };

        let digest = run.with_key(self.key, None, |run, slot| {
            run.submit_op(&CryptoOp {
                crypto_config: CryptoConfig::KEY_INDEX.val(slot as u32).into(),
                ..op
            })?;
            let digest = read_result(run.engine());
            if self.last {
                clear_result(run.engine());
            }
            Ok(digest)
        })?;

        self.state.first = 0;
        self.state.digest = digest;
        self.state.residue_len = 0;
        Ok(digest)
    }

    fn unprepare(&mut self, _device: &SeDevice<E>, _result: &SeResult<Self::Output>) {
        self.buf = None;
    }
}
