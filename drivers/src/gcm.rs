/*++

Licensed under the Apache-2.0 license.

File Name:

    gcm.rs

Abstract:

    File contains the AES-GCM session. The engine computes GCM as up to four
    sub-operations: GMAC over the AAD, GCM over the payload, GCM_FINAL for
    the tag, and optionally GCM_VERIFY to compare a received tag.

--*/

use constant_time_eq::constant_time_eq;

use crate::alg_table::{Algorithm, Direction, Mode, AES_BLOCK_SIZE, GCM_IV_SIZE};
use crate::cmdbuf::{CryptoOp, DmaRegion};
use crate::device::{EngineRequest, SeDevice, SeRun};
use crate::dma::DmaBuf;
use crate::engine::EngineSubmitter;
use crate::key_store::InstalledKey;
use crate::regs::{self, Config, CryptoConfig, Operation};
use crate::skcipher::iv_words;
use crate::{cprintln, SeError, SeResult};

/// Bytes written by GCM_VERIFY: two words of [`regs::GCM_VERIFY_OK`] on
/// match.
const VERIFY_RESULT_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcmSubOp {
    Gmac,
    Gcm,
    Final,
    Verify,
}

/// Config word of a GCM sub-operation.
pub fn gcm_cfg(sub: GcmSubOp, dir: Direction) -> u32 {
    let cfg = match (dir, sub) {
        (Direction::Encrypt, GcmSubOp::Gmac) => Config::ENC_ALG::AES_ENC + Config::ENC_MODE::GMAC,
        (Direction::Encrypt, GcmSubOp::Gcm) => Config::ENC_ALG::AES_ENC + Config::ENC_MODE::GCM,
        (Direction::Encrypt, GcmSubOp::Final) => Config::ENC_ALG::AES_ENC + Config::ENC_MODE::GCM_FINAL,
        (Direction::Decrypt, GcmSubOp::Gmac) => Config::DEC_ALG::AES_DEC + Config::DEC_MODE::GMAC,
        (Direction::Decrypt, GcmSubOp::Gcm) => Config::DEC_ALG::AES_DEC + Config::DEC_MODE::GCM,
        (Direction::Decrypt, GcmSubOp::Final) => Config::DEC_ALG::AES_DEC + Config::DEC_MODE::GCM_FINAL,
        (_, GcmSubOp::Verify) => Config::DEC_ALG::AES_DEC + Config::DEC_MODE::GCM_VERIFY,
    };
    (cfg + Config::DST::MEMORY).into()
}

/// Tag sizes accepted by [`AesGcm::setauthsize`].
pub fn gcm_check_authsize(authsize: usize) -> SeResult<()> {
    match authsize {
        4 | 8 | 12..=16 => Ok(()),
        _ => Err(SeError::DRIVER_INVALID_TAG_SIZE),
    }
}

/// AES-GCM session.
pub struct AesGcm<'d, E: EngineSubmitter> {
    device: &'d SeDevice<E>,
    key: Option<InstalledKey>,
    authsize: usize,
}

impl<'d, E: EngineSubmitter> AesGcm<'d, E> {
    pub fn new(device: &'d SeDevice<E>) -> Self {
        Self {
            device,
            key: None,
            authsize: AES_BLOCK_SIZE,
        }
    }

    pub fn authsize(&self) -> usize {
        self.authsize
    }

    pub fn key(&self) -> Option<&InstalledKey> {
        self.key.as_ref()
    }

    pub fn setkey(&mut self, key: &[u8]) -> SeResult<()> {
        self.clear_key()?;
        let installed = self
            .device
            .run(|run| run.install_key(Algorithm::Aes(Mode::Gcm), key, false))?;
        self.key = Some(installed);
        Ok(())
    }

    pub fn setauthsize(&mut self, authsize: usize) -> SeResult<()> {
        gcm_check_authsize(authsize)?;
        self.authsize = authsize;
        Ok(())
    }

    fn clear_key(&mut self) -> SeResult<()> {
        match self.key.take() {
            Some(key) => self.device.run(|run| run.invalidate_key(&key)),
            None => Ok(()),
        }
    }

    /// Encrypt `src` and write ciphertext followed by the tag to `dst`.
    pub fn encrypt(&mut self, iv: &[u8; GCM_IV_SIZE], aad: &[u8], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        if dst.len() < src.len() + self.authsize {
            return Err(SeError::DRIVER_INVALID_SLICE);
        }
        self.crypt(Direction::Encrypt, iv, aad, src, dst)
    }

    /// Decrypt `src` (ciphertext followed by the tag) into `dst`.
    ///
    /// The plaintext is written even when the tag does not match; the
    /// caller must not trust it unless `Ok` is returned.
    pub fn decrypt(&mut self, iv: &[u8; GCM_IV_SIZE], aad: &[u8], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        let len = src
            .len()
            .checked_sub(self.authsize)
            .ok_or(SeError::DRIVER_INVALID_LENGTH)?;
        if dst.len() < len {
            return Err(SeError::DRIVER_INVALID_SLICE);
        }
        self.crypt(Direction::Decrypt, iv, aad, src, dst)
    }

    fn crypt(
        &mut self,
        dir: Direction,
        iv: &[u8; GCM_IV_SIZE],
        aad: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> SeResult<()> {
        let key = self.key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        let payload_len = match dir {
            Direction::Encrypt => src.len(),
            Direction::Decrypt => src.len() - self.authsize,
        };
        regs::check_transfer_len(aad.len())?;
        regs::check_transfer_len(payload_len)?;
        let mut j0 = [0u8; AES_BLOCK_SIZE];
        j0[..GCM_IV_SIZE].copy_from_slice(iv);
        j0[AES_BLOCK_SIZE - 1] = 1;

        let mut req = GcmRequest {
            dir,
            key,
            j0,
            authsize: self.authsize,
            hw_verify: self.device.params().gcm_hw_verify,
            aad,
            payload: &src[..payload_len],
            tag_in: &src[payload_len..],
            dst,
            bufs: None,
        };
        self.device.transfer_one_request(&mut req)
    }
}

impl<E: EngineSubmitter> Drop for AesGcm<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.clear_key() {
            cprintln!("[gcm] key invalidation failed: {}", u32::from(err));
        }
    }
}

struct GcmBufs {
    aad: Option<DmaBuf>,
    input: Option<DmaBuf>,
    output: Option<DmaBuf>,
    tag: DmaBuf,
    verify_in: Option<DmaBuf>,
    verify_out: Option<DmaBuf>,
}

struct GcmRequest<'r> {
    dir: Direction,
    key: &'r InstalledKey,
    j0: [u8; AES_BLOCK_SIZE],
    authsize: usize,
    hw_verify: bool,
    aad: &'r [u8],
    payload: &'r [u8],
    // Received tag, decrypt only.
    tag_in: &'r [u8],
    dst: &'r mut [u8],
    bufs: Option<GcmBufs>,
}

fn region(buf: &DmaBuf, len: usize) -> DmaRegion {
    DmaRegion {
        iova: buf.iova(),
        len,
    }
}

impl GcmRequest<'_> {
    fn op(&self, sub: GcmSubOp, slot: u8, flags: u32) -> CryptoOp {
        CryptoOp {
            config: gcm_cfg(sub, self.dir),
            crypto_config: CryptoConfig::KEY_INDEX.val(slot as u32).into(),
            iv: Some(iv_words(&self.j0)),
            lengths: None,
            last_block: 0,
            src: None,
            dst: None,
            op_flags: flags,
        }
    }

    /// Issue the sub-operations in order. Returns the tag comparison result
    /// for decrypt.
    fn submit<E: EngineSubmitter>(&self, run: &mut SeRun<'_, E>, slot: u8) -> SeResult<bool> {
        let bufs = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let init: u32 = Operation::INIT::SET.into();
        let fin: u32 = Operation::FINAL::SET.into();
        let has_aad = !self.aad.is_empty();
        let has_payload = !self.payload.is_empty();

        if let Some(aad) = &bufs.aad {
            let flags = init | if has_payload { 0 } else { fin };
            run.submit_op(&CryptoOp {
                last_block: regs::last_block(self.aad.len())?,
                src: Some(region(aad, self.aad.len())),
                ..self.op(GcmSubOp::Gmac, slot, flags)
            })?;
        }

        if has_payload {
            let input = bufs.input.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
            let output = bufs.output.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
            let flags = fin | if has_aad { 0 } else { init };
            run.submit_op(&CryptoOp {
                last_block: regs::last_block(self.payload.len())?,
                src: Some(region(input, self.payload.len())),
                dst: Some(region(output, self.payload.len())),
                ..self.op(GcmSubOp::Gcm, slot, flags)
            })?;
        }

        let flags = fin | if has_aad || has_payload { 0 } else { init };
        run.submit_op(&CryptoOp {
            lengths: Some((self.aad.len() as u64 * 8, self.payload.len() as u64 * 8)),
            last_block: regs::last_block(AES_BLOCK_SIZE)?,
            dst: Some(region(&bufs.tag, AES_BLOCK_SIZE)),
            ..self.op(GcmSubOp::Final, slot, flags)
        })?;

        match (self.dir, &bufs.verify_in, &bufs.verify_out) {
            (Direction::Encrypt, _, _) => Ok(true),
            (Direction::Decrypt, Some(verify_in), Some(verify_out)) => {
                run.submit_op(&CryptoOp {
                    last_block: regs::last_block(self.authsize)?,
                    src: Some(region(verify_in, self.authsize)),
                    dst: Some(region(verify_out, VERIFY_RESULT_SIZE)),
                    ..self.op(GcmSubOp::Verify, slot, fin)
                })?;
                let mut result = [0u8; VERIFY_RESULT_SIZE];
                verify_out.read_at(0, &mut result)?;
                let ok = regs::GCM_VERIFY_OK.to_le_bytes();
                Ok(result[..4] == ok && result[4..] == ok)
            }
            (Direction::Decrypt, _, _) => {
                let mut tag = [0u8; AES_BLOCK_SIZE];
                bufs.tag.read_at(0, &mut tag)?;
                Ok(constant_time_eq(&tag[..self.authsize], self.tag_in))
            }
        }
    }
}

impl<E: EngineSubmitter> EngineRequest<E> for GcmRequest<'_> {
    type Output = ();

    fn prepare(&mut self, device: &SeDevice<E>) -> SeResult<()> {
        let dma = device.dma();
        let aad = if self.aad.is_empty() {
            None
        } else {
            let buf = dma.alloc(self.aad.len())?;
            buf.write_at(0, self.aad)?;
            Some(buf)
        };
        let (input, output) = if self.payload.is_empty() {
            (None, None)
        } else {
            let input = dma.alloc(self.payload.len())?;
            input.write_at(0, self.payload)?;
            (Some(input), Some(dma.alloc(self.payload.len())?))
        };
        let tag = dma.alloc(AES_BLOCK_SIZE)?;
        let (verify_in, verify_out) = match (self.dir, self.hw_verify) {
            (Direction::Decrypt, true) => {
                let verify_in = dma.alloc(AES_BLOCK_SIZE)?;
                verify_in.write_at(0, self.tag_in)?;
                (Some(verify_in), Some(dma.alloc(VERIFY_RESULT_SIZE)?))
            }
            _ => (None, None),
        };
        self.bufs = Some(GcmBufs {
            aad,
            input,
            output,
            tag,
            verify_in,
            verify_out,
        });
        Ok(())
    }

    fn run(&mut self, run: &mut SeRun<'_, E>) -> SeResult<()> {
        let verified = run.with_key(self.key, None, |run, slot| self.submit(run, slot))?;

        let bufs = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let len = self.payload.len();
        if let Some(output) = &bufs.output {
            output.read_at(0, &mut self.dst[..len])?;
        }
        if self.dir == Direction::Encrypt {
            bufs.tag.read_at(0, &mut self.dst[len..len + self.authsize])?;
        }
        if !verified {
            cprintln!("[gcm] tag mismatch");
            return Err(SeError::DRIVER_GCM_TAG_MISMATCH);
        }
        Ok(())
    }

    fn unprepare(&mut self, _device: &SeDevice<E>, _result: &SeResult<()>) {
        self.bufs = None;
    }
}
