/*++

Licensed under the Apache-2.0 license.

File Name:

    ccm.rs

Abstract:

    File contains the AES-CCM session. The engine has no CCM mode; CCM is
    a CBC-MAC pass over the formatted input (RFC 3610) and a CTR pass that
    masks the tag and the payload.

--*/

use constant_time_eq::constant_time_eq;

use crate::alg_table::{Algorithm, Direction, Mode, AES_BLOCK_SIZE};
use crate::cmdbuf::{CryptoOp, DmaRegion};
use crate::device::{EngineRequest, SeDevice, SeRun};
use crate::dma::{DmaBuf, DmaPool};
use crate::engine::EngineSubmitter;
use crate::key_store::InstalledKey;
use crate::regs::{self, Config, CryptoConfig, Operation};
use crate::skcipher::{block_cfg, iv_words};
use crate::{cprintln, SeError, SeResult};

/// Tag sizes accepted by [`AesCcm::setauthsize`].
pub fn ccm_check_authsize(authsize: usize) -> SeResult<()> {
    match authsize {
        4 | 6 | 8 | 10 | 12 | 14 | 16 => Ok(()),
        _ => Err(SeError::DRIVER_INVALID_TAG_SIZE),
    }
}

/// Length field width `L` encoded in `iv[0]`.
fn ccm_check_iv(iv: &[u8; AES_BLOCK_SIZE]) -> SeResult<usize> {
    match iv[0] {
        1..=7 => Ok(iv[0] as usize + 1),
        _ => Err(SeError::DRIVER_INVALID_IV),
    }
}

/// The payload length must fit the `L`-byte length field of B0.
fn ccm_check_payload_len(l: usize, len: usize) -> SeResult<()> {
    if l < 8 && (len as u64) >> (8 * l) != 0 {
        return Err(SeError::DRIVER_INVALID_LENGTH);
    }
    Ok(())
}

/// Length of the CBC-MAC input built by [`ccm_format_input`].
fn ccm_formatted_len(aad_len: usize, payload_len: usize) -> usize {
    let aad = match aad_len {
        0 => 0,
        n if n < 0xff00 => (n + 2).next_multiple_of(AES_BLOCK_SIZE),
        n if n as u64 <= u32::MAX as u64 => (n + 6).next_multiple_of(AES_BLOCK_SIZE),
        n => (n + 10).next_multiple_of(AES_BLOCK_SIZE),
    };
    AES_BLOCK_SIZE + aad + payload_len.next_multiple_of(AES_BLOCK_SIZE)
}

/// Counter block `A_i`. The IV already carries the `L - 1` flags byte and
/// the nonce; the counter occupies the trailing `L` bytes.
fn counter_block(iv: &[u8; AES_BLOCK_SIZE], l: usize, index: u64) -> [u8; AES_BLOCK_SIZE] {
    let mut block = *iv;
    block[AES_BLOCK_SIZE - l..].fill(0);
    let index = index.to_be_bytes();
    let n = l.min(index.len());
    block[AES_BLOCK_SIZE - n..].copy_from_slice(&index[index.len() - n..]);
    block
}

/// Build the CBC-MAC input: B0, the encoded AAD and the payload, each
/// section zero-padded to the block size.
pub fn ccm_format_input(iv: &[u8; AES_BLOCK_SIZE], authsize: usize, aad: &[u8], payload: &[u8]) -> SeResult<Vec<u8>> {
    let l = ccm_check_iv(iv)?;
    ccm_check_authsize(authsize)?;
    ccm_check_payload_len(l, payload.len())?;

    let mut b0 = counter_block(iv, l, payload.len() as u64);
    b0[0] = (l as u8 - 1) | (((authsize as u8 - 2) / 2) << 3) | if aad.is_empty() { 0 } else { 1 << 6 };

    let mut out = Vec::with_capacity(ccm_formatted_len(aad.len(), payload.len()));
    out.extend_from_slice(&b0);
    if !aad.is_empty() {
        let len = aad.len() as u64;
        if len < 0xff00 {
            out.extend_from_slice(&(len as u16).to_be_bytes());
        } else if len <= u32::MAX as u64 {
            out.extend_from_slice(&[0xff, 0xfe]);
            out.extend_from_slice(&(len as u32).to_be_bytes());
        } else {
            out.extend_from_slice(&[0xff, 0xff]);
            out.extend_from_slice(&len.to_be_bytes());
        }
        out.extend_from_slice(aad);
        out.resize(out.len().next_multiple_of(AES_BLOCK_SIZE), 0);
    }
    out.extend_from_slice(payload);
    out.resize(out.len().next_multiple_of(AES_BLOCK_SIZE), 0);
    Ok(out)
}

fn ccm_cfg() -> u32 {
    (Config::ENC_ALG::AES_ENC + Config::ENC_MODE::CBC_MAC + Config::DST::HASH_REG).into()
}

/// Read and clear the MAC result registers.
fn take_result<E: EngineSubmitter>(engine: &mut E) -> [u8; AES_BLOCK_SIZE] {
    let mut mac = [0u8; AES_BLOCK_SIZE];
    for (i, chunk) in mac.chunks_exact_mut(4).enumerate() {
        let reg = regs::RESULT + 4 * i as u32;
        chunk.copy_from_slice(&engine.read_register(reg).to_le_bytes());
        engine.write_register(reg, 0);
    }
    mac
}

/// CBC-MAC pass over `formatted`. Returns the untruncated MAC.
fn cbc_mac<E: EngineSubmitter>(run: &mut SeRun<'_, E>, slot: u8, formatted: &DmaBuf) -> SeResult<[u8; AES_BLOCK_SIZE]> {
    run.submit_op(&CryptoOp {
        config: ccm_cfg(),
        crypto_config: CryptoConfig::KEY_INDEX.val(slot as u32).into(),
        iv: Some([0; 4]),
        lengths: None,
        last_block: regs::last_block(formatted.len())?,
        src: Some(DmaRegion {
            iova: formatted.iova(),
            len: formatted.len(),
        }),
        dst: None,
        op_flags: (Operation::INIT::SET + Operation::FINAL::SET).into(),
    })?;
    Ok(take_result(run.engine()))
}

/// CTR pass from `A0` over `input` into `output`.
fn ctr_pass<E: EngineSubmitter>(
    run: &mut SeRun<'_, E>,
    slot: u8,
    a0: &[u8; AES_BLOCK_SIZE],
    input: &DmaBuf,
    output: &DmaBuf,
) -> SeResult<()> {
    let (config, crypto_config) = block_cfg(Mode::Ctr, Direction::Encrypt, slot, 0)?;
    let len = input.len();
    run.submit_op(&CryptoOp {
        config,
        crypto_config,
        iv: Some(iv_words(a0)),
        lengths: None,
        last_block: regs::last_block(len)?,
        src: Some(DmaRegion {
            iova: input.iova(),
            len,
        }),
        dst: Some(DmaRegion {
            iova: output.iova(),
            len,
        }),
        op_flags: 0,
    })
}

fn dma_copy(dma: &DmaPool, data: &[u8]) -> SeResult<DmaBuf> {
    let buf = dma.alloc(data.len())?;
    buf.write_at(0, data)?;
    Ok(buf)
}

/// AES-CCM session.
pub struct AesCcm<'d, E: EngineSubmitter> {
    device: &'d SeDevice<E>,
    key: Option<InstalledKey>,
    authsize: usize,
}

impl<'d, E: EngineSubmitter> AesCcm<'d, E> {
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

    pub fn setkey(&mut self, key: &[u8]) -> SeResult<()> {
        self.clear_key()?;
        let installed = self
            .device
            .run(|run| run.install_key(Algorithm::Aes(Mode::Ccm), key, false))?;
        self.key = Some(installed);
        Ok(())
    }

    pub fn setauthsize(&mut self, authsize: usize) -> SeResult<()> {
        ccm_check_authsize(authsize)?;
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
    pub fn encrypt(&mut self, iv: &[u8; AES_BLOCK_SIZE], aad: &[u8], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        if dst.len() < src.len() + self.authsize {
            return Err(SeError::DRIVER_INVALID_SLICE);
        }
        self.crypt(Direction::Encrypt, iv, aad, src, dst)
    }

    /// Decrypt `src` (ciphertext followed by the tag) into `dst`.
    ///
    /// The payload is decrypted first and the recovered plaintext is then
    /// authenticated. The plaintext is written even when the tag does not
    /// match; the caller must not trust it unless `Ok` is returned.
    pub fn decrypt(&mut self, iv: &[u8; AES_BLOCK_SIZE], aad: &[u8], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        let len = src
            .len()
            .checked_sub(self.authsize)
            .ok_or(SeError::DRIVER_INVALID_LENGTH)?;
        if dst.len() < len {
            return Err(SeError::DRIVER_INVALID_SLICE);
        }
        self.crypt(Direction::Decrypt, iv, aad, src, dst)
    }

    /// Untruncated CBC-MAC of `aad` and `data` under the session key, as
    /// computed by the authentication pass.
    pub fn mac(&self, iv: &[u8; AES_BLOCK_SIZE], aad: &[u8], data: &[u8]) -> SeResult<[u8; AES_BLOCK_SIZE]> {
        let key = self.key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        let formatted = dma_copy(self.device.dma(), &ccm_format_input(iv, self.authsize, aad, data)?)?;
        self.device
            .run(|run| run.with_key(key, None, |run, slot| cbc_mac(run, slot, &formatted)))
    }

    fn crypt(
        &mut self,
        dir: Direction,
        iv: &[u8; AES_BLOCK_SIZE],
        aad: &[u8],
        src: &[u8],
        dst: &mut [u8],
    ) -> SeResult<()> {
        let key = self.key.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        let l = ccm_check_iv(iv)?;
        let payload_len = match dir {
            Direction::Encrypt => src.len(),
            Direction::Decrypt => src.len() - self.authsize,
        };
        ccm_check_payload_len(l, payload_len)?;
        regs::check_transfer_len(ccm_formatted_len(aad.len(), payload_len))?;
        let mut req = CcmRequest {
            dir,
            key,
            a0: counter_block(iv, l, 0),
            iv: *iv,
            authsize: self.authsize,
            aad,
            payload: &src[..payload_len],
            tag_in: &src[payload_len..],
            dst,
            bufs: None,
        };
        self.device.transfer_one_request(&mut req)
    }
}

impl<E: EngineSubmitter> Drop for AesCcm<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.clear_key() {
            cprintln!("[ccm] key invalidation failed: {}", u32::from(err));
        }
    }
}

struct CcmBufs {
    // Encrypt: formatted plaintext for the MAC pass.
    formatted: Option<DmaBuf>,
    // [tag block][payload] in and out of the CTR pass.
    ctr_in: DmaBuf,
    ctr_out: DmaBuf,
}

struct CcmRequest<'r> {
    dir: Direction,
    key: &'r InstalledKey,
    a0: [u8; AES_BLOCK_SIZE],
    iv: [u8; AES_BLOCK_SIZE],
    authsize: usize,
    aad: &'r [u8],
    payload: &'r [u8],
    tag_in: &'r [u8],
    dst: &'r mut [u8],
    bufs: Option<CcmBufs>,
}

impl CcmRequest<'_> {
    fn encrypt<E: EngineSubmitter>(&mut self, run: &mut SeRun<'_, E>, slot: u8) -> SeResult<()> {
        let bufs = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let formatted = bufs.formatted.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;

        let mac = cbc_mac(run, slot, formatted)?;
        bufs.ctr_in.write_at(0, &mac)?;
        ctr_pass(run, slot, &self.a0, &bufs.ctr_in, &bufs.ctr_out)?;

        let len = self.payload.len();
        bufs.ctr_out
            .read_at(AES_BLOCK_SIZE, &mut self.dst[..len])?;
        bufs.ctr_out
            .read_at(0, &mut self.dst[len..len + self.authsize])?;
        Ok(())
    }

    fn decrypt<E: EngineSubmitter>(&mut self, run: &mut SeRun<'_, E>, slot: u8) -> SeResult<()> {
        let bufs = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        ctr_pass(run, slot, &self.a0, &bufs.ctr_in, &bufs.ctr_out)?;

        let len = self.payload.len();
        let mut tag = [0u8; AES_BLOCK_SIZE];
        bufs.ctr_out.read_at(0, &mut tag)?;
        bufs.ctr_out
            .read_at(AES_BLOCK_SIZE, &mut self.dst[..len])?;

        let formatted = ccm_format_input(&self.iv, self.authsize, self.aad, &self.dst[..len])?;
        let formatted = dma_copy(run.dma(), &formatted)?;
        let mac = cbc_mac(run, slot, &formatted)?;

        if !constant_time_eq(&mac[..self.authsize], &tag[..self.authsize]) {
            cprintln!("[ccm] tag mismatch");
            return Err(SeError::DRIVER_CCM_TAG_MISMATCH);
        }
        Ok(())
    }
}

impl<E: EngineSubmitter> EngineRequest<E> for CcmRequest<'_> {
    type Output = ();

    fn prepare(&mut self, device: &SeDevice<E>) -> SeResult<()> {
        let dma = device.dma();
        let ctr_len = AES_BLOCK_SIZE + self.payload.len().next_multiple_of(AES_BLOCK_SIZE);
        let ctr_in = dma.alloc(ctr_len)?;
        ctr_in.write_at(AES_BLOCK_SIZE, self.payload)?;
        let formatted = match self.dir {
            Direction::Encrypt => Some(dma_copy(
                dma,
                &ccm_format_input(&self.iv, self.authsize, self.aad, self.payload)?,
            )?),
            Direction::Decrypt => {
                ctr_in.write_at(0, self.tag_in)?;
                None
            }
        };
        self.bufs = Some(CcmBufs {
            formatted,
            ctr_in,
            ctr_out: dma.alloc(ctr_len)?,
        });
        Ok(())
    }

    fn run(&mut self, run: &mut SeRun<'_, E>) -> SeResult<()> {
        let key = self.key;
        run.with_key(key, None, |run, slot| match self.dir {
            Direction::Encrypt => self.encrypt(run, slot),
            Direction::Decrypt => self.decrypt(run, slot),
        })
    }

    fn unprepare(&mut self, _device: &SeDevice<E>, _result: &SeResult<()>) {
        self.bufs = None;
    }
}
