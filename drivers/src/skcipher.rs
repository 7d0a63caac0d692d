/*++

Licensed under the Apache-2.0 license.

File Name:

    skcipher.rs

Abstract:

    File contains the block cipher session (ECB, CBC, CTR, OFB, XTS).

--*/

use tock_registers::fields::FieldValue;

use crate::alg_table::{Algorithm, Direction, Mode, AES_BLOCK_SIZE};
use crate::cmdbuf::{CryptoOp, DmaRegion};
use crate::device::{EngineRequest, SeDevice, SeRun};
use crate::dma::DmaBuf;
use crate::engine::EngineSubmitter;
use crate::key_slot::{RESERVED_SLOT, RESERVED_SLOT_XTS2};
use crate::key_store::InstalledKey;
use crate::regs::{self, Config, CryptoConfig};
use crate::{cprintln, SeError, SeResult};

/// IV bytes as the four `LINEAR_CTR` words.
pub(crate) fn iv_words(iv: &[u8; AES_BLOCK_SIZE]) -> [u32; 4] {
    let mut words = [0u32; 4];
    for (word, chunk) in words.iter_mut().zip(iv.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    words
}

/// Add `blocks` to a 128-bit big-endian counter, wrapping at 2^128.
pub fn ctr_add(counter: &mut [u8; AES_BLOCK_SIZE], blocks: u64) {
    let mut carry = blocks as u128;
    for byte in counter.iter_mut().rev() {
        if carry == 0 {
            break;
        }
        let sum = *byte as u128 + (carry & 0xff);
        *byte = sum as u8;
        carry = (carry >> 8) + (sum >> 8);
    }
}

/// (config, crypto config) for a block cipher operation.
///
/// `key2` is the tweak key slot, used by XTS only.
pub fn block_cfg(mode: Mode, dir: Direction, key: u8, key2: u8) -> SeResult<(u32, u32)> {
    let engine: FieldValue<u32, Config::Register> = match dir {
        Direction::Encrypt => Config::ENC_ALG::AES_ENC + Config::DEC_ALG::NOP,
        Direction::Decrypt => Config::ENC_ALG::NOP + Config::DEC_ALG::AES_DEC,
    };
    let basic = match dir {
        Direction::Encrypt => Config::ENC_MODE::BASIC,
        Direction::Decrypt => Config::DEC_MODE::BASIC,
    };
    let key_index = CryptoConfig::KEY_INDEX.val(key as u32);
    let memory = CryptoConfig::INPUT_SEL::MEMORY + CryptoConfig::VCTRAM_SEL::IV;

    let (config, crypto) = match (mode, dir) {
        (Mode::Ecb, _) => (engine + basic, memory + CryptoConfig::XOR_POS::BYPASS),
        (Mode::Cbc, Direction::Encrypt) => (
            engine + basic,
            CryptoConfig::INPUT_SEL::MEMORY + CryptoConfig::XOR_POS::TOP + CryptoConfig::VCTRAM_SEL::AES_OUT,
        ),
        (Mode::Cbc, Direction::Decrypt) => (
            engine + basic,
            CryptoConfig::INPUT_SEL::MEMORY
                + CryptoConfig::XOR_POS::BOTTOM
                + CryptoConfig::VCTRAM_SEL::PREV_MEMORY,
        ),
        // Counter and output feedback run the encrypt engine both ways.
        (Mode::Ctr, _) => (
            Config::ENC_ALG::AES_ENC + Config::ENC_MODE::BASIC,
            CryptoConfig::INPUT_SEL::LINEAR_CTR
                + CryptoConfig::XOR_POS::BOTTOM
                + CryptoConfig::VCTRAM_SEL::IV
                + CryptoConfig::CTR_CNTN.val(1),
        ),
        (Mode::Ofb, _) => (
            Config::ENC_ALG::AES_ENC + Config::ENC_MODE::BASIC,
            CryptoConfig::INPUT_SEL::AES_OUT + CryptoConfig::XOR_POS::BOTTOM + CryptoConfig::VCTRAM_SEL::IV,
        ),
        (Mode::Xts, Direction::Encrypt) => (
            engine + Config::ENC_MODE::XTS,
            memory + CryptoConfig::XOR_POS::BYPASS + CryptoConfig::KEY2_INDEX.val(key2 as u32),
        ),
        (Mode::Xts, Direction::Decrypt) => (
            engine + Config::DEC_MODE::XTS,
            memory + CryptoConfig::XOR_POS::BYPASS + CryptoConfig::KEY2_INDEX.val(key2 as u32),
        ),
        (Mode::Gcm | Mode::Ccm | Mode::Cmac, _) => return Err(SeError::DRIVER_INVALID_ALGORITHM),
    };
    let config = config + Config::DST::MEMORY;
    Ok((config.into(), (crypto + key_index).into()))
}

/// Block cipher session.
pub struct SkCipher<'d, E: EngineSubmitter> {
    device: &'d SeDevice<E>,
    mode: Mode,
    keys: Option<(InstalledKey, Option<InstalledKey>)>,
}

impl<'d, E: EngineSubmitter> SkCipher<'d, E> {
    pub fn new(device: &'d SeDevice<E>, mode: Mode) -> SeResult<Self> {
        match mode {
            Mode::Ecb | Mode::Cbc | Mode::Ctr | Mode::Ofb | Mode::Xts => Ok(Self {
                device,
                mode,
                keys: None,
            }),
            Mode::Gcm | Mode::Ccm | Mode::Cmac => Err(SeError::DRIVER_INVALID_ALGORITHM),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Key handles, for diagnostics.
    pub fn keys(&self) -> Option<(&InstalledKey, Option<&InstalledKey>)> {
        self.keys.as_ref().map(|(k1, k2)| (k1, k2.as_ref()))
    }

    /// Install `key`, replacing any previous key. XTS takes both halves
    /// concatenated.
    pub fn setkey(&mut self, key: &[u8]) -> SeResult<()> {
        let halves = match self.mode {
            Mode::Xts => {
                if !matches!(key.len(), 32 | 64) {
                    return Err(SeError::DRIVER_INVALID_KEY_SIZE);
                }
                let (k1, k2) = key.split_at(key.len() / 2);
                (k1, Some(k2))
            }
            _ => (key, None),
        };
        self.clear_keys()?;

        let alg = Algorithm::Aes(self.mode);
        let keys = self.device.run(|run| {
            let k1 = run.install_key(alg, halves.0, true)?;
            match halves.1 {
                Some(k2) => match run.install_key(alg, k2, true) {
                    Ok(k2) => Ok((k1, Some(k2))),
                    Err(err) => {
                        if let Err(cleanup) = run.invalidate_key(&k1) {
                            cprintln!("[skcipher] key invalidation failed: {}", u32::from(cleanup));
                        }
                        Err(err)
                    }
                },
                None => Ok((k1, None)),
            }
        })?;
        self.keys = Some(keys);
        Ok(())
    }

    fn clear_keys(&mut self) -> SeResult<()> {
        let Some((k1, k2)) = self.keys.take() else {
            return Ok(());
        };
        self.device.run(|run| {
            let first = run.invalidate_key(&k1);
            let second = k2.as_ref().map_or(Ok(()), |k2| run.invalidate_key(k2));
            first.and(second)
        })
    }

    pub fn encrypt(&mut self, iv: &mut [u8; AES_BLOCK_SIZE], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        self.crypt(Direction::Encrypt, iv, src, dst)
    }

    pub fn decrypt(&mut self, iv: &mut [u8; AES_BLOCK_SIZE], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        self.crypt(Direction::Decrypt, iv, src, dst)
    }

    fn crypt(&mut self, dir: Direction, iv: &mut [u8; AES_BLOCK_SIZE], src: &[u8], dst: &mut [u8]) -> SeResult<()> {
        let (key, key2) = self.keys.as_ref().ok_or(SeError::DRIVER_KEY_NOT_SET)?;
        if dst.len() < src.len() {
            return Err(SeError::DRIVER_INVALID_SLICE);
        }
        match self.mode {
            Mode::Ecb | Mode::Cbc | Mode::Xts if src.len() % AES_BLOCK_SIZE != 0 => {
                return Err(SeError::DRIVER_INVALID_LENGTH);
            }
            _ => {}
        }
        regs::check_transfer_len(src.len().next_multiple_of(AES_BLOCK_SIZE))?;
        if src.is_empty() {
            return Ok(());
        }

        let mut req = SkcipherRequest {
            mode: self.mode,
            dir,
            key,
            key2: key2.as_ref(),
            iv,
            src,
            dst,
            bufs: None,
        };
        self.device.transfer_one_request(&mut req)
    }
}

impl<E: EngineSubmitter> Drop for SkCipher<'_, E> {
    fn drop(&mut self) {
        if let Err(err) = self.clear_keys() {
            cprintln!("[skcipher] key invalidation failed: {}", u32::from(err));
        }
    }
}

struct SkcipherRequest<'r> {
    mode: Mode,
    dir: Direction,
    key: &'r InstalledKey,
    key2: Option<&'r InstalledKey>,
    iv: &'r mut [u8; AES_BLOCK_SIZE],
    src: &'r [u8],
    dst: &'r mut [u8],
    // (input, output) scratch.
    bufs: Option<(DmaBuf, DmaBuf)>,
}

impl SkcipherRequest<'_> {
    fn padded_len(&self) -> usize {
        self.src.len().next_multiple_of(AES_BLOCK_SIZE)
    }

    fn submit<E: EngineSubmitter>(&self, run: &mut SeRun<'_, E>, slot: u8, slot2: u8) -> SeResult<()> {
        let (input, output) = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let len = self.padded_len();
        let (config, crypto_config) = block_cfg(self.mode, self.dir, slot, slot2)?;
        let op = CryptoOp {
            config,
            crypto_config,
            iv: (self.mode != Mode::Ecb).then(|| iv_words(self.iv)),
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
        };
        run.submit_op(&op)
    }

    /// Chaining value for the next request.
    fn update_iv(&mut self) {
        let len = self.src.len();
        match (self.mode, self.dir) {
            (Mode::Cbc, Direction::Encrypt) => {
                self.iv.copy_from_slice(&self.dst[len - AES_BLOCK_SIZE..len]);
            }
            (Mode::Cbc, Direction::Decrypt) => {
                self.iv.copy_from_slice(&self.src[len - AES_BLOCK_SIZE..len]);
            }
            (Mode::Ctr, _) => ctr_add(self.iv, len.div_ceil(AES_BLOCK_SIZE) as u64),
            _ => {}
        }
    }
}

impl<E: EngineSubmitter> EngineRequest<E> for SkcipherRequest<'_> {
    type Output = ();

    fn prepare(&mut self, device: &SeDevice<E>) -> SeResult<()> {
        let dma = device.dma();
        let len = self.padded_len();
        let input = dma.alloc(len)?;
        let output = dma.alloc(len)?;
        input.write_at(0, self.src)?;
        self.bufs = Some((input, output));
        Ok(())
    }

    fn run(&mut self, run: &mut SeRun<'_, E>) -> SeResult<()> {
        let key2 = self.key2;
        run.with_key(self.key, Some(RESERVED_SLOT), |run, slot| match key2 {
            Some(key2) => run.with_key(key2, Some(RESERVED_SLOT_XTS2), |run, slot2| self.submit(run, slot, slot2)),
            None => self.submit(run, slot, 0),
        })?;

        let (_, output) = self.bufs.as_ref().ok_or(SeError::DRIVER_DMA_EXHAUSTED)?;
        let len = self.src.len();
        output.read_at(0, &mut self.dst[..len])?;
        self.update_iv();
        Ok(())
    }

    fn unprepare(&mut self, _device: &SeDevice<E>, _result: &SeResult<()>) {
        self.bufs = None;
    }
}
