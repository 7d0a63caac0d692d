/*++

Licensed under the Apache-2.0 license.

File Name:

    cmdbuf.rs

Abstract:

    File contains the command buffer encoder: the primitive opcodes consumed
    by the engine's command processor and the composite buffers built from
    them.

    Wire format: one 32-bit word per entry, opcode class in bits 31:28.

        INCR       1  [27:16] word offset  [15:0] count, then `count` values
                      written to consecutive registers
        NONINCR    2  [27:16] word offset  [15:0] count, then `count` values
                      written to the same register
        SETPAYLOAD 9  [27:0] count of values carried by the next wide opcode
        INCR_W     10 [21:0] word offset, values written to consecutive
                      registers
        NONINCR_W  11 [21:0] word offset, values written to the same register

    A sync point increment is a NONINCR write of one word to register 0 whose
    value carries the condition in bits 17:10 and the sync point id in bits
    9:0.

--*/

use crate::regs::{self, AddrHi, Operation};
use crate::{SeError, SeResult};

pub const OPCODE_INCR: u32 = 1;
pub const OPCODE_NONINCR: u32 = 2;
pub const OPCODE_SETPAYLOAD: u32 = 9;
pub const OPCODE_INCR_W: u32 = 10;
pub const OPCODE_NONINCR_W: u32 = 11;

/// Sync point condition: increment once the preceding operation is done.
pub const SYNCPT_COND_OP_DONE: u32 = 1;

/// Words in a command buffer. Large enough for the biggest composite (a
/// 256-bit key insert).
pub const CMDBUF_WORDS: usize = 64;

pub const fn opcode_incr(offset: u32, count: u32) -> u32 {
    (OPCODE_INCR << 28) | (((offset >> 2) & 0xfff) << 16) | (count & 0xffff)
}

pub const fn opcode_nonincr(offset: u32, count: u32) -> u32 {
    (OPCODE_NONINCR << 28) | (((offset >> 2) & 0xfff) << 16) | (count & 0xffff)
}

pub const fn opcode_setpayload(count: u32) -> u32 {
    (OPCODE_SETPAYLOAD << 28) | (count & 0x0fff_ffff)
}

pub const fn opcode_incr_w(offset: u32) -> u32 {
    (OPCODE_INCR_W << 28) | ((offset >> 2) & 0x3f_ffff)
}

pub const fn opcode_nonincr_w(offset: u32) -> u32 {
    (OPCODE_NONINCR_W << 28) | ((offset >> 2) & 0x3f_ffff)
}

pub const fn syncpt_incr_value(id: u32) -> u32 {
    ((SYNCPT_COND_OP_DONE & 0xff) << 10) | (id & 0x3ff)
}

/// Appends opcodes to a caller-provided word buffer.
pub struct CmdBuf<'a> {
    buf: &'a mut [u32],
    len: usize,
}

impl<'a> CmdBuf<'a> {
    pub fn new(buf: &'a mut [u32]) -> Self {
        Self { buf, len: 0 }
    }

    fn push(&mut self, word: u32) -> SeResult<()> {
        let slot = self
            .buf
            .get_mut(self.len)
            .ok_or(SeError::DRIVER_CMDBUF_OVERFLOW)?;
        *slot = word;
        self.len += 1;
        Ok(())
    }

    fn push_all(&mut self, values: &[u32]) -> SeResult<()> {
        for &v in values {
            self.push(v)?;
        }
        Ok(())
    }

    /// Announce that the next wide opcode carries `count` values.
    pub fn set_payload(&mut self, count: u32) -> SeResult<()> {
        self.push(opcode_setpayload(count))
    }

    /// Write `values` to consecutive registers starting at `reg`.
    pub fn write_incr(&mut self, reg: u32, values: &[u32]) -> SeResult<()> {
        self.push(opcode_incr(reg, values.len() as u32))?;
        self.push_all(values)
    }

    /// Write every value in `values` to `reg`.
    pub fn write_nonincr(&mut self, reg: u32, values: &[u32]) -> SeResult<()> {
        self.push(opcode_nonincr(reg, values.len() as u32))?;
        self.push_all(values)
    }

    /// Wide incrementing write: a payload announcement followed by the values.
    pub fn write_incr_w(&mut self, reg: u32, values: &[u32]) -> SeResult<()> {
        self.set_payload(values.len() as u32)?;
        self.push(opcode_incr_w(reg))?;
        self.push_all(values)
    }

    /// Single register write.
    pub fn write(&mut self, reg: u32, value: u32) -> SeResult<()> {
        self.write_nonincr(reg, &[value])
    }

    /// Final word pair of every command buffer.
    pub fn sync_increment(&mut self, syncpt_id: u32) -> SeResult<()> {
        self.write(regs::SYNCPT_INCR, syncpt_incr_value(syncpt_id))
    }

    /// Number of words written so far.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn finish(self) -> usize {
        self.len
    }
}

fn op_dummy() -> u32 {
    Operation::OP::DUMMY.into()
}

fn op_start() -> u32 {
    (Operation::OP::START + Operation::LASTBUF::SET).into()
}

fn addr_hi(iova: u64, len: usize) -> SeResult<u32> {
    regs::check_transfer_len(len)?;
    Ok((AddrHi::MSB.val((iova >> 32) as u32 & 0xff) + AddrHi::SIZE.val(len as u32)).into())
}

/// Program `key` into local slot `slot`. Also used with all-zero material to
/// wipe a slot.
pub fn key_insert_cmd(
    buf: &mut [u32],
    manifest: u32,
    slot: u32,
    key: &[u32],
    syncpt_id: u32,
) -> SeResult<usize> {
    let mut cmd = CmdBuf::new(buf);
    cmd.write(regs::OPERATION, op_dummy())?;
    cmd.write(regs::KEY_MANIFEST, manifest)?;
    cmd.write(regs::KEY_DST, slot)?;
    for (i, &word) in key.iter().enumerate() {
        cmd.write_incr(regs::KEY_ADDR, &[i as u32, word])?;
    }
    cmd.write(regs::CONFIG, cfg_key_op(regs::Config::ENC_ALG::KEY_INSERT))?;
    cmd.write(regs::OPERATION, op_start())?;
    cmd.sync_increment(syncpt_id)?;
    Ok(cmd.finish())
}

/// Transfer a key between a local slot and a KDS reference, in either
/// direction.
pub fn key_move_cmd(buf: &mut [u32], src_ref: u32, dst_ref: u32, syncpt_id: u32) -> SeResult<usize> {
    let mut cmd = CmdBuf::new(buf);
    cmd.write(regs::OPERATION, op_dummy())?;
    cmd.write_incr(regs::KEY_SRC_REF, &[src_ref, dst_ref])?;
    cmd.write(regs::CONFIG, cfg_key_op(regs::Config::ENC_ALG::KEY_MOVE))?;
    cmd.write(regs::OPERATION, op_start())?;
    cmd.sync_increment(syncpt_id)?;
    Ok(cmd.finish())
}

/// Invalidate the key at `target_ref`.
pub fn key_invalidate_cmd(buf: &mut [u32], target_ref: u32, syncpt_id: u32) -> SeResult<usize> {
    let mut cmd = CmdBuf::new(buf);
    cmd.write(regs::OPERATION, op_dummy())?;
    cmd.write(regs::KEY_DST_REF, target_ref)?;
    cmd.write(
        regs::CONFIG,
        cfg_key_op(regs::Config::ENC_ALG::KEY_INVALIDATE),
    )?;
    cmd.write(regs::OPERATION, op_start())?;
    cmd.sync_increment(syncpt_id)?;
    Ok(cmd.finish())
}

fn cfg_key_op(alg: tock_registers::fields::FieldValue<u32, regs::Config::Register>) -> u32 {
    (alg + regs::Config::DEC_ALG::NOP + regs::Config::DST::KEYTABLE).into()
}

/// DMA transfer described by an engine address and a byte length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRegion {
    pub iova: u64,
    pub len: usize,
}

/// Everything a data-path operation programs before `START`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CryptoOp {
    pub config: u32,
    pub crypto_config: u32,
    /// IV or linear counter, loaded through a wide write.
    pub iv: Option<[u32; 4]>,
    /// AAD and message lengths in bits, for GCM_FINAL.
    pub lengths: Option<(u64, u64)>,
    pub last_block: u32,
    pub src: Option<DmaRegion>,
    pub dst: Option<DmaRegion>,
    /// `Operation` word, START is added by the encoder.
    pub op_flags: u32,
}

/// Encode a block cipher, AEAD or MAC sub-operation.
///
/// Order: IV, lengths, last block, config pair, source, destination,
/// operation, sync.
pub fn crypto_op_cmd(buf: &mut [u32], op: &CryptoOp, syncpt_id: u32) -> SeResult<usize> {
    let mut cmd = CmdBuf::new(buf);
    if let Some(iv) = op.iv {
        cmd.write_incr_w(regs::LINEAR_CTR, &iv)?;
    }
    if let Some((aad_bits, msg_bits)) = op.lengths {
        cmd.write_incr(
            regs::AAD_LEN,
            &[aad_bits as u32, (aad_bits >> 32) as u32],
        )?;
        cmd.write_incr(
            regs::CRYPT_MSG_LEN,
            &[msg_bits as u32, (msg_bits >> 32) as u32],
        )?;
    }
    cmd.write(regs::LAST_BLOCK, op.last_block)?;
    cmd.write_incr(regs::CONFIG, &[op.config, op.crypto_config])?;
    if let Some(src) = op.src {
        cmd.write_incr(regs::SRC_ADDR, &[src.iova as u32, addr_hi(src.iova, src.len)?])?;
    }
    if let Some(dst) = op.dst {
        cmd.write_incr(regs::DST_ADDR, &[dst.iova as u32, addr_hi(dst.iova, dst.len)?])?;
    }
    cmd.write(regs::OPERATION, op.op_flags | op_start())?;
    cmd.sync_increment(syncpt_id)?;
    Ok(cmd.finish())
}
