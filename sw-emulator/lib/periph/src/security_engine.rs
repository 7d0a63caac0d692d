/*++

Licensed under the Apache-2.0 license.

File Name:

    security_engine.rs

Abstract:

    File contains the emulated security engine. It executes command
    streams, holds the key table and the KDS block, and advances sync
    points on completion.

--*/

use std::collections::BTreeMap;

use se_drivers::cmdbuf::{OPCODE_INCR, OPCODE_INCR_W, OPCODE_NONINCR, OPCODE_NONINCR_W, OPCODE_SETPAYLOAD};
use se_drivers::regs::{
    self, AddrHi, Config, CryptoConfig, ErrStatus, KdsMutexStatus, KdsOperation, KdsRegionAttr, KdsStatus,
    Operation, Status,
};
use se_drivers::{DmaPool, KeyPurpose, SeChannel, SeError, SeResult};
use tock_registers::fields::FieldValue;
use tock_registers::LocalRegisterCopy;

use crate::datapath::{self, GcmState};
use crate::key_table::{KdsRegion, KeyEntry, KeyLocation, KeyTable};

const APERTURE_WORDS: usize = (regs::APERTURE_SIZE / 4) as usize;

type Block = [u8; 16];

/// Error condition latched into `ERR_STATUS` by a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    BadOpcode,
    BadKey,
    BadConfig,
    DmaFault,
    Kds,
    Injected,
}

impl Fault {
    pub fn code(self) -> u32 {
        let code: FieldValue<u32, ErrStatus::Register> = match self {
            Self::BadOpcode => ErrStatus::CODE::BAD_OPCODE,
            Self::BadKey => ErrStatus::CODE::BAD_KEY,
            Self::BadConfig => ErrStatus::CODE::BAD_CONFIG,
            Self::DmaFault => ErrStatus::CODE::DMA_FAULT,
            Self::Kds => ErrStatus::CODE::KDS,
            Self::Injected => ErrStatus::CODE::INJECTED,
        };
        code.into()
    }
}

/// Fault injection and behavior knobs.
#[derive(Debug, Clone)]
pub struct SecurityEngineArgs {
    /// Sync point reads before a completed operation becomes visible.
    pub completion_delay: u32,
    /// Never signal completion.
    pub hang: bool,
    /// Initial value of every sync point.
    pub syncpt_base: u32,
    /// Whether the KDS block exists.
    pub kds_present: bool,
    /// Region id granted on allocation.
    pub kds_region_id: u8,
    /// Region allocation reports FAIL.
    pub kds_alloc_fail: bool,
    /// `KDS_STATUS` stays BUSY after an allocation request.
    pub kds_status_stuck: bool,
    /// The hardware mutex always reads BUSY.
    pub mutex_stuck_busy: bool,
    /// Mutex requests are never granted.
    pub mutex_never_granted: bool,
    /// The next operation fails with an injected error status.
    pub error_on_next_op: bool,
    /// Let this many operations complete, then fail the next one.
    pub error_after_ops: Option<u32>,
}

impl Default for SecurityEngineArgs {
    fn default() -> Self {
        Self {
            completion_delay: 0,
            hang: false,
            syncpt_base: 0,
            kds_present: true,
            kds_region_id: 3,
            kds_alloc_fail: false,
            kds_status_stuck: false,
            mutex_stuck_busy: false,
            mutex_never_granted: false,
            error_on_next_op: false,
            error_after_ops: None,
        }
    }
}

struct PendingSync {
    id: u32,
    polls: u32,
}

#[derive(Clone, Copy)]
enum GcmStep {
    Gmac,
    Crypt,
    Final,
    Verify,
}

/// Emulated security engine.
pub struct SecurityEngine {
    args: SecurityEngineArgs,
    dma: DmaPool,
    regs: [u32; APERTURE_WORDS],
    key_staging: [u32; 8],
    keys: KeyTable,
    gcm: Option<GcmState>,
    mutex_held: bool,
    kds_status: u32,
    syncpts: BTreeMap<u32, u32>,
    pending: Vec<PendingSync>,
    ops_executed: u64,
}

impl SecurityEngine {
    /// Create an engine that reaches memory through `dma`.
    pub fn new(dma: DmaPool, args: SecurityEngineArgs) -> Self {
        Self {
            args,
            dma,
            regs: [0; APERTURE_WORDS],
            key_staging: [0; 8],
            keys: KeyTable::default(),
            gcm: None,
            mutex_held: false,
            kds_status: (KdsStatus::STATE::IDLE + KdsStatus::RESULT::NONE).into(),
            syncpts: BTreeMap::new(),
            pending: Vec::new(),
            ops_executed: 0,
        }
    }

    pub fn args(&self) -> &SecurityEngineArgs {
        &self.args
    }

    pub fn args_mut(&mut self) -> &mut SecurityEngineArgs {
        &mut self.args
    }

    pub fn dma(&self) -> &DmaPool {
        &self.dma
    }

    /// Key bytes held in local slot `slot`.
    pub fn slot_key_bytes(&self, slot: usize) -> Option<Vec<u8>> {
        self.keys.slot(slot).ok().map(|entry| entry.key.to_vec())
    }

    pub fn slot_manifest(&self, slot: usize) -> Option<u32> {
        self.keys.slot(slot).ok().map(|entry| entry.manifest)
    }

    /// Key bytes held at KDS id `id` of the allocated region.
    pub fn kds_key_bytes(&self, id: u8) -> Option<Vec<u8>> {
        let kds = self.keys.kds.as_ref()?;
        kds.get(kds.id, id).ok().map(|entry| entry.key.to_vec())
    }

    pub fn kds_region(&self) -> Option<u8> {
        self.keys.kds.as_ref().map(|kds| kds.id)
    }

    pub fn mutex_held(&self) -> bool {
        self.mutex_held
    }

    /// Operations started, including failed ones.
    pub fn ops_executed(&self) -> u64 {
        self.ops_executed
    }

    fn reg(&self, offset: u32) -> u32 {
        self.regs.get((offset / 4) as usize).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, offset: u32, value: u32) {
        if let Some(reg) = self.regs.get_mut((offset / 4) as usize) {
            *reg = value;
        }
    }

    fn read_reg(&self, offset: u32) -> u32 {
        match offset {
            regs::KDS_MUTEX_STATUS => {
                let status = if self.args.mutex_stuck_busy {
                    KdsMutexStatus::BUSY::SET
                } else if self.mutex_held {
                    KdsMutexStatus::GRANTED::SET
                } else {
                    KdsMutexStatus::BUSY::CLEAR
                };
                status.into()
            }
            regs::KDS_STATUS => self.kds_status,
            _ => self.reg(offset),
        }
    }

    fn write_reg(&mut self, offset: u32, value: u32) {
        match offset {
            regs::SYNCPT_INCR => self.sync_increment(value & 0x3ff),
            regs::OPERATION => {
                self.set_reg(offset, value);
                let op = LocalRegisterCopy::<u32, Operation::Register>::new(value);
                if op.matches_all(Operation::OP::START) {
                    self.start(op);
                }
            }
            regs::KEY_DATA => {
                self.set_reg(offset, value);
                let index = (self.reg(regs::KEY_ADDR) & 7) as usize;
                self.key_staging[index] = value;
            }
            regs::STATUS => {
                // Write-one-to-clear.
                let status = self.reg(regs::STATUS) & !value;
                self.set_reg(regs::STATUS, status);
            }
            regs::KDS_MUTEX_REQUEST => {
                if value & 1 != 0 && !self.args.mutex_stuck_busy && !self.args.mutex_never_granted {
                    self.mutex_held = true;
                }
            }
            regs::KDS_MUTEX_RELEASE => {
                if value & 1 != 0 {
                    self.mutex_held = false;
                }
            }
            regs::KDS_OPERATION => {
                self.set_reg(offset, value);
                let op = LocalRegisterCopy::<u32, KdsOperation::Register>::new(value);
                if op.matches_all(KdsOperation::OP::ALLOC_REGION) {
                    self.kds_alloc_region();
                }
            }
            _ => self.set_reg(offset, value),
        }
    }

    fn kds_alloc_region(&mut self) {
        let fail: u32 = (KdsStatus::STATE::IDLE + KdsStatus::RESULT::FAIL).into();
        if !self.mutex_held {
            self.kds_status = fail;
        } else if self.args.kds_status_stuck {
            self.kds_status = (KdsStatus::STATE::BUSY + KdsStatus::RESULT::NONE).into();
        } else if self.args.kds_alloc_fail || !self.args.kds_present {
            self.kds_status = fail;
        } else {
            let attr = LocalRegisterCopy::<u32, KdsRegionAttr::Register>::new(self.reg(regs::KDS_REGION_ATTR));
            let region = KdsRegion::new(
                self.args.kds_region_id,
                self.reg(regs::KDS_REGION_OWNER),
                attr.read(KdsRegionAttr::KEY_COUNT) as u8,
            );
            self.keys.kds = Some(region);
            self.set_reg(regs::KDS_REGION_ID, self.args.kds_region_id as u32);
            self.kds_status = (KdsStatus::STATE::IDLE + KdsStatus::RESULT::PASS).into();
        }
    }

    fn sync_increment(&mut self, id: u32) {
        if self.args.hang {
            return;
        }
        if self.args.completion_delay == 0 {
            self.bump_syncpt(id);
        } else {
            self.pending.push(PendingSync {
                id,
                polls: self.args.completion_delay,
            });
        }
    }

    fn bump_syncpt(&mut self, id: u32) {
        let base = self.args.syncpt_base;
        let value = self.syncpts.entry(id).or_insert(base);
        *value = value.wrapping_add(1);
    }

    fn execute_stream(&mut self, words: &[u32]) -> Result<(), Fault> {
        let mut words = words.iter().copied();
        let mut payload = None;
        while let Some(word) = words.next() {
            let opcode = word >> 28;
            match opcode {
                OPCODE_INCR | OPCODE_NONINCR => {
                    let offset = ((word >> 16) & 0xfff) << 2;
                    self.write_values(&mut words, offset, word & 0xffff, opcode == OPCODE_INCR)?;
                }
                OPCODE_SETPAYLOAD => payload = Some(word & 0x0fff_ffff),
                OPCODE_INCR_W | OPCODE_NONINCR_W => {
                    let count = payload.take().ok_or(Fault::BadOpcode)?;
                    let offset = (word & 0x3f_ffff) << 2;
                    self.write_values(&mut words, offset, count, opcode == OPCODE_INCR_W)?;
                }
                _ => return Err(Fault::BadOpcode),
            }
        }
        Ok(())
    }

    fn write_values(
        &mut self,
        words: &mut impl Iterator<Item = u32>,
        offset: u32,
        count: u32,
        incr: bool,
    ) -> Result<(), Fault> {
        for i in 0..count {
            let value = words.next().ok_or(Fault::BadOpcode)?;
            let reg = if incr { offset + 4 * i } else { offset };
            self.write_reg(reg, value);
        }
        Ok(())
    }

    fn latch(&mut self, fault: Fault) {
        let status = self.reg(regs::STATUS) | u32::from(Status::ERR::SET);
        self.set_reg(regs::STATUS, status);
        self.set_reg(regs::ERR_STATUS, fault.code());
    }

    fn start(&mut self, op: LocalRegisterCopy<u32, Operation::Register>) {
        self.ops_executed += 1;
        let countdown_hit = match self.args.error_after_ops {
            Some(0) => {
                self.args.error_after_ops = None;
                true
            }
            Some(n) => {
                self.args.error_after_ops = Some(n - 1);
                false
            }
            None => false,
        };
        let result = if core::mem::take(&mut self.args.error_on_next_op) || countdown_hit {
            Err(Fault::Injected)
        } else {
            self.execute(op)
        };
        if let Err(fault) = result {
            self.latch(fault);
        }
    }

    fn execute(&mut self, op: LocalRegisterCopy<u32, Operation::Register>) -> Result<(), Fault> {
        let config = LocalRegisterCopy::<u32, Config::Register>::new(self.reg(regs::CONFIG));
        match config.read_as_enum(Config::ENC_ALG) {
            Some(Config::ENC_ALG::Value::KEY_INSERT) => self.key_insert(),
            Some(Config::ENC_ALG::Value::KEY_MOVE) => self.key_move(),
            Some(Config::ENC_ALG::Value::KEY_INVALIDATE) => self.key_invalidate(),
            Some(Config::ENC_ALG::Value::AES_ENC) => self.encrypt_op(config, op),
            Some(Config::ENC_ALG::Value::NOP) => match config.read_as_enum(Config::DEC_ALG) {
                Some(Config::DEC_ALG::Value::AES_DEC) => self.decrypt_op(config, op),
                _ => Err(Fault::BadConfig),
            },
            None => Err(Fault::BadConfig),
        }
    }

    fn encrypt_op(
        &mut self,
        config: LocalRegisterCopy<u32, Config::Register>,
        op: LocalRegisterCopy<u32, Operation::Register>,
    ) -> Result<(), Fault> {
        match config.read_as_enum(Config::ENC_MODE) {
            Some(Config::ENC_MODE::Value::BASIC) => self.basic(false),
            Some(Config::ENC_MODE::Value::XTS) => self.xts(false),
            Some(Config::ENC_MODE::Value::GMAC) => self.gcm(GcmStep::Gmac, false, op),
            Some(Config::ENC_MODE::Value::GCM) => self.gcm(GcmStep::Crypt, false, op),
            Some(Config::ENC_MODE::Value::GCM_FINAL) => self.gcm(GcmStep::Final, false, op),
            Some(Config::ENC_MODE::Value::CMAC) => self.cmac(op.is_set(Operation::FINAL)),
            Some(Config::ENC_MODE::Value::CBC_MAC) => self.cbc_mac(),
            None => Err(Fault::BadConfig),
        }
    }

    fn decrypt_op(
        &mut self,
        config: LocalRegisterCopy<u32, Config::Register>,
        op: LocalRegisterCopy<u32, Operation::Register>,
    ) -> Result<(), Fault> {
        match config.read_as_enum(Config::DEC_MODE) {
            Some(Config::DEC_MODE::Value::BASIC) => self.basic(true),
            Some(Config::DEC_MODE::Value::XTS) => self.xts(true),
            Some(Config::DEC_MODE::Value::GMAC) => self.gcm(GcmStep::Gmac, true, op),
            Some(Config::DEC_MODE::Value::GCM) => self.gcm(GcmStep::Crypt, true, op),
            Some(Config::DEC_MODE::Value::GCM_FINAL) => self.gcm(GcmStep::Final, true, op),
            Some(Config::DEC_MODE::Value::GCM_VERIFY) => self.gcm(GcmStep::Verify, true, op),
            None => Err(Fault::BadConfig),
        }
    }

    fn crypto_config(&self) -> LocalRegisterCopy<u32, CryptoConfig::Register> {
        LocalRegisterCopy::new(self.reg(regs::CRYPTO_CONFIG))
    }

    fn iv(&self) -> Block {
        let mut iv = [0u8; 16];
        for (i, chunk) in iv.chunks_exact_mut(4).enumerate() {
            chunk.copy_from_slice(&self.reg(regs::LINEAR_CTR + 4 * i as u32).to_le_bytes());
        }
        iv
    }

    fn key(&self, field: tock_registers::fields::Field<u32, CryptoConfig::Register>, purpose: KeyPurpose) -> Result<Vec<u8>, Fault> {
        let index = self.crypto_config().read(field) as usize;
        Ok(self.keys.usable(index, purpose as u8)?.key.to_vec())
    }

    fn region(&self, lo: u32, hi: u32) -> (u64, usize) {
        let hi = LocalRegisterCopy::<u32, AddrHi::Register>::new(self.reg(hi));
        let iova = ((hi.read(AddrHi::MSB) as u64) << 32) | self.reg(lo) as u64;
        (iova, hi.read(AddrHi::SIZE) as usize)
    }

    /// Source data. Its size must agree with `LAST_BLOCK`.
    fn src(&self) -> Result<Vec<u8>, Fault> {
        let (iova, len) = self.region(regs::SRC_ADDR, regs::SRC_ADDR_HI);
        if len != 0 && regs::last_block_len(self.reg(regs::LAST_BLOCK)) != len {
            return Err(Fault::BadConfig);
        }
        let mut data = vec![0u8; len];
        self.dma.read(iova, &mut data).map_err(|_| Fault::DmaFault)?;
        Ok(data)
    }

    fn write_dst(&self, data: &[u8]) -> Result<(), Fault> {
        let (iova, len) = self.region(regs::DST_ADDR, regs::DST_ADDR_HI);
        if len < data.len() {
            return Err(Fault::DmaFault);
        }
        self.dma.write(iova, data).map_err(|_| Fault::DmaFault)
    }

    fn write_result(&mut self, mac: &Block) {
        for (i, chunk) in mac.chunks_exact(4).enumerate() {
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            self.set_reg(regs::RESULT + 4 * i as u32, word);
        }
    }

    fn basic(&mut self, decrypt: bool) -> Result<(), Fault> {
        let key = self.key(CryptoConfig::KEY_INDEX, KeyPurpose::Enc)?;
        let data = self.src()?;
        let out = datapath::basic(&key, decrypt, self.reg(regs::CRYPTO_CONFIG), &self.iv(), &data)?;
        self.write_dst(&out)
    }

    fn xts(&mut self, decrypt: bool) -> Result<(), Fault> {
        let key = self.key(CryptoConfig::KEY_INDEX, KeyPurpose::Xts)?;
        let key2 = self.key(CryptoConfig::KEY2_INDEX, KeyPurpose::Xts)?;
        let data = self.src()?;
        let out = datapath::xts(&key, &key2, decrypt, &self.iv(), &data)?;
        self.write_dst(&out)
    }

    fn gcm(&mut self, step: GcmStep, decrypt: bool, op: LocalRegisterCopy<u32, Operation::Register>) -> Result<(), Fault> {
        if op.is_set(Operation::INIT) || self.gcm.is_none() {
            let key = self.key(CryptoConfig::KEY_INDEX, KeyPurpose::Gcm)?;
            self.gcm = Some(GcmState::new(&key, &self.iv())?);
        }
        match step {
            GcmStep::Gmac => {
                let aad = self.src()?;
                let gcm = self.gcm.as_mut().ok_or(Fault::BadConfig)?;
                gcm.gmac(&aad);
                Ok(())
            }
            GcmStep::Crypt => {
                let data = self.src()?;
                let gcm = self.gcm.as_mut().ok_or(Fault::BadConfig)?;
                let out = gcm.crypt(decrypt, &data);
                self.write_dst(&out)
            }
            GcmStep::Final => {
                let aad_bits = self.reg(regs::AAD_LEN) as u64 | (self.reg(regs::AAD_LEN + 4) as u64) << 32;
                let msg_bits = self.reg(regs::CRYPT_MSG_LEN) as u64 | (self.reg(regs::CRYPT_MSG_LEN + 4) as u64) << 32;
                let gcm = self.gcm.as_mut().ok_or(Fault::BadConfig)?;
                let tag = gcm.finalize(aad_bits, msg_bits);
                self.write_dst(&tag)
            }
            GcmStep::Verify => {
                let received = self.src()?;
                let gcm = self.gcm.as_ref().ok_or(Fault::BadConfig)?;
                let word = if gcm.verify(&received) {
                    regs::GCM_VERIFY_OK
                } else {
                    0
                };
                let mut result = [0u8; 8];
                result[..4].copy_from_slice(&word.to_le_bytes());
                result[4..].copy_from_slice(&word.to_le_bytes());
                self.write_dst(&result)
            }
        }
    }

    fn cmac(&mut self, last: bool) -> Result<(), Fault> {
        let key = self.key(CryptoConfig::KEY_INDEX, KeyPurpose::Cmac)?;
        let data = self.src()?;
        let mac = datapath::cmac(&key, &self.iv(), &data, last)?;
        self.write_result(&mac);
        Ok(())
    }

    fn cbc_mac(&mut self) -> Result<(), Fault> {
        let key = self.key(CryptoConfig::KEY_INDEX, KeyPurpose::Enc)?;
        let data = self.src()?;
        let mac = datapath::cbc_mac(&key, &self.iv(), &data)?;
        self.write_result(&mac);
        Ok(())
    }

    fn key_insert(&mut self) -> Result<(), Fault> {
        let entry = KeyEntry::from_words(self.reg(regs::KEY_MANIFEST), &self.key_staging);
        self.key_staging = [0; 8];
        let slot = self.reg(regs::KEY_DST) as usize;
        *self.keys.slot_mut(slot)? = entry?;
        Ok(())
    }

    fn key_move(&mut self) -> Result<(), Fault> {
        let src = KeyLocation::decode(self.reg(regs::KEY_SRC_REF))?;
        let dst = KeyLocation::decode(self.reg(regs::KEY_DST_REF))?;
        let entry = self.keys.entry(src, self.mutex_held)?.clone();
        if entry.is_empty() {
            return Err(Fault::BadKey);
        }
        *self.keys.entry_mut(dst, self.mutex_held)? = entry;
        Ok(())
    }

    fn key_invalidate(&mut self) -> Result<(), Fault> {
        let target = KeyLocation::decode(self.reg(regs::KEY_DST_REF))?;
        *self.keys.entry_mut(target, self.mutex_held)? = KeyEntry::default();
        Ok(())
    }
}

impl SeChannel for SecurityEngine {
    fn push(&mut self, words: &[u32]) -> SeResult<()> {
        self.execute_stream(words).map_err(|fault| {
            self.latch(fault);
            SeError::DRIVER_ENGINE_PUSH_FAILURE
        })
    }

    fn syncpt_read(&mut self, id: u32) -> u32 {
        let mut completed = Vec::new();
        self.pending.retain_mut(|pending| {
            pending.polls -= 1;
            if pending.polls == 0 {
                completed.push(pending.id);
                false
            } else {
                true
            }
        });
        for id in completed {
            self.bump_syncpt(id);
        }
        self.syncpts.get(&id).copied().unwrap_or(self.args.syncpt_base)
    }

    fn read_register(&mut self, offset: u32) -> u32 {
        self.read_reg(offset)
    }

    fn write_register(&mut self, offset: u32, value: u32) {
        self.write_reg(offset, value)
    }
}
