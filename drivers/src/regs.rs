/*++

Licensed under the Apache-2.0 license.

File Name:

    regs.rs

Abstract:

    Register map and register field layouts of the security engine.

    Offsets are byte offsets inside the engine aperture. Command buffers
    address registers by word offset (`offset >> 2`).

--*/

use crate::{SeError, SeResult};
use tock_registers::register_bitfields;

/// Sync point increment register, the target of the final word of every
/// command buffer.
pub const SYNCPT_INCR: u32 = 0x000;
pub const CONFIG: u32 = 0x004;
pub const CRYPTO_CONFIG: u32 = 0x008;
pub const OPERATION: u32 = 0x00c;
pub const LAST_BLOCK: u32 = 0x010;

/// Four consecutive words holding the IV or the linear counter.
pub const LINEAR_CTR: u32 = 0x020;
pub const LINEAR_CTR_WORDS: usize = 4;

/// AAD length in bits, low word then high word.
pub const AAD_LEN: u32 = 0x030;
/// Message length in bits, low word then high word.
pub const CRYPT_MSG_LEN: u32 = 0x038;

pub const SRC_ADDR: u32 = 0x040;
pub const SRC_ADDR_HI: u32 = 0x044;
pub const DST_ADDR: u32 = 0x048;
pub const DST_ADDR_HI: u32 = 0x04c;

pub const KEY_MANIFEST: u32 = 0x050;
pub const KEY_DST: u32 = 0x054;
/// `KEY_ADDR` and `KEY_DATA` are adjacent so an address/data pair is a
/// single two-word incrementing write.
pub const KEY_ADDR: u32 = 0x058;
pub const KEY_DATA: u32 = 0x05c;
/// `KEY_SRC_REF` and `KEY_DST_REF` are adjacent for the same reason.
pub const KEY_SRC_REF: u32 = 0x060;
pub const KEY_DST_REF: u32 = 0x064;

pub const STATUS: u32 = 0x070;
pub const ERR_STATUS: u32 = 0x074;

/// Four words of MAC result (CMAC, CBC-MAC).
pub const RESULT: u32 = 0x080;
pub const RESULT_WORDS: usize = 4;

pub const KDS_MUTEX_REQUEST: u32 = 0x100;
pub const KDS_MUTEX_STATUS: u32 = 0x104;
pub const KDS_MUTEX_RELEASE: u32 = 0x108;
pub const KDS_REGION_ATTR: u32 = 0x10c;
pub const KDS_REGION_OWNER: u32 = 0x110;
pub const KDS_OPERATION: u32 = 0x114;
pub const KDS_STATUS: u32 = 0x118;
pub const KDS_REGION_ID: u32 = 0x11c;

/// Size of the engine aperture in bytes.
pub const APERTURE_SIZE: u32 = 0x200;

/// Value written twice by a successful GCM_VERIFY.
pub const GCM_VERIFY_OK: u32 = 0x5a5a_5a5a;

register_bitfields! [
    u32,

    pub Config [
        DST OFFSET(2) NUMBITS(3) [
            MEMORY = 0,
            HASH_REG = 1,
            KEYTABLE = 2,
        ],
        DEC_ALG OFFSET(8) NUMBITS(4) [
            NOP = 0,
            AES_DEC = 1,
        ],
        ENC_ALG OFFSET(12) NUMBITS(4) [
            NOP = 0,
            AES_ENC = 1,
            KEY_INSERT = 8,
            KEY_MOVE = 9,
            KEY_INVALIDATE = 10,
        ],
        DEC_MODE OFFSET(16) NUMBITS(8) [
            BASIC = 0,
            XTS = 1,
            GMAC = 3,
            GCM = 4,
            GCM_FINAL = 5,
            GCM_VERIFY = 6,
        ],
        ENC_MODE OFFSET(24) NUMBITS(8) [
            BASIC = 0,
            XTS = 1,
            GMAC = 3,
            GCM = 4,
            GCM_FINAL = 5,
            CMAC = 7,
            CBC_MAC = 12,
        ],
    ],

    pub CryptoConfig [
        HASH_ENB OFFSET(0) NUMBITS(1) [],
        XOR_POS OFFSET(1) NUMBITS(2) [
            BYPASS = 0,
            TOP = 2,
            BOTTOM = 3,
        ],
        INPUT_SEL OFFSET(3) NUMBITS(2) [
            MEMORY = 0,
            AES_OUT = 1,
            LINEAR_CTR = 2,
        ],
        VCTRAM_SEL OFFSET(5) NUMBITS(2) [
            IV = 0,
            AES_OUT = 2,
            PREV_MEMORY = 3,
        ],
        IV_SEL OFFSET(7) NUMBITS(1) [
            ORIGINAL = 0,
            UPDATED = 1,
        ],
        CTR_CNTN OFFSET(11) NUMBITS(8) [],
        KEY_INDEX OFFSET(24) NUMBITS(4) [],
        KEY2_INDEX OFFSET(28) NUMBITS(4) [],
    ],

    pub Operation [
        OP OFFSET(0) NUMBITS(2) [
            IDLE = 0,
            START = 1,
            DUMMY = 3,
        ],
        WRSTALL OFFSET(3) NUMBITS(1) [],
        INIT OFFSET(4) NUMBITS(1) [],
        FINAL OFFSET(5) NUMBITS(1) [],
        LASTBUF OFFSET(16) NUMBITS(1) [],
    ],

    pub LastBlock [
        // Number of blocks minus one.
        BLOCKS OFFSET(0) NUMBITS(20) [],
        // Valid bits in the final block, zero when the block is full.
        RES_BITS OFFSET(20) NUMBITS(8) [],
    ],

    pub AddrHi [
        MSB OFFSET(24) NUMBITS(8) [],
        SIZE OFFSET(0) NUMBITS(24) [],
    ],

    pub Status [
        BUSY OFFSET(0) NUMBITS(1) [],
        ERR OFFSET(1) NUMBITS(1) [],
    ],

    pub ErrStatus [
        CODE OFFSET(0) NUMBITS(8) [
            NONE = 0,
            BAD_OPCODE = 1,
            BAD_KEY = 2,
            BAD_CONFIG = 3,
            DMA_FAULT = 4,
            KDS = 5,
            INJECTED = 0xff,
        ],
    ],

    pub KdsMutexStatus [
        BUSY OFFSET(0) NUMBITS(1) [],
        GRANTED OFFSET(1) NUMBITS(1) [],
    ],

    pub KdsRegionAttr [
        OWNER OFFSET(0) NUMBITS(8) [],
        MAX_KEY_SIZE OFFSET(8) NUMBITS(2) [],
        KEY_COUNT OFFSET(16) NUMBITS(8) [],
    ],

    pub KdsOperation [
        OP OFFSET(0) NUMBITS(2) [
            NONE = 0,
            ALLOC_REGION = 1,
        ],
    ],

    pub KdsStatus [
        STATE OFFSET(0) NUMBITS(2) [
            IDLE = 0,
            BUSY = 1,
        ],
        RESULT OFFSET(2) NUMBITS(2) [
            NONE = 0,
            PASS = 1,
            FAIL = 2,
        ],
    ],

    pub KdsRef [
        KEY_ID OFFSET(0) NUMBITS(8) [],
        REGION OFFSET(16) NUMBITS(8) [],
        TABLE OFFSET(28) NUMBITS(4) [
            LOCAL = 0,
            GLOBAL = 0xa,
        ],
    ],
];

/// Longest transfer a single operation can describe, bounded by the 24-bit
/// `SIZE` field of the address words.
pub const MAX_TRANSFER_LEN: usize = 0xff_ffff;

pub fn check_transfer_len(len: usize) -> SeResult<()> {
    if len > MAX_TRANSFER_LEN {
        return Err(SeError::DRIVER_INVALID_LENGTH);
    }
    Ok(())
}

/// Encodes a transfer length in the `LAST_BLOCK` format for a block size of
/// 16 bytes. A zero length encodes as a single empty block.
pub fn last_block(len: usize) -> SeResult<u32> {
    check_transfer_len(len)?;
    let blocks = len.div_ceil(16).max(1) as u32;
    let res_bits = ((len % 16) * 8) as u32;
    Ok((LastBlock::BLOCKS.val(blocks - 1) + LastBlock::RES_BITS.val(res_bits)).into())
}

/// Decodes a `LAST_BLOCK` value back to a byte length.
pub fn last_block_len(val: u32) -> usize {
    let blocks = (val & 0xf_ffff) as usize + 1;
    let res_bytes = ((val >> 20) & 0xff) as usize / 8;
    if res_bytes == 0 {
        blocks * 16
    } else {
        (blocks - 1) * 16 + res_bytes
    }
}
