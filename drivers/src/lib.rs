/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the security engine driver library.

--*/

pub mod cmdbuf;
pub mod printer;
pub mod regs;

mod alg_table;
mod ccm;
mod cmac;
mod device;
mod dma;
mod engine;
mod gcm;
mod kds;
mod key_handle;
mod key_slot;
mod key_store;
mod manifest;
mod skcipher;
mod wait;

pub use alg_table::{
    find as find_algorithm, AlgDescriptor, AlgType, Algorithm, Direction, Mode, AES_BLOCK_SIZE,
    AES_MAX_KEY_SIZE, AES_MIN_KEY_SIZE, ALGORITHMS, GCM_IV_SIZE,
};
pub use ccm::{ccm_format_input, AesCcm};
pub use self::cmac::{AesCmac, CmacState, CMAC_DIGEST_SIZE};
pub use device::{DeviceParams, EngineRequest, SeDevice, SeRun};
pub use dma::{DmaBuf, DmaPool};
pub use engine::{Engine, EngineSubmitter, SeChannel};
pub use gcm::AesGcm;
pub use kds::{encode_reference, reference_key_id, with_hw_mutex, KdsClient, KdsRegionConfig, KDS_MAX_KEYS};
pub use key_handle::KeyHandle;
pub use key_slot::{is_reserved, KeySlotTable, KEYSLOT_COUNT, RESERVED_SLOT, RESERVED_SLOT_XTS2};
pub use key_store::InstalledKey;
pub use manifest::{encode as encode_manifest, KeyManifest, KeyOwner, KeyPurpose, KeySizeClass};
pub use se_error::{SeError, SeErrorKind, SeResult};
pub use skcipher::{block_cfg, ctr_add, SkCipher};
pub use wait::{until_timeout, Clock, FakeClock, SystemClock};
