/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the security engine crates for
    error handling.

--*/
#![cfg_attr(not(any(feature = "std", test)), no_std)]
use core::convert::From;
use core::num::{NonZeroU32, TryFromIntError};

/// Security Engine Error Type
/// Derives debug, copy, clone, eq, and partial eq
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SeError(pub NonZeroU32);

/// Error category, taken from the upper 16 bits of the error code.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SeErrorKind {
    /// No free key slot, KDS key id or DMA scratch memory.
    ResourceExhausted,

    /// A sync point wait or a status poll exceeded its budget.
    HardwareTimeout,

    /// The engine or the KDS reported a failure status.
    HardwareReportedError,

    /// AEAD tag mismatch.
    AuthenticationFailure,

    /// Unsupported algorithm, key size, tag size or length combination.
    ConfigurationError,

    /// Driver state misuse or an internal invariant violation.
    Internal,
}

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: SeError = SeError::new_const($value);
        )*

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl SeError {
    /// Create an error; intended to only be used from const contexts, as we
    /// don't want runtime panics if val is zero. The preferred way to get a
    /// SeError from a u32 is to use `SeError::try_from()`.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("SeError cannot be 0"),
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> SeErrorKind {
        match self.0.get() >> 16 {
            0x0001 => SeErrorKind::ResourceExhausted,
            0x0002 => SeErrorKind::HardwareTimeout,
            0x0003 => SeErrorKind::HardwareReportedError,
            0x0004 => SeErrorKind::AuthenticationFailure,
            0x0005 => SeErrorKind::ConfigurationError,
            _ => SeErrorKind::Internal,
        }
    }

    define_error_constants![
        (
            DRIVER_KEYSLOT_EXHAUSTED,
            0x0001_0001,
            "No free local key slot"
        ),
        (
            DRIVER_DMA_EXHAUSTED,
            0x0001_0003,
            "DMA scratch memory exhausted"
        ),
        (
            DRIVER_KDS_UNAVAILABLE,
            0x0001_0004,
            "KDS tier is not available on this device"
        ),
        (
            DRIVER_ENGINE_SYNCPT_TIMEOUT,
            0x0002_0001,
            "Timed out waiting for the engine sync point"
        ),
        (
            DRIVER_KDS_MUTEX_TIMEOUT,
            0x0002_0002,
            "Timed out acquiring the KDS hardware mutex"
        ),
        (
            DRIVER_KDS_STATUS_TIMEOUT,
            0x0002_0003,
            "Timed out waiting for the KDS status to become idle"
        ),
        (
            DRIVER_ENGINE_STATUS_ERROR,
            0x0003_0001,
            "Engine status register reported an error"
        ),
        (
            DRIVER_ENGINE_PUSH_FAILURE,
            0x0003_0002,
            "Engine rejected the command buffer"
        ),
        (
            DRIVER_KDS_REGION_ALLOC_FAILURE,
            0x0003_0003,
            "KDS region allocation reported failure"
        ),
        (
            DRIVER_KDS_MUTEX_NOT_GRANTED,
            0x0003_0004,
            "KDS hardware mutex request was not granted"
        ),
        (
            DRIVER_GCM_TAG_MISMATCH,
            0x0004_0001,
            "GCM authentication tag mismatch"
        ),
        (
            DRIVER_CCM_TAG_MISMATCH,
            0x0004_0002,
            "CCM authentication tag mismatch"
        ),
        (
            DRIVER_MANIFEST_UNSUPPORTED,
            0x0005_0001,
            "Unsupported algorithm and key size combination"
        ),
        (
            DRIVER_INVALID_KEY_SIZE,
            0x0005_0002,
            "Invalid key size"
        ),
        (
            DRIVER_INVALID_TAG_SIZE,
            0x0005_0003,
            "Invalid authentication tag size"
        ),
        (
            DRIVER_INVALID_IV,
            0x0005_0004,
            "Invalid IV or nonce"
        ),
        (
            DRIVER_INVALID_LENGTH,
            0x0005_0005,
            "Invalid data length for the mode"
        ),
        (
            DRIVER_INVALID_SLICE,
            0x0005_0006,
            "Output buffer too small"
        ),
        (
            DRIVER_INVALID_ALGORITHM,
            0x0005_0007,
            "Algorithm not valid for this operation"
        ),
        (
            DRIVER_CMDBUF_OVERFLOW,
            0x0006_0001,
            "Command buffer overflow"
        ),
        (
            DRIVER_KEY_NOT_SET,
            0x0006_0002,
            "No key has been set on the context"
        ),
        (
            DRIVER_INVALID_KEY_HANDLE,
            0x0006_0003,
            "Key handle does not refer to a live key"
        ),
        (
            DRIVER_ENGINE_POISONED,
            0x0006_0004,
            "Engine lock was poisoned by a panicking request"
        ),
        (
            DRIVER_DMA_FAULT,
            0x0006_0005,
            "DMA access outside of an allocated region"
        ),
        (
            DRIVER_CMAC_INVALID_STATE,
            0x0006_0006,
            "CMAC operation issued in the wrong state"
        ),
        (
            DRIVER_CMAC_INVALID_EXPORT,
            0x0006_0007,
            "Imported CMAC state is malformed"
        ),
    ];
}

impl core::fmt::Display for SeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SeError({:#010x}, {:?})", self.0.get(), self.kind())
    }
}

impl From<core::num::NonZeroU32> for crate::SeError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::SeError(val)
    }
}

impl From<SeError> for core::num::NonZeroU32 {
    fn from(val: SeError) -> Self {
        val.0
    }
}

impl From<SeError> for u32 {
    fn from(val: SeError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for SeError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(SeError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type SeResult<T> = Result<T, SeError>;
