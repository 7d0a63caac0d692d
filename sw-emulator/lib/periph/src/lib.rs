/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the emulated security engine.

--*/

mod datapath;
mod key_table;
mod security_engine;

pub use key_table::{KdsRegion, KeyEntry, KeyLocation, KeyTable, KEY_SIZE_MAX};
pub use security_engine::{Fault, SecurityEngine, SecurityEngineArgs};
