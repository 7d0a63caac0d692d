/*++

Licensed under the Apache-2.0 license.

File Name:

    printer.rs

Abstract:

    File contains support routines and macros for driver trace output.

--*/
use core::convert::Infallible;
use ufmt::{uDisplay, uWrite};

#[derive(Default)]
pub struct Printer;

cfg_if::cfg_if! {
    if #[cfg(feature = "verbose")] {
        fn emit(str: &str) {
            eprint!("{str}");
        }
    } else {
        /// Trace output is discarded unless the `verbose` feature is enabled.
        #[inline(always)]
        fn emit(_str: &str) {}
    }
}

impl uWrite for Printer {
    type Error = Infallible;

    /// Writes a string slice into this writer, returning whether the write succeeded.
    fn write_str(&mut self, str: &str) -> Result<(), Self::Error> {
        emit(str);
        Ok(())
    }
}

#[macro_export]
macro_rules! cprint {
    ($($tt:tt)*) => {{
        let _ = ufmt::uwrite!(&mut $crate::printer::Printer::default(), $($tt)*);
    }}
}

#[macro_export]
macro_rules! cprintln {
    ($($tt:tt)*) => {{
        let _ = ufmt::uwriteln!(&mut $crate::printer::Printer::default(), $($tt)*);
    }}
}

#[macro_export]
macro_rules! cprint_slice {
    ($name:expr, $arr:expr) => {
        $crate::cprintln!("{} = {}", $name, $crate::printer::HexWords($arr));
    };
}

/// Hex rendering of a word slice, used to trace command buffers.
pub struct HexWords<'a>(pub &'a [u32]);
impl uDisplay for HexWords<'_> {
    fn fmt<W>(&self, f: &mut ufmt::Formatter<'_, W>) -> Result<(), W::Error>
    where
        W: uWrite + ?Sized,
    {
        for (i, &word) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_char(' ')?;
            }
            for shift in (0..8).rev() {
                let c = ((word >> (shift * 4)) & 0xf) as u8;
                if c < 10 {
                    f.write_char((c + b'0') as char)?;
                } else {
                    f.write_char((c - 10 + b'a') as char)?;
                }
            }
        }
        Ok(())
    }
}
