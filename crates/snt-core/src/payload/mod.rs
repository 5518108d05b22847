//! Payload handling module.
//!
//! Image pacing for boot uploads, flash/firmware update packets and the
//! register-script format.

pub mod firmware;
pub mod flash;
pub mod script;

use std::io::{self, Read};

pub use firmware::{PacerState, StepOutcome, UploadKind, UploadSession, UploadStatus, open_image};
pub use flash::{FlashPacket, FlashUpdate};
pub use script::{RegisterGroup, ScriptError};

/// Read until `buf` is full or the reader hits end of file.
pub(crate) fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reader that hands out at most 3 bytes per call.
    struct Trickle<'a>(&'a [u8]);

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(3).min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0 = &self.0[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_read_full_joins_short_reads() {
        let data: Vec<u8> = (0..10).collect();
        let mut reader = Trickle(&data);
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 8);
        assert_eq!(&buf, &data[..8]);

        let mut rest = [0u8; 8];
        assert_eq!(read_full(&mut reader, &mut rest).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut rest).unwrap(), 0);
    }
}
