//! Vectored-write helper shared by the merger and the latency logger.

use std::io::{self, ErrorKind, IoSlice, Write};

/// Writes every byte of `bufs`, retrying short writes and `EINTR` and
/// yielding on `EAGAIN`. A zero-length write is reported as
/// `ErrorKind::WriteZero`; anything else unrecoverable is passed through to
/// the caller, which treats it as fatal.
pub fn write_vectored_all<W: Write>(out: &mut W, mut bufs: &mut [IoSlice<'_>]) -> io::Result<()> {
    while !bufs.is_empty() {
        match out.write_vectored(bufs) {
            Ok(0) => {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_vectored returned zero",
                ))
            }
            Ok(n) => IoSlice::advance_slices(&mut bufs, n),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::yield_now(),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
