//! Byte transport abstraction.
//!
//! The engine never blocks on its own: both operations may return
//! [`std::io::ErrorKind::WouldBlock`], which surfaces as a suspension point
//! rather than an error. Anything implementing [`std::io::Read`] and
//! [`std::io::Write`] is a transport.

use std::io::{self, Read, Write};

/// A bidirectional byte stream carrying records.
pub trait Transport {
    /// Send as much of `buf` as the transport will take, returning the
    /// number of bytes consumed.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Receive up to `buf.len()` bytes. `Ok(0)` means the peer closed the
    /// transport.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

impl<T: Read + Write> Transport for T {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }
}
