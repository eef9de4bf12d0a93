//! Byte-order read/write helpers shared by the decoder and encoder.

use std::io;

/// Read big-endian primitives from a byte source.
pub(crate) trait ReadBytesExt: io::Read {
    fn read_be_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }
}

impl<R: io::Read + ?Sized> ReadBytesExt for R {}

/// Write big-endian primitives to a byte sink.
pub(crate) trait WriteBytesExt: io::Write {
    fn write_be_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_all(&value.to_be_bytes())
    }
}

impl<W: io::Write + ?Sized> WriteBytesExt for W {}
