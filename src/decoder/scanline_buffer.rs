//! Staging area between the inflater and the filter engine.

use std::mem;

use super::stream::{DecodingError, FormatErrorInner};
use crate::common::BytesPerPixel;
use crate::filter::{unfilter, FilterType};

/// Collects decompressed bytes until a whole scanline is available, undoes
/// that scanline's filter against the previously reconstructed row, and keeps
/// the result around as the prediction context for the next row.
///
/// Scanline boundaries need not line up with the blocks the inflater
/// produces; whatever spills over simply stays buffered for the next row.
pub(crate) struct ScanlineBuffer {
    /// Decompressed bytes not yet consumed as scanlines. The inflater appends
    /// to this through [`Self::inflate_target`].
    pending: Vec<u8>,
    /// Read position within `pending`.
    cursor: usize,
    /// The last reconstructed scanline, without its filter byte. Empty at the
    /// start of the image and at the start of every interlace pass.
    reconstructed: Vec<u8>,
    /// Spare vector the next scanline is copied into before unfiltering;
    /// swapped with `reconstructed` afterwards.
    working: Vec<u8>,
}

impl ScanlineBuffer {
    pub fn new() -> Self {
        ScanlineBuffer {
            pending: Vec::new(),
            cursor: 0,
            reconstructed: Vec::new(),
            working: Vec::new(),
        }
    }

    /// Forgets the previous row, so the next scanline is reconstructed
    /// against a virtual all-zero one. Called when an interlace pass begins.
    pub fn start_pass(&mut self) {
        self.reconstructed.clear();
    }

    /// The most recently reconstructed scanline.
    pub fn last_row(&self) -> &[u8] {
        &self.reconstructed
    }

    /// Number of decompressed bytes waiting to be consumed as scanlines.
    pub fn buffered(&self) -> usize {
        self.pending.len() - self.cursor
    }

    /// Hands out the backing vector for the inflater to append to.
    ///
    /// Bytes already consumed as scanlines are discarded from the front
    /// first, which keeps the buffer at roughly one scanline of slack instead
    /// of accumulating the whole decompressed stream.
    pub fn inflate_target(&mut self) -> &mut Vec<u8> {
        if self.cursor > 0 {
            self.pending.drain(..self.cursor);
            self.cursor = 0;
        }
        &mut self.pending
    }

    /// Consumes one scanline of `rowlen` bytes (filter byte included) from
    /// the buffer and reconstructs it; the result is then [`Self::last_row`].
    ///
    /// The caller must have checked that [`Self::buffered`] covers `rowlen`.
    pub fn unfilter_scanline(
        &mut self,
        rowlen: usize,
        bpp: BytesPerPixel,
    ) -> Result<(), DecodingError> {
        debug_assert!(self.buffered() >= rowlen);

        let scanline = &self.pending[self.cursor..self.cursor + rowlen];
        let filter = FilterType::from_u8(scanline[0]).ok_or(DecodingError::Format(
            FormatErrorInner::UnknownFilterMethod(scanline[0]).into(),
        ))?;

        self.working.clear();
        self.working.extend_from_slice(&scanline[1..]);
        self.cursor += rowlen;

        unfilter(filter, bpp, &self.reconstructed, &mut self.working);
        mem::swap(&mut self.reconstructed, &mut self.working);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_filtered_rows_accumulate() {
        let mut buffer = ScanlineBuffer::new();
        // Two rows of three bytes, both Sub filtered.
        buffer
            .inflate_target()
            .extend_from_slice(&[1, 10, 5, 5, 1, 3, 3, 3]);

        buffer.unfilter_scanline(4, BytesPerPixel::One).unwrap();
        assert_eq!(buffer.last_row(), [10, 15, 20]);

        buffer.unfilter_scanline(4, BytesPerPixel::One).unwrap();
        assert_eq!(buffer.last_row(), [3, 6, 9]);
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn up_filter_uses_the_previous_row() {
        let mut buffer = ScanlineBuffer::new();
        buffer
            .inflate_target()
            .extend_from_slice(&[0, 7, 7, 2, 1, 2]);

        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();
        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();
        assert_eq!(buffer.last_row(), [8, 9]);
    }

    #[test]
    fn pass_start_resets_the_prediction_context() {
        let mut buffer = ScanlineBuffer::new();
        buffer
            .inflate_target()
            .extend_from_slice(&[0, 9, 9, 2, 1, 1]);

        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();
        buffer.start_pass();
        // Up against a fresh pass behaves like no filter at all.
        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();
        assert_eq!(buffer.last_row(), [1, 1]);
    }

    #[test]
    fn unknown_filter_byte_is_an_error() {
        let mut buffer = ScanlineBuffer::new();
        buffer.inflate_target().extend_from_slice(&[9, 0, 0]);
        assert!(buffer.unfilter_scanline(3, BytesPerPixel::One).is_err());
    }

    #[test]
    fn consumed_bytes_are_dropped_before_refilling() {
        let mut buffer = ScanlineBuffer::new();
        buffer.inflate_target().extend_from_slice(&[0, 1, 2, 0, 3]);
        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();

        // Refilling compacts the two leftover bytes to the front.
        let target = buffer.inflate_target();
        assert_eq!(target, &[0, 3]);
        target.push(4);
        buffer.unfilter_scanline(3, BytesPerPixel::One).unwrap();
        assert_eq!(buffer.last_row(), [3, 4]);
    }
}
