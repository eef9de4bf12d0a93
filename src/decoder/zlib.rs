//! Incremental zlib decompression of the IDAT payload stream.

use fdeflate::Decompressor;

use super::stream::{DecodingError, FormatErrorInner, CHUNK_BUFFER_SIZE};

/// The deflate back-reference distance: compressed data may refer to up to
/// this many of the most recently produced bytes.
const WINDOW_SIZE: usize = 32 * 1024;

/// Streaming inflate over the concatenated IDAT payloads.
///
/// Compressed input arrives in chunk-sized pieces and row consumption is
/// paced by the caller, so scanline boundaries fall anywhere relative to
/// deflate block boundaries. Decoded bytes are staged in a window buffer:
/// the codec needs the trailing [`WINDOW_SIZE`] around to resolve
/// back-references, everything older is final and handed to the caller.
pub(super) struct Inflater {
    codec: Box<Decompressor>,
    /// Staging buffer; bytes up to `produced` are decoded, of which the
    /// first `handed_off` were already appended to a caller's sink.
    window: Vec<u8>,
    handed_off: usize,
    produced: usize,
    /// Whether any input reached the codec yet. The Adler-32 switch is
    /// frozen from that point on.
    started: bool,
    skip_adler32: bool,
    /// Cap on the total decoded size, derived from the image geometry.
    output_limit: usize,
}

impl Inflater {
    pub(crate) fn new() -> Self {
        Inflater {
            codec: Box::new(Decompressor::new()),
            window: Vec::new(),
            handed_off: 0,
            produced: 0,
            started: false,
            skip_adler32: false,
            output_limit: usize::MAX,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self.codec = Decompressor::new();
        self.window.clear();
        self.handed_off = 0;
        self.produced = 0;
        self.started = false;
        self.output_limit = usize::MAX;
    }

    /// Bounds the total decoded size, keeping the window allocation in check
    /// when the header promised a small image.
    pub(crate) fn set_output_limit(&mut self, limit: usize) {
        self.output_limit = limit;
    }

    /// Switches Adler-32 validation off. Only honoured before the first
    /// input byte is consumed; returns whether the switch took effect.
    pub(crate) fn set_ignore_adler32(&mut self, skip: bool) -> bool {
        if !self.started {
            self.skip_adler32 = skip;
        }
        !self.started
    }

    /// Feeds `input` to the codec and appends whatever became final to
    /// `sink`. Returns the number of input bytes consumed.
    pub(crate) fn inflate(
        &mut self,
        input: &[u8],
        sink: &mut Vec<u8>,
    ) -> Result<usize, DecodingError> {
        if self.codec.is_done() {
            // Data past the end of the compressed stream is tolerated and
            // discarded, the way most decoders treat trailing garbage.
            return Ok(input.len());
        }
        if !self.started {
            if self.skip_adler32 {
                self.codec.ignore_adler32();
            }
            self.started = true;
        }

        self.grow_window();
        let (consumed, written) = self
            .codec
            .read(input, &mut self.window, self.produced, false)
            .map_err(|err| {
                DecodingError::Format(FormatErrorInner::CorruptFlateStream { err }.into())
            })?;
        self.produced += written;
        self.hand_off(sink);
        Ok(consumed)
    }

    /// Drains everything the codec still holds back. Called once the IDAT
    /// sequence is over, since the stream may end mid buffer refill.
    pub(crate) fn finish(&mut self, sink: &mut Vec<u8>) -> Result<(), DecodingError> {
        while self.started && !self.codec.is_done() {
            self.grow_window();
            let (_, written) = self
                .codec
                .read(&[], &mut self.window, self.produced, true)
                .map_err(|err| {
                    DecodingError::Format(FormatErrorInner::CorruptFlateStream { err }.into())
                })?;
            assert!(
                written > 0 || self.codec.is_done(),
                "no progress draining the inflater"
            );
            self.produced += written;
            self.hand_off(sink);
        }
        self.window.clear();
        self.handed_off = 0;
        self.produced = 0;
        Ok(())
    }

    /// Appends the finalized span to `sink`, then compacts the window once
    /// it has grown well past the back-reference distance. Compacting only
    /// every few windows keeps the amortized copying cost low.
    fn hand_off(&mut self, sink: &mut Vec<u8>) {
        sink.extend_from_slice(&self.window[self.handed_off..self.produced]);
        self.handed_off = self.produced;

        if self.produced > 4 * WINDOW_SIZE {
            let keep_from = self.produced - WINDOW_SIZE;
            self.window.copy_within(keep_from..self.produced, 0);
            self.produced = WINDOW_SIZE;
            self.handed_off = WINDOW_SIZE;
        }
    }

    /// Makes room for the next batch of decoded bytes, doubling the window
    /// so repeated refills stay cheap. A reached cap is treated as a wrong
    /// IHDR-derived estimate and lifted; the caller polices sizes.
    fn grow_window(&mut self) {
        if self.produced >= self.output_limit {
            self.output_limit = usize::MAX;
        }
        let needed = (self.produced + CHUNK_BUFFER_SIZE).min(self.output_limit);
        if self.window.len() >= needed {
            return;
        }
        let target = needed
            .max(self.window.len().saturating_mul(2))
            .min(self.output_limit)
            .min(isize::MAX as usize);
        self.window.resize(target, 0);
    }
}
