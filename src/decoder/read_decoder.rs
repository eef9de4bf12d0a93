//! Pulls bytes from the underlying reader and drives the chunk decoder.

use std::io::{BufRead, BufReader, Read};

use super::stream::{
    DecodeOptions, Decoded, DecodingError, FormatErrorInner, StreamingDecoder, CHUNK_BUFFER_SIZE,
};
use super::Limits;
use crate::chunk;
use crate::common::Info;

/// Event pump around a [`StreamingDecoder`].
///
/// The state machine consumes byte windows and reports fine grained
/// [`Decoded`] events; this wrapper owns the buffered reader, keeps it
/// refilled, and condenses the event stream into the handful of milestones
/// the `Reader` navigates by: header parsed, image data opened, image data
/// over, image ended.
pub(crate) struct EventReader<R: Read> {
    reader: BufReader<R>,
    decoder: StreamingDecoder,
}

impl<R: Read> EventReader<R> {
    pub fn with_options(r: R, options: DecodeOptions) -> Self {
        Self {
            reader: BufReader::with_capacity(CHUNK_BUFFER_SIZE, r),
            decoder: StreamingDecoder::new_with_options(options),
        }
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.decoder.limits = limits;
    }

    pub fn checksum_warnings(&self) -> u32 {
        self.decoder.checksum_warnings()
    }

    pub fn info(&self) -> Option<&Info<'static>> {
        self.decoder.info.as_ref()
    }

    /// Feeds the decoder one refill of the reader and returns the event it
    /// reports. Image data decoded along the way is appended to `sink`.
    ///
    /// Running dry before the IEND chunk is a truncation error.
    fn advance(&mut self, sink: &mut Vec<u8>) -> Result<Decoded, DecodingError> {
        let buffer = self.reader.fill_buf()?;
        if buffer.is_empty() {
            return Err(DecodingError::Format(
                FormatErrorInner::UnexpectedEof.into(),
            ));
        }
        let (consumed, event) = self.decoder.update(buffer, sink)?;
        self.reader.consume(consumed);
        Ok(event)
    }

    /// Runs the stream forward to the end of the IHDR chunk. Does nothing if
    /// the header was already parsed.
    pub fn read_header_info(&mut self) -> Result<&Info<'static>, DecodingError> {
        let mut ignored = Vec::new();
        while self.decoder.info.is_none() {
            self.advance(&mut ignored)?;
            debug_assert!(ignored.is_empty(), "no image data before the header");
        }
        Ok(self.decoder.info.as_ref().unwrap())
    }

    /// Runs the stream forward until the first IDAT chunk opens.
    pub fn read_until_image_data(&mut self) -> Result<(), DecodingError> {
        let mut ignored = Vec::new();
        loop {
            match self.advance(&mut ignored)? {
                Decoded::ChunkBegin(_, chunk::IDAT) => return Ok(()),
                Decoded::ImageEnd => {
                    return Err(DecodingError::Format(
                        FormatErrorInner::MissingImageData.into(),
                    ))
                }
                // Any other chunk may still precede the image data.
                _ => {}
            }
        }
    }

    /// Decodes some image data into `sink`; returns true once the IDAT
    /// sequence is over and the compressed stream has been flushed.
    ///
    /// Must only be called between [`Self::read_until_image_data`] and the
    /// flush it announces.
    pub fn decode_image_data(&mut self, sink: &mut Vec<u8>) -> Result<bool, DecodingError> {
        Ok(matches!(self.advance(sink)?, Decoded::ImageDataFlushed))
    }

    /// Discards image data until the IDAT sequence is over.
    pub fn finish_decoding_image_data(&mut self) -> Result<(), DecodingError> {
        let mut discard = Vec::new();
        loop {
            discard.clear();
            if self.decode_image_data(&mut discard)? {
                return Ok(());
            }
        }
    }

    /// Consumes the remaining chunks up to and including IEND, so trailing
    /// metadata lands in the info struct.
    pub fn read_until_end_of_input(&mut self) -> Result<(), DecodingError> {
        let mut discard = Vec::new();
        loop {
            if let Decoded::ImageEnd = self.advance(&mut discard)? {
                return Ok(());
            }
        }
    }
}
