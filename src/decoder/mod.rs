mod read_decoder;
mod scanline_buffer;
pub(crate) mod stream;
pub(crate) mod transform;
mod zlib;

use self::read_decoder::EventReader;
use self::scanline_buffer::ScanlineBuffer;
pub use self::stream::{DecodeOptions, Decoded, DecodingError, StreamingDecoder};
use self::stream::{FormatErrorInner, SIGNATURE};
use self::transform::{create_transform_fn, TransformFn};

use std::io::Read;
use std::mem;

use crate::adam7::{self, Adam7Info, Adam7Iterator};
use crate::chunk::{self, ChunkType};
use crate::common::{
    BitDepth, BytesPerPixel, ColorType, Info, ParameterErrorKind, Transformations,
};
use crate::traits::ReadBytesExt;

/// Output info.
///
/// This describes the image data that is written into the output buffer,
/// after the configured transformations.
#[derive(Debug, PartialEq, Eq)]
pub struct OutputInfo {
    /// The pixel width of the image.
    pub width: u32,
    /// The pixel height of the image.
    pub height: u32,
    /// The chosen output color type.
    pub color_type: ColorType,
    /// The chosen output bit depth.
    pub bit_depth: BitDepth,
    /// The byte count of each scan line in the image.
    pub line_size: usize,
}

impl OutputInfo {
    /// Returns the size needed to hold a decoded frame
    /// If the output buffer was larger then bytes after this count should be ignored. They may
    /// still have been changed.
    pub fn buffer_size(&self) -> usize {
        self.line_size * self.height as usize
    }
}

#[derive(Clone, Copy, Debug)]
/// Limits on the resources the `Decoder` is allowed too use
pub struct Limits {
    /// maximum number of bytes the decoder is allowed to allocate, default is 64Mib
    pub bytes: usize,
}

impl Default for Limits {
    fn default() -> Limits {
        Limits {
            bytes: 1024 * 1024 * 64,
        }
    }
}

/// PNG Decoder
pub struct Decoder<R: Read> {
    /// Reader
    r: R,
    /// Output transformations
    transform: Transformations,
    /// Decode options, settled before the stream is touched
    options: DecodeOptions,
    /// Limits on resources the Decoder is allowed to use
    limits: Limits,
}

/// Where a decoded row sits in the stream's scan order.
///
/// Progressive images store their rows top to bottom; Adam7 images store the
/// reduced scanlines of seven interleaved sub-grids instead, so a row of an
/// interlaced stream is addressed by its pass rather than by an image line.
#[derive(Clone, Copy, Debug)]
pub enum InterlaceInfo {
    /// Row `line` of a non-interlaced image.
    Progressive { line: u32 },
    /// A reduced scanline of one of the seven Adam7 passes.
    Adam7(Adam7Info),
}

impl InterlaceInfo {
    /// The pass geometry, for rows of an interlaced image.
    pub fn adam7(&self) -> Option<&Adam7Info> {
        match self {
            InterlaceInfo::Progressive { .. } => None,
            InterlaceInfo::Adam7(info) => Some(info),
        }
    }
}

/// A row of data without interlace information.
#[derive(Clone, Copy, Debug)]
pub struct Row<'data> {
    data: &'data [u8],
}

impl<'data> Row<'data> {
    pub fn data(&self) -> &'data [u8] {
        self.data
    }
}

/// A row of data with interlace information attached.
#[derive(Clone, Copy, Debug)]
pub struct InterlacedRow<'data> {
    data: &'data [u8],
    interlace: InterlaceInfo,
}

impl<'data> InterlacedRow<'data> {
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    pub fn interlace(&self) -> &InterlaceInfo {
        &self.interlace
    }
}

impl<R: Read> Decoder<R> {
    /// Create a new decoder configuration with default limits.
    pub fn new(r: R) -> Decoder<R> {
        Decoder {
            r,
            transform: Transformations::IDENTITY,
            options: DecodeOptions::default(),
            limits: Limits::default(),
        }
    }

    /// Create a new decoder configuration with custom `DecodeOptions`.
    pub fn new_with_options(r: R, options: DecodeOptions) -> Decoder<R> {
        Decoder {
            r,
            transform: Transformations::IDENTITY,
            options,
            limits: Limits::default(),
        }
    }

    /// Create a new decoder configuration with custom limits.
    pub fn new_with_limits(r: R, limits: Limits) -> Decoder<R> {
        let mut decoder = Decoder::new(r);
        decoder.set_limits(limits);
        decoder
    }

    /// Limit resource usage.
    ///
    /// Note that your allocations, e.g. when reading into a pre-allocated buffer, are __NOT__
    /// considered part of the limits. Nevertheless, required intermediate buffers such as for
    /// singular lines is checked against the limit.
    ///
    /// Note that this is a best-effort basis.
    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Set the allowed and performed transformations.
    ///
    /// A transformation is a pre-processing on the raw image data modifying content or encoding.
    /// Many options have an impact on memory or CPU usage during decoding. See
    /// [`Transformations`] for the recipes matching the common output formats.
    pub fn set_transformations(&mut self, transform: Transformations) {
        self.transform = transform;
    }

    /// Reads all meta data until the first IDAT chunk
    pub fn read_info(self) -> Result<Reader<R>, DecodingError> {
        let mut read_decoder = EventReader::with_options(self.r, self.options);
        read_decoder.set_limits(self.limits);
        let mut reader = Reader {
            decoder: read_decoder,
            bpp: BytesPerPixel::One,
            schedule: PassSchedule::not_yet_init(),
            scanlines: ScanlineBuffer::new(),
            transform: self.transform,
            transform_fn: None,
            processed: Vec::new(),
            full_image: None,
            rows_served: 0,
            image_finished: false,
            trailer_read: false,
            limits: self.limits,
        };
        reader.init()?;
        Ok(reader)
    }

    /// Turn the decoder into a low-level iterator over the raw chunks of the
    /// stream, yielding every chunk verbatim after validating its CRC.
    pub fn into_chunks(self) -> RawChunks<R> {
        RawChunks {
            r: self.r,
            signature_read: false,
            done: false,
        }
    }
}

/// Hands out the position of every scanline the stream is expected to carry,
/// in storage order, and remembers how far the IDAT sequence has progressed.
struct PassSchedule {
    /// Pass walker for interlaced images, `None` for progressive ones.
    adam7: Option<Adam7Iterator>,
    /// Next image line of a progressive image.
    next_line: u32,
    height: u32,
    /// Pass number of the previously scheduled row, to detect pass changes.
    current_pass: u8,
    /// Whether the IDAT sequence was fully consumed and flushed.
    consumed_and_flushed: bool,
}

impl PassSchedule {
    fn not_yet_init() -> Self {
        PassSchedule {
            adam7: None,
            next_line: 0,
            height: 0,
            current_pass: 1,
            consumed_and_flushed: false,
        }
    }

    fn new(info: &Info) -> Self {
        PassSchedule {
            adam7: info
                .interlaced
                .then(|| Adam7Iterator::new(info.width, info.height)),
            next_line: 0,
            height: info.height,
            current_pass: 1,
            consumed_and_flushed: false,
        }
    }

    /// The position of the next stored scanline, or `None` past the last one.
    fn next_row_info(&mut self) -> Option<InterlaceInfo> {
        match &mut self.adam7 {
            Some(passes) => passes.next().map(InterlaceInfo::Adam7),
            None => {
                if self.next_line >= self.height {
                    return None;
                }
                let line = self.next_line;
                self.next_line += 1;
                Some(InterlaceInfo::Progressive { line })
            }
        }
    }
}

/// PNG reader (mostly high-level interface)
///
/// Provides a high level that iterates over lines or whole images.
pub struct Reader<R: Read> {
    decoder: EventReader<R>,
    bpp: BytesPerPixel,
    schedule: PassSchedule,
    scanlines: ScanlineBuffer,
    /// Output transformations
    transform: Transformations,
    /// Function that can transform decompressed, unfiltered rows into final output.
    /// See the `transform.rs` module for more details.
    transform_fn: Option<TransformFn>,
    /// The transformed row returned to the caller.
    processed: Vec<u8>,
    /// For interlaced images the whole deinterlaced image, materialised on the
    /// first call to `next_row`.
    full_image: Option<Vec<u8>>,
    /// Number of full-image rows already handed out of `full_image`.
    rows_served: u32,
    /// `read_image` was already called (or all rows were served).
    image_finished: bool,
    /// The trailing chunks after the last IDAT were consumed.
    trailer_read: bool,
    limits: Limits,
}

macro_rules! get_info(
    ($this:expr) => {
        $this.decoder.info().unwrap()
    }
);

impl<R: Read> Reader<R> {
    /// Reads all meta data until the first IDAT chunk
    fn init(&mut self) -> Result<(), DecodingError> {
        self.decoder.read_header_info()?;
        self.decoder.read_until_image_data()?;

        let info = get_info!(self);
        self.bpp = info.bpp_in_prediction();
        self.schedule = PassSchedule::new(info);

        // Check if the output buffer can be represented at all.
        if self.checked_output_buffer_size().is_none() {
            return Err(DecodingError::LimitsExceeded);
        }

        self.transform_fn = Some(create_transform_fn(info, self.transform)?);

        let row_size = self.output_line_size(get_info!(self).width);
        if row_size > self.limits.bytes {
            return Err(DecodingError::LimitsExceeded);
        }
        self.processed.resize(row_size, 0u8);
        Ok(())
    }

    /// Get information on the image.
    pub fn info(&self) -> &Info {
        get_info!(self)
    }

    /// Number of checksum mismatches forgiven so far in lenient mode.
    pub fn checksum_warnings(&self) -> u32 {
        self.decoder.checksum_warnings()
    }

    /// Describes the output of this reader under the configured transformations.
    pub fn output_info(&self) -> OutputInfo {
        let info = self.info();
        let (color_type, bit_depth) = self.output_color_type();
        OutputInfo {
            width: info.width,
            height: info.height,
            color_type,
            bit_depth,
            line_size: self.output_line_size(info.width),
        }
    }

    /// Returns the color type and the number of bits per sample
    /// of the data returned by `Reader::next_row` and `Reader::read_image`.
    pub fn output_color_type(&self) -> (ColorType, BitDepth) {
        transform::output_format(self.info(), self.transform)
    }

    /// Returns the number of bytes required to hold a deinterlaced image frame
    /// that is decoded using the given input transformations.
    pub fn output_buffer_size(&self) -> usize {
        let (width, height) = self.info().size();
        let size = self.output_line_size(width);
        size * height as usize
    }

    fn checked_output_buffer_size(&self) -> Option<usize> {
        let info = self.info();
        let checked_len = info.checked_raw_row_length()?;
        let height: usize = std::convert::TryFrom::try_from(info.height).ok()?;
        // The transformed row is never more than eight times the raw row
        // (1-bit gray expanded to RGBA16 is the worst case).
        checked_len.checked_mul(height)?.checked_mul(64)?;
        self.output_line_size(info.width)
            .checked_mul(height)
    }

    /// Returns the number of bytes required to hold a deinterlaced row.
    pub fn output_line_size(&self, width: u32) -> usize {
        transform::output_line_size(self.info(), self.transform, width)
    }

    /// Bits per pixel of the transformed output, used to address pixels when
    /// splicing interlace passes into the full image.
    fn output_bits_per_pixel(&self) -> usize {
        transform::output_bits_per_pixel(self.info(), self.transform)
    }

    /// Returns the next transformed row of the image, top to bottom.
    ///
    /// For non-interlaced images rows are produced lazily, one scanline of
    /// compressed input at a time. For Adam7 images the whole image is
    /// decoded and buffered on the first call, as rows of the final image only
    /// become complete once the last pass is read.
    pub fn next_row(&mut self) -> Result<Option<Row>, DecodingError> {
        if !self.info().interlaced {
            return Ok(self
                .next_interlaced_row()?
                .map(|row| Row { data: row.data }));
        }

        if self.full_image.is_none() {
            let size = self.output_buffer_size();
            if size > self.limits.bytes {
                return Err(DecodingError::LimitsExceeded);
            }
            let mut buffer = vec![0u8; size];
            self.read_image(&mut buffer)?;
            self.full_image = Some(buffer);
            self.rows_served = 0;
        }

        let height = self.info().height;
        if self.rows_served >= height {
            return Ok(None);
        }
        let line_size = self.output_line_size(self.info().width);
        let start = self.rows_served as usize * line_size;
        self.rows_served += 1;
        let buffer = self.full_image.as_ref().unwrap();
        Ok(Some(Row {
            data: &buffer[start..start + line_size],
        }))
    }

    /// Returns the next transformed row of the current interlace pass.
    ///
    /// For non-interlaced images this is the same as [`Self::next_row`] with
    /// interlace information attached. For interlaced images the rows are the
    /// reduced scanlines of the seven passes, in stream order.
    pub fn next_interlaced_row(&mut self) -> Result<Option<InterlacedRow>, DecodingError> {
        let (rowlen, interlace) = match self.next_raw_interlaced_row()? {
            Some(r) => r,
            None => return Ok(None),
        };

        let width = match &interlace {
            InterlaceInfo::Adam7(info) => info.width(),
            InterlaceInfo::Progressive { .. } => get_info!(self).width,
        };
        let output_line_size = self.output_line_size(width);

        let mut transform_fn = self.transform_fn.take().expect("initialized in init()");
        let mut processed = mem::take(&mut self.processed);
        if processed.len() < output_line_size {
            processed.resize(output_line_size, 0u8);
        }
        {
            let row = self.scanlines.last_row();
            debug_assert_eq!(row.len(), rowlen - 1);
            let info = get_info!(self);
            transform_fn(row, &mut processed[..output_line_size], info);
        }
        self.transform_fn = Some(transform_fn);
        self.processed = processed;

        Ok(Some(InterlacedRow {
            data: &self.processed[..output_line_size],
            interlace,
        }))
    }

    /// Reads the complete transformed image into `buf`, which must be at least
    /// `output_buffer_size()` long.
    ///
    /// Output lines will be written in row-major, packed matrix with width and height of the
    /// image, all samples in big endian byte order where this matters.
    pub fn read_image(&mut self, buf: &mut [u8]) -> Result<OutputInfo, DecodingError> {
        if self.image_finished {
            return Err(DecodingError::Parameter(
                ParameterErrorKind::PolledAfterEndOfImage.into(),
            ));
        }
        let required = self.output_buffer_size();
        if buf.len() < required {
            return Err(DecodingError::Parameter(
                ParameterErrorKind::ImageBufferSize {
                    expected: required,
                    actual: buf.len(),
                }
                .into(),
            ));
        }

        let (width, interlaced) = {
            let info = self.info();
            (info.width, info.interlaced)
        };

        if interlaced {
            let bits_pp = self.output_bits_per_pixel();
            // Pass splicing ORs sub-byte samples into place.
            if bits_pp < 8 {
                for byte in buf[..required].iter_mut() {
                    *byte = 0;
                }
            }
            while let Some(row) = self.next_interlaced_row()? {
                let pass = *row.interlace().adam7().expect("interlaced rows");
                adam7::expand_pass(buf, width, row.data(), &pass, bits_pp as u8);
            }
        } else {
            let line_size = self.output_line_size(width);
            while let Some(row) = self.next_interlaced_row()? {
                let line = match row.interlace() {
                    InterlaceInfo::Progressive { line } => *line as usize,
                    InterlaceInfo::Adam7(_) => unreachable!("progressive rows"),
                };
                buf[line * line_size..][..line_size].copy_from_slice(row.data());
            }
        }

        if !self.schedule.consumed_and_flushed {
            self.decoder.finish_decoding_image_data()?;
            self.schedule.consumed_and_flushed = true;
        }
        self.image_finished = true;

        Ok(self.output_info())
    }

    /// Consumes the rest of the stream up to and including the IEND chunk.
    ///
    /// Ancillary chunks stored after the image data (tIME, textual chunks,
    /// unknown chunks) are only guaranteed to be present in [`Self::info`]
    /// after this returns.
    pub fn finish(&mut self) -> Result<(), DecodingError> {
        if self.trailer_read {
            return Ok(());
        }
        if !self.schedule.consumed_and_flushed {
            self.decoder.finish_decoding_image_data()?;
            self.schedule.consumed_and_flushed = true;
        }
        self.decoder.read_until_end_of_input()?;
        self.trailer_read = true;
        Ok(())
    }

    /// Decodes and unfilters the next stored scanline; afterwards it is the
    /// scanline buffer's last row.
    fn next_raw_interlaced_row(
        &mut self,
    ) -> Result<Option<(usize, InterlaceInfo)>, DecodingError> {
        let interlace = match self.schedule.next_row_info() {
            Some(interlace) => interlace,
            None => return Ok(None),
        };
        if let InterlaceInfo::Adam7(pass) = &interlace {
            if pass.pass() != self.schedule.current_pass {
                self.schedule.current_pass = pass.pass();
                self.scanlines.start_pass();
            }
        }
        let rowlen = match &interlace {
            InterlaceInfo::Progressive { .. } => get_info!(self).raw_row_length(),
            InterlaceInfo::Adam7(pass) => {
                get_info!(self).raw_row_length_from_width(pass.width())
            }
        };

        loop {
            if self.scanlines.buffered() >= rowlen {
                self.scanlines.unfilter_scanline(rowlen, self.bpp)?;
                return Ok(Some((rowlen, interlace)));
            }
            if self.schedule.consumed_and_flushed {
                return Err(DecodingError::Format(
                    FormatErrorInner::NoMoreImageData.into(),
                ));
            }
            if self
                .decoder
                .decode_image_data(self.scanlines.inflate_target())?
            {
                self.schedule.consumed_and_flushed = true;
            }
        }
    }
}

/// Iterator over the verbatim chunks of a PNG stream.
///
/// Yields `(type, data)` pairs after validating each chunk's CRC; iteration
/// ends after the IEND chunk.
pub struct RawChunks<R: Read> {
    r: R,
    signature_read: bool,
    done: bool,
}

impl<R: Read> RawChunks<R> {
    fn next_chunk(&mut self) -> Result<Option<(ChunkType, Vec<u8>)>, DecodingError> {
        if !self.signature_read {
            let mut signature = [0u8; 8];
            self.r.read_exact(&mut signature)?;
            if signature != SIGNATURE {
                return Err(DecodingError::Format(
                    FormatErrorInner::InvalidSignature.into(),
                ));
            }
            self.signature_read = true;
        }

        let length = self.r.read_be_u32()?;
        let mut type_bytes = [0u8; 4];
        self.r.read_exact(&mut type_bytes)?;
        let chunk_type = ChunkType(type_bytes);

        let mut data = vec![0u8; length as usize];
        self.r.read_exact(&mut data)?;
        let stored_crc = self.r.read_be_u32()?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&chunk_type.0);
        crc.update(&data);
        let computed_crc = crc.finalize();
        if stored_crc != computed_crc {
            return Err(DecodingError::Format(
                FormatErrorInner::CrcMismatch {
                    crc_val: stored_crc,
                    crc_sum: computed_crc,
                    chunk: chunk_type,
                }
                .into(),
            ));
        }

        if chunk_type == chunk::IEND {
            self.done = true;
        }
        Ok(Some((chunk_type, data)))
    }
}

impl<R: Read> Iterator for RawChunks<R> {
    type Item = Result<(ChunkType, Vec<u8>), DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.next_chunk().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::Encoder;
    use crate::{DecodeOptions, Transformations};

    fn encode_gray8(width: u32, height: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, width, height);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
        out
    }

    /// Flips one bit in the CRC of the first IDAT chunk.
    fn corrupt_idat_crc(bytes: &mut [u8]) {
        let pos = bytes
            .windows(4)
            .position(|window| window == b"IDAT")
            .unwrap();
        let length =
            u32::from_be_bytes(bytes[pos - 4..pos].try_into().unwrap()) as usize;
        bytes[pos + 4 + length] ^= 0x40;
    }

    #[test]
    fn corrupted_crc_fails_in_strict_mode() {
        let mut bytes = encode_gray8(4, 4, &[9; 16]);
        corrupt_idat_crc(&mut bytes);

        let mut reader = Decoder::new(&bytes[..]).read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        let err = reader.read_image(&mut buf).unwrap_err();
        assert!(matches!(err, DecodingError::Format(_)));
    }

    #[test]
    fn corrupted_crc_warns_in_lenient_mode() {
        let mut bytes = encode_gray8(4, 4, &[9; 16]);
        corrupt_idat_crc(&mut bytes);

        let mut options = DecodeOptions::default();
        options.set_lenient(true);
        let mut reader = Decoder::new_with_options(&bytes[..], options)
            .read_info()
            .unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [9; 16]);
        assert_eq!(reader.checksum_warnings(), 1);
    }

    #[test]
    fn rows_are_produced_lazily() {
        let data: Vec<u8> = (0u16..32).map(|v| v as u8).collect();
        let bytes = encode_gray8(8, 4, &data);

        let mut reader = Decoder::new(&bytes[..]).read_info().unwrap();
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row.data().to_vec());
        }
        assert_eq!(rows.len(), 4);
        let flattened: Vec<u8> = rows.concat();
        assert_eq!(flattened, data);
        // The sequence is finite and does not restart.
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let bytes = [0u8; 32];
        assert!(matches!(
            Decoder::new(&bytes[..]).read_info(),
            Err(DecodingError::Format(_))
        ));
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let bytes = encode_gray8(16, 16, &[1; 256]);
        let cut = &bytes[..bytes.len() - 24];

        let mut reader = Decoder::new(cut).read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        assert!(reader.read_image(&mut buf).is_err());
    }

    #[test]
    fn unknown_critical_chunk_is_fatal() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&stream::SIGNATURE);
        let mut ihdr = [0u8; 13];
        ihdr[..4].copy_from_slice(&1u32.to_be_bytes());
        ihdr[4..8].copy_from_slice(&1u32.to_be_bytes());
        ihdr[8] = 8; // bit depth
        crate::encoder::write_chunk(&mut bytes, chunk::IHDR, &ihdr).unwrap();
        crate::encoder::write_chunk(&mut bytes, ChunkType(*b"NoPe"), &[0]).unwrap();

        assert!(matches!(
            Decoder::new(&bytes[..]).read_info(),
            Err(DecodingError::Format(_))
        ));
    }

    #[test]
    fn duplicate_gama_chunk_is_fatal() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&stream::SIGNATURE);
        let mut ihdr = [0u8; 13];
        ihdr[..4].copy_from_slice(&1u32.to_be_bytes());
        ihdr[4..8].copy_from_slice(&1u32.to_be_bytes());
        ihdr[8] = 8;
        crate::encoder::write_chunk(&mut bytes, chunk::IHDR, &ihdr).unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::gAMA, &45455u32.to_be_bytes()).unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::gAMA, &45455u32.to_be_bytes()).unwrap();

        assert!(Decoder::new(&bytes[..]).read_info().is_err());
    }

    #[test]
    fn interrupted_idat_sequence_is_fatal() {
        // Build a 1x1 gray image whose compressed data is split over two IDAT
        // chunks with a tEXt chunk wedged in between.
        let compressed = fdeflate::compress_to_vec(&[0, 77]);
        let (first, second) = compressed.split_at(compressed.len() / 2);

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&stream::SIGNATURE);
        let mut ihdr = [0u8; 13];
        ihdr[..4].copy_from_slice(&1u32.to_be_bytes());
        ihdr[4..8].copy_from_slice(&1u32.to_be_bytes());
        ihdr[8] = 8;
        crate::encoder::write_chunk(&mut bytes, chunk::IHDR, &ihdr).unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::IDAT, first).unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::tEXt, b"k\0v").unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::IDAT, second).unwrap();
        crate::encoder::write_chunk(&mut bytes, chunk::IEND, &[]).unwrap();

        let mut reader = Decoder::new(&bytes[..]).read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        // The interruption truncates the compressed stream mid-way, so either
        // the row decode or the chunk drain must report the failure.
        let image_result = reader.read_image(&mut buf);
        assert!(image_result.is_err() || reader.finish().is_err());
    }

    #[test]
    fn sixteen_bit_strip_to_eight() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Sixteen);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0x01, 0x02, 0xFF, 0xFE]).unwrap();
        writer.finish().unwrap();

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::normalize_to_color8());
        let mut reader = decoder.read_info().unwrap();
        assert_eq!(
            reader.output_color_type(),
            (ColorType::Grayscale, BitDepth::Eight)
        );
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [0x01, 0xFF]);
    }

    #[test]
    fn gray_alpha_coerces_to_rgba() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 1);
        encoder.set_color(ColorType::GrayscaleAlpha);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[10, 20, 30, 40]).unwrap();
        writer.finish().unwrap();

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::rgba8());
        let mut reader = decoder.read_info().unwrap();
        assert_eq!(
            reader.output_color_type(),
            (ColorType::Rgba, BitDepth::Eight)
        );
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [10, 10, 10, 20, 30, 30, 30, 40]);
    }

    #[test]
    fn transparent_color_becomes_alpha_channel() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_trns(vec![20]);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[10, 20]).unwrap();
        writer.finish().unwrap();

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::EXPAND);
        let mut reader = decoder.read_info().unwrap();
        assert_eq!(
            reader.output_color_type(),
            (ColorType::GrayscaleAlpha, BitDepth::Eight)
        );
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [10, 255, 20, 0]);
    }

    #[test]
    fn schedule_counts_progressive_rows() {
        let info = Info::with_size(5, 3);
        let mut schedule = PassSchedule::new(&info);
        let mut lines = Vec::new();
        while let Some(row) = schedule.next_row_info() {
            match row {
                InterlaceInfo::Progressive { line } => lines.push(line),
                InterlaceInfo::Adam7(_) => panic!("progressive image produced a pass row"),
            }
        }
        assert_eq!(lines, [0, 1, 2]);
    }

    #[test]
    fn schedule_walks_adam7_passes_in_storage_order() {
        let mut info = Info::with_size(4, 4);
        info.interlaced = true;
        let mut schedule = PassSchedule::new(&info);
        let mut rows = Vec::new();
        while let Some(row) = schedule.next_row_info() {
            let pass = *row.adam7().expect("interlaced image");
            rows.push((pass.pass(), pass.line(), pass.width()));
        }
        // A 4x4 grid touches passes 1, 4, 5, 6 and 7 only.
        assert_eq!(
            rows,
            [
                (1, 0, 1),
                (4, 0, 1),
                (5, 0, 2),
                (6, 0, 2),
                (6, 1, 2),
                (7, 0, 4),
                (7, 1, 4),
            ]
        );
    }

    #[test]
    fn chunk_iterator_yields_verbatim_chunks() {
        let bytes = encode_gray8(2, 2, &[1, 2, 3, 4]);
        let chunks: Vec<_> = Decoder::new(&bytes[..])
            .into_chunks()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(chunks.first().unwrap().0, chunk::IHDR);
        assert_eq!(chunks.last().unwrap().0, chunk::IEND);
        assert!(chunks.iter().any(|(kind, _)| *kind == chunk::IDAT));
        // IHDR data is passed through untouched.
        assert_eq!(chunks[0].1[..4], 2u32.to_be_bytes());
    }
}
