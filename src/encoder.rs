//! The PNG encoder: turns rows of pixel data into a complete stream of chunks.

use std::error;
use std::fmt;
use std::io::{self, Read, Write};
use std::mem;
use std::result;

use crc32fast::Hasher as Crc32;
use log::warn;

use crate::adam7::{self, Adam7Iterator};
use crate::chunk::{self, ChunkType};
use crate::common::{
    BitDepth, BytesPerPixel, ChunkPosition, ColorType, Compression, Info, ParameterError,
    ParameterErrorKind, PixelDimensions, ScaledFloat, SourceChromaticities, SrgbRenderingIntent,
    Time, UnknownChunk,
};
use crate::filter::{filter, AdaptiveFilterType, FilterType};
use crate::text_metadata::{
    EncodableTextChunk, ITXtChunk, TEXtChunk, TextEncodingError, ZTXtChunk,
};
use crate::traits::WriteBytesExt;

pub type Result<T> = result::Result<T, EncodingError>;

/// Default upper bound for the payload of a single IDAT chunk.
///
/// Most decoders read compressed data in buffers of roughly this size, so
/// larger images are split over several chunks.
const DEFAULT_IDAT_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug)]
pub enum EncodingError {
    IoError(io::Error),
    Format(FormatError),
    Parameter(ParameterError),
    LimitsExceeded,
}

#[derive(Debug)]
pub struct FormatError {
    inner: FormatErrorKind,
}

#[derive(Debug)]
enum FormatErrorKind {
    ZeroWidth,
    ZeroHeight,
    InvalidColorCombination(BitDepth, ColorType),
    NoPalette,
    InvalidPalette { len: usize },
    PaletteTooLarge { depth: u8, len: usize },
    /// A transparent colour was configured although the colour type already
    /// carries an alpha channel.
    TransparencyWithAlpha,
    InvalidTransparency { len: usize },
    InvalidBackground { len: usize },
    InvalidSignificantBits { len: usize },
    ZeroIdatChunkSize,
    StreamedInterlacedImage,
    SampleOutOfRange { value: u8, depth: u8 },
    WrittenTooMuch(usize),
    EndReached,
    BadTextEncoding(TextEncodingError),
}

impl error::Error for EncodingError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            EncodingError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for EncodingError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use self::EncodingError::*;
        match self {
            IoError(err) => write!(fmt, "{}", err),
            Format(desc) => write!(fmt, "{}", desc),
            Parameter(desc) => write!(fmt, "{}", desc),
            LimitsExceeded => write!(fmt, "Limits are exceeded."),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use FormatErrorKind::*;
        match &self.inner {
            ZeroWidth => write!(fmt, "Zero width not allowed"),
            ZeroHeight => write!(fmt, "Zero height not allowed"),
            InvalidColorCombination(depth, color) => write!(
                fmt,
                "Invalid combination of bit-depth '{:?}' and color-type '{:?}'",
                depth, color
            ),
            NoPalette => write!(fmt, "can't write indexed image without palette"),
            InvalidPalette { len } => write!(
                fmt,
                "palette of {} bytes is not a whole number of RGB entries",
                len
            ),
            PaletteTooLarge { depth, len } => write!(
                fmt,
                "palette of {} entries does not fit bit depth {}",
                len, depth
            ),
            TransparencyWithAlpha => write!(
                fmt,
                "a transparent colour cannot be combined with an alpha channel"
            ),
            InvalidTransparency { len } => write!(
                fmt,
                "transparency data of {} bytes does not match the colour type",
                len
            ),
            InvalidBackground { len } => write!(
                fmt,
                "background data of {} bytes does not match the colour type",
                len
            ),
            InvalidSignificantBits { len } => write!(
                fmt,
                "significant bits of {} entries do not match the colour type",
                len
            ),
            ZeroIdatChunkSize => write!(fmt, "IDAT chunks must hold at least one byte"),
            StreamedInterlacedImage => {
                write!(fmt, "interlaced images cannot be written row by row")
            }
            SampleOutOfRange { value, depth } => {
                write!(fmt, "sample value {} exceeds bit depth {}", value, depth)
            }
            WrittenTooMuch(index) => write!(fmt, "wrong data size, got {} bytes too many", index),
            EndReached => write!(fmt, "the image has already been written"),
            BadTextEncoding(tee) => match tee {
                TextEncodingError::Unrepresentable => write!(
                    fmt,
                    "The text metadata cannot be encoded into valid ISO 8859-1"
                ),
                TextEncodingError::InvalidKeywordSize => {
                    write!(fmt, "Invalid keyword size")
                }
                TextEncodingError::CompressionError => {
                    write!(fmt, "Unable to compress text data")
                }
            },
        }
    }
}

impl error::Error for FormatError {}

impl From<io::Error> for EncodingError {
    fn from(err: io::Error) -> EncodingError {
        EncodingError::IoError(err)
    }
}

impl From<EncodingError> for io::Error {
    fn from(err: EncodingError) -> io::Error {
        io::Error::new(io::ErrorKind::Other, err.to_string())
    }
}

impl From<TextEncodingError> for EncodingError {
    fn from(tee: TextEncodingError) -> Self {
        EncodingError::Format(FormatError {
            inner: FormatErrorKind::BadTextEncoding(tee),
        })
    }
}

// Private impl.
impl From<FormatErrorKind> for FormatError {
    fn from(kind: FormatErrorKind) -> Self {
        FormatError { inner: kind }
    }
}

/// PNG Encoder.
///
/// Builder for a [`Writer`]: image geometry, colour configuration, ancillary
/// state and encoding options are all settled here, then [`Self::write_header`]
/// validates them and emits everything up to the first IDAT chunk.
pub struct Encoder<W: Write> {
    w: W,
    info: Info<'static>,
    filter: FilterType,
    adaptive_filter: AdaptiveFilterType,
    idat_chunk_size: usize,
}

impl<W: Write> Encoder<W> {
    pub fn new(w: W, width: u32, height: u32) -> Encoder<W> {
        Encoder {
            w,
            info: Info::with_size(width, height),
            filter: FilterType::default(),
            adaptive_filter: AdaptiveFilterType::default(),
            idat_chunk_size: DEFAULT_IDAT_CHUNK_SIZE,
        }
    }

    /// Set the color of the encoded image.
    ///
    /// These correspond to the color types in the png IHDR data that will be written. The length
    /// of the image data that is later supplied must match the color type, otherwise an error will
    /// be emitted.
    pub fn set_color(&mut self, color: ColorType) {
        self.info.color_type = color;
    }

    /// Set the indicated depth of the image data.
    pub fn set_depth(&mut self, depth: BitDepth) {
        self.info.bit_depth = depth;
    }

    /// Request an Adam7 interlaced output.
    ///
    /// Rows are still supplied to the writer in normal top-to-bottom order;
    /// the pass decomposition happens internally.
    pub fn set_interlaced(&mut self, interlaced: bool) {
        self.info.interlaced = interlaced;
    }

    /// Set the palette of an indexed image, RGB bytes in palette order.
    pub fn set_palette(&mut self, palette: Vec<u8>) {
        self.info.palette = Some(palette.into());
    }

    /// Set the raw tRNS chunk contents: one alpha byte per palette entry for
    /// indexed images, the transparent colour otherwise.
    pub fn set_trns(&mut self, trns: Vec<u8>) {
        self.info.trns = Some(trns.into());
    }

    /// Set the raw bKGD chunk contents.
    pub fn set_bkgd(&mut self, bkgd: Vec<u8>) {
        self.info.bkgd = Some(bkgd.into());
    }

    /// Set the number of significant bits per channel.
    pub fn set_sbit(&mut self, sbit: Vec<u8>) {
        self.info.sbit = Some(sbit.into());
    }

    /// Set the display gamma of the source system on which the image was generated or last edited.
    pub fn set_source_gamma(&mut self, source_gamma: ScaledFloat) {
        self.info.source_gamma = Some(source_gamma);
    }

    /// Set the chromaticities for the source system's display channels (red, green, blue) and the whitepoint
    /// of the source system on which the image was generated or last edited.
    pub fn set_source_chromaticities(&mut self, source_chromaticities: SourceChromaticities) {
        self.info.source_chromaticities = Some(source_chromaticities);
    }

    /// Mark the image data as conforming to the SRGB color space with the specified rendering intent.
    ///
    /// Matching source gamma and chromaticities chunks are added automatically.
    /// Any manually specified source gamma or chromaticities will be ignored.
    pub fn set_srgb(&mut self, rendering_intent: SrgbRenderingIntent) {
        self.info.srgb = Some(rendering_intent);
    }

    /// Set the ICC profile to embed, uncompressed.
    pub fn set_icc_profile(&mut self, profile: Vec<u8>) {
        self.info.icc_profile = Some(profile.into());
    }

    /// Set the physical pixel dimensions to record in a pHYs chunk.
    pub fn set_pixel_dims(&mut self, pixel_dims: PixelDimensions) {
        self.info.pixel_dims = Some(pixel_dims);
    }

    /// Set the image modification time to record in a tIME chunk.
    pub fn set_time(&mut self, time: Time) {
        self.info.time = Some(time);
    }

    /// Add a tEXt chunk to be written before the image data.
    pub fn add_text_chunk(&mut self, keyword: impl Into<String>, text: impl Into<String>) {
        self.info
            .uncompressed_latin1_text
            .push(TEXtChunk::new(keyword, text));
    }

    /// Add a zTXt chunk to be written before the image data.
    pub fn add_ztxt_chunk(&mut self, keyword: impl Into<String>, text: impl Into<String>) {
        self.info
            .compressed_latin1_text
            .push(ZTXtChunk::new(keyword, text));
    }

    /// Add an iTXt chunk to be written before the image data.
    pub fn add_itxt_chunk(&mut self, keyword: impl Into<String>, text: impl Into<String>) {
        self.info.utf8_text.push(ITXtChunk::new(keyword, text));
    }

    /// Pass an unknown ancillary chunk through, into the bucket it carries.
    pub fn add_unknown_chunk(&mut self, unknown: UnknownChunk) {
        self.info.unknown_chunks.push(unknown);
    }

    /// Set compression parameters.
    pub fn set_compression(&mut self, compression: Compression) {
        self.info.compression = compression;
    }

    /// Set the used filter type.
    ///
    /// The default filter is [`FilterType::Sub`] which provides a basic prediction algorithm for
    /// sample values based on the previous. For a potentially better compression ratio, at the
    /// cost of more complex processing, try out [`FilterType::Paeth`].
    pub fn set_filter(&mut self, filter: FilterType) {
        self.filter = filter;
    }

    /// Set the adaptive filter type.
    ///
    /// Adaptive filtering attempts to select the best filter for each line
    /// based on a heuristic which minimizes the file size for compression rather
    /// than use a single filter for the entire image. The default method is
    /// [`AdaptiveFilterType::NonAdaptive`].
    pub fn set_adaptive_filter(&mut self, adaptive_filter: AdaptiveFilterType) {
        self.adaptive_filter = adaptive_filter;
    }

    /// Set the maximum payload of a single IDAT chunk, at least one byte.
    pub fn set_idat_chunk_size(&mut self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(EncodingError::Format(
                FormatErrorKind::ZeroIdatChunkSize.into(),
            ));
        }
        self.idat_chunk_size = size;
        Ok(())
    }

    /// Validate the configuration and write everything up to the first IDAT chunk.
    pub fn write_header(self) -> Result<Writer<W>> {
        Writer::new(
            self.w,
            self.info,
            self.filter,
            self.adaptive_filter,
            self.idat_chunk_size,
        )
        .init()
    }
}

/// PNG writer
pub struct Writer<W: Write> {
    w: W,
    info: Info<'static>,
    filter: FilterType,
    adaptive_filter: AdaptiveFilterType,
    idat_chunk_size: usize,
    written: bool,
    trailer_written: bool,
}

pub(crate) fn write_chunk<W: Write>(mut w: W, name: ChunkType, data: &[u8]) -> Result<()> {
    w.write_be_u32(data.len() as u32)?;
    w.write_all(&name.0)?;
    w.write_all(data)?;
    let mut crc = Crc32::new();
    crc.update(&name.0);
    crc.update(data);
    w.write_be_u32(crc.finalize())?;
    Ok(())
}

impl<W: Write> Writer<W> {
    fn new(
        w: W,
        info: Info<'static>,
        filter: FilterType,
        adaptive_filter: AdaptiveFilterType,
        idat_chunk_size: usize,
    ) -> Writer<W> {
        Writer {
            w,
            info,
            filter,
            adaptive_filter,
            idat_chunk_size,
            written: false,
            // Only armed once the header has actually been emitted, so that a
            // writer rejected during validation does not emit a stray IEND.
            trailer_written: true,
        }
    }

    fn validate(&self) -> Result<()> {
        let info = &self.info;
        if info.width == 0 {
            return Err(EncodingError::Format(FormatErrorKind::ZeroWidth.into()));
        }
        if info.height == 0 {
            return Err(EncodingError::Format(FormatErrorKind::ZeroHeight.into()));
        }
        if info.color_type.is_combination_invalid(info.bit_depth) {
            return Err(EncodingError::Format(
                FormatErrorKind::InvalidColorCombination(info.bit_depth, info.color_type).into(),
            ));
        }

        if let Some(palette) = &info.palette {
            if palette.is_empty() || palette.len() % 3 != 0 {
                return Err(EncodingError::Format(
                    FormatErrorKind::InvalidPalette { len: palette.len() }.into(),
                ));
            }
            let entries = palette.len() / 3;
            let max_entries = match info.color_type {
                ColorType::Indexed => 1usize << info.bit_depth.into_u8().min(8),
                _ => 256,
            };
            if entries > max_entries {
                return Err(EncodingError::Format(
                    FormatErrorKind::PaletteTooLarge {
                        depth: info.bit_depth.into_u8(),
                        len: entries,
                    }
                    .into(),
                ));
            }
        } else if info.color_type == ColorType::Indexed {
            return Err(EncodingError::Format(FormatErrorKind::NoPalette.into()));
        }

        if let Some(trns) = &info.trns {
            let valid = match info.color_type {
                // The transparent colour may be given truncated to the low
                // byte for depths below sixteen, or as full u16 samples.
                ColorType::Grayscale => matches!(trns.len(), 1 | 2),
                ColorType::Rgb => matches!(trns.len(), 3 | 6),
                ColorType::Indexed => {
                    trns.len() <= info.palette.as_ref().map_or(0, |p| p.len() / 3)
                }
                ColorType::GrayscaleAlpha | ColorType::Rgba => {
                    return Err(EncodingError::Format(
                        FormatErrorKind::TransparencyWithAlpha.into(),
                    ));
                }
            };
            if !valid {
                return Err(EncodingError::Format(
                    FormatErrorKind::InvalidTransparency { len: trns.len() }.into(),
                ));
            }
        }

        if let Some(bkgd) = &info.bkgd {
            let expected = match info.color_type {
                ColorType::Indexed => 1,
                ColorType::Grayscale | ColorType::GrayscaleAlpha => 2,
                ColorType::Rgb | ColorType::Rgba => 6,
            };
            if bkgd.len() != expected {
                return Err(EncodingError::Format(
                    FormatErrorKind::InvalidBackground { len: bkgd.len() }.into(),
                ));
            }
        }

        if let Some(sbit) = &info.sbit {
            let sample_depth = match info.color_type {
                ColorType::Indexed => 8,
                _ => info.bit_depth.into_u8(),
            };
            let expected = match info.color_type {
                ColorType::Grayscale => 1,
                ColorType::Rgb | ColorType::Indexed => 3,
                ColorType::GrayscaleAlpha => 2,
                ColorType::Rgba => 4,
            };
            if sbit.len() != expected || sbit.iter().any(|&bits| bits == 0 || bits > sample_depth)
            {
                return Err(EncodingError::Format(
                    FormatErrorKind::InvalidSignificantBits { len: sbit.len() }.into(),
                ));
            }
        }

        Ok(())
    }

    fn init(mut self) -> Result<Self> {
        self.validate()?;

        self.w.write_all(&crate::decoder::stream::SIGNATURE)?;

        // IHDR
        let mut data = [0; 13];
        data[..4].copy_from_slice(&self.info.width.to_be_bytes());
        data[4..8].copy_from_slice(&self.info.height.to_be_bytes());
        data[8] = self.info.bit_depth as u8;
        data[9] = self.info.color_type as u8;
        data[12] = self.info.interlaced as u8;
        write_chunk(&mut self.w, chunk::IHDR, &data)?;

        // If specified, the sRGB information overrides the source gamma and chromaticities.
        if let Some(srgb) = self.info.srgb {
            srgb.encode(&mut self.w)?;

            // gAMA and cHRM are optional, for backwards compatibility
            let srgb_gamma = ScaledFloat::srgb_gamma();
            if Some(srgb_gamma) == self.info.source_gamma {
                srgb_gamma.encode_gama(&mut self.w)?
            }
            let srgb_chromaticities = SourceChromaticities::srgb();
            if Some(srgb_chromaticities) == self.info.source_chromaticities {
                srgb_chromaticities.encode(&mut self.w)?;
            }
        } else {
            if let Some(gamma) = self.info.source_gamma {
                gamma.encode_gama(&mut self.w)?
            }
            if let Some(chromaticities) = self.info.source_chromaticities {
                chromaticities.encode(&mut self.w)?;
            }
            if let Some(iccp) = &self.info.icc_profile {
                write_iccp_chunk(&mut self.w, "ICC Profile", iccp)?
            }
        }

        if let Some(sbit) = &self.info.sbit {
            write_chunk(&mut self.w, chunk::sBIT, sbit)?;
        }

        self.write_unknown_chunks(ChunkPosition::BeforePlte)?;

        // The position of the PLTE chunk is important, it must come before the tRNS chunk and
        // after many of the other metadata chunks.
        if let Some(palette) = &self.info.palette {
            write_chunk(&mut self.w, chunk::PLTE, palette)?;
        }

        if let Some(bkgd) = &self.info.bkgd {
            write_chunk(&mut self.w, chunk::bKGD, bkgd)?;
        }

        if let Some(trns) = &self.info.trns {
            let trns = widen_transparency(self.info.color_type, trns);
            write_chunk(&mut self.w, chunk::tRNS, &trns)?;
        }

        if let Some(pixel_dims) = self.info.pixel_dims {
            pixel_dims.encode(&mut self.w)?;
        }

        for text_chunk in &self.info.uncompressed_latin1_text {
            text_chunk.encode(&mut self.w)?;
        }
        for text_chunk in &self.info.compressed_latin1_text {
            text_chunk.encode(&mut self.w)?;
        }
        for text_chunk in &self.info.utf8_text {
            text_chunk.encode(&mut self.w)?;
        }

        self.write_unknown_chunks(ChunkPosition::BeforeIdat)?;

        self.trailer_written = false;
        Ok(self)
    }

    fn write_unknown_chunks(&mut self, position: ChunkPosition) -> Result<()> {
        for unknown in self
            .info
            .unknown_chunks
            .iter()
            .filter(|unknown| unknown.position == position)
        {
            if chunk::is_critical(unknown.chunk_type) {
                warn!(
                    "dropping unknown chunk {:?} with the critical bit set",
                    unknown.chunk_type
                );
                continue;
            }
            write_chunk(&mut self.w, unknown.chunk_type, &unknown.data)?;
        }
        Ok(())
    }

    pub fn write_chunk(&mut self, name: ChunkType, data: &[u8]) -> Result<()> {
        write_chunk(&mut self.w, name, data)
    }

    /// Writes the image data in packed form: rows of
    /// `ceil(width * samples * depth / 8)` bytes each, sub-byte samples packed
    /// MSB-first, 16-bit samples in big endian order.
    ///
    /// For interlaced output the rows are still supplied top to bottom; the
    /// Adam7 decomposition is performed here.
    pub fn write_image_data(&mut self, data: &[u8]) -> Result<()> {
        if self.written {
            return Err(EncodingError::Format(FormatErrorKind::EndReached.into()));
        }

        let in_len = self.info.raw_row_length() - 1;
        let data_size = in_len * self.info.height as usize;
        if data_size != data.len() {
            return Err(EncodingError::Parameter(
                ParameterErrorKind::ImageBufferSize {
                    expected: data_size,
                    actual: data.len(),
                }
                .into(),
            ));
        }

        let bpp = self.info.bpp_in_prediction();
        let filter_method = self.filter;
        let adaptive_method = self.adaptive_filter;

        let mut zlib =
            deflate::write::ZlibEncoder::new(Vec::new(), self.info.compression.to_options());

        if self.info.interlaced {
            self.compress_adam7_passes(&mut zlib, data, bpp)?;
        } else {
            let prev = vec![0; in_len];
            let mut prev = prev.as_slice();
            let mut current = vec![0; in_len];
            for line in data.chunks(in_len) {
                current.copy_from_slice(line);
                let filter_type = filter(filter_method, adaptive_method, bpp, prev, &mut current);
                zlib.write_all(&[filter_type as u8])?;
                zlib.write_all(&current)?;
                prev = line;
            }
        }

        let zlib_encoded = zlib.finish()?;
        for idat in zlib_encoded.chunks(self.idat_chunk_size) {
            self.write_chunk(chunk::IDAT, idat)?;
        }
        self.written = true;
        Ok(())
    }

    /// Splits the image into the seven reduced passes and compresses their
    /// scanlines in pass order. The previous-row state restarts with every
    /// pass.
    fn compress_adam7_passes(
        &self,
        zlib: &mut deflate::write::ZlibEncoder<Vec<u8>>,
        data: &[u8],
        bpp: BytesPerPixel,
    ) -> Result<()> {
        let info = &self.info;
        let bits_pp = info.bits_per_pixel();
        let width = info.width;
        let filter_method = self.filter;
        let adaptive_method = self.adaptive_filter;

        let mut current_pass = 0;
        let mut prev: Vec<u8> = Vec::new();
        let mut scanline: Vec<u8> = Vec::new();
        let mut current: Vec<u8> = Vec::new();

        for pass_info in Adam7Iterator::new(width, info.height) {
            let pass_row_len = info.raw_row_length_from_width(pass_info.width()) - 1;
            if pass_info.pass() != current_pass {
                current_pass = pass_info.pass();
                prev.clear();
                prev.resize(pass_row_len, 0);
            }
            scanline.clear();
            scanline.resize(pass_row_len, 0);
            adam7::extract_pass(data, width, &mut scanline, &pass_info, bits_pp as u8);

            current.clear();
            current.extend_from_slice(&scanline);
            let filter_type = filter(filter_method, adaptive_method, bpp, &prev, &mut current);
            zlib.write_all(&[filter_type as u8])?;
            zlib.write_all(&current)?;
            mem::swap(&mut prev, &mut scanline);
        }
        Ok(())
    }

    /// Writes the image data from rows holding one byte per sample.
    ///
    /// This is a convenience over [`Self::write_image_data`] for bit depths
    /// below eight: every sample is validated against the depth and packed
    /// MSB-first. For depths of eight and above the two representations are
    /// identical and the data is passed through.
    pub fn write_unpacked_image_data(&mut self, data: &[u8]) -> Result<()> {
        let depth = self.info.bit_depth.into_u8();
        if depth >= 8 {
            return self.write_image_data(data);
        }

        let samples_per_row = self.info.width as usize * self.info.color_type.samples();
        let expected = samples_per_row * self.info.height as usize;
        if expected != data.len() {
            return Err(EncodingError::Parameter(
                ParameterErrorKind::ImageBufferSize {
                    expected,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        if let Some(&value) = data.iter().find(|&&value| u16::from(value) >= 1u16 << depth) {
            return Err(EncodingError::Format(
                FormatErrorKind::SampleOutOfRange { value, depth }.into(),
            ));
        }

        let row_bytes = self.info.raw_row_length() - 1;
        let mut packed = vec![0u8; row_bytes * self.info.height as usize];
        for (samples, row) in data
            .chunks_exact(samples_per_row)
            .zip(packed.chunks_exact_mut(row_bytes))
        {
            crate::utils::pack_bits(samples, row, depth);
        }
        self.write_image_data(&packed)
    }

    /// Create a stream writer.
    ///
    /// This allows you to create images that do not fit in memory. Image data
    /// is flushed in IDAT chunks of the configured maximum size.
    ///
    /// This borrows the writer which allows for manually appending additional
    /// chunks after the image data has been written.
    pub fn stream_writer(&mut self) -> Result<StreamWriter<W>> {
        let size = self.idat_chunk_size;
        StreamWriter::new(ChunkOutput::Borrowed(self), size)
    }

    /// Turn this into a stream writer for image data.
    ///
    /// This allows you to create images that do not fit in memory.
    pub fn into_stream_writer(self) -> Result<StreamWriter<'static, W>> {
        let size = self.idat_chunk_size;
        StreamWriter::new(ChunkOutput::Owned(self), size)
    }

    fn write_trailer(&mut self) -> Result<()> {
        if self.trailer_written {
            return Ok(());
        }
        self.trailer_written = true;
        self.write_unknown_chunks(ChunkPosition::AfterIdat)?;
        if let Some(time) = self.info.time {
            time.encode(&mut self.w)?;
        }
        self.write_chunk(chunk::IEND, &[])
    }

    /// Write the trailing chunks and consume the writer.
    ///
    /// The trailer is also written when the writer is dropped, but only
    /// `finish` surfaces errors.
    pub fn finish(mut self) -> Result<()> {
        self.write_trailer()
    }
}

impl<W: Write> Drop for Writer<W> {
    fn drop(&mut self) {
        let _ = self.write_trailer();
    }
}

/// The transparent colour may have been provided truncated to the sample's
/// low byte; the stored chunk always carries u16 samples for grayscale and
/// RGB images.
fn widen_transparency(color_type: ColorType, trns: &[u8]) -> Vec<u8> {
    let needs_widening = match color_type {
        ColorType::Grayscale => trns.len() == 1,
        ColorType::Rgb => trns.len() == 3,
        _ => false,
    };
    if needs_widening {
        let mut widened = Vec::with_capacity(trns.len() * 2);
        for &value in trns {
            widened.push(0);
            widened.push(value);
        }
        widened
    } else {
        trns.to_vec()
    }
}

pub(crate) fn write_iccp_chunk<W: Write>(w: &mut W, keyword: &str, profile: &[u8]) -> Result<()> {
    let mut data = keyword.as_bytes().to_vec();
    if data.is_empty() || data.len() > 79 {
        return Err(TextEncodingError::InvalidKeywordSize.into());
    }
    data.push(0);
    // Compression method: deflate.
    data.push(0);
    data.extend_from_slice(&fdeflate::compress_to_vec(profile));
    write_chunk(w, chunk::iCCP, &data)
}

struct ChunkWriter<'a, W: Write> {
    writer: ChunkOutput<'a, W>,
    buffer: Vec<u8>,
    index: usize,
}

enum ChunkOutput<'a, W: Write> {
    Borrowed(&'a mut Writer<W>),
    Owned(Writer<W>),
}

impl<'a, W: Write> ChunkWriter<'a, W> {
    fn new(writer: ChunkOutput<'a, W>, buf_len: usize) -> ChunkWriter<'a, W> {
        ChunkWriter {
            writer,
            buffer: vec![0; buf_len],
            index: 0,
        }
    }
}

impl<'a, W: Write> AsMut<Writer<W>> for ChunkOutput<'a, W> {
    fn as_mut(&mut self) -> &mut Writer<W> {
        match self {
            ChunkOutput::Borrowed(writer) => writer,
            ChunkOutput::Owned(writer) => writer,
        }
    }
}

impl<W: Write> Write for ChunkWriter<'_, W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let written = buf.read(&mut self.buffer[self.index..])?;
        self.index += written;

        if self.index >= self.buffer.len() {
            self.writer
                .as_mut()
                .write_chunk(chunk::IDAT, &self.buffer)?;
            self.index = 0;
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.index > 0 {
            self.writer
                .as_mut()
                .write_chunk(chunk::IDAT, &self.buffer[..self.index])?;
        }
        self.index = 0;
        Ok(())
    }
}

/// Streaming PNG writer
///
/// Rows are fed through the [`Write`] implementation, filtered as they
/// complete, and compressed into IDAT chunks of the configured size. Only
/// non-interlaced images can be written this way.
///
/// This may silently fail in the destructor, so it is a good idea to call
/// [`finish`](#method.finish) before dropping.
pub struct StreamWriter<'a, W: Write> {
    writer: Option<deflate::write::ZlibEncoder<ChunkWriter<'a, W>>>,
    prev_buf: Vec<u8>,
    curr_buf: Vec<u8>,
    filtered: Vec<u8>,
    index: usize,
    bpp: BytesPerPixel,
    filter: FilterType,
    adaptive_filter: AdaptiveFilterType,
}

impl<'a, W: Write> StreamWriter<'a, W> {
    fn new(mut writer: ChunkOutput<'a, W>, buf_len: usize) -> Result<StreamWriter<'a, W>> {
        if writer.as_mut().info.interlaced {
            return Err(EncodingError::Format(
                FormatErrorKind::StreamedInterlacedImage.into(),
            ));
        }
        if buf_len == 0 {
            return Err(EncodingError::Format(
                FormatErrorKind::ZeroIdatChunkSize.into(),
            ));
        }
        let bpp = writer.as_mut().info.bpp_in_prediction();
        let in_len = writer.as_mut().info.raw_row_length() - 1;
        let filter = writer.as_mut().filter;
        let adaptive_filter = writer.as_mut().adaptive_filter;
        let prev_buf = vec![0; in_len];
        let curr_buf = vec![0; in_len];
        let filtered = vec![0; in_len];

        let compression = writer.as_mut().info.compression;
        let chunk_writer = ChunkWriter::new(writer, buf_len);
        let zlib = deflate::write::ZlibEncoder::new(chunk_writer, compression.to_options());

        Ok(StreamWriter {
            writer: Some(zlib),
            index: 0,
            prev_buf,
            curr_buf,
            filtered,
            bpp,
            filter,
            adaptive_filter,
        })
    }

    /// Finish the compressed stream and flush any pending IDAT chunk.
    pub fn finish(mut self) -> Result<()> {
        self.flush_inner()
    }

    fn flush_inner(&mut self) -> Result<()> {
        if self.index > 0 {
            return Err(EncodingError::Format(
                FormatErrorKind::WrittenTooMuch(self.index).into(),
            ));
        }
        if let Some(zlib) = self.writer.take() {
            let mut chunk_writer = zlib.finish()?;
            chunk_writer.flush()?;
            chunk_writer.writer.as_mut().written = true;
        }
        Ok(())
    }
}

impl<W: Write> Write for StreamWriter<'_, W> {
    fn write(&mut self, mut buf: &[u8]) -> io::Result<usize> {
        let written = buf.read(&mut self.curr_buf[self.index..])?;
        self.index += written;

        if self.index >= self.curr_buf.len() {
            self.filtered.copy_from_slice(&self.curr_buf);
            let filter_type = filter(
                self.filter,
                self.adaptive_filter,
                self.bpp,
                &self.prev_buf,
                &mut self.filtered,
            );
            let zlib = self
                .writer
                .as_mut()
                .expect("stream writer used after finish");
            zlib.write_all(&[filter_type as u8])?;
            zlib.write_all(&self.filtered)?;
            // The unfiltered row is the prediction context of the next one.
            mem::swap(&mut self.prev_buf, &mut self.curr_buf);
            self.index = 0;
        }

        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(zlib) = self.writer.as_mut() {
            zlib.flush()?;
        }
        if self.index > 0 {
            let err = EncodingError::Format(FormatErrorKind::WrittenTooMuch(self.index).into());
            return Err(err.into());
        }
        Ok(())
    }
}

impl<W: Write> Drop for StreamWriter<'_, W> {
    fn drop(&mut self) {
        let _ = self.flush_inner();
    }
}

impl Compression {
    fn to_options(self) -> deflate::CompressionOptions {
        match self {
            Compression::Default => deflate::CompressionOptions::default(),
            Compression::Fast => deflate::CompressionOptions::fast(),
            Compression::Best => deflate::CompressionOptions::high(),
            Compression::Huffman => deflate::CompressionOptions::huffman_only(),
            Compression::Rle => deflate::CompressionOptions::rle(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Decoder, Transformations};

    use rand::Rng;
    use std::io::Write;

    fn decode_identity(bytes: &[u8]) -> Vec<u8> {
        let decoder = Decoder::new(bytes);
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        buf
    }

    fn encode_simple(
        width: u32,
        height: u32,
        color: ColorType,
        depth: BitDepth,
        data: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, width, height);
        encoder.set_color(color);
        encoder.set_depth(depth);
        let writer = encoder.write_header().unwrap();
        let mut writer = writer;
        writer.write_image_data(data).unwrap();
        writer.finish().unwrap();
        out
    }

    #[test]
    fn roundtrip_small_grayscale() {
        // A 2x2 8-bit grayscale image given row by row.
        let data = [0u8, 255, 128, 64];
        let bytes = encode_simple(2, 2, ColorType::Grayscale, BitDepth::Eight, &data);
        assert_eq!(decode_identity(&bytes), data);
    }

    #[test]
    fn roundtrip_all_filters() {
        let pixel: Vec<u8> = (0..48).collect();

        let roundtrip = |filter: FilterType| {
            let mut buffer = vec![];
            let mut encoder = Encoder::new(&mut buffer, 4, 4);
            encoder.set_depth(BitDepth::Eight);
            encoder.set_color(ColorType::Rgb);
            encoder.set_filter(filter);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&pixel).unwrap();
            writer.finish().unwrap();

            let dest = decode_identity(&buffer);
            assert_eq!(dest, pixel, "Deviation with filter type {:?}", filter);
        };

        roundtrip(FilterType::NoFilter);
        roundtrip(FilterType::Sub);
        roundtrip(FilterType::Up);
        roundtrip(FilterType::Avg);
        roundtrip(FilterType::Paeth);
    }

    #[test]
    fn roundtrip_adaptive_filtering() {
        let mut rng = rand::thread_rng();
        let mut data = vec![0u8; 4 * 16 * 16];
        rng.fill(&mut data[..]);

        let mut buffer = vec![];
        let mut encoder = Encoder::new(&mut buffer, 16, 16);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_color(ColorType::Rgba);
        encoder.set_adaptive_filter(AdaptiveFilterType::Adaptive);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&data).unwrap();
        writer.finish().unwrap();

        assert_eq!(decode_identity(&buffer), data);
    }

    #[test]
    fn roundtrip_all_color_depth_combinations() {
        let combinations: &[(ColorType, BitDepth)] = &[
            (ColorType::Grayscale, BitDepth::One),
            (ColorType::Grayscale, BitDepth::Two),
            (ColorType::Grayscale, BitDepth::Four),
            (ColorType::Grayscale, BitDepth::Eight),
            (ColorType::Grayscale, BitDepth::Sixteen),
            (ColorType::Rgb, BitDepth::Eight),
            (ColorType::Rgb, BitDepth::Sixteen),
            (ColorType::Indexed, BitDepth::One),
            (ColorType::Indexed, BitDepth::Two),
            (ColorType::Indexed, BitDepth::Four),
            (ColorType::Indexed, BitDepth::Eight),
            (ColorType::GrayscaleAlpha, BitDepth::Eight),
            (ColorType::GrayscaleAlpha, BitDepth::Sixteen),
            (ColorType::Rgba, BitDepth::Eight),
            (ColorType::Rgba, BitDepth::Sixteen),
        ];

        let mut rng = rand::thread_rng();
        let width = 11u32;
        let height = 5u32;

        for &(color, depth) in combinations {
            let row_bytes = color.raw_row_length_from_width(depth, width) - 1;
            let mut data = vec![0u8; row_bytes * height as usize];
            rng.fill(&mut data[..]);

            let mut out = Vec::new();
            let mut encoder = Encoder::new(&mut out, width, height);
            encoder.set_color(color);
            encoder.set_depth(depth);
            if color == ColorType::Indexed {
                let entries = 1usize << depth.into_u8().min(4);
                let mut palette = vec![0u8; entries * 3];
                rng.fill(&mut palette[..]);
                encoder.set_palette(palette);
            }
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&data).unwrap();
            writer.finish().unwrap();

            assert_eq!(
                decode_identity(&out),
                data,
                "roundtrip failed for {:?}/{:?}",
                color,
                depth
            );
        }
    }

    #[test]
    fn palette_image_writes_expected_plte() {
        // Four pixels at two bits each, one palette entry per pixel.
        let palette = vec![0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255];
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 4, 1);
        encoder.set_color(ColorType::Indexed);
        encoder.set_depth(BitDepth::Two);
        encoder.set_palette(palette.clone());
        let mut writer = encoder.write_header().unwrap();
        writer.write_unpacked_image_data(&[0, 1, 2, 3]).unwrap();
        writer.finish().unwrap();

        let mut seen_plte = false;
        for chunk in Decoder::new(&out[..]).into_chunks() {
            let (kind, data) = chunk.unwrap();
            if kind == chunk::PLTE {
                assert_eq!(data, palette);
                seen_plte = true;
            }
        }
        assert!(seen_plte);

        // Identity decoding yields the packed indices.
        assert_eq!(decode_identity(&out), [0b00_01_10_11]);

        // Direct decoding yields one index per sample.
        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::direct());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [0, 1, 2, 3]);
        assert!(buf
            .iter()
            .all(|&index| (index as usize) < palette.len() / 3));
    }

    #[test]
    fn palette_with_alpha_entries_emits_trns() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 1);
        encoder.set_color(ColorType::Indexed);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_palette(vec![255, 0, 0, 0, 255, 0]);
        encoder.set_trns(vec![10, 255]);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0, 1]).unwrap();
        writer.finish().unwrap();

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::rgba8());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, [255, 0, 0, 10, 0, 255, 0, 255]);
    }

    #[test]
    fn roundtrip_sixteen_bit_rgba_exact() {
        // One RGBA pixel: 65535, 0, 32768, 65535 as big endian sample pairs.
        let data = [0xFF, 0xFF, 0x00, 0x00, 0x80, 0x00, 0xFF, 0xFF];
        let bytes = encode_simple(1, 1, ColorType::Rgba, BitDepth::Sixteen, &data);
        assert_eq!(decode_identity(&bytes), data);
    }

    #[test]
    fn interlaced_matches_straight_decoding() {
        // A 9x9 RGB checkerboard; dimensions that exercise all seven passes
        // with partial tiles.
        let mut data = Vec::new();
        for y in 0..9u16 {
            for x in 0..9u16 {
                let v = if (x + y) % 2 == 0 { 255 } else { 0 };
                data.extend([v as u8, 0, 255 - v as u8]);
            }
        }

        let straight = encode_simple(9, 9, ColorType::Rgb, BitDepth::Eight, &data);
        assert_eq!(decode_identity(&straight), data);

        let mut interlaced = Vec::new();
        let mut encoder = Encoder::new(&mut interlaced, 9, 9);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_interlaced(true);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&data).unwrap();
        writer.finish().unwrap();

        assert_eq!(decode_identity(&interlaced), data);

        // Row iteration over the interlaced image yields the same rows top to
        // bottom as the straight image.
        let mut reader = Decoder::new(&interlaced[..]).read_info().unwrap();
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.extend_from_slice(row.data());
        }
        assert_eq!(rows, data);
    }

    #[test]
    fn interlaced_roundtrip_sub_byte_depth() {
        let width = 9u32;
        let height = 9u32;
        let samples: Vec<u8> = (0..width * height).map(|i| (i % 2) as u8).collect();

        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, width, height);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::One);
        encoder.set_interlaced(true);
        let mut writer = encoder.write_header().unwrap();
        writer.write_unpacked_image_data(&samples).unwrap();
        writer.finish().unwrap();

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::direct());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, samples);
    }

    #[test]
    fn one_bit_row_packs_into_single_byte() {
        // Width seven at one bit per sample: one byte with a zero pad bit.
        let samples = [1u8, 0, 1, 0, 1, 0, 1];
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 7, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::One);
        let mut writer = encoder.write_header().unwrap();
        writer.write_unpacked_image_data(&samples).unwrap();
        writer.finish().unwrap();

        assert_eq!(decode_identity(&out), [0b1010_1010]);

        let mut decoder = Decoder::new(&out[..]);
        decoder.set_transformations(Transformations::direct());
        let mut reader = decoder.read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        assert_eq!(buf, samples);
    }

    #[test]
    fn out_of_range_sample_is_rejected() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Two);
        let mut writer = encoder.write_header().unwrap();
        let err = writer.write_unpacked_image_data(&[3, 4]).unwrap_err();
        assert!(matches!(err, EncodingError::Format(_)));
    }

    #[test]
    fn expect_error_on_wrong_image_len() {
        let width = 10;
        let height = 10;

        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, width, height);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_color(ColorType::Rgb);
        let mut writer = encoder.write_header().unwrap();

        let correct_image_size = (width * height * 3) as usize;
        let image = vec![0u8; correct_image_size + 1];
        let result = writer.write_image_data(image.as_ref());
        assert!(result.is_err());
    }

    #[test]
    fn expect_error_on_empty_image() {
        let mut out = Vec::new();

        let encoder = Encoder::new(&mut out, 0, 0);
        assert!(encoder.write_header().is_err());

        let encoder = Encoder::new(&mut out, 100, 0);
        assert!(encoder.write_header().is_err());

        let encoder = Encoder::new(&mut out, 0, 100);
        assert!(encoder.write_header().is_err());
    }

    #[test]
    fn expect_error_on_invalid_bit_depth_color_type_combination() {
        let combinations: &[(ColorType, BitDepth)] = &[
            (ColorType::Rgb, BitDepth::One),
            (ColorType::Rgb, BitDepth::Two),
            (ColorType::Rgb, BitDepth::Four),
            (ColorType::GrayscaleAlpha, BitDepth::One),
            (ColorType::GrayscaleAlpha, BitDepth::Two),
            (ColorType::GrayscaleAlpha, BitDepth::Four),
            (ColorType::Rgba, BitDepth::One),
            (ColorType::Rgba, BitDepth::Two),
            (ColorType::Rgba, BitDepth::Four),
            (ColorType::Indexed, BitDepth::Sixteen),
        ];
        for &(color, depth) in combinations {
            let mut out = Vec::new();
            let mut encoder = Encoder::new(&mut out, 1, 1);
            encoder.set_color(color);
            encoder.set_depth(depth);
            assert!(
                encoder.write_header().is_err(),
                "expected rejection of {:?}/{:?}",
                color,
                depth
            );
        }
    }

    #[test]
    fn indexed_image_requires_palette() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 1, 1);
        encoder.set_color(ColorType::Indexed);
        encoder.set_depth(BitDepth::Eight);
        assert!(encoder.write_header().is_err());
    }

    #[test]
    fn transparent_color_conflicts_with_alpha_channel() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 1, 1);
        encoder.set_color(ColorType::Rgba);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_trns(vec![0, 1, 0, 2, 0, 3]);
        assert!(encoder.write_header().is_err());
    }

    #[test]
    fn ancillary_chunks_roundtrip() {
        let gamma = ScaledFloat::from_scaled(45455);
        let chromaticities = SourceChromaticities::new(
            (0.3127, 0.3290),
            (0.64, 0.33),
            (0.30, 0.60),
            (0.15, 0.06),
        );
        let time = Time {
            year: 2004,
            month: 7,
            day: 31,
            hour: 23,
            minute: 59,
            second: 29,
        };
        let pixel_dims = PixelDimensions {
            xppu: 2835,
            yppu: 2835,
            unit: crate::Unit::Meter,
        };
        let profile: Vec<u8> = (0u16..512).map(|i| (i % 251) as u8).collect();

        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 2, 2);
        encoder.set_color(ColorType::Rgb);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_source_gamma(gamma);
        encoder.set_source_chromaticities(chromaticities);
        encoder.set_icc_profile(profile.clone());
        encoder.set_sbit(vec![5, 6, 5]);
        encoder.set_bkgd(vec![0, 1, 0, 2, 0, 3]);
        encoder.set_trns(vec![9, 8, 7]);
        encoder.set_pixel_dims(pixel_dims);
        encoder.set_time(time);
        encoder.add_text_chunk("Title", "codec test card");
        encoder.add_ztxt_chunk("Description", "a longer body that compresses");
        encoder.add_itxt_chunk("Comment", "\u{e9}chantillon");
        encoder.add_unknown_chunk(UnknownChunk {
            chunk_type: ChunkType(*b"prVt"),
            data: vec![1, 2, 3, 4],
            position: ChunkPosition::BeforePlte,
        });
        encoder.add_unknown_chunk(UnknownChunk {
            chunk_type: ChunkType(*b"paSt"),
            data: vec![5, 6],
            position: ChunkPosition::AfterIdat,
        });
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0u8; 12]).unwrap();
        writer.finish().unwrap();

        let mut reader = Decoder::new(&out[..]).read_info().unwrap();
        let mut buf = vec![0; reader.output_buffer_size()];
        reader.read_image(&mut buf).unwrap();
        reader.finish().unwrap();

        let info = reader.info();
        assert_eq!(info.source_gamma, Some(gamma));
        assert_eq!(info.source_chromaticities, Some(chromaticities));
        assert_eq!(info.icc_profile.as_deref(), Some(&profile[..]));
        assert_eq!(info.sbit.as_deref(), Some(&[5u8, 6, 5][..]));
        assert_eq!(info.bkgd.as_deref(), Some(&[0u8, 1, 0, 2, 0, 3][..]));
        assert_eq!(info.trns.as_deref(), Some(&[9u8, 8, 7][..]));
        assert_eq!(info.pixel_dims, Some(pixel_dims));
        assert_eq!(info.time, Some(time));
        assert_eq!(info.uncompressed_latin1_text.len(), 1);
        assert_eq!(info.uncompressed_latin1_text[0].keyword, "Title");
        assert_eq!(info.uncompressed_latin1_text[0].text, "codec test card");
        assert_eq!(
            info.compressed_latin1_text[0].get_text().unwrap(),
            "a longer body that compresses"
        );
        assert_eq!(info.utf8_text[0].get_text().unwrap(), "\u{e9}chantillon");

        assert_eq!(info.unknown_chunks.len(), 2);
        assert_eq!(info.unknown_chunks[0].chunk_type.0, *b"prVt");
        assert_eq!(info.unknown_chunks[0].data, vec![1, 2, 3, 4]);
        assert_eq!(info.unknown_chunks[0].position, ChunkPosition::BeforePlte);
        assert_eq!(info.unknown_chunks[1].chunk_type.0, *b"paSt");
        assert_eq!(info.unknown_chunks[1].position, ChunkPosition::AfterIdat);
    }

    #[test]
    fn srgb_suppresses_icc_profile() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 1, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_srgb(SrgbRenderingIntent::Perceptual);
        encoder.set_icc_profile(vec![1, 2, 3]);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[0]).unwrap();
        writer.finish().unwrap();

        let reader = Decoder::new(&out[..]).read_info().unwrap();
        let info = reader.info();
        assert_eq!(info.srgb, Some(SrgbRenderingIntent::Perceptual));
        assert!(info.icc_profile.is_none());
        // The substitute gamma of the sRGB space is reported.
        assert_eq!(info.source_gamma, Some(ScaledFloat::srgb_gamma()));
    }

    #[test]
    fn idat_chunk_size_is_respected() {
        let data = vec![7u8; 64 * 64];
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 64, 64);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_compression(Compression::Huffman);
        encoder.set_idat_chunk_size(64).unwrap();
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&data).unwrap();
        writer.finish().unwrap();

        let mut idat_count = 0;
        for chunk in Decoder::new(&out[..]).into_chunks() {
            let (kind, chunk_data) = chunk.unwrap();
            if kind == chunk::IDAT {
                assert!(chunk_data.len() <= 64);
                idat_count += 1;
            }
        }
        assert!(idat_count > 1);
        assert_eq!(decode_identity(&out), data);

        let mut encoder = Encoder::new(Vec::new(), 1, 1);
        assert!(encoder.set_idat_chunk_size(0).is_err());
    }

    #[test]
    fn image_data_can_only_be_written_once() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 1, 1);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(&[1]).unwrap();
        assert!(writer.write_image_data(&[1]).is_err());
    }

    #[test]
    fn stream_writer_roundtrip() {
        let data: Vec<u8> = (0u16..4 * 8 * 8).map(|v| (v % 256) as u8).collect();

        let mut out = Vec::new();
        {
            let mut encoder = Encoder::new(&mut out, 8, 8);
            encoder.set_color(ColorType::Rgba);
            encoder.set_depth(BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            {
                let mut stream = writer.stream_writer().unwrap();
                // Feed the rows in odd sized slices to exercise buffering.
                for piece in data.chunks(13) {
                    stream.write_all(piece).unwrap();
                }
                stream.finish().unwrap();
            }
            writer.finish().unwrap();
        }

        assert_eq!(decode_identity(&out), data);
    }

    #[test]
    fn stream_writer_rejects_interlaced_images() {
        let mut out = Vec::new();
        let mut encoder = Encoder::new(&mut out, 8, 8);
        encoder.set_color(ColorType::Grayscale);
        encoder.set_depth(BitDepth::Eight);
        encoder.set_interlaced(true);
        let mut writer = encoder.write_header().unwrap();
        assert!(writer.stream_writer().is_err());
    }

    #[test]
    fn every_written_chunk_has_a_valid_crc() {
        let data = [0u8, 255, 128, 64];
        let bytes = encode_simple(2, 2, ColorType::Grayscale, BitDepth::Eight, &data);
        // The raw chunk iterator validates each CRC as it goes.
        let chunks: Vec<_> = Decoder::new(&bytes[..])
            .into_chunks()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.first().unwrap().0, chunk::IHDR);
        assert_eq!(chunks.last().unwrap().0, chunk::IEND);
    }
}
