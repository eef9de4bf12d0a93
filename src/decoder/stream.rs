//! The low level streaming chunk decoder.

use std::cmp::min;
use std::convert::TryInto;
use std::error;
use std::fmt;
use std::io;

use crc32fast::Hasher as Crc32;
use log::{trace, warn};

use super::zlib::Inflater;
use super::Limits;
use crate::chunk::{self, ChunkType, IDAT, IEND, IHDR};
use crate::common::{
    BitDepth, ChunkPosition, ColorType, Info, ParameterError, PixelDimensions, ScaledFloat,
    SourceChromaticities, SrgbRenderingIntent, Time, Unit, UnknownChunk,
};
use crate::text_metadata::{ITXtChunk, TEXtChunk, TextDecodingError, ZTXtChunk};

/// Size of the buffers used while reading chunk data and decompressing the
/// image data stream.
pub const CHUNK_BUFFER_SIZE: usize = 32 * 1024;

/// The PNG signature, the first eight bytes of every stream.
pub(crate) const SIGNATURE: [u8; 8] = [137, 80, 78, 71, 13, 10, 26, 10];

#[derive(Debug)]
enum U32Value {
    // CHUNKS
    Length,
    Type(u32),
    Crc(ChunkType),
}

#[derive(Debug)]
enum State {
    Signature(u8, [u8; 7]),
    U32Byte3(U32Value, u32),
    U32Byte2(U32Value, u32),
    U32Byte1(U32Value, u32),
    U32(U32Value),
    ReadChunk(ChunkType),
    PartialChunk(ChunkType),
    DecodeData(ChunkType, usize),
}

#[derive(Debug)]
/// Result of the decoding process
pub enum Decoded {
    /// Nothing decoded yet
    Nothing,
    Header(u32, u32, BitDepth, ColorType, bool),
    ChunkBegin(u32, ChunkType),
    ChunkComplete(u32, ChunkType),
    PixelDimensions(PixelDimensions),
    /// Decoded raw image data.
    ImageData,
    /// The last of a consecutive chunk of IDAT was done.
    /// This is distinct from ChunkComplete which only marks that some IDAT chunk was completed but
    /// not that no additional IDAT chunk follows.
    ImageDataFlushed,
    PartialChunk(ChunkType),
    ImageEnd,
}

/// Any kind of error during PNG decoding.
///
/// This enumeration provides a very rough analysis on the origin of the failure. That is, each
/// variant corresponds to one kind of actor causing the error. It should not be understood as a
/// direct blame but can inform the search for a root cause or if such a search is required.
#[derive(Debug)]
pub enum DecodingError {
    /// An error in IO of the underlying reader.
    IoError(io::Error),
    /// The input image was not a valid PNG.
    ///
    /// There isn't a lot that can be done here, except if the program itself was responsible for
    /// creating this image then investigate the generator. This is internally implemented with a
    /// large Enum. If You are interested in accessing some of the more exact information on the
    /// variant then we can discuss in an issue.
    Format(FormatError),
    /// An interface was used incorrectly.
    ///
    /// This is used in cases where it's expected that the programmer might trip up and stability
    /// of the program depend on the use of the interface. In particular `Format` is expected to be
    /// a serious error type for callers handling arbitrary input.
    Parameter(ParameterError),
    /// The image would have required exceeding the limits configured.
    ///
    /// Note that Your allocations, e.g. when reading into a pre-allocated buffer, is __NOT__
    /// considered part of the limits. Nevertheless, required intermediate buffers such as for
    /// singular lines is checked against the limit.
    LimitsExceeded,
}

#[derive(Debug)]
pub struct FormatError {
    inner: FormatErrorInner,
}

#[derive(Debug)]
pub(crate) enum FormatErrorInner {
    /// Bad framing.
    CrcMismatch {
        /// Stored CRC32 value
        crc_val: u32,
        /// Calculated CRC32 sum
        crc_sum: u32,
        /// The chunk type that has the CRC mismatch.
        chunk: ChunkType,
    },
    /// Not a PNG, the magic signature is missing.
    InvalidSignature,
    /// End of data before image end.
    UnexpectedEof,
    /// End of data within a chunk.
    UnexpectedEndOfChunk,
    // Errors of chunk level ordering, missing etc.
    /// Ihdr must occur.
    MissingIhdr,
    /// Header chunk was not the first chunk.
    ChunkBeforeIhdr {
        kind: ChunkType,
    },
    /// A chunk that must appear at most once was encountered again.
    DuplicateChunk {
        kind: ChunkType,
    },
    /// An unknown chunk with the critical bit set was encountered.
    UnknownCriticalChunk {
        kind: ChunkType,
    },
    /// A chunk was found at a position forbidden by the chunk ordering rules.
    UnexpectedChunk {
        kind: ChunkType,
    },
    /// The IDAT sequence was interrupted and resumed.
    NonContiguousIdat,
    /// No image data was present at all.
    MissingImageData,
    // Errors specific to particular chunk data to be validated.
    /// The palette did not even contain a single pixel data.
    ShortPalette {
        expected: usize,
        len: usize,
    },
    /// A palletized image did not have a palette.
    PaletteRequired,
    /// The palette has more entries than the bit depth of the image permits.
    PaletteTooLarge {
        depth: u8,
        len: usize,
    },
    /// The image width or height is zero.
    InvalidDimensions,
    /// The color-depth combination is not valid according to Table 11.1.
    InvalidColorBitDepth {
        color_type: ColorType,
        bit_depth: BitDepth,
    },
    ColorWithBadTrns(ColorType),
    /// The image bit depth was not one of 1, 2, 4, 8, 16.
    InvalidBitDepth(u8),
    /// The image colour type was not one of 0, 2, 3, 4, 6.
    InvalidColorType(u8),
    /// A chunk had a length incompatible with its type.
    InvalidChunkLength {
        kind: ChunkType,
        actual: usize,
    },
    /// The sBIT chunk did not match the channel count or exceeded the depth.
    InvalidSignificantBits,
    UnknownCompressionMethod(u8),
    /// The scanline filter byte, or the IHDR filter method, was not recognised.
    UnknownFilterMethod(u8),
    UnknownInterlaceMethod(u8),
    /// The compressed data stream ended before all rows were produced.
    NoMoreImageData,
    /// The deflate stream itself is corrupt.
    CorruptFlateStream {
        err: fdeflate::DecompressionError,
    },
    /// Bad text encoding in one of the textual chunks.
    BadTextEncoding(TextDecodingError),
}

impl error::Error for DecodingError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            DecodingError::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for DecodingError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use self::DecodingError::*;
        match self {
            IoError(err) => write!(fmt, "{}", err),
            Parameter(desc) => write!(fmt, "{}", &desc),
            Format(desc) => write!(fmt, "{}", desc),
            LimitsExceeded => write!(fmt, "limits are exceeded"),
        }
    }
}

impl fmt::Display for FormatError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        use FormatErrorInner::*;
        match &self.inner {
            CrcMismatch {
                crc_val,
                crc_sum,
                chunk,
                ..
            } => write!(
                fmt,
                "CRC error: expected 0x{:x} have 0x{:x} while decoding {:?} chunk.",
                crc_val, crc_sum, chunk
            ),
            MissingIhdr => write!(fmt, "IHDR chunk missing"),
            ChunkBeforeIhdr { kind } => write!(fmt, "{:?} chunk appeared before IHDR chunk", kind),
            MissingImageData => write!(fmt, "IDAT or fDAT chunk is missing."),
            DuplicateChunk { kind } => write!(fmt, "Duplicate chunk {:?}.", kind),
            UnknownCriticalChunk { kind } => {
                write!(fmt, "Unknown critical chunk {:?} can not be skipped.", kind)
            }
            UnexpectedChunk { kind } => write!(fmt, "Chunk {:?} is out of place.", kind),
            NonContiguousIdat => write!(fmt, "IDAT chunks are not laid out consecutively."),
            InvalidSignature => write!(fmt, "invalid signature"),
            UnexpectedEof => write!(fmt, "unexpected end of data before image end"),
            UnexpectedEndOfChunk => write!(fmt, "unexpected end of data within a chunk"),
            NoMoreImageData => write!(
                fmt,
                "compressed stream ended before the expected amount of scanlines was produced"
            ),
            ShortPalette { expected, len } => write!(
                fmt,
                "not enough palette entries, expect {} got {}",
                expected, len
            ),
            PaletteRequired => write!(fmt, "missing palette of indexed image"),
            PaletteTooLarge { depth, len } => write!(
                fmt,
                "palette of {} entries does not fit bit depth {}",
                len, depth
            ),
            InvalidDimensions => write!(fmt, "invalid dimensions"),
            InvalidColorBitDepth {
                color_type,
                bit_depth,
            } => write!(
                fmt,
                "Invalid color/depth combination in header: {:?}/{:?}",
                color_type, bit_depth,
            ),
            ColorWithBadTrns(color_type) => write!(
                fmt,
                "Transparency chunk found for color type {:?}.",
                color_type
            ),
            InvalidBitDepth(nr) => write!(fmt, "Invalid bit depth {}.", nr),
            InvalidColorType(nr) => write!(fmt, "Invalid color type {}.", nr),
            InvalidChunkLength { kind, actual } => write!(
                fmt,
                "Chunk {:?} has invalid length {}.",
                kind, actual
            ),
            InvalidSignificantBits => write!(
                fmt,
                "sBIT chunk does not match the channel count or exceeds the bit depth."
            ),
            UnknownCompressionMethod(nr) => write!(fmt, "Unknown compression method {}.", nr),
            UnknownFilterMethod(nr) => write!(fmt, "Unknown filter method {}.", nr),
            UnknownInterlaceMethod(nr) => write!(fmt, "Unknown interlace method {}.", nr),
            CorruptFlateStream { err } => {
                write!(fmt, "Corrupt deflate stream. ")?;
                write!(fmt, "{:?}", err)
            }
            BadTextEncoding(tde) => match tde {
                TextDecodingError::Unrepresentable => {
                    write!(fmt, "Unrepresentable data in tEXt chunk.")
                }
                TextDecodingError::InvalidKeywordSize => {
                    write!(fmt, "Keyword empty or longer than 79 bytes.")
                }
                TextDecodingError::MissingNullSeparator => {
                    write!(fmt, "No null separator in tEXt chunk.")
                }
                TextDecodingError::InflationError => {
                    write!(fmt, "Invalid compressed text data.")
                }
                TextDecodingError::OutOfDecompressionSpace => {
                    write!(fmt, "Out of decompression space. Try with a larger limit.")
                }
                TextDecodingError::InvalidCompressionMethod => {
                    write!(fmt, "Using an unrecognized byte as compression method.")
                }
                TextDecodingError::InvalidCompressionFlag => {
                    write!(fmt, "Using a flag that is not 0 or 255 as a compression flag for iTXt chunk.")
                }
            },
        }
    }
}

impl error::Error for FormatError {}

impl From<io::Error> for DecodingError {
    fn from(err: io::Error) -> DecodingError {
        DecodingError::IoError(err)
    }
}

impl From<FormatError> for DecodingError {
    fn from(err: FormatError) -> DecodingError {
        DecodingError::Format(err)
    }
}

impl From<FormatErrorInner> for FormatError {
    fn from(inner: FormatErrorInner) -> Self {
        FormatError { inner }
    }
}

impl From<DecodingError> for io::Error {
    fn from(err: DecodingError) -> io::Error {
        match err {
            DecodingError::IoError(err) => err,
            err => io::Error::new(io::ErrorKind::Other, err.to_string()),
        }
    }
}

impl From<ParameterError> for DecodingError {
    fn from(err: ParameterError) -> Self {
        DecodingError::Parameter(err)
    }
}

impl From<TextDecodingError> for DecodingError {
    fn from(tbe: TextDecodingError) -> Self {
        DecodingError::Format(FormatError {
            inner: FormatErrorInner::BadTextEncoding(tbe),
        })
    }
}

/// Configuration for the decoder, settled before the stream is touched.
#[derive(Clone, Copy, Debug)]
pub struct DecodeOptions {
    lenient: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { lenient: false }
    }
}

impl DecodeOptions {
    /// When `true`, CRC and Adler-32 mismatches are downgraded to warnings and
    /// decoding continues. Structural errors are still fatal.
    pub fn set_lenient(&mut self, lenient: bool) {
        self.lenient = lenient;
    }

    pub(crate) fn is_lenient(&self) -> bool {
        self.lenient
    }
}

/// How far through the stream the IDAT sequence is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum IdatProgress {
    Pending,
    InProgress,
    Done,
}

/// PNG StreamingDecoder (low-level interface)
pub struct StreamingDecoder {
    state: Option<State>,
    current_chunk: ChunkState,
    /// The inflater state handling consecutive `IDAT` chunks.
    inflater: Inflater,
    /// The complete image info read from all prior chunks.
    pub(crate) info: Option<Info<'static>>,
    idat: IdatProgress,
    options: DecodeOptions,
    /// Count of checksum failures forgiven in lenient mode.
    checksum_warnings: u32,
    pub(crate) limits: Limits,
}

struct ChunkState {
    /// The type of the current chunk.
    /// Relevant for `IDAT` which aggregates consecutive chunks of its own type.
    type_: ChunkType,

    /// Partial crc until now.
    crc: Crc32,

    /// Remaining bytes to be read.
    remaining: u32,

    /// Non-decoded bytes in the chunk.
    raw_bytes: Vec<u8>,
}

impl StreamingDecoder {
    /// Creates a new StreamingDecoder
    ///
    /// Allocates the internal buffers.
    pub fn new() -> StreamingDecoder {
        StreamingDecoder::new_with_options(DecodeOptions::default())
    }

    pub fn new_with_options(options: DecodeOptions) -> StreamingDecoder {
        let mut inflater = Inflater::new();
        inflater.set_ignore_adler32(options.is_lenient());
        StreamingDecoder {
            state: Some(State::Signature(0, [0; 7])),
            current_chunk: ChunkState::default(),
            inflater,
            info: None,
            idat: IdatProgress::Pending,
            options,
            checksum_warnings: 0,
            limits: Limits::default(),
        }
    }

    /// Resets the StreamingDecoder
    pub fn reset(&mut self) {
        self.state = Some(State::Signature(0, [0; 7]));
        self.current_chunk.crc = Crc32::new();
        self.current_chunk.remaining = 0;
        self.current_chunk.raw_bytes.clear();
        self.inflater.reset();
        self.inflater.set_ignore_adler32(self.options.is_lenient());
        self.info = None;
        self.idat = IdatProgress::Pending;
        self.checksum_warnings = 0;
    }

    /// Number of checksum mismatches skipped over in lenient mode.
    pub fn checksum_warnings(&self) -> u32 {
        self.checksum_warnings
    }

    /// Low level StreamingDecoder interface.
    ///
    /// Allows to stream partial data to the decoder. Returns a tuple containing the bytes that
    /// have been consumed from the input buffer and the current decoding result. If the decoded
    /// chunk was an image data chunk, it also appends the read data to `image_data`.
    pub fn update(
        &mut self,
        mut buf: &[u8],
        image_data: &mut Vec<u8>,
    ) -> Result<(usize, Decoded), DecodingError> {
        if self.state.is_none() {
            return Err(DecodingError::Parameter(
                crate::common::ParameterErrorKind::PolledAfterFatalError.into(),
            ));
        }
        let len = buf.len();
        while !buf.is_empty() && self.state.is_some() {
            match self.next_state(buf, image_data) {
                Ok((bytes, Decoded::Nothing)) => buf = &buf[bytes..],
                Ok((bytes, result)) => {
                    buf = &buf[bytes..];
                    return Ok((len - buf.len(), result));
                }
                Err(err) => return Err(err),
            }
        }
        Ok((len - buf.len(), Decoded::Nothing))
    }

    fn next_state(
        &mut self,
        buf: &[u8],
        image_data: &mut Vec<u8>,
    ) -> Result<(usize, Decoded), DecodingError> {
        use self::State::*;

        macro_rules! goto (
            ($n:expr, $state:expr) => ({
                self.state = Some($state);
                Ok(($n, Decoded::Nothing))
            });
            ($state:expr) => ({
                self.state = Some($state);
                Ok((1, Decoded::Nothing))
            });
            ($n:expr, $state:expr, emit $res:expr) => ({
                self.state = Some($state);
                Ok(($n, $res))
            });
            ($state:expr, emit $res:expr) => ({
                self.state = Some($state);
                Ok((1, $res))
            })
        );

        let current_byte = buf[0];

        // Driver should ensure that state is never None
        let state = self.state.take().unwrap();

        match state {
            Signature(i, mut signature) if i < 7 => {
                signature[i as usize] = current_byte;
                goto!(Signature(i + 1, signature))
            }
            Signature(_, signature)
                if signature == [137, 80, 78, 71, 13, 10, 26] && current_byte == 10 =>
            {
                goto!(U32(U32Value::Length))
            }
            Signature(..) => Err(DecodingError::Format(
                FormatErrorInner::InvalidSignature.into(),
            )),
            U32Byte3(type_, mut val) => {
                use self::U32Value::*;
                val |= u32::from(current_byte);
                match type_ {
                    Length => goto!(U32(Type(val))),
                    Type(length) => {
                        let type_str = ChunkType([
                            (val >> 24) as u8,
                            (val >> 16) as u8,
                            (val >> 8) as u8,
                            val as u8,
                        ]);
                        // The IDAT sequence is over when a chunk of any other
                        // type follows it; the inflater is flushed then.
                        if type_str != self.current_chunk.type_
                            && self.current_chunk.type_ == IDAT
                        {
                            self.current_chunk.type_ = type_str;
                            self.idat = IdatProgress::Done;
                            self.inflater.finish(image_data)?;
                            return goto!(
                                0,
                                U32Byte3(Type(length), val & !0xff),
                                emit Decoded::ImageDataFlushed
                            );
                        }
                        self.current_chunk.type_ = type_str;
                        self.current_chunk.crc.reset();
                        self.current_chunk.crc.update(&type_str.0);
                        self.current_chunk.remaining = length;
                        // Chunks we interpret are buffered whole; bound that
                        // allocation the same way other allocations are.
                        if type_str != IDAT && length as usize > self.limits.bytes {
                            return Err(DecodingError::LimitsExceeded);
                        }
                        goto!(
                            ReadChunk(type_str),
                            emit Decoded::ChunkBegin(length, type_str)
                        )
                    }
                    Crc(type_str) => {
                        let sum = self.current_chunk.crc.clone().finalize();
                        if val == sum {
                            goto!(
                                State::U32(U32Value::Length),
                                emit if type_str == IEND {
                                    Decoded::ImageEnd
                                } else {
                                    Decoded::ChunkComplete(val, type_str)
                                }
                            )
                        } else if self.options.is_lenient() {
                            warn!(
                                "CRC mismatch in {:?} chunk: expected 0x{:x} computed 0x{:x}",
                                type_str, val, sum
                            );
                            self.checksum_warnings += 1;
                            goto!(
                                State::U32(U32Value::Length),
                                emit if type_str == IEND {
                                    Decoded::ImageEnd
                                } else {
                                    Decoded::ChunkComplete(val, type_str)
                                }
                            )
                        } else {
                            Err(DecodingError::Format(
                                FormatErrorInner::CrcMismatch {
                                    crc_val: val,
                                    crc_sum: sum,
                                    chunk: type_str,
                                }
                                .into(),
                            ))
                        }
                    }
                }
            }
            U32Byte2(type_, val) => goto!(U32Byte3(type_, val | u32::from(current_byte) << 8)),
            U32Byte1(type_, val) => goto!(U32Byte2(type_, val | u32::from(current_byte) << 16)),
            U32(type_) => goto!(U32Byte1(type_, u32::from(current_byte) << 24)),
            PartialChunk(type_str) => {
                match type_str {
                    IDAT => {
                        if self.idat == IdatProgress::Done {
                            return Err(DecodingError::Format(
                                FormatErrorInner::NonContiguousIdat.into(),
                            ));
                        }
                        if self.idat == IdatProgress::Pending {
                            let info = self.info.as_ref().ok_or(DecodingError::Format(
                                FormatErrorInner::MissingIhdr.into(),
                            ))?;
                            if info.color_type == ColorType::Indexed && info.palette.is_none() {
                                return Err(DecodingError::Format(
                                    FormatErrorInner::PaletteRequired.into(),
                                ));
                            }
                        }
                        self.idat = IdatProgress::InProgress;
                        goto!(
                            0,
                            DecodeData(type_str, 0),
                            emit Decoded::PartialChunk(type_str)
                        )
                    }
                    // Handle other chunks
                    _ => {
                        if self.current_chunk.remaining == 0 {
                            // complete chunk
                            Ok((0, self.parse_chunk(type_str)?))
                        } else {
                            goto!(
                                0, ReadChunk(type_str),
                                emit Decoded::PartialChunk(type_str)
                            )
                        }
                    }
                }
            }
            ReadChunk(type_str) => {
                if self.current_chunk.remaining > 0 {
                    let ChunkState {
                        crc,
                        remaining,
                        raw_bytes,
                        type_: _,
                    } = &mut self.current_chunk;
                    if type_str == IDAT {
                        // IDAT data is streamed through a bounded buffer that
                        // `DecodeData` drains; everything else is buffered whole.
                        let buf_avail = CHUNK_BUFFER_SIZE.saturating_sub(raw_bytes.len());
                        if buf_avail == 0 {
                            return goto!(0, PartialChunk(type_str));
                        }
                        let n = min(*remaining, min(buf.len(), buf_avail) as u32);
                        let buf = &buf[..n as usize];
                        crc.update(buf);
                        raw_bytes.extend_from_slice(buf);
                        *remaining -= n;
                        if *remaining == 0 {
                            goto!(n as usize, PartialChunk(type_str))
                        } else {
                            goto!(n as usize, ReadChunk(type_str))
                        }
                    } else {
                        let n = min(*remaining, buf.len() as u32);
                        let buf = &buf[..n as usize];
                        crc.update(buf);
                        raw_bytes.extend_from_slice(buf);
                        *remaining -= n;
                        if *remaining == 0 {
                            goto!(n as usize, PartialChunk(type_str))
                        } else {
                            goto!(n as usize, ReadChunk(type_str))
                        }
                    }
                } else {
                    goto!(0, U32(U32Value::Crc(type_str)))
                }
            }
            DecodeData(type_str, mut n) => {
                let chunk_len = self.current_chunk.raw_bytes.len();
                let chunk_data = &self.current_chunk.raw_bytes[n..];
                let c = self.inflater.inflate(chunk_data, image_data)?;
                n += c;
                if n == chunk_len && c == 0 {
                    self.current_chunk.raw_bytes.clear();
                    goto!(
                        0,
                        ReadChunk(type_str),
                        emit Decoded::ImageData
                    )
                } else {
                    goto!(
                        0,
                        DecodeData(type_str, n),
                        emit Decoded::ImageData
                    )
                }
            }
        }
    }

    fn parse_chunk(&mut self, type_str: ChunkType) -> Result<Decoded, DecodingError> {
        self.state = Some(State::U32(U32Value::Crc(type_str)));
        if self.info.is_none() && type_str != IHDR {
            return Err(DecodingError::Format(
                FormatErrorInner::ChunkBeforeIhdr { kind: type_str }.into(),
            ));
        }
        let parse_result = match type_str {
            IHDR => self.parse_ihdr(),
            chunk::PLTE => self.parse_plte(),
            chunk::tRNS => self.parse_trns(),
            chunk::pHYs => self.parse_phys(),
            chunk::gAMA => self.parse_gama(),
            chunk::cHRM => self.parse_chrm(),
            chunk::sRGB => self.parse_srgb(),
            chunk::iCCP => self.parse_iccp(),
            chunk::sBIT => self.parse_sbit(),
            chunk::bKGD => self.parse_bkgd(),
            chunk::tIME => self.parse_time(),
            chunk::tEXt => self.parse_text(),
            chunk::zTXt => self.parse_ztxt(),
            chunk::iTXt => self.parse_itxt(),
            IEND => Ok(Decoded::PartialChunk(type_str)),
            _ => self.parse_unknown(type_str),
        };
        parse_result.map_err(|err| {
            // Borrow of self ends here, because DecodingError does not borrow self.
            self.state = None;
            err
        })
    }

    fn info_mut(&mut self) -> Result<&mut Info<'static>, DecodingError> {
        self.info
            .as_mut()
            .ok_or_else(|| DecodingError::Format(FormatErrorInner::MissingIhdr.into()))
    }

    /// The placement bucket for an ancillary chunk met right now.
    fn chunk_position(&self) -> ChunkPosition {
        if self.idat != IdatProgress::Pending {
            ChunkPosition::AfterIdat
        } else if self
            .info
            .as_ref()
            .map_or(false, |info| info.palette.is_some())
        {
            ChunkPosition::BeforeIdat
        } else {
            ChunkPosition::BeforePlte
        }
    }

    fn parse_unknown(&mut self, type_str: ChunkType) -> Result<Decoded, DecodingError> {
        if chunk::is_critical(type_str) {
            return Err(DecodingError::Format(
                FormatErrorInner::UnknownCriticalChunk { kind: type_str }.into(),
            ));
        }
        trace!("preserving unknown ancillary chunk {:?}", type_str);
        let position = self.chunk_position();
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        self.info_mut()?.unknown_chunks.push(UnknownChunk {
            chunk_type: type_str,
            data,
            position,
        });
        Ok(Decoded::Nothing)
    }

    fn parse_plte(&mut self) -> Result<Decoded, DecodingError> {
        let info = self.info_mut()?;
        if info.palette.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::PLTE }.into(),
            ));
        }
        if self.idat != IdatProgress::Pending {
            return Err(DecodingError::Format(
                FormatErrorInner::UnexpectedChunk { kind: chunk::PLTE }.into(),
            ));
        }
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        if data.is_empty() || data.len() % 3 != 0 {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::PLTE,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        let entries = data.len() / 3;
        let info = self.info_mut()?;
        let max_entries = match info.color_type {
            ColorType::Indexed => 1usize << info.bit_depth.into_u8().min(8),
            _ => 256,
        };
        if entries > max_entries {
            return Err(DecodingError::Format(
                FormatErrorInner::PaletteTooLarge {
                    depth: info.bit_depth.into_u8(),
                    len: entries,
                }
                .into(),
            ));
        }
        info.palette = Some(data.into());
        Ok(Decoded::Nothing)
    }

    fn parse_trns(&mut self) -> Result<Decoded, DecodingError> {
        use crate::common::ColorType::*;
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let len = data.len();
        let info = self.info_mut()?;
        if info.trns.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::tRNS }.into(),
            ));
        }
        let mut vec = data;
        match info.color_type {
            Grayscale => {
                if len < 2 {
                    return Err(DecodingError::Format(
                        FormatErrorInner::ShortPalette { expected: 2, len }.into(),
                    ));
                }
                if info.bit_depth.into_u8() < 16 {
                    vec[0] = vec[1];
                    vec.truncate(1);
                }
            }
            Rgb => {
                if len < 6 {
                    return Err(DecodingError::Format(
                        FormatErrorInner::ShortPalette { expected: 6, len }.into(),
                    ));
                }
                if info.bit_depth.into_u8() < 16 {
                    vec[0] = vec[1];
                    vec[1] = vec[3];
                    vec[2] = vec[5];
                    vec.truncate(3);
                }
            }
            Indexed => {
                // The tRNS chunk may contain at most one alpha byte per
                // palette entry and requires the palette to be present.
                let palette_len = match &info.palette {
                    Some(palette) => palette.len() / 3,
                    None => {
                        return Err(DecodingError::Format(
                            FormatErrorInner::UnexpectedChunk { kind: chunk::tRNS }.into(),
                        ))
                    }
                };
                if len > palette_len {
                    return Err(DecodingError::Format(
                        FormatErrorInner::ShortPalette {
                            expected: palette_len,
                            len,
                        }
                        .into(),
                    ));
                }
            }
            c => {
                return Err(DecodingError::Format(
                    FormatErrorInner::ColorWithBadTrns(c).into(),
                ));
            }
        }
        info.trns = Some(vec.into());
        Ok(Decoded::Nothing)
    }

    fn parse_phys(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let actual = data.len();
        let info = self.info_mut()?;
        if info.pixel_dims.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::pHYs }.into(),
            ));
        }
        let data: &[u8; 9] = data.as_slice().try_into().map_err(|_| {
            DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::pHYs,
                    actual,
                }
                .into(),
            )
        })?;
        let xppu = u32::from_be_bytes(data[0..4].try_into().expect("4 bytes"));
        let yppu = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        let unit = Unit::from_u8(data[8]).ok_or_else(|| {
            DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::pHYs,
                    actual: data[8] as usize,
                }
                .into(),
            )
        })?;
        let pixel_dims = PixelDimensions { xppu, yppu, unit };
        self.info_mut()?.pixel_dims = Some(pixel_dims);
        Ok(Decoded::PixelDimensions(pixel_dims))
    }

    fn parse_gama(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.gama_chunk.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::gAMA }.into(),
            ));
        }
        let data: [u8; 4] = data.as_slice().try_into().map_err(|_| {
            DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::gAMA,
                    actual: data.len(),
                }
                .into(),
            )
        })?;
        let gamma = ScaledFloat::from_scaled(u32::from_be_bytes(data));
        info.gama_chunk = Some(gamma);
        if info.srgb.is_none() {
            info.source_gamma = Some(gamma);
        }
        Ok(Decoded::Nothing)
    }

    fn parse_chrm(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.chrm_chunk.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::cHRM }.into(),
            ));
        }
        let data: &[u8; 32] = data.as_slice().try_into().map_err(|_| {
            DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::cHRM,
                    actual: data.len(),
                }
                .into(),
            )
        })?;
        let chromaticities = SourceChromaticities::from_be_bytes(data);
        info.chrm_chunk = Some(chromaticities);
        if info.srgb.is_none() {
            info.source_chromaticities = Some(chromaticities);
        }
        Ok(Decoded::Nothing)
    }

    fn parse_srgb(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.srgb.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::sRGB }.into(),
            ));
        }
        if data.len() != 1 {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::sRGB,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        let rendering_intent = SrgbRenderingIntent::from_raw(data[0]).ok_or_else(|| {
            FormatError::from(FormatErrorInner::InvalidChunkLength {
                kind: chunk::sRGB,
                actual: data[0] as usize,
            })
        })?;
        // Set the substituted gamma and chromaticities; sRGB overrides both.
        info.set_source_srgb(rendering_intent);
        info.source_gamma = Some(ScaledFloat::srgb_gamma());
        info.source_chromaticities = Some(SourceChromaticities::srgb());
        Ok(Decoded::Nothing)
    }

    fn parse_iccp(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.srgb.is_some() {
            // The PNG spec forbids both chunks; when both occur anyway the
            // sRGB claim wins and the profile is dropped.
            trace!("ignoring iCCP chunk in favour of an earlier sRGB chunk");
            return Ok(Decoded::Nothing);
        }
        if info.icc_profile.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::iCCP }.into(),
            ));
        }
        let null_pos = data
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;
        if null_pos == 0 || null_pos > 79 {
            return Err(TextDecodingError::InvalidKeywordSize.into());
        }
        let after = &data[null_pos + 1..];
        let (&method, profile) = after
            .split_first()
            .ok_or_else(|| {
                DecodingError::Format(
                    FormatErrorInner::InvalidChunkLength {
                        kind: chunk::iCCP,
                        actual: data.len(),
                    }
                    .into(),
                )
            })?;
        if method != 0 {
            return Err(DecodingError::Format(
                FormatErrorInner::UnknownCompressionMethod(method).into(),
            ));
        }
        let profile = fdeflate::decompress_to_vec(profile).map_err(|_| {
            DecodingError::from(TextDecodingError::InflationError)
        })?;
        self.info_mut()?.icc_profile = Some(profile.into());
        Ok(Decoded::Nothing)
    }

    fn parse_sbit(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.sbit.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::sBIT }.into(),
            ));
        }
        // For indexed images the sBIT values describe the palette samples,
        // which are always eight bits deep.
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
        if data.len() != expected {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::sBIT,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        if data.iter().any(|&bits| bits == 0 || bits > sample_depth) {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidSignificantBits.into(),
            ));
        }
        info.sbit = Some(data.into());
        Ok(Decoded::Nothing)
    }

    fn parse_bkgd(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.bkgd.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::bKGD }.into(),
            ));
        }
        let expected = match info.color_type {
            ColorType::Indexed => 1,
            ColorType::Grayscale | ColorType::GrayscaleAlpha => 2,
            ColorType::Rgb | ColorType::Rgba => 6,
        };
        if data.len() != expected {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::bKGD,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        info.bkgd = Some(data.into());
        Ok(Decoded::Nothing)
    }

    fn parse_time(&mut self) -> Result<Decoded, DecodingError> {
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        let info = self.info_mut()?;
        if info.time.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: chunk::tIME }.into(),
            ));
        }
        let data: &[u8; 7] = data.as_slice().try_into().map_err(|_| {
            DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: chunk::tIME,
                    actual: data.len(),
                }
                .into(),
            )
        })?;
        info.time = Time::from_bytes(data);
        if info.time.is_none() {
            trace!("tIME chunk with out-of-range fields was dropped");
        }
        Ok(Decoded::Nothing)
    }

    fn parse_text(&mut self) -> Result<Decoded, DecodingError> {
        let buf = std::mem::take(&mut self.current_chunk.raw_bytes);

        let null_byte_index = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;

        let keyword_slice = &buf[..null_byte_index];
        let text_slice = &buf[null_byte_index + 1..];

        let chunk = TEXtChunk::decode(keyword_slice, text_slice)?;
        self.info_mut()?.uncompressed_latin1_text.push(chunk);
        Ok(Decoded::Nothing)
    }

    fn parse_ztxt(&mut self) -> Result<Decoded, DecodingError> {
        let buf = std::mem::take(&mut self.current_chunk.raw_bytes);

        let null_byte_index = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;

        let keyword_slice = &buf[..null_byte_index];
        let rest = &buf[null_byte_index + 1..];
        let (&compression_method, text_slice) = rest
            .split_first()
            .ok_or_else(|| DecodingError::from(TextDecodingError::InvalidCompressionMethod))?;

        let chunk = ZTXtChunk::decode(keyword_slice, compression_method, text_slice)?;
        self.info_mut()?.compressed_latin1_text.push(chunk);
        Ok(Decoded::Nothing)
    }

    fn parse_itxt(&mut self) -> Result<Decoded, DecodingError> {
        let buf = std::mem::take(&mut self.current_chunk.raw_bytes);

        let first_null = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;
        let keyword_slice = &buf[..first_null];
        let rest = &buf[first_null + 1..];
        if rest.len() < 2 {
            return Err(TextDecodingError::MissingNullSeparator.into());
        }
        let compression_flag = rest[0];
        let compression_method = rest[1];
        let rest = &rest[2..];

        let lang_null = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;
        let language_tag_slice = &rest[..lang_null];
        let rest = &rest[lang_null + 1..];

        let translated_null = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| DecodingError::from(TextDecodingError::MissingNullSeparator))?;
        let translated_keyword_slice = &rest[..translated_null];
        let text_slice = &rest[translated_null + 1..];

        let chunk = ITXtChunk::decode(
            keyword_slice,
            compression_flag,
            compression_method,
            language_tag_slice,
            translated_keyword_slice,
            text_slice,
        )?;
        self.info_mut()?.utf8_text.push(chunk);
        Ok(Decoded::Nothing)
    }

    fn parse_ihdr(&mut self) -> Result<Decoded, DecodingError> {
        if self.info.is_some() {
            return Err(DecodingError::Format(
                FormatErrorInner::DuplicateChunk { kind: IHDR }.into(),
            ));
        }
        let data = std::mem::take(&mut self.current_chunk.raw_bytes);
        if data.len() != 13 {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidChunkLength {
                    kind: IHDR,
                    actual: data.len(),
                }
                .into(),
            ));
        }
        let width = u32::from_be_bytes(data[0..4].try_into().expect("4 bytes"));
        let height = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if width == 0 || height == 0 {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidDimensions.into(),
            ));
        }
        let bit_depth = data[8];
        let bit_depth = match BitDepth::from_u8(bit_depth) {
            Some(bits) => bits,
            None => {
                return Err(DecodingError::Format(
                    FormatErrorInner::InvalidBitDepth(bit_depth).into(),
                ))
            }
        };
        let color_type = data[9];
        let color_type = match ColorType::from_u8(color_type) {
            Some(color_type) => color_type,
            None => {
                return Err(DecodingError::Format(
                    FormatErrorInner::InvalidColorType(color_type).into(),
                ))
            }
        };
        if color_type.is_combination_invalid(bit_depth) {
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidColorBitDepth {
                    color_type,
                    bit_depth,
                }
                .into(),
            ));
        }
        match data[10] {
            // compression method
            0u8 => (),
            n => {
                return Err(DecodingError::Format(
                    FormatErrorInner::UnknownCompressionMethod(n).into(),
                ))
            }
        }
        match data[11] {
            // filter method
            0u8 => (),
            n => {
                return Err(DecodingError::Format(
                    FormatErrorInner::UnknownFilterMethod(n).into(),
                ))
            }
        }
        let interlaced = match data[12] {
            0u8 => false,
            1 => true,
            n => {
                return Err(DecodingError::Format(
                    FormatErrorInner::UnknownInterlaceMethod(n).into(),
                ))
            }
        };

        trace!(
            "IHDR: {}x{} {:?} {:?} interlaced: {}",
            width,
            height,
            color_type,
            bit_depth,
            interlaced
        );

        let mut info = Info::default();
        info.width = width;
        info.height = height;
        info.bit_depth = bit_depth;
        info.color_type = color_type;
        info.interlaced = interlaced;

        // The decompressed stream can never legitimately exceed the sum of
        // the per-pass scanline sizes; bound the inflater with it.
        self.inflater
            .set_output_limit(max_decompressed_size(&info));

        self.info = Some(info);
        Ok(Decoded::Header(
            width, height, bit_depth, color_type, interlaced,
        ))
    }
}

/// Upper bound on the decompressed IDAT stream: every scanline of every pass
/// plus its filter type byte.
fn max_decompressed_size(info: &Info) -> usize {
    if info.interlaced {
        crate::adam7::Adam7Iterator::new(info.width, info.height)
            .map(|pass| info.raw_row_length_from_width(pass.width()))
            .sum()
    } else {
        info.height as usize * info.raw_row_length()
    }
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for ChunkState {
    fn default() -> Self {
        ChunkState {
            type_: ChunkType([0; 4]),
            crc: Crc32::new(),
            remaining: 0,
            raw_bytes: Vec::with_capacity(CHUNK_BUFFER_SIZE),
        }
    }
}
