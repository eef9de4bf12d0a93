//! # PNG encoder and decoder
//!
//! This crate contains a row-oriented PNG decoder and encoder: every colour
//! type, every bit depth, interlaced or not, with the ancillary chunks that
//! affect pixel interpretation decoded into typed metadata and round-tripped
//! on encode.
//!
//! ## The decoder
//!
//! The most important types for decoding purposes are [`Decoder`] and
//! [`Reader`]. They both wrap a `std::io::Read`.
//! `Decoder` serves as a builder for `Reader`. Calling [`Decoder::read_info`]
//! reads from the `Read` until the image data is reached.
//!
//! ### Using the decoder
//! ```no_run
//! use std::fs::File;
//!
//! // The decoder is a build for the reader and can be used to set various decoding options
//! // affecting the output, by default transformations are not applied and the output format
//! // matches the stored format.
//! let decoder = rowpng::Decoder::new(File::open("tests/pngsuite/basi0g01.png").unwrap());
//! let mut reader = decoder.read_info().unwrap();
//! // Allocate the output buffer.
//! let mut buf = vec![0; reader.output_buffer_size()];
//! // Read the whole image, top to bottom.
//! let info = reader.read_image(&mut buf).unwrap();
//! // Grab the bytes of the image.
//! let bytes = &buf[..info.buffer_size()];
//! ```
//!
//! Rows can also be pulled one at a time with [`Reader::next_row`]; for
//! non-interlaced images this consumes the input incrementally and keeps no
//! more than one scanline of state. Coercions into canonical formats are
//! requested up front through [`Transformations`], e.g.
//! [`Transformations::rgba8`] for 8-bit RGBA output regardless of the stored
//! format.
//!
//! ## The encoder
//!
//! The active types are [`Encoder`], the configuration builder, and
//! [`Writer`], obtained from [`Encoder::write_header`].
//!
//! ### Using the encoder
//! ```no_run
//! use std::io::BufWriter;
//! use std::fs::File;
//!
//! let file = File::create("image.png").unwrap();
//! let w = &mut BufWriter::new(file);
//!
//! let mut encoder = rowpng::Encoder::new(w, 2, 1);
//! encoder.set_color(rowpng::ColorType::Rgba);
//! encoder.set_depth(rowpng::BitDepth::Eight);
//! let mut writer = encoder.write_header().unwrap();
//!
//! let data = [255, 0, 0, 255, 0, 0, 0, 255]; // One red and one black pixel.
//! writer.write_image_data(&data).unwrap();
//! writer.finish().unwrap();
//! ```

#![forbid(unsafe_code)]

mod adam7;
pub mod chunk;
mod common;
mod decoder;
mod encoder;
mod filter;
pub mod text_metadata;
mod traits;
mod utils;

pub use crate::adam7::Adam7Info;
pub use crate::common::*;
pub use crate::decoder::{
    DecodeOptions, Decoded, Decoder, DecodingError, InterlaceInfo, InterlacedRow, Limits,
    OutputInfo, RawChunks, Reader, Row, StreamingDecoder,
};
pub use crate::encoder::{Encoder, EncodingError, StreamWriter, Writer};
pub use crate::filter::{AdaptiveFilterType, FilterType};
