//! Transforming a decompressed, unfiltered row into the final output.

mod palette;

use crate::common::ParameterErrorKind;
use crate::{BitDepth, ColorType, DecodingError, Info, Transformations};

use super::stream::FormatErrorInner;

/// Type of a function that can transform a decompressed, unfiltered row (the
/// 1st argument) into the final pixels (the 2nd argument), using image
/// metadata (e.g. PLTE data can be accessed using the 3rd argument).
pub(crate) type TransformFn = Box<dyn FnMut(&[u8], &mut [u8], &Info) + Send>;

/// The first pipeline stage: from stored scanline bytes to one sample per
/// byte pair/byte, with palette expansion and alpha synthesis folded in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExpandStep {
    /// Stored bytes pass through untouched.
    Copy,
    /// Unpack sub-byte samples to one byte each without rescaling.
    Unpack,
    /// Palette indices to RGB8 triples.
    PaletteRgb8,
    /// Palette indices to RGBA8, alpha from tRNS entries.
    PaletteRgba8,
    /// Sub-byte grayscale rescaled to 8-bit.
    GraySub,
    /// Sub-byte grayscale rescaled to 8-bit plus a synthesized alpha channel.
    GraySubAlpha,
    /// Append an 8-bit alpha channel, transparent where the pixel matches tRNS.
    Alpha8 { channels: usize },
    /// Append a 16-bit alpha channel, transparent where the pixel matches tRNS.
    Alpha16 { channels: usize },
}

/// The final pipeline stage adjusting the sample depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DepthStep {
    /// 16-bit samples reduced to their high byte.
    Strip16,
    /// 8-bit samples widened by left-shift-and-fill (v * 257).
    Expand16,
}

/// The composed per-row plan derived from the image format and the requested
/// transformations. Sizes are bytes per pixel after each stage.
struct Plan {
    expand: ExpandStep,
    /// `(sample_depth, significant_bits)` when sBIT noise removal applies.
    sbit: Option<(u8, u8)>,
    gray_to_rgb: bool,
    /// Whether the expanded row carries an alpha channel.
    has_alpha: bool,
    /// Bytes per sample of the expanded row, 1 or 2.
    sample_bytes: usize,
    depth: Option<DepthStep>,
    bpp_expanded: usize,
    bpp_rgb: usize,
    bpp_out: usize,
}

/// The color type and bit depth of rows produced under `transform`.
///
/// With only [`Transformations::PACKING`] requested the samples are widened to
/// one byte each but keep their stored range, so the stored bit depth is
/// reported unchanged.
pub(crate) fn output_format(info: &Info, transform: Transformations) -> (ColorType, BitDepth) {
    use crate::common::ColorType::*;
    let expand = transform
        .intersects(Transformations::EXPAND | Transformations::ALPHA | Transformations::GRAY_TO_RGB);
    if !expand {
        if transform.contains(Transformations::STRIP_16) && info.bit_depth == BitDepth::Sixteen {
            return (info.color_type, BitDepth::Eight);
        }
        if transform.contains(Transformations::EXPAND_16) && info.bit_depth == BitDepth::Eight {
            return (info.color_type, BitDepth::Sixteen);
        }
        return (info.color_type, info.bit_depth);
    }

    let trns = info.trns.is_some();
    let alpha = transform.contains(Transformations::ALPHA);
    let color = match info.color_type {
        Indexed if trns || alpha => Rgba,
        Indexed => Rgb,
        Grayscale if trns || alpha => GrayscaleAlpha,
        Rgb if trns || alpha => Rgba,
        ct => ct,
    };
    let color = if transform.contains(Transformations::GRAY_TO_RGB) {
        match color {
            Grayscale => Rgb,
            GrayscaleAlpha => Rgba,
            ct => ct,
        }
    } else {
        color
    };
    let depth = if info.bit_depth == BitDepth::Sixteen {
        if transform.contains(Transformations::STRIP_16) {
            BitDepth::Eight
        } else {
            BitDepth::Sixteen
        }
    } else if transform.contains(Transformations::EXPAND_16) {
        BitDepth::Sixteen
    } else {
        BitDepth::Eight
    };
    (color, depth)
}

/// Bytes per output row for a row of `width` pixels under `transform`.
pub(crate) fn output_line_size(info: &Info, transform: Transformations, width: u32) -> usize {
    let expand = transform
        .intersects(Transformations::EXPAND | Transformations::ALPHA | Transformations::GRAY_TO_RGB);
    if !expand
        && transform.contains(Transformations::PACKING)
        && (info.bit_depth as u8) < 8
    {
        // One byte per sample at the stored value range.
        return width as usize * info.color_type.samples();
    }
    let (color, depth) = output_format(info, transform);
    color.raw_row_length_from_width(depth, width) - 1
}

/// Bits per output pixel under `transform`, at the granularity used to splice
/// interlace passes into the final image.
pub(crate) fn output_bits_per_pixel(info: &Info, transform: Transformations) -> usize {
    let expand = transform
        .intersects(Transformations::EXPAND | Transformations::ALPHA | Transformations::GRAY_TO_RGB);
    if !expand
        && transform.contains(Transformations::PACKING)
        && (info.bit_depth as u8) < 8
    {
        // Unpacked samples occupy a whole byte each.
        return info.color_type.samples() * 8;
    }
    let (color, depth) = output_format(info, transform);
    color.samples() * depth as usize
}

/// Returns a transformation function that should be applied to image rows based
/// on 1) decoded image metadata (`info`) and 2) the transformations requested
/// by the crate client (`transform`).
pub(crate) fn create_transform_fn(
    info: &Info,
    transform: Transformations,
) -> Result<TransformFn, DecodingError> {
    let color_type = info.color_type;
    let bit_depth = info.bit_depth as u8;
    let trns = info.trns.is_some();
    let alpha = transform.contains(Transformations::ALPHA);
    let expand = transform
        .intersects(Transformations::EXPAND | Transformations::ALPHA | Transformations::GRAY_TO_RGB);
    let gray_to_rgb = transform.contains(Transformations::GRAY_TO_RGB);

    if gray_to_rgb && !alpha && (color_type.has_alpha() || trns) {
        // The caller asked for a canonical alpha-less form; dropping real or
        // synthesized transparency would not be value preserving.
        return Err(DecodingError::Parameter(
            ParameterErrorKind::LossyConversionRefused.into(),
        ));
    }

    if color_type == ColorType::Indexed && expand {
        if info.palette.is_none() {
            return Err(DecodingError::Format(
                FormatErrorInner::PaletteRequired.into(),
            ));
        } else if let BitDepth::Sixteen = info.bit_depth {
            // This should have been caught earlier but let's check again. Can't hurt.
            return Err(DecodingError::Format(
                FormatErrorInner::InvalidColorBitDepth {
                    color_type: ColorType::Indexed,
                    bit_depth: BitDepth::Sixteen,
                }
                .into(),
            ));
        }
    }

    let (expand_step, bpp_expanded, channels_expanded, expanded_depth) = if expand {
        match color_type {
            ColorType::Indexed => {
                if trns || alpha {
                    (ExpandStep::PaletteRgba8, 4, 4, 8)
                } else {
                    (ExpandStep::PaletteRgb8, 3, 3, 8)
                }
            }
            ColorType::Grayscale if bit_depth < 8 => {
                if trns || alpha {
                    (ExpandStep::GraySubAlpha, 2, 2, 8)
                } else {
                    (ExpandStep::GraySub, 1, 1, 8)
                }
            }
            ColorType::Grayscale | ColorType::Rgb if trns || alpha => {
                let channels = color_type.samples();
                if bit_depth == 16 {
                    (ExpandStep::Alpha16 { channels }, (channels + 1) * 2, channels + 1, 16)
                } else {
                    (ExpandStep::Alpha8 { channels }, channels + 1, channels + 1, 8)
                }
            }
            ct => {
                let channels = ct.samples();
                let bytes = usize::from(bit_depth / 8);
                (ExpandStep::Copy, channels * bytes, channels, bit_depth)
            }
        }
    } else if transform.contains(Transformations::PACKING) && bit_depth < 8 {
        (ExpandStep::Unpack, 1, 1, bit_depth)
    } else {
        let channels = color_type.samples();
        let bytes = usize::from(bit_depth.max(8) / 8);
        (ExpandStep::Copy, channels * bytes, channels, bit_depth)
    };

    // Noise bits below the significant-bit mark only matter for coerced
    // output; palette samples are always full 8-bit.
    let sbit = match (&info.sbit, expand, color_type) {
        (Some(sbit), true, ct) if ct != ColorType::Indexed && bit_depth >= 8 => {
            let significant = sbit.iter().copied().max().unwrap_or(bit_depth);
            if significant < bit_depth {
                Some((bit_depth, significant))
            } else {
                None
            }
        }
        _ => None,
    };

    let sample_bytes = usize::from(expanded_depth.max(8) / 8);
    let gray_to_rgb =
        gray_to_rgb && matches!(channels_expanded, 1 | 2) && expand_step != ExpandStep::Unpack;
    let bpp_rgb = if gray_to_rgb {
        bpp_expanded + 2 * sample_bytes
    } else {
        bpp_expanded
    };

    let depth = if expanded_depth == 16 && transform.contains(Transformations::STRIP_16) {
        Some(DepthStep::Strip16)
    } else if expanded_depth == 8 && expand && transform.contains(Transformations::EXPAND_16) {
        Some(DepthStep::Expand16)
    } else if expanded_depth == 8
        && !expand
        && bit_depth == 8
        && transform.contains(Transformations::EXPAND_16)
    {
        Some(DepthStep::Expand16)
    } else {
        None
    };
    let bpp_out = match depth {
        Some(DepthStep::Strip16) => bpp_rgb / 2,
        Some(DepthStep::Expand16) => bpp_rgb * 2,
        None => bpp_rgb,
    };

    let plan = Plan {
        expand: expand_step,
        sbit,
        gray_to_rgb,
        has_alpha: channels_expanded == 2,
        sample_bytes,
        depth,
        bpp_expanded,
        bpp_rgb,
        bpp_out,
    };

    let mut scratch_a: Vec<u8> = Vec::new();
    let mut scratch_b: Vec<u8> = Vec::new();
    Ok(Box::new(move |row: &[u8], output: &mut [u8], info: &Info| {
        debug_assert_eq!(output.len() % plan.bpp_out, 0);
        let pixels = output.len() / plan.bpp_out;

        if !plan.gray_to_rgb && plan.depth.is_none() {
            run_expand(plan.expand, row, output, info);
            if let Some((depth, significant)) = plan.sbit {
                strip_insignificant_bits(output, depth, significant);
            }
            return;
        }

        let expanded_len = pixels * plan.bpp_expanded;
        scratch_a.resize(expanded_len, 0);
        run_expand(plan.expand, row, &mut scratch_a[..expanded_len], info);
        if let Some((depth, significant)) = plan.sbit {
            strip_insignificant_bits(&mut scratch_a[..expanded_len], depth, significant);
        }

        match (plan.gray_to_rgb, plan.depth) {
            (true, None) => gray_to_rgb_row(
                &scratch_a[..expanded_len],
                output,
                plan.sample_bytes,
                plan.has_alpha,
            ),
            (false, Some(step)) => run_depth(step, &scratch_a[..expanded_len], output),
            (true, Some(step)) => {
                let rgb_len = pixels * plan.bpp_rgb;
                scratch_b.resize(rgb_len, 0);
                gray_to_rgb_row(
                    &scratch_a[..expanded_len],
                    &mut scratch_b[..rgb_len],
                    plan.sample_bytes,
                    plan.has_alpha,
                );
                run_depth(step, &scratch_b[..rgb_len], output);
            }
            (false, None) => unreachable!(),
        }
    }))
}

fn run_expand(step: ExpandStep, row: &[u8], output: &mut [u8], info: &Info) {
    match step {
        ExpandStep::Copy => copy_row(row, output, info),
        ExpandStep::Unpack => unpack_row(row, output, info),
        ExpandStep::PaletteRgb8 => palette::expand_paletted_into_rgb8(row, output, info),
        ExpandStep::PaletteRgba8 => palette::expand_paletted_into_rgba8(row, output, info),
        ExpandStep::GraySub => expand_gray_u8(row, output, info),
        ExpandStep::GraySubAlpha => expand_gray_u8_with_alpha(row, output, info),
        ExpandStep::Alpha8 { channels } => expand_trns_line(row, output, info, channels),
        ExpandStep::Alpha16 { channels } => expand_trns_line16(row, output, info, channels),
    }
}

fn run_depth(step: DepthStep, input: &[u8], output: &mut [u8]) {
    match step {
        DepthStep::Strip16 => {
            for (out, pair) in output.iter_mut().zip(input.chunks_exact(2)) {
                *out = pair[0];
            }
        }
        DepthStep::Expand16 => {
            for (out, &value) in output.chunks_exact_mut(2).zip(input.iter()) {
                // v * 257, the exact 8 -> 16 bit rescale.
                out[0] = value;
                out[1] = value;
            }
        }
    }
}

fn copy_row(row: &[u8], output_buffer: &mut [u8], _: &Info) {
    output_buffer.copy_from_slice(&row[..output_buffer.len()]);
}

fn unpack_row(row: &[u8], output_buffer: &mut [u8], info: &Info) {
    crate::utils::unpack_bits(row, output_buffer, 1, info.bit_depth as u8, |val, chunk| {
        chunk[0] = val
    });
}

fn expand_gray_u8(row: &[u8], buffer: &mut [u8], info: &Info) {
    let scaling_factor = (255) / ((1u16 << info.bit_depth as u8) - 1) as u8;
    crate::utils::unpack_bits(row, buffer, 1, info.bit_depth as u8, |val, chunk| {
        chunk[0] = val * scaling_factor
    });
}

fn expand_gray_u8_with_alpha(row: &[u8], buffer: &mut [u8], info: &Info) {
    let scaling_factor = (255) / ((1u16 << info.bit_depth as u8) - 1) as u8;
    let trns = info.trns.as_deref();
    crate::utils::unpack_bits(row, buffer, 2, info.bit_depth as u8, |pixel, chunk| {
        chunk[1] = match trns {
            Some(trns) if pixel == trns[0] => 0,
            _ => 0xFF,
        };
        chunk[0] = pixel * scaling_factor
    });
}

fn expand_trns_line(input: &[u8], output: &mut [u8], info: &Info, channels: usize) {
    let trns = info.trns.as_deref();
    for (input, output) in input
        .chunks_exact(channels)
        .zip(output.chunks_exact_mut(channels + 1))
    {
        output[..channels].copy_from_slice(input);
        output[channels] = if trns.is_some() && Some(input) == trns {
            0
        } else {
            0xFF
        };
    }
}

fn expand_trns_line16(input: &[u8], output: &mut [u8], info: &Info, channels: usize) {
    let trns = info.trns.as_deref();
    for (input, output) in input
        .chunks_exact(channels * 2)
        .zip(output.chunks_exact_mut(channels * 2 + 2))
    {
        output[..channels * 2].copy_from_slice(input);
        if trns.is_some() && Some(input) == trns {
            output[channels * 2] = 0;
            output[channels * 2 + 1] = 0
        } else {
            output[channels * 2] = 0xFF;
            output[channels * 2 + 1] = 0xFF
        };
    }
}

/// Replicates the gray sample of each pixel into three channels, carrying any
/// alpha channel along. Two-byte samples are big endian pairs.
fn gray_to_rgb_row(input: &[u8], output: &mut [u8], sample_bytes: usize, has_alpha: bool) {
    let in_bpp = sample_bytes * (1 + usize::from(has_alpha));
    let out_bpp = sample_bytes * (3 + usize::from(has_alpha));
    for (pixel, out) in input
        .chunks_exact(in_bpp)
        .zip(output.chunks_exact_mut(out_bpp))
    {
        let gray = &pixel[..sample_bytes];
        out[..sample_bytes].copy_from_slice(gray);
        out[sample_bytes..2 * sample_bytes].copy_from_slice(gray);
        out[2 * sample_bytes..3 * sample_bytes].copy_from_slice(gray);
        if has_alpha {
            out[3 * sample_bytes..].copy_from_slice(&pixel[sample_bytes..]);
        }
    }
}

/// Clears sample bits below the significant-bit mark and rescales the
/// remaining value back to the full range of the sample depth.
fn strip_insignificant_bits(buffer: &mut [u8], depth: u8, significant: u8) {
    debug_assert!(significant < depth);
    let shift = depth - significant;
    let max_significant = (1u32 << significant) - 1;
    match depth {
        8 => {
            let max = 255u32;
            for value in buffer.iter_mut() {
                let stripped = u32::from(*value) >> shift;
                *value = ((stripped * max + max_significant / 2) / max_significant) as u8;
            }
        }
        16 => {
            let max = 65535u32;
            for pair in buffer.chunks_exact_mut(2) {
                let value = u32::from(u16::from_be_bytes([pair[0], pair[1]]));
                let stripped = value >> shift;
                let rescaled = ((stripped * max + max_significant / 2) / max_significant) as u16;
                pair.copy_from_slice(&rescaled.to_be_bytes());
            }
        }
        _ => unreachable!("sBIT correction only applies to byte aligned samples"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Info;

    fn gray_info(depth: BitDepth) -> Info<'static> {
        let mut info = Info::with_size(4, 1);
        info.color_type = ColorType::Grayscale;
        info.bit_depth = depth;
        info
    }

    #[test]
    fn packing_keeps_stored_values() {
        let info = gray_info(BitDepth::Two);
        let mut transform_fn =
            create_transform_fn(&info, Transformations::direct()).unwrap();
        let row = [0b00_01_10_11];
        let mut output = [0u8; 4];
        transform_fn(&row, &mut output, &info);
        assert_eq!(output, [0, 1, 2, 3]);
        assert_eq!(
            output_format(&info, Transformations::direct()),
            (ColorType::Grayscale, BitDepth::Two)
        );
    }

    #[test]
    fn expand_scales_gray_samples() {
        let info = gray_info(BitDepth::Two);
        let mut transform_fn = create_transform_fn(&info, Transformations::EXPAND).unwrap();
        let row = [0b00_01_10_11];
        let mut output = [0u8; 4];
        transform_fn(&row, &mut output, &info);
        assert_eq!(output, [0, 85, 170, 255]);
    }

    #[test]
    fn rgb8_replicates_gray() {
        let info = gray_info(BitDepth::Eight);
        let mut transform_fn = create_transform_fn(&info, Transformations::rgb8()).unwrap();
        let row = [7u8, 130, 255, 0];
        let mut output = [0u8; 12];
        transform_fn(&row, &mut output, &info);
        assert_eq!(output, [7, 7, 7, 130, 130, 130, 255, 255, 255, 0, 0, 0]);
    }

    #[test]
    fn rgba16_from_gray8_is_exact_at_extremes() {
        let info = gray_info(BitDepth::Eight);
        let mut transform_fn = create_transform_fn(&info, Transformations::rgba16()).unwrap();
        let row = [0u8, 255, 1, 128];
        let mut output = [0u8; 4 * 8];
        transform_fn(&row, &mut output, &info);
        // 0 -> 0, 255 -> 65535, v -> v * 257; alpha fully opaque.
        assert_eq!(&output[0..8], &[0, 0, 0, 0, 0, 0, 255, 255]);
        assert_eq!(&output[8..16], &[255, 255, 255, 255, 255, 255, 255, 255]);
        assert_eq!(&output[16..24], &[1, 1, 1, 1, 1, 1, 255, 255]);
    }

    #[test]
    fn rgb8_refuses_alpha_sources() {
        let mut info = Info::with_size(2, 1);
        info.color_type = ColorType::Rgba;
        info.bit_depth = BitDepth::Eight;
        assert!(matches!(
            create_transform_fn(&info, Transformations::rgb8()),
            Err(DecodingError::Parameter(_))
        ));

        let mut info = gray_info(BitDepth::Eight);
        info.trns = Some(vec![42].into());
        assert!(matches!(
            create_transform_fn(&info, Transformations::rgb8()),
            Err(DecodingError::Parameter(_))
        ));
        // The alpha-carrying form accepts the same source.
        assert!(create_transform_fn(&info, Transformations::rgba8()).is_ok());
    }

    #[test]
    fn trns_synthesizes_alpha() {
        let mut info = gray_info(BitDepth::Eight);
        info.trns = Some(vec![3].into());
        let mut transform_fn = create_transform_fn(&info, Transformations::EXPAND).unwrap();
        let row = [3u8, 4, 3, 9];
        let mut output = [0u8; 8];
        transform_fn(&row, &mut output, &info);
        assert_eq!(output, [3, 0, 4, 255, 3, 0, 9, 255]);
    }

    #[test]
    fn sbit_drops_noise_bits() {
        let mut info = gray_info(BitDepth::Eight);
        info.sbit = Some(vec![4].into());
        let mut transform_fn = create_transform_fn(&info, Transformations::EXPAND).unwrap();
        // 0xFF and 0xF7 carry the same 4 significant bits.
        let row = [0xFFu8, 0xF7, 0x00, 0x08];
        let mut output = [0u8; 4];
        transform_fn(&row, &mut output, &info);
        assert_eq!(output[0], output[1]);
        assert_eq!(output[0], 255);
        assert_eq!(output[2], 0);
    }
}
