//! Helpers for expanding indexed rows through the palette.

use crate::utils::unpack_bits;
use crate::Info;

/// Expands a palettized row into RGB8.
///
/// An index beyond the palette decodes as opaque black, matching the common
/// decoder behaviour for damaged files when strict mode is off.
pub(in crate::decoder) fn expand_paletted_into_rgb8(row: &[u8], output: &mut [u8], info: &Info) {
    let palette = info.palette.as_deref().unwrap_or(&[]);
    let black = [0, 0, 0];

    unpack_bits(row, output, 3, info.bit_depth as u8, |i, chunk| {
        let rgb = palette
            .get(3 * i as usize..3 * i as usize + 3)
            .unwrap_or(&black);
        chunk[0] = rgb[0];
        chunk[1] = rgb[1];
        chunk[2] = rgb[2];
    });
}

/// Expands a palettized row into RGBA8, taking alpha values from the tRNS
/// entries; palette entries without a tRNS byte are fully opaque.
pub(in crate::decoder) fn expand_paletted_into_rgba8(row: &[u8], output: &mut [u8], info: &Info) {
    let palette = info.palette.as_deref().unwrap_or(&[]);
    let trns = info.trns.as_deref().unwrap_or(&[]);
    let black = [0, 0, 0];

    unpack_bits(row, output, 4, info.bit_depth as u8, |i, chunk| {
        let (rgb, a) = (
            palette
                .get(3 * i as usize..3 * i as usize + 3)
                .unwrap_or(&black),
            *trns.get(i as usize).unwrap_or(&0xFF),
        );
        chunk[0] = rgb[0];
        chunk[1] = rgb[1];
        chunk[2] = rgb[2];
        chunk[3] = a;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BitDepth, ColorType};

    fn indexed_info(depth: BitDepth, palette: Vec<u8>, trns: Option<Vec<u8>>) -> Info<'static> {
        let mut info = Info::with_size(4, 1);
        info.color_type = ColorType::Indexed;
        info.bit_depth = depth;
        info.palette = Some(palette.into());
        info.trns = trns.map(Into::into);
        info
    }

    #[test]
    fn expands_two_bit_indices() {
        let info = indexed_info(
            BitDepth::Two,
            vec![0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255],
            None,
        );
        let row = [0b00_01_10_11];
        let mut output = [0u8; 12];
        expand_paletted_into_rgb8(&row, &mut output, &info);
        assert_eq!(output, [0, 0, 0, 255, 0, 0, 0, 255, 0, 0, 0, 255]);
    }

    #[test]
    fn missing_trns_entries_are_opaque() {
        let info = indexed_info(
            BitDepth::Eight,
            vec![10, 20, 30, 40, 50, 60],
            Some(vec![7]),
        );
        let row = [0u8, 1];
        let mut output = [0u8; 8];
        expand_paletted_into_rgba8(&row, &mut output, &info);
        assert_eq!(output, [10, 20, 30, 7, 40, 50, 60, 255]);
    }

    #[test]
    fn out_of_range_index_decodes_black() {
        let info = indexed_info(BitDepth::Eight, vec![10, 20, 30], None);
        let row = [5u8];
        let mut output = [0u8; 3];
        expand_paletted_into_rgb8(&row, &mut output, &info);
        assert_eq!(output, [0, 0, 0]);
    }
}
