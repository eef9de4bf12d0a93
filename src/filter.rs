//! Scanline filtering as defined in section 9 of the PNG specification.

use crate::common::BytesPerPixel;

/// The filtering method applied to a scanline before compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterType {
    NoFilter = 0,
    Sub = 1,
    Up = 2,
    Avg = 3,
    Paeth = 4,
}

impl Default for FilterType {
    fn default() -> Self {
        FilterType::Sub
    }
}

impl FilterType {
    /// u8 -> Self. Temporary solution until Rust provides a canonical one.
    pub fn from_u8(n: u8) -> Option<FilterType> {
        match n {
            0 => Some(FilterType::NoFilter),
            1 => Some(FilterType::Sub),
            2 => Some(FilterType::Up),
            3 => Some(FilterType::Avg),
            4 => Some(FilterType::Paeth),
            _ => None,
        }
    }
}

/// Whether the encoder picks a filter per scanline or uses a fixed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptiveFilterType {
    /// Pick the candidate filter minimising the sum of absolute values of the
    /// filtered output, each byte interpreted as a signed value.
    Adaptive,
    /// Use the configured [`FilterType`] for every scanline.
    NonAdaptive,
}

impl Default for AdaptiveFilterType {
    fn default() -> Self {
        AdaptiveFilterType::NonAdaptive
    }
}

fn filter_paeth(a: u8, b: u8, c: u8) -> u8 {
    let ia = i16::from(a);
    let ib = i16::from(b);
    let ic = i16::from(c);

    let p = ia + ib - ic;

    let pa = (p - ia).abs();
    let pb = (p - ib).abs();
    let pc = (p - ic).abs();

    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

/// Undoes the effect of `filter` on `current`.
///
/// `previous` is the already reconstructed prior scanline of the same pass and
/// may be empty for the first scanline, in which case it is treated as all
/// zeros.
pub(crate) fn unfilter(filter: FilterType, bpp: BytesPerPixel, previous: &[u8], current: &mut [u8]) {
    use self::FilterType::*;
    let bpp = bpp.into_usize();
    let len = current.len();
    debug_assert!(previous.is_empty() || previous.len() == len);

    if previous.is_empty() {
        // First scanline of a pass: the virtual previous line is all zeros, so
        // Up degenerates to NoFilter and Paeth to Sub.
        match filter {
            NoFilter | Up => (),
            Sub | Paeth => {
                for i in bpp..len {
                    current[i] = current[i].wrapping_add(current[i - bpp]);
                }
            }
            Avg => {
                for i in bpp..len {
                    current[i] = current[i].wrapping_add(current[i - bpp] / 2);
                }
            }
        }
        return;
    }

    match filter {
        NoFilter => (),
        Sub => {
            for i in bpp..len {
                current[i] = current[i].wrapping_add(current[i - bpp]);
            }
        }
        Up => {
            for i in 0..len {
                current[i] = current[i].wrapping_add(previous[i]);
            }
        }
        Avg => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(previous[i] / 2);
            }
            for i in bpp..len {
                let avg = (u16::from(current[i - bpp]) + u16::from(previous[i])) / 2;
                current[i] = current[i].wrapping_add(avg as u8);
            }
        }
        Paeth => {
            for i in 0..bpp {
                current[i] = current[i].wrapping_add(filter_paeth(0, previous[i], 0));
            }
            for i in bpp..len {
                current[i] = current[i].wrapping_add(filter_paeth(
                    current[i - bpp],
                    previous[i],
                    previous[i - bpp],
                ));
            }
        }
    }
}

/// Produces the filtered form of `current` into `output`.
///
/// `previous` must be the reconstructed prior scanline, all zeros for the
/// first scanline of a pass.
fn filter_line(
    method: FilterType,
    bpp: usize,
    previous: &[u8],
    current: &[u8],
    output: &mut [u8],
) {
    use self::FilterType::*;
    let len = current.len();
    debug_assert_eq!(previous.len(), len);
    debug_assert_eq!(output.len(), len);

    match method {
        NoFilter => output.copy_from_slice(current),
        Sub => {
            for i in 0..bpp.min(len) {
                output[i] = current[i];
            }
            for i in bpp..len {
                output[i] = current[i].wrapping_sub(current[i - bpp]);
            }
        }
        Up => {
            for i in 0..len {
                output[i] = current[i].wrapping_sub(previous[i]);
            }
        }
        Avg => {
            for i in 0..bpp.min(len) {
                output[i] = current[i].wrapping_sub(previous[i] / 2);
            }
            for i in bpp..len {
                let avg = (u16::from(current[i - bpp]) + u16::from(previous[i])) / 2;
                output[i] = current[i].wrapping_sub(avg as u8);
            }
        }
        Paeth => {
            for i in 0..bpp.min(len) {
                output[i] = current[i].wrapping_sub(filter_paeth(0, previous[i], 0));
            }
            for i in bpp..len {
                output[i] = current[i].wrapping_sub(filter_paeth(
                    current[i - bpp],
                    previous[i],
                    previous[i - bpp],
                ));
            }
        }
    }
}

/// Sum of absolute values of the line, each byte taken as a signed value.
///
/// The standard minimum-sum-of-absolute-differences heuristic for picking a
/// scanline filter.
fn sum_abs_deviations(line: &[u8]) -> u64 {
    line.iter()
        .map(|&b| u64::from((b as i8).unsigned_abs()))
        .sum()
}

const CANDIDATES: [FilterType; 5] = [
    FilterType::NoFilter,
    FilterType::Sub,
    FilterType::Up,
    FilterType::Avg,
    FilterType::Paeth,
];

/// Filters `current` in place and returns the filter type that was used.
///
/// With [`AdaptiveFilterType::Adaptive`] all five candidates are evaluated per
/// scanline; ties go to the earliest filter type.
pub(crate) fn filter(
    method: FilterType,
    adaptive: AdaptiveFilterType,
    bpp: BytesPerPixel,
    previous: &[u8],
    current: &mut [u8],
) -> FilterType {
    let bpp = bpp.into_usize();
    match adaptive {
        AdaptiveFilterType::NonAdaptive => {
            let mut output = vec![0; current.len()];
            filter_line(method, bpp, previous, current, &mut output);
            current.copy_from_slice(&output);
            method
        }
        AdaptiveFilterType::Adaptive => {
            let mut best = vec![0; current.len()];
            let mut best_method = FilterType::NoFilter;
            let mut best_cost = u64::MAX;
            let mut candidate = vec![0; current.len()];
            for &method in CANDIDATES.iter() {
                filter_line(method, bpp, previous, current, &mut candidate);
                let cost = sum_abs_deviations(&candidate);
                if cost < best_cost {
                    best_cost = cost;
                    best_method = method;
                    std::mem::swap(&mut best, &mut candidate);
                }
            }
            current.copy_from_slice(&best);
            best_method
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BytesPerPixel;

    fn roundtrip_line(method: FilterType, bpp: usize, previous: &[u8], line: &[u8]) {
        let mut filtered = vec![0; line.len()];
        filter_line(method, bpp, previous, line, &mut filtered);
        let bpp = BytesPerPixel::from_usize(bpp);
        unfilter(method, bpp, previous, &mut filtered);
        assert_eq!(&filtered, line, "filter type {:?}", method);
    }

    #[test]
    fn filters_invert() {
        let previous: Vec<u8> = (0..24).map(|i| (i * 7) as u8).collect();
        let line: Vec<u8> = (0..24).map(|i| (255 - i * 3) as u8).collect();
        for &method in CANDIDATES.iter() {
            for bpp in [1, 2, 3, 4, 6, 8] {
                roundtrip_line(method, bpp, &previous, &line);
            }
        }
    }

    #[test]
    fn first_line_uses_zero_previous() {
        let zeros = vec![0u8; 16];
        let line: Vec<u8> = (0..16).map(|i| (i * i) as u8).collect();
        for &method in CANDIDATES.iter() {
            let mut filtered = vec![0; line.len()];
            filter_line(method, 3, &zeros, &line, &mut filtered);
            // The decoder sees an empty previous slice for the first row.
            let mut reconstructed = filtered;
            unfilter(method, BytesPerPixel::Three, &[], &mut reconstructed);
            assert_eq!(reconstructed, line, "filter type {:?}", method);
        }
    }

    #[test]
    fn paeth_tie_breaks_toward_left() {
        // pa == pb == pc picks a, pb == pc picks b.
        assert_eq!(filter_paeth(1, 1, 1), 1);
        assert_eq!(filter_paeth(5, 10, 10), 5);
        assert_eq!(filter_paeth(10, 5, 10), 5);
    }

    #[test]
    fn adaptive_picks_minimal_sum() {
        // A constant line filters to all zeros under Sub and Up; NoFilter
        // keeps the large values. The heuristic must not keep NoFilter.
        let previous = vec![200u8; 12];
        let mut line = vec![200u8; 12];
        let chosen = filter(
            FilterType::NoFilter,
            AdaptiveFilterType::Adaptive,
            BytesPerPixel::Three,
            &previous,
            &mut line,
        );
        assert_ne!(chosen, FilterType::NoFilter);
        assert!(line.iter().all(|&b| b == 0));
    }
}
