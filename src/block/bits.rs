//! Bit-level helpers over byte buffers.
//!
//! Bits are numbered LSB first: bit `n` lives in bit `n % 8` of byte `n / 8`.
//! None of these functions check bounds beyond the slice indexing itself, so
//! an out-of-range offset panics. Callers validate offsets up front.

use core::fmt::Write;
use core::ops::Range;

/// Sets or clears a single bit.
///
/// # Example
/// ```
/// use register_blocks::block::bits::{get_bit, set_bit};
///
/// let mut buf = [0u8; 2];
/// set_bit(&mut buf, 9, true);
/// assert_eq!(buf, [0x00, 0x02]);
/// assert!(get_bit(&buf, 9));
/// ```
#[inline]
pub fn set_bit(buf: &mut [u8], bit_offset: usize, value: bool) {
    let byte = bit_offset / 8;
    let bit = bit_offset % 8;

    if value {
        buf[byte] |= 1 << bit;
    } else {
        buf[byte] &= !(1 << bit);
    }
}

/// Returns the value of a single bit.
#[inline]
pub fn get_bit(buf: &[u8], bit_offset: usize) -> bool {
    (buf[bit_offset / 8] >> (bit_offset % 8)) & 0x1 != 0
}

/// Copies `count` bits from `src` into `dst`, leaving all other `dst` bits untouched.
///
/// Works for any alignment of either offset.
///
/// # Example
/// ```
/// use register_blocks::block::bits::copy_bits;
///
/// let src = [0b0000_0101u8];
/// let mut dst = [0xF0u8, 0xFF];
/// copy_bits(&mut dst, 6, &src, 0, 3);
/// assert_eq!(dst, [0x70, 0xFF]);
/// ```
pub fn copy_bits(dst: &mut [u8], dst_offset: usize, src: &[u8], src_offset: usize, count: usize) {
    for i in 0..count {
        set_bit(dst, dst_offset + i, get_bit(src, src_offset + i));
    }
}

/// Returns true if any bit in `[bit_offset, bit_offset + count)` is set.
pub fn any_bits_set(buf: &[u8], bit_offset: usize, count: usize) -> bool {
    (bit_offset..bit_offset + count).any(|bit| get_bit(buf, bit))
}

/// Sets every bit in `[bit_offset, bit_offset + count)`.
pub fn set_bits(buf: &mut [u8], bit_offset: usize, count: usize) {
    for bit in bit_offset..bit_offset + count {
        set_bit(buf, bit, true);
    }
}

/// Clears every bit in `[bit_offset, bit_offset + count)`.
pub fn clear_bits(buf: &mut [u8], bit_offset: usize, count: usize) {
    for bit in bit_offset..bit_offset + count {
        set_bit(buf, bit, false);
    }
}

/// Compares `a` and `b` over the byte range, considering only bits set in `mask`.
pub fn masked_eq(a: &[u8], b: &[u8], mask: &[u8], range: Range<usize>) -> bool {
    range
        .into_iter()
        .all(|x| (a[x] & mask[x]) == (b[x] & mask[x]))
}

/// Returns the half-open byte span of all non-zero bytes, if any.
pub fn nonzero_span(buf: &[u8]) -> Option<Range<usize>> {
    let low = buf.iter().position(|b| *b != 0)?;
    let high = buf.iter().rposition(|b| *b != 0)?;
    Some(low..high + 1)
}

/// Widens a byte range to `granule` boundaries, clamped to `limit`.
///
/// The low edge rounds down and the length rounds up, so a partial-granule
/// access is never produced unless `limit` itself cuts the last granule.
///
/// # Example
/// ```
/// use register_blocks::block::bits::align_span;
///
/// assert_eq!(align_span(3..5, 4, 16), 0..8);
/// assert_eq!(align_span(4..8, 4, 16), 4..8);
/// assert_eq!(align_span(9..10, 8, 16), 8..16);
/// ```
pub fn align_span(range: Range<usize>, granule: usize, limit: usize) -> Range<usize> {
    let low = range.start - (range.start % granule);
    let len = (range.end - low).div_ceil(granule) * granule;
    low..(low + len).min(limit)
}

/// Renders a buffer as a single hex string for diagnostics, e.g. `0x5a0f0000`.
pub fn hex_dump(buf: &[u8]) -> String {
    let mut out = String::with_capacity(2 + buf.len() * 2);
    out.push_str("0x");
    for b in buf {
        let _ = write!(out, "{b:02x}");
    }
    out
}
