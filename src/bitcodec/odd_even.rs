/*
    fluxvault

    Copyright 2024 The fluxvault Authors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    src/bitcodec/odd_even.rs

    Odd/even bit interleaving.

    A block of N data bits is recorded as two halves of N/2 bits: first
    every odd bit (bits 31, 29, .. 1 of a long), then every even bit (bits
    30, 28, .. 0). The helpers here work on data bits that have already been
    separated from their MFM clocks, so a 32-bit value is carried by 16 odd
    bits and 16 even bits, i.e. two bytes of each.
*/

/// Spread the low 16 bits of `x` into the even bit positions of a u32.
pub fn spread_u16(x: u16) -> u32 {
    let mut v = x as u32;
    v = (v | (v << 8)) & 0x00FF_00FF;
    v = (v | (v << 4)) & 0x0F0F_0F0F;
    v = (v | (v << 2)) & 0x3333_3333;
    v = (v | (v << 1)) & 0x5555_5555;
    v
}

/// Gather the even bit positions of `x` into a u16. The inverse of [spread_u16].
pub fn gather_u16(x: u32) -> u16 {
    let mut v = x & 0x5555_5555;
    v = (v | (v >> 1)) & 0x3333_3333;
    v = (v | (v >> 2)) & 0x0F0F_0F0F;
    v = (v | (v >> 4)) & 0x00FF_00FF;
    v = (v | (v >> 8)) & 0x0000_FFFF;
    v as u16
}

/// Join 16 odd bits and 16 even bits into a u32.
pub fn join_u32(odd: u16, even: u16) -> u32 {
    (spread_u16(odd) << 1) | spread_u16(even)
}

/// Split a u32 into its 16 odd bits and 16 even bits.
pub fn split_u32(value: u32) -> (u16, u16) {
    (gather_u16(value >> 1), gather_u16(value))
}

/// Join one odd byte and one even byte into the two data bytes they carry.
pub fn join_u8_pair(odd: u8, even: u8) -> (u8, u8) {
    let word = (spread_u16(odd as u16) << 1) | spread_u16(even as u16);
    ((word >> 8) as u8, word as u8)
}

/// Split two data bytes into one byte of odd bits and one byte of even bits.
pub fn split_u8_pair(hi: u8, lo: u8) -> (u8, u8) {
    let word = ((hi as u32) << 8) | lo as u32;
    (gather_u16(word >> 1) as u8, gather_u16(word) as u8)
}

/// Decode a block stored as an odd half followed by an even half. `src` and `dst` must be the same
/// length, which must be even.
pub fn decode_buf(src: &[u8], dst: &mut [u8]) {
    let (odds, evens) = src.split_at(src.len() / 2);
    for ((&o, &e), pair) in odds.iter().zip(evens).zip(dst.chunks_exact_mut(2)) {
        (pair[0], pair[1]) = join_u8_pair(o, e);
    }
}

/// Encode a block as an odd half followed by an even half. The inverse of [decode_buf].
pub fn encode_buf(src: &[u8], dst: &mut [u8]) {
    let (odds, evens) = dst.split_at_mut(src.len() / 2);
    for ((o, e), pair) in odds.iter_mut().zip(evens.iter_mut()).zip(src.chunks_exact(2)) {
        (*o, *e) = split_u8_pair(pair[0], pair[1]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_pairs() {
        assert_eq!(join_u8_pair(0x00, 0xFF), (0x55, 0x55));
        assert_eq!(join_u8_pair(0xFF, 0x00), (0xAA, 0xAA));
        assert_eq!(split_u8_pair(0x55, 0x55), (0x00, 0xFF));
        assert_eq!(split_u8_pair(0xAA, 0xAA), (0xFF, 0x00));
    }

    #[test]
    fn u32_split_and_join() {
        let value = 0xFF00_000Bu32;
        let (odd, even) = split_u32(value);
        assert_eq!((odd, even), (0xF003, 0xF001));
        assert_eq!(join_u32(odd, even), value);
    }

    #[test]
    fn buffers() {
        let mut src = vec![0u8; 256];
        src.extend(vec![0xFFu8; 256]);
        let mut decoded = vec![0u8; 512];
        decode_buf(&src, &mut decoded);
        assert_eq!(decoded, vec![0x55u8; 512]);

        let mut encoded = vec![0u8; 512];
        encode_buf(&decoded, &mut encoded);
        assert_eq!(encoded, src);
    }
}
