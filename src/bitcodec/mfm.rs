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

    src/bitcodec/mfm.rs

    MFM cell streams. Every data bit is recorded as a clock cell followed by
    a data cell. The clock cell is set only between two zero data bits.
*/
use bit_vec::BitVec;

/// Search `track` for a 32-cell pattern starting at or after `start`. Returns the index of the
/// cell following the pattern.
pub fn find_pattern(track: &BitVec, pattern: u32, start: usize) -> Option<usize> {
    let mut shift_reg: u32 = 0;
    for (i, bit) in track.iter().enumerate().skip(start) {
        shift_reg = (shift_reg << 1) | bit as u32;
        if i + 1 - start >= 32 && shift_reg == pattern {
            return Some(i + 1);
        }
    }
    None
}

/// Decode `byte_ct` bytes starting at cell `start`, which must be a clock cell. Returns `None` if
/// the stream ends first.
pub fn decode_bytes(track: &BitVec, start: usize, byte_ct: usize) -> Option<Vec<u8>> {
    if start + byte_ct * 16 > track.len() {
        return None;
    }
    let mut out = Vec::with_capacity(byte_ct);
    for b in 0..byte_ct {
        let base = start + b * 16;
        let mut byte = 0u8;
        for i in 0..8 {
            byte = (byte << 1) | track.get(base + i * 2 + 1).unwrap_or(false) as u8;
        }
        out.push(byte);
    }
    Some(out)
}

/// Builds an MFM cell stream, tracking the last data bit written so clocks are correct across
/// calls.
#[derive(Clone, Debug, Default)]
pub struct MfmWriter {
    bits: BitVec,
    prev: bool,
}

impl MfmWriter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Encode data bytes, MSB first.
    pub fn write_bytes(&mut self, data: &[u8]) {
        for &byte in data {
            for i in (0..8).rev() {
                let bit = byte & (1 << i) != 0;
                self.bits.push(!bit && !self.prev);
                self.bits.push(bit);
                self.prev = bit;
            }
        }
    }

    /// Append raw cells, such as a sync word with a missing clock.
    pub fn write_raw_u16(&mut self, cells: u16) {
        for i in (0..16).rev() {
            self.bits.push(cells & (1 << i) != 0);
        }
        self.prev = cells & 1 != 0;
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn into_bits(self) -> BitVec {
        self.bits
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bits.to_bytes()
    }
}
