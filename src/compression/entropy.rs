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

    src/compression/entropy.rs

    Canonical prefix code decoding.

    The record preamble lists (symbol, code length) pairs. Codes are assigned
    canonically: ordered by length, then by symbol value, each code being the
    previous one plus one, shifted left whenever the length grows. Bits are
    consumed most significant bit first.
*/
use std::io::{Read, Seek};

use binrw::BinReaderExt;
use bit_vec::BitVec;

use crate::{compression::read_bytes, util::alloc_buffer, DiskImageError};

pub const MAX_CODE_LEN: usize = 16;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CodeTable {
    /// (symbol, code length) pairs in canonical order.
    entries: Vec<(u8, u8)>,
    /// Number of codes of each length.
    counts: [u16; MAX_CODE_LEN + 1],
}

impl CodeTable {
    /// Build a table from (symbol, code length) pairs, rejecting tables that cannot form a
    /// complete prefix code.
    pub fn new(pairs: &[(u8, u8)]) -> Result<CodeTable, DiskImageError> {
        if pairs.is_empty() {
            return Err(DiskImageError::FormatError("empty code table".to_string()));
        }

        let mut entries = pairs.to_vec();
        entries.sort_by_key(|&(symbol, len)| (len, symbol));

        let mut counts = [0u16; MAX_CODE_LEN + 1];
        let mut seen = [false; 256];
        for &(symbol, len) in &entries {
            if len == 0 || len as usize > MAX_CODE_LEN {
                return Err(DiskImageError::FormatError(format!(
                    "code length {} for symbol {:02X} out of range",
                    len, symbol
                )));
            }
            if seen[symbol as usize] {
                return Err(DiskImageError::FormatError(format!("symbol {:02X} listed twice", symbol)));
            }
            seen[symbol as usize] = true;
            counts[len as usize] += 1;
        }

        // Kraft sum, scaled so a complete code sums to exactly 2^16.
        let kraft: u32 = entries.iter().map(|&(_, len)| 1u32 << (MAX_CODE_LEN - len as usize)).sum();
        let single_symbol = entries.len() == 1 && entries[0].1 == 1;
        if kraft > 1 << MAX_CODE_LEN {
            return Err(DiskImageError::FormatError("oversubscribed code table".to_string()));
        }
        if kraft < 1 << MAX_CODE_LEN && !single_symbol {
            return Err(DiskImageError::FormatError("incomplete code table".to_string()));
        }

        Ok(CodeTable { entries, counts })
    }

    /// Read a table preamble: a u8 pair count (0 meaning 256) followed by the pairs.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<CodeTable, DiskImageError> {
        let n: u8 = reader.read_le()?;
        let n = if n == 0 { 256 } else { n as usize };
        let raw = read_bytes(reader, n * 2)?;
        let pairs: Vec<(u8, u8)> = raw.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        CodeTable::new(&pairs)
    }

    /// Serialize the table preamble.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.entries.len() * 2);
        out.push((self.entries.len() & 0xFF) as u8);
        for &(symbol, len) in &self.entries {
            out.push(symbol);
            out.push(len);
        }
        out
    }

    /// Return the canonical (code, length) for each symbol in the table.
    pub fn codes(&self) -> Vec<(u8, u16, u8)> {
        let mut codes = Vec::with_capacity(self.entries.len());
        let mut code: u32 = 0;
        let mut prev_len = 0u8;
        for &(symbol, len) in &self.entries {
            if prev_len != 0 {
                code += 1;
            }
            code <<= len - prev_len;
            codes.push((symbol, code as u16, len));
            prev_len = len;
        }
        codes
    }

    /// Decode exactly `expected_len` symbols from `payload`.
    pub fn decode(&self, payload: &[u8], expected_len: usize) -> Result<Vec<u8>, DiskImageError> {
        let bits = BitVec::from_bytes(payload);
        let mut out = alloc_buffer(expected_len)?;
        let mut bit_iter = bits.iter();

        while out.len() < expected_len {
            let mut code: i32 = 0;
            let mut first: i32 = 0;
            let mut index: usize = 0;
            let mut symbol = None;

            for len in 1..=MAX_CODE_LEN {
                let bit = bit_iter.next().ok_or_else(|| {
                    DiskImageError::FormatError(format!(
                        "entropy payload exhausted after {} of {} symbols",
                        out.len(),
                        expected_len
                    ))
                })?;
                code |= bit as i32;
                let count = self.counts[len] as i32;
                if code - first < count {
                    symbol = Some(self.entries[index + (code - first) as usize].0);
                    break;
                }
                index += count as usize;
                first = (first + count) << 1;
                code <<= 1;
            }

            match symbol {
                Some(s) => out.push(s),
                None => return Err(DiskImageError::FormatError("invalid prefix code in payload".to_string())),
            }
        }
        Ok(out)
    }

    /// Encode `data` with this table. Every byte of `data` must have a code.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<u8>, DiskImageError> {
        let mut lookup = [None; 256];
        for (symbol, code, len) in self.codes() {
            lookup[symbol as usize] = Some((code, len));
        }
        let mut bits = BitVec::new();
        for &b in data {
            let (code, len) = lookup[b as usize]
                .ok_or_else(|| DiskImageError::ArgumentError(format!("no code for symbol {:02X}", b)))?;
            for i in (0..len).rev() {
                bits.push((code >> i) & 1 == 1);
            }
        }
        Ok(bits.to_bytes())
    }
}

/// Encode `data` as a complete entropy record (type byte included) using `table`.
pub fn encode_record(table: &CodeTable, data: &[u8]) -> Result<Vec<u8>, DiskImageError> {
    let payload = table.encode(data)?;
    let payload_len = u16::try_from(payload.len())
        .map_err(|_| DiskImageError::ArgumentError(format!("payload of {} bytes too long", payload.len())))?;
    let mut out = vec![super::RECORD_ENTROPY];
    out.extend(table.to_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend(payload);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::decode_record;
    use std::io::Cursor;

    fn table() -> CodeTable {
        // A:1 bit, B:2 bits, C and D: 3 bits
        CodeTable::new(&[(b'C', 3), (b'A', 1), (b'D', 3), (b'B', 2)]).unwrap()
    }

    #[test]
    fn canonical_codes() {
        let codes = table().codes();
        assert_eq!(
            codes,
            vec![(b'A', 0b0, 1), (b'B', 0b10, 2), (b'C', 0b110, 3), (b'D', 0b111, 3)]
        );
    }

    #[test]
    fn decodes_msb_first() {
        // A B C D A -> 0 10 110 111 0 -> 0101_1011 1000_0000
        let decoded = table().decode(&[0b0101_1011, 0b1000_0000], 5).unwrap();
        assert_eq!(decoded, b"ABCDA".to_vec());
    }

    #[test]
    fn record_round_trip() {
        let data = b"ABBADDCAAB".repeat(20);
        let record = encode_record(&table(), &data).unwrap();
        assert_eq!(decode_record(&mut Cursor::new(&record), data.len()).unwrap(), data);
    }

    #[test]
    fn bad_tables_are_rejected() {
        assert!(CodeTable::new(&[(1, 1), (2, 1), (3, 1)]).is_err());
        assert!(CodeTable::new(&[(1, 1), (2, 2)]).is_err());
        assert!(CodeTable::new(&[(1, 0)]).is_err());
        assert!(CodeTable::new(&[(1, 17), (2, 1)]).is_err());
        assert!(CodeTable::new(&[(1, 1)]).is_ok());
    }

    #[test]
    fn exhausted_payload_is_format_error() {
        assert!(matches!(
            table().decode(&[0xFF], 4),
            Err(DiskImageError::FormatError(_))
        ));
    }
}
