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

    src/bitcodec/amiga.rs

    AmigaDOS trackdisk sectors. After two 0x4489 sync words each sector
    holds, in odd/even form:

        info long     format (0xFF), track, sector, sectors until gap
        label         16 bytes
        header sum    XOR of the info and label longs
        data sum      XOR of the data longs
        data          512 bytes

    Checksums are taken over the MFM longs with clock bits masked off.
*/
use bit_vec::BitVec;

use crate::bitcodec::{
    mfm::{decode_bytes, find_pattern, MfmWriter},
    odd_even::{decode_buf, encode_buf, join_u32, spread_u16, split_u32},
};

pub const AMIGA_SYNC: u32 = 0x4489_4489;
pub const AMIGA_SYNC_WORD: u16 = 0x4489;
pub const AMIGA_FORMAT_BYTE: u8 = 0xFF;
pub const AMIGA_SECTOR_SIZE: usize = 512;
pub const AMIGA_LABEL_SIZE: usize = 16;
/// Decoded bytes following the sync words.
pub const AMIGA_SECTOR_BYTES: usize = 4 + AMIGA_LABEL_SIZE + 4 + 4 + AMIGA_SECTOR_SIZE;
/// Decoded gap bytes written after the last sector of a track.
pub const AMIGA_GAP_BYTES: usize = 350;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AmigaSectorHeader {
    pub format: u8,
    pub track: u8,
    pub sector: u8,
    pub sectors_to_gap: u8,
}

impl AmigaSectorHeader {
    fn to_u32(self) -> u32 {
        u32::from_be_bytes([self.format, self.track, self.sector, self.sectors_to_gap])
    }

    fn from_u32(value: u32) -> Self {
        let [format, track, sector, sectors_to_gap] = value.to_be_bytes();
        AmigaSectorHeader {
            format,
            track,
            sector,
            sectors_to_gap,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AmigaSector {
    pub header: AmigaSectorHeader,
    pub label: [u8; AMIGA_LABEL_SIZE],
    pub data: Vec<u8>,
    pub header_ok: bool,
    pub data_ok: bool,
}

/// The trackdisk checksum of a run of odd/even encoded bytes. A trailing odd byte is ignored.
pub fn checksum(encoded: &[u8]) -> u32 {
    let (_, words, _) = bytemuck::pod_align_to::<u8, [u8; 2]>(encoded);
    let folded = words.iter().fold(0u16, |acc, w| acc ^ u16::from_be_bytes(*w));
    spread_u16(folded)
}

fn read_long(encoded: &[u8]) -> u32 {
    let odd = u16::from_be_bytes([encoded[0], encoded[1]]);
    let even = u16::from_be_bytes([encoded[2], encoded[3]]);
    join_u32(odd, even)
}

fn long_bytes(value: u32) -> [u8; 4] {
    let (odd, even) = split_u32(value);
    let [o0, o1] = odd.to_be_bytes();
    let [e0, e1] = even.to_be_bytes();
    [o0, o1, e0, e1]
}

fn parse_sector(encoded: &[u8]) -> AmigaSector {
    let header = AmigaSectorHeader::from_u32(read_long(&encoded[0..4]));

    let mut label = [0u8; AMIGA_LABEL_SIZE];
    decode_buf(&encoded[4..20], &mut label);

    let header_sum = read_long(&encoded[20..24]);
    let data_sum = read_long(&encoded[24..28]);

    let mut data = vec![0u8; AMIGA_SECTOR_SIZE];
    decode_buf(&encoded[28..AMIGA_SECTOR_BYTES], &mut data);

    AmigaSector {
        header,
        label,
        data,
        header_ok: checksum(&encoded[0..20]) == header_sum,
        data_ok: checksum(&encoded[28..AMIGA_SECTOR_BYTES]) == data_sum,
    }
}

/// Find and decode every AmigaDOS sector in a raw MFM track. `bit_len` limits the stream to the
/// recorded track length; 0 uses the whole buffer.
pub fn decode_track(raw: &[u8], bit_len: usize) -> Vec<AmigaSector> {
    let mut bits = BitVec::from_bytes(raw);
    if bit_len > 0 && bit_len < bits.len() {
        bits.truncate(bit_len);
    }

    let mut sectors = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_pattern(&bits, AMIGA_SYNC, pos) {
        let Some(encoded) = decode_bytes(&bits, start, AMIGA_SECTOR_BYTES)
        else {
            log::debug!("amiga::decode_track(): Sync at cell {} too close to track end", start);
            break;
        };
        let sector = parse_sector(&encoded);
        log::trace!(
            "amiga::decode_track(): {:?} header ok: {} data ok: {}",
            sector.header,
            sector.header_ok,
            sector.data_ok
        );
        sectors.push(sector);
        pos = start + AMIGA_SECTOR_BYTES * 16;
    }
    sectors
}

/// A sector to be written by [encode_track].
pub struct SectorSource<'a> {
    pub sector: u8,
    pub data: &'a [u8],
    /// Write a header checksum that does not match.
    pub bad_header: bool,
    /// Write a data checksum that does not match.
    pub bad_data: bool,
}

/// Encode a standard AmigaDOS track. Returns the raw MFM bytes and the track length in cells.
/// Every sector payload must be [AMIGA_SECTOR_SIZE] bytes.
pub fn encode_track(track: u8, sectors: &[SectorSource]) -> (Vec<u8>, usize) {
    let mut w = MfmWriter::new();
    let count = sectors.len();

    for (i, src) in sectors.iter().enumerate() {
        w.write_bytes(&[0x00, 0x00]);
        w.write_raw_u16(AMIGA_SYNC_WORD);
        w.write_raw_u16(AMIGA_SYNC_WORD);

        let header = AmigaSectorHeader {
            format: AMIGA_FORMAT_BYTE,
            track,
            sector: src.sector,
            sectors_to_gap: (count - i) as u8,
        };

        let mut encoded = Vec::with_capacity(AMIGA_SECTOR_BYTES);
        encoded.extend_from_slice(&long_bytes(header.to_u32()));
        let mut label = [0u8; AMIGA_LABEL_SIZE];
        encode_buf(&[0u8; AMIGA_LABEL_SIZE], &mut label);
        encoded.extend_from_slice(&label);

        let mut header_sum = checksum(&encoded[0..20]);
        if src.bad_header {
            header_sum ^= 1;
        }

        let mut data = vec![0u8; AMIGA_SECTOR_SIZE];
        encode_buf(src.data, &mut data);
        let mut data_sum = checksum(&data);
        if src.bad_data {
            data_sum ^= 1;
        }

        encoded.extend_from_slice(&long_bytes(header_sum));
        encoded.extend_from_slice(&long_bytes(data_sum));
        encoded.extend_from_slice(&data);
        w.write_bytes(&encoded);
    }

    w.write_bytes(&[0u8; AMIGA_GAP_BYTES]);
    let cells = w.len();
    (w.into_bytes(), cells)
}
