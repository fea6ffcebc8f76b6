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

    src/compression/mod.rs

    Decoders for compressed sector records. A packed track is a sequence of
    records, one per sector, each introduced by a type byte:

        0x00  stored       the sector bytes follow verbatim
        0x01  run-length   u16 count, u8 pattern length, pattern
        0x02  entropy      code length table, u16 payload length, payload

    Every record must decode to exactly the length the sector declares.
*/
pub mod entropy;
pub mod rle;

use std::io::{Cursor, Read, Seek};

use binrw::BinReaderExt;

use crate::DiskImageError;

pub use entropy::CodeTable;

pub const RECORD_STORED: u8 = 0x00;
pub const RECORD_RUN_LENGTH: u8 = 0x01;
pub const RECORD_ENTROPY: u8 = 0x02;

/// One compressed sector record, parsed but not yet expanded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompressedRecord {
    Stored(Vec<u8>),
    /// `count` repetitions of `pattern`.
    RunLength { count: usize, pattern: Vec<u8> },
    /// Canonical prefix coded symbols.
    Entropy { table: CodeTable, payload: Vec<u8> },
}

/// Read exactly `len` bytes, treating a short read as a corrupt record rather than an I/O failure.
pub(crate) fn read_bytes<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>, DiskImageError> {
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).map_err(|e| match e.kind() {
        std::io::ErrorKind::UnexpectedEof => {
            DiskImageError::FormatError(format!("record truncated: wanted {} bytes", len))
        }
        _ => DiskImageError::IoError(e.to_string()),
    })?;
    Ok(buf)
}

impl CompressedRecord {
    /// Parse one record. `stored_len` is the length of a stored record, which carries no length
    /// of its own.
    pub fn read<R: Read + Seek>(reader: &mut R, stored_len: usize) -> Result<CompressedRecord, DiskImageError> {
        let record_type: u8 = reader.read_le()?;
        match record_type {
            RECORD_STORED => Ok(CompressedRecord::Stored(read_bytes(reader, stored_len)?)),
            RECORD_RUN_LENGTH => {
                let count: u16 = reader.read_le()?;
                let pattern_len: u8 = reader.read_le()?;
                if pattern_len == 0 {
                    return Err(DiskImageError::FormatError("run-length record with empty pattern".to_string()));
                }
                let pattern = read_bytes(reader, pattern_len as usize)?;
                Ok(CompressedRecord::RunLength {
                    count: count as usize,
                    pattern,
                })
            }
            RECORD_ENTROPY => {
                let table = CodeTable::read(reader)?;
                let payload_len: u16 = reader.read_le()?;
                let payload = read_bytes(reader, payload_len as usize)?;
                Ok(CompressedRecord::Entropy { table, payload })
            }
            other => Err(DiskImageError::FormatError(format!(
                "unknown compressed record type {:02X}",
                other
            ))),
        }
    }

    /// Expand the record. The result must be exactly `expected_len` bytes long.
    pub fn expand(&self, expected_len: usize) -> Result<Vec<u8>, DiskImageError> {
        let data = match self {
            CompressedRecord::Stored(data) => data.clone(),
            CompressedRecord::RunLength { count, pattern } => rle::expand(*count, pattern)?,
            CompressedRecord::Entropy { table, payload } => table.decode(payload, expected_len)?,
        };
        if data.len() != expected_len {
            return Err(DiskImageError::FormatError(format!(
                "record expands to {} bytes, sector declares {}",
                data.len(),
                expected_len
            )));
        }
        Ok(data)
    }
}

/// Decode one record from `reader` into a buffer of exactly `expected_len` bytes.
pub fn decode_record<R: Read + Seek>(reader: &mut R, expected_len: usize) -> Result<Vec<u8>, DiskImageError> {
    CompressedRecord::read(reader, expected_len)?.expand(expected_len)
}

fn record_error(index: usize, e: DiskImageError) -> DiskImageError {
    match e {
        DiskImageError::FormatError(msg) => DiskImageError::FormatError(format!("sector record {}: {}", index, msg)),
        other => other,
    }
}

/// Decode a packed track: one record per entry of `sector_lengths`, in order.
///
/// A corrupt record fails the whole track with a format error. Callers decoding a multi-track
/// image can report that track and carry on with the rest.
pub fn decode_track(bytes: &[u8], sector_lengths: &[usize]) -> Result<Vec<Vec<u8>>, DiskImageError> {
    let mut cursor = Cursor::new(bytes);
    let mut records = Vec::with_capacity(sector_lengths.len());
    for (i, &len) in sector_lengths.iter().enumerate() {
        let record = CompressedRecord::read(&mut cursor, len).map_err(|e| {
            log::warn!("decode_track(): record {} at {:#X} failed: {}", i, cursor.position(), e);
            record_error(i, e)
        })?;
        records.push(record);
    }
    let trailing = bytes.len() as u64 - cursor.position();
    if trailing > 0 {
        log::debug!("decode_track(): {} trailing bytes after last record", trailing);
    }
    expand_track(&records, sector_lengths)
}

/// Expand a track's records that a container has already framed itself. Failure semantics match
/// [`decode_track`].
pub fn expand_track(records: &[CompressedRecord], sector_lengths: &[usize]) -> Result<Vec<Vec<u8>>, DiskImageError> {
    if records.len() != sector_lengths.len() {
        return Err(DiskImageError::FormatError(format!(
            "{} records for {} sectors",
            records.len(),
            sector_lengths.len()
        )));
    }
    records
        .iter()
        .zip(sector_lengths)
        .enumerate()
        .map(|(i, (record, &len))| {
            record.expand(len).map_err(|e| {
                log::warn!("expand_track(): record {} failed: {}", i, e);
                record_error(i, e)
            })
        })
        .collect()
}

/// Encode `data` as a stored record.
pub fn encode_stored(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 1);
    out.push(RECORD_STORED);
    out.extend_from_slice(data);
    out
}

/// Encode `count` repetitions of `pattern` as a run-length record.
pub fn encode_run_length(count: u16, pattern: &[u8]) -> Result<Vec<u8>, DiskImageError> {
    if pattern.is_empty() || pattern.len() > 255 {
        return Err(DiskImageError::ArgumentError(format!(
            "run-length pattern of {} bytes",
            pattern.len()
        )));
    }
    let mut out = Vec::with_capacity(pattern.len() + 4);
    out.push(RECORD_RUN_LENGTH);
    out.extend_from_slice(&count.to_le_bytes());
    out.push(pattern.len() as u8);
    out.extend_from_slice(pattern);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_fill() {
        let record = encode_run_length(50, &[0xE5]).unwrap();
        let data = decode_record(&mut Cursor::new(&record), 50).unwrap();
        assert_eq!(data, vec![0xE5; 50]);
    }

    #[test]
    fn run_length_wrong_size_is_rejected() {
        let record = encode_run_length(50, &[0xE5]).unwrap();
        assert!(matches!(
            decode_record(&mut Cursor::new(&record), 128),
            Err(DiskImageError::FormatError(_))
        ));
    }

    #[test]
    fn multi_byte_pattern() {
        let record = encode_run_length(4, &[0xDE, 0xAD]).unwrap();
        let data = decode_record(&mut Cursor::new(&record), 8).unwrap();
        assert_eq!(data, vec![0xDE, 0xAD, 0xDE, 0xAD, 0xDE, 0xAD, 0xDE, 0xAD]);
    }

    #[test]
    fn track_of_mixed_records() {
        let mut track = encode_stored(&[1, 2, 3, 4]);
        track.extend(encode_run_length(4, &[9]).unwrap());
        let sectors = decode_track(&track, &[4, 4]).unwrap();
        assert_eq!(sectors, vec![vec![1, 2, 3, 4], vec![9, 9, 9, 9]]);
    }

    #[test]
    fn truncated_track_is_format_error() {
        let track = encode_stored(&[1, 2, 3, 4]);
        assert!(matches!(decode_track(&track, &[4, 4]), Err(DiskImageError::FormatError(_))));
        assert!(matches!(decode_track(&track[..3], &[4]), Err(DiskImageError::FormatError(_))));
    }

    #[test]
    fn framed_records_expand_per_track() {
        let records = vec![
            CompressedRecord::Stored(vec![7; 4]),
            CompressedRecord::RunLength {
                count: 2,
                pattern: vec![1, 2],
            },
        ];
        assert_eq!(
            expand_track(&records, &[4, 4]).unwrap(),
            vec![vec![7; 4], vec![1, 2, 1, 2]]
        );
        let err = expand_track(&records, &[4, 8]).unwrap_err();
        assert!(matches!(err, DiskImageError::FormatError(msg) if msg.starts_with("sector record 1")));
        assert!(expand_track(&records[..1], &[4, 4]).is_err());
    }

    #[test]
    fn unknown_record_type() {
        assert!(matches!(
            decode_track(&[0x7F, 0, 0], &[2]),
            Err(DiskImageError::FormatError(_))
        ));
    }
}
