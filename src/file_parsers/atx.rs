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

    src/file_parsers/atx.rs

    Atari 8-bit ATX (VAPI) images.

    ATX records each track as it was found on the original disk: sectors in
    physical order with their angular position, FDC status, weak byte ranges
    and optionally extended (non-standard) sizes. It is the only Atari format
    that can carry protection evidence.

    Layout:
        48-byte "AT8X" file header
        track records, each:
            32-byte record header (size, type, track, sector count, flags)
            chunks of [size u32, type u8, sector index u8, data u16] + payload
            a zero-sized terminating chunk

    A weak chunk's data field is the first weak byte of its sector. Without a
    payload the range extends to the end of the sector; a 2-byte payload gives
    its length. One chunk is written per weak range.
*/
use std::io::{Cursor, Write};

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    chs::{DiskCh, DiskChsn},
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::Geometry,
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::{SectorStatus, Timing, WeakBitRun, WeakBits},
    util::{alloc_buffer, slice_at},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
};

pub const ATX_HEADER_SIZE: usize = 48;
pub const ATX_TRACK_HEADER_SIZE: usize = 32;
pub const ATX_CHUNK_HEADER_SIZE: usize = 8;
pub const ATX_SECTOR_ENTRY_SIZE: usize = 8;
pub const ATX_WEAK_LENGTH_SIZE: usize = 2;

/// Angular positions are recorded in 8µs units; one revolution at 288 RPM.
pub const ATX_REVOLUTION_UNITS: u16 = 26042;

pub const ATX_RECORD_TRACK: u16 = 0x0000;

pub const ATX_CHUNK_DATA: u8 = 0x00;
pub const ATX_CHUNK_SECTOR_LIST: u8 = 0x01;
pub const ATX_CHUNK_WEAK: u8 = 0x10;
pub const ATX_CHUNK_EXTENDED: u8 = 0x11;

pub const ATX_STATUS_CRC: u8 = 0x08;
pub const ATX_STATUS_MISSING: u8 = 0x10;
pub const ATX_STATUS_DELETED: u8 = 0x20;
pub const ATX_STATUS_EXTENDED: u8 = 0x40;

pub const ATX_TRACK_FLAG_MFM: u32 = 0x0002;

pub const ATX_DENSITY_SD: u8 = 0;
pub const ATX_DENSITY_ED: u8 = 1;
pub const ATX_DENSITY_DD: u8 = 2;

#[derive(Debug, Default)]
#[binrw]
#[brw(little, magic = b"AT8X")]
pub struct AtxHeader {
    pub version: u16,
    pub min_version: u16,
    pub creator: u16,
    pub creator_version: u16,
    pub flags: u32,
    pub image_type: u16,
    pub density: u8,
    reserved0: u8,
    pub image_id: u32,
    pub image_version: u16,
    reserved1: u16,
    pub start: u32,
    pub end: u32,
    reserved2: [u8; 12],
}

#[derive(Debug, Default)]
#[binrw]
#[brw(little)]
pub struct AtxTrackHeader {
    pub size: u32,
    pub record_type: u16,
    reserved0: u16,
    pub track_number: u8,
    reserved1: u8,
    pub sector_count: u16,
    pub rate: u16,
    reserved2: u16,
    pub flags: u32,
    pub header_size: u32,
    reserved3: [u8; 8],
}

#[derive(Debug, Default)]
#[binrw]
#[brw(little)]
pub struct AtxChunkHeader {
    pub size: u32,
    pub chunk_type: u8,
    pub sector_index: u8,
    pub data: u16,
}

#[derive(Debug, Default, Clone, Copy)]
#[binrw]
#[brw(little)]
pub struct AtxSectorEntry {
    pub number: u8,
    pub status: u8,
    pub position: u16,
    pub start_data: u32,
}

fn atx_density_params(density: u8) -> (DiskDataEncoding, DiskDataRate, usize, u32) {
    match density {
        ATX_DENSITY_ED => (DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps, 128, 2000),
        ATX_DENSITY_DD => (DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps, 256, 2000),
        _ => (DiskDataEncoding::Fm, DiskDataRate::Rate125Kbps, 128, 4000),
    }
}

fn atx_status(status: u8) -> SectorStatus {
    SectorStatus {
        deleted_mark: status & ATX_STATUS_DELETED != 0,
        address_crc_error: false,
        data_crc_error: status & ATX_STATUS_CRC != 0,
        missing_data: status & ATX_STATUS_MISSING != 0,
    }
}

fn atx_status_byte(status: &SectorStatus, extended: bool) -> u8 {
    let mut byte = 0;
    if status.has_bad_crc() {
        byte |= ATX_STATUS_CRC;
    }
    if status.missing_data {
        byte |= ATX_STATUS_MISSING;
    }
    if status.deleted_mark {
        byte |= ATX_STATUS_DELETED;
    }
    if extended {
        byte |= ATX_STATUS_EXTENDED;
    }
    byte
}

/// Working state for one track while its chunks are read.
struct AtxTrackParse {
    entries: Vec<AtxSectorEntry>,
    /// Sector index, byte offset and optional byte length of each weak range.
    weak_ranges: Vec<(usize, usize, Option<usize>)>,
    extended_sizes: Vec<(usize, usize)>,
}

#[derive(Clone, Debug, Default)]
pub struct AtxFormat;

impl AtxFormat {
    fn read_track(
        data: &[u8],
        offset: usize,
        header: &AtxTrackHeader,
        density: u8,
    ) -> Result<TrackRecord, DiskImageError> {
        let (encoding, rate, default_size, nanos) = atx_density_params(density);
        let record_end = offset + header.size as usize;

        let mut parse = AtxTrackParse {
            entries: Vec::with_capacity(header.sector_count as usize),
            weak_ranges: Vec::new(),
            extended_sizes: Vec::new(),
        };

        let mut chunk_offset = offset + header.header_size as usize;
        loop {
            if chunk_offset + ATX_CHUNK_HEADER_SIZE > record_end {
                log::warn!(
                    "Atx::read_track(): track {} chunk list runs past record end",
                    header.track_number
                );
                break;
            }
            let mut cursor = Cursor::new(data);
            cursor.set_position(chunk_offset as u64);
            let chunk = AtxChunkHeader::read(&mut cursor)?;
            if chunk.size == 0 {
                break;
            }
            log::trace!("Atx::read_track(): chunk {:?} @ {:X}", chunk, chunk_offset);

            match chunk.chunk_type {
                ATX_CHUNK_SECTOR_LIST => {
                    let chunk_end = (chunk_offset + chunk.size as usize).min(record_end);
                    let room = chunk_end.saturating_sub(chunk_offset + ATX_CHUNK_HEADER_SIZE) / ATX_SECTOR_ENTRY_SIZE;
                    let listed = (header.sector_count as usize).min(room);
                    if listed < header.sector_count as usize {
                        log::warn!(
                            "Atx::read_track(): track {} lists {} sectors but its chunk holds {}",
                            header.track_number,
                            header.sector_count,
                            listed
                        );
                    }
                    for i in 0..listed {
                        let entry_offset = chunk_offset + ATX_CHUNK_HEADER_SIZE + i * ATX_SECTOR_ENTRY_SIZE;
                        cursor.set_position(entry_offset as u64);
                        parse.entries.push(AtxSectorEntry::read(&mut cursor)?);
                    }
                }
                ATX_CHUNK_WEAK => {
                    let len_offset = chunk_offset + ATX_CHUNK_HEADER_SIZE;
                    let len = if chunk.size as usize >= ATX_CHUNK_HEADER_SIZE + ATX_WEAK_LENGTH_SIZE
                        && len_offset + ATX_WEAK_LENGTH_SIZE <= record_end
                    {
                        Some(u16::from_le_bytes([data[len_offset], data[len_offset + 1]]) as usize)
                    }
                    else {
                        None
                    };
                    parse
                        .weak_ranges
                        .push((chunk.sector_index as usize, chunk.data as usize, len));
                }
                ATX_CHUNK_EXTENDED => {
                    let size = 128usize << (chunk.data & 0x03);
                    parse.extended_sizes.push((chunk.sector_index as usize, size));
                }
                ATX_CHUNK_DATA => {
                    // Sector payloads are located through the sector list.
                }
                other => {
                    log::warn!("Atx::read_track(): ignoring unknown chunk type {:02X}", other);
                }
            }
            chunk_offset += chunk.size as usize;
        }

        let mut track = TrackRecord::new(DiskCh::new(header.track_number as u16, 0), encoding, rate);
        track.timing = Timing::BitCell { nanos };

        for (i, entry) in parse.entries.iter().enumerate() {
            let size = parse
                .extended_sizes
                .iter()
                .find(|(idx, _)| *idx == i)
                .map(|(_, size)| *size)
                .unwrap_or(default_size);
            let mut status = atx_status(entry.status);

            let payload = if status.missing_data {
                vec![0u8; size]
            }
            else {
                match slice_at(data, offset + entry.start_data as usize, size, "ATX sector data") {
                    Ok(bytes) if offset + entry.start_data as usize + size <= record_end => bytes.to_vec(),
                    _ => {
                        log::warn!(
                            "Atx::read_track(): track {} sector {} data out of bounds; marking missing",
                            header.track_number,
                            entry.number
                        );
                        status.missing_data = true;
                        vec![0u8; size]
                    }
                }
            };

            let id = DiskChsn::new(header.track_number as u16, 0, entry.number, DiskChsn::bytes_to_n(size));
            track.add_sector(
                SectorRecord::new(id, payload)
                    .with_status(status)
                    .with_position(Some(entry.position)),
            );
        }

        let mut runs: Vec<WeakBitRun> = Vec::new();
        for (index, byte_offset, byte_len) in parse.weak_ranges {
            let Some(sector) = track.sectors.get(index)
            else {
                log::warn!("Atx::read_track(): weak chunk names missing sector index {}", index);
                continue;
            };
            if byte_offset >= sector.data.len() {
                log::warn!(
                    "Atx::read_track(): weak offset {} beyond sector of {} bytes",
                    byte_offset,
                    sector.data.len()
                );
                continue;
            }
            let to_end = sector.data.len() - byte_offset;
            let len = byte_len.map_or(to_end, |len| len.min(to_end));
            if len == 0 {
                continue;
            }
            let start = track.sector_bit_offset(index) / 8 + byte_offset;
            runs.push(WeakBitRun::from_bytes(start, len));
        }
        if !runs.is_empty() {
            runs.sort_by_key(|r| r.bit_offset);
            // Ranges split at sector boundaries on write rejoin here.
            let mut merged: Vec<WeakBitRun> = Vec::with_capacity(runs.len());
            for run in runs {
                match merged.last_mut() {
                    Some(last) if last.end() >= run.bit_offset => {
                        last.bit_len = last.bit_len.max(run.end() - last.bit_offset);
                    }
                    _ => merged.push(run),
                }
            }
            track.set_weak_bits(WeakBits::Runs(merged))?;
        }

        Ok(track)
    }

    fn image_density(image: &DiskImage) -> u8 {
        let geometry = image.geometry();
        if image.info.density == Some(DiskDensity::Standard) {
            ATX_DENSITY_SD
        }
        else if geometry.sector_size >= 256 {
            ATX_DENSITY_DD
        }
        else if geometry.sectors_per_track > 18 {
            ATX_DENSITY_ED
        }
        else {
            ATX_DENSITY_SD
        }
    }

    fn write_track(track: &TrackRecord, density: u8, out: &mut Vec<u8>) -> Result<(), DiskImageError> {
        let (_, _, default_size, _) = atx_density_params(density);
        let n = track.sectors.len();

        let list_size = ATX_CHUNK_HEADER_SIZE + n * ATX_SECTOR_ENTRY_SIZE;
        let data_size: usize = track
            .sectors
            .iter()
            .filter(|s| !s.status.missing_data)
            .map(|s| s.data.len())
            .sum();
        let data_start = ATX_TRACK_HEADER_SIZE + list_size + ATX_CHUNK_HEADER_SIZE;

        let mut entries = Vec::with_capacity(n);
        let mut weak_chunks = Vec::new();
        let mut ext_chunks = Vec::new();
        let mut cursor_data = data_start;

        for (i, sector) in track.sectors.iter().enumerate() {
            let extended = sector.data.len() != default_size;
            if extended {
                let code = match sector.data.len() {
                    128 => 0,
                    256 => 1,
                    512 => 2,
                    1024 => 3,
                    other => {
                        log::error!("Atx::write_track(): cannot store {} byte sector", other);
                        return Err(DiskImageError::IncompatibleImage);
                    }
                };
                ext_chunks.push(AtxChunkHeader {
                    size: ATX_CHUNK_HEADER_SIZE as u32,
                    chunk_type: ATX_CHUNK_EXTENDED,
                    sector_index: i as u8,
                    data: code,
                });
            }

            for run in track.sector_weak_bits(i).runs() {
                let first_byte = run.bit_offset / 8;
                let byte_len = run.end().div_ceil(8) - first_byte;
                weak_chunks.push((
                    AtxChunkHeader {
                        size: (ATX_CHUNK_HEADER_SIZE + ATX_WEAK_LENGTH_SIZE) as u32,
                        chunk_type: ATX_CHUNK_WEAK,
                        sector_index: i as u8,
                        data: first_byte as u16,
                    },
                    byte_len as u16,
                ));
            }

            let position = sector
                .position
                .unwrap_or((i * ATX_REVOLUTION_UNITS as usize / n.max(1)) as u16);
            entries.push(AtxSectorEntry {
                number: sector.id.s(),
                status: atx_status_byte(&sector.status, extended),
                position,
                start_data: cursor_data as u32,
            });
            if !sector.status.missing_data {
                cursor_data += sector.data.len();
            }
        }

        let record_size = data_start
            + data_size
            + weak_chunks.len() * (ATX_CHUNK_HEADER_SIZE + ATX_WEAK_LENGTH_SIZE)
            + ext_chunks.len() * ATX_CHUNK_HEADER_SIZE
            + ATX_CHUNK_HEADER_SIZE;

        let mut flags = 0;
        if track.encoding == DiskDataEncoding::Mfm {
            flags |= ATX_TRACK_FLAG_MFM;
        }

        let mut cursor = Cursor::new(Vec::with_capacity(record_size));
        AtxTrackHeader {
            size: record_size as u32,
            record_type: ATX_RECORD_TRACK,
            track_number: track.ch.c() as u8,
            sector_count: n as u16,
            flags,
            header_size: ATX_TRACK_HEADER_SIZE as u32,
            ..Default::default()
        }
        .write(&mut cursor)?;

        AtxChunkHeader {
            size: list_size as u32,
            chunk_type: ATX_CHUNK_SECTOR_LIST,
            sector_index: 0,
            data: 0,
        }
        .write(&mut cursor)?;
        for entry in &entries {
            entry.write(&mut cursor)?;
        }

        AtxChunkHeader {
            size: (ATX_CHUNK_HEADER_SIZE + data_size) as u32,
            chunk_type: ATX_CHUNK_DATA,
            sector_index: 0,
            data: 0,
        }
        .write(&mut cursor)?;
        for sector in track.sectors.iter().filter(|s| !s.status.missing_data) {
            cursor.write_all(&sector.data)?;
        }

        for (chunk, byte_len) in &weak_chunks {
            chunk.write(&mut cursor)?;
            cursor.write_all(&byte_len.to_le_bytes())?;
        }
        for chunk in &ext_chunks {
            chunk.write(&mut cursor)?;
        }
        AtxChunkHeader::default().write(&mut cursor)?;

        out.extend_from_slice(&cursor.into_inner());
        Ok(())
    }
}

impl FormatParser for AtxFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::AtxImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["atx"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_VARIABLE_SPT
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_SID_OVERRIDE
            | FormatCaps::CAP_WEAK_BITS
            | FormatCaps::CAP_TIMING
            | FormatCaps::CAP_NO_DAM
    }

    fn detect(&self, data: &[u8]) -> bool {
        data.len() >= ATX_HEADER_SIZE && &data[0..4] == b"AT8X"
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let mut cursor = Cursor::new(data);
        let header = AtxHeader::read(&mut cursor)?;
        log::debug!(
            "Atx::load(): version {:04X} creator {:04X}/{:04X} density {}",
            header.version,
            header.creator,
            header.creator_version,
            header.density
        );

        let end = (header.end as usize).min(data.len());
        if (header.end as usize) > data.len() {
            log::warn!(
                "Atx::load(): header end offset {:X} beyond image size {:X}",
                header.end,
                data.len()
            );
        }

        let mut image = DiskImage::new();
        image.set_source_format(DiskImageFileFormat::AtxImage);
        image.info.creator = Some(format!(
            "ATX creator {:#06X} version {:#06X}",
            header.creator, header.creator_version
        ));
        image.info.density = Some(match header.density {
            ATX_DENSITY_SD => DiskDensity::Standard,
            _ => DiskDensity::Double,
        });

        let mut offset = header.start as usize;
        while offset + ATX_TRACK_HEADER_SIZE <= end {
            cursor.set_position(offset as u64);
            let track_header = AtxTrackHeader::read(&mut cursor)?;
            log::trace!("Atx::load(): track header {:?} @ {:X}", track_header, offset);
            if track_header.size == 0 {
                return Err(DiskImageError::FormatError(format!(
                    "zero-sized ATX record at {:#X}",
                    offset
                )));
            }
            if offset + track_header.size as usize > data.len() {
                return Err(DiskImageError::FormatError(format!(
                    "ATX record at {:#X} of {} bytes exceeds image size",
                    offset, track_header.size
                )));
            }

            if track_header.record_type == ATX_RECORD_TRACK {
                let track = Self::read_track(data, offset, &track_header, header.density)?;
                image.add_track(track)?;
            }
            else {
                log::debug!("Atx::load(): skipping record type {:04X}", track_header.record_type);
            }
            offset += track_header.size as usize;
        }

        Ok(image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let fits = image.tracks().iter().all(|t| {
            t.ch.h() == 0
                && t.ch.c() < 256
                && t.sectors.len() < 256
                && t.sectors.iter().all(|s| matches!(s.data.len(), 128 | 256 | 512 | 1024))
        });
        if !fits || image.track_ct() == 0 {
            return ParserWriteCompatibility::Incompatible;
        }
        // Weak ranges are stored with byte granularity.
        let unaligned_weak = image
            .tracks()
            .iter()
            .flat_map(|t| t.weak_bits().runs())
            .any(|r| r.bit_offset % 8 != 0 || r.bit_len % 8 != 0);
        if unaligned_weak || image.tracks().iter().any(|t| t.metadata().is_lossy_for(self.capabilities())) {
            ParserWriteCompatibility::DataLoss
        }
        else {
            ParserWriteCompatibility::Ok
        }
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        if matches!(self.can_write(image), ParserWriteCompatibility::Incompatible) {
            log::error!("Atx::save(): image layout cannot be stored as ATX");
            return Err(DiskImageError::IncompatibleImage);
        }
        let density = Self::image_density(image);

        let mut tracks = Vec::new();
        for track in image.tracks() {
            Self::write_track(track, density, &mut tracks)?;
        }

        let mut out = alloc_buffer(ATX_HEADER_SIZE + tracks.len())?;
        let mut cursor = Cursor::new(&mut out);
        AtxHeader {
            version: 1,
            min_version: 1,
            density,
            start: ATX_HEADER_SIZE as u32,
            end: (ATX_HEADER_SIZE + tracks.len()) as u32,
            ..Default::default()
        }
        .write(&mut cursor)?;
        out.extend_from_slice(&tracks);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chs::DiskChs;

    fn weak_track_image() -> DiskImage {
        let mut image = DiskImage::new();
        image.info.density = Some(DiskDensity::Standard);
        for c in 0..2u16 {
            let mut track = TrackRecord::new(DiskCh::new(c, 0), DiskDataEncoding::Fm, DiskDataRate::Rate125Kbps);
            track.timing = Timing::BitCell { nanos: 4000 };
            for s in 1..=18u8 {
                let sector = SectorRecord::new(DiskChsn::new(c, 0, s, 0), vec![s; 128]).with_position(Some(s as u16 * 1000));
                track.add_sector(sector);
            }
            if c == 1 {
                // Sector 5 bytes 100..128 are weak.
                track.add_weak_run(WeakBitRun::from_bytes(4 * 128 + 100, 28)).unwrap();
                track.sectors[2].status.data_crc_error = true;
            }
            image.add_track(track).unwrap();
        }
        image
    }

    #[test]
    fn weak_bits_survive_save_and_load() {
        let image = weak_track_image();
        let atx = AtxFormat.save(&image).unwrap();
        assert!(AtxFormat.detect(&atx));

        let loaded = AtxFormat.load(&atx, None).unwrap();
        assert_eq!(loaded.track_ct(), 2);
        let meta = loaded.track_metadata(DiskCh::new(1, 0)).unwrap();
        assert!(meta.has_weak_bits());
        assert!(meta.has_timing());
        assert_eq!(meta.bad_crc_sectors, 1);
        assert_eq!(meta.weak_bits, WeakBits::Runs(vec![WeakBitRun::from_bytes(612, 28)]));

        let mut buf = [0u8; 128];
        let (_, sector_meta) = loaded.read_sector(DiskChs::new(1, 0, 5), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 5));
        assert_eq!(sector_meta.weak_bits, WeakBits::Runs(vec![WeakBitRun::from_bytes(100, 28)]));
        assert_eq!(sector_meta.position, Some(5000));
        assert_eq!(sector_meta.timing, Timing::BitCell { nanos: 4000 });

        assert!(!loaded.track_metadata(DiskCh::new(0, 0)).unwrap().has_weak_bits());
    }

    #[test]
    fn weak_runs_stay_within_track() {
        let image = AtxFormat.load(&AtxFormat.save(&weak_track_image()).unwrap(), None).unwrap();
        for track in image.tracks() {
            for run in track.weak_bits().runs() {
                assert!(run.end() <= track.bit_len());
            }
        }
    }

    #[test]
    fn missing_sector_is_zero_filled() {
        let mut image = weak_track_image();
        let track = image.track_mut(DiskCh::new(0, 0)).unwrap();
        track.sectors[0].status.missing_data = true;
        let loaded = AtxFormat.load(&AtxFormat.save(&image).unwrap(), None).unwrap();

        let mut buf = [0xFFu8; 128];
        let (_, meta) = loaded.read_sector(DiskChs::new(0, 0, 1), &mut buf).unwrap();
        assert!(meta.status.missing_data);
        assert!(buf.iter().all(|&b| b == 0));
        // Later sectors are unaffected by the skipped payload.
        loaded.read_sector(DiskChs::new(0, 0, 2), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 2));
    }

    #[test]
    fn every_weak_range_keeps_its_extent() {
        let mut image = weak_track_image();
        let mut track = TrackRecord::new(DiskCh::new(5, 0), DiskDataEncoding::Fm, DiskDataRate::Rate125Kbps);
        for s in 1..=18u8 {
            track.add_sector(SectorRecord::new(DiskChsn::new(5, 0, s, 0), vec![s; 128]));
        }
        track.add_weak_run(WeakBitRun::from_bytes(4 * 128 + 100, 10)).unwrap();
        track.add_weak_run(WeakBitRun::from_bytes(6 * 128 + 10, 4)).unwrap();
        track.add_weak_run(WeakBitRun::from_bytes(6 * 128 + 50, 4)).unwrap();
        let expected = track.weak_bits().clone();
        image.add_track(track).unwrap();

        assert_eq!(AtxFormat.can_write(&image), ParserWriteCompatibility::Ok);
        let loaded = AtxFormat.load(&AtxFormat.save(&image).unwrap(), None).unwrap();
        let track = loaded.track(DiskCh::new(5, 0)).unwrap();
        assert_eq!(track.weak_bits(), &expected);
        assert_eq!(
            track.sector_weak_bits(6),
            WeakBits::Runs(vec![WeakBitRun::from_bytes(10, 4), WeakBitRun::from_bytes(50, 4)])
        );
    }

    #[test]
    fn weak_range_across_sectors_rejoins() {
        let mut image = weak_track_image();
        let track = image.track_mut(DiskCh::new(0, 0)).unwrap();
        track.add_weak_run(WeakBitRun::from_bytes(120, 16)).unwrap();
        let loaded = AtxFormat.load(&AtxFormat.save(&image).unwrap(), None).unwrap();
        assert_eq!(
            loaded.track(DiskCh::new(0, 0)).unwrap().weak_bits(),
            &WeakBits::Runs(vec![WeakBitRun::from_bytes(120, 16)])
        );
    }

    #[test]
    fn weak_chunk_without_length_runs_to_sector_end() {
        let mut atx = AtxFormat.save(&weak_track_image()).unwrap();
        // Drop the length payload of the only weak chunk on track 1.
        let weak = atx
            .windows(6)
            .position(|w| w == [10, 0, 0, 0, ATX_CHUNK_WEAK, 4])
            .unwrap();
        atx[weak] = ATX_CHUNK_HEADER_SIZE as u8;
        atx[weak + 8] = 0;
        atx[weak + 9] = 0;

        let loaded = AtxFormat.load(&atx, None).unwrap();
        let track = loaded.track(DiskCh::new(1, 0)).unwrap();
        assert_eq!(track.weak_bits(), &WeakBits::Runs(vec![WeakBitRun::from_bytes(612, 28)]));
    }

    #[test]
    fn unaligned_weak_bits_are_lossy() {
        let mut image = weak_track_image();
        let track = image.track_mut(DiskCh::new(0, 0)).unwrap();
        track.add_weak_run(WeakBitRun::new(3, 9)).unwrap();
        assert_eq!(AtxFormat.can_write(&image), ParserWriteCompatibility::DataLoss);
    }

    #[test]
    fn short_sector_list_is_clamped() {
        let mut atx = AtxFormat.save(&weak_track_image()).unwrap();
        // First track record: claim more sectors than its list chunk holds.
        let count_offset = ATX_HEADER_SIZE + 10;
        atx[count_offset..count_offset + 2].copy_from_slice(&200u16.to_le_bytes());

        let loaded = AtxFormat.load(&atx, None).unwrap();
        let track = loaded.track(DiskCh::new(0, 0)).unwrap();
        assert_eq!(track.sectors.len(), 18);
        assert_eq!(track.sectors[17].data, vec![18; 128]);
    }

    #[test]
    fn truncated_record_is_format_error() {
        let mut atx = AtxFormat.save(&weak_track_image()).unwrap();
        let len = atx.len();
        atx.truncate(len - 200);
        assert!(matches!(AtxFormat.load(&atx, None), Err(DiskImageError::FormatError(_))));
    }
}
