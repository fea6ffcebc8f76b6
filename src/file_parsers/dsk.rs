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

    src/file_parsers/dsk.rs

    Amstrad CPC / Spectrum +3 DSK images, in both the original CPCEMU layout
    (every track block the same size) and the EXTENDED layout (a per-track
    size table). Sector status is carried as raw uPD765 ST1/ST2 bytes.

    Images are always saved in the EXTENDED layout.
*/
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    chs::{DiskCh, DiskChsn},
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::{Geometry, TrackDescriptor},
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::{SectorStatus, WeakBitRun},
    util::{alloc_buffer, fixed_str, slice_at, to_fixed_str},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
};

pub const DSK_SIGNATURE: &[u8] = b"MV - CPC";
pub const EDSK_SIGNATURE: &[u8] = b"EXTENDED CPC DSK File";
pub const EDSK_DISK_INFO: &[u8; 34] = b"EXTENDED CPC DSK File\r\nDisk-Info\r\n";
pub const TRACK_INFO_SIGNATURE: &[u8] = b"Track-Info";
pub const TRACK_INFO_MARKER: &[u8; 12] = b"Track-Info\r\n";

pub const DISK_INFO_SIZE: usize = 256;
pub const TRACK_INFO_SIZE: usize = 256;
pub const SECTOR_INFO_SIZE: usize = 8;
pub const MAX_TRACK_ENTRIES: usize = 204;
pub const MAX_SECTORS_PER_TRACK: usize = 29;

pub const ST1_MISSING_AM: u8 = 0x01;
pub const ST1_DATA_ERROR: u8 = 0x20;
pub const ST2_MISSING_DAM: u8 = 0x01;
pub const ST2_DATA_CRC: u8 = 0x20;
pub const ST2_CONTROL_MARK: u8 = 0x40;

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct DskDiskInfo {
    signature: [u8; 34],
    creator: [u8; 14],
    tracks: u8,
    sides: u8,
    track_size: u16,
    track_sizes: [u8; MAX_TRACK_ENTRIES],
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct DskTrackInfo {
    signature: [u8; 12],
    unused: [u8; 4],
    track: u8,
    side: u8,
    rate: u8,
    mode: u8,
    size_code: u8,
    sector_ct: u8,
    gap3: u8,
    filler: u8,
}

#[derive(Debug)]
#[binrw]
#[brw(little)]
struct DskSectorInfo {
    c: u8,
    h: u8,
    r: u8,
    n: u8,
    st1: u8,
    st2: u8,
    data_len: u16,
}

impl DskSectorInfo {
    fn status(&self) -> SectorStatus {
        let data_crc = self.st2 & ST2_DATA_CRC != 0;
        SectorStatus {
            deleted_mark: self.st2 & ST2_CONTROL_MARK != 0,
            // ST1 DE without ST2 DD means the error was in the ID field.
            address_crc_error: self.st1 & ST1_DATA_ERROR != 0 && !data_crc,
            data_crc_error: data_crc,
            missing_data: self.st1 & ST1_MISSING_AM != 0 || self.st2 & ST2_MISSING_DAM != 0,
        }
    }

    fn from_status(status: &SectorStatus) -> (u8, u8) {
        let mut st1 = 0;
        let mut st2 = 0;
        if status.address_crc_error || status.data_crc_error {
            st1 |= ST1_DATA_ERROR;
        }
        if status.data_crc_error {
            st2 |= ST2_DATA_CRC;
        }
        if status.deleted_mark {
            st2 |= ST2_CONTROL_MARK;
        }
        if status.missing_data {
            st1 |= ST1_MISSING_AM;
            st2 |= ST2_MISSING_DAM;
        }
        (st1, st2)
    }
}

fn dsk_rate(rate: u8) -> DiskDataRate {
    match rate {
        2 => DiskDataRate::Rate500Kbps,
        3 => DiskDataRate::Rate1000Kbps,
        _ => DiskDataRate::Rate250Kbps,
    }
}

fn dsk_rate_byte(rate: DiskDataRate) -> u8 {
    match DiskDensity::from(rate) {
        DiskDensity::Standard | DiskDensity::Double => 1,
        DiskDensity::High => 2,
        DiskDensity::Extended => 3,
    }
}

fn dsk_encoding(mode: u8) -> DiskDataEncoding {
    match mode {
        1 => DiskDataEncoding::Fm,
        _ => DiskDataEncoding::Mfm,
    }
}

/// Collapse the bytes that differ between stored copies of a sector into byte-aligned weak runs,
/// relative to the start of the sector.
fn weak_runs_from_copies(stored: &[u8], size: usize) -> Vec<WeakBitRun> {
    let copies: Vec<&[u8]> = stored.chunks_exact(size).collect();
    let mut runs = Vec::new();
    let mut start = None;
    for i in 0..size {
        let differs = copies.iter().any(|c| c[i] != copies[0][i]);
        match (differs, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                runs.push(WeakBitRun::from_bytes(s, i - s));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push(WeakBitRun::from_bytes(s, size - s));
    }
    runs
}

#[derive(Clone, Debug, Default)]
pub struct DskFormat;

impl DskFormat {
    fn read_track(
        data: &[u8],
        desc: &TrackDescriptor,
        extended: bool,
    ) -> Result<Option<TrackRecord>, DiskImageError> {
        let end = desc.end(data.len())?;
        let block = &data[desc.offset..end];

        if block.len() < TRACK_INFO_SIZE || !block.starts_with(TRACK_INFO_SIGNATURE) {
            log::warn!(
                "Dsk::read_track(): Track {} at {:#X} has no Track-Info block; treating as unformatted",
                desc.ch,
                desc.offset
            );
            return Ok(None);
        }

        let mut cursor = Cursor::new(block);
        let info = DskTrackInfo::read(&mut cursor)?;
        if info.track as u16 != desc.ch.c() || info.side != desc.ch.h() {
            log::debug!(
                "Dsk::read_track(): Track-Info claims {}:{}, expected {}",
                info.track,
                info.side,
                desc.ch
            );
        }

        let sector_ct = info.sector_ct as usize;
        let listed = sector_ct.min((block.len() - 0x18) / SECTOR_INFO_SIZE);
        let truncated = listed < sector_ct;
        if truncated {
            log::warn!(
                "Dsk::read_track(): Track {} claims {} sectors but its block holds {} entries; data is unreliable",
                desc.ch,
                sector_ct,
                listed
            );
        }
        // Sector info entries past the block header push the data start to the next 256 bytes.
        let header_len = 0x18 + sector_ct * SECTOR_INFO_SIZE;
        let mut data_offset = header_len.div_ceil(TRACK_INFO_SIZE) * TRACK_INFO_SIZE;

        let mut track = TrackRecord::new(desc.ch, dsk_encoding(info.mode), dsk_rate(info.rate));
        let mut weak_runs = Vec::new();

        for _ in 0..listed {
            let sib = DskSectorInfo::read(&mut cursor)?;
            let declared = DiskChsn::n_to_bytes(sib.n.min(6));
            let stored = if extended { sib.data_len as usize } else { declared };
            let mut status = sib.status();
            let id = DiskChsn::new(sib.c as u16, sib.h, sib.r, sib.n);

            let payload = if stored == 0 || truncated {
                status.missing_data = true;
                status.data_crc_error |= truncated;
                vec![0; declared]
            }
            else if data_offset + stored > block.len() {
                log::warn!(
                    "Dsk::read_track(): Sector {} data at {:#X}+{:#X} runs past its track block; zero filling",
                    id,
                    data_offset,
                    stored
                );
                status.missing_data = true;
                vec![0; declared.min(stored)]
            }
            else {
                let raw = &block[data_offset..data_offset + stored];
                if stored > declared && stored % declared == 0 {
                    log::debug!(
                        "Dsk::read_track(): Sector {} stores {} copies; treating differences as weak bits",
                        id,
                        stored / declared
                    );
                    let bit_offset = track.bit_len();
                    weak_runs.extend(
                        weak_runs_from_copies(raw, declared)
                            .into_iter()
                            .map(|r| WeakBitRun::new(r.bit_offset + bit_offset, r.bit_len)),
                    );
                    raw[..declared].to_vec()
                }
                else {
                    raw.to_vec()
                }
            };

            data_offset += stored;
            track.add_sector(SectorRecord::new(id, payload).with_status(status));
        }

        for run in weak_runs {
            track.add_weak_run(run)?;
        }
        Ok(Some(track))
    }
}

impl FormatParser for DskFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::CpcDskImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["dsk", "edsk"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_VARIABLE_SPT
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_ADDRESS_CRC
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_SID_OVERRIDE
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_TRACK_DATA_RATE
            | FormatCaps::CAP_NO_DAM
    }

    fn detect(&self, data: &[u8]) -> bool {
        data.len() >= DISK_INFO_SIZE && (data.starts_with(DSK_SIGNATURE) || data.starts_with(EDSK_SIGNATURE))
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let header = slice_at(data, 0, DISK_INFO_SIZE, "DSK disk info block")?;
        let extended = header.starts_with(EDSK_SIGNATURE);
        if !extended && !header.starts_with(DSK_SIGNATURE) {
            return Err(DiskImageError::UnknownFormat);
        }

        let info = DskDiskInfo::read(&mut Cursor::new(header))?;
        let tracks = info.tracks as usize;
        let sides = info.sides as usize;
        log::trace!(
            "Dsk::load(): {} image, {} tracks, {} sides",
            if extended { "Extended" } else { "Standard" },
            tracks,
            sides
        );
        if sides == 0 || sides > 2 {
            return Err(DiskImageError::FormatError(format!("unsupported side count {}", sides)));
        }
        if extended && tracks * sides > MAX_TRACK_ENTRIES {
            return Err(DiskImageError::FormatError(format!(
                "{} track entries do not fit the size table",
                tracks * sides
            )));
        }

        // Build the track table once, then read each track from it.
        let mut table = Vec::with_capacity(tracks * sides);
        let mut offset = DISK_INFO_SIZE;
        for i in 0..tracks * sides {
            let ch = DiskCh::new((i / sides) as u16, (i % sides) as u8);
            let size = if extended {
                info.track_sizes[i] as usize * 256
            }
            else {
                info.track_size as usize
            };
            if size == 0 {
                log::trace!("Dsk::load(): Track {} is unformatted", ch);
                continue;
            }
            table.push(TrackDescriptor::new(ch, offset, Some(size), 0));
            offset += size;
        }

        let mut disk_image = DiskImage::new();
        disk_image.set_source_format(DiskImageFileFormat::CpcDskImage);
        disk_image.info.creator = fixed_str(&info.creator);

        for desc in &table {
            if let Some(track) = Self::read_track(data, desc, extended)? {
                disk_image.add_track(track)?;
            }
        }

        disk_image.info.density = disk_image.tracks().first().map(|t| DiskDensity::from(t.data_rate));
        Ok(disk_image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let geom = image.geometry();
        if geom.heads > 2
            || geom.cylinders as usize * geom.heads.max(1) as usize > MAX_TRACK_ENTRIES
            || image.tracks().iter().any(|t| t.sectors.len() > MAX_SECTORS_PER_TRACK)
            || image
                .tracks()
                .iter()
                .flat_map(|t| t.sectors.iter())
                .any(|s| s.data.len() > u16::MAX as usize)
        {
            return ParserWriteCompatibility::Incompatible;
        }
        let caps = self.capabilities();
        if image.tracks().iter().any(|t| t.metadata().is_lossy_for(caps)) {
            ParserWriteCompatibility::DataLoss
        }
        else {
            ParserWriteCompatibility::Ok
        }
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        if matches!(self.can_write(image), ParserWriteCompatibility::Incompatible) {
            log::error!("Dsk::save(): Image layout cannot be expressed as an extended DSK");
            return Err(DiskImageError::IncompatibleImage);
        }

        let geom = image.geometry();
        let sides = geom.heads.max(1) as usize;
        let tracks = geom.cylinders as usize;

        let mut track_sizes = [0u8; MAX_TRACK_ENTRIES];
        let mut blocks = Vec::with_capacity(tracks * sides);
        for i in 0..tracks * sides {
            let ch = DiskCh::new((i / sides) as u16, (i % sides) as u8);
            let Some(track) = image.track(ch)
            else {
                continue;
            };

            let mut block = alloc_buffer(TRACK_INFO_SIZE + track.bit_len() / 8)?;
            let mut cursor = Cursor::new(&mut block);
            let first_n = track.sectors.first().map(|s| s.id.n()).unwrap_or(2);
            DskTrackInfo {
                signature: *TRACK_INFO_MARKER,
                unused: [0; 4],
                track: ch.c() as u8,
                side: ch.h(),
                rate: dsk_rate_byte(track.data_rate),
                mode: if track.encoding == DiskDataEncoding::Fm { 1 } else { 2 },
                size_code: first_n,
                sector_ct: track.sectors.len() as u8,
                gap3: 0x4E,
                filler: 0xE5,
            }
            .write(&mut cursor)?;

            for sector in &track.sectors {
                let (st1, st2) = DskSectorInfo::from_status(&sector.status);
                DskSectorInfo {
                    c: sector.id.c() as u8,
                    h: sector.id.h(),
                    r: sector.id.s(),
                    n: sector.id.n(),
                    st1,
                    st2,
                    data_len: if sector.status.missing_data { 0 } else { sector.data.len() as u16 },
                }
                .write(&mut cursor)?;
            }

            block.resize(TRACK_INFO_SIZE, 0);
            for sector in track.sectors.iter().filter(|s| !s.status.missing_data) {
                block.extend_from_slice(&sector.data);
            }
            let padded = block.len().div_ceil(256) * 256;
            block.resize(padded, 0);

            let units = padded / 256;
            if units > u8::MAX as usize {
                log::error!("Dsk::save(): Track {} is too large ({} bytes)", ch, padded);
                return Err(DiskImageError::IncompatibleImage);
            }
            track_sizes[i] = units as u8;
            blocks.push(block);
        }

        let total = DISK_INFO_SIZE + blocks.iter().map(|b| b.len()).sum::<usize>();
        let mut out = alloc_buffer(total)?;
        DskDiskInfo {
            signature: *EDSK_DISK_INFO,
            creator: to_fixed_str::<14>(Some("fluxvault")),
            tracks: tracks as u8,
            sides: sides as u8,
            track_size: 0,
            track_sizes,
        }
        .write(&mut Cursor::new(&mut out))?;
        for block in blocks {
            out.extend_from_slice(&block);
        }
        Ok(out)
    }
}
