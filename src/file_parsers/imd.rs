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

    src/file_parsers/imd.rs

    ImageDisk (IMD) images. An ASCII header and comment terminated by 0x1A,
    followed by one record per track:

        mode, cylinder, head (+0x80 cylinder map, +0x40 head map),
        sector count, size code (0xFF: a u16 size table follows the maps),
        sector numbering map, optional cylinder and head maps, then one
        data record per sector.

    Data records 0x02, 0x04, 0x06 and 0x08 are single byte fills. Images are
    always written with uncompressed records.
*/
use std::{
    io::{Cursor, Read, Seek, Write},
    sync::OnceLock,
};

use binrw::{binrw, BinRead, BinReaderExt, BinWrite};
use regex::Regex;

use crate::{
    chs::{DiskCh, DiskChsn},
    compression::{self, read_bytes, CompressedRecord},
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::Geometry,
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::SectorStatus,
    util::{alloc_buffer, read_ascii},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
    ASCII_EOF,
};

pub const IMD_HEADER_REX: &str = r"(?s)IMD (?<v_major>\d)\.(?<v_minor>\d{2}): (?<day>\d{2})/(?<month>\d{2})/(?<year>\d{4}) (?<hh>\d{2}):(?<mm>\d{2}):(?<ss>\d{2})(?<comment>.*)?";

pub const IMD_SIZE_TABLE: u8 = 0xFF;

fn imd_header_regex() -> Option<&'static Regex> {
    static REX: OnceLock<Option<Regex>> = OnceLock::new();
    REX.get_or_init(|| Regex::new(IMD_HEADER_REX).ok()).as_ref()
}

#[derive(Debug, Default)]
#[binrw]
pub struct ImdTrack {
    pub mode: u8,
    c: u8,
    h: u8,
    sector_ct: u8,
    sector_size: u8,
}

impl ImdTrack {
    pub fn c(&self) -> u8 {
        self.c
    }
    pub fn h(&self) -> u8 {
        self.h & 0x0F
    }
    pub fn is_valid(&self) -> bool {
        self.mode < 6 && (self.h & !0xC0) < 2 && (self.sector_size < 7 || self.sector_size == IMD_SIZE_TABLE)
    }
    pub fn has_head_map(&self) -> bool {
        self.h & 0x40 != 0
    }
    pub fn has_cylinder_map(&self) -> bool {
        self.h & 0x80 != 0
    }
    pub fn has_sector_size_map(&self) -> bool {
        self.sector_size == IMD_SIZE_TABLE
    }
    pub fn sector_size(&self) -> Option<usize> {
        imd_sector_size_to_usize(self.sector_size)
    }
}

fn imd_mode_to_rate(data_rate: u8) -> Option<(DiskDataRate, DiskDataEncoding)> {
    match data_rate {
        0 => Some((DiskDataRate::Rate500Kbps, DiskDataEncoding::Fm)),
        1 => Some((DiskDataRate::Rate300Kbps, DiskDataEncoding::Fm)),
        2 => Some((DiskDataRate::Rate250Kbps, DiskDataEncoding::Fm)),
        3 => Some((DiskDataRate::Rate500Kbps, DiskDataEncoding::Mfm)),
        4 => Some((DiskDataRate::Rate300Kbps, DiskDataEncoding::Mfm)),
        5 => Some((DiskDataRate::Rate250Kbps, DiskDataEncoding::Mfm)),
        _ => None,
    }
}

fn imd_rate_to_mode(rate: DiskDataRate, encoding: DiskDataEncoding) -> u8 {
    match (rate, encoding) {
        (DiskDataRate::Rate500Kbps, DiskDataEncoding::Fm) => 0,
        (DiskDataRate::Rate300Kbps, DiskDataEncoding::Fm) => 1,
        (DiskDataRate::Rate250Kbps, DiskDataEncoding::Fm) => 2,
        (DiskDataRate::Rate500Kbps, _) => 3,
        (DiskDataRate::Rate300Kbps, _) => 4,
        (DiskDataRate::Rate250Kbps, _) => 5,
        (other, DiskDataEncoding::Fm) => {
            log::warn!("imd_rate_to_mode(): no IMD mode for FM at {}; using 250Kbps", other);
            2
        }
        (other, _) => {
            log::warn!("imd_rate_to_mode(): no IMD mode for MFM at {}; using 250Kbps", other);
            5
        }
    }
}

fn imd_sector_size_to_usize(sector_size: u8) -> Option<usize> {
    match sector_size {
        0..=6 => Some(128usize << sector_size),
        _ => None,
    }
}

/// One IMD data record, framed but not yet expanded.
pub struct ImdSectorData {
    record: Option<CompressedRecord>,
    deleted: bool,
    error: bool,
}

impl ImdSectorData {
    fn status(&self) -> SectorStatus {
        SectorStatus {
            deleted_mark: self.deleted,
            data_crc_error: self.error,
            missing_data: self.record.is_none(),
            ..Default::default()
        }
    }
}

/// A track header with its maps resolved into sector ids and sizes.
struct ImdTrackLayout {
    ch: DiskCh,
    encoding: DiskDataEncoding,
    data_rate: DiskDataRate,
    ids: Vec<DiskChsn>,
    sizes: Vec<usize>,
}

#[derive(Clone, Debug, Default)]
pub struct ImdFormat;

impl ImdFormat {
    fn read_data<R: Read + std::io::Seek>(
        data_marker: u8,
        sector_size: usize,
        read_buf: &mut R,
    ) -> Result<ImdSectorData, DiskImageError> {
        let (deleted, error) = match data_marker {
            0x00 => {
                // Sector data unavailable.
                return Ok(ImdSectorData {
                    record: None,
                    deleted: false,
                    error: false,
                });
            }
            0x01 | 0x02 => (false, false),
            0x03 | 0x04 => (true, false),
            0x05 | 0x06 => (false, true),
            0x07 | 0x08 => (true, true),
            _ => {
                return Err(DiskImageError::FormatError(format!(
                    "invalid IMD sector record type {:02X}",
                    data_marker
                )))
            }
        };

        let record = if data_marker % 2 == 1 {
            CompressedRecord::Stored(read_bytes(read_buf, sector_size)?)
        }
        else {
            // A single byte follows, repeated sector_size times.
            let fill: u8 = read_buf.read_le()?;
            CompressedRecord::RunLength {
                count: sector_size,
                pattern: vec![fill],
            }
        };

        Ok(ImdSectorData {
            record: Some(record),
            deleted,
            error,
        })
    }

    fn record_type(status: &SectorStatus) -> u8 {
        if status.missing_data {
            return 0x00;
        }
        let mut record = 0x01;
        if status.deleted_mark {
            record += 2;
        }
        if status.has_bad_crc() {
            record += 4;
        }
        record
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%d/%m/%Y %H:%M:%S").to_string()
    }

    fn read_layout<R: Read + Seek>(read_buf: &mut R, header_offset: u64) -> Result<ImdTrackLayout, DiskImageError> {
        let track_header = ImdTrack::read_le(read_buf)?;
        log::trace!("Imd::load(): Track header: {:?} @ {:X}", &track_header, header_offset);
        if !track_header.is_valid() {
            log::error!("Imd::load(): Invalid track header at offset {:X}", header_offset);
            return Err(DiskImageError::FormatError(format!(
                "invalid IMD track header at {:#X}",
                header_offset
            )));
        }

        let sector_ct = track_header.sector_ct as usize;
        let sector_numbers = read_bytes(read_buf, sector_ct)?;
        let cylinder_map = if track_header.has_cylinder_map() {
            read_bytes(read_buf, sector_ct)?
        }
        else {
            vec![track_header.c(); sector_ct]
        };
        let head_map = if track_header.has_head_map() {
            read_bytes(read_buf, sector_ct)?
        }
        else {
            vec![track_header.h(); sector_ct]
        };

        let sizes: Vec<usize> = if track_header.has_sector_size_map() {
            let raw = read_bytes(read_buf, sector_ct * 2)?;
            raw.chunks_exact(2)
                .map(|s| u16::from_le_bytes([s[0], s[1]]) as usize)
                .collect()
        }
        else {
            let size = track_header.sector_size().ok_or_else(|| {
                DiskImageError::FormatError(format!("invalid IMD size code {}", track_header.sector_size))
            })?;
            vec![size; sector_ct]
        };

        log::trace!(
            "Imd::load(): Track sector numbers: {:?} Cyl map: {:?} Head map: {:?}",
            &sector_numbers,
            &cylinder_map,
            &head_map
        );

        let (data_rate, encoding) = imd_mode_to_rate(track_header.mode)
            .ok_or_else(|| DiskImageError::FormatError(format!("invalid IMD mode {}", track_header.mode)))?;

        let ids = (0..sector_ct)
            .map(|s| {
                DiskChsn::new(
                    cylinder_map[s] as u16,
                    head_map[s],
                    sector_numbers[s],
                    DiskChsn::bytes_to_n(sizes[s]),
                )
            })
            .collect();

        Ok(ImdTrackLayout {
            ch: DiskCh::new(track_header.c() as u16, track_header.h()),
            encoding,
            data_rate,
            ids,
            sizes,
        })
    }

    /// Read and expand one track's data records. The flag is false when a record could not be
    /// framed, leaving the stream position unusable for the following track.
    fn read_track<R: Read + Seek>(layout: ImdTrackLayout, read_buf: &mut R) -> (TrackRecord, bool) {
        let mut records = Vec::with_capacity(layout.ids.len());
        let mut intact = true;
        for (id, &size) in layout.ids.iter().zip(&layout.sizes) {
            let framed = read_buf
                .read_le::<u8>()
                .map_err(DiskImageError::from)
                .and_then(|marker| Self::read_data(marker, size, &mut *read_buf));
            match framed {
                Ok(record) => records.push(record),
                Err(e) => {
                    log::warn!("Imd::load(): Track {} sector {}: {}", layout.ch, id, e);
                    intact = false;
                    break;
                }
            }
        }

        let (packed, lengths): (Vec<CompressedRecord>, Vec<usize>) = records
            .iter()
            .zip(&layout.sizes)
            .filter_map(|(r, &size)| r.record.clone().map(|record| (record, size)))
            .unzip();
        let mut expanded = match compression::expand_track(&packed, &lengths) {
            Ok(sectors) => Some(sectors.into_iter()),
            Err(e) => {
                log::warn!("Imd::load(): Track {} records do not expand: {}", layout.ch, e);
                None
            }
        };

        let mut track = TrackRecord::new(layout.ch, layout.encoding, layout.data_rate);
        for (s, (&id, &size)) in layout.ids.iter().zip(&layout.sizes).enumerate() {
            let unreadable = SectorStatus {
                missing_data: true,
                data_crc_error: true,
                ..Default::default()
            };
            let (data, status) = match records.get(s) {
                Some(record) if record.record.is_none() => (vec![0; size], record.status()),
                Some(record) => match expanded.as_mut().and_then(Iterator::next) {
                    Some(data) => (data, record.status()),
                    None => (vec![0; size], unreadable),
                },
                None => (vec![0; size], unreadable),
            };
            log::trace!("Imd::load(): Sector {}: status {:?}", id, status);
            track.add_sector(SectorRecord::new(id, data).with_status(status));
        }
        (track, intact)
    }

    fn cylinder_u8(c: u16) -> Result<u8, DiskImageError> {
        u8::try_from(c).map_err(|_| {
            log::error!("Imd::save(): cylinder {} does not fit an IMD track record", c);
            DiskImageError::IncompatibleImage
        })
    }
}

impl FormatParser for ImdFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::ImageDisk
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["imd"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_VARIABLE_SPT
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_SID_OVERRIDE
            | FormatCaps::CAP_COMMENT
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_TRACK_DATA_RATE
            | FormatCaps::CAP_NO_DAM
    }

    fn detect(&self, data: &[u8]) -> bool {
        if !data.starts_with(b"IMD ") {
            return false;
        }
        let (header, _, _) = read_ascii(data, Some(64));
        match (header, imd_header_regex()) {
            (Some(header), Some(rex)) => rex.is_match(&header),
            _ => false,
        }
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let mut disk_image = DiskImage::new();
        disk_image.set_source_format(DiskImageFileFormat::ImageDisk);

        let (header_str, consumed, terminator) = read_ascii(data, None);
        if terminator != ASCII_EOF {
            return Err(DiskImageError::FormatError("IMD header is not terminated".to_string()));
        }
        let header_str = header_str.unwrap_or_default();
        let rex = imd_header_regex().ok_or(DiskImageError::UnsupportedFormat)?;
        let Some(caps) = rex.captures(&header_str)
        else {
            return Err(DiskImageError::FormatError("invalid IMD header".to_string()));
        };

        let v_major = &caps["v_major"];
        let v_minor = &caps["v_minor"];
        let comment = caps
            .name("comment")
            .map(|c| c.as_str().trim_start_matches(['\r', '\n']).to_string())
            .filter(|c| !c.is_empty());
        log::trace!(
            "Imd::load(): Detected IMD header version: {}.{} comment: {}",
            v_major,
            v_minor,
            comment.as_deref().unwrap_or("None")
        );
        disk_image.info.comment = comment;
        disk_image.info.creator = header_str.lines().next().map(|l| l.to_string());

        let mut read_buf = Cursor::new(data);
        read_buf.set_position((consumed + 1) as u64);
        let mut rate_opt = None;

        while (read_buf.position() as usize) < data.len() {
            let header_offset = read_buf.position();
            let layout = match Self::read_layout(&mut read_buf, header_offset) {
                Ok(layout) => layout,
                Err(e) if disk_image.track_ct() > 0 => {
                    log::warn!(
                        "Imd::load(): Unreadable track at {:X}: {}; keeping {} tracks",
                        header_offset,
                        e,
                        disk_image.track_ct()
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            rate_opt.get_or_insert(layout.data_rate);

            let (track, intact) = Self::read_track(layout, &mut read_buf);
            let ch = track.ch;
            disk_image.add_track(track)?;
            if !intact {
                log::warn!("Imd::load(): Record stream lost in track {}; stopping", ch);
                break;
            }
        }

        disk_image.info.density = rate_opt.map(DiskDensity::from);
        Ok(disk_image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let bad = image.tracks().iter().any(|t| {
            t.sectors.len() > 255
                || t.ch.c() > u8::MAX as u16
                || t.sectors
                    .iter()
                    .any(|s| s.id.c() > u8::MAX as u16 || s.data.len() > u16::MAX as usize)
        });
        if bad {
            return ParserWriteCompatibility::Incompatible;
        }
        if image.tracks().iter().any(|t| t.metadata().is_lossy_for(self.capabilities())) {
            ParserWriteCompatibility::DataLoss
        }
        else {
            ParserWriteCompatibility::Ok
        }
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        let mut out = alloc_buffer(image.total_sectors() * 520 + 256)?;
        let mut cursor = Cursor::new(&mut out);

        write!(cursor, "IMD 1.18: {}\r\n", Self::timestamp())?;
        if let Some(comment) = &image.info.comment {
            cursor.write_all(comment.as_bytes())?;
        }
        cursor.write_all(&[ASCII_EOF])?;

        for track in image.tracks() {
            let n = track.sectors.len();
            if n > 255 {
                log::error!("Imd::save(): track {} has {} sectors", track.ch, n);
                return Err(DiskImageError::IncompatibleImage);
            }

            let first_size = track.sectors.first().map(|s| s.data.len()).unwrap_or(512);
            let uniform = track
                .sectors
                .iter()
                .all(|s| s.data.len() == first_size && DiskChsn::is_standard_size(s.data.len()));
            let size_code = if uniform {
                DiskChsn::bytes_to_n(first_size)
            }
            else {
                IMD_SIZE_TABLE
            };

            let track_c = Self::cylinder_u8(track.ch.c())?;
            let cyl_map = track.sectors.iter().any(|s| s.id.c() != track.ch.c());
            let head_map = track.sectors.iter().any(|s| s.id.h() != track.ch.h());
            let mut head = track.ch.h();
            if cyl_map {
                head |= 0x80;
            }
            if head_map {
                head |= 0x40;
            }

            ImdTrack {
                mode: imd_rate_to_mode(track.data_rate, track.encoding),
                c: track_c,
                h: head,
                sector_ct: n as u8,
                sector_size: size_code,
            }
            .write_le(&mut cursor)?;

            let ids: Vec<u8> = track.sectors.iter().map(|s| s.id.s()).collect();
            cursor.write_all(&ids)?;
            if cyl_map {
                let cyls = track
                    .sectors
                    .iter()
                    .map(|s| Self::cylinder_u8(s.id.c()))
                    .collect::<Result<Vec<u8>, _>>()?;
                cursor.write_all(&cyls)?;
            }
            if head_map {
                let heads: Vec<u8> = track.sectors.iter().map(|s| s.id.h()).collect();
                cursor.write_all(&heads)?;
            }
            if size_code == IMD_SIZE_TABLE {
                for sector in &track.sectors {
                    cursor.write_all(&(sector.data.len() as u16).to_le_bytes())?;
                }
            }

            for sector in &track.sectors {
                let record = Self::record_type(&sector.status);
                cursor.write_all(&[record])?;
                if record != 0x00 {
                    cursor.write_all(&sector.data)?;
                }
            }
        }

        Ok(out)
    }
}
