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

    src/file_parsers/d88.rs

    D88 / D77 images used by NEC PC-88, PC-98, Sharp X1 and Fujitsu FM
    machines. A 0x2B0 byte header holds the disk name, write protect and
    media bytes, the total disk size and 164 track offsets. Each track is a
    run of sectors, each with a 16-byte header in front of its data.

    Only the first disk of a multi-disk file is read.
*/
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    chs::{DiskCh, DiskChsn},
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::{Geometry, TrackDescriptor},
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::SectorStatus,
    util::{alloc_buffer, fixed_str, to_fixed_str},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
};

pub const D88_HEADER_SIZE: usize = 0x2B0;
pub const D88_SECTOR_HEADER_SIZE: usize = 16;
pub const D88_TRACK_ENTRIES: usize = 164;

pub const D88_WRITE_PROTECT: u8 = 0x10;

pub const D88_MEDIA_2D: u8 = 0x00;
pub const D88_MEDIA_2DD: u8 = 0x10;
pub const D88_MEDIA_2HD: u8 = 0x20;
pub const D88_MEDIA_1D: u8 = 0x30;
pub const D88_MEDIA_1DD: u8 = 0x40;

pub const D88_DENSITY_FM: u8 = 0x40;
pub const D88_DELETED: u8 = 0x10;

pub const D88_STATUS_ID_CRC: u8 = 0xA0;
pub const D88_STATUS_DATA_CRC: u8 = 0xB0;
pub const D88_STATUS_NO_ADDRESS_MARK: u8 = 0xE0;
pub const D88_STATUS_NO_DAM: u8 = 0xF0;

#[derive(Debug)]
#[binrw]
#[brw(little)]
pub struct D88Header {
    pub name: [u8; 17],
    pub reserved: [u8; 9],
    pub write_protect: u8,
    pub media: u8,
    pub disk_size: u32,
    pub track_offsets: [u32; D88_TRACK_ENTRIES],
}

#[derive(Debug, Default)]
#[binrw]
#[brw(little)]
pub struct D88SectorHeader {
    pub c: u8,
    pub h: u8,
    pub r: u8,
    pub n: u8,
    pub sector_ct: u16,
    pub density: u8,
    pub deleted: u8,
    pub status: u8,
    pub reserved: [u8; 5],
    pub data_size: u16,
}

impl D88SectorHeader {
    fn status(&self) -> SectorStatus {
        SectorStatus {
            deleted_mark: self.deleted & D88_DELETED != 0 || self.status == D88_DELETED,
            address_crc_error: self.status == D88_STATUS_ID_CRC,
            data_crc_error: self.status == D88_STATUS_DATA_CRC,
            missing_data: matches!(self.status, D88_STATUS_NO_ADDRESS_MARK | D88_STATUS_NO_DAM),
        }
    }

    fn status_byte(status: &SectorStatus) -> u8 {
        if status.missing_data {
            D88_STATUS_NO_DAM
        }
        else if status.data_crc_error {
            D88_STATUS_DATA_CRC
        }
        else if status.address_crc_error {
            D88_STATUS_ID_CRC
        }
        else if status.deleted_mark {
            D88_DELETED
        }
        else {
            0
        }
    }
}

fn media_rate(media: u8) -> DiskDataRate {
    match media {
        D88_MEDIA_2HD => DiskDataRate::Rate500Kbps,
        _ => DiskDataRate::Rate250Kbps,
    }
}

#[derive(Clone, Debug, Default)]
pub struct D88Format;

impl D88Format {
    fn read_track(data: &[u8], desc: &TrackDescriptor, rate: DiskDataRate) -> Result<TrackRecord, DiskImageError> {
        let end = desc.end(data.len())?;
        let mut cursor = Cursor::new(&data[desc.offset..end]);
        let mut track = TrackRecord::new(desc.ch, DiskDataEncoding::Mfm, rate);

        let mut sector_ct = None;
        let mut s = 0;
        while s < sector_ct.unwrap_or(1) {
            s += 1;
            let Ok(sh) = D88SectorHeader::read(&mut cursor)
            else {
                log::warn!(
                    "D88::read_track(): Track {} ends after {} of {} sectors",
                    desc.ch,
                    track.sectors.len(),
                    sector_ct.unwrap_or(0)
                );
                break;
            };
            sector_ct.get_or_insert(sh.sector_ct as usize);
            if sh.density & D88_DENSITY_FM != 0 {
                track.encoding = DiskDataEncoding::Fm;
            }

            let id = DiskChsn::new(sh.c as u16, sh.h, sh.r, sh.n);
            let mut status = sh.status();
            let start = cursor.position() as usize;
            let size = sh.data_size as usize;
            let block = cursor.get_ref();

            let payload = match block.get(start..start + size) {
                Some(bytes) => bytes.to_vec(),
                None => {
                    log::warn!("D88::read_track(): Sector {} data runs past its track; zero filling", id);
                    status.missing_data = true;
                    vec![0; size]
                }
            };
            cursor.set_position((start + size) as u64);
            track.add_sector(SectorRecord::new(id, payload).with_status(status));
        }
        Ok(track)
    }
}

impl FormatParser for D88Format {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::D88Image
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["d88", "d77", "88d", "d98"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_VARIABLE_SPT
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_ADDRESS_CRC
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_SID_OVERRIDE
            | FormatCaps::CAP_TRACK_ENCODING
            | FormatCaps::CAP_NO_DAM
    }

    /// D88 has no magic number. Accept a header whose disk size matches the buffer (or a
    /// multi-disk file) and whose first track starts right after the header.
    fn detect(&self, data: &[u8]) -> bool {
        let Ok(header) = D88Header::read(&mut Cursor::new(data))
        else {
            return false;
        };
        let size = header.disk_size as usize;
        let media_ok = matches!(
            header.media,
            D88_MEDIA_2D | D88_MEDIA_2DD | D88_MEDIA_2HD | D88_MEDIA_1D | D88_MEDIA_1DD
        );
        let first = header.track_offsets[0] as usize;
        media_ok
            && size >= D88_HEADER_SIZE
            && size <= data.len()
            && (first == 0 || first == D88_HEADER_SIZE)
            && header.track_offsets.iter().all(|&o| o == 0 || (o as usize >= D88_HEADER_SIZE && (o as usize) < size))
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let header = D88Header::read(&mut Cursor::new(data))?;
        let disk_size = header.disk_size as usize;
        if disk_size > data.len() {
            return Err(DiskImageError::FormatError(format!(
                "declared disk size {:#X} exceeds image size {:#X}",
                disk_size,
                data.len()
            )));
        }
        if disk_size < data.len() {
            log::debug!(
                "D88::load(): {} bytes after the first disk are ignored",
                data.len() - disk_size
            );
        }

        // Each track ends where the next one in file order begins.
        let mut offsets: Vec<(usize, usize)> = header
            .track_offsets
            .iter()
            .enumerate()
            .filter(|(_, &o)| o != 0)
            .map(|(i, &o)| (i, o as usize))
            .collect();
        for &(i, offset) in &offsets {
            if offset < D88_HEADER_SIZE || offset >= disk_size {
                return Err(DiskImageError::FormatError(format!(
                    "track {} offset {:#X} outside disk",
                    i, offset
                )));
            }
        }
        offsets.sort_by_key(|&(_, o)| o);

        let mut table = Vec::with_capacity(offsets.len());
        for (n, &(i, offset)) in offsets.iter().enumerate() {
            let next = offsets.get(n + 1).map(|&(_, o)| o).unwrap_or(disk_size);
            let ch = DiskCh::new((i / 2) as u16, (i % 2) as u8);
            table.push(TrackDescriptor::new(ch, offset, Some(next - offset), 0));
        }

        let mut disk_image = DiskImage::new();
        disk_image.set_source_format(DiskImageFileFormat::D88Image);
        disk_image.info.name = fixed_str(&header.name);
        disk_image.info.write_protected = header.write_protect & D88_WRITE_PROTECT != 0;
        let rate = media_rate(header.media);
        disk_image.info.density = Some(DiskDensity::from(rate));
        log::trace!(
            "D88::load(): name {:?} media {:02X}, {} tracks",
            disk_image.info.name,
            header.media,
            table.len()
        );

        for desc in &table {
            let track = Self::read_track(data, desc, rate)?;
            if track.sectors.is_empty() {
                continue;
            }
            disk_image.add_track(track)?;
        }
        Ok(disk_image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let geom = image.geometry();
        let bad = geom.heads > 2
            || geom.cylinders as usize * 2 > D88_TRACK_ENTRIES
            || image
                .tracks()
                .iter()
                .flat_map(|t| t.sectors.iter())
                .any(|s| s.data.len() > u16::MAX as usize);
        if bad {
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
            return Err(DiskImageError::IncompatibleImage);
        }

        let mut body = Vec::new();
        let mut track_offsets = [0u32; D88_TRACK_ENTRIES];
        for track in image.tracks() {
            let index = track.ch.c() as usize * 2 + track.ch.h() as usize;
            track_offsets[index] = (D88_HEADER_SIZE + body.len()) as u32;

            let mut cursor = Cursor::new(Vec::new());
            for sector in &track.sectors {
                D88SectorHeader {
                    c: sector.id.c() as u8,
                    h: sector.id.h(),
                    r: sector.id.s(),
                    n: sector.id.n(),
                    sector_ct: track.sectors.len() as u16,
                    density: if track.encoding == DiskDataEncoding::Fm { D88_DENSITY_FM } else { 0 },
                    deleted: if sector.status.deleted_mark { D88_DELETED } else { 0 },
                    status: D88SectorHeader::status_byte(&sector.status),
                    reserved: [0; 5],
                    data_size: sector.data.len() as u16,
                }
                .write(&mut cursor)?;
                std::io::Write::write_all(&mut cursor, &sector.data)?;
            }
            body.extend(cursor.into_inner());
        }

        let geom = image.geometry();
        let media = match image.info.density {
            Some(DiskDensity::High) | Some(DiskDensity::Extended) => D88_MEDIA_2HD,
            _ if geom.cylinders > 42 => D88_MEDIA_2DD,
            _ => D88_MEDIA_2D,
        };
        let disk_size = D88_HEADER_SIZE + body.len();
        let disk_size_u32 = u32::try_from(disk_size).map_err(|_| DiskImageError::IncompatibleImage)?;

        let mut out = alloc_buffer(disk_size)?;
        D88Header {
            name: to_fixed_str::<17>(image.info.name.as_deref()),
            reserved: [0; 9],
            write_protect: if image.info.write_protected { D88_WRITE_PROTECT } else { 0 },
            media,
            disk_size: disk_size_u32,
            track_offsets,
        }
        .write(&mut Cursor::new(&mut out))?;
        out.extend(body);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chs::DiskChs;

    fn sector(r: u8, status: u8, deleted: u8, fill: u8) -> Vec<u8> {
        let mut s = vec![0, 0, r, 1, 2, 0, 0, deleted, status, 0, 0, 0, 0, 0];
        s.extend_from_slice(&256u16.to_le_bytes());
        s.extend(vec![fill; 256]);
        s
    }

    fn build() -> Vec<u8> {
        let mut track = sector(1, D88_STATUS_DATA_CRC, 0, 0xAA);
        track.extend(sector(2, D88_DELETED, D88_DELETED, 0xBB));
        let mut img = vec![0u8; D88_HEADER_SIZE];
        img[..5].copy_from_slice(b"GAME1");
        img[0x1A] = D88_WRITE_PROTECT;
        img[0x1B] = D88_MEDIA_2D;
        let size = (D88_HEADER_SIZE + track.len()) as u32;
        img[0x1C..0x20].copy_from_slice(&size.to_le_bytes());
        img[0x20..0x24].copy_from_slice(&(D88_HEADER_SIZE as u32).to_le_bytes());
        img.extend(track);
        img
    }

    #[test]
    fn detect_and_load() {
        let img = build();
        assert!(D88Format.detect(&img));
        let image = D88Format.load(&img, None).unwrap();
        assert_eq!(image.info.name.as_deref(), Some("GAME1"));
        assert!(image.info.write_protected);

        let track = image.track(DiskCh::new(0, 0)).unwrap();
        assert!(track.sectors[0].status.data_crc_error);
        assert!(track.sectors[1].status.deleted_mark);

        let mut buf = [0u8; 256];
        image.read_sector(DiskChs::new(0, 0, 2), &mut buf).unwrap();
        assert_eq!(buf, [0xBB; 256]);
    }

    #[test]
    fn save_is_identical() {
        let img = build();
        let image = D88Format.load(&img, None).unwrap();
        assert_eq!(D88Format.save(&image).unwrap(), img);
    }

    #[test]
    fn oversized_disk_is_format_error() {
        let mut img = build();
        img.truncate(img.len() - 1);
        assert!(!D88Format.detect(&img));
        assert!(matches!(D88Format.load(&img, None), Err(DiskImageError::FormatError(_))));
    }

    #[test]
    fn random_data_is_not_d88() {
        assert!(!D88Format.detect(&[0xFFu8; 1024]));
        assert!(!D88Format.detect(&[0u8; 16]));
    }
}
