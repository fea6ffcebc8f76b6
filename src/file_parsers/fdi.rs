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

    src/file_parsers/fdi.rs

    FDI ("Formatted Disk Image") track table images.

    A 14-byte header (signature, write protect, cylinders, heads, text
    offset, data offset, extra header length) is followed by the extra header
    and then one header per track:

        u32 track data offset (relative to the data offset), u16 reserved,
        u8 sector count, then per sector C, H, R, N, flags, u16 offset
        (relative to the track data).

    Flag bits 0-5 report a good CRC for sector size codes 0-5. Bit 7 marks a
    deleted data address mark.
*/
use std::io::{Cursor, Seek, SeekFrom};

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    chs::{DiskCh, DiskChsn},
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::{Geometry, TrackDescriptor},
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::SectorStatus,
    util::{alloc_buffer, read_ascii},
    DiskDataEncoding,
    DiskDataRate,
    DiskImageError,
};

pub const FDI_SIGNATURE: &[u8; 3] = b"FDI";
pub const FDI_HEADER_SIZE: usize = 14;
pub const FDI_TRACK_HEADER_SIZE: usize = 7;
pub const FDI_SECTOR_HEADER_SIZE: usize = 7;
pub const FDI_FLAG_DELETED: u8 = 0x80;

#[derive(Debug, Default)]
#[binrw]
#[brw(little, magic = b"FDI")]
pub struct FdiHeader {
    pub write_protect: u8,
    pub cylinders: u16,
    pub heads: u16,
    pub text_offset: u16,
    pub data_offset: u16,
    pub extra_len: u16,
}

#[derive(Debug, Default)]
#[binrw]
#[brw(little)]
pub struct FdiTrackHeader {
    pub offset: u32,
    pub reserved: u16,
    pub sector_ct: u8,
}

#[derive(Debug, Default)]
#[binrw]
#[brw(little)]
pub struct FdiSectorHeader {
    pub c: u8,
    pub h: u8,
    pub r: u8,
    pub n: u8,
    pub flags: u8,
    pub offset: u16,
}

impl FdiSectorHeader {
    fn status(&self) -> SectorStatus {
        let crc_ok = match self.n {
            0..=5 => self.flags & (1 << self.n) != 0,
            _ => true,
        };
        SectorStatus {
            deleted_mark: self.flags & FDI_FLAG_DELETED != 0,
            data_crc_error: !crc_ok,
            ..Default::default()
        }
    }

    fn flags_for(n: u8, status: &SectorStatus) -> u8 {
        let mut flags = 0;
        if !status.has_bad_crc() && !status.missing_data && n <= 5 {
            flags |= 1 << n;
        }
        if status.deleted_mark {
            flags |= FDI_FLAG_DELETED;
        }
        flags
    }
}

#[derive(Clone, Debug, Default)]
pub struct FdiFormat;

impl FdiFormat {
    fn read_track(
        data: &[u8],
        data_offset: usize,
        desc: &TrackDescriptor,
        sectors: &[FdiSectorHeader],
    ) -> Result<TrackRecord, DiskImageError> {
        let track_start = data_offset + desc.offset;
        let mut track = TrackRecord::new(desc.ch, DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps);

        for sh in sectors {
            let id = DiskChsn::new(sh.c as u16, sh.h, sh.r, sh.n);
            let len = DiskChsn::n_to_bytes(sh.n.min(6));
            let mut status = sh.status();
            let start = track_start + sh.offset as usize;

            let payload = match data.get(start..start + len) {
                Some(bytes) => bytes.to_vec(),
                None => {
                    log::warn!(
                        "Fdi::read_track(): Sector {} data at {:#X} is past the end of the image; zero filling",
                        id,
                        start
                    );
                    status.missing_data = true;
                    vec![0; len]
                }
            };
            track.add_sector(SectorRecord::new(id, payload).with_status(status));
        }
        Ok(track)
    }
}

impl FormatParser for FdiFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::FdiImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["fdi"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_VARIABLE_SPT
            | FormatCaps::CAP_VARIABLE_SSPT
            | FormatCaps::CAP_DATA_CRC
            | FormatCaps::CAP_DATA_DELETED
            | FormatCaps::CAP_SID_OVERRIDE
            | FormatCaps::CAP_COMMENT
    }

    fn detect(&self, data: &[u8]) -> bool {
        if data.len() < FDI_HEADER_SIZE || !data.starts_with(FDI_SIGNATURE) {
            return false;
        }
        // The signature is short; require a plausible header as well.
        FdiHeader::read(&mut Cursor::new(data))
            .map(|h| {
                h.heads >= 1
                    && h.heads <= 2
                    && h.cylinders > 0
                    && (h.data_offset as usize) <= data.len()
                    && (h.text_offset as usize) <= data.len()
            })
            .unwrap_or(false)
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let mut cursor = Cursor::new(data);
        let header = FdiHeader::read(&mut cursor)?;
        log::trace!("Fdi::load(): Header: {:?}", header);

        if header.heads == 0 || header.heads > 2 {
            return Err(DiskImageError::FormatError(format!("unsupported head count {}", header.heads)));
        }
        let data_offset = header.data_offset as usize;
        if data_offset > data.len() {
            return Err(DiskImageError::FormatError(format!(
                "data offset {:#X} beyond image end {:#X}",
                data_offset,
                data.len()
            )));
        }

        cursor.seek(SeekFrom::Start((FDI_HEADER_SIZE + header.extra_len as usize) as u64))?;

        // Read the whole track table before touching any sector data.
        let mut table = Vec::new();
        for t in 0..header.cylinders as usize * header.heads as usize {
            let ch = DiskCh::from_track_number(t, header.heads as u8);
            let th = FdiTrackHeader::read(&mut cursor)?;
            let mut sectors = Vec::with_capacity(th.sector_ct as usize);
            for _ in 0..th.sector_ct {
                sectors.push(FdiSectorHeader::read(&mut cursor)?);
            }
            if data_offset + th.offset as usize > data.len() {
                return Err(DiskImageError::FormatError(format!(
                    "track {} data offset {:#X} beyond image end",
                    ch, th.offset
                )));
            }
            table.push((TrackDescriptor::new(ch, th.offset as usize, None, sectors.len()), sectors));
        }

        let mut disk_image = DiskImage::new();
        disk_image.set_source_format(DiskImageFileFormat::FdiImage);
        disk_image.info.write_protected = header.write_protect != 0;
        if let Some(text) = data.get(header.text_offset as usize..) {
            let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
            disk_image.info.comment = read_ascii(&text[..end], None).0;
        }

        for (desc, sectors) in &table {
            if desc.sector_ct == 0 {
                log::trace!("Fdi::load(): Track {} is unformatted", desc.ch);
                continue;
            }
            let track = Self::read_track(data, data_offset, desc, sectors)?;
            disk_image.add_track(track)?;
        }
        Ok(disk_image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let too_large = image.tracks().iter().any(|t| t.sectors.len() > 255 || t.bit_len() / 8 > u16::MAX as usize);
        if too_large || image.geometry().heads > 2 {
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

        let geom = image.geometry();
        let heads = geom.heads.max(1);
        let track_ct = geom.cylinders as usize * heads as usize;
        let chs: Vec<DiskCh> = (0..track_ct).map(|t| DiskCh::from_track_number(t, heads)).collect();

        let table_len: usize = chs
            .iter()
            .map(|ch| {
                FDI_TRACK_HEADER_SIZE + image.track(*ch).map(|t| t.sectors.len()).unwrap_or(0) * FDI_SECTOR_HEADER_SIZE
            })
            .sum();
        let mut text = image.info.comment.clone().unwrap_or_default().into_bytes();
        text.push(0);

        let text_offset = FDI_HEADER_SIZE + table_len;
        let data_offset = text_offset + text.len();
        let (Ok(text_offset), Ok(data_offset)) = (u16::try_from(text_offset), u16::try_from(data_offset))
        else {
            log::error!("Fdi::save(): Track table too large for 16-bit offsets");
            return Err(DiskImageError::IncompatibleImage);
        };

        let data_len: usize = image.tracks().iter().map(|t| t.bit_len() / 8).sum();
        let mut out = alloc_buffer(data_offset as usize + data_len)?;
        let mut cursor = Cursor::new(&mut out);

        FdiHeader {
            write_protect: image.info.write_protected as u8,
            cylinders: geom.cylinders,
            heads: heads as u16,
            text_offset,
            data_offset,
            extra_len: 0,
        }
        .write(&mut cursor)?;

        let mut track_offset = 0u32;
        for ch in &chs {
            let Some(track) = image.track(*ch)
            else {
                FdiTrackHeader::default().write(&mut cursor)?;
                continue;
            };
            FdiTrackHeader {
                offset: track_offset,
                reserved: 0,
                sector_ct: track.sectors.len() as u8,
            }
            .write(&mut cursor)?;

            let mut sector_offset = 0usize;
            for sector in &track.sectors {
                FdiSectorHeader {
                    c: sector.id.c() as u8,
                    h: sector.id.h(),
                    r: sector.id.s(),
                    n: sector.id.n(),
                    flags: FdiSectorHeader::flags_for(sector.id.n(), &sector.status),
                    offset: sector_offset as u16,
                }
                .write(&mut cursor)?;
                sector_offset += sector.data.len();
            }
            track_offset += sector_offset as u32;
        }

        out.extend_from_slice(&text);
        for ch in &chs {
            if let Some(track) = image.track(*ch) {
                for sector in &track.sectors {
                    out.extend_from_slice(&sector.data);
                }
            }
        }
        Ok(out)
    }
}
