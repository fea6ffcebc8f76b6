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

    src/file_parsers/atr.rs

    Atari 8-bit ATR images. A 16-byte header followed by a flat sector dump.

    The image size is stored in 16-byte paragraphs, split between a low word
    at offset 2 and a high byte at offset 6. Double density images normally
    keep the first three (boot) sectors at 128 bytes, but some tools pad
    them out to 256; both layouts are distinguished by the data length.
*/
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    file_parsers::{
        raw::{uniform_can_write, write_uniform},
        DiskImageFileFormat,
        FormatCaps,
        FormatParser,
        ParserWriteCompatibility,
    },
    geometry::{BootException, Geometry},
    image::DiskImage,
    util::alloc_buffer,
    DiskImageError,
};

pub const ATR_MAGIC: u16 = 0x0296;
pub const ATR_HEADER_SIZE: usize = 16;

#[derive(Debug, Default)]
#[binrw]
#[brw(little, magic = 0x0296u16)]
pub struct AtrHeader {
    paragraphs_lo: u16,
    sector_size: u16,
    paragraphs_hi: u8,
    crc: u32,
    reserved: [u8; 4],
    flags: u8,
}

impl AtrHeader {
    pub fn data_len(&self) -> usize {
        (((self.paragraphs_hi as usize) << 16) | self.paragraphs_lo as usize) * 16
    }

    fn new(data_len: usize, sector_size: u16) -> Self {
        let paragraphs = data_len / 16;
        AtrHeader {
            paragraphs_lo: (paragraphs & 0xFFFF) as u16,
            sector_size,
            paragraphs_hi: ((paragraphs >> 16) & 0xFF) as u8,
            ..Default::default()
        }
    }
}

/// Derive the geometry of an ATR image from its sector size and data length.
pub fn atr_geometry(sector_size: usize, data_len: usize) -> Result<Geometry, DiskImageError> {
    let (sectors, boot) = match sector_size {
        128 if data_len % 128 == 0 => (data_len / 128, None),
        256 if data_len >= 384 && (data_len - 384) % 256 == 0 => (3 + (data_len - 384) / 256, Some(BootException::ATARI)),
        256 if data_len % 256 == 0 => (data_len / 256, None),
        _ => {
            return Err(DiskImageError::FormatError(format!(
                "ATR data length {} is not a whole number of {} byte sectors",
                data_len, sector_size
            )))
        }
    };

    let (spt, heads) = match (sector_size, sectors) {
        (128, 1040) => (26, 1),
        (256, 1440) => (18, 2),
        _ => (18, 1),
    };
    if sectors == 0 || sectors % (spt * heads) != 0 {
        return Err(DiskImageError::FormatError(format!(
            "ATR sector count {} does not fill whole tracks",
            sectors
        )));
    }
    let cylinders = u16::try_from(sectors / (spt * heads))
        .map_err(|_| DiskImageError::FormatError(format!("ATR sector count {} too large", sectors)))?;

    let mut geometry = Geometry::new(cylinders, heads as u8, spt as u8, sector_size);
    if let Some(boot) = boot {
        geometry = geometry.with_boot_exception(boot);
    }
    Ok(geometry)
}

#[derive(Clone, Debug, Default)]
pub struct AtrFormat;

impl FormatParser for AtrFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::AtrImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["atr"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::empty()
    }

    fn detect(&self, data: &[u8]) -> bool {
        data.len() >= ATR_HEADER_SIZE && u16::from_le_bytes([data[0], data[1]]) == ATR_MAGIC
    }

    fn geometry_hint(&self, data: &[u8]) -> Option<Geometry> {
        let header = AtrHeader::read(&mut Cursor::new(data)).ok()?;
        atr_geometry(header.sector_size as usize, header.data_len()).ok()
    }

    fn load(&self, data: &[u8], forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let header = AtrHeader::read(&mut Cursor::new(data))?;
        log::trace!("Atr::load(): header: {:?}", header);

        let data_len = header.data_len();
        let available = data.len() - ATR_HEADER_SIZE;
        if data_len > available {
            log::error!("Atr::load(): header declares {} bytes, only {} present", data_len, available);
            return Err(DiskImageError::FormatError(format!(
                "ATR header declares {} bytes of sector data, file holds {}",
                data_len, available
            )));
        }
        if data_len < available {
            log::warn!("Atr::load(): ignoring {} trailing bytes", available - data_len);
        }

        let geometry = match forced {
            Some(geometry) => {
                if geometry.total_bytes() != data_len {
                    return Err(DiskImageError::FormatError(format!(
                        "forced geometry {} needs {} bytes, ATR holds {}",
                        geometry,
                        geometry.total_bytes(),
                        data_len
                    )));
                }
                *geometry
            }
            None => atr_geometry(header.sector_size as usize, data_len)?,
        };
        log::debug!("Atr::load(): geometry {}", geometry);

        let mut image = DiskImage::from_raw(&geometry, &data[ATR_HEADER_SIZE..ATR_HEADER_SIZE + data_len])?;
        image.set_source_format(DiskImageFileFormat::AtrImage);
        Ok(image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let geometry = image.geometry();
        if !matches!(geometry.sector_size, 128 | 256) {
            return ParserWriteCompatibility::Incompatible;
        }
        uniform_can_write(image, self.capabilities())
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        let geometry = image.geometry();
        if !matches!(geometry.sector_size, 128 | 256) {
            log::error!("Atr::save(): unsupported sector size {}", geometry.sector_size);
            return Err(DiskImageError::IncompatibleImage);
        }

        let data_len = geometry.total_bytes();
        let mut out = alloc_buffer(ATR_HEADER_SIZE + data_len)?;
        let mut cursor = Cursor::new(&mut out);
        AtrHeader::new(data_len, geometry.sector_size as u16).write(&mut cursor)?;
        write_uniform(image, &geometry, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chs::DiskChs;

    fn build_atr(sector_size: u16, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        AtrHeader::new(data.len(), sector_size)
            .write(&mut Cursor::new(&mut out))
            .unwrap();
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn header_size_fields() {
        let atr = build_atr(128, &[0u8; 92_160]);
        assert_eq!(atr.len(), 92_176);
        assert_eq!(&atr[0..2], &[0x96, 0x02]);
        // 92160 / 16 = 5760 paragraphs
        assert_eq!(u16::from_le_bytes([atr[2], atr[3]]), 5760);
        assert_eq!(u16::from_le_bytes([atr[4], atr[5]]), 128);
        assert_eq!(atr[6], 0);
    }

    #[test]
    fn double_density_short_boot_sectors() {
        let mut data = vec![0x11u8; 3 * 128];
        data.extend(vec![0x22u8; 717 * 256]);
        let atr = build_atr(256, &data);
        assert!(AtrFormat.detect(&atr));

        let image = AtrFormat.load(&atr, None).unwrap();
        let mut buf = [0u8; 256];
        let (n, _) = image.read_sector(DiskChs::new(0, 0, 3), &mut buf).unwrap();
        assert_eq!(n, 128);
        assert!(buf[..128].iter().all(|&b| b == 0x11));
        let (n, _) = image.read_sector(DiskChs::new(0, 0, 4), &mut buf).unwrap();
        assert_eq!(n, 256);
        assert!(buf.iter().all(|&b| b == 0x22));

        assert_eq!(AtrFormat.save(&image).unwrap(), atr);
    }

    #[test]
    fn padded_boot_sectors_are_full_size() {
        let geometry = atr_geometry(256, 184_320).unwrap();
        assert_eq!(geometry.boot, None);
        assert_eq!(geometry.total_sectors(), 720);
    }

    #[test]
    fn quad_density_has_two_heads() {
        let geometry = atr_geometry(256, 384 + 1437 * 256).unwrap();
        assert_eq!(geometry.heads, 2);
        assert_eq!(geometry.cylinders, 40);
    }

    #[test]
    fn truncated_image_is_format_error() {
        let mut atr = build_atr(128, &[0u8; 92_160]);
        atr.truncate(50_000);
        assert!(matches!(AtrFormat.load(&atr, None), Err(DiskImageError::FormatError(_))));
    }

    #[test]
    fn bad_magic_is_not_detected() {
        let mut atr = build_atr(128, &[0u8; 92_160]);
        atr[0] = 0;
        assert!(!AtrFormat.detect(&atr));
        assert!(AtrFormat.load(&atr, None).is_err());
    }
}
