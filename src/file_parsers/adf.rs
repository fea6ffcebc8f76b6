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

    src/file_parsers/adf.rs

    Amiga disk files.

    A plain ADF is a flat dump of 80 cylinders, 2 heads and 11 (DD) or 22
    (HD) 512 byte sectors numbered from 0.

    An extended ADF starts with "UAE-1ADF", a reserved word and a big-endian
    track count, followed by one 12 byte entry per track:

        u16 reserved
        u16 type        0 = decoded sectors, 1 = raw MFM
        u32 length      bytes of track data
        u32 bit length  raw MFM cells (type 1)

    Track data follows the table in track order. Track n is cylinder n / 2,
    head n % 2.
*/
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::{
    bitcodec::amiga::{self, SectorSource, AMIGA_FORMAT_BYTE, AMIGA_SECTOR_SIZE},
    chs::{DiskCh, DiskChsn},
    file_parsers::{
        raw::{resolve_geometry, uniform_can_write, write_uniform},
        DetectClass,
        DiskImageFileFormat,
        FormatCaps,
        FormatParser,
        ParserWriteCompatibility,
    },
    geometry::Geometry,
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::SectorStatus,
    standard_format::{Platform, StandardFormat},
    util::{alloc_buffer, slice_at},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
};

pub const EXT_ADF_MAGIC: &[u8; 8] = b"UAE-1ADF";
pub const EXT_ADF_HEADER_SIZE: usize = 12;
pub const EXT_ADF_ENTRY_SIZE: usize = 12;
pub const EXT_ADF_TYPE_SECTORS: u16 = 0;
pub const EXT_ADF_TYPE_RAW_MFM: u16 = 1;
/// The most sectors an HD AmigaDOS track holds.
pub const AMIGA_MAX_SECTORS: usize = 22;
/// A DiskChsn size code for 512 bytes.
const AMIGA_SIZE_CODE: u8 = 2;

fn is_amiga_size(len: usize) -> bool {
    StandardFormat::from_size(len)
        .iter()
        .any(|f| f.platform() == Platform::Amiga)
}

fn amiga_density(sectors: usize) -> DiskDensity {
    if sectors > 11 {
        DiskDensity::High
    }
    else {
        DiskDensity::Double
    }
}

#[derive(Clone, Debug, Default)]
pub struct AdfFormat;

impl FormatParser for AdfFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::AdfImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["adf"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::empty()
    }

    fn detect_class(&self) -> DetectClass {
        DetectClass::SizeOnly
    }

    fn detect(&self, data: &[u8]) -> bool {
        is_amiga_size(data.len())
    }

    fn geometry_hint(&self, data: &[u8]) -> Option<Geometry> {
        if !self.detect(data) {
            return None;
        }
        StandardFormat::geometry_from_size(data.len(), Some(Platform::Amiga))
    }

    fn load(&self, data: &[u8], forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        if forced.is_none() && !is_amiga_size(data.len()) {
            log::error!("Adf::load(): {} bytes is not an Amiga disk size", data.len());
            return Err(DiskImageError::UnknownFormat);
        }
        let geometry = resolve_geometry(data.len(), forced, Some(Platform::Amiga))?;
        log::debug!("Adf::load(): geometry {}", geometry);

        let mut image = DiskImage::from_raw(&geometry, data)?;
        image.set_source_format(DiskImageFileFormat::AdfImage);
        image.info.density = Some(amiga_density(geometry.sectors_per_track as usize));
        Ok(image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        if !is_amiga_size(image.geometry().total_bytes()) {
            return ParserWriteCompatibility::Incompatible;
        }
        uniform_can_write(image, self.capabilities())
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        let geometry = image.geometry();
        if !is_amiga_size(geometry.total_bytes()) {
            log::error!("Adf::save(): geometry {} is not an Amiga layout", geometry);
            return Err(DiskImageError::IncompatibleImage);
        }
        let mut out = alloc_buffer(geometry.total_bytes())?;
        write_uniform(image, &geometry, &mut out)?;
        Ok(out)
    }
}

#[derive(Debug, Default)]
#[binrw]
#[brw(big, magic = b"UAE-1ADF")]
pub struct ExtAdfHeader {
    reserved: u16,
    track_ct: u16,
}

#[derive(Debug, Default)]
#[binrw]
#[brw(big)]
pub struct ExtAdfTrackEntry {
    reserved: u16,
    track_type: u16,
    byte_len: u32,
    bit_len: u32,
}

/// Extended ADF images. These share the `.adf` extension with plain dumps and are told apart by
/// content only, so the parser advertises no extensions of its own.
#[derive(Clone, Debug, Default)]
pub struct ExtendedAdfFormat;

impl ExtendedAdfFormat {
    fn sector_track(ch: DiskCh, data: &[u8]) -> Result<Option<TrackRecord>, DiskImageError> {
        if data.is_empty() {
            return Ok(None);
        }
        if data.len() % AMIGA_SECTOR_SIZE != 0 {
            return Err(DiskImageError::FormatError(format!(
                "track {} holds {} bytes, not a whole number of sectors",
                ch,
                data.len()
            )));
        }
        let count = data.len() / AMIGA_SECTOR_SIZE;
        let density = amiga_density(count);
        let mut track = TrackRecord::new(ch, DiskDataEncoding::Mfm, DiskDataRate::from(density));
        for (s, chunk) in data.chunks_exact(AMIGA_SECTOR_SIZE).enumerate() {
            let id = DiskChsn::new(ch.c(), ch.h(), s as u8, AMIGA_SIZE_CODE);
            track.add_sector(SectorRecord::new(id, chunk.to_vec()));
        }
        Ok(Some(track))
    }

    fn mfm_track(ch: DiskCh, data: &[u8], bit_len: usize) -> Option<TrackRecord> {
        let decoded = amiga::decode_track(data, bit_len);

        let mut sectors: Vec<SectorRecord> = Vec::with_capacity(decoded.len());
        for sector in decoded {
            if sector.header.format != AMIGA_FORMAT_BYTE {
                log::warn!(
                    "ExtendedAdf::load(): track {} sector has format byte {:02X}, skipping",
                    ch,
                    sector.header.format
                );
                continue;
            }
            if sectors.iter().any(|s| s.id.s() == sector.header.sector) {
                log::debug!(
                    "ExtendedAdf::load(): track {} repeats sector {}, keeping the first",
                    ch,
                    sector.header.sector
                );
                continue;
            }
            if sector.header.track as usize != ch.track_number(2) {
                log::debug!(
                    "ExtendedAdf::load(): sector on track {} claims track {}",
                    ch,
                    sector.header.track
                );
            }

            let status = SectorStatus {
                address_crc_error: !sector.header_ok,
                data_crc_error: !sector.data_ok,
                ..Default::default()
            };
            let id = DiskChsn::new(ch.c(), ch.h(), sector.header.sector, AMIGA_SIZE_CODE);
            sectors.push(SectorRecord::new(id, sector.data).with_status(status));
        }

        if sectors.is_empty() {
            log::warn!("ExtendedAdf::load(): no AmigaDOS sectors found on track {}", ch);
            return None;
        }

        let density = amiga_density(sectors.len());
        let mut track = TrackRecord::new(ch, DiskDataEncoding::Mfm, DiskDataRate::from(density));
        track.sectors = sectors;
        Some(track)
    }
}

impl FormatParser for ExtendedAdfFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::ExtendedAdfImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::CAP_ADDRESS_CRC | FormatCaps::CAP_DATA_CRC
    }

    fn detect(&self, data: &[u8]) -> bool {
        data.len() >= EXT_ADF_HEADER_SIZE && data.starts_with(EXT_ADF_MAGIC)
    }

    fn load(&self, data: &[u8], _forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        let mut cursor = Cursor::new(data);
        let header = ExtAdfHeader::read(&mut cursor)?;
        log::debug!("ExtendedAdf::load(): {} tracks", header.track_ct);

        let mut entries = Vec::with_capacity(header.track_ct as usize);
        for _ in 0..header.track_ct {
            entries.push(ExtAdfTrackEntry::read(&mut cursor)?);
        }

        let mut image = DiskImage::new();
        image.set_source_format(DiskImageFileFormat::ExtendedAdfImage);

        let mut offset = EXT_ADF_HEADER_SIZE + EXT_ADF_ENTRY_SIZE * entries.len();
        let mut max_sectors = 0;
        for (t, entry) in entries.iter().enumerate() {
            let track_data = slice_at(data, offset, entry.byte_len as usize, "extended ADF track")?;
            offset += entry.byte_len as usize;

            let ch = DiskCh::from_track_number(t, 2);
            let track = match entry.track_type {
                EXT_ADF_TYPE_SECTORS => Self::sector_track(ch, track_data)?,
                EXT_ADF_TYPE_RAW_MFM => Self::mfm_track(ch, track_data, entry.bit_len as usize),
                other => {
                    log::warn!("ExtendedAdf::load(): track {} has unknown type {}, skipping", ch, other);
                    None
                }
            };
            if let Some(track) = track {
                max_sectors = max_sectors.max(track.sectors.len());
                image.add_track(track)?;
            }
        }

        if image.track_ct() == 0 {
            return Err(DiskImageError::FormatError("extended ADF holds no readable tracks".to_string()));
        }
        image.info.density = Some(amiga_density(max_sectors));
        Ok(image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let fits = image.tracks().iter().all(|t| {
            t.sectors.len() <= AMIGA_MAX_SECTORS && t.sectors.iter().all(|s| s.data.len() == AMIGA_SECTOR_SIZE)
        });
        if image.track_ct() == 0 || !fits {
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
        if self.can_write(image) == ParserWriteCompatibility::Incompatible {
            log::error!("ExtendedAdf::save(): image is not an AmigaDOS layout");
            return Err(DiskImageError::IncompatibleImage);
        }

        let track_ct = image
            .tracks()
            .iter()
            .map(|t| t.ch.track_number(2) + 1)
            .max()
            .unwrap_or(0);
        let track_ct = u16::try_from(track_ct).map_err(|_| DiskImageError::IncompatibleImage)?;

        let mut entries = Vec::with_capacity(track_ct as usize);
        let mut track_data = Vec::new();
        for t in 0..track_ct as usize {
            let Some(track) = image.track(DiskCh::from_track_number(t, 2))
            else {
                entries.push(ExtAdfTrackEntry {
                    track_type: EXT_ADF_TYPE_SECTORS,
                    ..Default::default()
                });
                continue;
            };

            let sources: Vec<SectorSource> = track
                .address_order()
                .into_iter()
                .map(|i| {
                    let sector = &track.sectors[i];
                    SectorSource {
                        sector: sector.id.s(),
                        data: &sector.data,
                        bad_header: sector.status.address_crc_error,
                        bad_data: sector.status.data_crc_error,
                    }
                })
                .collect();
            let (raw, cells) = amiga::encode_track(t as u8, &sources);

            entries.push(ExtAdfTrackEntry {
                reserved: 0,
                track_type: EXT_ADF_TYPE_RAW_MFM,
                byte_len: raw.len() as u32,
                bit_len: cells as u32,
            });
            track_data.extend_from_slice(&raw);
        }

        let total = EXT_ADF_HEADER_SIZE + EXT_ADF_ENTRY_SIZE * entries.len() + track_data.len();
        let mut out = Cursor::new(alloc_buffer(total)?);
        ExtAdfHeader { reserved: 0, track_ct }.write(&mut out)?;
        for entry in &entries {
            entry.write(&mut out)?;
        }
        let mut out = out.into_inner();
        out.extend_from_slice(&track_data);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chs::DiskChs;

    fn amiga_dump() -> Vec<u8> {
        (0..901_120usize).map(|i| (i / 512) as u8).collect()
    }

    #[test]
    fn plain_adf_numbers_sectors_from_zero() {
        let data = amiga_dump();
        assert!(AdfFormat.detect(&data));
        let image = AdfFormat.load(&data, None).unwrap();
        assert_eq!(image.total_sectors(), 1760);

        let mut buf = [0u8; 512];
        image.read_sector(DiskChs::new(0, 0, 0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
        image.read_sector(DiskChs::new(0, 1, 0), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 11));
        assert!(image.read_sector(DiskChs::new(0, 0, 11), &mut buf).is_err());

        assert_eq!(AdfFormat.save(&image).unwrap(), data);
    }

    #[test]
    fn plain_adf_rejects_other_sizes() {
        assert!(!AdfFormat.detect(&[0u8; 737_280]));
        assert!(matches!(
            AdfFormat.load(&[0u8; 737_280], None),
            Err(DiskImageError::UnknownFormat)
        ));
    }

    #[test]
    fn extended_round_trip_keeps_checksum_errors() {
        let mut image = AdfFormat.load(&amiga_dump(), None).unwrap();
        image.set_geometry(None);
        image.track_mut(DiskCh::new(1, 0)).unwrap().sectors[4].status.data_crc_error = true;

        let ext = ExtendedAdfFormat.save(&image).unwrap();
        assert!(ExtendedAdfFormat.detect(&ext));
        assert_eq!(&ext[0..8], EXT_ADF_MAGIC);
        assert_eq!(u16::from_be_bytes([ext[10], ext[11]]), 160);

        let loaded = ExtendedAdfFormat.load(&ext, None).unwrap();
        assert_eq!(loaded.total_sectors(), 1760);
        assert_eq!(loaded.to_raw().unwrap(), image.to_raw().unwrap());

        let meta = loaded.sector_metadata(DiskChs::new(1, 0, 4)).unwrap();
        assert!(meta.status.data_crc_error);
        assert!(!meta.status.address_crc_error);
        assert!(loaded.sector_metadata(DiskChs::new(1, 0, 5)).unwrap().status.is_clean());
    }

    #[test]
    fn extended_sector_tracks() {
        let mut data = EXT_ADF_MAGIC.to_vec();
        data.extend_from_slice(&[0, 0, 0, 2]);
        // Track 0: 11 decoded sectors. Track 1: unformatted.
        data.extend_from_slice(&[0, 0, 0, 0, 0x00, 0x00, 0x16, 0x00, 0, 0, 0, 0]);
        data.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        data.extend(vec![0x42u8; 11 * 512]);

        let image = ExtendedAdfFormat.load(&data, None).unwrap();
        assert_eq!(image.track_ct(), 1);
        assert_eq!(image.total_sectors(), 11);
        assert!(image.track(DiskCh::new(0, 1)).is_none());
    }

    #[test]
    fn extended_truncated_track_is_format_error() {
        let mut data = EXT_ADF_MAGIC.to_vec();
        data.extend_from_slice(&[0, 0, 0, 1]);
        data.extend_from_slice(&[0, 0, 0, 0, 0x00, 0x00, 0x16, 0x00, 0, 0, 0, 0]);
        data.extend(vec![0u8; 1000]);
        assert!(matches!(
            ExtendedAdfFormat.load(&data, None),
            Err(DiskImageError::FormatError(_))
        ));
    }

    #[test]
    fn odd_sector_sizes_cannot_be_written() {
        let geom = Geometry::new(1, 1, 2, 256);
        let image = DiskImage::from_raw(&geom, &[0u8; 512]).unwrap();
        assert_eq!(ExtendedAdfFormat.can_write(&image), ParserWriteCompatibility::Incompatible);
        assert!(matches!(
            ExtendedAdfFormat.save(&image),
            Err(DiskImageError::IncompatibleImage)
        ));
    }
}
