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

    src/file_parsers/raw.rs

    Flat sector dumps with no header at all: Atari XFD images and PC IMG/IMA
    images. The file size selects the geometry unless one is forced.
*/

use std::cmp::Ordering;

use crate::{
    chs::DiskChs,
    file_parsers::{DetectClass, DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::Geometry,
    image::DiskImage,
    standard_format::{Platform, StandardFormat},
    util::alloc_buffer,
    DiskImageError,
};

#[derive(Clone, Debug, Default)]
pub struct RawFormat;

/// Pick the geometry for a headerless image of `len` bytes: the forced geometry if given (which
/// must then match `len` exactly), otherwise the standard layout of that size.
pub(crate) fn resolve_geometry(
    len: usize,
    forced: Option<&Geometry>,
    hint: Option<Platform>,
) -> Result<Geometry, DiskImageError> {
    match forced {
        Some(geometry) => {
            geometry.validate()?;
            if geometry.total_bytes() != len {
                return Err(DiskImageError::FormatError(format!(
                    "forced geometry {} needs {} bytes, image has {}",
                    geometry,
                    geometry.total_bytes(),
                    len
                )));
            }
            Ok(*geometry)
        }
        None => StandardFormat::geometry_from_size(len, hint).ok_or_else(|| {
            log::error!("resolve_geometry(): no standard layout is {} bytes long", len);
            DiskImageError::UnknownFormat
        }),
    }
}

/// Write every sector of `geometry` in linear order into `out`, taking payloads from `image`.
///
/// A flat dump only has room for what the geometry describes. Sectors missing from the image are
/// zero filled, payloads of the wrong length are truncated or padded, and anything the geometry
/// does not cover is left out.
pub(crate) fn write_uniform(image: &DiskImage, geometry: &Geometry, out: &mut Vec<u8>) -> Result<(), DiskImageError> {
    geometry.validate()?;
    out.try_reserve(geometry.total_bytes())
        .map_err(|_| DiskImageError::MemoryError(geometry.total_bytes()))?;

    for index in 0..geometry.total_sectors() {
        let chs: DiskChs = geometry.linear_to_chs(index)?;
        let len = geometry.linear_byte_length(index);
        match image.find_sector(chs) {
            Ok((ti, si)) => {
                let data = &image.tracks()[ti].sectors[si].data;
                match data.len().cmp(&len) {
                    Ordering::Greater => {
                        log::warn!(
                            "write_uniform(): Sector {} is too large ({}). Truncating to {} bytes",
                            chs,
                            data.len(),
                            len
                        );
                        out.extend_from_slice(&data[..len]);
                    }
                    Ordering::Less => {
                        log::warn!(
                            "write_uniform(): Sector {} is too small ({}). Padding to {} bytes",
                            chs,
                            data.len(),
                            len
                        );
                        out.extend_from_slice(data);
                        out.resize(out.len() + len - data.len(), 0);
                    }
                    Ordering::Equal => out.extend_from_slice(data),
                }
            }
            Err(_) => {
                log::warn!("write_uniform(): Sector {} not present in image. Writing zeros", chs);
                out.resize(out.len() + len, 0);
            }
        }
    }
    Ok(())
}

/// Shared write check for formats that can only hold a uniform layout with no metadata.
pub(crate) fn uniform_can_write(image: &DiskImage, caps: FormatCaps) -> ParserWriteCompatibility {
    if image.track_ct() == 0 {
        return ParserWriteCompatibility::Incompatible;
    }
    if !image.is_uniform() {
        log::warn!("Image layout is not uniform; irregular sectors will be dropped or resized.");
        return ParserWriteCompatibility::DataLoss;
    }
    if image.tracks().iter().any(|t| t.metadata().is_lossy_for(caps)) {
        log::warn!("Flat sector images cannot store preservation metadata.");
        return ParserWriteCompatibility::DataLoss;
    }
    ParserWriteCompatibility::Ok
}

impl FormatParser for RawFormat {
    fn format(&self) -> DiskImageFileFormat {
        DiskImageFileFormat::RawSectorImage
    }

    fn extensions(&self) -> Vec<&'static str> {
        vec!["xfd", "img", "ima"]
    }

    fn capabilities(&self) -> FormatCaps {
        FormatCaps::empty()
    }

    fn detect_class(&self) -> DetectClass {
        DetectClass::SizeOnly
    }

    fn detect(&self, data: &[u8]) -> bool {
        // Amiga sized dumps belong to the ADF parser.
        StandardFormat::from_size(data.len())
            .iter()
            .any(|f| f.platform() != Platform::Amiga)
    }

    fn geometry_hint(&self, data: &[u8]) -> Option<Geometry> {
        StandardFormat::geometry_from_size(data.len(), None)
    }

    fn load(&self, data: &[u8], forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError> {
        self.load_for_platform(data, forced, None)
    }

    /// Decode a flat dump using the geometry selected for its size, preferring `platform`'s
    /// layouts when several platforms share the size.
    fn load_for_platform(
        &self,
        data: &[u8],
        forced: Option<&Geometry>,
        platform: Option<Platform>,
    ) -> Result<DiskImage, DiskImageError> {
        let geometry = resolve_geometry(data.len(), forced, platform)?;
        log::debug!("Raw::load(): {} bytes, geometry {}", data.len(), geometry);
        let mut image = DiskImage::from_raw(&geometry, data)?;
        image.set_source_format(DiskImageFileFormat::RawSectorImage);
        Ok(image)
    }

    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        uniform_can_write(image, self.capabilities())
    }

    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError> {
        let geometry = image.geometry();
        let mut out = alloc_buffer(geometry.total_bytes())?;
        write_uniform(image, &geometry, &mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BootException;

    #[test]
    fn single_density_xfd() {
        let data: Vec<u8> = (0..92_160).map(|i| (i / 128) as u8).collect();
        assert!(RawFormat.detect(&data));
        let image = RawFormat.load(&data, None).unwrap();
        assert_eq!(image.total_sectors(), 720);

        let mut buf = [0u8; 128];
        let (n, _) = image.read_sector(DiskChs::new(0, 0, 1), &mut buf).unwrap();
        assert_eq!(n, 128);
        assert!(buf.iter().all(|&b| b == 0));
        let (_, _) = image.read_sector(DiskChs::new(1, 0, 2), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 19));
    }

    #[test]
    fn shared_size_prefers_hint() {
        let data = vec![0u8; 184_320];
        let pc = RawFormat.load(&data, None).unwrap();
        assert_eq!(pc.geometry().sector_size, 512);
        let atari = RawFormat.load_for_platform(&data, None, Some(Platform::Atari8)).unwrap();
        assert_eq!(atari.geometry().sector_size, 256);
    }

    #[test]
    fn forced_geometry_must_fit() {
        let data = vec![0u8; 183_936];
        let forced = Geometry::new(40, 1, 18, 256);
        assert!(matches!(
            RawFormat.load(&data, Some(&forced)),
            Err(DiskImageError::FormatError(_))
        ));
        let forced = forced.with_boot_exception(BootException::ATARI);
        let image = RawFormat.load(&data, Some(&forced)).unwrap();
        assert_eq!(RawFormat.save(&image).unwrap(), data);
    }

    #[test]
    fn unknown_size_is_not_detected() {
        assert!(!RawFormat.detect(&[0u8; 1000]));
        assert!(!RawFormat.detect(&[0u8; 901_120]));
        assert!(matches!(RawFormat.load(&[0u8; 1000], None), Err(DiskImageError::UnknownFormat)));
    }
}
