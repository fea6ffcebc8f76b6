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

    src/convert.rs

    Moves the logical content of an image into another container format.

    When the destination can hold the source layout as-is, tracks are copied
    whole. Otherwise, or when a destination geometry is requested, sectors
    are mapped by linear index: the n-th source sector in address order
    becomes the n-th sector of the destination geometry.

    Either way every piece of metadata the destination cannot keep is
    stripped and reported per track. Nothing is dropped silently.
*/
use std::{
    fmt::{Display, Formatter},
    path::Path,
};

use crate::{
    chs::{DiskCh, DiskChs, DiskChsn},
    context::ImageContext,
    file_parsers::{DiskImageFileFormat, FormatCaps, FormatParser, ParserWriteCompatibility},
    geometry::Geometry,
    image::{DiskImage, SectorRecord, TrackRecord},
    metadata::{MetadataField, SectorStatus, Timing, WeakBitRun, WeakBits},
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
};

/// What to do with sectors the source flags as unreadable (bad CRC or missing data).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SkipPolicy {
    /// Copy them verbatim. A bad CRC is a recorded property of the sector, not a read failure.
    #[default]
    CopyVerbatim,
    /// Replace their payload with the destination's filler byte and list them as skipped.
    SkipBadSectors,
}

#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    /// Lay the destination out with this geometry instead of the source's.
    pub geometry: Option<Geometry>,
    pub skip_policy: SkipPolicy,
}

impl ConvertOptions {
    pub fn with_geometry(self, geometry: Geometry) -> Self {
        Self {
            geometry: Some(geometry),
            ..self
        }
    }

    pub fn with_skip_policy(self, skip_policy: SkipPolicy) -> Self {
        Self { skip_policy, ..self }
    }
}

/// Metadata a source track carried that the destination cannot represent.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackWarning {
    pub c: u16,
    pub h: u8,
    pub dropped: Vec<MetadataField>,
}

/// A sector copied into a slot of a different length.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ResizedSector {
    pub chs: DiskChs,
    pub source_len: usize,
    pub dest_len: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConversionQuality {
    Lossless,
    Lossy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Advisory {
    pub quality: ConversionQuality,
    pub message: String,
}

impl Display for Advisory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.quality, self.message)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConversionReport {
    pub source_format: Option<DiskImageFileFormat>,
    pub dest_format: Option<DiskImageFileFormat>,
    pub sectors_copied: usize,
    /// Sectors filled with the destination filler under [SkipPolicy::SkipBadSectors].
    pub skipped: Vec<DiskChs>,
    /// Source sectors past the end of the destination geometry.
    pub unrepresented: Vec<DiskChs>,
    /// Destination sectors with no source sector, written as filler.
    pub padded: Vec<DiskChs>,
    pub resized: Vec<ResizedSector>,
    pub lossy_tracks: Vec<TrackWarning>,
}

impl ConversionReport {
    pub fn is_lossy(&self) -> bool {
        !self.lossy_tracks.is_empty()
            || !self.unrepresented.is_empty()
            || !self.resized.is_empty()
            || !self.skipped.is_empty()
    }

    /// Every metadata field dropped on any track, without repeats.
    pub fn dropped_fields(&self) -> Vec<MetadataField> {
        let mut fields: Vec<MetadataField> = self.lossy_tracks.iter().flat_map(|w| w.dropped.iter().copied()).collect();
        fields.sort();
        fields.dedup();
        fields
    }

    pub fn advisory(&self) -> Advisory {
        if !self.is_lossy() {
            return Advisory {
                quality: ConversionQuality::Lossless,
                message: format!("{} sectors copied with all metadata", self.sectors_copied),
            };
        }

        let mut parts = Vec::new();
        let dropped = self.dropped_fields();
        if !dropped.is_empty() {
            let names: Vec<String> = dropped.iter().map(|f| f.to_string()).collect();
            parts.push(format!(
                "{} track(s) lose {}",
                self.lossy_tracks.len(),
                names.join(", ")
            ));
        }
        if !self.unrepresented.is_empty() {
            parts.push(format!("{} sector(s) not represented in destination", self.unrepresented.len()));
        }
        if !self.resized.is_empty() {
            parts.push(format!("{} sector(s) resized", self.resized.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} bad sector(s) skipped", self.skipped.len()));
        }
        Advisory {
            quality: ConversionQuality::Lossy,
            message: parts.join("; "),
        }
    }
}

/// The byte unused sectors are filled with. CP/M derived formats use 0xE5.
pub fn filler_for(format: DiskImageFileFormat) -> u8 {
    match format {
        DiskImageFileFormat::CpcDskImage | DiskImageFileFormat::ImageDisk => 0xE5,
        _ => 0x00,
    }
}

fn is_bad(status: &SectorStatus) -> bool {
    status.has_bad_crc() || status.missing_data
}

fn filter_status(status: SectorStatus, caps: FormatCaps) -> SectorStatus {
    SectorStatus {
        deleted_mark: status.deleted_mark && caps.contains(FormatCaps::CAP_DATA_DELETED),
        address_crc_error: status.address_crc_error && caps.contains(FormatCaps::CAP_ADDRESS_CRC),
        data_crc_error: status.data_crc_error && caps.contains(FormatCaps::CAP_DATA_CRC),
        missing_data: status.missing_data && caps.contains(FormatCaps::CAP_NO_DAM),
    }
}

fn track_warnings(source: &DiskImage, caps: FormatCaps) -> Vec<TrackWarning> {
    source
        .tracks()
        .iter()
        .filter_map(|t| {
            let dropped = t.metadata().dropped_fields(caps);
            if dropped.is_empty() {
                return None;
            }
            log::warn!("convert(): track {} loses {:?}", t.ch, dropped);
            Some(TrackWarning {
                c: t.ch.c(),
                h: t.ch.h(),
                dropped,
            })
        })
        .collect()
}

/// Keep the source layout. Used when the destination can hold it unchanged.
fn copy_tracks(
    source: &DiskImage,
    caps: FormatCaps,
    filler: u8,
    policy: SkipPolicy,
    report: &mut ConversionReport,
) -> Result<DiskImage, DiskImageError> {
    let mut dest = DiskImage::new();
    dest.info = source.info.clone();

    for src_track in source.tracks() {
        let mut track = TrackRecord::new(src_track.ch, src_track.encoding, src_track.data_rate);
        if caps.contains(FormatCaps::CAP_TIMING) {
            track.timing = src_track.timing;
        }
        for sector in &src_track.sectors {
            let chs = DiskChs::new(src_track.ch.c(), src_track.ch.h(), sector.id.s());
            let mut data = sector.data.clone();
            if policy == SkipPolicy::SkipBadSectors && is_bad(&sector.status) {
                data.fill(filler);
                report.skipped.push(chs);
            }
            else {
                report.sectors_copied += 1;
            }
            let position = sector.position.filter(|_| caps.contains(FormatCaps::CAP_TIMING));
            track.add_sector(
                SectorRecord::new(sector.id, data)
                    .with_status(filter_status(sector.status, caps))
                    .with_position(position),
            );
        }
        if caps.contains(FormatCaps::CAP_WEAK_BITS) {
            track.set_weak_bits(src_track.weak_bits().clone())?;
        }
        dest.add_track(track)?;
    }
    Ok(dest)
}

/// Rebuild the image on `geometry`, mapping sectors by linear index.
fn map_linear(
    source: &DiskImage,
    geometry: &Geometry,
    caps: FormatCaps,
    filler: u8,
    policy: SkipPolicy,
    report: &mut ConversionReport,
) -> Result<DiskImage, DiskImageError> {
    geometry.validate()?;

    // (track index, sector index) of every source sector, in address order.
    let src_addrs: Vec<(usize, usize)> = source
        .tracks()
        .iter()
        .enumerate()
        .flat_map(|(ti, t)| t.address_order().into_iter().map(move |si| (ti, si)))
        .collect();

    let density = if geometry.sector_size <= 128 {
        DiskDensity::Standard
    }
    else {
        source.info.density.unwrap_or(DiskDensity::Double)
    };

    let mut dest = DiskImage::new();
    dest.info = source.info.clone();

    for t in 0..geometry.track_count() {
        let ch = DiskCh::from_track_number(t, geometry.heads);
        let (encoding, data_rate, timing) = match source.track(ch) {
            Some(src) => (src.encoding, src.data_rate, src.timing),
            None => (
                if density == DiskDensity::Standard {
                    DiskDataEncoding::Fm
                }
                else {
                    DiskDataEncoding::Mfm
                },
                DiskDataRate::from(density),
                Timing::Absent,
            ),
        };
        let mut track = TrackRecord::new(ch, encoding, data_rate);
        if caps.contains(FormatCaps::CAP_TIMING) {
            track.timing = timing;
        }

        let mut weak_runs: Vec<WeakBitRun> = Vec::new();
        for s in 0..geometry.sectors_per_track {
            let chs = DiskChs::from((ch, geometry.first_sector + s));
            let index = geometry.chs_to_linear(chs)?;
            let len = geometry.linear_byte_length(index);
            let id = DiskChsn::from((chs, DiskChsn::bytes_to_n(len)));

            let Some(&(ti, si)) = src_addrs.get(index)
            else {
                report.padded.push(chs);
                track.add_sector(SectorRecord::new(id, vec![filler; len]));
                continue;
            };
            let src_track = &source.tracks()[ti];
            let src = &src_track.sectors[si];

            let mut data = src.data.clone();
            if data.len() != len {
                report.resized.push(ResizedSector {
                    chs,
                    source_len: data.len(),
                    dest_len: len,
                });
                data.resize(len, filler);
            }

            if policy == SkipPolicy::SkipBadSectors && is_bad(&src.status) {
                data.fill(filler);
                report.skipped.push(chs);
            }
            else {
                report.sectors_copied += 1;
                if caps.contains(FormatCaps::CAP_WEAK_BITS) {
                    let base = track.bit_len();
                    for run in src_track.sector_weak_bits(si).runs() {
                        if let Some(run) = run.clip(0, len * 8) {
                            weak_runs.push(WeakBitRun::new(base + run.bit_offset, run.bit_len));
                        }
                    }
                }
            }

            let position = src.position.filter(|_| caps.contains(FormatCaps::CAP_TIMING));
            track.add_sector(
                SectorRecord::new(id, data)
                    .with_status(filter_status(src.status, caps))
                    .with_position(position),
            );
        }

        if !weak_runs.is_empty() {
            track.set_weak_bits(WeakBits::Runs(weak_runs))?;
        }
        dest.add_track(track)?;
    }

    for &(ti, si) in src_addrs.iter().skip(geometry.total_sectors()) {
        let track = &source.tracks()[ti];
        let chs = DiskChs::new(track.ch.c(), track.ch.h(), track.sectors[si].id.s());
        report.unrepresented.push(chs);
    }

    dest.set_geometry(Some(*geometry));
    Ok(dest)
}

/// Build `dest`'s container from `source`. Returns the container bytes and a report of everything
/// that could not be carried over.
pub fn convert_image(
    source: &DiskImage,
    dest: &dyn FormatParser,
    options: &ConvertOptions,
) -> Result<(Vec<u8>, ConversionReport), DiskImageError> {
    let caps = dest.capabilities();
    let filler = filler_for(dest.format());

    let mut report = ConversionReport {
        source_format: source.source_format(),
        dest_format: Some(dest.format()),
        lossy_tracks: track_warnings(source, caps),
        ..Default::default()
    };

    let flexible = caps.contains(FormatCaps::CAP_VARIABLE_SPT) && caps.contains(FormatCaps::CAP_VARIABLE_SSPT);
    let keep_layout = options.geometry.is_none()
        && (source.is_uniform() || flexible)
        && dest.can_write(source) != ParserWriteCompatibility::Incompatible;

    let mut image = if keep_layout {
        log::debug!("convert_image(): copying tracks to {}", dest.name());
        copy_tracks(source, caps, filler, options.skip_policy, &mut report)?
    }
    else {
        let geometry = options.geometry.unwrap_or_else(|| source.geometry());
        log::debug!("convert_image(): mapping sectors onto {} for {}", geometry, dest.name());
        map_linear(source, &geometry, caps, filler, options.skip_policy, &mut report)?
    };
    if keep_layout && source.is_uniform() {
        image.set_geometry(Some(source.geometry()));
    }
    image.set_source_format(dest.format());

    if dest.can_write(&image) == ParserWriteCompatibility::Incompatible {
        log::error!("convert_image(): {} cannot hold this image", dest.name());
        return Err(DiskImageError::IncompatibleImage);
    }
    let bytes = dest.save(&image)?;

    if report.is_lossy() {
        log::warn!("convert_image(): {}", report.advisory());
    }
    Ok((bytes, report))
}

/// Convert the image open in `source` and write the result to `dest_path`.
pub fn convert(
    source: &ImageContext,
    dest: &dyn FormatParser,
    dest_path: impl AsRef<Path>,
    options: ConvertOptions,
) -> Result<ConversionReport, DiskImageError> {
    let image = source
        .disk_image()
        .ok_or_else(|| DiskImageError::ArgumentError("source image context is closed".to_string()))?;
    let (bytes, report) = convert_image(image, dest, &options)?;
    std::fs::write(dest_path, bytes)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file_parsers::raw::RawFormat;

    fn numbered(geom: &Geometry) -> DiskImage {
        let raw: Vec<u8> = (0..geom.total_bytes()).map(|i| (i / geom.sector_size) as u8).collect();
        DiskImage::from_raw(geom, &raw).unwrap()
    }

    #[test]
    fn uniform_copy_is_lossless() {
        let image = numbered(&Geometry::new(40, 1, 18, 128));
        let (bytes, report) = convert_image(&image, &RawFormat, &ConvertOptions::default()).unwrap();
        assert_eq!(bytes, image.to_raw().unwrap());
        assert_eq!(report.sectors_copied, 720);
        assert!(!report.is_lossy());
        assert_eq!(report.advisory().quality, ConversionQuality::Lossless);
    }

    #[test]
    fn smaller_geometry_leaves_sectors_out() {
        let image = numbered(&Geometry::new(2, 1, 4, 128));
        let options = ConvertOptions::default().with_geometry(Geometry::new(1, 1, 4, 128));
        let (bytes, report) = convert_image(&image, &RawFormat, &options).unwrap();
        assert_eq!(bytes.len(), 512);
        assert_eq!(report.unrepresented.len(), 4);
        assert_eq!(report.unrepresented[0], DiskChs::new(1, 0, 1));
        assert!(report.is_lossy());
    }

    #[test]
    fn larger_sectors_are_padded_and_reported() {
        let image = numbered(&Geometry::new(1, 1, 2, 128));
        let options = ConvertOptions::default().with_geometry(Geometry::new(1, 1, 2, 256));
        let (bytes, report) = convert_image(&image, &RawFormat, &options).unwrap();
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[128..256], &[0u8; 128]);
        assert_eq!(&bytes[256..384], &[1u8; 128]);
        assert_eq!(report.resized.len(), 2);
    }

    #[test]
    fn skip_policy_fills_bad_sectors() {
        let mut image = numbered(&Geometry::new(1, 1, 4, 128));
        image.track_mut(DiskCh::new(0, 0)).unwrap().sectors[1].status.data_crc_error = true;

        assert_eq!(ConvertOptions::default().skip_policy, SkipPolicy::CopyVerbatim);
        let (bytes, report) = convert_image(&image, &RawFormat, &ConvertOptions::default()).unwrap();
        assert_eq!(&bytes[128..256], &[1u8; 128]);
        assert!(report.skipped.is_empty());
        assert_eq!(report.dropped_fields(), vec![MetadataField::BadCrc]);

        let options = ConvertOptions::default().with_skip_policy(SkipPolicy::SkipBadSectors);
        let (bytes, report) = convert_image(&image, &RawFormat, &options).unwrap();
        assert_eq!(&bytes[128..256], &[0u8; 128]);
        assert_eq!(report.skipped, vec![DiskChs::new(0, 0, 2)]);
        assert_eq!(report.sectors_copied, 3);
    }

    #[test]
    fn fillers() {
        assert_eq!(filler_for(DiskImageFileFormat::CpcDskImage), 0xE5);
        assert_eq!(filler_for(DiskImageFileFormat::RawSectorImage), 0x00);
    }
}
