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

    src/protection.rs

    Lists the irregularities in an image that copy protection schemes rely
    on, and names a handful of well known schemes from their signatures.
    The image is only inspected, never modified.
*/
use std::fmt::{Display, Formatter, Result};

use crate::{
    chs::{DiskCh, DiskChsn},
    image::{DiskImage, TrackRecord},
    VaultHashMap,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtectionScheme {
    FormasterCopyLock(u8),
    SoftguardSuperlok(u8),
    EaInterlock(u8),
    /// Atari 8-bit disks with weak sectors or duplicated sector ids.
    AtariPhantomSectors,
    Undetermined,
}

impl Display for ProtectionScheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            ProtectionScheme::FormasterCopyLock(v) => write!(f, "Formaster CopyLock v{}", v),
            ProtectionScheme::SoftguardSuperlok(_v) => write!(f, "Softguard Superlok"),
            ProtectionScheme::EaInterlock(v) => write!(f, "EA Interlock v{}", v),
            ProtectionScheme::AtariPhantomSectors => write!(f, "Atari phantom/weak sectors"),
            ProtectionScheme::Undetermined => write!(f, "Likely protected, but scheme undetermined"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FindingKind {
    WeakBits,
    BadCrc,
    DeletedMark,
    MissingData,
    /// Two or more sectors on the track carry the same id.
    DuplicateId,
    /// A sector id outside the nominal numbering range.
    PhantomId,
    /// A sector id in the nominal range that the track lacks.
    MissingSector,
    /// A payload whose length is not a standard size, or disagrees with its size code.
    NonStandardSize,
    /// The track's content is identical to an earlier track.
    DuplicateTrack,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Finding {
    pub ch: DiskCh,
    /// The sector id involved, for sector level findings.
    pub sector: Option<u8>,
    pub kind: FindingKind,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtectionReport {
    pub findings: Vec<Finding>,
    pub scheme: Option<ProtectionScheme>,
}

impl ProtectionReport {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn count(&self, kind: FindingKind) -> usize {
        self.findings.iter().filter(|f| f.kind == kind).count()
    }

    /// Tracks with at least one finding, in order.
    pub fn tracks(&self) -> Vec<DiskCh> {
        let mut tracks: Vec<DiskCh> = self.findings.iter().map(|f| f.ch).collect();
        tracks.sort();
        tracks.dedup();
        tracks
    }
}

fn sector_findings(track: &TrackRecord, first: u8, spt: usize, out: &mut Vec<Finding>) {
    let ch = track.ch;
    let mut seen: VaultHashMap<u8, usize> = VaultHashMap::new();

    for (i, sector) in track.sectors.iter().enumerate() {
        let id = sector.id.s();
        let mut push = |kind| {
            out.push(Finding {
                ch,
                sector: Some(id),
                kind,
            })
        };

        if track.sector_weak_bits(i).is_present() {
            push(FindingKind::WeakBits);
        }
        if sector.status.has_bad_crc() {
            push(FindingKind::BadCrc);
        }
        if sector.status.deleted_mark {
            push(FindingKind::DeletedMark);
        }
        if sector.status.missing_data {
            push(FindingKind::MissingData);
        }
        if id < first || id as usize >= first as usize + spt {
            push(FindingKind::PhantomId);
        }
        let len = sector.data.len();
        if !DiskChsn::is_standard_size(len) || DiskChsn::n_to_bytes(sector.id.n()) != len {
            push(FindingKind::NonStandardSize);
        }

        let count = seen.entry(id).or_insert(0);
        *count += 1;
        if *count == 2 {
            push(FindingKind::DuplicateId);
        }
    }

    for id in (first as usize..first as usize + spt).filter_map(|s| u8::try_from(s).ok()) {
        if !seen.contains_key(&id) {
            out.push(Finding {
                ch,
                sector: Some(id),
                kind: FindingKind::MissingSector,
            });
        }
    }
}

/// A track filled with one repeated byte is a freshly formatted track; identical copies of those
/// are not interesting.
fn is_filler(track: &TrackRecord) -> bool {
    let mut bytes = track.sectors.iter().flat_map(|s| s.data.iter());
    match bytes.next() {
        Some(first) => bytes.all(|b| b == first),
        None => true,
    }
}

/// Inspect `image` for protection artifacts.
pub fn analyze(image: &DiskImage) -> ProtectionReport {
    let geometry = image.geometry();
    let spt = geometry.sectors_per_track as usize;
    let mut findings = Vec::new();
    let mut hashes: VaultHashMap<String, DiskCh> = VaultHashMap::new();

    for track in image.tracks() {
        if track.sectors.is_empty() {
            continue;
        }
        sector_findings(track, geometry.first_sector, spt, &mut findings);

        if !is_filler(track) {
            let hash = track.hash();
            if let Some(original) = hashes.get(&hash) {
                log::debug!("analyze(): track {} duplicates track {}", track.ch, original);
                findings.push(Finding {
                    ch: track.ch,
                    sector: None,
                    kind: FindingKind::DuplicateTrack,
                });
            }
            else {
                hashes.insert(hash, track.ch);
            }
        }
    }

    let scheme = identify(image, &findings);
    if let Some(scheme) = scheme {
        log::debug!("analyze(): {} findings, scheme: {}", findings.len(), scheme);
    }
    ProtectionReport { findings, scheme }
}

fn identify(image: &DiskImage, findings: &[Finding]) -> Option<ProtectionScheme> {
    for track in image.tracks() {
        let ch = track.ch;

        // Formaster CopyLock: sector 1 with size code 1 and a bad data CRC. A bad address CRC as
        // well marks version 2.
        if let Some(s) = track.sectors.iter().find(|s| s.id.s() == 1 && s.id.n() == 1) {
            if s.status.data_crc_error {
                return if s.status.address_crc_error {
                    Some(ProtectionScheme::FormasterCopyLock(2))
                }
                else {
                    Some(ProtectionScheme::FormasterCopyLock(1))
                };
            }
        }

        // Softguard Superlok: sector 1 with size code 6 and a bad CRC past cylinder 1.
        if ch.c() > 1
            && track
                .sectors
                .iter()
                .any(|s| s.id.s() == 1 && s.id.n() == 6 && s.status.data_crc_error)
        {
            return Some(ProtectionScheme::SoftguardSuperlok(1));
        }

        // EA Interlock: 96 sectors on one track.
        if track.sectors.len() == 96 {
            return Some(ProtectionScheme::EaInterlock(1));
        }
    }

    let atari_style = findings
        .iter()
        .any(|f| matches!(f.kind, FindingKind::WeakBits | FindingKind::DuplicateId));
    if atari_style && image.geometry().sector_size <= 256 {
        return Some(ProtectionScheme::AtariPhantomSectors);
    }

    let suspicious = findings.iter().any(|f| {
        matches!(
            f.kind,
            FindingKind::BadCrc | FindingKind::DeletedMark | FindingKind::DuplicateId | FindingKind::WeakBits
        )
    });
    suspicious.then_some(ProtectionScheme::Undetermined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        geometry::Geometry,
        image::SectorRecord,
        metadata::{SectorStatus, WeakBitRun},
    };

    fn numbered(geom: &Geometry) -> DiskImage {
        let raw: Vec<u8> = (0..geom.total_bytes()).map(|i| (i / geom.sector_size) as u8).collect();
        DiskImage::from_raw(geom, &raw).unwrap()
    }

    #[test]
    fn clean_image_has_no_findings() {
        let image = numbered(&Geometry::new(2, 1, 9, 512));
        let report = analyze(&image);
        assert!(report.is_clean());
        assert_eq!(report.scheme, None);
    }

    #[test]
    fn weak_and_duplicate_sectors() {
        let mut image = numbered(&Geometry::new(2, 1, 18, 128));
        image.set_geometry(None);
        let track = image.track_mut(DiskCh::new(1, 0)).unwrap();
        track.add_weak_run(WeakBitRun::from_bytes(128 * 4 + 10, 20)).unwrap();
        track.sectors[7].id.set_s(3);

        let report = analyze(&image);
        assert_eq!(report.count(FindingKind::WeakBits), 1);
        assert_eq!(report.count(FindingKind::DuplicateId), 1);
        assert_eq!(report.count(FindingKind::MissingSector), 1);
        assert_eq!(report.tracks(), vec![DiskCh::new(1, 0)]);
        assert_eq!(report.scheme, Some(ProtectionScheme::AtariPhantomSectors));
    }

    #[test]
    fn copylock_signature() {
        let mut image = numbered(&Geometry::new(1, 1, 9, 512));
        image.set_geometry(None);
        let track = image.track_mut(DiskCh::new(0, 0)).unwrap();
        track.sectors[0] = SectorRecord::new(DiskChsn::new(0, 0, 1, 1), vec![0u8; 256]).with_status(SectorStatus {
            data_crc_error: true,
            ..Default::default()
        });

        let report = analyze(&image);
        assert_eq!(report.scheme, Some(ProtectionScheme::FormasterCopyLock(1)));
        assert_eq!(report.count(FindingKind::BadCrc), 1);
    }

    #[test]
    fn blank_tracks_are_not_duplicates() {
        let geom = Geometry::new(3, 1, 4, 128);
        let image = DiskImage::from_raw(&geom, &vec![0xE5u8; geom.total_bytes()]).unwrap();
        assert_eq!(analyze(&image).count(FindingKind::DuplicateTrack), 0);

        let mut raw = vec![0u8; geom.total_bytes()];
        for track in raw.chunks_mut(4 * 128) {
            track[5] = 0x42;
        }
        let image = DiskImage::from_raw(&geom, &raw).unwrap();
        assert_eq!(analyze(&image).count(FindingKind::DuplicateTrack), 2);
    }
}
