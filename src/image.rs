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

    src/image.rs

    The in-memory disk image every parser loads into and every parser
    saves from. A DiskImage is a list of tracks, each holding the sectors in
    the order they appeared in the container, plus whatever preservation
    metadata the container carried.
*/

use crate::{
    chs::{DiskCh, DiskChs, DiskChsn},
    file_parsers::DiskImageFileFormat,
    geometry::Geometry,
    metadata::{SectorMetadata, SectorStatus, Timing, TrackMetadata, WeakBitRun, WeakBits},
    util::alloc_buffer,
    DiskDataEncoding,
    DiskDataRate,
    DiskDensity,
    DiskImageError,
    VaultHashMap,
};

/// The maximum number of heads a track can be indexed with.
pub const MAX_HEADS: usize = 2;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SectorRecord {
    /// The sector id as recorded in the sector header.
    pub id: DiskChsn,
    pub data: Vec<u8>,
    pub status: SectorStatus,
    /// Angular position of the sector header, if the container records one.
    pub position: Option<u16>,
}

impl SectorRecord {
    pub fn new(id: DiskChsn, data: Vec<u8>) -> Self {
        SectorRecord {
            id,
            data,
            status: SectorStatus::default(),
            position: None,
        }
    }

    pub fn with_status(mut self, status: SectorStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_position(mut self, position: Option<u16>) -> Self {
        self.position = position;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackRecord {
    pub ch: DiskCh,
    pub encoding: DiskDataEncoding,
    pub data_rate: DiskDataRate,
    pub timing: Timing,
    weak_bits: WeakBits,
    pub sectors: Vec<SectorRecord>,
}

impl TrackRecord {
    pub fn new(ch: DiskCh, encoding: DiskDataEncoding, data_rate: DiskDataRate) -> Self {
        TrackRecord {
            ch,
            encoding,
            data_rate,
            ..Default::default()
        }
    }

    pub fn add_sector(&mut self, sector: SectorRecord) {
        self.sectors.push(sector);
    }

    /// Length of the track's decoded data stream, in bits.
    pub fn bit_len(&self) -> usize {
        self.sectors.iter().map(|s| s.data.len() * 8).sum()
    }

    /// Bit offset of a sector's payload within the track's decoded data stream.
    pub fn sector_bit_offset(&self, index: usize) -> usize {
        self.sectors.iter().take(index).map(|s| s.data.len() * 8).sum()
    }

    /// Return the index of the first sector with the given id.
    pub fn sector_index(&self, sector_id: u8) -> Option<usize> {
        self.sectors.iter().position(|s| s.id.s() == sector_id)
    }

    pub fn weak_bits(&self) -> &WeakBits {
        &self.weak_bits
    }

    /// Replace the track's weak bit runs. Every run must lie within the track.
    pub fn set_weak_bits(&mut self, weak_bits: WeakBits) -> Result<(), DiskImageError> {
        weak_bits.validate(self.bit_len())?;
        self.weak_bits = weak_bits;
        Ok(())
    }

    pub fn add_weak_run(&mut self, run: WeakBitRun) -> Result<(), DiskImageError> {
        let mut runs = self.weak_bits.runs().to_vec();
        runs.push(run);
        runs.sort_by_key(|r| r.bit_offset);
        self.set_weak_bits(WeakBits::Runs(runs))
    }

    /// Return the weak bit runs overlapping a sector, relative to the start of its payload.
    pub fn sector_weak_bits(&self, index: usize) -> WeakBits {
        let Some(sector) = self.sectors.get(index)
        else {
            return WeakBits::Absent;
        };
        let start = self.sector_bit_offset(index);
        let end = start + sector.data.len() * 8;
        let runs: Vec<WeakBitRun> = self.weak_bits.runs().iter().filter_map(|r| r.clip(start, end)).collect();
        if runs.is_empty() {
            WeakBits::Absent
        }
        else {
            WeakBits::Runs(runs)
        }
    }

    pub fn sector_metadata(&self, index: usize) -> Option<SectorMetadata> {
        let sector = self.sectors.get(index)?;
        Some(SectorMetadata {
            status: sector.status,
            weak_bits: self.sector_weak_bits(index),
            timing: self.timing,
            position: sector.position,
        })
    }

    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            weak_bits: self.weak_bits.clone(),
            timing: self.timing,
            bit_len: self.bit_len(),
            bad_crc_sectors: self.sectors.iter().filter(|s| s.status.has_bad_crc()).count(),
            deleted_sectors: self.sectors.iter().filter(|s| s.status.deleted_mark).count(),
            positioned_sectors: self.sectors.iter().filter(|s| s.position.is_some()).count(),
        }
    }

    /// Return the indices of the track's sectors ordered by sector id. Sectors sharing an id keep
    /// their recorded order.
    pub fn address_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.sectors.len()).collect();
        order.sort_by_key(|&i| self.sectors[i].id.s());
        order
    }

    /// A SHA1 fingerprint of the track's sector payloads, in address order.
    pub fn hash(&self) -> String {
        let mut hasher = sha1_smol::Sha1::new();
        for i in self.address_order() {
            hasher.update(&self.sectors[i].data);
        }
        hasher.digest().to_string()
    }
}

/// Descriptive information about an image that is not tied to any track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageInfo {
    pub comment: Option<String>,
    /// Header or creator text identifying the software that wrote the image.
    pub creator: Option<String>,
    pub name: Option<String>,
    pub write_protected: bool,
    pub density: Option<DiskDensity>,
}

#[derive(Clone, Debug, Default)]
pub struct DiskImage {
    pub info: ImageInfo,
    source_format: Option<DiskImageFileFormat>,
    geometry: Option<Geometry>,
    tracks: Vec<TrackRecord>,
    track_map: Vec<Option<usize>>,
}

impl DiskImage {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn source_format(&self) -> Option<DiskImageFileFormat> {
        self.source_format
    }

    pub fn set_source_format(&mut self, format: DiskImageFileFormat) {
        self.source_format = Some(format);
    }

    /// Build an image from a flat sector stream laid out per `geometry`. The stream length must
    /// match the geometry exactly.
    pub fn from_raw(geometry: &Geometry, raw: &[u8]) -> Result<DiskImage, DiskImageError> {
        geometry.validate()?;
        if raw.len() != geometry.total_bytes() {
            return Err(DiskImageError::FormatError(format!(
                "raw stream of {} bytes does not match geometry {} ({} bytes)",
                raw.len(),
                geometry,
                geometry.total_bytes()
            )));
        }

        let mut image = DiskImage::new();
        let density = match geometry.sector_size {
            128 => DiskDensity::Standard,
            _ => DiskDensity::Double,
        };
        let encoding = match density {
            DiskDensity::Standard => DiskDataEncoding::Fm,
            _ => DiskDataEncoding::Mfm,
        };
        for t in 0..geometry.track_count() {
            let ch = DiskCh::from_track_number(t, geometry.heads);
            let mut track = TrackRecord::new(ch, encoding, DiskDataRate::from(density));
            for s in 0..geometry.sectors_per_track {
                let chs = DiskChs::from((ch, geometry.first_sector + s));
                let index = geometry.chs_to_linear(chs)?;
                let offset = geometry.linear_byte_offset(index);
                let len = geometry.linear_byte_length(index);
                let id = DiskChsn::from((chs, DiskChsn::bytes_to_n(len)));
                track.add_sector(SectorRecord::new(id, raw[offset..offset + len].to_vec()));
            }
            image.add_track(track)?;
        }
        image.info.density = Some(density);
        image.geometry = Some(*geometry);
        Ok(image)
    }

    /// Emit the flat linear sector stream: tracks in cylinder/head order, sectors by id.
    pub fn to_raw(&self) -> Result<Vec<u8>, DiskImageError> {
        let total: usize = self.tracks.iter().flat_map(|t| t.sectors.iter()).map(|s| s.data.len()).sum();
        let mut raw = alloc_buffer(total)?;
        for track in &self.tracks {
            for i in track.address_order() {
                raw.extend_from_slice(&track.sectors[i].data);
            }
        }
        Ok(raw)
    }

    fn map_index(ch: DiskCh) -> Result<usize, DiskImageError> {
        if ch.h() as usize >= MAX_HEADS {
            return Err(DiskImageError::FormatError(format!("unsupported head number {}", ch.h())));
        }
        Ok(ch.c() as usize * MAX_HEADS + ch.h() as usize)
    }

    fn rebuild_map(&mut self) {
        self.track_map.clear();
        for (i, track) in self.tracks.iter().enumerate() {
            // Heads were checked on insertion.
            let idx = track.ch.c() as usize * MAX_HEADS + track.ch.h() as usize;
            if idx >= self.track_map.len() {
                self.track_map.resize(idx + 1, None);
            }
            self.track_map[idx] = Some(i);
        }
    }

    /// Add a track, keeping tracks in cylinder/head order. A second track with the same
    /// cylinder and head is a format error.
    pub fn add_track(&mut self, track: TrackRecord) -> Result<&mut TrackRecord, DiskImageError> {
        let ch = track.ch;
        Self::map_index(ch)?;
        if self.track_index(ch).is_some() {
            return Err(DiskImageError::FormatError(format!("duplicate track {}", ch)));
        }
        let pos = self.tracks.partition_point(|t| t.ch < ch);
        self.tracks.insert(pos, track);
        self.rebuild_map();
        Ok(&mut self.tracks[pos])
    }

    pub fn track_index(&self, ch: DiskCh) -> Option<usize> {
        let idx = Self::map_index(ch).ok()?;
        self.track_map.get(idx).copied().flatten()
    }

    pub fn track(&self, ch: DiskCh) -> Option<&TrackRecord> {
        self.track_index(ch).and_then(|i| self.tracks.get(i))
    }

    pub fn track_mut(&mut self, ch: DiskCh) -> Option<&mut TrackRecord> {
        self.track_index(ch).and_then(|i| self.tracks.get_mut(i))
    }

    pub fn tracks(&self) -> &[TrackRecord] {
        &self.tracks
    }

    pub fn track_ct(&self) -> usize {
        self.tracks.len()
    }

    /// Total addressable sectors: the sum of each track's sector count.
    pub fn total_sectors(&self) -> usize {
        self.tracks.iter().map(|t| t.sectors.len()).sum()
    }

    /// Every sector id in address order.
    pub fn sector_addresses(&self) -> Vec<DiskChsn> {
        let mut ids = Vec::with_capacity(self.total_sectors());
        for track in &self.tracks {
            for i in track.address_order() {
                let id = track.sectors[i].id;
                // Address by the physical track, not whatever cylinder the id field claims.
                ids.push(DiskChsn::new(track.ch.c(), track.ch.h(), id.s(), id.n()));
            }
        }
        ids
    }

    /// Return the geometry the image was built with, or a nominal geometry derived from its
    /// tracks: the highest cylinder and head, the largest sector count and the most common
    /// sector size.
    pub fn geometry(&self) -> Geometry {
        if let Some(geometry) = self.geometry {
            return geometry;
        }
        let cylinders = self.tracks.iter().map(|t| t.ch.c() + 1).max().unwrap_or(0);
        let heads = self.tracks.iter().map(|t| t.ch.h() + 1).max().unwrap_or(0);
        let spt = self.tracks.iter().map(|t| t.sectors.len()).max().unwrap_or(0);
        let first_sector = self
            .tracks
            .iter()
            .flat_map(|t| t.sectors.iter())
            .map(|s| s.id.s())
            .min()
            .unwrap_or(1);

        let mut sizes: VaultHashMap<usize, usize> = VaultHashMap::new();
        for sector in self.tracks.iter().flat_map(|t| t.sectors.iter()) {
            *sizes.entry(sector.data.len()).or_insert(0) += 1;
        }
        let sector_size = sizes
            .into_iter()
            .max_by_key(|(size, count)| (*count, *size))
            .map(|(size, _)| size)
            .unwrap_or(crate::DEFAULT_SECTOR_SIZE);

        Geometry::new(cylinders, heads, spt.min(255) as u8, sector_size).with_first_sector(first_sector)
    }

    /// Override the image geometry. Used by uniform parsers after validating their layout.
    pub fn set_geometry(&mut self, geometry: Option<Geometry>) {
        self.geometry = geometry;
    }

    /// Return true if every track matches the image geometry exactly: the full run of sector
    /// ids, each at the size the geometry gives it.
    pub fn is_uniform(&self) -> bool {
        let geom = self.geometry();
        if geom.validate().is_err() || self.tracks.len() != geom.track_count() {
            return false;
        }
        self.tracks.iter().all(|track| {
            track.sectors.len() == geom.sectors_per_track as usize
                && track.sectors.iter().all(|s| {
                    geom.sector_byte_length(DiskChs::from((track.ch, s.id.s())))
                        .map(|len| len == s.data.len())
                        .unwrap_or(false)
                })
        })
    }

    /// Locate a sector by physical track and sector id.
    pub fn find_sector(&self, chs: DiskChs) -> Result<(usize, usize), DiskImageError> {
        let ti = self
            .track_index(chs.ch())
            .ok_or_else(|| DiskImageError::RangeError(format!("no track {}", chs.ch())))?;
        let si = self.tracks[ti]
            .sector_index(chs.s())
            .ok_or_else(|| DiskImageError::RangeError(format!("no sector {} on track {}", chs.s(), chs.ch())))?;
        Ok((ti, si))
    }

    /// Copy a sector's payload into `out`. `out` is left untouched on error.
    pub fn read_sector(&self, chs: DiskChs, out: &mut [u8]) -> Result<(usize, SectorMetadata), DiskImageError> {
        let (ti, si) = self.find_sector(chs)?;
        let track = &self.tracks[ti];
        let sector = &track.sectors[si];
        if out.len() < sector.data.len() {
            return Err(DiskImageError::RangeError(format!(
                "buffer of {} bytes too small for {} byte sector {}",
                out.len(),
                sector.data.len(),
                chs
            )));
        }
        out[..sector.data.len()].copy_from_slice(&sector.data);
        let metadata = track.sector_metadata(si).unwrap_or_default();
        Ok((sector.data.len(), metadata))
    }

    /// Replace a sector's payload. The new payload must be exactly the sector's length.
    pub fn write_sector(&mut self, chs: DiskChs, data: &[u8]) -> Result<usize, DiskImageError> {
        let (ti, si) = self.find_sector(chs)?;
        let sector = &mut self.tracks[ti].sectors[si];
        if data.len() != sector.data.len() {
            return Err(DiskImageError::RangeError(format!(
                "sector {} is {} bytes, got {}",
                chs,
                sector.data.len(),
                data.len()
            )));
        }
        sector.data.copy_from_slice(data);
        Ok(data.len())
    }

    pub fn track_metadata(&self, ch: DiskCh) -> Option<TrackMetadata> {
        self.track(ch).map(|t| t.metadata())
    }

    /// The SHA1 fingerprint of a track's payloads. See [TrackRecord::hash].
    pub fn track_hash(&self, ch: DiskCh) -> Option<String> {
        self.track(ch).map(|t| t.hash())
    }

    pub fn sector_metadata(&self, chs: DiskChs) -> Result<SectorMetadata, DiskImageError> {
        let (ti, si) = self.find_sector(chs)?;
        Ok(self.tracks[ti].sector_metadata(si).unwrap_or_default())
    }

    /// True if any track carries weak bits, timing, bad CRCs or deleted marks.
    pub fn has_preservation_metadata(&self) -> bool {
        self.tracks.iter().any(|t| !t.metadata().present_fields().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BootException;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i / 128) as u8).collect()
    }

    #[test]
    fn raw_round_trip_with_boot_exception() {
        let geom = Geometry::new(40, 1, 18, 256).with_boot_exception(BootException::ATARI);
        let raw = pattern(geom.total_bytes());
        let image = DiskImage::from_raw(&geom, &raw).unwrap();
        assert_eq!(image.total_sectors(), 720);
        assert_eq!(image.to_raw().unwrap(), raw);
        assert!(image.is_uniform());

        let mut buf = [0u8; 256];
        let (n, _) = image.read_sector(DiskChs::new(0, 0, 3), &mut buf).unwrap();
        assert_eq!(n, 128);
        let (n, _) = image.read_sector(DiskChs::new(0, 0, 4), &mut buf).unwrap();
        assert_eq!(n, 256);
    }

    #[test]
    fn raw_length_must_match_geometry() {
        let geom = Geometry::new(40, 1, 18, 128);
        let result = DiskImage::from_raw(&geom, &[0u8; 1000]);
        assert!(matches!(result, Err(DiskImageError::FormatError(_))));
    }

    #[test]
    fn failed_read_leaves_buffer_untouched() {
        let geom = Geometry::new(1, 1, 2, 128);
        let image = DiskImage::from_raw(&geom, &[0xAA; 256]).unwrap();
        let mut small = [0x55u8; 64];
        assert!(image.read_sector(DiskChs::new(0, 0, 1), &mut small).is_err());
        assert!(small.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn write_length_must_match() {
        let geom = Geometry::new(1, 1, 2, 128);
        let mut image = DiskImage::from_raw(&geom, &[0u8; 256]).unwrap();
        assert!(image.write_sector(DiskChs::new(0, 0, 2), &[1u8; 127]).is_err());
        assert_eq!(image.write_sector(DiskChs::new(0, 0, 2), &[1u8; 128]).unwrap(), 128);
        assert_eq!(image.to_raw().unwrap()[128..], [1u8; 128]);
    }

    #[test]
    fn weak_runs_are_bounded_by_track() {
        let mut track = TrackRecord::new(DiskCh::new(0, 0), DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps);
        track.add_sector(SectorRecord::new(DiskChsn::new(0, 0, 1, 1), vec![0; 256]));
        track.add_sector(SectorRecord::new(DiskChsn::new(0, 0, 2, 1), vec![0; 256]));
        assert!(track.add_weak_run(WeakBitRun::from_bytes(300, 12)).is_ok());
        assert!(track.add_weak_run(WeakBitRun::from_bytes(500, 13)).is_err());

        assert_eq!(track.sector_weak_bits(0), WeakBits::Absent);
        assert_eq!(
            track.sector_weak_bits(1),
            WeakBits::Runs(vec![WeakBitRun::from_bytes(44, 12)])
        );
    }

    #[test]
    fn tracks_are_kept_in_order() {
        let mut image = DiskImage::new();
        for ch in [DiskCh::new(1, 0), DiskCh::new(0, 1), DiskCh::new(0, 0)] {
            image
                .add_track(TrackRecord::new(ch, DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps))
                .unwrap();
        }
        let order: Vec<DiskCh> = image.tracks().iter().map(|t| t.ch).collect();
        assert_eq!(order, vec![DiskCh::new(0, 0), DiskCh::new(0, 1), DiskCh::new(1, 0)]);
        assert!(image
            .add_track(TrackRecord::new(DiskCh::new(0, 1), DiskDataEncoding::Mfm, DiskDataRate::Rate250Kbps))
            .is_err());
    }
}
