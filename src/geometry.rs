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

    src/geometry.rs

    Uniform disk geometry and the arithmetic addressing that goes with it.

    Uniform formats (flat sector dumps and their header-prefixed variants)
    compute every sector offset from a Geometry. Irregular formats describe
    their layout with a list of TrackDescriptors built once at parse time.

    The boot exception models the Atari double density convention where the
    first three sectors of a 256-byte-per-sector image are still stored at
    128 bytes each.
*/

use std::fmt::Display;

use crate::{
    chs::{DiskCh, DiskChs},
    DiskImageError,
};

/// A fixed number of leading sectors stored at a size different from the nominal one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BootException {
    /// Number of leading sectors (in linear order) affected.
    pub sectors: u8,
    /// Stored size of each affected sector.
    pub size: usize,
}

impl BootException {
    /// The Atari convention: sectors 1-3 of a double density image are 128 bytes.
    pub const ATARI: BootException = BootException { sectors: 3, size: 128 };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Geometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
    pub sector_size: usize,
    /// The id of the first sector on each track. 1 for most formats, 0 for Amiga trackdisk.
    pub first_sector: u8,
    pub boot: Option<BootException>,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            cylinders: 40,
            heads: 1,
            sectors_per_track: 18,
            sector_size: 128,
            first_sector: 1,
            boot: None,
        }
    }
}

impl Display for Geometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}c {}h {}spt {}b",
            self.cylinders, self.heads, self.sectors_per_track, self.sector_size
        )?;
        if let Some(boot) = self.boot {
            write!(f, " (first {} sectors {}b)", boot.sectors, boot.size)?;
        }
        Ok(())
    }
}

impl Geometry {
    pub fn new(cylinders: u16, heads: u8, sectors_per_track: u8, sector_size: usize) -> Self {
        Geometry {
            cylinders,
            heads,
            sectors_per_track,
            sector_size,
            first_sector: 1,
            boot: None,
        }
    }

    pub fn with_first_sector(mut self, first_sector: u8) -> Self {
        self.first_sector = first_sector;
        self
    }

    pub fn with_boot_exception(mut self, boot: BootException) -> Self {
        self.boot = Some(boot);
        self
    }

    /// Reject geometries that cannot describe a disk.
    pub fn validate(&self) -> Result<(), DiskImageError> {
        if self.cylinders == 0 || self.heads == 0 || self.sectors_per_track == 0 {
            return Err(DiskImageError::ArgumentError(format!("degenerate geometry: {}", self)));
        }
        if self.sector_size == 0 || self.sector_size > crate::MAXIMUM_SECTOR_SIZE {
            return Err(DiskImageError::ArgumentError(format!(
                "unsupported sector size: {}",
                self.sector_size
            )));
        }
        if self.first_sector as usize + self.sectors_per_track as usize > 256 {
            return Err(DiskImageError::ArgumentError(
                "sector ids would exceed 255".to_string(),
            ));
        }
        if let Some(boot) = self.boot {
            if boot.size == 0 || boot.sectors as usize > self.total_sectors() {
                return Err(DiskImageError::ArgumentError(format!(
                    "invalid boot exception for geometry {}",
                    self
                )));
            }
        }
        Ok(())
    }

    pub fn track_count(&self) -> usize {
        self.cylinders as usize * self.heads as usize
    }

    pub fn total_sectors(&self) -> usize {
        self.track_count() * self.sectors_per_track as usize
    }

    pub fn total_bytes(&self) -> usize {
        let total = self.total_sectors() * self.sector_size;
        match self.boot {
            Some(boot) => total - (boot.sectors as usize * self.sector_size) + (boot.sectors as usize * boot.size),
            None => total,
        }
    }

    /// Convert an address to a 0-based linear sector index.
    ///
    /// Sector ids below `first_sector` are rejected rather than wrapped, so sector 0 is a range
    /// error on formats that number sectors from 1.
    pub fn chs_to_linear(&self, chs: DiskChs) -> Result<usize, DiskImageError> {
        if chs.c() >= self.cylinders || chs.h() >= self.heads {
            return Err(DiskImageError::RangeError(format!(
                "track {} outside geometry {}",
                chs.ch(),
                self
            )));
        }
        let last_sector = self.first_sector as usize + self.sectors_per_track as usize;
        if (chs.s() as usize) < self.first_sector as usize || (chs.s() as usize) >= last_sector {
            return Err(DiskImageError::RangeError(format!(
                "sector id {} outside {}..{}",
                chs.s(),
                self.first_sector,
                last_sector
            )));
        }
        let track = DiskCh::from(chs).track_number(self.heads);
        Ok(track * self.sectors_per_track as usize + (chs.s() - self.first_sector) as usize)
    }

    /// Convert a 0-based linear sector index back into an address.
    pub fn linear_to_chs(&self, index: usize) -> Result<DiskChs, DiskImageError> {
        if index >= self.total_sectors() {
            return Err(DiskImageError::RangeError(format!(
                "linear sector {} beyond {} sectors",
                index,
                self.total_sectors()
            )));
        }
        let spt = self.sectors_per_track as usize;
        let ch = DiskCh::from_track_number(index / spt, self.heads);
        Ok(DiskChs::from((ch, (index % spt) as u8 + self.first_sector)))
    }

    /// Return the stored size of the sector at the given linear index.
    pub fn linear_byte_length(&self, index: usize) -> usize {
        match self.boot {
            Some(boot) if index < boot.sectors as usize => boot.size,
            _ => self.sector_size,
        }
    }

    /// Return the byte offset of the sector at the given linear index, relative to the start of
    /// sector data.
    pub fn linear_byte_offset(&self, index: usize) -> usize {
        match self.boot {
            Some(boot) if index < boot.sectors as usize => index * boot.size,
            Some(boot) => {
                boot.sectors as usize * boot.size + (index - boot.sectors as usize) * self.sector_size
            }
            None => index * self.sector_size,
        }
    }

    pub fn sector_byte_offset(&self, chs: DiskChs) -> Result<usize, DiskImageError> {
        let index = self.chs_to_linear(chs)?;
        Ok(self.linear_byte_offset(index))
    }

    pub fn sector_byte_length(&self, chs: DiskChs) -> Result<usize, DiskImageError> {
        let index = self.chs_to_linear(chs)?;
        Ok(self.linear_byte_length(index))
    }
}

/// Locates one track's data inside a track-table container.
///
/// Track-table parsers build a `Vec<TrackDescriptor>` from the container's header before reading
/// any sector data, and then resolve every sector by walking this list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub ch: DiskCh,
    /// Offset of the track record in the container.
    pub offset: usize,
    /// Length of the track record, if the container declares one.
    pub length: Option<usize>,
    pub sector_ct: usize,
}

impl TrackDescriptor {
    pub fn new(ch: DiskCh, offset: usize, length: Option<usize>, sector_ct: usize) -> Self {
        TrackDescriptor {
            ch,
            offset,
            length,
            sector_ct,
        }
    }

    /// Return the end of the track record, checked against the container length.
    pub fn end(&self, container_len: usize) -> Result<usize, DiskImageError> {
        let end = self.offset + self.length.unwrap_or(0);
        if self.offset > container_len || end > container_len {
            return Err(DiskImageError::FormatError(format!(
                "track {} record {:#X}..{:#X} exceeds image size {:#X}",
                self.ch, self.offset, end, container_len
            )));
        }
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn atari_dd() -> Geometry {
        Geometry::new(40, 1, 18, 256).with_boot_exception(BootException::ATARI)
    }

    #[test]
    fn linear_addressing_round_trips() {
        let geom = Geometry::new(80, 2, 9, 512);
        let chs = DiskChs::new(2, 1, 5);
        let lba = geom.chs_to_linear(chs).unwrap();
        assert_eq!(lba, 49);
        assert_eq!(geom.linear_to_chs(lba).unwrap(), chs);
    }

    #[test]
    fn sector_zero_is_rejected() {
        let geom = Geometry::new(40, 1, 18, 128);
        let result = geom.chs_to_linear(DiskChs::new(0, 0, 0));
        assert!(matches!(result, Err(DiskImageError::RangeError(_))));
        let result = geom.chs_to_linear(DiskChs::new(0, 0, 19));
        assert!(matches!(result, Err(DiskImageError::RangeError(_))));
    }

    #[test]
    fn sector_zero_is_valid_when_numbering_starts_at_zero() {
        let geom = Geometry::new(80, 2, 11, 512).with_first_sector(0);
        assert_eq!(geom.chs_to_linear(DiskChs::new(0, 1, 0)).unwrap(), 11);
        assert_eq!(geom.linear_to_chs(21).unwrap(), DiskChs::new(0, 1, 10));
    }

    #[test]
    fn boot_exception_offsets() {
        let geom = atari_dd();
        assert_eq!(geom.total_bytes(), 183_936);
        assert_eq!(geom.sector_byte_length(DiskChs::new(0, 0, 1)).unwrap(), 128);
        assert_eq!(geom.sector_byte_length(DiskChs::new(0, 0, 3)).unwrap(), 128);
        assert_eq!(geom.sector_byte_length(DiskChs::new(0, 0, 4)).unwrap(), 256);
        assert_eq!(geom.sector_byte_offset(DiskChs::new(0, 0, 3)).unwrap(), 256);
        assert_eq!(geom.sector_byte_offset(DiskChs::new(0, 0, 4)).unwrap(), 384);
        assert_eq!(geom.sector_byte_offset(DiskChs::new(1, 0, 1)).unwrap(), 384 + 15 * 256);
    }

    #[test]
    fn out_of_range_track_is_rejected() {
        let geom = Geometry::new(40, 1, 18, 128);
        assert!(geom.chs_to_linear(DiskChs::new(40, 0, 1)).is_err());
        assert!(geom.chs_to_linear(DiskChs::new(0, 1, 1)).is_err());
        assert!(geom.linear_to_chs(720).is_err());
    }

    #[test]
    fn degenerate_geometry_fails_validation() {
        assert!(Geometry::new(0, 1, 18, 128).validate().is_err());
        assert!(Geometry::new(40, 1, 18, 0).validate().is_err());
        assert!(atari_dd().validate().is_ok());
    }
}
