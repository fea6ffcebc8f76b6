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

    src/metadata.rs

    The preservation metadata vocabulary shared by every format parser.

    A parser fills in whatever its container can represent and leaves the
    rest at the 'absent' default. Absence is always an explicit variant, so
    a track with no weak bit information is never confused with a track
    that was checked and found to have none.
*/

use bit_vec::BitVec;
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{file_parsers::FormatCaps, DiskImageError};

/// A run of weak (physically unstable) bits, expressed in bits from the start of a track's
/// decoded data stream, or from the start of a sector when returned by sector level accessors.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WeakBitRun {
    pub bit_offset: usize,
    pub bit_len: usize,
}

impl WeakBitRun {
    pub fn new(bit_offset: usize, bit_len: usize) -> Self {
        WeakBitRun { bit_offset, bit_len }
    }

    /// Build a run covering whole bytes.
    pub fn from_bytes(byte_offset: usize, byte_len: usize) -> Self {
        WeakBitRun {
            bit_offset: byte_offset * 8,
            bit_len: byte_len * 8,
        }
    }

    pub fn end(&self) -> usize {
        self.bit_offset + self.bit_len
    }

    /// Return the portion of this run that overlaps `start..end`, rebased to `start`.
    pub fn clip(&self, start: usize, end: usize) -> Option<WeakBitRun> {
        let lo = self.bit_offset.max(start);
        let hi = self.end().min(end);
        (lo < hi).then(|| WeakBitRun::new(lo - start, hi - lo))
    }
}

/// Weak bit information for a track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WeakBits {
    /// The container does not carry weak bit information for this track.
    #[default]
    Absent,
    /// The container recorded these weak bit runs.
    Runs(Vec<WeakBitRun>),
}

impl WeakBits {
    pub fn runs(&self) -> &[WeakBitRun] {
        match self {
            WeakBits::Absent => &[],
            WeakBits::Runs(runs) => runs,
        }
    }

    pub fn is_present(&self) -> bool {
        !self.runs().is_empty()
    }

    /// Check every run against the track's bit length.
    pub fn validate(&self, track_bits: usize) -> Result<(), DiskImageError> {
        for run in self.runs() {
            if run.bit_len == 0 || run.end() > track_bits {
                return Err(DiskImageError::RangeError(format!(
                    "weak bit run {}+{} outside track of {} bits",
                    run.bit_offset, run.bit_len, track_bits
                )));
            }
        }
        Ok(())
    }

    /// Expand the run list into a bit mask the length of the track.
    pub fn to_mask(&self, track_bits: usize) -> BitVec {
        let mut mask = BitVec::from_elem(track_bits, false);
        for run in self.runs() {
            for bit in run.bit_offset..run.end().min(track_bits) {
                mask.set(bit, true);
            }
        }
        mask
    }

    /// Collapse a bit mask back into runs. Returns `Absent` if no bit is set.
    pub fn from_mask(mask: &BitVec) -> WeakBits {
        let mut runs = Vec::new();
        let mut start = None;
        for (i, bit) in mask.iter().enumerate() {
            match (bit, start) {
                (true, None) => start = Some(i),
                (false, Some(s)) => {
                    runs.push(WeakBitRun::new(s, i - s));
                    start = None;
                }
                _ => {}
            }
        }
        if let Some(s) = start {
            runs.push(WeakBitRun::new(s, mask.len() - s));
        }
        if runs.is_empty() {
            WeakBits::Absent
        }
        else {
            WeakBits::Runs(runs)
        }
    }
}

/// Bit-cell timing information for a track.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Timing {
    #[default]
    Absent,
    /// Nominal bit-cell duration in nanoseconds.
    BitCell { nanos: u32 },
}

impl Timing {
    pub fn is_present(&self) -> bool {
        matches!(self, Timing::BitCell { .. })
    }
}

/// Status flags recorded for a sector by the controller that read it.
///
/// The flags are descriptive only. A sector with a bad CRC still carries the payload bytes that
/// were read.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorStatus {
    pub deleted_mark: bool,
    pub address_crc_error: bool,
    pub data_crc_error: bool,
    /// The sector id was found but no data was recorded. The payload is zero filled.
    pub missing_data: bool,
}

impl SectorStatus {
    pub fn has_bad_crc(&self) -> bool {
        self.address_crc_error || self.data_crc_error
    }

    pub fn is_clean(&self) -> bool {
        *self == SectorStatus::default()
    }
}

/// Names of metadata fields that a destination format may be unable to represent.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumIter, EnumString, IntoStaticStr)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetadataField {
    #[strum(serialize = "weak-bits")]
    WeakBits,
    #[strum(serialize = "timing")]
    Timing,
    #[strum(serialize = "bad-crc")]
    BadCrc,
    #[strum(serialize = "deleted-mark")]
    DeletedMark,
}

impl MetadataField {
    /// Return the capability a format must have to represent this field.
    pub fn required_caps(&self) -> FormatCaps {
        match self {
            MetadataField::WeakBits => FormatCaps::CAP_WEAK_BITS,
            MetadataField::Timing => FormatCaps::CAP_TIMING,
            MetadataField::BadCrc => FormatCaps::CAP_DATA_CRC,
            MetadataField::DeletedMark => FormatCaps::CAP_DATA_DELETED,
        }
    }
}

/// Metadata returned alongside a sector read.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SectorMetadata {
    pub status: SectorStatus,
    /// Weak bit runs relative to the start of the sector payload.
    pub weak_bits: WeakBits,
    /// The track this sector lives on carries timing information.
    pub timing: Timing,
    /// Angular position of the sector header, in container specific units.
    pub position: Option<u16>,
}

impl SectorMetadata {
    pub fn has_weak_bits(&self) -> bool {
        self.weak_bits.is_present()
    }
}

/// Summary of the metadata present on a track.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrackMetadata {
    pub weak_bits: WeakBits,
    pub timing: Timing,
    pub bit_len: usize,
    pub bad_crc_sectors: usize,
    pub deleted_sectors: usize,
    pub positioned_sectors: usize,
}

impl TrackMetadata {
    pub fn has_weak_bits(&self) -> bool {
        self.weak_bits.is_present()
    }
    pub fn has_timing(&self) -> bool {
        self.timing.is_present() || self.positioned_sectors > 0
    }
    pub fn has_bad_crc(&self) -> bool {
        self.bad_crc_sectors > 0
    }
    pub fn has_deleted(&self) -> bool {
        self.deleted_sectors > 0
    }

    /// Return the fields present on this track, in a stable order.
    pub fn present_fields(&self) -> Vec<MetadataField> {
        let mut fields = Vec::new();
        if self.has_weak_bits() {
            fields.push(MetadataField::WeakBits);
        }
        if self.has_timing() {
            fields.push(MetadataField::Timing);
        }
        if self.has_bad_crc() {
            fields.push(MetadataField::BadCrc);
        }
        if self.has_deleted() {
            fields.push(MetadataField::DeletedMark);
        }
        fields
    }

    /// Return the fields present on this track that a format with `caps` cannot represent.
    /// The track is lossy for that format whenever this list is non-empty.
    pub fn dropped_fields(&self, caps: FormatCaps) -> Vec<MetadataField> {
        self.present_fields()
            .into_iter()
            .filter(|f| !caps.contains(f.required_caps()))
            .collect()
    }

    pub fn is_lossy_for(&self, caps: FormatCaps) -> bool {
        !self.dropped_fields(caps).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn field_names() {
        assert_eq!(MetadataField::WeakBits.to_string(), "weak-bits");
        assert_eq!(MetadataField::from_str("bad-crc").unwrap(), MetadataField::BadCrc);
    }

    #[test]
    fn weak_mask_round_trip() {
        let weak = WeakBits::Runs(vec![WeakBitRun::new(3, 5), WeakBitRun::new(20, 4)]);
        let mask = weak.to_mask(32);
        assert!(mask.get(3).unwrap());
        assert!(!mask.get(8).unwrap());
        assert_eq!(WeakBits::from_mask(&mask), weak);
    }

    #[test]
    fn empty_mask_is_absent() {
        let mask = BitVec::from_elem(16, false);
        assert_eq!(WeakBits::from_mask(&mask), WeakBits::Absent);
    }

    #[test]
    fn run_bounds_are_checked() {
        let weak = WeakBits::Runs(vec![WeakBitRun::new(1000, 24)]);
        assert!(weak.validate(1024).is_ok());
        assert!(weak.validate(1023).is_err());
    }

    #[test]
    fn clip_rebases_to_window() {
        let run = WeakBitRun::new(100, 50);
        assert_eq!(run.clip(120, 200), Some(WeakBitRun::new(0, 30)));
        assert_eq!(run.clip(0, 100), None);
    }

    #[test]
    fn lossy_predicate_names_fields() {
        let meta = TrackMetadata {
            weak_bits: WeakBits::Runs(vec![WeakBitRun::new(0, 8)]),
            bad_crc_sectors: 1,
            ..Default::default()
        };
        assert_eq!(
            meta.dropped_fields(FormatCaps::empty()),
            vec![MetadataField::WeakBits, MetadataField::BadCrc]
        );
        assert_eq!(
            meta.dropped_fields(FormatCaps::CAP_DATA_CRC),
            vec![MetadataField::WeakBits]
        );
        assert!(!meta.is_lossy_for(FormatCaps::CAP_DATA_CRC | FormatCaps::CAP_WEAK_BITS));
    }
}
