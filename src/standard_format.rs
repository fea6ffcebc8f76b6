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

    src/standard_format.rs

    Represents the well-known disk layouts that can be stored as a flat
    sector dump with no header. A flat dump carries no description of
    itself, so its size is the only evidence of its geometry:

        Atari  90K  SD  40 x 1 x 18 x 128
        Atari 130K  ED  40 x 1 x 26 x 128
        Atari 180K  DD  40 x 1 x 18 x 256 (optionally with 128-byte boot sectors)
        Atari 360K  QD  40 x 2 x 18 x 256 (optionally with 128-byte boot sectors)
        Amiga 880K  DD  80 x 2 x 11 x 512 (sectors numbered from 0)
        Amiga 1.76M HD  80 x 2 x 22 x 512 (sectors numbered from 0)
        PC    160K .. 2.88M

    Some sizes are shared between platforms (an Atari DD image is exactly as
    large as a PC 180K image), so lookups return every candidate and callers
    may pass a platform hint.
*/

use std::fmt::{Display, Formatter};

use strum::{EnumIter, IntoEnumIterator};

use crate::geometry::{BootException, Geometry};

#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Platform {
    Atari8,
    Amiga,
    IbmPc,
}

/// An enumeration of standard flat-dump layouts.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StandardFormat {
    AtariSingleDensity,
    AtariEnhancedDensity,
    AtariDoubleDensity,
    AtariDoubleDensityShortBoot,
    AtariQuadDensity,
    AtariQuadDensityShortBoot,
    Amiga880,
    Amiga1760,
    PcFloppy160,
    PcFloppy180,
    PcFloppy320,
    PcFloppy360,
    PcFloppy720,
    PcFloppy1200,
    PcFloppy1440,
    PcFloppy2880,
}

impl Display for StandardFormat {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        use StandardFormat::*;
        let name = match self {
            AtariSingleDensity => "Atari 90K SD",
            AtariEnhancedDensity => "Atari 130K ED",
            AtariDoubleDensity => "Atari 180K DD",
            AtariDoubleDensityShortBoot => "Atari 180K DD (128-byte boot sectors)",
            AtariQuadDensity => "Atari 360K QD",
            AtariQuadDensityShortBoot => "Atari 360K QD (128-byte boot sectors)",
            Amiga880 => "Amiga 880K DD",
            Amiga1760 => "Amiga 1.76M HD",
            PcFloppy160 => "PC 160K",
            PcFloppy180 => "PC 180K",
            PcFloppy320 => "PC 320K",
            PcFloppy360 => "PC 360K",
            PcFloppy720 => "PC 720K",
            PcFloppy1200 => "PC 1.2M",
            PcFloppy1440 => "PC 1.44M",
            PcFloppy2880 => "PC 2.88M",
        };
        write!(f, "{}", name)
    }
}

impl StandardFormat {
    pub fn platform(&self) -> Platform {
        use StandardFormat::*;
        match self {
            AtariSingleDensity
            | AtariEnhancedDensity
            | AtariDoubleDensity
            | AtariDoubleDensityShortBoot
            | AtariQuadDensity
            | AtariQuadDensityShortBoot => Platform::Atari8,
            Amiga880 | Amiga1760 => Platform::Amiga,
            _ => Platform::IbmPc,
        }
    }

    pub fn geometry(&self) -> Geometry {
        use StandardFormat::*;
        match self {
            AtariSingleDensity => Geometry::new(40, 1, 18, 128),
            AtariEnhancedDensity => Geometry::new(40, 1, 26, 128),
            AtariDoubleDensity => Geometry::new(40, 1, 18, 256),
            AtariDoubleDensityShortBoot => Geometry::new(40, 1, 18, 256).with_boot_exception(BootException::ATARI),
            AtariQuadDensity => Geometry::new(40, 2, 18, 256),
            AtariQuadDensityShortBoot => Geometry::new(40, 2, 18, 256).with_boot_exception(BootException::ATARI),
            Amiga880 => Geometry::new(80, 2, 11, 512).with_first_sector(0),
            Amiga1760 => Geometry::new(80, 2, 22, 512).with_first_sector(0),
            PcFloppy160 => Geometry::new(40, 1, 8, 512),
            PcFloppy180 => Geometry::new(40, 1, 9, 512),
            PcFloppy320 => Geometry::new(40, 2, 8, 512),
            PcFloppy360 => Geometry::new(40, 2, 9, 512),
            PcFloppy720 => Geometry::new(80, 2, 9, 512),
            PcFloppy1200 => Geometry::new(80, 2, 15, 512),
            PcFloppy1440 => Geometry::new(80, 2, 18, 512),
            PcFloppy2880 => Geometry::new(80, 2, 36, 512),
        }
    }

    pub fn size(&self) -> usize {
        self.geometry().total_bytes()
    }

    /// Return every standard format whose image size is exactly `size` bytes, in table order.
    pub fn from_size(size: usize) -> Vec<StandardFormat> {
        StandardFormat::iter().filter(|f| f.size() == size).collect()
    }

    /// Return the best standard format for `size`. When several platforms share the size, a
    /// format of the hinted platform wins; without a hint, PC layouts win over Atari ones since
    /// they are by far the more common.
    pub fn best_for_size(size: usize, hint: Option<Platform>) -> Option<StandardFormat> {
        let candidates = StandardFormat::from_size(size);
        if let Some(platform) = hint {
            if let Some(f) = candidates.iter().find(|f| f.platform() == platform) {
                return Some(*f);
            }
        }
        candidates
            .iter()
            .find(|f| f.platform() == Platform::IbmPc)
            .or(candidates.first())
            .copied()
    }

    /// Return the geometry of a standard format matching `size`, if any.
    pub fn geometry_from_size(size: usize, hint: Option<Platform>) -> Option<Geometry> {
        StandardFormat::best_for_size(size, hint).map(|f| f.geometry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atari_sizes() {
        assert_eq!(StandardFormat::AtariSingleDensity.size(), 92_160);
        assert_eq!(StandardFormat::AtariEnhancedDensity.size(), 133_120);
        assert_eq!(StandardFormat::AtariDoubleDensity.size(), 184_320);
        assert_eq!(StandardFormat::AtariDoubleDensityShortBoot.size(), 183_936);
        assert_eq!(StandardFormat::AtariQuadDensity.size(), 368_640);
    }

    #[test]
    fn single_density_is_unambiguous() {
        assert_eq!(
            StandardFormat::from_size(92_160),
            vec![StandardFormat::AtariSingleDensity]
        );
    }

    #[test]
    fn shared_sizes_honor_platform_hint() {
        assert_eq!(
            StandardFormat::best_for_size(184_320, None),
            Some(StandardFormat::PcFloppy180)
        );
        assert_eq!(
            StandardFormat::best_for_size(184_320, Some(Platform::Atari8)),
            Some(StandardFormat::AtariDoubleDensity)
        );
    }

    #[test]
    fn unknown_size_has_no_geometry() {
        assert!(StandardFormat::geometry_from_size(12345, None).is_none());
    }
}
