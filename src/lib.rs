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
*/

//! # fluxvault
//!
//! fluxvault is a library crate for reading, writing and converting floppy disk images across
//! a family of historical container formats while keeping track of the preservation metadata
//! (weak bits, bit-cell timing, bad CRCs, deleted address marks) each container can carry.
//!
//! The typical flow is:
//!
//! * [`detect::detect`] sniffs a buffer and returns a [`DiskImageFileFormat`] tag (or nothing).
//! * [`context::ImageContext::open`] parses an image into memory.
//! * [`context::ImageContext::read_sector`] / [`context::ImageContext::write_sector`] access
//!   sectors by cylinder, head and native sector id.
//! * [`convert::convert`] moves the logical content to another format and returns a
//!   [`convert::ConversionReport`] listing every piece of metadata the destination could not keep.
//!
//! Copy protection is only ever detected and preserved. Nothing in this crate attempts to
//! reproduce or circumvent it.

pub mod bitcodec;
mod chs;
pub mod compression;
#[cfg(feature = "gzip")]
mod containers;
pub mod context;
pub mod convert;
pub mod detect;
pub mod file_parsers;
pub mod geometry;
pub mod image;
pub mod metadata;
pub mod protection;
mod standard_format;
pub mod util;

use std::{
    fmt,
    fmt::{Display, Formatter},
    hash::RandomState,
};

use thiserror::Error;

pub const MAXIMUM_SECTOR_SIZE: usize = 8192;
pub const DEFAULT_SECTOR_SIZE: usize = 512;
pub const ASCII_EOF: u8 = 0x1A;

#[allow(unused)]
type VaultHashMap<K, V, S = RandomState> = std::collections::HashMap<K, V, S>;
#[allow(unused)]
type VaultHashSet<T, S = RandomState> = std::collections::HashSet<T, S>;

/// The error type for every fallible operation in the crate.
///
/// The first five variants form the engine's error taxonomy (argument, I/O, format, range and
/// memory errors). The remaining variants describe format selection failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DiskImageError {
    #[error("Invalid parameters were specified to a library function: {0}")]
    ArgumentError(String),
    #[error("An IO error occurred reading or writing the disk image: {0}")]
    IoError(String),
    #[error("The disk image is structurally inconsistent: {0}")]
    FormatError(String),
    #[error("The requested address or length is out of range: {0}")]
    RangeError(String),
    #[error("Failed to allocate a buffer of {0} bytes")]
    MemoryError(usize),
    #[error("Unknown disk image format")]
    UnknownFormat,
    #[error("Unsupported disk image format for requested operation")]
    UnsupportedFormat,
    #[error("The disk image is valid but contains incompatible disk information")]
    IncompatibleImage,
}

impl From<std::io::Error> for DiskImageError {
    fn from(err: std::io::Error) -> Self {
        DiskImageError::IoError(err.to_string())
    }
}

impl From<binrw::Error> for DiskImageError {
    fn from(err: binrw::Error) -> Self {
        match err {
            // A short read while decoding a header means the container is truncated, not that
            // the file system failed us.
            binrw::Error::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                DiskImageError::FormatError("unexpected end of image data".to_string())
            }
            binrw::Error::Io(e) => DiskImageError::IoError(e.to_string()),
            binrw::Error::BadMagic { pos, .. } => DiskImageError::FormatError(format!("bad magic at offset {:#X}", pos)),
            e => DiskImageError::FormatError(e.to_string()),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskDataEncoding {
    Fm,
    #[default]
    Mfm,
    Gcr,
}

impl Display for DiskDataEncoding {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskDataEncoding::Fm => write!(f, "FM"),
            DiskDataEncoding::Mfm => write!(f, "MFM"),
            DiskDataEncoding::Gcr => write!(f, "GCR"),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskDensity {
    Standard,
    #[default]
    Double,
    High,
    Extended,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskDataRate {
    RateNonstandard(u32),
    Rate125Kbps,
    #[default]
    Rate250Kbps,
    Rate300Kbps,
    Rate500Kbps,
    Rate1000Kbps,
}

impl DiskDataRate {
    /// Return the data rate in bits per second.
    pub fn bps(&self) -> u32 {
        match self {
            DiskDataRate::RateNonstandard(rate) => *rate,
            DiskDataRate::Rate125Kbps => 125_000,
            DiskDataRate::Rate250Kbps => 250_000,
            DiskDataRate::Rate300Kbps => 300_000,
            DiskDataRate::Rate500Kbps => 500_000,
            DiskDataRate::Rate1000Kbps => 1_000_000,
        }
    }
}

impl From<u32> for DiskDataRate {
    fn from(rate: u32) -> Self {
        match rate {
            125_000 => DiskDataRate::Rate125Kbps,
            250_000 => DiskDataRate::Rate250Kbps,
            300_000 => DiskDataRate::Rate300Kbps,
            500_000 => DiskDataRate::Rate500Kbps,
            1_000_000 => DiskDataRate::Rate1000Kbps,
            _ => DiskDataRate::RateNonstandard(rate),
        }
    }
}

impl From<DiskDensity> for DiskDataRate {
    fn from(density: DiskDensity) -> Self {
        match density {
            DiskDensity::Standard => DiskDataRate::Rate125Kbps,
            DiskDensity::Double => DiskDataRate::Rate250Kbps,
            DiskDensity::High => DiskDataRate::Rate500Kbps,
            DiskDensity::Extended => DiskDataRate::Rate1000Kbps,
        }
    }
}

impl From<DiskDataRate> for DiskDensity {
    fn from(rate: DiskDataRate) -> Self {
        match rate.bps() {
            0..=150_000 => DiskDensity::Standard,
            150_001..=400_000 => DiskDensity::Double,
            400_001..=750_000 => DiskDensity::High,
            _ => DiskDensity::Extended,
        }
    }
}

impl Display for DiskDataRate {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            DiskDataRate::RateNonstandard(rate) => write!(f, "{}Kbps", rate / 1000),
            DiskDataRate::Rate125Kbps => write!(f, "125Kbps"),
            DiskDataRate::Rate250Kbps => write!(f, "250Kbps"),
            DiskDataRate::Rate300Kbps => write!(f, "300Kbps"),
            DiskDataRate::Rate500Kbps => write!(f, "500Kbps"),
            DiskDataRate::Rate1000Kbps => write!(f, "1000Kbps"),
        }
    }
}

pub use crate::{
    chs::{DiskCh, DiskChs, DiskChsn},
    context::{ImageContext, OpenOptions},
    convert::{convert, convert_image, ConversionReport, ConvertOptions, SkipPolicy},
    detect::{detect, Confidence, DetectionResult},
    file_parsers::{
        format_from_ext,
        formats_from_caps,
        supported_extensions,
        DiskImageFileFormat,
        FormatCaps,
        FormatParser,
        FormatRegistry,
        ParserWriteCompatibility,
    },
    geometry::{BootException, Geometry},
    image::{DiskImage, ImageInfo, SectorRecord, TrackRecord},
    metadata::{MetadataField, SectorMetadata, SectorStatus, Timing, TrackMetadata, WeakBitRun, WeakBits},
    protection::{ProtectionReport, ProtectionScheme},
    standard_format::{Platform, StandardFormat},
};
