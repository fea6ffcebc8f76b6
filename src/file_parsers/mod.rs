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

    src/file_parsers/mod.rs

    The FormatParser trait every container module implements, the capability
    flags used to decide whether a conversion is lossy, and the registry that
    holds one boxed parser per supported container.
*/
use std::sync::OnceLock;

use bitflags::bitflags;
use dyn_clone::{clone_trait_object, DynClone};
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::{geometry::Geometry, image::DiskImage, standard_format::Platform, DiskImageError};

#[cfg(feature = "amiga")]
pub mod adf;
#[cfg(feature = "atari")]
pub mod atr;
#[cfg(feature = "atari")]
pub mod atx;
#[cfg(feature = "pc98")]
pub mod d88;
#[cfg(feature = "cpc")]
pub mod dsk;
#[cfg(feature = "pc98")]
pub mod fdi;
#[cfg(feature = "ibm_pc")]
pub mod imd;
pub mod raw;

bitflags! {
    /// Bit flags representing the capabilities of a specific image format. Used to determine if a
    /// specific image format can represent a particular DiskImage.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    #[rustfmt::skip]
    pub struct FormatCaps: u32 {
        const CAP_VARIABLE_SPT      = 0b0000_0000_0000_0001; // Can support variable sector counts per track
        const CAP_VARIABLE_SSPT     = 0b0000_0000_0000_0010; // Can support variable sector sizes
        const CAP_ADDRESS_CRC       = 0b0000_0000_0000_0100; // Encodes sector address mark CRC status
        const CAP_DATA_CRC          = 0b0000_0000_0000_1000; // Encodes sector data CRC status
        const CAP_DATA_DELETED      = 0b0000_0000_0001_0000; // Encodes 'Deleted address' marks
        const CAP_SID_OVERRIDE      = 0b0000_0000_0010_0000; // Can specify the sector ID parameters (chs, size) independent of sector order
        const CAP_COMMENT           = 0b0000_0000_0100_0000; // Can store a text comment field
        const CAP_TRACK_ENCODING    = 0b0000_0000_1000_0000; // Can store per-track encoding type
        const CAP_TRACK_DATA_RATE   = 0b0000_0001_0000_0000; // Can store per-track data rate
        const CAP_WEAK_BITS         = 0b0000_0010_0000_0000; // Can store weak bit information
        const CAP_TIMING            = 0b0000_0100_0000_0000; // Can store bit-cell timing and sector positions
        const CAP_NO_DAM            = 0b0100_0000_0000_0000; // Can store IDAM with no DAM
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ParserWriteCompatibility {
    Ok,
    DataLoss,
    Incompatible,
    UnsupportedFormat,
}

/// How a parser recognizes its container.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DetectClass {
    /// The container starts with a magic number or header string.
    Signature,
    /// The container has no header; only its length identifies it.
    SizeOnly,
}

/// The container formats fluxvault can identify. A format is only usable if its parser was
/// compiled in; see [FormatRegistry].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DiskImageFileFormat {
    #[strum(serialize = "Raw Sector Image")]
    RawSectorImage,
    #[strum(serialize = "Atari ATR")]
    AtrImage,
    #[strum(serialize = "Atari ATX")]
    AtxImage,
    #[strum(serialize = "ImageDisk")]
    ImageDisk,
    #[strum(serialize = "CPC DSK")]
    CpcDskImage,
    #[strum(serialize = "PC-98 FDI")]
    FdiImage,
    #[strum(serialize = "PC-98 D88")]
    D88Image,
    #[strum(serialize = "Amiga ADF")]
    AdfImage,
    #[strum(serialize = "Amiga Extended ADF")]
    ExtendedAdfImage,
}

impl DiskImageFileFormat {
    /// Return the parser for this format, if its platform feature is enabled.
    pub fn parser(&self) -> Option<Box<dyn FormatParser>> {
        FormatRegistry::global().parser_for(*self)
    }

    pub fn extensions(&self) -> Vec<&'static str> {
        self.parser().map(|p| p.extensions()).unwrap_or_default()
    }

    pub fn capabilities(&self) -> FormatCaps {
        self.parser().map(|p| p.capabilities()).unwrap_or_default()
    }
}

/// The contract shared by every container module.
///
/// Parsers are stateless. `load` decodes a complete container held in memory into a [DiskImage],
/// `save` builds a complete container from one.
pub trait FormatParser: DynClone + Send + Sync {
    fn format(&self) -> DiskImageFileFormat;

    fn name(&self) -> String {
        self.format().to_string()
    }

    /// Return a list of file extensions associated with the parser.
    fn extensions(&self) -> Vec<&'static str>;

    /// Return the capability flags for this format.
    fn capabilities(&self) -> FormatCaps;

    fn detect_class(&self) -> DetectClass {
        DetectClass::Signature
    }

    /// Return true if `data` looks like this container. Must not fail or allocate much.
    fn detect(&self, data: &[u8]) -> bool;

    /// Return the geometry implied by the container, if it can be determined cheaply.
    fn geometry_hint(&self, _data: &[u8]) -> Option<Geometry> {
        None
    }

    /// Decode a container. Uniform formats honor `forced` instead of deriving a geometry from the
    /// container size; a forced geometry that does not fit the container is a format error.
    fn load(&self, data: &[u8], forced: Option<&Geometry>) -> Result<DiskImage, DiskImageError>;

    /// Decode a container believed to come from `platform`. Only headerless formats, where
    /// several platforms share a container size, need the hint.
    fn load_for_platform(
        &self,
        data: &[u8],
        forced: Option<&Geometry>,
        _platform: Option<Platform>,
    ) -> Result<DiskImage, DiskImageError> {
        self.load(data, forced)
    }

    /// Return whether `image` can be written to this format, and whether anything would be lost.
    fn can_write(&self, image: &DiskImage) -> ParserWriteCompatibility {
        let caps = self.capabilities();
        if image.tracks().iter().any(|t| t.metadata().is_lossy_for(caps)) {
            ParserWriteCompatibility::DataLoss
        }
        else {
            ParserWriteCompatibility::Ok
        }
    }

    /// Build a complete container from `image`.
    fn save(&self, image: &DiskImage) -> Result<Vec<u8>, DiskImageError>;

    /// Build a container from a flat sector stream laid out per `geometry`.
    fn from_raw(&self, raw: &[u8], geometry: &Geometry) -> Result<Vec<u8>, DiskImageError> {
        let image = DiskImage::from_raw(geometry, raw)?;
        self.save(&image)
    }
}

clone_trait_object!(FormatParser);

/// An immutable, ordered set of format parsers.
///
/// Signature parsers come first in detection priority order, followed by the size-only parsers.
#[derive(Clone)]
pub struct FormatRegistry {
    parsers: Vec<Box<dyn FormatParser>>,
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatRegistry {
    pub fn new() -> Self {
        let mut parsers: Vec<Box<dyn FormatParser>> = Vec::new();
        #[cfg(feature = "atari")]
        {
            parsers.push(Box::new(atx::AtxFormat));
            parsers.push(Box::new(atr::AtrFormat));
        }
        #[cfg(feature = "cpc")]
        parsers.push(Box::new(dsk::DskFormat));
        #[cfg(feature = "ibm_pc")]
        parsers.push(Box::new(imd::ImdFormat));
        #[cfg(feature = "pc98")]
        {
            parsers.push(Box::new(d88::D88Format));
            parsers.push(Box::new(fdi::FdiFormat));
        }
        #[cfg(feature = "amiga")]
        parsers.push(Box::new(adf::ExtendedAdfFormat));

        parsers.push(Box::new(raw::RawFormat));
        #[cfg(feature = "amiga")]
        parsers.push(Box::new(adf::AdfFormat));

        FormatRegistry { parsers }
    }

    /// Return the shared registry, building it on first use.
    pub fn global() -> &'static FormatRegistry {
        static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();
        REGISTRY.get_or_init(FormatRegistry::new)
    }

    pub fn parsers(&self) -> &[Box<dyn FormatParser>] {
        &self.parsers
    }

    pub fn parser_for(&self, format: DiskImageFileFormat) -> Option<Box<dyn FormatParser>> {
        self.parsers.iter().find(|p| p.format() == format).cloned()
    }

    pub fn formats(&self) -> Vec<DiskImageFileFormat> {
        self.parsers.iter().map(|p| p.format()).collect()
    }
}

/// Returns a list of advertised file extensions supported by available image format parsers.
/// This is a convenience function for use in file dialogs - internal image detection is not based
/// on file extension, but by image file content and size.
pub fn supported_extensions() -> Vec<&'static str> {
    FormatRegistry::global()
        .parsers()
        .iter()
        .flat_map(|p| p.extensions())
        .collect()
}

/// Returns a DiskImageFileFormat enum variant based on the file extension provided. If the
/// extension is not recognized, None is returned.
pub fn format_from_ext(ext: &str) -> Option<DiskImageFileFormat> {
    let ext = ext.to_lowercase();
    FormatRegistry::global()
        .parsers()
        .iter()
        .find(|p| p.extensions().contains(&ext.as_str()))
        .map(|p| p.format())
}

/// Returns a list of image formats and their associated file extensions that support the specified
/// capabilities.
pub fn formats_from_caps(caps: FormatCaps) -> Vec<(DiskImageFileFormat, Vec<String>)> {
    DiskImageFileFormat::iter()
        .filter_map(|f| f.parser())
        .filter(|p| caps.is_empty() || p.capabilities().contains(caps))
        .map(|p| (p.format(), p.extensions().iter().map(|s| s.to_string()).collect()))
        .collect()
}

pub fn filter_writable(image: &DiskImage, formats: Vec<DiskImageFileFormat>) -> Vec<DiskImageFileFormat> {
    formats
        .into_iter()
        .filter(|f| {
            f.parser()
                .map(|p| matches!(p.can_write(image), ParserWriteCompatibility::Ok))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_ext_xfd() {
        assert_eq!(format_from_ext("XFD"), Some(DiskImageFileFormat::RawSectorImage));
        assert_eq!(format_from_ext("zzz"), None);
    }

    #[cfg(feature = "atari")]
    #[test]
    fn test_format_from_ext_atx() {
        assert_eq!(format_from_ext("atx"), Some(DiskImageFileFormat::AtxImage));
    }

    #[test]
    fn size_only_parsers_come_last() {
        let registry = FormatRegistry::new();
        let classes: Vec<DetectClass> = registry.parsers().iter().map(|p| p.detect_class()).collect();
        let first_size_only = classes
            .iter()
            .position(|c| *c == DetectClass::SizeOnly)
            .unwrap_or(classes.len());
        assert!(classes[first_size_only..].iter().all(|c| *c == DetectClass::SizeOnly));
    }

    #[cfg(feature = "atari")]
    #[test]
    fn weak_bit_formats() {
        let formats: Vec<DiskImageFileFormat> = formats_from_caps(FormatCaps::CAP_WEAK_BITS)
            .into_iter()
            .map(|(f, _)| f)
            .collect();
        assert_eq!(formats, vec![DiskImageFileFormat::AtxImage]);
    }
}
