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

    src/detect.rs

    Format detection. Parsers are asked in registry order: every container
    with a signature first, then the headerless dumps that can only be
    recognized by their length.
*/
use crate::{
    file_parsers::{DetectClass, DiskImageFileFormat, FormatParser, FormatRegistry},
    geometry::Geometry,
};

/// How much weight a detection result carries.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Confidence {
    /// Nothing matched.
    #[default]
    Unknown,
    /// Only the buffer length matched a known layout. The length is a hint, not proof.
    SizeHint,
    /// The container's signature matched.
    Signature,
}

/// The outcome of [detect]. An unrecognized buffer is a normal result with no format.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub format: Option<DiskImageFileFormat>,
    pub confidence: Confidence,
    /// The geometry implied by the buffer, when the container lets us tell cheaply.
    pub geometry_hint: Option<Geometry>,
    /// The image was found inside a gzip wrapper.
    pub gzipped: bool,
}

impl DetectionResult {
    pub fn is_unknown(&self) -> bool {
        self.format.is_none()
    }
}

/// Return the first parser in `registry` that recognizes `data`.
pub(crate) fn find_parser<'a>(registry: &'a FormatRegistry, data: &[u8]) -> Option<&'a dyn FormatParser> {
    registry
        .parsers()
        .iter()
        .map(|p| p.as_ref())
        .find(|p| p.detect(data))
}

/// Identify the container format of `data` using the shared registry.
pub fn detect(data: &[u8]) -> DetectionResult {
    detect_with(FormatRegistry::global(), data)
}

/// Identify the container format of `data` using `registry`.
pub fn detect_with(registry: &FormatRegistry, data: &[u8]) -> DetectionResult {
    #[cfg(feature = "gzip")]
    if crate::containers::gzip::detect(data) {
        return match crate::containers::gzip::extract(data) {
            Ok(inner) => DetectionResult {
                gzipped: true,
                ..sniff(registry, &inner)
            },
            Err(e) => {
                log::warn!("detect(): gzip wrapper could not be read: {}", e);
                DetectionResult::default()
            }
        };
    }
    sniff(registry, data)
}

fn sniff(registry: &FormatRegistry, data: &[u8]) -> DetectionResult {
    let Some(parser) = find_parser(registry, data)
    else {
        log::debug!("detect(): no parser recognized {} bytes", data.len());
        return DetectionResult::default();
    };

    let confidence = match parser.detect_class() {
        DetectClass::Signature => Confidence::Signature,
        DetectClass::SizeOnly => Confidence::SizeHint,
    };
    log::debug!("detect(): {} ({:?})", parser.name(), confidence);

    DetectionResult {
        format: Some(parser.format()),
        confidence,
        geometry_hint: parser.geometry_hint(data),
        gzipped: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_density_dump_by_size() {
        let result = detect(&vec![0u8; 92_160]);
        assert_eq!(result.format, Some(DiskImageFileFormat::RawSectorImage));
        assert_eq!(result.confidence, Confidence::SizeHint);
        let geom = result.geometry_hint.unwrap();
        assert_eq!(geom.total_sectors(), 720);
        assert_eq!(geom.sector_size, 128);
    }

    #[test]
    fn unknown_is_not_an_error() {
        let result = detect(&[0x12u8; 1000]);
        assert!(result.is_unknown());
        assert_eq!(result.confidence, Confidence::Unknown);
        assert!(detect(&[]).is_unknown());
    }

    #[cfg(feature = "atari")]
    #[test]
    fn atr_magic_beats_size() {
        let mut data = vec![0u8; 92_160];
        data[0] = 0x96;
        data[1] = 0x02;
        let result = detect(&data);
        assert_eq!(result.format, Some(DiskImageFileFormat::AtrImage));
        assert_eq!(result.confidence, Confidence::Signature);
    }

    #[cfg(feature = "amiga")]
    #[test]
    fn amiga_dump_by_size() {
        let result = detect(&vec![0u8; 901_120]);
        assert_eq!(result.format, Some(DiskImageFileFormat::AdfImage));
        assert_eq!(result.geometry_hint.map(|g| g.first_sector), Some(0));
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn gzipped_dump() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut enc = GzEncoder::new(Vec::new(), Compression::fast());
        enc.write_all(&vec![0u8; 92_160]).unwrap();
        let gz = enc.finish().unwrap();

        let result = detect(&gz);
        assert!(result.gzipped);
        assert_eq!(result.format, Some(DiskImageFileFormat::RawSectorImage));
    }
}
