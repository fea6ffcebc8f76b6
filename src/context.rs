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

    src/context.rs

    An open disk image: the parsed image, the parser that produced it, the
    file it came from and whether it has unsaved changes.
*/
use std::{
    borrow::Cow,
    ffi::OsString,
    path::{Path, PathBuf},
};

use crate::{
    chs::{DiskCh, DiskChs},
    detect::find_parser,
    file_parsers::{DiskImageFileFormat, FormatParser, FormatRegistry, ParserWriteCompatibility},
    geometry::Geometry,
    image::{DiskImage, ImageInfo, TrackRecord},
    metadata::{SectorMetadata, TrackMetadata},
    protection::{self, ProtectionReport},
    standard_format::Platform,
    DiskImageError,
};

/// Options controlling how an image is opened.
#[derive(Clone, Debug, Default)]
pub struct OpenOptions {
    /// Allow sector writes and [ImageContext::save].
    pub writable: bool,
    /// Use this geometry for headerless images instead of deriving one from the size.
    pub forced_geometry: Option<Geometry>,
    /// Skip detection and parse with this format's parser.
    pub format: Option<DiskImageFileFormat>,
    /// Prefer this platform's layouts when a headerless image size is shared by several.
    pub platform: Option<Platform>,
}

impl OpenOptions {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_writable(self, writable: bool) -> Self {
        Self { writable, ..self }
    }

    pub fn with_geometry(self, geometry: Geometry) -> Self {
        Self {
            forced_geometry: Some(geometry),
            ..self
        }
    }

    pub fn with_format(self, format: DiskImageFileFormat) -> Self {
        Self {
            format: Some(format),
            ..self
        }
    }

    pub fn with_platform(self, platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..self
        }
    }
}

/// Guess a platform from a file extension. Only used to break ties between headerless layouts.
fn platform_from_path(path: &Path) -> Option<Platform> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "xfd" | "atr" | "atx" => Some(Platform::Atari8),
        "adf" => Some(Platform::Amiga),
        "img" | "ima" => Some(Platform::IbmPc),
        _ => None,
    }
}

#[derive(Clone)]
pub struct ImageContext {
    path: Option<PathBuf>,
    writable: bool,
    parser: Box<dyn FormatParser>,
    image: Option<DiskImage>,
    dirty: bool,
}

impl ImageContext {
    /// Read and parse the image at `path`.
    pub fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, DiskImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            log::error!("ImageContext::open(): {}: {}", path.display(), e);
            DiskImageError::from(e)
        })?;

        let options = OpenOptions {
            platform: options.platform.or_else(|| platform_from_path(path)),
            ..options
        };
        let mut ctx = Self::parse(&data, &options)?;
        ctx.path = Some(path.to_path_buf());
        Ok(ctx)
    }

    /// Parse an image held in memory. The context has no backing file, so [ImageContext::save]
    /// is unavailable; use [ImageContext::to_bytes] instead.
    pub fn open_buffer(data: &[u8], options: OpenOptions) -> Result<Self, DiskImageError> {
        Self::parse(data, &options)
    }

    fn parse(data: &[u8], options: &OpenOptions) -> Result<Self, DiskImageError> {
        let data = Self::unwrap_container(data, options)?;
        let registry = FormatRegistry::global();

        let parser: Box<dyn FormatParser> = match options.format {
            Some(format) => registry.parser_for(format).ok_or_else(|| {
                log::error!("ImageContext::open(): no parser for {} is compiled in", format);
                DiskImageError::UnsupportedFormat
            })?,
            None => match find_parser(registry, &data) {
                Some(parser) => dyn_clone::clone_box(parser),
                // A caller-supplied geometry describes a headerless dump of any size.
                None if options.forced_geometry.is_some() => registry
                    .parser_for(DiskImageFileFormat::RawSectorImage)
                    .ok_or(DiskImageError::UnknownFormat)?,
                None => return Err(DiskImageError::UnknownFormat),
            },
        };
        log::debug!("ImageContext::open(): parsing as {}", parser.name());

        let mut image = parser.load_for_platform(&data, options.forced_geometry.as_ref(), options.platform)?;
        image.set_source_format(parser.format());

        Ok(ImageContext {
            path: None,
            writable: options.writable,
            parser,
            image: Some(image),
            dirty: false,
        })
    }

    #[cfg(feature = "gzip")]
    fn unwrap_container<'a>(data: &'a [u8], options: &OpenOptions) -> Result<Cow<'a, [u8]>, DiskImageError> {
        let inner = crate::containers::unwrap_image(data)?;
        if options.writable && matches!(inner, Cow::Owned(_)) {
            return Err(DiskImageError::ArgumentError(
                "gzip wrapped images can only be opened read-only".to_string(),
            ));
        }
        Ok(inner)
    }

    #[cfg(not(feature = "gzip"))]
    fn unwrap_container<'a>(data: &'a [u8], _options: &OpenOptions) -> Result<Cow<'a, [u8]>, DiskImageError> {
        Ok(Cow::Borrowed(data))
    }

    fn image(&self) -> Result<&DiskImage, DiskImageError> {
        self.image
            .as_ref()
            .ok_or_else(|| DiskImageError::ArgumentError("image context is closed".to_string()))
    }

    /// Copy a sector into `out`, addressed by physical head and track and the sector id recorded on
    /// the disk. Returns the number of bytes written and the sector's preservation metadata.
    /// `out` is untouched on error.
    pub fn read_sector(
        &self,
        head: u8,
        track: u16,
        sector: u8,
        out: &mut [u8],
    ) -> Result<(usize, SectorMetadata), DiskImageError> {
        self.image()?.read_sector(DiskChs::new(track, head, sector), out)
    }

    /// Replace a sector's payload. `data` must be exactly the sector's length.
    pub fn write_sector(&mut self, head: u8, track: u16, sector: u8, data: &[u8]) -> Result<usize, DiskImageError> {
        if !self.writable {
            return Err(DiskImageError::ArgumentError("image was opened read-only".to_string()));
        }
        let image = self
            .image
            .as_mut()
            .ok_or_else(|| DiskImageError::ArgumentError("image context is closed".to_string()))?;
        let written = image.write_sector(DiskChs::new(track, head, sector), data)?;
        self.dirty = true;
        Ok(written)
    }

    /// The flat linear sector stream: tracks in cylinder/head order, sectors in id order.
    pub fn raw_bytes(&self) -> Result<Vec<u8>, DiskImageError> {
        self.image()?.to_raw()
    }

    /// Write the flat linear sector stream to `path`.
    pub fn to_raw(&self, path: impl AsRef<Path>) -> Result<(), DiskImageError> {
        let raw = self.raw_bytes()?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Rebuild the container from the current image.
    pub fn to_bytes(&self) -> Result<Vec<u8>, DiskImageError> {
        let image = self.image()?;
        if self.parser.can_write(image) == ParserWriteCompatibility::Incompatible {
            return Err(DiskImageError::IncompatibleImage);
        }
        self.parser.save(image)
    }

    /// Write unsaved changes back to the file the image was opened from. The new container is
    /// written beside the original and renamed over it. Does nothing if the context is closed or
    /// has no changes.
    pub fn save(&mut self) -> Result<(), DiskImageError> {
        if self.image.is_none() || !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.clone()
        else {
            return Err(DiskImageError::ArgumentError("image has no backing file".to_string()));
        };

        let bytes = self.to_bytes()?;
        let mut tmp: OsString = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, &bytes)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            log::error!("ImageContext::save(): rename to {} failed: {}", path.display(), e);
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        log::debug!("ImageContext::save(): wrote {} bytes to {}", bytes.len(), path.display());
        self.dirty = false;
        Ok(())
    }

    /// Release the parsed image. Unsaved changes are discarded. Closing twice is harmless.
    pub fn close(&mut self) {
        if self.dirty {
            log::warn!("ImageContext::close(): discarding unsaved changes");
        }
        self.image = None;
        self.dirty = false;
    }

    pub fn format(&self) -> DiskImageFileFormat {
        self.parser.format()
    }

    pub fn parser(&self) -> &dyn FormatParser {
        self.parser.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.image.is_some()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn disk_image(&self) -> Option<&DiskImage> {
        self.image.as_ref()
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.image.as_ref().map(|i| i.geometry())
    }

    pub fn info(&self) -> Option<&ImageInfo> {
        self.image.as_ref().map(|i| &i.info)
    }

    pub fn tracks(&self) -> &[TrackRecord] {
        self.image.as_ref().map(|i| i.tracks()).unwrap_or(&[])
    }

    pub fn track_metadata(&self, c: u16, h: u8) -> Option<TrackMetadata> {
        self.image.as_ref()?.track_metadata(DiskCh::new(c, h))
    }

    pub fn sector_metadata(&self, c: u16, h: u8, s: u8) -> Result<SectorMetadata, DiskImageError> {
        self.image()?.sector_metadata(DiskChs::new(c, h, s))
    }

    pub fn protection_report(&self) -> Option<ProtectionReport> {
        self.image.as_ref().map(protection::analyze)
    }
}

/// Build a container file at `out_path` from the flat sector stream at `raw_path`.
pub fn from_raw(
    raw_path: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    geometry: &Geometry,
    parser: &dyn FormatParser,
) -> Result<(), DiskImageError> {
    let raw = std::fs::read(raw_path)?;
    let bytes = parser.from_raw(&raw, geometry)?;
    std::fs::write(out_path, bytes)?;
    Ok(())
}
