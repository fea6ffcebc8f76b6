mod common;

use common::*;
use fluxvault::{
    detect,
    format_from_ext,
    formats_from_caps,
    supported_extensions,
    Confidence,
    DiskImageFileFormat,
    FormatCaps,
    FormatRegistry,
    Geometry,
    ImageContext,
    OpenOptions,
    ParserWriteCompatibility,
};

/// Formats that can hold a plain 40 track, 9 sector, 512 byte disk without loss.
fn pc_capable_formats() -> Vec<DiskImageFileFormat> {
    let mut formats = vec![DiskImageFileFormat::RawSectorImage];
    #[cfg(feature = "ibm_pc")]
    formats.push(DiskImageFileFormat::ImageDisk);
    #[cfg(feature = "cpc")]
    formats.push(DiskImageFileFormat::CpcDskImage);
    #[cfg(feature = "pc98")]
    formats.extend([DiskImageFileFormat::D88Image, DiskImageFileFormat::FdiImage]);
    formats
}

#[test]
fn saved_containers_are_detected_and_read_back() {
    init();
    let geom = Geometry::new(40, 1, 9, 512);
    let image = numbered_image(&geom);
    let raw = numbered_raw(&geom);

    for format in pc_capable_formats() {
        let parser = FormatRegistry::global().parser_for(format).unwrap();
        assert_eq!(parser.can_write(&image), ParserWriteCompatibility::Ok, "{}", format);
        let bytes = parser.save(&image).unwrap();

        let result = detect(&bytes);
        assert_eq!(result.format, Some(format), "{}", format);
        if format != DiskImageFileFormat::RawSectorImage {
            assert_eq!(result.confidence, Confidence::Signature, "{}", format);
        }

        let ctx = ImageContext::open_buffer(&bytes, OpenOptions::new()).unwrap();
        assert_eq!(ctx.format(), format);
        assert_eq!(ctx.tracks().len(), 40, "{}", format);
        assert_eq!(compute_slice_hash(&ctx.raw_bytes().unwrap()), compute_slice_hash(&raw), "{}", format);
    }
}

#[test]
fn extension_lookup() {
    init();
    assert_eq!(format_from_ext("IMG"), Some(DiskImageFileFormat::RawSectorImage));
    assert!(supported_extensions().contains(&"xfd"));
    #[cfg(feature = "atari")]
    assert_eq!(format_from_ext("atx"), Some(DiskImageFileFormat::AtxImage));
    #[cfg(feature = "ibm_pc")]
    assert_eq!(format_from_ext("imd"), Some(DiskImageFileFormat::ImageDisk));
}

#[test]
fn only_flux_rich_formats_keep_weak_bits() {
    init();
    let formats: Vec<DiskImageFileFormat> = formats_from_caps(FormatCaps::CAP_WEAK_BITS)
        .into_iter()
        .map(|(f, _)| f)
        .collect();
    assert!(!formats.contains(&DiskImageFileFormat::RawSectorImage));
    #[cfg(feature = "atari")]
    assert_eq!(formats, vec![DiskImageFileFormat::AtxImage]);
}
