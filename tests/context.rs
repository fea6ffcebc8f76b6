mod common;

use common::*;
use fluxvault::{
    context::from_raw,
    file_parsers::raw::RawFormat,
    protection::FindingKind,
    DiskCh,
    DiskImageError,
    DiskImageFileFormat,
    Geometry,
    ImageContext,
    OpenOptions,
};

#[test]
fn unknown_buffer_is_rejected() {
    init();
    assert!(matches!(
        ImageContext::open_buffer(&[0x42u8; 1234], OpenOptions::new()),
        Err(DiskImageError::UnknownFormat)
    ));
}

#[test]
fn missing_file_is_io_error() {
    init();
    let path = temp_path("does_not_exist.img");
    assert!(matches!(
        ImageContext::open(&path, OpenOptions::new()),
        Err(DiskImageError::IoError(_))
    ));
}

#[test]
fn build_container_from_flat_dump() {
    init();
    let geom = Geometry::new(80, 2, 9, 512);
    let raw_file = TempFile::new("source.img");
    std::fs::write(raw_file.path(), numbered_raw(&geom)).unwrap();

    let out = TempFile::new("rebuilt.img");
    from_raw(raw_file.path(), out.path(), &geom, &RawFormat).unwrap();
    assert_eq!(compute_file_hash(out.path()), compute_file_hash(raw_file.path()));

    let short = TempFile::new("short.img");
    std::fs::write(short.path(), vec![0u8; 1000]).unwrap();
    assert!(from_raw(short.path(), out.path(), &geom, &RawFormat).is_err());
}

#[test]
fn save_without_changes_leaves_file_alone() {
    init();
    let file = TempFile::new("untouched.img");
    std::fs::write(file.path(), vec![0x11u8; 368_640]).unwrap();
    let before = std::fs::metadata(file.path()).unwrap().modified().unwrap();

    let mut ctx = ImageContext::open(file.path(), OpenOptions::new().with_writable(true)).unwrap();
    ctx.save().unwrap();
    assert_eq!(std::fs::metadata(file.path()).unwrap().modified().unwrap(), before);
    assert_eq!(ctx.path(), Some(file.path()));
}

#[test]
fn buffer_context_cannot_save() {
    init();
    let mut ctx = ImageContext::open_buffer(&vec![0u8; 368_640], OpenOptions::new().with_writable(true)).unwrap();
    ctx.write_sector(1, 0, 1, &[0x77u8; 512]).unwrap();
    assert!(matches!(ctx.save(), Err(DiskImageError::ArgumentError(_))));

    let bytes = ctx.to_bytes().unwrap();
    // Cylinder 0 head 1 follows the nine sectors of head 0.
    assert_eq!(&bytes[9 * 512..10 * 512], &[0x77u8; 512]);
}

#[test]
fn closed_context_rejects_access() {
    init();
    let mut ctx = ImageContext::open_buffer(&vec![0u8; 368_640], OpenOptions::new()).unwrap();
    ctx.close();
    ctx.close();
    assert!(!ctx.is_open());
    assert!(ctx.tracks().is_empty());
    let mut buf = [0u8; 512];
    assert!(matches!(
        ctx.read_sector(0, 0, 1, &mut buf),
        Err(DiskImageError::ArgumentError(_))
    ));
    assert!(ctx.protection_report().is_none());
}

#[test]
fn forced_format_must_be_compiled_in_and_parse() {
    init();
    let ctx = ImageContext::open_buffer(
        &vec![0u8; 92_160],
        OpenOptions::new().with_format(DiskImageFileFormat::RawSectorImage),
    )
    .unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::RawSectorImage);

    #[cfg(feature = "ibm_pc")]
    assert!(ImageContext::open_buffer(
        &vec![0u8; 92_160],
        OpenOptions::new().with_format(DiskImageFileFormat::ImageDisk)
    )
    .is_err());
}

#[cfg(feature = "cpc")]
#[test]
fn protection_report_through_context() {
    use fluxvault::file_parsers::dsk::DskFormat;
    use fluxvault::FormatParser;
    init();

    let mut image = numbered_image(&Geometry::new(40, 1, 9, 512));
    let track = image.track_mut(DiskCh::new(3, 0)).unwrap();
    track.sectors[2].status.data_crc_error = true;
    track.sectors[6].id.set_s(0xC1);
    let dsk = DskFormat.save(&image).unwrap();

    let ctx = ImageContext::open_buffer(&dsk, OpenOptions::new()).unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::CpcDskImage);

    let meta = ctx.track_metadata(3, 0).unwrap();
    assert!(meta.has_bad_crc());
    assert!(ctx.sector_metadata(3, 0, 3).unwrap().status.data_crc_error);

    let report = ctx.protection_report().unwrap();
    assert_eq!(report.count(FindingKind::BadCrc), 1);
    assert_eq!(report.count(FindingKind::PhantomId), 1);
    assert_eq!(report.count(FindingKind::MissingSector), 1);
    assert_eq!(report.tracks(), vec![DiskCh::new(3, 0)]);
    assert!(report.scheme.is_some());
}

#[cfg(feature = "gzip")]
#[test]
fn gzipped_images_open_read_only() {
    use flate2::{write::GzEncoder, Compression};
    use std::io::Write;
    init();

    let geom = Geometry::new(40, 1, 18, 128);
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&numbered_raw(&geom)).unwrap();
    let gz = enc.finish().unwrap();

    let file = TempFile::new("dump.xfd.gz");
    std::fs::write(file.path(), &gz).unwrap();
    assert!(matches!(
        ImageContext::open(file.path(), OpenOptions::new().with_writable(true)),
        Err(DiskImageError::ArgumentError(_))
    ));

    let ctx = ImageContext::open(file.path(), OpenOptions::new()).unwrap();
    assert!(!ctx.is_writable());
    assert_eq!(ctx.raw_bytes().unwrap(), numbered_raw(&geom));
}

#[test]
fn forced_geometry_opens_unlisted_dump_size() {
    init();
    let geom = Geometry::new(10, 1, 9, 512);
    let data = numbered_raw(&geom);
    assert!(matches!(
        ImageContext::open_buffer(&data, OpenOptions::new()),
        Err(DiskImageError::UnknownFormat)
    ));

    let ctx = ImageContext::open_buffer(&data, OpenOptions::new().with_geometry(geom)).unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::RawSectorImage);
    assert_eq!(ctx.geometry(), Some(geom));

    let mut buf = [0u8; 512];
    ctx.read_sector(0, 3, 2, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 28));
}
