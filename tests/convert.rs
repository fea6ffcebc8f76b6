mod common;

use common::*;
use fluxvault::{
    convert,
    convert_image,
    file_parsers::raw::RawFormat,
    ConvertOptions,
    DiskCh,
    DiskImageError,
    DiskImageFileFormat,
    FormatParser,
    Geometry,
    ImageContext,
    MetadataField,
    OpenOptions,
};

#[cfg(feature = "atari")]
#[test]
fn weak_track_to_flat_dump_is_lossy() {
    use fluxvault::{file_parsers::atx::AtxFormat, WeakBitRun};
    init();

    let geom = Geometry::new(40, 1, 18, 128);
    let mut image = numbered_image(&geom);
    image
        .track_mut(DiskCh::new(5, 0))
        .unwrap()
        .add_weak_run(WeakBitRun::from_bytes(3 * 128 + 40, 16))
        .unwrap();
    let atx = AtxFormat.save(&image).unwrap();

    let ctx = ImageContext::open_buffer(&atx, OpenOptions::new()).unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::AtxImage);
    assert!(ctx.disk_image().unwrap().has_preservation_metadata());

    let (bytes, report) = convert_image(ctx.disk_image().unwrap(), &RawFormat, &ConvertOptions::default()).unwrap();
    assert!(report.is_lossy());
    assert_eq!(report.source_format, Some(DiskImageFileFormat::AtxImage));
    assert_eq!(report.dest_format, Some(DiskImageFileFormat::RawSectorImage));

    let weak: Vec<_> = report
        .lossy_tracks
        .iter()
        .filter(|w| w.dropped.contains(&MetadataField::WeakBits))
        .collect();
    assert_eq!(weak.len(), 1);
    assert_eq!((weak[0].c, weak[0].h), (5, 0));
    assert!(report.advisory().message.contains("weak-bits"));

    // The payloads still arrive intact.
    assert_eq!(report.sectors_copied, 720);
    assert_eq!(compute_slice_hash(&bytes), compute_slice_hash(&numbered_raw(&geom)));
}

#[cfg(all(feature = "ibm_pc", feature = "cpc"))]
#[test]
fn deleted_marks_follow_capabilities() {
    use fluxvault::{
        file_parsers::{dsk::DskFormat, imd::ImdFormat},
        DiskChs,
    };
    init();

    let mut image = numbered_image(&Geometry::new(40, 1, 9, 512));
    image.track_mut(DiskCh::new(2, 0)).unwrap().sectors[4].status.deleted_mark = true;
    let imd = ImdFormat.save(&image).unwrap();
    let ctx = ImageContext::open_buffer(&imd, OpenOptions::new()).unwrap();

    let (dsk, report) = convert_image(ctx.disk_image().unwrap(), &DskFormat, &ConvertOptions::default()).unwrap();
    assert!(!report.is_lossy());
    let converted = DskFormat.load(&dsk, None).unwrap();
    let meta = converted.sector_metadata(DiskChs::new(2, 0, 5)).unwrap();
    assert!(meta.status.deleted_mark);

    let (_, report) = convert_image(ctx.disk_image().unwrap(), &RawFormat, &ConvertOptions::default()).unwrap();
    assert_eq!(report.dropped_fields(), vec![MetadataField::DeletedMark]);
    assert_eq!(report.lossy_tracks.len(), 1);
}

#[test]
fn convert_writes_destination_file() {
    init();
    let geom = Geometry::new(80, 2, 9, 512);
    let raw = numbered_raw(&geom);
    let ctx = ImageContext::open_buffer(&raw, OpenOptions::new()).unwrap();

    let out = TempFile::new("converted.img");
    let report = convert(&ctx, &RawFormat, out.path(), ConvertOptions::default()).unwrap();
    assert!(!report.is_lossy());
    assert_eq!(compute_file_hash(out.path()), compute_slice_hash(&raw));
}

#[test]
fn closed_source_is_rejected() {
    init();
    let mut ctx = ImageContext::open_buffer(&vec![0u8; 92_160], OpenOptions::new()).unwrap();
    ctx.close();
    let out = TempFile::new("never_written.img");
    assert!(matches!(
        convert(&ctx, &RawFormat, out.path(), ConvertOptions::default()),
        Err(DiskImageError::ArgumentError(_))
    ));
    assert!(!out.path().exists());
}
