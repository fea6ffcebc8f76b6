#![cfg(feature = "amiga")]
mod common;

use common::*;
use fluxvault::{
    convert,
    convert_image,
    file_parsers::adf::{AdfFormat, ExtendedAdfFormat},
    ConvertOptions,
    DiskCh,
    DiskChs,
    DiskImageFileFormat,
    FormatParser,
    Geometry,
    ImageContext,
    MetadataField,
    OpenOptions,
};

fn amiga_geometry() -> Geometry {
    Geometry::new(80, 2, 11, 512).with_first_sector(0)
}

#[test]
fn open_trackdisk_dump() {
    init();
    let raw = numbered_raw(&amiga_geometry());
    let file = TempFile::new("workbench.adf");
    std::fs::write(file.path(), &raw).unwrap();

    let ctx = ImageContext::open(file.path(), OpenOptions::new()).unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::AdfImage);
    assert_eq!(ctx.geometry().map(|g| g.first_sector), Some(0));

    // Cylinder 40 head 1 sector 10 is the last sector of track 81.
    let mut buf = [0u8; 512];
    ctx.read_sector(1, 40, 10, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == (81 * 11 + 10) as u8));
}

#[test]
fn extended_conversion_is_lossless() {
    init();
    let raw = numbered_raw(&amiga_geometry());
    let ctx = ImageContext::open_buffer(&raw, OpenOptions::new()).unwrap();

    let out = TempFile::new("workbench_ext.adf");
    let report = convert(&ctx, &ExtendedAdfFormat, out.path(), ConvertOptions::default()).unwrap();
    assert!(!report.is_lossy());
    assert_eq!(report.sectors_copied, 1760);

    // The extended container carries no extension, so it is found by its signature.
    let ext = ImageContext::open(out.path(), OpenOptions::new()).unwrap();
    assert_eq!(ext.format(), DiskImageFileFormat::ExtendedAdfImage);
    assert_eq!(compute_slice_hash(&ext.raw_bytes().unwrap()), compute_slice_hash(&raw));
}

#[test]
fn checksum_errors_are_lost_in_plain_dumps() {
    init();
    let mut image = AdfFormat.load(&numbered_raw(&amiga_geometry()), None).unwrap();
    image.track_mut(DiskCh::new(10, 1)).unwrap().sectors[3].status.data_crc_error = true;
    let ext = ExtendedAdfFormat.save(&image).unwrap();

    let ctx = ImageContext::open_buffer(&ext, OpenOptions::new()).unwrap();
    assert!(ctx.sector_metadata(10, 1, 3).unwrap().status.data_crc_error);

    let (adf, report) = convert_image(ctx.disk_image().unwrap(), &AdfFormat, &ConvertOptions::default()).unwrap();
    assert_eq!(adf.len(), 901_120);
    assert_eq!(report.dropped_fields(), vec![MetadataField::BadCrc]);
    assert_eq!((report.lossy_tracks[0].c, report.lossy_tracks[0].h), (10, 1));

    let plain = AdfFormat.load(&adf, None).unwrap();
    assert!(plain.sector_metadata(DiskChs::new(10, 1, 3)).unwrap().status.is_clean());
}
