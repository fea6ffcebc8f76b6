mod common;

use common::*;
use fluxvault::{detect, Confidence, DiskCh, DiskChsn, DiskImageFileFormat, Geometry, ImageContext, OpenOptions};

#[test]
fn detect_single_density_dump() {
    init();
    let data = vec![0u8; 92_160];
    let result = detect(&data);

    assert_eq!(result.format, Some(DiskImageFileFormat::RawSectorImage));
    assert_eq!(result.confidence, Confidence::SizeHint);
    let geom = result.geometry_hint.unwrap();
    assert_eq!(geom.total_sectors(), 720);
    assert_eq!(geom.sector_size, 128);
}

#[test]
fn open_read_and_export() {
    init();
    let geom = Geometry::new(40, 1, 18, 128);
    let raw = numbered_raw(&geom);
    let file = TempFile::new("dump.xfd");
    std::fs::write(file.path(), &raw).unwrap();

    let ctx = ImageContext::open(file.path(), OpenOptions::new()).unwrap();
    assert_eq!(ctx.format(), DiskImageFileFormat::RawSectorImage);
    assert_eq!(ctx.geometry(), Some(geom));

    // Track 2, sector 4 is linear sector 2 * 18 + 3.
    let mut buf = [0u8; 128];
    let (len, meta) = ctx.read_sector(0, 2, 4, &mut buf).unwrap();
    assert_eq!(len, 128);
    assert!(buf.iter().all(|&b| b == 39));
    assert!(meta.status.is_clean());
    assert!(!meta.weak_bits.is_present());

    let image = ctx.disk_image().unwrap();
    assert!(!image.has_preservation_metadata());
    let ids = image.sector_addresses();
    assert_eq!(ids.len(), 720);
    assert_eq!(ids[19], DiskChsn::new(1, 0, 2, 0));
    assert_ne!(image.track_hash(DiskCh::new(0, 0)), image.track_hash(DiskCh::new(1, 0)));
    assert!(image.track_hash(DiskCh::new(40, 0)).is_none());

    let out = TempFile::new("export.raw");
    ctx.to_raw(out.path()).unwrap();
    assert_eq!(compute_file_hash(out.path()), compute_slice_hash(&raw));
}

#[test]
fn edit_and_save_in_place() {
    init();
    let geom = Geometry::new(40, 1, 18, 128);
    let file = TempFile::new("edit.xfd");
    std::fs::write(file.path(), numbered_raw(&geom)).unwrap();

    let mut ctx = ImageContext::open(file.path(), OpenOptions::new().with_writable(true)).unwrap();
    ctx.write_sector(0, 39, 18, &[0xA5u8; 128]).unwrap();
    assert!(ctx.is_dirty());
    ctx.save().unwrap();
    assert!(!ctx.is_dirty());
    ctx.close();

    let saved = std::fs::read(file.path()).unwrap();
    assert_eq!(saved.len(), 92_160);
    assert_eq!(&saved[92_160 - 128..], &[0xA5u8; 128]);
    assert_eq!(&saved[..128], &[0u8; 128]);

    let mut tmp = file.path().as_os_str().to_owned();
    tmp.push(".tmp");
    assert!(!std::path::Path::new(&tmp).exists());
}

#[test]
fn forced_geometry_overrides_size() {
    init();
    let forced = Geometry::new(80, 2, 9, 128);
    let ctx = ImageContext::open_buffer(&vec![0u8; 184_320], OpenOptions::new().with_geometry(forced)).unwrap();
    assert_eq!(ctx.geometry(), Some(forced));
}
