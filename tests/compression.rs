mod common;

use common::*;
use fluxvault::{
    compression::{decode_track, encode_run_length, encode_stored, entropy::encode_record, CodeTable},
    DiskImageError,
};

#[test]
fn run_length_track_fills_sector() {
    init();
    let track = encode_run_length(50, &[0xE5]).unwrap();
    assert_eq!(track, vec![0x01, 50, 0, 1, 0xE5]);

    let sectors = decode_track(&track, &[50]).unwrap();
    assert_eq!(sectors.len(), 1);
    assert_eq!(sectors[0], vec![0xE5u8; 50]);
}

#[test]
fn mixed_records_land_at_sector_offsets() {
    init();
    let text = b"ABBA BABA AB";
    let table = CodeTable::new(&[(b'A', 1), (b'B', 2), (b' ', 2)]).unwrap();

    let mut track = Vec::new();
    track.extend(encode_stored(&[7u8; 16]));
    track.extend(encode_run_length(8, &[0xDE, 0xAD]).unwrap());
    track.extend(encode_record(&table, text).unwrap());

    let sectors = decode_track(&track, &[16, 16, text.len()]).unwrap();
    assert_eq!(sectors[0], vec![7u8; 16]);
    assert_eq!(sectors[1], [0xDE, 0xAD].repeat(8));
    assert_eq!(sectors[2], text.to_vec());

    let flat: Vec<u8> = sectors.concat();
    assert_eq!(&flat[16..18], &[0xDE, 0xAD]);
}

#[test]
fn record_length_must_match_sector() {
    init();
    let track = encode_run_length(50, &[0xE5]).unwrap();
    assert!(matches!(decode_track(&track, &[64]), Err(DiskImageError::FormatError(_))));
}

#[test]
fn corrupt_record_fails_track() {
    init();
    let mut track = encode_stored(&[1u8; 32]);
    track.push(0x07);
    assert!(matches!(decode_track(&track, &[32, 32]), Err(DiskImageError::FormatError(_))));

    let truncated = &encode_stored(&[1u8; 32])[..20];
    assert!(matches!(decode_track(truncated, &[32]), Err(DiskImageError::FormatError(_))));
}
