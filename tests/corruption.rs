//! Open-time validation of a damaged or misconfigured store.

use segfile::{Error, Options, SegFile};
use tempfile::TempDir;

fn options(dir: &TempDir, segment_size: u64) -> Options {
    let mut o = Options::new();
    o.path(dir.path());
    o.segment_size(segment_size);
    o
}

fn build_store(dir: &TempDir, segment_size: u64, payload: &[u8]) {
    let store = SegFile::open(&options(dir, segment_size)).unwrap();
    store.write_at(payload, 0).unwrap();
    store.sync().unwrap();
    store.close().unwrap();
}

#[test]
fn missing_path_is_invalid_options() {
    let o = Options::new();
    assert!(matches!(SegFile::open(&o), Err(Error::InvalidOptions)));
}

#[test]
fn missing_segment_file_is_corrupt() {
    let dir = TempDir::new().unwrap();
    build_store(&dir, 10, &[1u8; 25]);

    std::fs::remove_file(dir.path().join("seg_1")).unwrap();
    assert!(matches!(
        SegFile::open(&options(&dir, 10)),
        Err(Error::Corrupt(_))
    ));
}

#[test]
fn truncated_segment_file_is_a_size_mismatch() {
    let dir = TempDir::new().unwrap();
    build_store(&dir, 10, &[1u8; 25]);

    let seg = dir.path().join("seg_1");
    std::fs::OpenOptions::new()
        .write(true)
        .open(&seg)
        .unwrap()
        .set_len(4)
        .unwrap();

    assert!(matches!(
        SegFile::open(&options(&dir, 10)),
        Err(Error::SegmentSizeMismatch {
            expected: 10,
            found: 4
        })
    ));
}

#[test]
fn directory_in_place_of_a_segment() {
    let dir = TempDir::new().unwrap();
    build_store(&dir, 100, b"tiny");

    let seg = dir.path().join("seg_0");
    std::fs::remove_file(&seg).unwrap();
    std::fs::create_dir(&seg).unwrap();

    assert!(matches!(
        SegFile::open(&options(&dir, 100)),
        Err(Error::IsDirectory(_))
    ));
}

#[test]
fn inconsistent_metadata_fields() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();

    // segment_count = 1, segment_size = 100, used_bytes = 200: used bytes
    // exceed the allocated space.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1i64.to_le_bytes());
    bytes.extend_from_slice(&100i64.to_le_bytes());
    bytes.extend_from_slice(&200i64.to_le_bytes());
    std::fs::write(dir.path().join("seg_mdata"), &bytes).unwrap();

    assert!(matches!(
        SegFile::open(&options(&dir, 100)),
        Err(Error::InvalidMeta(_))
    ));
}

#[test]
fn truncated_metadata_file() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("seg_mdata"), [0u8; 8]).unwrap();

    assert!(matches!(
        SegFile::open(&options(&dir, 100)),
        Err(Error::InvalidMeta(_))
    ));
}
