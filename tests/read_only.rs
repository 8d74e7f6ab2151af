//! Read-only mode: reads work, every mutation fails, nothing is created.

use segfile::{Error, Options, SegFile};
use tempfile::TempDir;

fn build_store(dir: &TempDir, segment_size: u64, payload: &[u8]) {
    let mut o = Options::new();
    o.path(dir.path());
    o.segment_size(segment_size);
    let store = SegFile::open(&o).unwrap();
    store.write_at(payload, 0).unwrap();
    store.sync().unwrap();
    store.close().unwrap();
}

fn open_read_only(dir: &TempDir, memory_map: bool) -> segfile::Result<SegFile> {
    let mut o = Options::new();
    o.path(dir.path());
    o.read_only(true);
    o.memory_map(memory_map);
    SegFile::open(&o)
}

#[test]
fn reads_but_never_writes() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..30).collect();
    build_store(&dir, 10, &payload);

    let store = open_read_only(&dir, false).unwrap();
    assert_eq!(store.size().unwrap(), 30);

    let mut buf = [0u8; 10];
    assert_eq!(store.read_at(&mut buf, 0).unwrap(), 10);
    assert_eq!(buf.to_vec(), payload[..10]);

    assert!(matches!(store.write_at(b"x", 0), Err(Error::ReadOnly)));
    assert!(matches!(store.write(b"x"), Err(Error::ReadOnly)));
    assert!(matches!(store.grow(1), Err(Error::ReadOnly)));
    assert!(matches!(store.clear(), Err(Error::ReadOnly)));

    // Cursor-only operations are fine.
    store.reset().unwrap();
    store.sync().unwrap();
    store.close().unwrap();
}

#[test]
fn missing_store_cannot_be_opened_read_only() {
    let dir = TempDir::new().unwrap();
    let err = open_read_only(&dir, false).unwrap_err();
    assert!(matches!(err, Error::Io(_)));
    // Nothing was created by the failed attempt.
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn end_of_stream_past_the_allocation() {
    let dir = TempDir::new().unwrap();
    // Small payload relative to the segment size: exactly one segment exists.
    build_store(&dir, 100, b"0123456789");

    let store = open_read_only(&dir, false).unwrap();

    // At the allocation boundary there is nothing to read.
    assert!(matches!(
        store.read_at(&mut [0u8; 1], 100),
        Err(Error::EndOfStream)
    ));
    assert!(matches!(
        store.read_at(&mut [0u8; 10], 500),
        Err(Error::EndOfStream)
    ));

    // Straddling the boundary yields a short read without error.
    let mut buf = [0xffu8; 40];
    assert_eq!(store.read_at(&mut buf, 95).unwrap(), 5);
    assert_eq!(&buf[..5], &[0u8; 5]);

    store.close().unwrap();
}

#[test]
fn sequential_reads_hit_end_of_stream() {
    let dir = TempDir::new().unwrap();
    build_store(&dir, 100, b"abcdef");

    let store = open_read_only(&dir, false).unwrap();
    let mut buf = [0u8; 100];
    assert_eq!(store.read(&mut buf).unwrap(), 100);
    assert_eq!(&buf[..6], b"abcdef");
    assert!(matches!(store.read(&mut buf), Err(Error::EndOfStream)));
    store.close().unwrap();
}

#[test]
fn read_only_memory_mapped() {
    let dir = TempDir::new().unwrap();
    let payload: Vec<u8> = (0..25).map(|i| i as u8 * 3).collect();
    build_store(&dir, 10, &payload);

    let store = open_read_only(&dir, true).unwrap();
    assert_eq!(store.size().unwrap(), 25);

    let mut buf = [0u8; 25];
    assert_eq!(store.read_at(&mut buf, 0).unwrap(), 25);
    assert_eq!(buf.to_vec(), payload);

    assert!(matches!(store.write_at(b"x", 0), Err(Error::ReadOnly)));
    store.close().unwrap();
}

#[test]
fn read_only_never_allocates() {
    let dir = TempDir::new().unwrap();
    build_store(&dir, 100, b"tiny");

    let before: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();

    let store = open_read_only(&dir, false).unwrap();
    let mut buf = [0u8; 4];
    store.read_at(&mut buf, 0).unwrap();
    store.close().unwrap();

    let mut after: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    let mut before = before;
    before.sort();
    after.sort();
    assert_eq!(before, after);
}
