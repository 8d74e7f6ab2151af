//! Concurrent writers and sync callers hammering one store.

use segfile::{Options, SegFile};
use tempfile::TempDir;

fn open_store(dir: &TempDir, segment_size: u64) -> SegFile {
    let mut o = Options::new();
    o.path(dir.path());
    o.segment_size(segment_size);
    SegFile::open(&o).unwrap()
}

#[test]
fn concurrent_writers_each_syncing() {
    const WRITERS: usize = 16;
    const CHUNK: usize = 512;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 300);

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let store = store.clone();
            std::thread::spawn(move || {
                let payload = vec![w as u8 + 1; CHUNK];
                store.write_at(&payload, (w * CHUNK) as u64).unwrap();
                // Every writer requests durability; the requests coalesce
                // into at most one msync per flush window.
                store.sync().unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.size().unwrap(), (WRITERS * CHUNK) as u64);
    store.close().unwrap();

    // Everything the writers synced must be there after a reopen.
    let store = open_store(&dir, 300);
    for w in 0..WRITERS {
        let mut buf = vec![0u8; CHUNK];
        store.read_at(&mut buf, (w * CHUNK) as u64).unwrap();
        assert!(buf.iter().all(|b| *b == w as u8 + 1), "writer {w} lost data");
    }
    store.close().unwrap();
}

#[test]
fn repeated_syncs_make_progress() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 4096);

    // Each iteration must complete within one flush cadence, not queue up
    // behind the previous one.
    for i in 0..20u8 {
        store.write_at(&[i], i as u64).unwrap();
        store.sync().unwrap();
    }

    assert_eq!(store.size().unwrap(), 20);
    store.close().unwrap();
}

#[test]
fn readers_run_alongside_writers() {
    const ROUNDS: usize = 50;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, 128);

    // Fill a region the readers will race over; the writer keeps extending
    // the store past it.
    store.write_at(&[42u8; 1024], 0).unwrap();

    let writer = {
        let store = store.clone();
        std::thread::spawn(move || {
            for round in 0..ROUNDS {
                let off = 1024 + round * 100;
                store.write_at(&[7u8; 100], off as u64).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let mut buf = [0u8; 1024];
                    assert_eq!(store.read_at(&mut buf, 0).unwrap(), 1024);
                    assert!(buf.iter().all(|b| *b == 42));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(store.size().unwrap(), (1024 + ROUNDS * 100) as u64);
    store.close().unwrap();
}
