use hft_broadcast::{
    MmapStorage, MsgTypeId, Region, StartPosition, TRAILER_LENGTH, local_channel,
};
use std::thread;

const N: u64 = 100_000;
const N_RECEIVERS: usize = 3;

fn tick() -> MsgTypeId {
    MsgTypeId::new(1).unwrap()
}

#[test]
fn one_writer_many_readers_under_contention() {
    let (mut tx, rx) = local_channel(4096).unwrap();

    let readers: Vec<_> = (0..N_RECEIVERS)
        .map(|_| {
            let mut rx = rx.clone();
            thread::spawn(move || {
                let mut last: Option<u64> = None;
                let mut received = 0u64;
                loop {
                    let Some((v0, v1)) =
                        rx.try_recv(|_, payload| (payload.read_u64_le(0), payload.read_u64_le(8)))
                    else {
                        std::hint::spin_loop();
                        continue;
                    };
                    assert_eq!(v1, v0 + 1, "validated record is torn");
                    if let Some(prev) = last {
                        assert!(v0 > prev, "out of order: {v0} after {prev}");
                    }
                    last = Some(v0);
                    received += 1;
                    if v0 == N - 1 {
                        return (received, rx.lapped_count());
                    }
                }
            })
        })
        .collect();

    let writer = thread::spawn(move || {
        for i in 0..N {
            tx.transmit_with(tick(), 16, |record| {
                record.put_u64_le(0, i);
                record.put_u64_le(8, i + 1);
            })
            .unwrap();
        }
        tx.position()
    });

    assert_eq!(writer.join().unwrap(), rx.region().tail_position());
    for reader in readers {
        let (received, lapped) = reader.join().unwrap();
        assert!(received >= 1);
        assert!(received <= N);
        if received < N {
            assert!(lapped > 0, "records were lost without a lap");
        }
    }
}

#[test]
fn restarted_writer_resumes_file_backed_region() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feed.dat");
    let len = 1024 + TRAILER_LENGTH;

    {
        let (mut tx, _) = Region::create(MmapStorage::create(&path, len).unwrap()).unwrap();
        for i in 1..=5u64 {
            tx.transmit(tick(), &i.to_le_bytes()).unwrap();
        }
        assert_eq!(tx.position(), 80);
    }

    let (mut tx, region) = Region::create(MmapStorage::open(&path).unwrap()).unwrap();
    assert_eq!(tx.position(), 80, "tail is picked up, not reset");
    assert_eq!(region.latest_position(), 64);

    let mut rx = region.receiver_from(StartPosition::Latest);
    assert_eq!(rx.try_recv(|_, payload| payload.read_u64_le(0)), Some(5));

    let pos = tx.transmit(tick(), &6u64.to_le_bytes()).unwrap();
    assert_eq!(pos, 80);
    assert_eq!(rx.try_recv(|_, payload| payload.read_u64_le(0)), Some(6));
}

#[test]
fn separate_mappings_of_one_file_share_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feed.dat");

    let (mut tx, _) =
        Region::create(MmapStorage::create(&path, 4096 + TRAILER_LENGTH).unwrap()).unwrap();
    let reader_region = Region::attach(MmapStorage::open(&path).unwrap()).unwrap();
    let mut rx = reader_region.receiver();

    let id = MsgTypeId::new(7).unwrap();
    tx.transmit(id, b"bid=101.25").unwrap();
    tx.transmit(id, b"ask=101.50").unwrap();

    let mut seen = Vec::new();
    while let Some(quote) = rx.try_recv(|_, payload| payload.to_vec()) {
        seen.push(quote);
    }
    assert_eq!(seen, vec![b"bid=101.25".to_vec(), b"ask=101.50".to_vec()]);
    assert_eq!(rx.lapped_count(), 0);
}

#[test]
fn slow_reader_is_lapped_and_catches_up() {
    let (mut tx, mut rx) = local_channel(1024).unwrap();
    for i in 1..=1000u64 {
        tx.transmit(tick(), &i.to_le_bytes()).unwrap();
    }

    assert_eq!(rx.try_recv(|_, payload| payload.read_u64_le(0)), Some(1000));
    assert!(rx.lapped_count() > 0);
    assert_eq!(rx.try_recv(|_, _| ()), None);
}

#[test]
fn negative_type_ids_are_rejected() {
    assert!(MsgTypeId::new(-1).is_err());
    assert!(MsgTypeId::try_from(-42).is_err());
    assert_eq!(i32::from(MsgTypeId::new(0).unwrap()), 0);
}
