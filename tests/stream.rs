//! Streaming producer/consumer tests across threads and shared memory mappings

use ring_channel::{channel, Consumer, Producer, RingChannel};
use std::thread;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

fn push_all(producer: &mut Producer, data: &[u8]) {
    let mut rest = data;
    while let Some(left) = producer.append_fill(rest) {
        rest = left;
        thread::yield_now();
    }
}

fn drain_until_eof(consumer: &mut Consumer) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(byte) = consumer.blocking_read() {
        out.push(byte);
    }
    out
}

#[test]
fn test_stream_between_threads() {
    let data = pattern(1 << 20);
    let (mut producer, mut consumer) = channel(4093).unwrap();

    let reader = thread::spawn(move || drain_until_eof(&mut consumer));

    push_all(&mut producer, &data);
    producer.set_eof();

    let received = reader.join().unwrap();
    assert_eq!(received.len(), data.len());
    assert_eq!(received, data);
}

#[test]
fn test_stream_with_bulk_reads() {
    let data = pattern(256 * 1024);
    let (mut producer, mut consumer) = channel(1000).unwrap();

    let reader = thread::spawn(move || {
        let mut out = Vec::new();
        let mut buf = [0u8; 333];
        loop {
            let n = consumer.read_into(&mut buf);
            if n > 0 {
                out.extend_from_slice(&buf[..n]);
                continue;
            }
            match consumer.blocking_read() {
                Some(byte) => out.push(byte),
                None => return out,
            }
        }
    });

    push_all(&mut producer, &data);
    producer.set_eof();

    assert_eq!(reader.join().unwrap(), data);
}

#[test]
fn test_stream_over_shared_memory() {
    let name = format!("test_stream_{}", std::process::id());
    let data = pattern(300_000);

    let mut producer = Producer::create_shm(&name, 512).unwrap();
    // A second, independent mapping of the same object
    let mut consumer = Consumer::open_shm(&name).unwrap();
    assert_eq!(consumer.size(), 512);
    assert!(!producer.handle().ptr_eq(&consumer.ring().handle()));

    let reader = thread::spawn(move || drain_until_eof(&mut consumer));

    push_all(&mut producer, &data);
    let ring = producer.set_eof();

    assert_eq!(reader.join().unwrap(), data);
    assert!(ring.is_eof());
}

#[test]
fn test_ping_pong_wakeups_at_empty_boundary() {
    // Every append lands on an empty ring whose consumer is parked or about
    // to park; a lost wakeup hangs this test.
    let (mut ping_tx, mut ping_rx) = channel(1).unwrap();
    let (mut pong_tx, mut pong_rx) = channel(1).unwrap();
    let rounds = 20_000u32;

    let echo = thread::spawn(move || {
        let mut count = 0u32;
        while let Some(byte) = ping_rx.blocking_read() {
            pong_tx.append(&[byte.wrapping_add(1)]).unwrap();
            count += 1;
        }
        pong_tx.set_eof();
        count
    });

    for i in 0..rounds {
        let byte = i as u8;
        ping_tx.append(&[byte]).unwrap();
        assert_eq!(pong_rx.blocking_read(), Some(byte.wrapping_add(1)));
    }
    ping_tx.set_eof();

    assert_eq!(echo.join().unwrap(), rounds);
    assert_eq!(pong_rx.blocking_read(), None);
}

#[test]
fn test_eof_right_after_last_append() {
    for round in 0..200usize {
        let (mut producer, mut consumer) = channel(64).unwrap();
        let data = pattern(round % 64 + 1);

        let reader = thread::spawn(move || drain_until_eof(&mut consumer));

        producer.append(&data).unwrap();
        producer.set_eof();

        assert_eq!(reader.join().unwrap(), data);
    }
}

#[test]
fn test_view_observes_both_sides() {
    let ring = RingChannel::create(10).unwrap();
    let observer = RingChannel::attach(ring.handle()).unwrap();
    let (mut producer, mut consumer) = ring.split();

    producer.append(&[1, 2, 3, 4]).unwrap();
    assert_eq!(observer.length(), 4);
    assert_eq!(observer.remaining(), 6);

    consumer.read();
    assert_eq!(observer.length(), 3);
    assert!(!observer.is_eof());

    producer.set_eof();
    assert!(!observer.is_eof());
    assert_eq!(consumer.read_to_head().count(), 3);
    assert!(observer.is_eof());
}

#[test]
fn test_observer_stays_in_bounds_under_load() {
    let ring = RingChannel::create(4).unwrap();
    let observer = RingChannel::attach(ring.handle()).unwrap();
    let (mut producer, mut consumer) = ring.split();
    let data = pattern(1 << 18);

    let reader = thread::spawn(move || drain_until_eof(&mut consumer).len());
    let watcher = thread::spawn(move || {
        let mut samples = 0usize;
        loop {
            assert!(observer.length() <= observer.size());
            assert!(observer.remaining() <= observer.size());
            samples += 1;
            if observer.is_eof() {
                return samples;
            }
        }
    });

    push_all(&mut producer, &data);
    producer.set_eof();

    assert_eq!(reader.join().unwrap(), data.len());
    assert!(watcher.join().unwrap() > 0);
}
