//! Ordering guarantees when several workers share one translator

mod common;

use common::*;
use flownat::dataplane::{PortIndex, SharedTranslator, Timestamp};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Barrier;
use std::time::Duration;

const WORKERS: usize = 8;

#[test]
fn test_racing_first_packets_create_one_flow() {
    let nat = SharedTranslator::new(nat_config()).unwrap();
    let frame = tcp_frame(HOST, 5000, SERVER, 80);
    let barrier = Barrier::new(WORKERS);

    let ports: Vec<u16> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let nat = nat.clone();
                let frame = &frame;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let out = nat.process(LAN, frame, Timestamp::from_secs(1)).unwrap();
                    endpoints(&out.packet).src_port
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(ports.iter().all(|&p| p == 1024));
    assert_eq!(nat.flow_count(), 1);
    assert_eq!(nat.metrics().flows_created.get(), 1);
}

#[test]
fn test_distinct_flows_get_distinct_ports() {
    let mut config = nat_config();
    config.capacity = 256;
    let nat = SharedTranslator::new(config).unwrap();
    let barrier = Barrier::new(WORKERS);

    let ports: Vec<u16> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|w| {
                let nat = nat.clone();
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    (0..16u16)
                        .map(|i| {
                            let host = Ipv4Addr::new(10, 0, 1, w as u8);
                            let out = nat
                                .process(LAN, &udp_frame(host, 2000 + i, SERVER, 53), Timestamp::ZERO)
                                .unwrap();
                            endpoints(&out.packet).src_port
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect()
    });

    let unique: HashSet<u16> = ports.iter().copied().collect();
    assert_eq!(unique.len(), WORKERS * 16);
    assert_eq!(nat.flow_count(), WORKERS * 16);
}

#[test]
fn test_contention_for_last_slots() {
    let nat = SharedTranslator::new(nat_config()).unwrap();
    let barrier = Barrier::new(WORKERS);

    let admitted: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..WORKERS)
            .map(|w| {
                let nat = nat.clone();
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let frame = tcp_frame(HOST, 7000 + w as u16, SERVER, 80);
                    nat.process(LAN, &frame, Timestamp::ZERO).is_some() as usize
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).sum()
    });

    assert_eq!(admitted, 4);
    assert_eq!(nat.flow_count(), 4);
    assert_eq!(nat.metrics().drops.table_full.get(), (WORKERS - 4) as u64);

    let indices: HashSet<PortIndex> =
        nat.with(|t| t.table().iter().map(|e| e.index).collect());
    assert_eq!(indices.len(), 4);
}

#[test]
fn test_expiry_and_reallocation_race() {
    let mut config = nat_config();
    config.sweep_interval = Some(Duration::from_secs(1));
    let nat = SharedTranslator::new(config).unwrap();

    for i in 0..4 {
        nat.process(LAN, &udp_frame(HOST, 100 + i, SERVER, 53), Timestamp::ZERO)
            .unwrap();
    }

    let barrier = Barrier::new(WORKERS);
    std::thread::scope(|s| {
        for w in 0..WORKERS {
            let nat = nat.clone();
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                let later = Timestamp::from_secs(20 + (w % 3) as u64);
                let frame = udp_frame(HOST, 9000 + w as u16, SERVER, 53);
                nat.process(LAN, &frame, later);
                // stale replies for the old flows must never be forwarded
                let stale = udp_frame(SERVER, 53, EXTERNAL, 1024 + (w % 4) as u16);
                if let Some(out) = nat.process(WAN, &stale, later) {
                    assert!(endpoints(&out.packet).dst_port >= 9000);
                }
            });
        }
    });

    nat.with(|t| {
        let keys: HashSet<_> = t.table().iter().map(|e| e.key).collect();
        let indices: HashSet<_> = t.table().iter().map(|e| e.index).collect();
        assert_eq!(keys.len(), t.table().len());
        assert_eq!(indices.len(), t.table().len());
        assert!(t.table().len() <= 4);
        assert!(t.table().iter().all(|e| e.key.src_port >= 9000));
    });
}

#[test]
fn test_refresh_and_verify_against_expiry() {
    let nat = SharedTranslator::new(nat_config()).unwrap();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), Timestamp::ZERO)
        .unwrap();

    let reply = tcp_frame(SERVER, 80, EXTERNAL, 1024);
    let barrier = Barrier::new(2);

    std::thread::scope(|s| {
        s.spawn(|| {
            barrier.wait();
            nat.sweep(Timestamp::from_secs(10));
        });
        s.spawn(|| {
            barrier.wait();
            // either before the sweep at a live time, or dropped after it
            if let Some(out) = nat.process(WAN, &reply, Timestamp::from_secs(9)) {
                assert_eq!(endpoints(&out.packet).dst_addr, HOST);
            }
        });
    });

    assert!(nat.flow_count() <= 1);
}
