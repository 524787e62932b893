//! End-to-end translator behaviour on hand-built frames

mod common;

use common::*;
use flownat::dataplane::{
    AllocationPolicy, DropReason, FlowKey, PortIndex, Timestamp, Translator, VerifyOrder,
};
use flownat::protocol::TransportProtocol;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;

fn t(secs: u64) -> Timestamp {
    Timestamp::from_secs(secs)
}

fn translator() -> Translator {
    Translator::new(nat_config()).unwrap()
}

fn assert_unique(nat: &Translator) {
    let keys: HashSet<FlowKey> = nat.table().iter().map(|e| e.key).collect();
    let indices: HashSet<PortIndex> = nat.table().iter().map(|e| e.index).collect();
    assert_eq!(keys.len(), nat.table().len());
    assert_eq!(indices.len(), nat.table().len());
    assert!(nat.table().len() <= nat.table().capacity());
}

#[test]
fn test_forward_then_return_round_trip() {
    let mut nat = translator();

    let out = nat
        .process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(0))
        .expect("outbound packet forwarded");
    assert_eq!(out.egress, WAN);
    assert_eq!(
        endpoints(&out.packet),
        Endpoints {
            src_addr: EXTERNAL,
            src_port: 1024,
            dst_addr: SERVER,
            dst_port: 80,
        }
    );
    assert_eq!(nat.table().len(), 1);

    let back = nat
        .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(1))
        .expect("reply forwarded");
    assert_eq!(back.egress, LAN);
    assert_eq!(
        endpoints(&back.packet),
        Endpoints {
            src_addr: SERVER,
            src_port: 80,
            dst_addr: HOST,
            dst_port: 5000,
        }
    );
    assert_eq!(nat.table().len(), 1);
}

#[test]
fn test_reply_egresses_on_original_ingress() {
    let mut nat = translator();
    nat.process(LAN, &udp_frame(HOST, 40000, SERVER, 53), t(0)).unwrap();
    nat.process(LAN2, &udp_frame(HOST, 40000, SERVER, 53), t(0)).unwrap();

    // same 5-tuple on two interfaces is two flows
    assert_eq!(nat.table().len(), 2);

    let first = nat.process(WAN, &udp_frame(SERVER, 53, EXTERNAL, 1024), t(1)).unwrap();
    let second = nat.process(WAN, &udp_frame(SERVER, 53, EXTERNAL, 1025), t(1)).unwrap();
    assert_eq!(first.egress, LAN);
    assert_eq!(second.egress, LAN2);
}

#[test]
fn test_anti_spoof_rejection() {
    let mut nat = translator();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(0)).unwrap();

    assert!(nat
        .process(WAN, &tcp_frame(ATTACKER, 80, EXTERNAL, 1024), t(1))
        .is_none());
    assert!(nat
        .process(WAN, &tcp_frame(SERVER, 8080, EXTERNAL, 1024), t(1))
        .is_none());
    assert!(nat
        .process(WAN, &udp_frame(SERVER, 80, EXTERNAL, 1024), t(1))
        .is_none());

    assert_eq!(nat.metrics().drops.spoof_mismatch.get(), 3);
    assert_eq!(nat.table().len(), 1);
}

#[test]
fn test_idle_eviction() {
    let mut nat = translator();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(0)).unwrap();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(3)).unwrap();

    let entry = nat.table().lookup_by_index(PortIndex::new(0)).unwrap();
    assert_eq!(entry.last_seen, t(3));

    // 9s idle: still live
    assert!(nat
        .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(12))
        .is_some());

    let mut nat = translator();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(3)).unwrap();
    assert_eq!(
        nat.decide(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(15)),
        Err(DropReason::NoFlow)
    );
    assert!(nat.table().is_empty());
}

#[test]
fn test_idle_boundary_is_exclusive() {
    let mut nat = translator();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(3)).unwrap();

    // now - last_seen == idle_timeout counts as expired
    assert!(nat
        .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(13))
        .is_none());
}

#[test]
fn test_capacity_rejection_without_preemption() {
    let mut nat = translator();
    for i in 0..4 {
        nat.process(LAN, &tcp_frame(HOST, 5000 + i, SERVER, 80), t(i as u64))
            .unwrap();
    }
    assert!(nat.table().is_full());
    let before: Vec<_> = nat.table().iter().cloned().collect();

    assert_eq!(
        nat.decide(LAN, &tcp_frame(HOST, 6000, SERVER, 80), t(5)),
        Err(DropReason::TableFull)
    );

    let after: Vec<_> = nat.table().iter().cloned().collect();
    assert_eq!(before, after);

    // existing flows keep working
    for i in 0..4u16 {
        assert!(nat
            .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024 + i), t(6))
            .is_some());
    }
}

#[test]
fn test_idempotent_refresh() {
    let mut nat = translator();
    let frame = udp_frame(HOST, 40000, SERVER, 53);

    for now in 0..5 {
        let out = nat.process(LAN, &frame, t(now)).unwrap();
        assert_eq!(endpoints(&out.packet).src_port, 1024);
    }

    assert_eq!(nat.table().len(), 1);
    let entry = nat.table().iter().next().unwrap();
    assert_eq!(entry.index, PortIndex::new(0));
    assert_eq!(entry.created_at, t(0));
    assert_eq!(entry.last_seen, t(4));
    assert_eq!(nat.metrics().flows_created.get(), 1);
}

#[test]
fn test_uniqueness_under_mixed_traffic() {
    let mut config = nat_config();
    config.capacity = 16;
    let mut nat = Translator::new(config).unwrap();

    let hosts = [HOST, Ipv4Addr::new(10, 0, 0, 6), Ipv4Addr::new(10, 0, 0, 7)];
    let mut now = 0;
    for round in 0..6u16 {
        for (h, host) in hosts.iter().enumerate() {
            let sport = 3000 + round % 4;
            let frame = if h % 2 == 0 {
                tcp_frame(*host, sport, SERVER, 443)
            } else {
                udp_frame(*host, sport, SERVER, 53)
            };
            nat.process(if h == 2 { LAN2 } else { LAN }, &frame, t(now));
            assert_unique(&nat);
        }
        now += 4;
    }
}

#[test]
fn test_verify_then_refresh_does_not_extend_lifetime() {
    let mut nat = translator();
    assert_eq!(nat.config().verify_order, VerifyOrder::VerifyThenRefresh);
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(0)).unwrap();

    nat.process(WAN, &tcp_frame(ATTACKER, 80, EXTERNAL, 1024), t(8));
    assert!(nat
        .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(11))
        .is_none());
}

#[test]
fn test_refresh_then_verify_extends_lifetime() {
    let mut config = nat_config();
    config.verify_order = VerifyOrder::RefreshThenVerify;
    let mut nat = Translator::new(config).unwrap();
    nat.process(LAN, &tcp_frame(HOST, 5000, SERVER, 80), t(0)).unwrap();

    assert!(nat
        .process(WAN, &tcp_frame(ATTACKER, 80, EXTERNAL, 1024), t(8))
        .is_none());
    let back = nat
        .process(WAN, &tcp_frame(SERVER, 80, EXTERNAL, 1024), t(11))
        .unwrap();
    assert_eq!(endpoints(&back.packet).dst_addr, HOST);
}

#[test]
fn test_round_robin_allocation() {
    let mut config = nat_config();
    config.allocation = AllocationPolicy::RoundRobin;
    config.sweep_interval = Some(Duration::from_secs(1));
    let mut nat = Translator::new(config).unwrap();

    let port_of = |nat: &mut Translator, sport: u16, now: u64| {
        let out = nat
            .process(LAN, &udp_frame(HOST, sport, SERVER, 53), t(now))
            .unwrap();
        endpoints(&out.packet).src_port
    };

    assert_eq!(port_of(&mut nat, 1, 0), 1024);
    assert_eq!(port_of(&mut nat, 2, 0), 1025);

    assert_eq!(port_of(&mut nat, 2, 8), 1025);
    // first flow expires at t=11; round robin moves on instead of reusing 1024
    assert_eq!(port_of(&mut nat, 3, 11), 1026);
    assert_eq!(port_of(&mut nat, 4, 11), 1027);
    assert_eq!(port_of(&mut nat, 5, 11), 1024);
}

#[test]
fn test_lowest_free_reuses_expired_port() {
    let mut config = nat_config();
    config.sweep_interval = Some(Duration::from_secs(1));
    let mut nat = Translator::new(config).unwrap();

    nat.process(LAN, &udp_frame(HOST, 1, SERVER, 53), t(0)).unwrap();
    nat.process(LAN, &udp_frame(HOST, 2, SERVER, 53), t(5)).unwrap();

    let out = nat
        .process(LAN, &udp_frame(HOST, 3, SERVER, 53), t(11))
        .unwrap();
    assert_eq!(endpoints(&out.packet).src_port, 1024);
}

#[test]
fn test_malformed_input_never_creates_state() {
    let mut nat = translator();
    let good = tcp_frame(HOST, 5000, SERVER, 80);

    for len in 0..good.len() {
        nat.process(LAN, &good[..len], t(0));
        nat.process(WAN, &good[..len], t(0));
    }
    // corrupted headers are dropped, never a panic
    for i in 0..54 {
        let mut bad = good.clone();
        bad[i] ^= 0xff;
        nat.process(WAN, &bad, t(0));
        // an IPv4 header byte flip breaks the header checksum
        if (14..34).contains(&i) {
            assert!(nat.process(LAN, &bad, t(0)).is_none());
        }
    }

    assert!(nat.table().iter().all(|e| e.key.protocol == TransportProtocol::Tcp));
    assert_unique(&nat);
}

#[test]
fn test_corrupted_ipv4_header_is_not_forwarded() {
    let mut nat = translator();
    let mut frame = tcp_frame(HOST, 5000, SERVER, 80);
    // flip a bit in the source address without fixing the header checksum
    frame[14 + 12] ^= 0x01;

    assert_eq!(nat.decide(LAN, &frame, t(0)), Err(DropReason::Malformed));
    assert!(nat.process(LAN, &frame, t(0)).is_none());
    assert!(nat.table().is_empty());
    assert_eq!(nat.metrics().drops.malformed.get(), 2);

    let mut reply = tcp_frame(SERVER, 80, EXTERNAL, 1024);
    reply[14 + 8] ^= 0x01;
    assert_eq!(nat.decide(WAN, &reply, t(0)), Err(DropReason::Malformed));
}
