//! Stress tests for sable-netdb
//!
//! These tests exercise the directory, the reputation store, and the
//! selection pools under concurrent writers and readers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use chrono::Utc;
use sable_core::{IdentHash, MockLookup, MockTransport, PeerAddress, PeerInfo, TransportStyle};
use sable_crypto::{RouterKeys, sign_peer_info};
use sable_netdb::{
    DirectoryConfig, DirectoryDeps, NetworkDirectory, Outcome, PoolKind, WeightedSelector,
};

// Test helpers
fn make_directory() -> Arc<NetworkDirectory> {
    let deps = DirectoryDeps::in_memory(
        IdentHash::new([0; 32]),
        Arc::new(MockTransport::new()),
        Arc::new(MockLookup::new()),
    );
    Arc::new(NetworkDirectory::new(DirectoryConfig::testing(), deps))
}

fn make_peer(i: usize) -> (IdentHash, PeerInfo) {
    let keys = RouterKeys::generate();
    let mut options = BTreeMap::new();
    let caps = if i % 4 == 0 { "fR" } else { "R" };
    options.insert("caps".to_string(), caps.to_string());
    let host = format!("10.{}.{}.{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff);
    let info = PeerInfo::unsigned(
        keys.identity(),
        Utc::now(),
        options,
        vec![PeerAddress::new(TransportStyle::Ntcp, host, 7654)],
    );
    (keys.ident_hash(), sign_peer_info(info, &keys.signing).unwrap())
}

#[test]
fn test_concurrent_peer_info_inserts() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 250;

    let directory = make_directory();
    let peers: Vec<Vec<(IdentHash, PeerInfo)>> = (0..THREADS)
        .map(|t| (0..PER_THREAD).map(|i| make_peer(t * PER_THREAD + i)).collect())
        .collect();

    let start = Instant::now();
    let handles: Vec<_> = peers
        .into_iter()
        .map(|batch| {
            let directory = directory.clone();
            thread::spawn(move || {
                for (_, info) in batch {
                    // Every record is offered twice; the copy is a no-op
                    assert!(directory.add_peer_info(info.clone()).unwrap().is_accepted());
                    assert!(!directory.add_peer_info(info).unwrap().is_accepted());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let duration = start.elapsed();
    println!(
        "Inserted {} peer infos from {} threads in {:?}",
        THREADS * PER_THREAD,
        THREADS,
        duration
    );

    assert_eq!(directory.peer_count(), THREADS * PER_THREAD);
    assert_eq!(directory.floodfill_count(), THREADS * PER_THREAD / 4);
}

#[test]
fn test_selection_during_pool_rebuilds() {
    const PEERS: usize = 400;
    const DRAWS: usize = 5_000;

    let directory = make_directory();
    for i in 0..PEERS {
        let (_, info) = make_peer(i);
        directory.add_peer_info(info).unwrap();
    }
    directory.update_selection_pools();

    let start = Instant::now();
    let rebuilder = {
        let directory = directory.clone();
        thread::spawn(move || {
            for _ in 0..50 {
                directory.update_selection_pools();
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let directory = directory.clone();
            thread::spawn(move || {
                let mut drawn = 0;
                for _ in 0..DRAWS {
                    if directory.select_peer(PoolKind::All).is_ok() {
                        drawn += 1;
                    }
                }
                drawn
            })
        })
        .collect();

    rebuilder.join().unwrap();
    let drawn: usize = readers.into_iter().map(|h| h.join().unwrap()).sum();
    let duration = start.elapsed();
    println!(
        "Drew {} peers across 50 pool rebuilds in {:?}",
        drawn, duration
    );

    // Pools are swapped whole, so a reader never sees an empty pool
    assert_eq!(drawn, 4 * DRAWS);
    assert_eq!(directory.pool_size(PoolKind::All), PEERS);
    assert_eq!(directory.pool_size(PoolKind::Floodfill), PEERS / 4);
}

#[test]
fn test_concurrent_outcome_recording() {
    const THREADS: usize = 8;
    const EVENTS: usize = 10_000;

    let directory = make_directory();
    let peers: Vec<IdentHash> = (0..16).map(|i| IdentHash::new([i as u8 + 1; 32])).collect();
    let peers = Arc::new(peers);

    let start = Instant::now();
    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let directory = directory.clone();
            let peers = peers.clone();
            thread::spawn(move || {
                for i in 0..EVENTS {
                    let peer = &peers[(t + i) % peers.len()];
                    let outcome = if i % 2 == 0 {
                        Outcome::SuccessfulTunnelMember
                    } else {
                        Outcome::FailedTunnelMember
                    };
                    directory.reputation().record_outcome(peer, outcome);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    let duration = start.elapsed();
    println!(
        "Recorded {} outcomes in {:?}",
        THREADS * EVENTS,
        duration
    );

    let total: u32 = peers
        .iter()
        .map(|p| {
            let record = directory.reputation().get(p);
            record.count(Outcome::SuccessfulTunnelMember) + record.count(Outcome::FailedTunnelMember)
        })
        .sum();
    assert_eq!(total as usize, THREADS * EVENTS);
}

#[test]
fn test_weighted_selector_distribution() {
    const DRAWS: usize = 100_000;

    let selector = WeightedSelector::new((0..10).map(|i| (i, (i + 1) as f64)));
    let mut counts = [0usize; 10];

    let start = Instant::now();
    for _ in 0..DRAWS {
        counts[*selector.sample().unwrap()] += 1;
    }
    println!("{} weighted draws in {:?}", DRAWS, start.elapsed());

    // Item i carries weight i + 1 out of 55
    for (i, count) in counts.iter().enumerate() {
        let expected = DRAWS as f64 * (i + 1) as f64 / 55.0;
        let observed = *count as f64;
        assert!(
            (observed - expected).abs() < expected * 0.15,
            "item {} drawn {} times, expected about {}",
            i,
            observed,
            expected
        );
    }
}
