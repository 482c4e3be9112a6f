// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Stream hub integration: subscription filtering and slow-client
//! isolation.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;

use kiln_core::message::BroadcastMsg;
use kiln_core::types::{ChamberId, MachineId, SymbolPath, Value};
use kiln_stream::{StreamHub, CLIENT_QUEUE_CAPACITY};

fn broadcast(machine: &str, chamber: &str, n: i64) -> BroadcastMsg {
    let mut data = HashMap::new();
    data.insert(SymbolPath::new("GVL.seq"), Value::Int64(n));
    BroadcastMsg::data(
        MachineId::new(machine),
        ChamberId::new(chamber),
        data,
        Utc::now(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_client_saturates_alone() {
    let hub = StreamHub::start();

    // Both subscribe to (m1, c1); A never drains its queue.
    let mut stalled = hub.register().await.unwrap();
    stalled
        .subs
        .write()
        .subscribe(MachineId::new("m1"), Some(ChamberId::new("c1")));

    let mut healthy = hub.register().await.unwrap();
    healthy
        .subs
        .write()
        .subscribe(MachineId::new("m1"), Some(ChamberId::new("c1")));

    // The healthy client consumes concurrently.
    let consumer = tokio::spawn(async move {
        let mut received = 0u64;
        while let Ok(Some(_)) =
            tokio::time::timeout(Duration::from_secs(2), healthy.out_rx.recv()).await
        {
            received += 1;
            if received == 1000 {
                break;
            }
        }
        received
    });

    let publisher = hub.publisher();
    for n in 0..1000 {
        publisher.send(broadcast("m1", "c1", n)).await.unwrap();
        // Pace the burst so the healthy consumer stays scheduled; the
        // stalled client still saturates because it never drains at all.
        if n % 25 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let received = consumer.await.unwrap();
    assert!(
        received >= 900,
        "healthy client got {} of 1000 broadcasts",
        received
    );

    // The stalled client's queue capped out; everything beyond was dropped
    // for it alone.
    let mut stalled_count = 0;
    while stalled.out_rx.try_recv().is_ok() {
        stalled_count += 1;
    }
    assert_eq!(stalled_count, CLIENT_QUEUE_CAPACITY);

    let stats = hub.stats();
    assert!(stats.messages_dropped >= (1000 - CLIENT_QUEUE_CAPACITY) as u64);

    hub.stop().await;
}

#[tokio::test]
async fn unsubscribed_chamber_is_never_delivered() {
    let hub = StreamHub::start();

    let mut client = hub.register().await.unwrap();
    client
        .subs
        .write()
        .subscribe(MachineId::new("m1"), Some(ChamberId::new("c1")));

    let publisher = hub.publisher();
    for n in 0..50 {
        publisher.send(broadcast("m1", "c2", n)).await.unwrap();
        publisher.send(broadcast("m2", "c1", n)).await.unwrap();
    }
    publisher.send(broadcast("m1", "c1", 999)).await.unwrap();

    // Exactly the one matching broadcast arrives.
    let text = tokio::time::timeout(Duration::from_secs(2), client.out_rx.recv())
        .await
        .expect("matching broadcast in time")
        .expect("queue open");
    assert!(text.contains("999"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.out_rx.try_recv().is_err());

    hub.stop().await;
}

#[tokio::test]
async fn all_chambers_sentinel_matches_everything() {
    let hub = StreamHub::start();

    let mut client = hub.register().await.unwrap();
    client.subs.write().subscribe(MachineId::new("m1"), None);

    let publisher = hub.publisher();
    publisher.send(broadcast("m1", "c1", 1)).await.unwrap();
    publisher.send(broadcast("m1", "c2", 2)).await.unwrap();
    publisher.send(broadcast("m2", "c1", 3)).await.unwrap();

    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(2), client.out_rx.recv())
            .await
            .expect("broadcast in time")
            .expect("queue open");
    }

    // The m2 broadcast does not arrive.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.out_rx.try_recv().is_err());

    hub.stop().await;
}

#[tokio::test]
async fn recent_ring_serves_chamber_history() {
    let hub = StreamHub::start();

    let publisher = hub.publisher();
    for n in 0..5 {
        publisher.send(broadcast("m1", "c1", n)).await.unwrap();
    }
    publisher.send(broadcast("m1", "c2", 99)).await.unwrap();

    // Give the loop a moment to fan out.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let recent = hub.recent(&MachineId::new("m1"), &ChamberId::new("c1"));
    assert_eq!(recent.len(), 5);
    assert!(hub
        .recent(&MachineId::new("m2"), &ChamberId::new("c1"))
        .is_empty());

    hub.stop().await;
}
