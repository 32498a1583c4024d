//! Concurrency tests
//!
//! These tests verify the hub under concurrent use:
//! - Many connections registering and leaving at once
//! - Broadcasts racing with registrations
//! - A slow consumer does not hold back healthy ones

use std::collections::HashSet;
use std::time::Duration;

use notify_hub::{
    ClientHandle, HubHandle,
    protocol::{Envelope, NoticeLevel, SystemNotice},
};
use pretty_assertions::assert_eq;

use crate::helpers::*;

fn notice(content: &str) -> Envelope {
    Envelope::system(&SystemNotice::new(NoticeLevel::Info, "load", content))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registrations_are_all_counted() {
    let hub = HubHandle::spawn(test_hub_config(16));

    let mut tasks = vec![];
    for i in 0..50 {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, endpoint) = ClientHandle::new(Some(format!("user-{}", i % 5)), 16);
            hub.register(handle).await.unwrap();
            endpoint
        }));
    }

    let mut endpoints = vec![];
    for task in tasks {
        endpoints.push(task.await.unwrap());
    }

    let ids: HashSet<_> = endpoints.iter().map(|endpoint| endpoint.id()).collect();
    assert_eq!(ids.len(), 50);
    assert_eq!(hub.count_clients().await, 50);

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.users, 5);
    assert_eq!(stats.total_registered, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_register_and_unregister() {
    let hub = HubHandle::spawn(test_hub_config(16));

    let mut tasks = vec![];
    for i in 0..40 {
        let hub = hub.clone();
        tasks.push(tokio::spawn(async move {
            let (handle, endpoint) = ClientHandle::new(None, 16);
            let id = handle.id();
            hub.register(handle).await.unwrap();
            // every other client leaves right away
            if i % 2 == 0 {
                assert!(hub.unregister(id).await.unwrap());
            }
            endpoint
        }));
    }

    let mut endpoints = vec![];
    for task in tasks {
        endpoints.push(task.await.unwrap());
    }

    assert_eq!(hub.count_clients().await, 20);

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.total_registered, 40);
    assert_eq!(stats.total_unregistered, 20);

    let closed = endpoints
        .iter()
        .filter(|endpoint| endpoint.handle().is_closed())
        .count();
    assert_eq!(closed, 20, "unregistered clients are closed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcasts_race_with_registrations() {
    let hub = HubHandle::spawn(test_hub_config(256));

    let broadcaster = {
        let hub = hub.clone();
        tokio::spawn(async move {
            for i in 0..100 {
                hub.broadcast_all(notice(&i.to_string())).await.unwrap();
            }
        })
    };

    let mut endpoints = vec![];
    for _ in 0..20 {
        let (handle, endpoint) = ClientHandle::new(None, 256);
        hub.register(handle).await.unwrap();
        endpoints.push(endpoint);
    }

    broadcaster.await.unwrap();
    assert_eq!(hub.count_clients().await, 20);

    // whatever subset a client saw, it saw it in order after its welcome
    for mut endpoint in endpoints {
        let welcome = endpoint.try_recv().expect("welcome queued first");
        assert!(welcome.contains("welcome"));

        let mut last = None;
        while let Some(frame) = endpoint.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            let n: u32 = value["data"]["content"].as_str().unwrap().parse().unwrap();
            assert!(last.is_none_or(|last| n > last), "out of order: {n} after {last:?}");
            last = Some(n);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_consumer_is_evicted_without_blocking_others() {
    let hub = HubHandle::spawn(test_hub_config(8));

    // a healthy connection with running loops, drained by its peer
    let (_id, mut healthy, _tasks) =
        connect_with(&hub, None, 8, notify_hub::actors::client::ConnectionConfig::default()).await;
    healthy.next_json().await; // welcome

    // a stalled client whose mailbox nobody drains
    let (stalled, _stalled_endpoint) = ClientHandle::new(None, 8);
    hub.register(stalled.clone()).await.unwrap();

    for i in 0..20 {
        hub.broadcast_all(notice(&i.to_string())).await.unwrap();
        let received = healthy.next_json().await;
        assert_eq!(received["data"]["content"], i.to_string());
    }

    assert!(stalled.is_closed());
    assert_eq!(hub.count_clients().await, 1);

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.total_evicted, 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(hub.count_clients().await, 1, "healthy client stays registered");
}
