//! End-to-end submission: queue → submitter → mock orderer.

mod common;

use common::{orderer_config, MockOrderer};
use evb_core::decode_fragments;
use rust_evb::network::discovery::{ServiceAdvert, StaticDirectory};
use rust_evb::network::protocol::Request;
use rust_evb::{BlockingQueue, EvbError, Fragment, OrdererClient, Submitter};
use std::sync::Arc;
use std::thread;

fn connected_client(port: u16) -> OrdererClient<StaticDirectory> {
    let directory = StaticDirectory(vec![ServiceAdvert::new(port, "ORDERER", "daq")]);
    let mut client = OrdererClient::with_directory(orderer_config(1), directory);
    client.connect("pipeline", &[1, 2]).expect("Failed to connect");
    client
}

#[test]
fn test_submitter_delivers_all_queued_fragments() {
    let orderer = MockOrderer::start();
    let queue = Arc::new(BlockingQueue::new());
    let submitter = Submitter::spawn("test", connected_client(orderer.port), Arc::clone(&queue))
        .expect("Failed to start submitter");

    let producers: Vec<_> = (1..=2u32)
        .map(|sid| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for ts in 0..100u64 {
                    queue.queue(Fragment::new(ts, sid, vec![sid as u8; 16]));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("Producer panicked");
    }

    let stats = submitter.stop().expect("Submitter failed");
    assert_eq!(stats.fragments, 200);
    assert_eq!(stats.bytes, 200 * (20 + 16));
    assert!(stats.batches >= 1);

    let received = orderer.finish();
    assert_eq!(received.first().map(|m| m.request), Some(Request::Connect));
    assert_eq!(received.last().map(|m| m.request), Some(Request::Disconnect));

    let delivered: Vec<Fragment> = received
        .iter()
        .filter(|m| m.request == Request::Fragments)
        .flat_map(|m| decode_fragments(&m.body).expect("Bad FRAGMENTS body"))
        .collect();
    assert_eq!(delivered.len(), 200);
    for sid in 1..=2 {
        let timestamps: Vec<u64> = delivered
            .iter()
            .filter(|f| f.source_id == sid)
            .map(|f| f.timestamp)
            .collect();
        assert_eq!(timestamps, (0..100).collect::<Vec<_>>());
    }
}

#[test]
fn test_stop_flushes_fragments_queued_before_stop() {
    let orderer = MockOrderer::start();
    let queue = Arc::new(BlockingQueue::with_wake_threshold(usize::MAX));
    let submitter = Submitter::spawn("flush", connected_client(orderer.port), Arc::clone(&queue))
        .expect("Failed to start submitter");

    for ts in 0..5 {
        queue.queue(Fragment::new(ts, 1, Vec::<u8>::new()));
    }
    let stats = submitter.stop().expect("Submitter failed");
    assert_eq!(stats.fragments, 5);
    assert!(queue.is_empty());
    orderer.finish();
}

#[test]
fn test_rejected_batch_surfaces_on_stop() {
    let orderer = MockOrderer::with_replies(|message| match message.request {
        Request::Fragments => "ERROR sorter full".to_string(),
        _ => "OK".to_string(),
    });
    let queue = Arc::new(BlockingQueue::new());
    let submitter = Submitter::spawn("reject", connected_client(orderer.port), Arc::clone(&queue))
        .expect("Failed to start submitter");

    queue.queue(Fragment::new(1, 1, vec![0u8; 4]));
    match submitter.stop() {
        Err(EvbError::Orderer(err)) => assert!(err.is_protocol()),
        other => panic!("Expected orderer error, got {:?}", other),
    }
    orderer.finish();
}
