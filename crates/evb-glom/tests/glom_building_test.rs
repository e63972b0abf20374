//! Event building over complete fragment streams.

use bytes::Bytes;
use evb_core::stream::write_fragment;
use evb_core::{
    decode_fragments, BodyHeader, Fragment, GlomParameters, RingItem, RingItemReader, RingItemType,
    TimestampPolicy, FRAGMENT_HEADER_SIZE,
};
use evb_glom::{run, GlomSettings, GlomStats};
use std::io::{self, Write};
use std::process::{Command, Stdio};

fn stream(fragments: &[Fragment]) -> Vec<u8> {
    let mut input = Vec::new();
    for fragment in fragments {
        write_fragment(&mut input, fragment).expect("Failed to write fragment");
    }
    input
}

fn build(fragments: &[Fragment], settings: GlomSettings) -> (GlomStats, Vec<RingItem>) {
    let input = stream(fragments);
    let mut output = Vec::new();
    let stats = run(input.as_slice(), &mut output, settings).expect("Event building failed");
    let items = RingItemReader::new(output.as_slice())
        .collect::<io::Result<Vec<_>>>()
        .expect("Output is not a ring item stream");
    (stats, items)
}

fn kinds(items: &[RingItem]) -> Vec<RingItemType> {
    items
        .iter()
        .map(|item| item.kind().expect("Unknown ring item type"))
        .collect()
}

/// Fragments inside a physics event, checking the inclusive size word.
fn event_fragments(item: &RingItem) -> Vec<Fragment> {
    assert_eq!(item.kind(), Some(RingItemType::PhysicsEvent));
    let size = u32::from_ne_bytes(item.payload[..4].try_into().expect("Short payload"));
    assert_eq!(size as usize, item.payload.len());
    decode_fragments(&item.payload.slice(4..)).expect("Bad event payload")
}

fn timestamps(item: &RingItem) -> Vec<u64> {
    event_fragments(item).iter().map(|f| f.timestamp).collect()
}

fn data(timestamp: u64, source_id: u32) -> Fragment {
    Fragment::new(timestamp, source_id, timestamp.to_ne_bytes().to_vec())
}

fn state_change(kind: RingItemType, timestamp: u64, source_id: u32) -> Fragment {
    let item = RingItem::new(
        kind,
        Some(BodyHeader {
            timestamp,
            source_id,
            barrier: kind.as_u32(),
        }),
        Bytes::from_static(b"run title"),
    );
    let body = item.encode().expect("Failed to encode state change");
    Fragment::barrier(timestamp, source_id, kind.as_u32(), body)
}

#[test]
fn test_coincidence_grouping() {
    let fragments = [data(0, 1), data(5, 2), data(12, 1), data(100, 3)];
    let (stats, items) = build(&fragments, GlomSettings::building(10, TimestampPolicy::Earliest, 0));

    assert_eq!(
        kinds(&items),
        vec![
            RingItemType::RingFormat,
            RingItemType::PhysicsEvent,
            RingItemType::PhysicsEvent,
            RingItemType::PhysicsEvent,
        ]
    );
    assert_eq!(timestamps(&items[1]), vec![0, 5]);
    assert_eq!(timestamps(&items[2]), vec![12]);
    assert_eq!(timestamps(&items[3]), vec![100]);
    assert_eq!(stats.fragments, 4);
    assert_eq!(stats.events, 3);
}

#[test]
fn test_window_boundary_is_inclusive() {
    let fragments = [data(0, 1), data(10, 2), data(11, 3)];
    let (_, items) = build(&fragments, GlomSettings::building(10, TimestampPolicy::Earliest, 0));
    assert_eq!(timestamps(&items[1]), vec![0, 10]);
    assert_eq!(timestamps(&items[2]), vec![11]);
}

#[test]
fn test_event_contents_are_preserved() {
    let fragments = [data(7, 4), Fragment::new(9, 5, vec![0xABu8; 37])];
    let (_, items) = build(&fragments, GlomSettings::building(5, TimestampPolicy::Earliest, 0));
    assert_eq!(event_fragments(&items[1]), fragments.to_vec());
}

#[test]
fn test_timestamp_policies() {
    let fragments = [data(10, 1), data(20, 2), data(30, 3)];

    for (policy, expected) in [
        (TimestampPolicy::Earliest, 10),
        (TimestampPolicy::Latest, 30),
        (TimestampPolicy::Average, 20),
    ] {
        let (_, items) = build(&fragments, GlomSettings::building(100, policy, 77));
        assert_eq!(items.len(), 2, "policy {}", policy);
        let header = items[1].body_header.expect("Physics event without body header");
        assert_eq!(header.timestamp, expected, "policy {}", policy);
        assert_eq!(header.source_id, 77);
        assert_eq!(header.barrier, 0);
    }
}

#[test]
fn test_barriers_flush_and_are_relayed() {
    let begin = state_change(RingItemType::BeginRun, 3, 1);
    let end = state_change(RingItemType::EndRun, 50, 1);
    let fragments = [
        data(0, 1),
        data(2, 2),
        begin.clone(),
        data(4, 1),
        data(6, 2),
        end.clone(),
    ];
    let settings = GlomSettings::building(100, TimestampPolicy::Earliest, 9);
    let (stats, items) = build(&fragments, settings);

    assert_eq!(
        kinds(&items),
        vec![
            RingItemType::RingFormat,
            RingItemType::PhysicsEvent,
            RingItemType::BeginRun,
            RingItemType::EvbGlomInfo,
            RingItemType::PhysicsEvent,
            RingItemType::EndRun,
        ]
    );
    assert_eq!(timestamps(&items[1]), vec![0, 2]);
    assert_eq!(timestamps(&items[4]), vec![4, 6]);

    // Recognized state changes are copied verbatim.
    assert_eq!(items[2].encode().expect("Encode failed"), begin.body);
    assert_eq!(items[5].encode().expect("Encode failed"), end.body);

    assert_eq!(
        GlomParameters::from_payload(&items[3].payload).expect("Bad glom info"),
        settings.parameters()
    );
    assert_eq!(stats.barriers, 2);
    assert_eq!(stats.synthesized_abnormal_ends, 0);
}

#[test]
fn test_parameters_follow_first_barrier_only() {
    let fragments = [
        state_change(RingItemType::BeginRun, 1, 1),
        state_change(RingItemType::PauseRun, 2, 1),
        state_change(RingItemType::ResumeRun, 3, 1),
        state_change(RingItemType::EndRun, 4, 1),
    ];
    let (_, items) = build(&fragments, GlomSettings::building(10, TimestampPolicy::Latest, 0));
    let infos = kinds(&items)
        .into_iter()
        .filter(|k| *k == RingItemType::EvbGlomInfo)
        .count();
    assert_eq!(infos, 1);
    assert_eq!(items[2].kind(), Some(RingItemType::EvbGlomInfo));
}

#[test]
fn test_unterminated_run_gets_abnormal_end() {
    let fragments = [state_change(RingItemType::BeginRun, 1, 2), data(5, 2), data(6, 3)];
    let (stats, items) = build(&fragments, GlomSettings::building(10, TimestampPolicy::Earliest, 42));

    let last = items.last().expect("Empty output");
    assert_eq!(last.kind(), Some(RingItemType::AbnormalEndRun));
    let header = last.body_header.expect("Abnormal end without body header");
    assert_eq!(header.source_id, 42);
    assert_eq!(header.barrier, RingItemType::AbnormalEndRun.as_u32());
    assert_eq!(stats.synthesized_abnormal_ends, 1);

    // The partial event is flushed before the synthesized record.
    assert_eq!(items[items.len() - 2].kind(), Some(RingItemType::PhysicsEvent));
}

#[test]
fn test_abnormal_end_barrier_closes_run() {
    let fragments = [
        state_change(RingItemType::BeginRun, 1, 2),
        state_change(RingItemType::BeginRun, 2, 3),
        state_change(RingItemType::AbnormalEndRun, 3, 2),
    ];
    let (stats, items) = build(&fragments, GlomSettings::passthrough(0));
    assert_eq!(stats.synthesized_abnormal_ends, 0);
    assert_eq!(items.last().and_then(RingItem::kind), Some(RingItemType::AbnormalEndRun));
}

#[test]
fn test_nobuild_passes_fragments_through() {
    let fragments = [data(1, 1), data(2, 2), data(3, 3)];
    let (stats, items) = build(&fragments, GlomSettings::passthrough(0));

    assert_eq!(stats.events, 3);
    let events: Vec<_> = items[1..].iter().map(timestamps).collect();
    assert_eq!(events, vec![vec![1], vec![2], vec![3]]);
}

#[test]
fn test_unrecognized_barrier_payload_is_wrapped() {
    let barrier = Fragment::barrier(8, 6, 1, vec![0xFFu8; 5]);
    let (stats, items) = build(&[barrier.clone()], GlomSettings::building(10, TimestampPolicy::Earliest, 0));

    assert_eq!(items[1].kind(), Some(RingItemType::EvbUnknownPayload));
    assert!(items[1].body_header.is_none());
    assert_eq!(items[1].payload.len(), FRAGMENT_HEADER_SIZE + 5);
    assert_eq!(
        decode_fragments(&items[1].payload).expect("Bad envelope"),
        vec![barrier]
    );
    assert_eq!(stats.unknown_payloads, 1);
    // A begin barrier was seen and never closed.
    assert_eq!(stats.synthesized_abnormal_ends, 1);
}

#[test]
fn test_truncated_input_ends_stream() {
    let mut input = stream(&[data(1, 1), data(2, 1)]);
    input.extend_from_slice(&[0u8; 11]);

    let mut output = Vec::new();
    let stats = run(input.as_slice(), &mut output, GlomSettings::building(5, TimestampPolicy::Earliest, 0))
        .expect("Truncated input must not be an error");
    assert_eq!(stats.fragments, 2);
    assert_eq!(stats.events, 1);
}

#[test]
fn test_empty_input_writes_only_format() {
    let (stats, items) = build(&[], GlomSettings::building(5, TimestampPolicy::Earliest, 0));
    assert_eq!(kinds(&items), vec![RingItemType::RingFormat]);
    assert_eq!(stats, GlomStats::default());
}

#[test]
fn test_binary_builds_events() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_glom"))
        .args(["--dt=10", "--timestamp-policy=latest", "--sourceid=3"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to start glom");

    let input = stream(&[data(0, 1), data(4, 2), data(50, 1)]);
    {
        let mut stdin = child.stdin.take().expect("No stdin");
        stdin.write_all(&input).expect("Failed to feed glom");
    }
    let output = child.wait_with_output().expect("glom did not finish");
    assert!(output.status.success());

    let items = RingItemReader::new(output.stdout.as_slice())
        .collect::<io::Result<Vec<_>>>()
        .expect("Output is not a ring item stream");
    assert_eq!(items.len(), 3);
    assert_eq!(items[1].body_header.map(|h| h.timestamp), Some(4));
    assert_eq!(items[2].body_header.map(|h| h.source_id), Some(3));
}

#[test]
fn test_binary_rejects_negative_window() {
    let output = Command::new(env!("CARGO_BIN_EXE_glom"))
        .arg("--dt=-1")
        .output()
        .expect("Failed to run glom");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_binary_requires_window_when_building() {
    let output = Command::new(env!("CARGO_BIN_EXE_glom"))
        .output()
        .expect("Failed to run glom");
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[cfg(target_os = "linux")]
#[test]
fn test_binary_logs_output_failure() {
    let full = std::fs::OpenOptions::new()
        .write(true)
        .open("/dev/full")
        .expect("Failed to open /dev/full");
    let output = Command::new(env!("CARGO_BIN_EXE_glom"))
        .arg("--dt=10")
        .env("RUST_EVB_LOGGING__FORMAT", "json")
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::from(full))
        .output()
        .expect("Failed to run glom");
    assert!(!output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("\"level\":\"ERROR\""), "stderr: {stderr}");
    assert!(stderr.contains("Event builder failed"), "stderr: {stderr}");
    assert!(!stderr.starts_with("glom:"), "stderr: {stderr}");
}
