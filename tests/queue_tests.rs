// Download queue tests: buffer swap, concurrent producers and tree forwarding on receipt

mod common;

use common::{node, nodes, nested_payload, signed_txs, CountingStats, RecordingMessenger, StaticRoster};
use proptest::prelude::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use txsync::codec::{self, LEGACY_PROTOCOL_VERSION};
use txsync::peers::{MessageKind, PeerRoster};
use txsync::queue::{DownloadQueue, QueueDrainer};
use txsync::router::TreeRouter;

fn plain_queue() -> (DownloadQueue, QueueDrainer) {
    DownloadQueue::builder(Arc::new(StaticRoster(nodes(1..=4))), Arc::new(RecordingMessenger::default())).build()
}

/// Queue for local node 0 with peers 1..=6 and a ternary tree.
fn routed_queue(stats: Arc<CountingStats>) -> (DownloadQueue, QueueDrainer, Arc<RecordingMessenger>) {
    let messenger = Arc::new(RecordingMessenger::default());
    let (queue, drainer) = DownloadQueue::builder(Arc::new(StaticRoster(nodes(1..=6))), messenger.clone())
        .router(TreeRouter::new(node(0), 3))
        .statistics(stats)
        .build();
    (queue, drainer, messenger)
}

fn payload_tag(payload: &[u8]) -> u32 {
    u32::from_le_bytes(payload[..4].try_into().unwrap())
}

#[test]
fn drain_of_empty_queue_returns_nothing() {
    let (queue, mut drainer) = plain_queue();
    assert!(queue.is_empty());
    assert!(drainer.drain().is_empty());
}

#[test]
fn drain_returns_shards_in_push_order_and_resets_buffer() {
    let (queue, mut drainer) = plain_queue();
    for i in 0..5u32 {
        queue.push(i.to_le_bytes().to_vec(), MessageKind::Broadcast, node(1 + (i % 3) as u8));
    }
    assert_eq!(queue.len(), 5);

    let shards = drainer.drain();
    let tags: Vec<u32> = shards.iter().map(|s| payload_tag(s.payload())).collect();
    assert_eq!(tags, vec![0, 1, 2, 3, 4]);
    assert_eq!(*shards[4].origin(), node(2));
    assert!(queue.is_empty());
    assert!(drainer.drain().is_empty());
}

#[test]
fn concurrent_producers_lose_nothing() {
    println!("🧪 Testing concurrent push against a running drainer...");
    const PRODUCERS: u32 = 8;
    const PER_PRODUCER: u32 = 250;

    let (queue, mut drainer) = plain_queue();
    let mut seen: Vec<u32> = Vec::new();

    thread::scope(|scope| {
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let queue = queue.clone();
                scope.spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let tag = p * PER_PRODUCER + i;
                        queue.push(tag.to_le_bytes().to_vec(), MessageKind::Broadcast, node(p as u8));
                    }
                })
            })
            .collect();

        while handles.iter().any(|h| !h.is_finished()) {
            seen.extend(drainer.drain().iter().map(|s| payload_tag(s.payload())));
            thread::yield_now();
        }
    });
    seen.extend(drainer.drain().iter().map(|s| payload_tag(s.payload())));

    assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);
    // Each producer's shards keep their relative order.
    for p in 0..PRODUCERS {
        let own: Vec<u32> = seen.iter().copied().filter(|t| t / PER_PRODUCER == p).collect();
        let expected: Vec<u32> = (p * PER_PRODUCER..(p + 1) * PER_PRODUCER).collect();
        assert_eq!(own, expected, "producer {p}");
    }
    println!("  ✅ {} shards, none lost or reordered", seen.len());
}

#[derive(Debug, Clone)]
enum Op {
    Push(u32),
    Drain,
}

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![3 => any::<u32>().prop_map(Op::Push), 1 => Just(Op::Drain)],
        0..64,
    )
}

proptest! {
    #[test]
    fn drains_partition_the_push_sequence(ops in arb_ops()) {
        let (queue, mut drainer) = plain_queue();
        let mut model: Vec<u32> = Vec::new();
        let mut pushed: Vec<u32> = Vec::new();
        let mut drained: Vec<u32> = Vec::new();

        for op in ops {
            match op {
                Op::Push(tag) => {
                    queue.push(tag.to_le_bytes().to_vec(), MessageKind::Broadcast, node(1));
                    model.push(tag);
                    pushed.push(tag);
                }
                Op::Drain => {
                    let got: Vec<u32> = drainer.drain().iter().map(|s| payload_tag(s.payload())).collect();
                    prop_assert_eq!(&got, &model);
                    drained.extend(got);
                    model.clear();
                }
            }
            prop_assert_eq!(queue.len(), model.len());
        }
        drained.extend(drainer.drain().iter().map(|s| payload_tag(s.payload())));
        prop_assert_eq!(drained, pushed);
    }
}

#[test]
fn tree_routed_batch_is_forwarded_to_children_except_origin() {
    let stats = Arc::new(CountingStats::default());
    let (queue, mut drainer, messenger) = routed_queue(stats.clone());
    let payload = nested_payload(&signed_txs(0, 2), 0);
    let len = payload.len();

    // Index 0 roots the tree at node 0, whose children are nodes 1..=3.
    queue.push(payload, MessageKind::TreeRouted, node(2));

    assert_eq!(messenger.targets(), vec![node(1), node(3)]);
    assert!(messenger.sent.lock().iter().all(|(_, msg)| msg.kind == MessageKind::TreeRouted && msg.len() == len));
    assert_eq!(stats.sent_bytes.load(Ordering::Relaxed), 2 * len);
    assert_eq!(stats.received_bytes.load(Ordering::Relaxed), len);

    let shards = drainer.drain();
    assert_eq!(shards.len(), 1);
    assert_eq!(shards[0].forwarded_to(), &[node(1), node(3)]);
    assert_eq!(*shards[0].origin(), node(2));
}

#[test]
fn every_tree_routed_receipt_is_forwarded() {
    let stats = Arc::new(CountingStats::default());
    let (queue, _drainer, messenger) = routed_queue(stats);
    let payload = nested_payload(&signed_txs(0, 1), 0);

    queue.push(payload.clone(), MessageKind::TreeRouted, node(9));
    queue.push(payload, MessageKind::TreeRouted, node(9));

    // Receipts are not deduplicated: each one goes down the tree.
    assert_eq!(messenger.targets(), vec![node(1), node(2), node(3), node(1), node(2), node(3)]);
}

#[test]
fn broadcast_batch_is_never_forwarded() {
    let stats = Arc::new(CountingStats::default());
    let (queue, mut drainer, messenger) = routed_queue(stats.clone());
    let payload = nested_payload(&signed_txs(0, 2), 0);
    let len = payload.len();

    queue.push(payload, MessageKind::Broadcast, node(4));

    assert!(messenger.targets().is_empty());
    assert_eq!(stats.sent_bytes.load(Ordering::Relaxed), 0);
    assert_eq!(stats.received_bytes.load(Ordering::Relaxed), len);
    assert!(drainer.drain()[0].forwarded_to().is_empty());
}

#[test]
fn queue_without_router_only_buffers() {
    let messenger = Arc::new(RecordingMessenger::default());
    let (queue, mut drainer) = DownloadQueue::builder(Arc::new(StaticRoster(nodes(1..=6))), messenger.clone()).build();

    queue.push(nested_payload(&signed_txs(0, 1), 0), MessageKind::TreeRouted, node(1));

    assert!(messenger.targets().is_empty());
    assert_eq!(drainer.drain().len(), 1);
}

#[test]
fn legacy_tree_routed_batch_falls_back_to_first_root() {
    let messenger = Arc::new(RecordingMessenger::default());
    let roster = Arc::new(StaticRoster(nodes(1..=6)));
    let peers = roster.current_peers();
    let router = TreeRouter::new(node(0), 2);
    let (queue, _drainer) = DownloadQueue::builder(roster, messenger.clone())
        .router(router.clone())
        .protocol_version(LEGACY_PROTOCOL_VERSION)
        .build();

    let payload = codec::encode_batch(&signed_txs(0, 2), LEGACY_PROTOCOL_VERSION, 4).unwrap();
    queue.push(payload, MessageKind::TreeRouted, node(9));

    assert_eq!(messenger.targets(), router.select_nodes(&peers, 0));
    assert_eq!(messenger.targets(), vec![node(1), node(2)]);
}

#[test]
fn requeued_shards_go_before_newer_ones() {
    let (queue, mut drainer) = plain_queue();
    queue.push(1u32.to_le_bytes().to_vec(), MessageKind::Broadcast, node(1));
    queue.push(2u32.to_le_bytes().to_vec(), MessageKind::Broadcast, node(1));
    let old = drainer.drain();

    queue.push(3u32.to_le_bytes().to_vec(), MessageKind::Broadcast, node(2));
    drainer.requeue(old);

    let tags: Vec<u32> = drainer.drain().iter().map(|s| payload_tag(s.payload())).collect();
    assert_eq!(tags, vec![1, 2, 3]);
}

#[test]
fn builder_defaults_to_latest_protocol() {
    let (_queue, drainer) = plain_queue();
    assert_eq!(drainer.protocol_version(), codec::LATEST_PROTOCOL_VERSION);
}
