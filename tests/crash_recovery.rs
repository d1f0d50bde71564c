use vecstore::unified::{StorePaths, UnifiedIndex};
use vecstore::wal::{Wal, WalOp, WalRecord};
use vecstore::{Confidence, Node, NodeId};

fn embedding_with(lead: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; vecstore::EMBEDDING_DIM];
    v[0] = lead;
    v[1] = 1.0;
    v
}

fn node(id: u128) -> Node {
    Node {
        id: NodeId::from_u128(id),
        type_tag: 0,
        created_at: 1,
        accessed_at: 1,
        decay_rate: 0.0,
        confidence: Confidence {
            mu: 0.5,
            sigma_sq: 0.1,
            n: 1,
        },
        embedding: embedding_with(0.3),
        payload_bytes: b"recovered".to_vec(),
        edges: vec![],
        tags: vec![],
    }
}

// Scenario 2: crash after the WAL record is fsynced but before the index
// header's wal_sequence is advanced. Reopening must replay the dangling
// record and recover the node.
#[test]
fn replay_recovers_entry_written_after_index_header_update_was_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let paths = StorePaths::under(dir.path());
    let wal_path = dir.path().join("wal.log");

    {
        let index = UnifiedIndex::create(&paths, 16, 8, 32, 16, 1.5, 2.0).unwrap();
        index.sync().unwrap();
    }
    let mut wal = Wal::create(&wal_path).unwrap();

    let n = node(1);
    wal.append(WalOp::Insert, &n, 1000).unwrap();
    // Deliberately do not touch the index's wal_sequence here, simulating a
    // crash between the WAL fsync and the header update that would normally
    // follow it in `Store::insert`.
    drop(wal);

    let mut index = UnifiedIndex::open(&paths, 2.0, 16).unwrap();
    assert_eq!(index.wal_sequence().unwrap(), 0, "header should not have advanced before the crash");

    let mut wal = Wal::open(&wal_path, index.wal_sequence().unwrap()).unwrap();
    let mut last_sequence = 0;
    wal.replay_since(0, |record, sequence| {
        if let WalRecord::Insert(node) = record {
            let _ = index.insert(&node);
        }
        last_sequence = last_sequence.max(sequence);
    })
    .unwrap();
    index.set_wal_sequence(last_sequence).unwrap();

    let fetched = index.get(n.id).unwrap();
    assert_eq!(fetched.payload_bytes, b"recovered");
}

// A torn tail (write interrupted mid-record) must not poison recovery of the
// valid prefix that came before it.
#[test]
fn replay_stops_cleanly_at_torn_tail() {
    use std::io::Write;

    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("wal.log");
    {
        let mut wal = Wal::create(&wal_path).unwrap();
        wal.append(WalOp::Insert, &node(1), 1000).unwrap();
        wal.append(WalOp::Insert, &node(2), 1001).unwrap();
    }
    // Append a header-shaped but incomplete tail.
    let mut file = std::fs::OpenOptions::new().append(true).open(&wal_path).unwrap();
    file.write_all(b"VWAL").unwrap();
    file.write_all(&[0u8; 10]).unwrap();

    let mut wal = Wal::open(&wal_path, 0).unwrap();
    let mut recovered = Vec::new();
    wal.replay_since(0, |record, _| recovered.push(record)).unwrap();
    assert_eq!(recovered.len(), 2, "the torn tail must not roll back valid entries");
}
