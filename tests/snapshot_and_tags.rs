use vecstore::{Confidence, Node, NodeId, Store, StoreConfig};

fn embedding_with(lead: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; vecstore::EMBEDDING_DIM];
    v[0] = lead;
    v[1] = 1.0;
    v
}

fn node(id: u128, lead: f32, tags: Vec<&str>) -> Node {
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
        embedding: embedding_with(lead),
        payload_bytes: format!("node-{id}").into_bytes(),
        edges: vec![],
        tags: tags.into_iter().map(String::from).collect(),
    }
}

#[test]
fn lookup_by_tag_reflects_inserts_and_removals() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path(), StoreConfig::default()).unwrap();

    store.insert(node(1, 0.1, vec!["fruit", "red"])).unwrap();
    store.insert(node(2, 0.2, vec!["fruit", "green"])).unwrap();
    store.insert(node(3, 0.3, vec!["vegetable", "green"])).unwrap();

    let mut fruit = store.lookup_by_tag("fruit");
    fruit.sort();
    assert_eq!(fruit, vec![NodeId::from_u128(1), NodeId::from_u128(2)]);

    let mut green = store.lookup_by_tag("green");
    green.sort();
    assert_eq!(green, vec![NodeId::from_u128(2), NodeId::from_u128(3)]);

    store.remove(NodeId::from_u128(2)).unwrap();
    let fruit_after = store.lookup_by_tag("fruit");
    assert_eq!(fruit_after, vec![NodeId::from_u128(1)]);
    let green_after = store.lookup_by_tag("green");
    assert_eq!(green_after, vec![NodeId::from_u128(3)]);
}

// Snapshot fidelity: a snapshot opened as its own store returns the same
// results the source store did at the instant of the snapshot.
#[test]
fn snapshot_then_open_matches_source_at_snapshot_time() {
    let source_dir = tempfile::tempdir().unwrap();
    let snapshot_root = tempfile::tempdir().unwrap();
    let snapshot_dir = snapshot_root.path().join("snap-1");

    let store = Store::create(source_dir.path(), StoreConfig::default()).unwrap();
    for i in 0..10u128 {
        store.insert(node(i, i as f32 / 10.0, vec!["group-a"])).unwrap();
    }
    store.create_snapshot(&snapshot_dir).unwrap();

    // Mutate the source after the snapshot; the snapshot must not observe it.
    store.insert(node(99, 0.99, vec!["group-a"])).unwrap();

    let snapshot_store = Store::open(&snapshot_dir, StoreConfig::default()).unwrap();
    assert_eq!(snapshot_store.len(), 10);
    assert!(snapshot_store.get(NodeId::from_u128(99)).is_err());

    for i in 0..10u128 {
        let hits = snapshot_store.search_exact(&embedding_with(i as f32 / 10.0), 1).unwrap();
        assert_eq!(hits[0].id, NodeId::from_u128(i));
    }
}
