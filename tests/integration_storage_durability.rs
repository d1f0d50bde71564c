use vecstore::{Confidence, Node, NodeId, Store, StoreConfig};

fn embedding_with(lead: f32) -> Vec<f32> {
    let mut v = vec![0.0f32; vecstore::EMBEDDING_DIM];
    v[0] = lead;
    v[1] = 1.0;
    v
}

fn node(id: u128, lead: f32, payload: &str) -> Node {
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
        payload_bytes: payload.as_bytes().to_vec(),
        edges: vec![],
        tags: vec![],
    }
}

// Scenario 1: create-insert-reopen.
#[test]
fn create_insert_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.initial_capacity = 4;
    {
        let store = Store::create(dir.path(), config).unwrap();
        store.insert(node(1, 0.1, "a")).unwrap();
        store.insert(node(2, 0.2, "b")).unwrap();
        store.insert(node(3, 0.3, "c")).unwrap();
        store.close().unwrap();
    }

    let store = Store::open(dir.path(), config).unwrap();
    assert_eq!(store.get(NodeId::from_u128(1)).unwrap().payload_bytes, b"a");
    assert_eq!(store.get(NodeId::from_u128(2)).unwrap().payload_bytes, b"b");
    assert_eq!(store.get(NodeId::from_u128(3)).unwrap().payload_bytes, b"c");

    let hits = store.search(&embedding_with(0.1), 1).unwrap();
    assert_eq!(hits[0].id, NodeId::from_u128(1));
    assert!(hits[0].distance < 0.001, "distance={}", hits[0].distance);
}

// Scenario 3: grow under load.
#[test]
fn grow_under_load_keeps_every_item_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.initial_capacity = 8;
    let store = Store::create(dir.path(), config).unwrap();

    for i in 0..20u128 {
        store.insert(node(i, i as f32 / 20.0, "x")).unwrap();
    }
    assert_eq!(store.len(), 20);

    for i in 0..20u128 {
        let hits = store.search_exact(&embedding_with(i as f32 / 20.0), 1).unwrap();
        assert_eq!(hits[0].id, NodeId::from_u128(i), "item {i} must rank first for its own vector");
    }
}

// Scenario 4: delete then reuse.
#[test]
fn delete_then_reuse_excludes_deleted_from_search() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path(), StoreConfig::default()).unwrap();

    for i in 0..100u128 {
        store.insert(node(i, i as f32 / 100.0, "x")).unwrap();
    }
    for i in 10..20u128 {
        store.remove(NodeId::from_u128(i)).unwrap();
    }
    assert_eq!(store.len(), 90);

    let hits = store.search_exact(&embedding_with(0.15), 5).unwrap();
    for hit in &hits {
        let n = hit.id.as_u128();
        assert!(!(10..20).contains(&n), "deleted item {n} leaked into search results");
    }
}

// Scenario 5: two Store handles over the same directory coordinate via the WAL.
#[test]
fn shared_process_wal_cross_handle_visibility() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::default();
    let p1 = Store::create(dir.path(), config).unwrap();
    p1.sync().unwrap();
    let p2 = Store::open(dir.path(), config).unwrap();

    p1.insert(node(1, 0.1, "from-p1")).unwrap();
    p2.sync().unwrap();
    assert_eq!(p2.get(NodeId::from_u128(1)).unwrap().payload_bytes, b"from-p1");

    p2.insert(node(2, 0.2, "from-p2")).unwrap();
    p1.sync().unwrap();
    assert_eq!(p1.get(NodeId::from_u128(2)).unwrap().payload_bytes, b"from-p2");
}

// Scenario 6: two-pass search agrees with single-pass search on recall.
#[test]
fn two_pass_search_agrees_with_single_pass_recall() {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::default();
    config.initial_capacity = 256;
    let store = Store::create(dir.path(), config).unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let count = 300u128;
    for i in 0..count {
        let embedding: Vec<f32> = (0..vecstore::EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        store
            .insert(Node {
                id: NodeId::from_u128(i),
                type_tag: 0,
                created_at: 0,
                accessed_at: 0,
                decay_rate: 0.0,
                confidence: Confidence::default(),
                embedding,
                payload_bytes: vec![],
                edges: vec![],
                tags: vec![],
            })
            .unwrap();
    }

    let mut agreements = 0usize;
    let queries = 20;
    for _ in 0..queries {
        let query: Vec<f32> = (0..vecstore::EMBEDDING_DIM).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let two_pass = store.search(&query, 10).unwrap();
        let single_pass = store.search_exact(&query, 10).unwrap();

        let single_ids: std::collections::HashSet<_> = single_pass.iter().map(|h| h.id).collect();
        let overlap = two_pass.iter().filter(|h| single_ids.contains(&h.id)).count();
        if overlap >= 9 {
            agreements += 1;
        }
    }
    assert!(
        agreements as f64 / queries as f64 >= 0.5,
        "two-pass search should agree with single-pass on most queries, got {agreements}/{queries}"
    );
}

// Search on an empty store / k=0 boundary behaviors.
#[test]
fn search_on_empty_store_and_zero_k_are_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::create(dir.path(), StoreConfig::default()).unwrap();
    assert!(store.search(&embedding_with(0.5), 3).unwrap().is_empty());

    store.insert(node(1, 0.5, "x")).unwrap();
    assert!(store.search(&embedding_with(0.5), 0).unwrap().is_empty());
}
