//! Temporal query semantics over the engine surface.

use mercury_core::{StoreOptions, Timestamp};
use mercury_engine::QuadStore;
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> QuadStore {
    QuadStore::open(dir, StoreOptions::for_testing()).unwrap()
}

fn secs(s: i64) -> Timestamp {
    Timestamp::from_secs(s)
}

#[test]
fn as_of_respects_interval_boundaries() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store
        .add(None, "ex:s", "ex:p", "ex:o", secs(100), secs(200))
        .unwrap();

    let snap = store.snapshot().unwrap();
    for (t, expected) in [(99, false), (100, true), (199, true), (200, false)] {
        let mut cursor = snap
            .query_as_of(None, Some("ex:s"), None, None, secs(t))
            .unwrap();
        assert_eq!(cursor.next().unwrap().is_some(), expected, "at t={}", t);
    }
}

#[test]
fn wildcards_narrow_by_prefix() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.add_current(None, "ex:a", "ex:p1", "ex:x").unwrap();
    store.add_current(None, "ex:a", "ex:p2", "ex:y").unwrap();
    store.add_current(None, "ex:b", "ex:p1", "ex:z").unwrap();

    let snap = store.snapshot().unwrap();

    let count = |s: Option<&str>, p: Option<&str>, o: Option<&str>| {
        let mut cursor = snap.query_current(None, s, p, o).unwrap();
        let mut n = 0;
        while cursor.next().unwrap().is_some() {
            n += 1;
        }
        n
    };

    assert_eq!(count(None, None, None), 3);
    assert_eq!(count(Some("ex:a"), None, None), 2);
    assert_eq!(count(Some("ex:a"), Some("ex:p1"), None), 1);
    assert_eq!(count(None, Some("ex:p1"), None), 2);
    assert_eq!(count(None, None, Some("ex:z")), 1);
    assert_eq!(count(Some("ex:unknown"), None, None), 0);
}

#[test]
fn results_stream_in_index_order() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    // Insert out of order; subjects intern in insertion order, so ex:c
    // gets a smaller id than ex:a.
    store.add_current(None, "ex:c", "ex:p", "ex:o").unwrap();
    store.add_current(None, "ex:a", "ex:p", "ex:o").unwrap();
    store.add_current(None, "ex:b", "ex:p", "ex:o").unwrap();

    let snap = store.snapshot().unwrap();
    let mut cursor = snap.query_current(None, None, None, None).unwrap();
    let mut ids = Vec::new();
    while let Some(quad) = cursor.next().unwrap() {
        ids.push(quad.subject);
    }
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn tombstone_only_masks_from_its_time() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store
        .add(None, "ex:s", "ex:p", "ex:o", secs(100), Timestamp::MAX)
        .unwrap();
    store.delete(None, "ex:s", "ex:p", "ex:o", secs(300)).unwrap();

    let snap = store.snapshot().unwrap();
    let visible_at = |t: i64| {
        let mut cursor = snap
            .query_as_of(None, Some("ex:s"), None, None, secs(t))
            .unwrap();
        cursor.next().unwrap().is_some()
    };
    assert!(visible_at(200));
    assert!(!visible_at(300));
    assert!(!visible_at(10_000));
}

#[test]
fn re_add_after_delete_restores_visibility() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store
        .add(None, "ex:s", "ex:p", "ex:o", secs(100), Timestamp::MAX)
        .unwrap();
    store.delete(None, "ex:s", "ex:p", "ex:o", secs(200)).unwrap();
    // Later transaction reasserts the fact from t=400.
    store
        .add(None, "ex:s", "ex:p", "ex:o", secs(400), Timestamp::MAX)
        .unwrap();

    let snap = store.snapshot().unwrap();
    let visible_at = |t: i64| {
        let mut cursor = snap
            .query_as_of(None, Some("ex:s"), None, None, secs(t))
            .unwrap();
        cursor.next().unwrap().is_some()
    };
    assert!(visible_at(150));
    assert!(!visible_at(300));
    assert!(visible_at(500));
}

#[test]
fn named_graph_wildcard_isolation() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.add_current(None, "ex:s", "ex:p", "ex:default").unwrap();
    store
        .add_current(Some("http://g1"), "ex:s", "ex:p", "ex:one")
        .unwrap();
    store
        .add_current(Some("http://g2"), "ex:s", "ex:p", "ex:two")
        .unwrap();

    let snap = store.snapshot().unwrap();

    let mut wildcard = snap.query_current(None, None, None, None).unwrap();
    let quad = wildcard.next().unwrap().expect("default graph row");
    assert_eq!(snap.resolve(quad.object).unwrap(), "ex:default");
    assert!(wildcard.next().unwrap().is_none());

    let mut graphs = snap.named_graphs();
    let mut iris = Vec::new();
    while let Some(iri) = graphs.next().unwrap() {
        iris.push(iri.to_string());
    }
    iris.sort();
    assert_eq!(iris, vec!["http://g1", "http://g2"]);
}

#[test]
fn statistics_track_mutations() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    assert_eq!(store.statistics().unwrap().quads, 0);

    store.add_current(None, "ex:s1", "ex:p", "ex:o").unwrap();
    store.add_current(None, "ex:s2", "ex:p", "ex:o").unwrap();
    let stats = store.statistics().unwrap();
    assert_eq!(stats.quads, 2);
    assert_eq!(stats.atoms, 4); // s1, s2, p, o
    assert_eq!(stats.wal_tx, 2);
    assert!(stats.bytes > 0);
    assert!(stats.wal_size > 0);

    // A delete adds a tombstone entry, not a live quad.
    store
        .delete(None, "ex:s1", "ex:p", "ex:o", Timestamp::now())
        .unwrap();
    let stats = store.statistics().unwrap();
    assert_eq!(stats.quads, 2);
    assert_eq!(stats.wal_tx, 3);
}

#[test]
fn snapshot_sees_consistent_state() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.add_current(None, "ex:s", "ex:p", "ex:o").unwrap();

    let snap = store.snapshot().unwrap();
    let mut cursor = snap.query_current(None, None, None, None).unwrap();
    assert!(cursor.next().unwrap().is_some());
    assert!(cursor.next().unwrap().is_none());
    drop(snap);

    // Writes blocked while the snapshot was held now proceed.
    store.add_current(None, "ex:s2", "ex:p", "ex:o").unwrap();
    assert_eq!(store.statistics().unwrap().quads, 2);
}

#[test]
fn checkpoint_survives_heavy_churn() {
    let dir = tempdir().unwrap();
    // Tiny checkpoint threshold: exercise the auto-trigger path.
    let options = StoreOptions::for_testing()
        .with_wal_flush_size(1024)
        .with_checkpoint_size(8 * 1024);
    let store = QuadStore::open(dir.path(), options.clone()).unwrap();
    for i in 0..500 {
        store
            .add_current(None, &format!("ex:s{}", i), "ex:p", &format!("\"{}\"", i))
            .unwrap();
    }
    let stats = store.statistics().unwrap();
    assert_eq!(stats.quads, 500);
    drop(store);

    let store = QuadStore::open(dir.path(), options).unwrap();
    assert_eq!(store.statistics().unwrap().quads, 500);
}
