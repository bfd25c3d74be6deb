//! Pruning transfer: history modes, filters, verification, dry runs.

use mercury_core::{StoreOptions, Timestamp};
use mercury_engine::{prune, HistoryMode, PruneOptions, QuadStore, TemporalMode};
use tempfile::tempdir;

fn open(dir: &std::path::Path) -> QuadStore {
    QuadStore::open(dir, StoreOptions::for_testing()).unwrap()
}

fn secs(s: i64) -> Timestamp {
    Timestamp::from_secs(s)
}

/// Source with three versions of one quad, a named-graph quad and a
/// deleted quad.
fn seeded_source(dir: &std::path::Path) -> QuadStore {
    let store = open(dir);
    store.add(None, "ex:x", "ex:v", "\"1\"", secs(100), secs(200)).unwrap();
    store.add(None, "ex:x", "ex:v", "\"2\"", secs(200), secs(300)).unwrap();
    store
        .add(None, "ex:x", "ex:v", "\"3\"", secs(300), Timestamp::MAX)
        .unwrap();
    store
        .add_current(Some("http://archive"), "ex:old", "ex:v", "\"stale\"")
        .unwrap();
    store
        .add(None, "ex:gone", "ex:v", "\"deleted\"", secs(100), Timestamp::MAX)
        .unwrap();
    store
        .delete(None, "ex:gone", "ex:v", "\"deleted\"", secs(150))
        .unwrap();
    store
}

#[test]
fn preserve_versions_carries_history() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = seeded_source(source_dir.path());
    let target = open(target_dir.path());

    let options = PruneOptions::new(HistoryMode::PreserveVersions).with_verify(true);
    let report = prune::transfer(&source, &target, &options).unwrap();

    // All five non-tombstone versions, tombstone dropped.
    assert_eq!(report.written, 5);
    assert!(report.verification.unwrap().matches);

    // Original validity is preserved.
    let snap = target.snapshot().unwrap();
    let mut cursor = snap
        .query_as_of(None, Some("ex:x"), None, None, secs(150))
        .unwrap();
    let quad = cursor.next().unwrap().expect("old version present");
    assert_eq!(snap.resolve(quad.object).unwrap(), "\"1\"");
}

#[test]
fn preserve_all_carries_tombstones() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = seeded_source(source_dir.path());
    let target = open(target_dir.path());

    let options = PruneOptions::new(HistoryMode::PreserveAll).with_verify(true);
    let report = prune::transfer(&source, &target, &options).unwrap();
    assert_eq!(report.written, 6); // 5 versions + 1 tombstone
    assert!(report.verification.unwrap().matches);

    // The deletion still takes effect in the target.
    let snap = target.snapshot().unwrap();
    let mut cursor = snap
        .query_as_of(None, Some("ex:gone"), None, None, secs(500))
        .unwrap();
    assert!(cursor.next().unwrap().is_none());
}

#[test]
fn graph_and_predicate_filters_compose() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = seeded_source(source_dir.path());
    let target = open(target_dir.path());

    let options = PruneOptions::new(HistoryMode::PreserveVersions)
        .exclude_graph("http://archive")
        .with_filter(|quad| quad.subject != "ex:gone");
    let report = prune::transfer(&source, &target, &options).unwrap();

    // 5 versions minus the archive quad minus the deleted quad's version.
    assert_eq!(report.written, 3);
    assert_eq!(report.excluded, 2);

    let snap = target.snapshot().unwrap();
    assert!(snap.lookup("http://archive").unwrap().is_none());
    assert!(snap.lookup("ex:gone").unwrap().is_none());
}

#[test]
fn predicate_exclusion() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = open(source_dir.path());
    source.add_current(None, "ex:s", "ex:keep", "ex:o").unwrap();
    source.add_current(None, "ex:s", "ex:drop", "ex:o").unwrap();
    let target = open(target_dir.path());

    let options =
        PruneOptions::new(HistoryMode::PreserveVersions).exclude_predicate("ex:drop");
    let report = prune::transfer(&source, &target, &options).unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(report.excluded, 1);
}

#[test]
fn dry_run_writes_nothing() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = seeded_source(source_dir.path());
    let target = open(target_dir.path());

    let options = PruneOptions::new(HistoryMode::PreserveVersions).with_dry_run(true);
    let report = prune::transfer(&source, &target, &options).unwrap();

    assert_eq!(report.written, 5);
    assert!(report.verification.is_none());
    assert_eq!(target.statistics().unwrap().quads, 0);
    assert_eq!(target.statistics().unwrap().atoms, 0);
}

#[test]
fn flatten_rewrites_intervals_open_ended() {
    let source_dir = tempdir().unwrap();
    let target_dir = tempdir().unwrap();
    let source = seeded_source(source_dir.path());
    let target = open(target_dir.path());

    let options = PruneOptions::new(HistoryMode::FlattenToCurrent).with_verify(true);
    let report = prune::transfer(&source, &target, &options).unwrap();

    // Current versions only: "3" and the archive quad; the deleted quad is
    // suppressed by its tombstone.
    assert_eq!(report.written, 2);
    assert!(report.verification.unwrap().matches);

    let snap = target.snapshot().unwrap();
    let mut cursor = snap
        .scan(
            mercury_engine::GraphScope::All,
            None,
            None,
            None,
            TemporalMode::Evolution,
            None,
        )
        .unwrap();
    while let Some(quad) = cursor.next().unwrap() {
        assert!(quad.valid_to.is_infinite());
    }
}

#[test]
fn source_hash_is_order_independent() {
    // Two sources with the same quads inserted in different orders must
    // produce the same transfer hash.
    let dir_a = tempdir().unwrap();
    let dir_b = tempdir().unwrap();
    let a = open(dir_a.path());
    let b = open(dir_b.path());
    // Different insertion orders give different atom ids and thus a
    // different index order.
    a.add_current(None, "ex:s1", "ex:p", "\"x\"").unwrap();
    a.add_current(None, "ex:s2", "ex:p", "\"y\"").unwrap();
    b.add_current(None, "ex:s2", "ex:p", "\"y\"").unwrap();
    b.add_current(None, "ex:s1", "ex:p", "\"x\"").unwrap();

    let target_a_dir = tempdir().unwrap();
    let target_b_dir = tempdir().unwrap();
    let target_a = open(target_a_dir.path());
    let target_b = open(target_b_dir.path());
    let options = PruneOptions::new(HistoryMode::PreserveVersions).with_dry_run(true);
    let report_a = prune::transfer(&a, &target_a, &options).unwrap();
    let report_b = prune::transfer(&b, &target_b, &options).unwrap();
    assert_eq!(report_a.source_hash, report_b.source_hash);
}
