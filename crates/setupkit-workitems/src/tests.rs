use super::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "setupkit-workitems-test-{}-{nanos}-{seq}",
        std::process::id()
    ));
    fs::create_dir_all(&root).expect("must create test root");
    root
}

fn test_env(root: &Path) -> MutationEnv {
    MutationEnv::new(
        RegistryStore::open(root.join("registry")),
        PendingRemovals::open(root.join("pending-removals.json")),
        root.join("backup"),
    )
}

struct AlwaysInUse;

impl InUseCheck for AlwaysInUse {
    fn is_in_use(&self, _path: &Path) -> bool {
        true
    }
}

#[test]
fn apply_all_success_advances_cursor_to_last_index() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::create_key("Software/App"))
        .push(Mutation::set_value("Software/App", "pv", "1.0.0.0"))
        .push(Mutation::create_dir(root.join("target")));

    assert_eq!(sequence.last_applied_index(), None);
    sequence.apply().expect("sequence must apply");
    assert_eq!(sequence.last_applied_index(), Some(sequence.len() - 1));

    let registry = RegistryStore::open(root.join("registry"));
    assert_eq!(
        registry
            .read_string("Software/App", "pv")
            .expect("must read value")
            .as_deref(),
        Some("1.0.0.0")
    );
    assert!(root.join("target").is_dir());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failure_at_index_rolls_back_prior_mutations_in_reverse() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::create_dir(root.join("a")))
        .push(Mutation::create_dir(root.join("b")))
        .push(Mutation::create_dir(root.join("c")))
        .push(Mutation::copy_tree(
            root.join("missing-source"),
            root.join("a").join("file"),
            CopyMode::Always,
        ))
        .push(Mutation::create_dir(root.join("never")));

    let err = sequence.apply().expect_err("copy from missing source must fail");
    let failed = err.failed_at().expect("must be a mutation failure");
    assert_eq!(failed.index, 3);
    assert_eq!(failed.kind, "copy_tree");
    assert!(matches!(failed.source, MutationError::MissingSource { .. }));
    assert_eq!(sequence.last_applied_index(), Some(2));
    assert!(!root.join("never").exists(), "mutations after failure must not run");

    let report = sequence.rollback();
    assert_eq!(report.rolled_back, vec![2, 1, 0]);
    assert!(report.is_clean());
    assert_eq!(sequence.last_applied_index(), None);
    for name in ["a", "b", "c"] {
        assert!(!root.join(name).exists(), "{name} must be rolled back");
    }

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failure_at_first_index_rolls_back_nothing() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::set_value("Software/Missing", "pv", "1.0"))
        .push(Mutation::create_dir(root.join("never")));

    let err = sequence.apply().expect_err("missing key must fail");
    let failed = err.failed_at().expect("must be a mutation failure");
    assert_eq!(failed.index, 0);
    assert!(matches!(
        failed.source,
        MutationError::Store(StoreError::MissingKey { .. })
    ));

    let report = sequence.rollback();
    assert!(report.rolled_back.is_empty());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn second_rollback_is_a_no_op() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::create_dir(root.join("a")))
        .push(Mutation::copy_tree(
            root.join("missing"),
            root.join("a").join("x"),
            CopyMode::Always,
        ));

    sequence.apply().expect_err("must fail");
    let first = sequence.rollback();
    assert_eq!(first.rolled_back, vec![0]);

    fs::create_dir_all(root.join("a")).expect("must recreate dir");
    let second = sequence.rollback();
    assert!(second.rolled_back.is_empty());
    assert!(second.is_clean());
    assert!(
        root.join("a").exists(),
        "second rollback must not touch state again"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn sequence_refuses_reapply() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::create_dir(root.join("a")));
    sequence.apply().expect("first apply must succeed");
    sequence.rollback();

    let err = sequence.apply().expect_err("reapply must be refused");
    assert!(matches!(err, SequenceError::Spent));
    assert!(!root.join("a").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn key_value_copy_scenario_unwinds_value_then_key() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::create_key("A"))
        .push(Mutation::set_value("A", "x", 1_u32))
        .push(Mutation::copy_tree(
            root.join("src"),
            root.join("dst"),
            CopyMode::Always,
        ));

    let err = sequence.apply().expect_err("copy must fail");
    assert_eq!(err.failed_at().map(|failed| failed.index), Some(2));

    let registry = RegistryStore::open(root.join("registry"));
    assert_eq!(
        registry.read_value("A", "x").expect("must read"),
        Some(KeyValue::Dword(1))
    );

    let report = sequence.rollback();
    assert_eq!(report.rolled_back, vec![1, 0]);
    assert!(report.is_clean());
    assert!(!registry.key_exists("A").expect("must check key"));
    assert!(!root.join("dst").exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn rollback_attempts_every_step_and_reports_failures() {
    let root = test_root();
    let doomed = root.join("doomed.txt");
    fs::write(&doomed, "bye").expect("must write file");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::delete_path_irreversible(&doomed))
        .push(Mutation::create_dir(root.join("made")))
        .push(Mutation::copy_tree(
            root.join("missing"),
            root.join("made").join("x"),
            CopyMode::Always,
        ));

    sequence.apply().expect_err("must fail at copy");
    let report = sequence.rollback();

    assert_eq!(report.rolled_back, vec![1, 0]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].index, 0);
    assert_eq!(report.failures[0].kind, "delete_path");
    assert!(matches!(
        report.failures[0].error,
        MutationError::Irreversible { .. }
    ));
    assert!(!root.join("made").exists(), "later steps still unwind");
    assert!(!doomed.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn create_key_rollback_keeps_preexisting_ancestors() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));
    registry.create_key("Software").expect("must create ancestor");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::create_key("Software/App/Sub"));
    sequence.apply().expect("must apply");
    assert!(registry.key_exists("Software/App/Sub").expect("must check"));

    sequence.rollback();
    assert!(!registry.key_exists("Software/App").expect("must check"));
    assert!(registry.key_exists("Software").expect("must check"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn create_key_rollback_leaves_key_that_gained_values() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::create_key("Software/App"));
    sequence.apply().expect("must apply");
    registry
        .set_value("Software/App", "foreign", KeyValue::from("kept"))
        .expect("must set foreign value");

    let report = sequence.rollback();
    assert!(report.is_clean());
    assert!(registry.key_exists("Software/App").expect("must check"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn set_value_rollback_restores_previous_value() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));
    registry.create_key("Software/App").expect("must create key");
    registry
        .set_value("Software/App", "pv", KeyValue::from("1.0.0.0"))
        .expect("must seed value");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::set_value("Software/App", "pv", "2.0.0.0"));
    sequence.apply().expect("must apply");
    assert_eq!(
        registry.read_string("Software/App", "pv").expect("must read").as_deref(),
        Some("2.0.0.0")
    );

    sequence.rollback();
    assert_eq!(
        registry.read_string("Software/App", "pv").expect("must read").as_deref(),
        Some("1.0.0.0")
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn set_value_if_absent_rejects_incompatible_existing_value() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));
    registry.create_key("Software/App").expect("must create key");
    registry
        .set_value("Software/App", "count", KeyValue::Dword(3))
        .expect("must seed value");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::set_value_if_absent("Software/App", "count", "three"));
    let err = sequence.apply().expect_err("kind mismatch must fail");
    let failed = err.failed_at().expect("must be a mutation failure");
    assert!(matches!(failed.source, MutationError::IncompatibleValue { .. }));
    assert!(failed.to_string().contains("dword"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn set_value_if_absent_leaves_same_kind_value_and_rollback_keeps_it() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));
    registry.create_key("Software/App").expect("must create key");
    registry
        .set_value("Software/App", "name", KeyValue::from("Original"))
        .expect("must seed value");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::set_value_if_absent("Software/App", "name", "Replacement"));
    sequence.apply().expect("must apply");
    sequence.rollback();

    assert_eq!(
        registry.read_string("Software/App", "name").expect("must read").as_deref(),
        Some("Original")
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn delete_value_rollback_restores_value() {
    let root = test_root();
    let registry = RegistryStore::open(root.join("registry"));
    registry.create_key("Software/App").expect("must create key");
    registry
        .set_value("Software/App", "opv", KeyValue::from("0.9"))
        .expect("must seed value");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::delete_value("Software/App", "opv"));
    sequence.apply().expect("must apply");
    assert!(registry.read_value("Software/App", "opv").expect("must read").is_none());

    sequence.rollback();
    assert_eq!(
        registry.read_string("Software/App", "opv").expect("must read").as_deref(),
        Some("0.9")
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn copy_tree_rollback_restores_overwritten_file() {
    let root = test_root();
    let src = root.join("src.bin");
    let dst = root.join("dst.bin");
    fs::write(&src, "new").expect("must write src");
    fs::write(&dst, "old").expect("must write dst");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::copy_tree(&src, &dst, CopyMode::Always));
    sequence.apply().expect("must apply");
    assert_eq!(fs::read_to_string(&dst).expect("must read dst"), "new");

    sequence.rollback();
    assert_eq!(fs::read_to_string(&dst).expect("must read dst"), "old");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn copy_tree_copies_directories_and_removes_them_on_rollback() {
    let root = test_root();
    let src = root.join("payload");
    fs::create_dir_all(src.join("nested")).expect("must create src tree");
    fs::write(src.join("nested").join("lib.so"), "lib").expect("must write file");
    let dst = root.join("install").join("1.0.0.0");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::copy_tree(&src, &dst, CopyMode::Always));
    sequence.apply().expect("must apply");
    assert_eq!(
        fs::read_to_string(dst.join("nested").join("lib.so")).expect("must read copy"),
        "lib"
    );

    sequence.rollback();
    assert!(!dst.exists());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn copy_tree_uses_alternate_name_when_destination_in_use() {
    let root = test_root();
    let src = root.join("app.new");
    let dst = root.join("app");
    let alternate = root.join("new_app");
    fs::write(&src, "v2").expect("must write src");
    fs::write(&dst, "v1").expect("must write dst");

    let env = test_env(&root).with_in_use_check(Box::new(AlwaysInUse));
    let mut sequence = MutationSequence::new(env);
    sequence.push(Mutation::copy_tree(
        &src,
        &dst,
        CopyMode::NewNameIfInUse(alternate.clone()),
    ));
    sequence.apply().expect("must apply");

    assert_eq!(fs::read_to_string(&dst).expect("must read dst"), "v1");
    assert_eq!(fs::read_to_string(&alternate).expect("must read alt"), "v2");
    match &sequence.mutations()[0] {
        Mutation::CopyTree(copy) => assert_eq!(copy.copied_to(), Some(alternate.as_path())),
        other => panic!("unexpected mutation: {other:?}"),
    }

    sequence.rollback();
    assert!(!alternate.exists());
    assert_eq!(fs::read_to_string(&dst).expect("must read dst"), "v1");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn copy_tree_if_different_skips_identical_file() {
    let root = test_root();
    let src = root.join("same.txt");
    let dst = root.join("dest.txt");
    fs::write(&src, "same").expect("must write src");
    fs::write(&dst, "same").expect("must write dst");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::copy_tree(&src, &dst, CopyMode::IfDifferent));
    sequence.apply().expect("must apply");
    sequence.rollback();

    assert_eq!(fs::read_to_string(&dst).expect("must read dst"), "same");
    assert!(
        !root.join("backup").exists(),
        "no backup should be taken for identical files"
    );

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn write_file_rollback_restores_previous_contents() {
    let root = test_root();
    let path = root.join("manifest.xml");
    fs::write(&path, "before").expect("must seed file");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::write_file(&path, "after"));
    sequence.apply().expect("must apply");
    assert_eq!(fs::read_to_string(&path).expect("must read"), "after");

    sequence.rollback();
    assert_eq!(fs::read_to_string(&path).expect("must read"), "before");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn reversible_delete_restores_tree() {
    let root = test_root();
    let dir = root.join("old-version");
    fs::create_dir_all(&dir).expect("must create dir");
    fs::write(dir.join("file"), "data").expect("must write file");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::delete_path(&dir));
    assert!(sequence.mutations()[0].is_reversible());
    sequence.apply().expect("must apply");
    assert!(!dir.exists());

    let report = sequence.rollback();
    assert!(report.is_clean());
    assert_eq!(fs::read_to_string(dir.join("file")).expect("must read"), "data");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn delete_of_missing_path_is_a_no_op() {
    let root = test_root();
    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::delete_path_irreversible(root.join("absent")));
    assert!(!sequence.mutations()[0].is_reversible());
    sequence.apply().expect("must apply");

    let report = sequence.rollback();
    assert!(report.is_clean(), "nothing was deleted so nothing is lost");

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn pending_removal_mutations_round_trip() {
    let root = test_root();
    let pending = PendingRemovals::open(root.join("pending-removals.json"));
    let install_dir = root.join("install");
    pending
        .add(&install_dir.join("1.0.0.0"))
        .expect("must schedule");
    pending.add(&root.join("elsewhere")).expect("must schedule");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence
        .push(Mutation::remove_pending_removals(&install_dir))
        .push(Mutation::schedule_pending_removal(root.join("stale")));
    sequence.apply().expect("must apply");
    assert_eq!(
        pending.entries().expect("must read"),
        vec![root.join("elsewhere"), root.join("stale")]
    );

    sequence.rollback();
    let mut entries = pending.entries().expect("must read");
    entries.sort();
    let mut expected = vec![install_dir.join("1.0.0.0"), root.join("elsewhere")];
    expected.sort();
    assert_eq!(entries, expected);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn schedule_pending_removal_does_not_unschedule_existing_entry() {
    let root = test_root();
    let pending = PendingRemovals::open(root.join("pending-removals.json"));
    let path = root.join("stale");
    pending.add(&path).expect("must schedule");

    let mut sequence = MutationSequence::new(test_env(&root));
    sequence.push(Mutation::schedule_pending_removal(&path));
    sequence.apply().expect("must apply");
    sequence.rollback();

    assert_eq!(pending.entries().expect("must read"), vec![path]);

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn registry_rejects_invalid_keys() {
    for key in ["", "/", "a/../b", "a/./b", "a/.hidden"] {
        assert!(
            matches!(
                RegistryStore::key_components(key),
                Err(StoreError::InvalidKey { .. })
            ),
            "key {key:?} must be rejected"
        );
    }
    assert_eq!(
        RegistryStore::normalize_key("Software\\App//Clients/").expect("must normalize"),
        "Software/App/Clients"
    );
    assert_eq!(
        RegistryStore::key_ancestry("a/b/c").expect("must split"),
        vec!["a", "a/b", "a/b/c"]
    );
}

#[test]
fn registry_values_persist_across_handles() {
    let root = test_root();
    let store = RegistryStore::open(root.join("registry"));
    store.create_key("Software").expect("must create");
    store.create_key("Software/App").expect("must create");
    store
        .set_value("Software/App", "pv", KeyValue::from("3.0"))
        .expect("must set");
    store
        .set_value("Software/App", "size", KeyValue::Qword(42))
        .expect("must set");

    let reopened = RegistryStore::open(root.join("registry"));
    let values = reopened.values("Software/App").expect("must read values");
    assert_eq!(values.len(), 2);
    assert_eq!(values.get("size"), Some(&KeyValue::Qword(42)));
    assert_eq!(reopened.subkeys("Software").expect("must list"), vec!["App"]);

    assert!(!reopened.delete_key_if_empty("Software/App").expect("must check"));
    reopened.delete_value("Software/App", "pv").expect("must delete");
    reopened.delete_value("Software/App", "size").expect("must delete");
    assert!(reopened.delete_key_if_empty("Software/App").expect("must delete"));
    assert!(!reopened.key_exists("Software/App").expect("must check"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn registry_create_key_requires_parent() {
    let root = test_root();
    let store = RegistryStore::open(root.join("registry"));
    let err = store
        .create_key("Software/App")
        .expect_err("missing parent must fail");
    assert!(matches!(err, StoreError::MissingKey { ref key } if key == "Software"));

    let _ = fs::remove_dir_all(&root);
}
