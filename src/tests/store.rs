use std::sync::Arc;

use crate::semantic::{l2_norm, EmbeddingError, Encoder, HashEncoder, UNIT_NORM_TOLERANCE};
use crate::store::{
    EmbeddingStore, Job, JobAttributes, LoadOutcome, RebuildStrategy, Resume, StoreError,
    StoreOptions,
};

use super::common::*;

fn assert_consistent<K: crate::store::DocumentKind>(store: &EmbeddingStore<K>) {
    let ids = store.list_ids().unwrap();
    assert_eq!(ids.len(), store.count().unwrap());

    for (position, id) in ids.iter().enumerate() {
        let record = store.get_record(id).unwrap().unwrap();
        assert_eq!(record.position, position);

        let embedding = store.get_embedding(id).unwrap();
        assert!((l2_norm(&embedding) - 1.0).abs() <= UNIT_NORM_TOLERANCE);
    }
    assert!(store.reader().unwrap().all_unit_norm());
}

#[test]
fn test_count_matches_records_after_mutations() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());

    jobs.add("j1", "Python backend", JobAttributes::default()).unwrap();
    jobs.add("j2", "Java enterprise", JobAttributes::default()).unwrap();
    jobs.add("j3", "Rust and SQL", JobAttributes::default()).unwrap();
    assert_consistent(&jobs);

    jobs.remove("j2").unwrap();
    assert_consistent(&jobs);

    jobs.add("j4", "Cloud design", JobAttributes::default()).unwrap();
    assert_consistent(&jobs);
    assert_eq!(jobs.list_ids().unwrap(), vec!["j1", "j3", "j4"]);
}

#[test]
fn test_save_load_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();

    let resumes = resume_store(tmp.path(), encoder.clone());
    let mut attributes = resume(Some("alice"));
    attributes
        .sections
        .insert("skills".to_string(), serde_json::json!(["python", "kubernetes"]));
    resumes
        .add("r1", "Python developer,\n  Kubernetes experience", attributes.clone())
        .unwrap();
    resumes.add("r2", "Java monolith maintenance", resume(None)).unwrap();
    resumes.save().unwrap();

    let reopened = resume_store(tmp.path(), encoder);
    assert_eq!(reopened.count().unwrap(), 2);
    assert_eq!(reopened.list_ids().unwrap(), resumes.list_ids().unwrap());

    for id in ["r1", "r2"] {
        let before = resumes.get_record(id).unwrap().unwrap();
        let after = reopened.get_record(id).unwrap().unwrap();
        assert_eq!(before, after);
        assert_eq!(
            resumes.get_embedding(id).unwrap(),
            reopened.get_embedding(id).unwrap()
        );
    }

    let r1 = reopened.get_record("r1").unwrap().unwrap();
    assert_eq!(r1.source_text, "Python developer,\n  Kubernetes experience");
    assert_eq!(r1.attributes, attributes);
    assert_eq!(r1.embedding_model, "keyword-test");
}

#[test]
fn test_repeated_search_is_identical() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder: Arc<dyn Encoder> = Arc::new(HashEncoder::new(32).unwrap());
    let jobs = job_store(tmp.path(), encoder.clone());

    for (id, text) in [
        ("a", "rust systems programming"),
        ("b", "rust web services"),
        ("c", "python data pipelines"),
        ("d", "go microservices"),
    ] {
        jobs.add(id, text, JobAttributes::default()).unwrap();
    }

    let query = encoder.encode("rust services").unwrap();
    let first = jobs.search_similar(&query, 3).unwrap();
    for _ in 0..5 {
        assert_eq!(jobs.search_similar(&query, 3).unwrap(), first);
    }
}

#[test]
fn test_remove_drops_document_everywhere() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let jobs = job_store(tmp.path(), encoder.clone());
    seed_jobs(&jobs);

    let survivors_before: Vec<Vec<f32>> = ["j1", "j3"]
        .iter()
        .map(|id| jobs.get_embedding(id).unwrap())
        .collect();
    let query = encoder.encode("java enterprise cloud").unwrap();
    assert_eq!(jobs.search_similar(&query, 1).unwrap()[0].external_id, "j2");

    let removed = jobs.remove("j2").unwrap();
    assert_eq!(removed.external_id, "j2");
    assert_eq!(jobs.count().unwrap(), 2);
    assert!(!jobs.contains("j2").unwrap());
    assert!(matches!(
        jobs.get_embedding("j2"),
        Err(StoreError::NotFound { .. })
    ));

    let hits = jobs.search_similar(&query, 10).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.external_id != "j2"));

    for (id, before) in ["j1", "j3"].iter().zip(survivors_before) {
        assert_eq!(jobs.get_embedding(id).unwrap(), before);
    }
    assert_eq!(jobs.get_record("j3").unwrap().unwrap().position, 1);
    assert_consistent(&jobs);
}

fn seed_jobs(jobs: &EmbeddingStore<Job>) {
    jobs.add("j1", "Python backend, Kubernetes", JobAttributes::default())
        .unwrap();
    jobs.add("j2", "Java enterprise, cloud", JobAttributes::default())
        .unwrap();
    jobs.add("j3", "Rust and SQL", JobAttributes::default())
        .unwrap();
}

#[test]
fn test_reuse_rebuild_does_not_reencode() {
    let tmp = tempfile::tempdir().unwrap();
    let counting = Arc::new(CountingEncoder::new(keyword_encoder()));
    let jobs: EmbeddingStore<Job> =
        EmbeddingStore::open(tmp.path(), counting.clone(), StoreOptions::default());
    seed_jobs(&jobs);
    assert_eq!(counting.calls(), 3);

    jobs.remove("j1").unwrap();
    assert_eq!(counting.calls(), 3);
}

#[test]
fn test_reencode_rebuild_encodes_survivors() {
    let tmp = tempfile::tempdir().unwrap();
    let counting = Arc::new(CountingEncoder::new(keyword_encoder()));
    let jobs: EmbeddingStore<Job> = EmbeddingStore::open(
        tmp.path(),
        counting.clone(),
        StoreOptions {
            rebuild: RebuildStrategy::Reencode,
            autosave: true,
        },
    );
    seed_jobs(&jobs);
    let j3_before = jobs.get_embedding("j3").unwrap();

    jobs.remove("j1").unwrap();
    assert_eq!(counting.calls(), 3 + 2);
    assert_eq!(jobs.list_ids().unwrap(), vec!["j2", "j3"]);

    let j3_after = jobs.get_embedding("j3").unwrap();
    for (a, b) in j3_before.iter().zip(&j3_after) {
        assert!((a - b).abs() < 1e-6);
    }
    assert_consistent(&jobs);
}

#[test]
fn test_search_ranks_known_scores() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = Arc::new(TableEncoder::new(
        3,
        &[
            ("low", with_cosine(0.40)),
            ("high", with_cosine(0.95)),
            ("mid", with_cosine(0.72)),
        ],
    ));
    let jobs = job_store(tmp.path(), encoder);

    jobs.add("c", "low", JobAttributes::default()).unwrap();
    jobs.add("a", "high", JobAttributes::default()).unwrap();
    jobs.add("b", "mid", JobAttributes::default()).unwrap();

    let hits = jobs.search_similar(&[1.0, 0.0, 0.0], 2).unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].external_id, "a");
    assert_eq!(hits[1].external_id, "b");
    assert!((hits[0].score - 0.95).abs() < 1e-4);
    assert!((hits[1].score - 0.72).abs() < 1e-4);
}

#[test]
fn test_search_on_empty_store_returns_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());

    let query = vec![1.0; jobs.dimensions()];
    assert_eq!(jobs.count().unwrap(), 0);
    assert!(jobs.search_similar(&query, 5).unwrap().is_empty());
}

#[test]
fn test_search_rejects_wrong_dimension_query() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);

    assert!(matches!(
        jobs.search_similar(&[1.0, 0.0], 1),
        Err(StoreError::Index(_))
    ));
}

#[test]
fn test_duplicate_add_and_missing_remove() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    jobs.add("j1", "Python", job("first")).unwrap();

    let err = jobs.add(" j1 ", "Java", job("second")).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }));
    assert_eq!(
        jobs.get_record("j1").unwrap().unwrap().attributes.title.as_deref(),
        Some("first")
    );

    assert!(matches!(
        jobs.remove("nope"),
        Err(StoreError::NotFound { .. })
    ));
    assert_eq!(jobs.count().unwrap(), 1);
}

#[test]
fn test_encoder_failure_leaves_store_unchanged() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = Arc::new(TableEncoder::new(3, &[("known", with_cosine(0.5))]));
    let jobs = job_store(tmp.path(), encoder);
    jobs.add("j1", "known", JobAttributes::default()).unwrap();

    let err = jobs.add("j2", "unknown", JobAttributes::default()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Encoder(EmbeddingError::EmbeddingFailed(_))
    ));
    assert_eq!(jobs.count().unwrap(), 1);
    assert!(!jobs.contains("j2").unwrap());
    assert_consistent(&jobs);
}

#[test]
fn test_failed_rebuild_keeps_previous_state() {
    let tmp = tempfile::tempdir().unwrap();
    let flaky = Arc::new(CountingEncoder::failing_after(keyword_encoder(), 3));
    let jobs: EmbeddingStore<Job> = EmbeddingStore::open(
        tmp.path(),
        flaky.clone(),
        StoreOptions {
            rebuild: RebuildStrategy::Reencode,
            autosave: true,
        },
    );
    seed_jobs(&jobs);
    let before = jobs.list_ids().unwrap();

    let err = jobs.remove("j1").unwrap_err();
    assert!(matches!(err, StoreError::Encoder(_)));
    assert_eq!(jobs.list_ids().unwrap(), before);
    assert!(jobs.contains("j1").unwrap());
    assert_consistent(&jobs);
}

/// Swap the store directory for a regular file so the next save fails.
fn block_store_dir(base: &std::path::Path) {
    let dir = base.join("jobs");
    if dir.is_dir() {
        std::fs::remove_dir_all(&dir).unwrap();
    }
    std::fs::write(&dir, b"not a directory").unwrap();
}

#[test]
fn test_failed_autosave_rolls_back_add() {
    let tmp = tempfile::tempdir().unwrap();
    block_store_dir(tmp.path());
    let jobs = job_store(tmp.path(), keyword_encoder());

    let err = jobs.add("j1", "Python backend", JobAttributes::default()).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(jobs.count().unwrap(), 0);
    assert!(!jobs.contains("j1").unwrap());
    assert_consistent(&jobs);

    // Retrying reports the save failure again, not a duplicate
    let err = jobs.add("j1", "Python backend", JobAttributes::default()).unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
}

#[test]
fn test_failed_autosave_keeps_removed_document() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);
    let before = jobs.list_ids().unwrap();
    let embedding = jobs.get_embedding("j2").unwrap();
    block_store_dir(tmp.path());

    let err = jobs.remove("j1").unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
    assert_eq!(jobs.list_ids().unwrap(), before);
    assert!(jobs.contains("j1").unwrap());
    assert_eq!(jobs.get_embedding("j2").unwrap(), embedding);
    assert_consistent(&jobs);
}

#[test]
fn test_failed_clear_keeps_documents() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);

    // A directory where the vector file should be cannot be removed as a file
    let vectors = jobs.storage().vectors_path();
    std::fs::remove_file(&vectors).unwrap();
    std::fs::create_dir(&vectors).unwrap();

    assert!(matches!(jobs.clear(), Err(StoreError::Storage(_))));
    assert_eq!(jobs.count().unwrap(), 3);
    assert!(jobs.contains("j3").unwrap());
}

#[test]
fn test_missing_metadata_recovers_to_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let jobs = job_store(tmp.path(), encoder.clone());
    seed_jobs(&jobs);
    jobs.save().unwrap();

    std::fs::remove_file(jobs.storage().metadata_path()).unwrap();
    assert!(jobs.storage().vectors_path().exists());

    let reopened = job_store(tmp.path(), encoder);
    assert_eq!(reopened.count().unwrap(), 0);
    assert!(matches!(reopened.load().unwrap(), LoadOutcome::Recovered(_)));

    // still usable afterwards
    reopened.add("j9", "Rust", JobAttributes::default()).unwrap();
    assert_eq!(reopened.count().unwrap(), 1);
}

#[test]
fn test_truncated_vectors_recover_to_empty() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let jobs = job_store(tmp.path(), encoder.clone());
    seed_jobs(&jobs);

    let path = jobs.storage().vectors_path();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let reopened = job_store(tmp.path(), encoder);
    assert_eq!(reopened.count().unwrap(), 0);
}

#[test]
fn test_other_model_artifacts_are_not_loaded() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);

    let other: Arc<dyn Encoder> = Arc::new(HashEncoder::new(11).unwrap());
    let reopened = job_store(tmp.path(), other);
    assert_eq!(reopened.count().unwrap(), 0);
    assert!(matches!(reopened.load().unwrap(), LoadOutcome::Recovered(_)));
}

#[test]
fn test_clear_removes_artifacts() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);
    assert!(jobs.storage().exists());

    jobs.clear().unwrap();
    assert_eq!(jobs.count().unwrap(), 0);
    assert!(!jobs.storage().exists());
    assert_eq!(jobs.load().unwrap(), LoadOutcome::Fresh);
}

#[test]
fn test_stores_live_in_separate_directories() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let jobs = job_store(tmp.path(), encoder.clone());
    let resumes = resume_store(tmp.path(), encoder);
    seed_scenario(&jobs, &resumes);

    assert_eq!(jobs.storage().dir(), tmp.path().join("jobs"));
    assert_eq!(resumes.storage().dir(), tmp.path().join("resumes"));

    resumes.clear().unwrap();
    assert_eq!(jobs.count().unwrap(), 2);
    assert!(jobs.storage().exists());
}

#[test]
fn test_resume_user_functions() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let resumes: EmbeddingStore<Resume> = resume_store(tmp.path(), encoder.clone());

    resumes.add("r1", "Python Kubernetes", resume(Some("alice"))).unwrap();
    resumes.add("r2", "Java monolith", resume(Some("bob"))).unwrap();
    resumes.add("r3", "Python cloud", resume(Some("alice"))).unwrap();
    resumes.add("r4", "SQL design", resume(None)).unwrap();

    assert_eq!(resumes.count_by_user("alice").unwrap(), 2);
    assert_eq!(resumes.count_by_user("carol").unwrap(), 0);
    assert_eq!(resumes.list_by_user("alice").unwrap(), vec!["r1", "r3"]);

    let distribution = resumes.user_distribution().unwrap();
    assert_eq!(distribution.get("alice"), Some(&2));
    assert_eq!(distribution.get("bob"), Some(&1));
    assert_eq!(distribution.get("unknown"), Some(&1));

    let query = encoder.encode("python").unwrap();
    let hits = resumes.search_by_user("alice", &query, 10).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|hit| hit.external_id == "r1" || hit.external_id == "r3"));
    assert!(resumes.search_by_user("carol", &query, 10).unwrap().is_empty());

    let stats = resumes.stats().unwrap();
    assert_eq!(stats.kind, "resumes");
    assert_eq!(stats.total_documents, 4);
    assert_eq!(stats.users_with_documents, Some(2));
    assert_eq!(stats.avg_documents_per_user, Some(2.0));
    assert_eq!(stats.model, "keyword-test");
    assert!(stats.index_size_bytes > 0);
    assert!(stats.last_added.is_some());
}

#[test]
fn test_job_stats_have_no_user_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let jobs = job_store(tmp.path(), keyword_encoder());
    seed_jobs(&jobs);

    let stats = jobs.stats().unwrap();
    assert_eq!(stats.total_documents, 3);
    assert_eq!(stats.embedding_dim, KEYWORDS.len() + 1);
    assert!(stats.users_with_documents.is_none());

    let json = serde_json::to_value(&stats).unwrap();
    assert!(json.get("users_with_documents").is_none());
}

#[test]
fn test_concurrent_readers_with_writer() {
    let tmp = tempfile::tempdir().unwrap();
    let encoder = keyword_encoder();
    let jobs = job_store(tmp.path(), encoder.clone());
    seed_jobs(&jobs);
    let query = encoder.encode("python rust").unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let reader = jobs.reader().unwrap();
                    let hits = reader.search_similar(&query, 5).unwrap();
                    for hit in hits {
                        assert!(reader.record(&hit.external_id).is_some());
                    }
                }
            });
        }

        scope.spawn(|| {
            for i in 0..10 {
                jobs.add(&format!("extra-{i}"), "Cloud design", JobAttributes::default())
                    .unwrap();
            }
            jobs.remove("j2").unwrap();
        });
    });

    assert_eq!(jobs.count().unwrap(), 12);
    assert_consistent(&jobs);
}
