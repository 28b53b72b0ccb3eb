#![allow(clippy::expect_used, clippy::panic)]
//! End-to-end repository behavior over the in-memory document store.

use std::{collections::HashSet, sync::Arc, time::Duration};

use microbase_storage::{
    Criteria, Entity, FieldPath, MemoryDocumentStore, Repository, RollPageParam, StorageError,
    Update, assert_validation,
    testutil::{Line, Profile, SampleDoc, sample_repository, seeded_repository},
};

/// Sleeps past the current millisecond so timestamps written next differ.
async fn next_millis() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

#[tokio::test]
async fn create_assigns_unique_ids_and_equal_timestamps() {
    let (repo, _) = sample_repository();

    let mut ids = HashSet::new();
    for idx in 0..50 {
        let doc = repo.create(SampleDoc::named(&format!("doc-{idx}"))).await.expect("create");
        assert!(!doc.base.id.is_empty());
        assert!(doc.base.created_at.is_some());
        assert_eq!(doc.base.created_at, doc.base.updated_at);
        assert!(!doc.base.deleted);
        assert!(ids.insert(doc.base.id.clone()), "duplicate id {}", doc.base.id);
    }
}

#[tokio::test]
async fn independently_built_repositories_never_share_ids() {
    let store = Arc::new(MemoryDocumentStore::new());
    let first = Repository::<SampleDoc>::builder().store(store.clone()).build();
    let second = Repository::<SampleDoc>::builder().store(store.clone()).build();

    let mut ids = HashSet::new();
    for idx in 0..2_000 {
        for repo in [&first, &second] {
            let doc = repo
                .create(SampleDoc::named(&format!("doc-{idx}")))
                .await
                .unwrap_or_else(|err| panic!("create {idx} failed: {err}"));
            assert!(ids.insert(doc.base.id.clone()), "duplicate id {}", doc.base.id);
        }
    }
    assert_eq!(store.len(SampleDoc::COLLECTION), 4_000);
}

#[tokio::test]
async fn created_document_reads_back_identically() {
    let (repo, store) = sample_repository();
    let mut doc = SampleDoc::named("full").scored(7).tagged(&["a", "b"]);
    doc.profile = Some(Profile { city: Some("Lyon".into()), country: None });
    doc.lines = Some(vec![Line { sku: "s1".into(), qty: 2 }]);

    let created = repo.create(doc).await.expect("create");
    let read = repo.get_by_id(&created.base.id, &[]).await.expect("get").expect("present");
    assert_eq!(read, created);

    let raw = store.raw(SampleDoc::COLLECTION, &created.base.id).expect("raw document");
    assert_eq!(raw["_id"], created.base.id.as_str());
    assert!(raw["createdAt"].is_i64(), "timestamps are stored as epoch millis: {raw}");
}

#[tokio::test]
async fn create_many_skips_absent_entries() {
    let (repo, _) = sample_repository();
    let created = repo
        .create_many([Some(SampleDoc::named("a")), None, Some(SampleDoc::named("b"))])
        .await
        .expect("create_many");
    assert_eq!(created.len(), 2);
    assert_ne!(created[0].base.id, created[1].base.id);

    assert!(repo.create_many(Vec::<Option<SampleDoc>>::new()).await.expect("empty").is_empty());
    assert_validation!(repo.create_many([Some(SampleDoc::with_id("preset"))]).await);
}

#[tokio::test]
async fn create_with_id_rejects_duplicates() {
    let (repo, _) = sample_repository();
    repo.create_with_id(SampleDoc::with_id("dup")).await.expect("first insert");
    assert_validation!(repo.create_with_id(SampleDoc::with_id("dup")).await);
}

#[tokio::test]
async fn skip_null_update_touches_only_populated_fields() {
    let (repo, _) = sample_repository();
    let original = repo
        .create(SampleDoc::named("before").scored(3).tagged(&["keep"]))
        .await
        .expect("create");
    next_millis().await;

    let mut patch = SampleDoc::with_id(&original.base.id);
    patch.name = Some("x".into());
    assert!(repo.update_skip_null_by_id(&patch).await.expect("update"));

    let read = repo.get_by_id(&original.base.id, &[]).await.expect("get").expect("present");
    assert_eq!(read.name.as_deref(), Some("x"));
    assert_eq!(read.score, Some(3));
    assert_eq!(read.tags, original.tags);
    assert_eq!(read.base.created_at, original.base.created_at);
    assert!(read.base.updated_at > original.base.updated_at);
}

#[tokio::test]
async fn update_of_missing_document_reports_false() {
    let (repo, store) = sample_repository();
    let mut patch = SampleDoc::with_id("ghost");
    patch.name = Some("x".into());
    assert!(!repo.update_skip_null_by_id(&patch).await.expect("update"));
    assert!(store.is_empty(SampleDoc::COLLECTION));
}

#[tokio::test]
async fn update_by_id_writes_nested_paths() {
    let (repo, _) = sample_repository();
    let created = repo.create(SampleDoc::named("n")).await.expect("create");

    let update = Update::base()
        .set(FieldPath::of(SampleDoc::PROFILE).then(Profile::CITY), "Paris")
        .expect("set city");
    assert!(repo.update_by_id(&created.base.id, update).await.expect("update"));

    let unset = Update::new().unset(SampleDoc::NAME).expect("unset");
    assert!(repo.update_by_id(&created.base.id, unset).await.expect("update"));

    let read = repo.get_by_id(&created.base.id, &[]).await.expect("get").expect("present");
    assert_eq!(read.profile.and_then(|p| p.city).as_deref(), Some("Paris"));
    assert_eq!(read.name, None);
}

#[tokio::test]
async fn upsert_is_idempotent_on_creation_metadata() {
    let (repo, _) = sample_repository();
    let mut doc = SampleDoc::with_id("u1");
    doc.name = Some("same".into());

    repo.create_or_update_skip_null_by_id(&doc).await.expect("first upsert");
    let first = repo.get_by_id("u1", &[]).await.expect("get").expect("inserted");
    assert_eq!(first.base.created_at, first.base.updated_at);

    next_millis().await;
    repo.create_or_update_skip_null_by_id(&doc).await.expect("second upsert");
    let second = repo.get_by_id("u1", &[]).await.expect("get").expect("still present");

    assert_eq!(second.base.created_at, first.base.created_at);
    assert!(second.base.updated_at > first.base.updated_at);
    assert_eq!(second.name.as_deref(), Some("same"));
    assert_eq!(repo.list_all_ids().await.expect("ids"), vec!["u1".to_owned()]);
}

#[tokio::test]
async fn upsert_with_blank_id_always_inserts() {
    let (repo, store) = sample_repository();
    repo.create_or_update_skip_null_by_id(&SampleDoc::named("a")).await.expect("upsert");
    repo.create_or_update_skip_null_by_id(&SampleDoc::named("a")).await.expect("upsert");
    assert_eq!(store.len(SampleDoc::COLLECTION), 2);
}

#[tokio::test]
async fn batch_upsert_mixes_inserts_and_updates() {
    let (repo, _) = sample_repository();
    let existing = repo.create(SampleDoc::named("old").scored(1)).await.expect("create");

    let mut patch = SampleDoc::with_id(&existing.base.id);
    patch.score = Some(2);
    let fresh = SampleDoc::named("new");
    repo.batch_create_or_update_skip_null_by_id(&[patch, fresh]).await.expect("batch upsert");

    let all = repo.list_all(&[]).await.expect("list");
    assert_eq!(all.len(), 2);
    let updated = all.iter().find(|d| d.base.id == existing.base.id).expect("existing kept");
    assert_eq!(updated.score, Some(2));
    assert_eq!(updated.name.as_deref(), Some("old"));
    assert_eq!(updated.base.created_at, existing.base.created_at);
}

#[tokio::test]
async fn batch_update_reports_only_that_something_ran() {
    let (repo, _) = seeded_repository("b", 2).await;
    let ids = repo.list_all_ids().await.expect("ids");

    let mut hit = SampleDoc::with_id(&ids[0]);
    hit.score = Some(100);
    let mut miss = SampleDoc::with_id("absent");
    miss.score = Some(100);

    assert!(repo.batch_update_skip_null_by_id(&[hit, miss]).await.expect("batch update"));
    let count = repo.count(Criteria::new().field(SampleDoc::SCORE).is(100)).await.expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn delete_by_ids_requires_exact_count() {
    let (repo, store) = seeded_repository("d", 3).await;
    let ids = repo.list_all_ids().await.expect("ids");

    assert!(repo.delete_by_ids([ids[0].as_str(), ids[0].as_str(), " "]).await.expect("delete"));
    assert!(!repo.delete_by_ids([ids[1].as_str(), "absent"]).await.expect("partial delete"));
    assert_eq!(store.len(SampleDoc::COLLECTION), 1, "partial delete still removed what it found");

    assert!(repo.delete_by_id(&ids[2]).await.expect("delete"));
    assert!(!repo.delete_by_id(&ids[2]).await.expect("second delete"));
}

#[tokio::test]
async fn list_by_ids_with_projection() {
    let (repo, _) = seeded_repository("p", 3).await;
    let ids = repo.list_all_ids().await.expect("ids");

    let docs = repo.list_by_ids([&ids[0], &ids[1]], &["name"]).await.expect("list");
    assert_eq!(docs.len(), 2);
    for doc in docs {
        assert!(!doc.base.id.is_empty(), "projection keeps the id");
        assert!(doc.name.is_some());
        assert_eq!(doc.score, None);
        assert_eq!(doc.base.created_at, None);
    }
}

#[tokio::test]
async fn bad_field_names_fail_as_path_errors() {
    let (repo, _) = sample_repository();
    let err = repo.find(Criteria::new().field("$where").is(1), &[]).await.expect_err("bad path");
    assert!(matches!(err, StorageError::PathResolution { .. }), "got {err:?}");

    let err = repo.get_by_id("x", &["na me"]).await.expect_err("bad projection");
    assert!(matches!(err, StorageError::PathResolution { .. }), "got {err:?}");
}

#[tokio::test]
async fn created_then_found_by_exact_keyword() {
    let (repo, _) = sample_repository();
    let created = repo.create(SampleDoc::named("foo")).await.expect("create");
    repo.create(SampleDoc::named("foobar")).await.expect("create");

    let param = RollPageParam::builder()
        .keyword_type("name")
        .keyword_list(vec!["foo".to_owned()])
        .search_type("exact")
        .build();
    let page = repo.roll_page(&param, None).await.expect("roll page");

    assert_eq!(page.total, -1);
    assert_eq!(page.list.len(), 1);
    assert_eq!(page.list[0].base.id, created.base.id);
}
