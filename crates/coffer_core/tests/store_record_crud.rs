use coffer_core::{
    Database, EntityRef, NewRecord, NewStore, RecordPatch, RecordRepository, RepoError,
    SqliteVaultRepository, StorePatch, StoreRepository, TtlPolicy, ValidationError,
};
use serde_json::json;

fn repo() -> SqliteVaultRepository {
    SqliteVaultRepository::new(Database::open_in_memory().unwrap())
}

#[test]
fn store_crud_roundtrip() {
    let repo = repo();

    let created = repo
        .create_store(&NewStore {
            title: "  Passwords ".to_string(),
            metadata: Some(json!({"owner": "ops"})),
        })
        .unwrap();
    assert!(created.id > 0);
    assert_eq!(created.title, "Passwords");

    let loaded = repo.get_store(created.id).unwrap();
    assert_eq!(loaded, created);

    let patch: StorePatch = serde_json::from_value(json!({"title": "Infra"})).unwrap();
    let renamed = repo.update_store(created.id, &patch).unwrap();
    assert_eq!(renamed.title, "Infra");
    assert_eq!(renamed.metadata, Some(json!({"owner": "ops"})));
    assert!(renamed.updated_at >= created.updated_at);

    let clear: StorePatch = serde_json::from_value(json!({"metadata": null})).unwrap();
    let cleared = repo.update_store(created.id, &clear).unwrap();
    assert_eq!(cleared.metadata, None);
    assert_eq!(repo.get_store(created.id).unwrap().metadata, None);

    assert_eq!(repo.list_stores().unwrap(), vec![cleared]);
    assert_eq!(repo.delete_store(created.id).unwrap(), 0);
    assert!(repo.list_stores().unwrap().is_empty());
}

#[test]
fn missing_store_is_not_found() {
    let repo = repo();

    let err = repo.get_store(42).unwrap_err();
    assert!(matches!(err, RepoError::NotFound(EntityRef::Store(42))));
    assert!(repo.delete_store(42).unwrap_err().is_not_found());
    assert!(repo
        .update_store(42, &StorePatch::default())
        .unwrap_err()
        .is_not_found());
    assert!(repo
        .create_record(42, &NewRecord::new("r", b"x".to_vec()))
        .unwrap_err()
        .is_not_found());
    assert!(repo.list_records(42).unwrap_err().is_not_found());
}

#[test]
fn blank_store_title_is_rejected() {
    let repo = repo();
    let err = repo.create_store(&NewStore::new("   ")).unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::EmptyTitle)
    ));
    assert_eq!(repo.count_stores().unwrap(), 0);
}

#[test]
fn record_crud_roundtrip() {
    let repo = repo();
    let store = repo.create_store(&NewStore::new("Keys")).unwrap();

    let created = repo
        .create_record(
            store.id,
            &NewRecord::new("ssh", b"secret-bytes".to_vec()).expiring_at(i64::MAX),
        )
        .unwrap();
    assert_eq!(created.header.id, 1);
    assert_eq!(created.header.store_id, store.id);
    assert_eq!(created.header.encryption, "none");
    assert_eq!(created.header.size, 12);
    assert_eq!(created.header.ttl_policy, TtlPolicy::Prune);

    let loaded = repo.get_record(store.id, created.header.id).unwrap();
    assert_eq!(loaded, created);

    let headers = repo.list_records(store.id).unwrap();
    assert_eq!(headers, vec![created.header.clone()]);

    let patch: RecordPatch = serde_json::from_value(json!({
        "title": "ssh-prod",
        "buffer": "bmV3",
        "expires_at": null,
        "ttl_policy": "retain"
    }))
    .unwrap();
    let updated = repo.update_record(store.id, 1, &patch).unwrap();
    assert_eq!(updated.header.title, "ssh-prod");
    assert_eq!(updated.buffer, b"new".to_vec());
    assert_eq!(updated.header.size, 3);
    assert_eq!(updated.header.expires_at, None);
    assert_eq!(updated.header.ttl_policy, TtlPolicy::Retain);
    assert_eq!(updated.header.created_at, created.header.created_at);

    repo.delete_record(store.id, 1).unwrap();
    let err = repo.delete_record(store.id, 1).unwrap_err();
    assert!(matches!(
        err,
        RepoError::NotFound(EntityRef::Record {
            store_id: _,
            record_id: 1
        })
    ));
    assert!(repo.get_record(store.id, 1).unwrap_err().is_not_found());
}

#[test]
fn expiry_before_creation_is_rejected_on_create_and_update() {
    let repo = repo();
    let store = repo.create_store(&NewStore::new("Keys")).unwrap();

    let err = repo
        .create_record(
            store.id,
            &NewRecord::new("bad", Vec::new())
                .created_at(1_000)
                .expiring_at(999),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::ExpiryBeforeCreation { .. })
    ));
    assert!(repo.list_records(store.id).unwrap().is_empty());

    let record = repo
        .create_record(store.id, &NewRecord::new("ok", Vec::new()).created_at(1_000))
        .unwrap();
    let patch = RecordPatch {
        expires_at: Some(Some(500)),
        ..RecordPatch::default()
    };
    let err = repo
        .update_record(store.id, record.header.id, &patch)
        .unwrap_err();
    assert!(matches!(err, RepoError::Validation(_)));
    assert_eq!(
        repo.get_record(store.id, record.header.id)
            .unwrap()
            .header
            .expires_at,
        None
    );
}

#[test]
fn expired_records_are_listed_across_stores() {
    let repo = repo();
    let first = repo.create_store(&NewStore::new("A")).unwrap();
    let second = repo.create_store(&NewStore::new("B")).unwrap();

    for (store_id, expires_at) in [(first.id, 20), (second.id, 10), (first.id, 5_000)] {
        repo.create_record(
            store_id,
            &NewRecord::new("r", Vec::new())
                .created_at(1)
                .expiring_at(expires_at),
        )
        .unwrap();
    }
    repo.create_record(first.id, &NewRecord::new("forever", Vec::new()))
        .unwrap();

    let expired = repo.list_expired(100).unwrap();
    let keys: Vec<(i64, i64)> = expired
        .iter()
        .map(|header| (header.store_id, header.expires_at.unwrap_or_default()))
        .collect();
    assert_eq!(keys, vec![(second.id, 10), (first.id, 20)]);
}
