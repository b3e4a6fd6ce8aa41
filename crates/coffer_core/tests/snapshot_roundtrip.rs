use coffer_core::{
    now_epoch_ms, parse_snapshot, Database, NewRecord, NewStore, RecordRepository, RepoError,
    Snapshot, SnapshotCoordinator, SnapshotError, SqliteVaultRepository, StoreRepository,
    TtlPolicy,
};
use serde_json::json;
use std::sync::Arc;

fn repo() -> Arc<SqliteVaultRepository> {
    Arc::new(SqliteVaultRepository::new(Database::open_in_memory().unwrap()))
}

/// `(store id, store title, [(record id, title, buffer, expires_at)])`
type Fingerprint = Vec<(i64, String, Vec<(i64, String, Vec<u8>, Option<i64>)>)>;

fn fingerprint(snapshot: &Snapshot) -> Fingerprint {
    snapshot
        .stores
        .iter()
        .map(|store| {
            let records = store
                .records
                .iter()
                .map(|record| {
                    (
                        record.id,
                        record.title.clone(),
                        record.buffer.clone(),
                        record.expires_at,
                    )
                })
                .collect();
            (store.id, store.title.clone(), records)
        })
        .collect()
}

#[test]
fn export_then_import_reproduces_ids_titles_buffers_and_expiry() {
    let source = repo();
    let now = now_epoch_ms();
    let first = source
        .create_store(&NewStore {
            title: "Passwords".to_string(),
            metadata: Some(json!({"tier": 1})),
        })
        .unwrap();
    let second = source.create_store(&NewStore::new("Certs")).unwrap();
    source
        .create_record(first.id, &NewRecord::new("wifi", vec![0, 159, 146, 150]))
        .unwrap();
    source
        .create_record(
            first.id,
            &NewRecord::new("vpn", b"tunnel".to_vec())
                .expiring_at(now + 60_000)
                .with_policy(TtlPolicy::Retain),
        )
        .unwrap();
    source.delete_record(first.id, 1).unwrap();
    source
        .create_record(second.id, &NewRecord::new("tls", Vec::new()))
        .unwrap();

    let exported = SnapshotCoordinator::new(Arc::clone(&source))
        .export_all()
        .unwrap();
    assert_eq!(exported.record_count(), 2);

    let target = repo();
    let coordinator = SnapshotCoordinator::new(Arc::clone(&target));
    let imported = coordinator.import_snapshot(&exported).unwrap();
    assert_eq!(imported.len(), 2);

    let reexported = coordinator.export_all().unwrap();
    assert_eq!(fingerprint(&reexported), fingerprint(&exported));
    assert_eq!(reexported.stores[0].metadata, Some(json!({"tier": 1})));
    assert_eq!(
        reexported.stores[0].records[0].ttl_policy,
        TtlPolicy::Retain
    );

    // Record ids keep counting after the highest imported id.
    let next = target
        .create_record(first.id, &NewRecord::new("new", Vec::new()))
        .unwrap();
    assert_eq!(next.header.id, 3);
}

#[test]
fn invalid_expiry_rejects_whole_import_and_leaves_state_untouched() {
    let repo = repo();
    let existing = repo.create_store(&NewStore::new("existing")).unwrap();
    repo.create_record(existing.id, &NewRecord::new("keep", b"k".to_vec()))
        .unwrap();
    let coordinator = SnapshotCoordinator::new(Arc::clone(&repo));
    let before = coordinator.export_all().unwrap();

    let snapshot = parse_snapshot(
        r#"{"version": 1, "stores": [
            {"id": 50, "title": "fine", "created_at": 1, "records": [
                {"id": 1, "title": "ok", "buffer": "b2s=", "created_at": 1}
            ]},
            {"id": 51, "title": "broken", "created_at": 1, "records": [
                {"id": 1, "title": "bad", "buffer": "", "created_at": 100, "expires_at": 99}
            ]}
        ]}"#,
    )
    .unwrap();

    let err = coordinator.import_snapshot(&snapshot).unwrap_err();
    assert!(err.is_malformed());
    match err {
        SnapshotError::Malformed { location, .. } => {
            assert_eq!(location, "stores[1].records[0]");
        }
        other => panic!("unexpected error: {other}"),
    }

    let after = coordinator.export_all().unwrap();
    assert_eq!(fingerprint(&after), fingerprint(&before));
    assert!(repo.get_store(50).unwrap_err().is_not_found());
}

#[test]
fn exported_store_is_restored_with_original_ids_after_delete() {
    let repo = repo();
    let now = now_epoch_ms();
    let store = repo.create_store(&NewStore::new("S2")).unwrap();
    let expired = repo
        .create_record(
            store.id,
            &NewRecord::new("expired", b"old".to_vec())
                .created_at(now - 2_000)
                .expiring_at(now - 1_000),
        )
        .unwrap();
    let live = repo
        .create_record(
            store.id,
            &NewRecord::new("live", b"new".to_vec()).expiring_at(now + 3_600_000),
        )
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s2.json");
    let coordinator = SnapshotCoordinator::new(Arc::clone(&repo));
    let exported = coordinator.export_to_file(Some(store.id), &path).unwrap();
    assert_eq!(exported.stores.len(), 1);

    assert_eq!(repo.delete_store(store.id).unwrap(), 2);

    let imported = coordinator.import_from_file(&path).unwrap();
    assert_eq!(imported.len(), 1);
    assert_eq!(imported[0].id, store.id);

    let restored_expired = repo.get_record(store.id, expired.header.id).unwrap();
    assert_eq!(restored_expired.buffer, b"old".to_vec());
    assert_eq!(restored_expired.header.expires_at, expired.header.expires_at);
    let restored_live = repo.get_record(store.id, live.header.id).unwrap();
    assert_eq!(restored_live.header.title, "live");
    assert_eq!(restored_live.buffer, b"new".to_vec());
}

#[test]
fn occupied_store_id_is_reassigned_but_record_ids_are_kept() {
    let repo = repo();
    let occupied = repo.create_store(&NewStore::new("occupied")).unwrap();
    let snapshot = parse_snapshot(&format!(
        r#"[{{"id": {}, "title": "incoming", "created_at": 5, "records": [
            {{"id": 7, "title": "seven", "buffer": "Nw==", "created_at": 5}}
        ]}}]"#,
        occupied.id
    ))
    .unwrap();

    let imported = SnapshotCoordinator::new(Arc::clone(&repo))
        .import_snapshot(&snapshot)
        .unwrap();

    assert_ne!(imported[0].id, occupied.id);
    assert_eq!(repo.get_store(occupied.id).unwrap().title, "occupied");
    let record = repo.get_record(imported[0].id, 7).unwrap();
    assert_eq!(record.buffer, b"7".to_vec());
}

#[test]
fn reassigned_store_does_not_take_an_id_a_later_store_keeps() {
    let repo = repo();
    let occupied = repo.create_store(&NewStore::new("occupied")).unwrap();
    assert_eq!(occupied.id, 1);
    let snapshot = parse_snapshot(
        r#"[{"id": 1, "title": "a", "created_at": 5},
            {"id": 2, "title": "b", "created_at": 5, "records": [
                {"id": 4, "title": "four", "buffer": "NA==", "created_at": 5}
            ]}]"#,
    )
    .unwrap();

    let imported = SnapshotCoordinator::new(Arc::clone(&repo))
        .import_snapshot(&snapshot)
        .unwrap();

    let ids: Vec<(i64, &str)> = imported
        .iter()
        .map(|store| (store.id, store.title.as_str()))
        .collect();
    assert_eq!(ids, vec![(3, "a"), (2, "b")]);
    assert_eq!(repo.get_store(1).unwrap().title, "occupied");
    assert_eq!(repo.get_record(2, 4).unwrap().buffer, b"4".to_vec());
    assert_eq!(repo.count_stores().unwrap(), 3);
}

#[test]
fn export_of_missing_store_is_not_found() {
    let coordinator = SnapshotCoordinator::new(repo());
    let err = coordinator.export_one(404).unwrap_err();
    assert!(matches!(err, SnapshotError::Repo(RepoError::NotFound(_))));
}

#[test]
fn seed_applies_only_to_an_empty_vault() {
    let repo = repo();
    let coordinator = SnapshotCoordinator::new(Arc::clone(&repo));
    let seed = parse_snapshot(
        r#"[{"id": 1, "title": "Defaults", "created_at": 1, "records": []},
            {"id": 2, "title": "Team", "created_at": 1}]"#,
    )
    .unwrap();

    assert_eq!(coordinator.seed_if_empty(&seed).unwrap(), 2);
    assert_eq!(coordinator.seed_if_empty(&seed).unwrap(), 0);
    assert_eq!(repo.count_stores().unwrap(), 2);
}

#[test]
fn unreadable_snapshot_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let coordinator = SnapshotCoordinator::new(repo());
    let err = coordinator
        .import_from_file(dir.path().join("missing.json"))
        .unwrap_err();
    assert!(matches!(err, SnapshotError::Io { .. }));
    assert!(!err.is_malformed());
}
