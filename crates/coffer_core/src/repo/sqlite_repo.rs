//! SQLite implementation of the store/record repositories.
//!
//! # Responsibility
//! - Provide stable CRUD APIs over `stores` and `records` tables.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Store deletion removes records and store in one transaction.
//! - Record ids come from the per-store `next_record_id` counter and are never
//!   reused within a store.
//! - Read paths reject invalid persisted state instead of masking it.

use super::{EntityRef, RecordRepository, RepoError, RepoResult, StoreRepository};
use crate::db::Database;
use crate::model::now_epoch_ms;
use crate::model::record::{NewRecord, Record, RecordHeader, RecordId, RecordPatch, TtlPolicy};
use crate::model::store::{NewStore, Store, StoreGraph, StoreId, StorePatch};
use log::{debug, info, warn};
use rusqlite::{params, Connection, Params, Row, TransactionBehavior};
use serde_json::Value;
use std::collections::HashSet;

const STORE_SELECT_SQL: &str = "SELECT
    id,
    title,
    metadata,
    created_at,
    updated_at
FROM stores";

const HEADER_SELECT_SQL: &str = "SELECT
    store_id,
    id,
    title,
    metadata,
    encryption,
    length(buffer) AS size,
    ttl_policy,
    created_at,
    updated_at,
    expires_at
FROM records";

const RECORD_SELECT_SQL: &str = "SELECT
    store_id,
    id,
    title,
    metadata,
    encryption,
    length(buffer) AS size,
    ttl_policy,
    created_at,
    updated_at,
    expires_at,
    buffer
FROM records";

/// SQLite-backed store and record repository.
///
/// Cheap to clone; clones share the same connection pool.
#[derive(Debug, Clone)]
pub struct SqliteVaultRepository {
    db: Database,
}

impl SqliteVaultRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl StoreRepository for SqliteVaultRepository {
    fn list_stores(&self) -> RepoResult<Vec<Store>> {
        self.db.with_conn(|conn| {
            query_all(
                conn,
                &format!("{STORE_SELECT_SQL} ORDER BY id ASC;"),
                [],
                parse_store_row,
            )
        })
    }

    fn count_stores(&self) -> RepoResult<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM stores;", [], |row| row.get(0))?;
            u64::try_from(count)
                .map_err(|_| RepoError::InvalidData(format!("negative store count `{count}`")))
        })
    }

    fn create_store(&self, spec: &NewStore) -> RepoResult<Store> {
        let spec = spec.validated()?;
        let now = now_epoch_ms();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stores (title, metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3);",
                params![spec.title.as_str(), metadata_to_db(spec.metadata.as_ref()), now],
            )?;
            let store = Store {
                id: conn.last_insert_rowid(),
                title: spec.title.clone(),
                metadata: spec.metadata.clone(),
                created_at: now,
                updated_at: now,
            };
            debug!("event=store_create module=repo status=ok store_id={}", store.id);
            Ok(store)
        })
    }

    fn get_store(&self, id: StoreId) -> RepoResult<Store> {
        self.db.with_conn(|conn| load_store(conn, id))
    }

    fn update_store(&self, id: StoreId, patch: &StorePatch) -> RepoResult<Store> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = load_store(&tx, id)?;
            let next = current.patched(patch, now_epoch_ms())?;

            tx.execute(
                "UPDATE stores
                 SET
                    title = ?2,
                    metadata = ?3,
                    updated_at = ?4
                 WHERE id = ?1;",
                params![
                    id,
                    next.title.as_str(),
                    metadata_to_db(next.metadata.as_ref()),
                    next.updated_at,
                ],
            )?;
            tx.commit()?;
            Ok(next)
        })
    }

    fn delete_store(&self, id: StoreId) -> RepoResult<usize> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if !store_exists(&tx, id)? {
                return Err(RepoError::NotFound(EntityRef::Store(id)));
            }

            let removed = tx.execute("DELETE FROM records WHERE store_id = ?1;", [id])?;
            tx.execute("DELETE FROM stores WHERE id = ?1;", [id])?;
            tx.commit()?;

            info!(
                "event=store_delete module=repo status=ok store_id={} records_removed={}",
                id, removed
            );
            Ok(removed)
        })
    }

    fn load_graph(&self, scope: Option<StoreId>) -> RepoResult<Vec<StoreGraph>> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let stores = match scope {
                Some(id) => vec![load_store(&tx, id)?],
                None => query_all(
                    &tx,
                    &format!("{STORE_SELECT_SQL} ORDER BY id ASC;"),
                    [],
                    parse_store_row,
                )?,
            };

            let mut graphs = Vec::with_capacity(stores.len());
            for store in stores {
                let records = query_all(
                    &tx,
                    &format!("{RECORD_SELECT_SQL} WHERE store_id = ?1 ORDER BY id ASC;"),
                    [store.id],
                    parse_record_row,
                )?;
                graphs.push(StoreGraph { store, records });
            }
            tx.commit()?;
            Ok(graphs)
        })
    }

    fn import_graph(&self, graphs: &[StoreGraph]) -> RepoResult<Vec<Store>> {
        for graph in graphs {
            graph.store.validate()?;
            for record in &graph.records {
                record.validate()?;
            }
        }

        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let mut claimed = HashSet::with_capacity(graphs.len());
            let mut keeps_id = Vec::with_capacity(graphs.len());
            for graph in graphs {
                let id = graph.store.id;
                keeps_id.push(!store_exists(&tx, id)? && claimed.insert(id));
            }

            // Stores keeping their id go first so that a reassigned store can
            // never be handed an id a later store in the snapshot still needs.
            let mut assigned: Vec<StoreId> = vec![0; graphs.len()];
            for pass in [true, false] {
                for (index, graph) in graphs.iter().enumerate() {
                    if keeps_id[index] == pass {
                        assigned[index] = insert_imported_store(&tx, graph, pass)?;
                    }
                }
            }

            tx.commit()?;
            Ok(graphs
                .iter()
                .zip(assigned)
                .map(|(graph, id)| Store {
                    id,
                    ..graph.store.clone()
                })
                .collect())
        })
    }
}

impl RecordRepository for SqliteVaultRepository {
    fn list_records(&self, store_id: StoreId) -> RepoResult<Vec<RecordHeader>> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            if !store_exists(&tx, store_id)? {
                return Err(RepoError::NotFound(EntityRef::Store(store_id)));
            }
            let headers = query_all(
                &tx,
                &format!("{HEADER_SELECT_SQL} WHERE store_id = ?1 ORDER BY id ASC;"),
                [store_id],
                parse_header_row,
            )?;
            tx.commit()?;
            Ok(headers)
        })
    }

    fn create_record(&self, store_id: StoreId, spec: &NewRecord) -> RepoResult<Record> {
        let now = now_epoch_ms();
        // Validate before touching storage; the id is a placeholder here.
        spec.build(store_id, 0, now)?;

        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let next_id = query_one(
                &tx,
                "SELECT next_record_id FROM stores WHERE id = ?1;",
                [store_id],
                |row| Ok(row.get::<_, i64>(0)?),
            )?
            .ok_or(RepoError::NotFound(EntityRef::Store(store_id)))?;

            let record = spec.build(store_id, next_id, now)?;
            insert_record(&tx, store_id, &record)?;
            tx.execute(
                "UPDATE stores SET next_record_id = ?2 WHERE id = ?1;",
                params![store_id, next_id.saturating_add(1)],
            )?;
            tx.commit()?;

            debug!(
                "event=record_create module=repo status=ok store_id={} record_id={} expires_at={:?}",
                store_id, record.header.id, record.header.expires_at
            );
            Ok(record)
        })
    }

    fn get_record(&self, store_id: StoreId, record_id: RecordId) -> RepoResult<Record> {
        self.db.with_conn(|conn| load_record(conn, store_id, record_id))
    }

    fn update_record(
        &self,
        store_id: StoreId,
        record_id: RecordId,
        patch: &RecordPatch,
    ) -> RepoResult<Record> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let current = load_record(&tx, store_id, record_id)?;
            let next = current.patched(patch, now_epoch_ms())?;
            let header = &next.header;

            tx.execute(
                "UPDATE records
                 SET
                    title = ?3,
                    metadata = ?4,
                    encryption = ?5,
                    buffer = ?6,
                    ttl_policy = ?7,
                    updated_at = ?8,
                    expires_at = ?9
                 WHERE store_id = ?1
                   AND id = ?2;",
                params![
                    store_id,
                    record_id,
                    header.title.as_str(),
                    metadata_to_db(header.metadata.as_ref()),
                    header.encryption.as_str(),
                    next.buffer.as_slice(),
                    header.ttl_policy.as_str(),
                    header.updated_at,
                    header.expires_at,
                ],
            )?;
            tx.commit()?;
            Ok(next)
        })
    }

    fn delete_record(&self, store_id: StoreId, record_id: RecordId) -> RepoResult<()> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM records WHERE store_id = ?1 AND id = ?2;",
                [store_id, record_id],
            )?;
            if changed == 0 {
                return Err(RepoError::NotFound(EntityRef::Record {
                    store_id,
                    record_id,
                }));
            }
            Ok(())
        })
    }

    fn delete_record_if(
        &self,
        store_id: StoreId,
        record_id: RecordId,
        guard: &dyn Fn(&RecordHeader) -> bool,
    ) -> RepoResult<bool> {
        self.db.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let header = query_one(
                &tx,
                &format!("{HEADER_SELECT_SQL} WHERE store_id = ?1 AND id = ?2;"),
                [store_id, record_id],
                parse_header_row,
            )?
            .ok_or(RepoError::NotFound(EntityRef::Record {
                store_id,
                record_id,
            }))?;

            if !guard(&header) {
                return Ok(false);
            }

            tx.execute(
                "DELETE FROM records WHERE store_id = ?1 AND id = ?2;",
                [store_id, record_id],
            )?;
            tx.commit()?;
            Ok(true)
        })
    }

    fn list_expired(&self, now: i64) -> RepoResult<Vec<RecordHeader>> {
        self.db.with_conn(|conn| {
            query_all(
                conn,
                &format!(
                    "{HEADER_SELECT_SQL}
                     WHERE expires_at IS NOT NULL
                       AND expires_at <= ?1
                     ORDER BY expires_at ASC, store_id ASC, id ASC;"
                ),
                [now],
                parse_header_row,
            )
        })
    }
}

fn load_store(conn: &Connection, id: StoreId) -> RepoResult<Store> {
    query_one(
        conn,
        &format!("{STORE_SELECT_SQL} WHERE id = ?1;"),
        [id],
        parse_store_row,
    )?
    .ok_or(RepoError::NotFound(EntityRef::Store(id)))
}

fn load_record(conn: &Connection, store_id: StoreId, record_id: RecordId) -> RepoResult<Record> {
    query_one(
        conn,
        &format!("{RECORD_SELECT_SQL} WHERE store_id = ?1 AND id = ?2;"),
        [store_id, record_id],
        parse_record_row,
    )?
    .ok_or(RepoError::NotFound(EntityRef::Record {
        store_id,
        record_id,
    }))
}

fn store_exists(conn: &Connection, id: StoreId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM stores WHERE id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn insert_imported_store(
    conn: &Connection,
    graph: &StoreGraph,
    keep_id: bool,
) -> RepoResult<StoreId> {
    let source = &graph.store;
    let next_record_id = graph
        .records
        .iter()
        .map(|record| record.header.id)
        .max()
        .map_or(Some(1), |max| max.checked_add(1))
        .ok_or_else(|| {
            RepoError::InvalidData(format!(
                "store {} has no record ids left after the imported ones",
                source.id
            ))
        })?;

    let store_id = if keep_id {
        conn.execute(
            "INSERT INTO stores (id, title, metadata, next_record_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                source.id,
                source.title.as_str(),
                metadata_to_db(source.metadata.as_ref()),
                next_record_id,
                source.created_at,
                source.updated_at,
            ],
        )?;
        source.id
    } else {
        conn.execute(
            "INSERT INTO stores (title, metadata, next_record_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                source.title.as_str(),
                metadata_to_db(source.metadata.as_ref()),
                next_record_id,
                source.created_at,
                source.updated_at,
            ],
        )?;
        let assigned = conn.last_insert_rowid();
        warn!(
            "event=store_import module=repo status=reassigned source_id={} store_id={}",
            source.id, assigned
        );
        assigned
    };

    for record in &graph.records {
        insert_record(conn, store_id, record)?;
    }
    Ok(store_id)
}

fn insert_record(conn: &Connection, store_id: StoreId, record: &Record) -> RepoResult<()> {
    let header = &record.header;
    conn.execute(
        "INSERT INTO records (
            store_id,
            id,
            title,
            metadata,
            encryption,
            buffer,
            ttl_policy,
            created_at,
            updated_at,
            expires_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
        params![
            store_id,
            header.id,
            header.title.as_str(),
            metadata_to_db(header.metadata.as_ref()),
            header.encryption.as_str(),
            record.buffer.as_slice(),
            header.ttl_policy.as_str(),
            header.created_at,
            header.updated_at,
            header.expires_at,
        ],
    )?;
    Ok(())
}

fn query_one<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: impl Fn(&Row<'_>) -> RepoResult<T>,
) -> RepoResult<Option<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(parse(row)?)),
        None => Ok(None),
    }
}

fn query_all<T, P>(
    conn: &Connection,
    sql: &str,
    params: P,
    parse: impl Fn(&Row<'_>) -> RepoResult<T>,
) -> RepoResult<Vec<T>>
where
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse(row)?);
    }
    Ok(items)
}

fn parse_store_row(row: &Row<'_>) -> RepoResult<Store> {
    let store = Store {
        id: row.get("id")?,
        title: row.get("title")?,
        metadata: parse_metadata(row.get("metadata")?, "stores.metadata")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    };
    store.validate()?;
    Ok(store)
}

fn parse_header_row(row: &Row<'_>) -> RepoResult<RecordHeader> {
    let policy_text: String = row.get("ttl_policy")?;
    let ttl_policy = TtlPolicy::parse(&policy_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid ttl policy `{policy_text}` in records.ttl_policy"
        ))
    })?;

    let size: i64 = row.get("size")?;
    let size = u64::try_from(size)
        .map_err(|_| RepoError::InvalidData(format!("invalid buffer length `{size}`")))?;

    Ok(RecordHeader {
        id: row.get("id")?,
        store_id: row.get("store_id")?,
        title: row.get("title")?,
        metadata: parse_metadata(row.get("metadata")?, "records.metadata")?,
        encryption: row.get("encryption")?,
        size,
        ttl_policy,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        expires_at: row.get("expires_at")?,
    })
}

fn parse_record_row(row: &Row<'_>) -> RepoResult<Record> {
    let record = Record {
        header: parse_header_row(row)?,
        buffer: row.get("buffer")?,
    };
    record.validate()?;
    Ok(record)
}

fn parse_metadata(raw: Option<String>, column: &str) -> RepoResult<Option<Value>> {
    raw.map(|text| {
        serde_json::from_str(&text)
            .map_err(|err| RepoError::InvalidData(format!("invalid JSON in {column}: {err}")))
    })
    .transpose()
}

fn metadata_to_db(metadata: Option<&Value>) -> Option<String> {
    metadata.map(Value::to_string)
}

#[cfg(test)]
mod tests {
    use super::SqliteVaultRepository;
    use crate::db::Database;
    use crate::model::record::NewRecord;
    use crate::model::store::NewStore;
    use crate::repo::{RecordRepository, StoreRepository};

    #[test]
    fn record_ids_are_not_reused_after_delete() {
        let repo = SqliteVaultRepository::new(Database::open_in_memory().unwrap());
        let store = repo.create_store(&NewStore::new("keys")).unwrap();

        let first = repo
            .create_record(store.id, &NewRecord::new("a", b"1".to_vec()))
            .unwrap();
        repo.delete_record(store.id, first.header.id).unwrap();
        let second = repo
            .create_record(store.id, &NewRecord::new("b", b"2".to_vec()))
            .unwrap();

        assert_eq!(first.header.id, 1);
        assert_eq!(second.header.id, 2);
    }

    #[test]
    fn record_ids_are_scoped_per_store() {
        let repo = SqliteVaultRepository::new(Database::open_in_memory().unwrap());
        let left = repo.create_store(&NewStore::new("left")).unwrap();
        let right = repo.create_store(&NewStore::new("right")).unwrap();

        let a = repo
            .create_record(left.id, &NewRecord::new("a", Vec::new()))
            .unwrap();
        let b = repo
            .create_record(right.id, &NewRecord::new("b", Vec::new()))
            .unwrap();

        assert_eq!(a.header.id, b.header.id);
        assert_eq!(repo.get_record(left.id, 1).unwrap().header.title, "a");
        assert_eq!(repo.get_record(right.id, 1).unwrap().header.title, "b");
    }
}
