//! On-disk index store.
//!
//! The vector index persists to a single SQLite database,
//! `<index.dir>/index.sqlite`, with three tables:
//!
//! | Table | Contents |
//! |-------|----------|
//! | `documents` | one row per ingested source file |
//! | `entries` | chunk text, hash, run id and embedding BLOB (little-endian f32) |
//! | `meta` | `schema_version` and the `next_id` entry-id counter |
//!
//! [`IndexStore::write`] replaces the whole snapshot inside one transaction,
//! so a crash mid-write leaves the previous snapshot intact.
//! [`IndexStore::read`] validates everything it loads and reports any
//! inconsistency as [`IndexError::Corruption`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::chunk::content_hash;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::IndexError;
use crate::models::{Chunk, Document, DocumentKind, IndexEntry};

/// File name of the database inside the index directory.
pub const STORE_FILE: &str = "index.sqlite";

const SCHEMA_VERSION: &str = "2";

/// Everything the index holds, in a form that can be written and read back.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
    /// Ordered by id.
    pub entries: Vec<IndexEntry>,
    /// Next entry id to hand out; greater than every stored id.
    pub next_id: i64,
}

/// Handle to the database file inside an index directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of the database file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    pub fn exists(&self) -> bool {
        self.path().is_file()
    }

    async fn connect(&self, create: bool) -> Result<SqlitePool, IndexError> {
        let path = self.path();

        if create {
            std::fs::create_dir_all(&self.dir).map_err(|source| IndexError::Io {
                path: self.dir.clone(),
                source,
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(create)
            .journal_mode(SqliteJournalMode::Wal);

        SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| classify(&path, e))
    }

    async fn migrate(&self, pool: &SqlitePool) -> Result<(), IndexError> {
        let path = self.path();
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                ingested_at INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                chunk_size INTEGER NOT NULL,
                chunk_overlap INTEGER NOT NULL,
                embedding_model TEXT NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                run_id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                source TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                hash TEXT NOT NULL,
                dims INTEGER NOT NULL,
                embedding BLOB NOT NULL,
                UNIQUE(document_id, chunk_index),
                FOREIGN KEY (document_id) REFERENCES documents(id)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_entries_document_id ON entries(document_id)",
        ];

        for sql in statements {
            sqlx::query(sql)
                .execute(pool)
                .await
                .map_err(|e| classify(&path, e))?;
        }
        Ok(())
    }

    /// Replace the stored snapshot with `snapshot`, atomically.
    pub async fn write(&self, snapshot: &Snapshot) -> Result<(), IndexError> {
        let path = self.path();
        let pool = self.connect(true).await?;
        self.migrate(&pool).await?;

        let result = write_snapshot(&pool, snapshot).await;
        pool.close().await;
        result.map_err(|e| classify(&path, e))?;

        debug!(
            path = %path.display(),
            documents = snapshot.documents.len(),
            entries = snapshot.entries.len(),
            "index persisted"
        );
        Ok(())
    }

    /// Read and validate the stored snapshot. A missing database file
    /// yields `Ok(None)`.
    pub async fn read(&self) -> Result<Option<Snapshot>, IndexError> {
        if !self.exists() {
            return Ok(None);
        }
        let path = self.path();
        let pool = self.connect(false).await?;
        let result = read_snapshot(&pool, &path).await;
        pool.close().await;
        result.map(Some)
    }
}

async fn write_snapshot(pool: &SqlitePool, snapshot: &Snapshot) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM entries").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;
    sqlx::query("DELETE FROM meta").execute(&mut *tx).await?;

    for doc in &snapshot.documents {
        sqlx::query(
            r#"
            INSERT INTO documents (
                id, name, kind, ingested_at, content_hash, chunk_count,
                chunk_size, chunk_overlap, embedding_model
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.name)
        .bind(doc.kind.as_str())
        .bind(doc.ingested_at.timestamp_millis())
        .bind(&doc.content_hash)
        .bind(doc.chunk_count as i64)
        .bind(doc.chunk_size as i64)
        .bind(doc.chunk_overlap as i64)
        .bind(&doc.embedding_model)
        .execute(&mut *tx)
        .await?;
    }

    for entry in &snapshot.entries {
        sqlx::query(
            r#"
            INSERT INTO entries (id, run_id, document_id, source, chunk_index, text, hash, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id)
        .bind(entry.run_id.to_string())
        .bind(&entry.chunk.document_id)
        .bind(&entry.source)
        .bind(entry.chunk.chunk_index)
        .bind(&entry.chunk.text)
        .bind(&entry.chunk.hash)
        .bind(entry.embedding.len() as i64)
        .bind(vec_to_blob(&entry.embedding))
        .execute(&mut *tx)
        .await?;
    }

    for (key, value) in [
        ("schema_version", SCHEMA_VERSION.to_string()),
        ("next_id", snapshot.next_id.to_string()),
    ] {
        sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

async fn read_snapshot(pool: &SqlitePool, path: &Path) -> Result<Snapshot, IndexError> {
    let corrupt = |reason: String| IndexError::Corruption {
        path: path.to_path_buf(),
        reason,
    };

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
            .fetch_all(pool)
            .await
            .map_err(|e| classify(path, e))?;
    for required in ["documents", "entries", "meta"] {
        if !tables.iter().any(|t| t == required) {
            return Err(corrupt(format!("missing table '{}'", required)));
        }
    }

    // meta
    let meta_rows = sqlx::query("SELECT key, value FROM meta")
        .fetch_all(pool)
        .await
        .map_err(|e| classify(path, e))?;
    let mut meta = BTreeMap::new();
    for row in meta_rows {
        let key: String = row.try_get("key").map_err(|e| classify(path, e))?;
        let value: String = row.try_get("value").map_err(|e| classify(path, e))?;
        meta.insert(key, value);
    }
    match meta.get("schema_version").map(String::as_str) {
        Some(SCHEMA_VERSION) => {}
        Some(other) => return Err(corrupt(format!("unsupported schema version '{}'", other))),
        None => return Err(corrupt("missing schema_version".to_string())),
    }
    let next_id: i64 = meta
        .get("next_id")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| corrupt("missing or invalid next_id".to_string()))?;

    // documents
    let doc_rows = sqlx::query(
        r#"
        SELECT id, name, kind, ingested_at, content_hash, chunk_count,
               chunk_size, chunk_overlap, embedding_model
        FROM documents ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify(path, e))?;

    let mut documents = Vec::with_capacity(doc_rows.len());
    for row in doc_rows {
        let id: String = row.try_get("id").map_err(|e| classify(path, e))?;
        let kind: String = row.try_get("kind").map_err(|e| classify(path, e))?;
        let kind = DocumentKind::parse(&kind)
            .ok_or_else(|| corrupt(format!("document '{}' has unknown kind '{}'", id, kind)))?;
        let millis: i64 = row.try_get("ingested_at").map_err(|e| classify(path, e))?;
        let ingested_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| corrupt(format!("document '{}' has invalid timestamp", id)))?;
        let count = |column: &str| -> Result<usize, IndexError> {
            let value: i64 = row.try_get(column).map_err(|e| classify(path, e))?;
            usize::try_from(value)
                .map_err(|_| corrupt(format!("document '{}' has negative {}", id, column)))
        };
        let chunk_count = count("chunk_count")?;
        let chunk_size = count("chunk_size")?;
        let chunk_overlap = count("chunk_overlap")?;

        documents.push(Document {
            name: row.try_get("name").map_err(|e| classify(path, e))?,
            content_hash: row.try_get("content_hash").map_err(|e| classify(path, e))?,
            embedding_model: row.try_get("embedding_model").map_err(|e| classify(path, e))?,
            chunk_count,
            chunk_size,
            chunk_overlap,
            id,
            kind,
            ingested_at,
        });
    }

    // entries
    let entry_rows = sqlx::query(
        r#"
        SELECT id, run_id, document_id, source, chunk_index, text, hash, dims, embedding
        FROM entries ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(|e| classify(path, e))?;

    let mut entries = Vec::with_capacity(entry_rows.len());
    let mut dims: Option<usize> = None;
    let mut seen = HashSet::new();
    let mut per_document: BTreeMap<String, usize> = BTreeMap::new();

    for row in entry_rows {
        let id: i64 = row.try_get("id").map_err(|e| classify(path, e))?;
        let run_id: String = row.try_get("run_id").map_err(|e| classify(path, e))?;
        let run_id = Uuid::parse_str(&run_id)
            .map_err(|_| corrupt(format!("entry {} has invalid run id", id)))?;
        let document_id: String = row.try_get("document_id").map_err(|e| classify(path, e))?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(|e| classify(path, e))?;
        let text: String = row.try_get("text").map_err(|e| classify(path, e))?;
        let hash: String = row.try_get("hash").map_err(|e| classify(path, e))?;
        let entry_dims: i64 = row.try_get("dims").map_err(|e| classify(path, e))?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(|e| classify(path, e))?;

        let expected_len = usize::try_from(entry_dims)
            .ok()
            .and_then(|d| d.checked_mul(4));
        if blob.is_empty() || blob.len() % 4 != 0 || expected_len != Some(blob.len()) {
            return Err(corrupt(format!(
                "entry {} embedding is {} bytes, expected {} dims",
                id,
                blob.len(),
                entry_dims
            )));
        }
        let entry_dims = entry_dims as usize;
        match dims {
            None => dims = Some(entry_dims),
            Some(d) if d != entry_dims => {
                return Err(corrupt(format!(
                    "mixed dimensionality: entry {} has {} dims, index has {}",
                    id, entry_dims, d
                )))
            }
            Some(_) => {}
        }
        if content_hash(&text) != hash {
            return Err(corrupt(format!("entry {} text does not match its hash", id)));
        }
        if id >= next_id {
            return Err(corrupt(format!("entry id {} is not below next_id {}", id, next_id)));
        }
        if !seen.insert((document_id.clone(), chunk_index)) {
            return Err(corrupt(format!(
                "duplicate chunk {} for document '{}'",
                chunk_index, document_id
            )));
        }
        *per_document.entry(document_id.clone()).or_default() += 1;

        entries.push(IndexEntry {
            id,
            run_id,
            source: row.try_get("source").map_err(|e| classify(path, e))?,
            chunk: Chunk {
                document_id,
                chunk_index,
                text,
                hash,
            },
            embedding: blob_to_vec(&blob),
        });
    }

    for doc in &documents {
        let stored = per_document.remove(&doc.id).unwrap_or(0);
        if stored != doc.chunk_count {
            return Err(corrupt(format!(
                "document '{}' records {} chunks but {} are stored",
                doc.id, doc.chunk_count, stored
            )));
        }
    }
    if let Some(orphan) = per_document.keys().next() {
        return Err(corrupt(format!(
            "entries reference unknown document '{}'",
            orphan
        )));
    }

    Ok(Snapshot {
        documents,
        entries,
        next_id,
    })
}

/// Unreadable-database and decode errors mean corruption; anything else
/// is an ordinary storage failure.
fn classify(path: &Path, err: sqlx::Error) -> IndexError {
    let corrupt = match &err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|c| c.parse::<i32>().ok())
            // SQLITE_CORRUPT = 11, SQLITE_NOTADB = 26
            .map(|code| matches!(code & 0xff, 11 | 26))
            .unwrap_or(false),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => true,
        _ => false,
    };

    if corrupt {
        IndexError::Corruption {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    } else {
        IndexError::Storage {
            path: path.to_path_buf(),
            source: err,
        }
    }
}
