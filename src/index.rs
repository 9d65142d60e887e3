//! In-memory vector index with on-disk persistence.
//!
//! Holds every [`IndexEntry`] plus per-document metadata behind a single
//! `RwLock`. Mutations take the write lock for the whole batch, so a
//! concurrent [`search`](VectorIndex::search) sees either none or all of a
//! batch. Search is a brute-force cosine scan; the corpora this serves are
//! a handful of documents.
//!
//! Entry ids increase monotonically and are never reused, including across
//! [`persist`](VectorIndex::persist) / [`load`](VectorIndex::load).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::error::IndexError;
use crate::models::{Chunk, Document, IndexEntry, SearchHit};
use crate::store::{IndexStore, Snapshot};

/// Default number of chunks returned by a search.
pub const DEFAULT_TOP_K: usize = 3;

/// A chunk and its embedding, waiting to be assigned an id.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub chunk: Chunk,
    /// Display name of the source document.
    pub source: String,
    pub embedding: Vec<f32>,
}

/// Result of [`VectorIndex::replace_document`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplaceOutcome {
    pub removed: usize,
    pub added: usize,
}

/// In-memory contents captured by [`VectorIndex::checkpoint`].
#[derive(Debug)]
pub struct Checkpoint(Snapshot);

#[derive(Debug, Default)]
struct IndexState {
    documents: BTreeMap<String, Document>,
    entries: Vec<IndexEntry>,
    next_id: i64,
    dims: Option<usize>,
}

impl IndexState {
    fn empty() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        let dims = snapshot.entries.first().map(|e| e.embedding.len());
        Self {
            documents: snapshot
                .documents
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
            entries: snapshot.entries,
            next_id: snapshot.next_id.max(1),
            dims,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            documents: self.documents.values().cloned().collect(),
            entries: self.entries.clone(),
            next_id: self.next_id,
        }
    }

    /// Check a batch against the index dimensionality before anything is
    /// mutated. Returns the dimensionality the batch establishes.
    fn check_dims(&self, entries: &[NewEntry]) -> Result<Option<usize>, IndexError> {
        let mut dims = self.dims;
        for entry in entries {
            let actual = entry.embedding.len();
            if actual == 0 {
                return Err(IndexError::EmptyEmbedding);
            }
            match dims {
                Some(expected) if expected != actual => {
                    return Err(IndexError::DimensionMismatch { expected, actual })
                }
                _ => dims = Some(actual),
            }
        }
        Ok(dims)
    }

    fn insert(&mut self, entries: Vec<NewEntry>, run_id: Uuid) -> Vec<i64> {
        let mut ids = Vec::with_capacity(entries.len());
        for new in entries {
            let id = self.next_id;
            self.next_id += 1;
            self.entries.push(IndexEntry {
                id,
                run_id,
                source: new.source,
                chunk: new.chunk,
                embedding: new.embedding,
            });
            ids.push(id);
        }
        ids
    }

    fn remove(&mut self, document_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.chunk.document_id != document_id);
        self.documents.remove(document_id);
        if self.entries.is_empty() {
            self.dims = None;
        }
        before - self.entries.len()
    }
}

/// The similarity index over all ingested chunks.
#[derive(Debug)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
    store: Option<IndexStore>,
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl VectorIndex {
    /// An empty index with no backing store; `persist` and `load` are no-ops.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexState::empty()),
            store: None,
        }
    }

    /// An empty index that persists to `dir`.
    pub fn with_store(dir: impl Into<PathBuf>) -> Self {
        Self {
            state: RwLock::new(IndexState::empty()),
            store: Some(IndexStore::new(dir)),
        }
    }

    /// Bind to `dir` and load whatever is stored there.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, IndexError> {
        let index = Self::with_store(dir);
        index.load().await?;
        Ok(index)
    }

    pub fn store(&self) -> Option<&IndexStore> {
        self.store.as_ref()
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append entries, assigning fresh ids in order. Fails without
    /// changing anything if any embedding is empty or differs in length
    /// from the rest of the index.
    pub fn add(&self, entries: Vec<NewEntry>) -> Result<Vec<i64>, IndexError> {
        let mut state = self.write();
        let dims = state.check_dims(&entries)?;
        state.dims = dims;
        Ok(state.insert(entries, Uuid::new_v4()))
    }

    /// Remove every entry of `document.id` and insert `entries` in its
    /// place, as one atomic step.
    pub fn replace_document(
        &self,
        document: Document,
        entries: Vec<NewEntry>,
    ) -> Result<ReplaceOutcome, IndexError> {
        let mut state = self.write();

        // Dimensionality is checked against what will remain after removal.
        let remaining_dims = if state
            .entries
            .iter()
            .any(|e| e.chunk.document_id != document.id)
        {
            state.dims
        } else {
            None
        };
        let probe = IndexState {
            dims: remaining_dims,
            ..IndexState::default()
        };
        let dims = probe.check_dims(&entries)?;

        let removed = state.remove(&document.id);
        state.dims = dims.or(state.dims);
        let added = state.insert(entries, Uuid::new_v4()).len();

        debug!(document = %document.id, removed, added, "replaced document");
        state.documents.insert(document.id.clone(), document);

        Ok(ReplaceOutcome { removed, added })
    }

    /// Remove a document and all of its entries. Returns the number of
    /// entries removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        self.write().remove(document_id)
    }

    /// The `k` entries most similar to `query`, best first. Equal scores
    /// keep insertion order (lower id first). A query whose length differs
    /// from the stored embeddings is a `DimensionMismatch`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let state = self.read();
        if let Some(expected) = state.dims {
            if query.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: query.len(),
                });
            }
        }
        if k == 0 || state.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, &IndexEntry)> = state
            .entries
            .iter()
            .map(|e| (cosine_similarity(query, &e.embedding), e))
            .collect();

        // NaN scores sort after every real score.
        scored.sort_by(|(sa, ea), (sb, eb)| {
            let sa = if sa.is_nan() { f32::NEG_INFINITY } else { *sa };
            let sb = if sb.is_nan() { f32::NEG_INFINITY } else { *sb };
            sb.total_cmp(&sa).then(ea.id.cmp(&eb.id))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| SearchHit {
                entry: entry.clone(),
                score,
            })
            .collect())
    }

    /// Copy of the current contents, for [`VectorIndex::restore`].
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint(self.read().snapshot())
    }

    /// Put back the contents captured by [`VectorIndex::checkpoint`].
    pub fn restore(&self, checkpoint: Checkpoint) {
        *self.write() = IndexState::from_snapshot(checkpoint.0);
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Embedding dimensionality, once the first entry is stored.
    pub fn dims(&self) -> Option<usize> {
        self.read().dims
    }

    /// All ingested documents, ordered by id.
    pub fn documents(&self) -> Vec<Document> {
        self.read().documents.values().cloned().collect()
    }

    pub fn document(&self, id: &str) -> Option<Document> {
        self.read().documents.get(id).cloned()
    }

    /// Write the current contents to the backing store.
    pub async fn persist(&self) -> Result<(), IndexError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        // Clone under the lock; the guard must not be held across the await.
        let snapshot = self.read().snapshot();
        store.write(&snapshot).await
    }

    /// Replace the in-memory contents with what the backing store holds.
    /// A missing store loads an empty index. On error the current contents
    /// are left untouched.
    pub async fn load(&self) -> Result<(), IndexError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let state = match store.read().await? {
            Some(snapshot) => IndexState::from_snapshot(snapshot),
            None => IndexState::empty(),
        };
        info!(
            path = %store.path().display(),
            documents = state.documents.len(),
            entries = state.entries.len(),
            "index loaded"
        );
        *self.write() = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::content_hash;
    use crate::models::DocumentKind;
    use chrono::Utc;
    use tempfile::TempDir;

    fn new_entry(doc: &str, index: i64, text: &str, embedding: Vec<f32>) -> NewEntry {
        NewEntry {
            chunk: Chunk {
                document_id: doc.to_string(),
                chunk_index: index,
                text: text.to_string(),
                hash: content_hash(text),
            },
            source: format!("{}.txt", doc),
            embedding,
        }
    }

    fn document(id: &str, chunk_count: usize) -> Document {
        Document {
            id: id.to_string(),
            name: format!("{}.txt", id),
            kind: DocumentKind::Text,
            ingested_at: Utc::now(),
            content_hash: content_hash(id),
            chunk_count,
            chunk_size: 1000,
            chunk_overlap: 200,
            embedding_model: "test-model".to_string(),
        }
    }

    #[test]
    fn empty_index_search_is_empty() {
        let index = VectorIndex::new();
        assert!(index.is_empty());
        assert!(index.search(&[1.0, 0.0], 3).unwrap().is_empty());
    }

    #[test]
    fn add_assigns_increasing_ids() {
        let index = VectorIndex::new();
        let ids = index
            .add(vec![
                new_entry("a", 0, "one", vec![1.0, 0.0]),
                new_entry("a", 1, "two", vec![0.0, 1.0]),
            ])
            .unwrap();
        assert_eq!(ids, vec![1, 2]);
        let more = index.add(vec![new_entry("b", 0, "three", vec![1.0, 1.0])]).unwrap();
        assert_eq!(more, vec![3]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn add_rejects_dimension_mismatch_without_mutation() {
        let index = VectorIndex::new();
        index.add(vec![new_entry("a", 0, "one", vec![1.0, 0.0])]).unwrap();
        let err = index
            .add(vec![
                new_entry("b", 0, "ok", vec![0.0, 1.0]),
                new_entry("b", 1, "bad", vec![1.0, 0.0, 0.0]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn search_orders_by_score_then_id() {
        let index = VectorIndex::new();
        index
            .add(vec![
                new_entry("a", 0, "x", vec![0.0, 1.0]),
                new_entry("a", 1, "y", vec![1.0, 0.0]),
                new_entry("a", 2, "z", vec![1.0, 0.0]),
                new_entry("a", 3, "w", vec![1.0, 1.0]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.entry.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        assert!(hits[0].score >= hits[2].score);
    }

    #[test]
    fn search_returns_at_most_k() {
        let index = VectorIndex::new();
        index.add(vec![new_entry("a", 0, "x", vec![1.0])]).unwrap();
        assert_eq!(index.search(&[1.0], 3).unwrap().len(), 1);
        assert!(index.search(&[1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn query_of_wrong_length_is_rejected() {
        let index = VectorIndex::new();
        index
            .add(vec![new_entry("a", 0, "x", vec![1.0, 0.0, 0.0])])
            .unwrap();

        let err = index.search(&[1.0, 0.0], 3).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 3).unwrap().len(), 1);
    }

    #[test]
    fn nan_scores_rank_last() {
        let index = VectorIndex::new();
        index
            .add(vec![
                new_entry("a", 0, "nan", vec![f32::NAN, 1.0]),
                new_entry("a", 1, "weak", vec![0.0, 1.0]),
                new_entry("a", 2, "strong", vec![1.0, 0.0]),
                new_entry("a", 3, "nan again", vec![1.0, f32::NAN]),
            ])
            .unwrap();

        let hits = index.search(&[1.0, 0.0], 4).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.entry.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["strong", "weak", "nan", "nan again"]);
    }

    #[test]
    fn restore_undoes_later_changes() {
        let index = VectorIndex::new();
        index
            .replace_document(document("a", 1), vec![new_entry("a", 0, "kept", vec![1.0, 0.0])])
            .unwrap();
        let checkpoint = index.checkpoint();

        index
            .replace_document(document("b", 1), vec![new_entry("b", 0, "gone", vec![0.0, 1.0])])
            .unwrap();
        index.remove_document("a");
        assert_eq!(index.len(), 1);

        index.restore(checkpoint);
        assert_eq!(index.len(), 1);
        assert!(index.document("a").is_some());
        assert!(index.document("b").is_none());
        assert_eq!(index.dims(), Some(2));
        let ids = index
            .add(vec![new_entry("c", 0, "next", vec![1.0, 1.0])])
            .unwrap();
        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn replace_document_leaves_no_stale_entries() {
        let index = VectorIndex::new();
        index
            .replace_document(
                document("a", 2),
                vec![
                    new_entry("a", 0, "old zero", vec![1.0, 0.0]),
                    new_entry("a", 1, "old one", vec![1.0, 0.0]),
                ],
            )
            .unwrap();
        index
            .replace_document(document("b", 1), vec![new_entry("b", 0, "b", vec![0.0, 1.0])])
            .unwrap();

        let outcome = index
            .replace_document(
                document("a", 1),
                vec![new_entry("a", 0, "new zero", vec![1.0, 0.0])],
            )
            .unwrap();
        assert_eq!(outcome, ReplaceOutcome { removed: 2, added: 1 });

        let hits = index.search(&[1.0, 0.0], 10).unwrap();
        let texts: Vec<&str> = hits.iter().map(|h| h.entry.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["new zero", "b"]);
        assert_eq!(index.documents().len(), 2);
        // ids are never reused
        assert!(hits.iter().all(|h| h.entry.id != 1 && h.entry.id != 2));
    }

    #[test]
    fn replacing_only_document_may_change_dims() {
        let index = VectorIndex::new();
        index
            .replace_document(document("a", 1), vec![new_entry("a", 0, "x", vec![1.0, 0.0])])
            .unwrap();
        index
            .replace_document(
                document("a", 1),
                vec![new_entry("a", 0, "x", vec![1.0, 0.0, 0.0])],
            )
            .unwrap();
        assert_eq!(index.dims(), Some(3));
    }

    #[test]
    fn remove_document_counts_entries() {
        let index = VectorIndex::new();
        index
            .replace_document(
                document("a", 2),
                vec![
                    new_entry("a", 0, "x", vec![1.0]),
                    new_entry("a", 1, "y", vec![1.0]),
                ],
            )
            .unwrap();
        assert_eq!(index.remove_document("a"), 2);
        assert_eq!(index.remove_document("a"), 0);
        assert!(index.is_empty());
        assert!(index.document("a").is_none());
    }

    #[tokio::test]
    async fn persist_then_open_yields_identical_results() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::with_store(tmp.path());
        index
            .replace_document(
                document("a", 2),
                vec![
                    new_entry("a", 0, "alpha", vec![0.9, 0.1]),
                    new_entry("a", 1, "beta", vec![0.1, 0.9]),
                ],
            )
            .unwrap();
        index.persist().await.unwrap();

        let reopened = VectorIndex::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(
            reopened.search(&[1.0, 0.0], 3).unwrap(),
            index.search(&[1.0, 0.0], 3).unwrap()
        );

        // the id counter survives the round trip
        let ids = reopened
            .add(vec![new_entry("b", 0, "gamma", vec![0.5, 0.5])])
            .unwrap();
        assert_eq!(ids, vec![3]);
    }

    #[tokio::test]
    async fn open_missing_store_is_empty() {
        let tmp = TempDir::new().unwrap();
        let index = VectorIndex::open(tmp.path().join("nothing-here")).await.unwrap();
        assert!(index.is_empty());
    }
}
