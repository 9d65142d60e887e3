//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one source file: type detection → text
//! extraction → chunking → embedding → index replacement. Nothing touches
//! the index until every chunk has been embedded, so a failed ingestion
//! leaves the index exactly as it was.
//!
//! Re-ingesting a path replaces that document's entries. If the extracted
//! text hashes the same as what is already indexed, and it was chunked and
//! embedded with the current settings, the file is reported unchanged and
//! no embedding calls are made.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::{content_hash, Chunker};
use crate::embedding::Embedder;
use crate::error::{IngestError, ProviderError};
use crate::extract::{self, ExtractError};
use crate::index::{NewEntry, VectorIndex};
use crate::models::Document;
use crate::progress::{IngestProgressEvent, IngestProgressReporter, NoProgress};

/// Outcome of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestResult {
    pub document_id: String,
    /// File name, as shown in citations.
    pub name: String,
    pub chunks_added: usize,
    /// Entries removed from a previous ingestion of the same path.
    pub chunks_replaced: usize,
    /// The content hash matched the indexed copy; nothing was done.
    pub unchanged: bool,
}

/// Outcome of ingesting a directory.
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub ingested: Vec<IngestResult>,
    pub failed: Vec<(PathBuf, IngestError)>,
    /// Files with an unsupported extension.
    pub skipped: Vec<PathBuf>,
}

impl IngestSummary {
    /// Whether any file changed the index.
    pub fn changed(&self) -> bool {
        self.ingested.iter().any(|r| !r.unchanged)
    }

    pub fn chunks_added(&self) -> usize {
        self.ingested.iter().map(|r| r.chunks_added).sum()
    }
}

static NO_PROGRESS: NoProgress = NoProgress;

/// Drives documents into a [`VectorIndex`].
pub struct Ingestor<'a> {
    index: &'a VectorIndex,
    embedder: &'a dyn Embedder,
    chunker: Chunker,
    batch_size: usize,
    progress: &'a dyn IngestProgressReporter,
}

impl<'a> Ingestor<'a> {
    pub fn new(index: &'a VectorIndex, embedder: &'a dyn Embedder) -> Self {
        Self {
            index,
            embedder,
            chunker: Chunker::default(),
            batch_size: 64,
            progress: &NO_PROGRESS,
        }
    }

    pub fn with_chunker(mut self, chunker: Chunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Texts per embedding request; at least 1.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn IngestProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Ingest a single `.pdf` or `.txt` file.
    pub async fn ingest(&self, path: &Path) -> Result<IngestResult, IngestError> {
        let Some(kind) = extract::detect_kind(path) else {
            return Err(IngestError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: extract::extension_of(path),
            });
        };

        let load_err = |source: ExtractError| IngestError::Load {
            path: path.to_path_buf(),
            source,
        };

        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| load_err(ExtractError::Read(e)))?;
        let document_id = canonical.to_string_lossy().into_owned();
        let name = canonical
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| document_id.clone());

        let text = extract::load_text(&canonical, kind).await.map_err(load_err)?;
        let hash = content_hash(&text);

        if let Some(existing) = self.index.document(&document_id) {
            if self.is_current(&existing, &hash) {
                debug!(document = %document_id, "content unchanged, skipping");
                return Ok(IngestResult {
                    document_id,
                    name,
                    chunks_added: 0,
                    chunks_replaced: 0,
                    unchanged: true,
                });
            }
        }

        let chunks = self.chunker.chunk_document(&document_id, &text);
        let embed_err = |source: ProviderError| IngestError::Embedding {
            path: path.to_path_buf(),
            source,
        };

        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await.map_err(embed_err)?;
            if vectors.len() != batch.len() {
                return Err(embed_err(ProviderError::invalid(
                    "embedding",
                    format!("expected {} vectors, got {}", batch.len(), vectors.len()),
                )));
            }
            entries.extend(batch.iter().zip(vectors).map(|(chunk, embedding)| NewEntry {
                chunk: chunk.clone(),
                source: name.clone(),
                embedding,
            }));
        }

        let document = Document {
            id: document_id.clone(),
            name: name.clone(),
            kind,
            ingested_at: Utc::now(),
            content_hash: hash,
            chunk_count: entries.len(),
            chunk_size: self.chunker.size(),
            chunk_overlap: self.chunker.overlap(),
            embedding_model: self.embedder.model_name().to_string(),
        };
        let outcome = self.index.replace_document(document, entries)?;

        info!(
            document = %document_id,
            added = outcome.added,
            replaced = outcome.removed,
            "ingested"
        );

        Ok(IngestResult {
            document_id,
            name,
            chunks_added: outcome.added,
            chunks_replaced: outcome.removed,
            unchanged: false,
        })
    }

    /// Whether `existing` already holds `hash` cut and embedded the way this
    /// ingestor would do it now.
    fn is_current(&self, existing: &Document, hash: &str) -> bool {
        let dims_match = match self.index.dims() {
            Some(dims) => self.embedder.dims() == 0 || self.embedder.dims() == dims,
            None => true,
        };
        existing.content_hash == hash
            && existing.chunk_size == self.chunker.size()
            && existing.chunk_overlap == self.chunker.overlap()
            && existing.embedding_model == self.embedder.model_name()
            && dims_match
    }

    /// Ingest every supported file in `dir`, in path order. Per-file
    /// failures are collected and never abort the run.
    pub async fn ingest_all(&self, dir: &Path, recursive: bool) -> IngestSummary {
        let mut summary = IngestSummary::default();

        self.progress.report(IngestProgressEvent::Scanning {
            directory: dir.display().to_string(),
        });

        if !dir.is_dir() {
            let source = match std::fs::metadata(dir) {
                Err(e) => e,
                Ok(_) => std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
            };
            summary.failed.push((
                dir.to_path_buf(),
                IngestError::Load {
                    path: dir.to_path_buf(),
                    source: ExtractError::Read(source),
                },
            ));
            return summary;
        }

        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| dir.to_path_buf());
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
                    summary.failed.push((
                        path.clone(),
                        IngestError::Load {
                            path,
                            source: ExtractError::Read(source),
                        },
                    ));
                }
            }
        }
        files.sort();

        let (supported, skipped): (Vec<PathBuf>, Vec<PathBuf>) = files
            .into_iter()
            .partition(|p| extract::detect_kind(p).is_some());
        summary.skipped = skipped;

        let total = supported.len() as u64;
        for (i, path) in supported.into_iter().enumerate() {
            self.progress.report(IngestProgressEvent::Ingesting {
                file: path.display().to_string(),
                n: i as u64 + 1,
                total,
            });

            let file = path.display().to_string();
            match self.ingest(&path).await {
                Ok(result) => {
                    self.progress.report(IngestProgressEvent::Ingested {
                        file,
                        chunks: result.chunks_added as u64,
                        replaced: result.chunks_replaced as u64,
                        unchanged: result.unchanged,
                    });
                    summary.ingested.push(result);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "ingestion failed");
                    self.progress.report(IngestProgressEvent::Failed {
                        file,
                        error: e.to_string(),
                    });
                    summary.failed.push((path, e));
                }
            }
        }

        self.progress.report(IngestProgressEvent::Finished {
            ingested: summary.ingested.len() as u64,
            failed: summary.failed.len() as u64,
            skipped: summary.skipped.len() as u64,
        });

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Two-dimensional embedding: (length, count of 'a').
    struct ShapeEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for ShapeEmbedder {
        fn model_name(&self) -> &str {
            "shape"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.matches('a').count() as f32 + 1.0])
                .collect())
        }
    }

    fn embedder() -> ShapeEmbedder {
        ShapeEmbedder {
            calls: AtomicUsize::new(0),
        }
    }

    #[tokio::test]
    async fn unsupported_format_does_no_io() {
        let index = VectorIndex::new();
        let emb = embedder();
        let err = Ingestor::new(&index, &emb)
            .ingest(Path::new("/does/not/exist/report.docx"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { ref extension, .. } if extension == "docx"));
        assert_eq!(emb.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn batches_embedding_requests() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("long.txt");
        std::fs::write(&path, "a".repeat(2500)).unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        let result = Ingestor::new(&index, &emb)
            .with_batch_size(2)
            .ingest(&path)
            .await
            .unwrap();

        assert_eq!(result.chunks_added, 3);
        assert_eq!(result.name, "long.txt");
        assert_eq!(emb.calls.load(Ordering::SeqCst), 2);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn unchanged_content_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "banana bread recipe").unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        let ingestor = Ingestor::new(&index, &emb);

        let first = ingestor.ingest(&path).await.unwrap();
        assert!(!first.unchanged);
        let calls = emb.calls.load(Ordering::SeqCst);

        let second = ingestor.ingest(&path).await.unwrap();
        assert!(second.unchanged);
        assert_eq!(second.chunks_added, 0);
        assert_eq!(emb.calls.load(Ordering::SeqCst), calls);
    }

    /// Same text, wider vectors, different model name.
    struct WideEmbedder;

    #[async_trait]
    impl Embedder for WideEmbedder {
        fn model_name(&self) -> &str {
            "wide"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn new_chunk_settings_reembed_same_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("long.txt");
        std::fs::write(&path, "a".repeat(2500)).unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        Ingestor::new(&index, &emb).ingest(&path).await.unwrap();
        assert_eq!(index.len(), 3);

        let result = Ingestor::new(&index, &emb)
            .with_chunker(Chunker::new(500, 0))
            .ingest(&path)
            .await
            .unwrap();
        assert!(!result.unchanged);
        assert_eq!(result.chunks_added, 5);
        assert_eq!(result.chunks_replaced, 3);

        let doc = index.document(&result.document_id).unwrap();
        assert_eq!((doc.chunk_size, doc.chunk_overlap), (500, 0));
    }

    #[tokio::test]
    async fn new_embedding_model_reembeds_same_text() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("notes.txt");
        std::fs::write(&path, "banana bread recipe").unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        Ingestor::new(&index, &emb).ingest(&path).await.unwrap();
        assert_eq!(index.dims(), Some(2));

        let result = Ingestor::new(&index, &WideEmbedder).ingest(&path).await.unwrap();
        assert!(!result.unchanged);
        assert_eq!(index.dims(), Some(3));
        let doc = index.document(&result.document_id).unwrap();
        assert_eq!(doc.embedding_model, "wide");
        assert_eq!(index.search(&[1.0, 1.0, 1.0], 1).unwrap().len(), 1);
    }

    #[derive(Default)]
    struct RecordingProgress {
        events: std::sync::Mutex<Vec<IngestProgressEvent>>,
    }

    impl IngestProgressReporter for RecordingProgress {
        fn report(&self, event: IngestProgressEvent) {
            self.events.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn ingest_all_reports_each_file_outcome() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.txt"), "first").unwrap();
        std::fs::write(tmp.path().join("b.txt"), "  ").unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        let progress = RecordingProgress::default();
        let ingestor = Ingestor::new(&index, &emb).with_progress(&progress);
        ingestor.ingest_all(tmp.path(), false).await;
        ingestor.ingest_all(tmp.path(), false).await;

        let events = progress.events.lock().unwrap();
        let outcomes: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                IngestProgressEvent::Ingested {
                    file, unchanged, ..
                } => Some(format!("{} unchanged={}", file.rsplit('/').next().unwrap(), unchanged)),
                IngestProgressEvent::Failed { file, .. } => {
                    Some(format!("{} failed", file.rsplit('/').next().unwrap()))
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            outcomes,
            vec![
                "a.txt unchanged=false",
                "b.txt failed",
                "a.txt unchanged=true",
                "b.txt failed"
            ]
        );
        assert!(matches!(
            events.last(),
            Some(IngestProgressEvent::Finished {
                ingested: 1,
                failed: 1,
                skipped: 0
            })
        ));
    }

    #[tokio::test]
    async fn ingest_all_collects_outcomes() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.txt"), "second").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "first").unwrap();
        std::fs::write(tmp.path().join("empty.txt"), "   ").unwrap();
        std::fs::write(tmp.path().join("slides.pptx"), "binary").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested").join("c.txt"), "third").unwrap();

        let index = VectorIndex::new();
        let emb = embedder();
        let ingestor = Ingestor::new(&index, &emb);

        let summary = ingestor.ingest_all(tmp.path(), false).await;
        let names: Vec<&str> = summary.ingested.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.changed());

        let recursive = ingestor.ingest_all(tmp.path(), true).await;
        let added: Vec<&str> = recursive
            .ingested
            .iter()
            .filter(|r| !r.unchanged)
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(added, vec!["c.txt"]);
    }

    #[tokio::test]
    async fn missing_directory_is_single_failure() {
        let index = VectorIndex::new();
        let emb = embedder();
        let summary = Ingestor::new(&index, &emb)
            .ingest_all(Path::new("/no/such/dir"), false)
            .await;
        assert!(summary.ingested.is_empty());
        assert_eq!(summary.failed.len(), 1);
    }
}
