//! Persistent vector index store.
//!
//! A [`VectorStore`] is a flat, exact nearest-neighbor index over
//! fixed-dimension vectors, kept strictly parallel to a document list:
//! index position *i* corresponds to `documents[i]`. The central invariant
//! is `vectors.len() == documents.len()` at all times, including under
//! per-item embedding failure.
//!
//! One store instance is scoped to one conversation (one pair of on-disk
//! files); there is no cross-scope sharing of index state. Stores are
//! created empty or loaded from their two companion files; a corrupt or
//! unreadable pair means "start fresh", never a construction error.
//!
//! Add/query are synchronous and perform blocking I/O (embedding calls,
//! disk writes). Invoke them from a worker thread
//! (`tokio::task::spawn_blocking`) when running inside an async context.
//! Mutation takes the instance's write lock; queries share a read lock.
//!
//! # On-disk format
//!
//! - **Index file**: 4-byte magic `CRV1`, `dims: u32 le`, `count: u32 le`,
//!   then `dims × count` little-endian f32 values.
//! - **Docstore file**: the document list as a JSON array.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::embedding::{blob_to_vec, vec_to_blob, Embedder};
use crate::models::Document;

const INDEX_MAGIC: &[u8; 4] = b"CRV1";

#[derive(Default)]
struct StoreInner {
    /// Established vector dimension; `None` until the first add.
    dims: Option<usize>,
    vectors: Vec<Vec<f32>>,
    documents: Vec<Document>,
}

/// Flat exact nearest-neighbor index plus its document list.
pub struct VectorStore {
    index_path: PathBuf,
    docstore_path: PathBuf,
    embedder: Arc<dyn Embedder>,
    inner: RwLock<StoreInner>,
}

impl VectorStore {
    /// Open a store over its two companion files.
    ///
    /// Attempts to load both; any read or decode failure on either file
    /// falls back silently to an empty store — a corrupt on-disk pair is
    /// treated as "start fresh", not fatal.
    pub fn open(
        index_path: impl Into<PathBuf>,
        docstore_path: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let index_path = index_path.into();
        let docstore_path = docstore_path.into();

        let inner = match load_files(&index_path, &docstore_path) {
            Ok(inner) => inner,
            Err(e) => {
                if index_path.exists() || docstore_path.exists() {
                    warn!(
                        index = %index_path.display(),
                        error = %e,
                        "failed to load store files, starting fresh"
                    );
                }
                StoreInner::default()
            }
        };

        Self {
            index_path,
            docstore_path,
            embedder,
            inner: RwLock::new(inner),
        }
    }

    /// Embed and append a batch of documents, then persist both files.
    ///
    /// Per-item failure policy: a document whose embedding call fails is
    /// **skipped and logged** — dropped from both the vector list and the
    /// document list, so the index/docstore length invariant holds while
    /// no degenerate vector enters the ranking. The stored list is
    /// therefore a subsequence of the attempted batch, not necessarily
    /// one-to-one with it.
    ///
    /// Blocking: one embedding call per document plus a disk write. A
    /// persistence failure propagates; the in-memory state keeps the
    /// appended batch so a later add can retry the write.
    pub fn add_documents(&self, docs: Vec<Document>) -> Result<()> {
        let mut inner = self.inner.write().unwrap();

        for (i, doc) in docs.into_iter().enumerate() {
            let vector = match self.embedder.embed(&doc.content) {
                Ok(v) => v,
                Err(e) => {
                    warn!(item = i, error = %e, "embedding failed, skipping document");
                    continue;
                }
            };

            match inner.dims {
                None => inner.dims = Some(vector.len()),
                Some(d) if d != vector.len() => {
                    warn!(
                        item = i,
                        expected = d,
                        got = vector.len(),
                        "embedding dimension mismatch, skipping document"
                    );
                    continue;
                }
                Some(_) => {}
            }

            inner.vectors.push(vector);
            inner.documents.push(doc);
        }

        debug_assert_eq!(inner.vectors.len(), inner.documents.len());
        persist_files(&self.index_path, &self.docstore_path, &inner)
    }

    /// Exact nearest-neighbor search.
    ///
    /// An empty or uninitialized store returns an empty list, not an
    /// error. Otherwise the query text is embedded and up to `k`
    /// documents come back in ascending-distance order; the result length
    /// is `min(k, indexed documents)`.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Document>> {
        let inner = self.inner.read().unwrap();
        if inner.documents.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_vec = self.embedder.embed(text)?;

        let mut scored: Vec<(f32, usize)> = inner
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (squared_l2(&query_vec, v), i))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(_, i)| inner.documents[i].clone())
            .collect())
    }

    /// Number of indexed documents.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Squared L2 distance; mismatched lengths rank last.
fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn load_files(index_path: &Path, docstore_path: &Path) -> Result<StoreInner> {
    if !index_path.exists() || !docstore_path.exists() {
        bail!("store files not present");
    }

    let bytes = std::fs::read(index_path)
        .with_context(|| format!("failed to read index file {}", index_path.display()))?;
    if bytes.len() < 12 || &bytes[0..4] != INDEX_MAGIC {
        bail!("index file has no valid header");
    }
    let dims = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
    let count = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;

    let body = &bytes[12..];
    if body.len() != dims * count * 4 {
        bail!(
            "index file body length {} does not match {} x {} vectors",
            body.len(),
            count,
            dims
        );
    }

    let flat = blob_to_vec(body);
    let vectors: Vec<Vec<f32>> = if dims == 0 {
        Vec::new()
    } else {
        flat.chunks_exact(dims).map(|c| c.to_vec()).collect()
    };

    let docs_raw = std::fs::read_to_string(docstore_path)
        .with_context(|| format!("failed to read docstore file {}", docstore_path.display()))?;
    let documents: Vec<Document> =
        serde_json::from_str(&docs_raw).context("failed to decode docstore file")?;

    if documents.len() != vectors.len() {
        bail!(
            "docstore has {} documents but index has {} vectors",
            documents.len(),
            vectors.len()
        );
    }

    Ok(StoreInner {
        dims: if count == 0 && dims == 0 { None } else { Some(dims) },
        vectors,
        documents,
    })
}

fn persist_files(index_path: &Path, docstore_path: &Path, inner: &StoreInner) -> Result<()> {
    for path in [index_path, docstore_path] {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
            }
        }
    }

    let dims = inner.dims.unwrap_or(0);
    let mut bytes = Vec::with_capacity(12 + inner.vectors.len() * dims * 4);
    bytes.extend_from_slice(INDEX_MAGIC);
    bytes.extend_from_slice(&(dims as u32).to_le_bytes());
    bytes.extend_from_slice(&(inner.vectors.len() as u32).to_le_bytes());
    for v in &inner.vectors {
        bytes.extend_from_slice(&vec_to_blob(v));
    }
    std::fs::write(index_path, bytes)
        .with_context(|| format!("failed to write index file {}", index_path.display()))?;

    let docs_json = serde_json::to_string(&inner.documents).context("failed to encode docstore")?;
    std::fs::write(docstore_path, docs_json)
        .with_context(|| format!("failed to write docstore file {}", docstore_path.display()))?;

    Ok(())
}

/// Per-scope store registry.
///
/// Maps a conversation scope id to its [`VectorStore`], deriving the
/// companion file names from the scope id. Stores are created lazily and
/// shared via `Arc` so the composer and the ingestion side hit the same
/// instance (and therefore the same locks).
pub struct StoreRegistry {
    data_dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    stores: Mutex<HashMap<String, Arc<VectorStore>>>,
}

impl StoreRegistry {
    pub fn new(data_dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            data_dir: data_dir.into(),
            embedder,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Store for a scope, opening (or starting empty) on first use.
    pub fn get_or_create(&self, scope_id: &str) -> Arc<VectorStore> {
        let mut stores = self.stores.lock().unwrap();
        if let Some(store) = stores.get(scope_id) {
            return Arc::clone(store);
        }

        let stem = scope_id.replace(['.', '/'], "_");
        let index_path = self.data_dir.join(format!("{stem}.index"));
        let docstore_path = self.data_dir.join(format!("{stem}.docs.json"));
        let store = Arc::new(VectorStore::open(
            index_path,
            docstore_path,
            Arc::clone(&self.embedder),
        ));
        stores.insert(scope_id.to_string(), Arc::clone(&store));
        store
    }

    /// Store for a scope if one was already opened this run.
    pub fn get(&self, scope_id: &str) -> Option<Arc<VectorStore>> {
        self.stores.lock().unwrap().get(scope_id).cloned()
    }
}
