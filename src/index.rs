//! Brute-force cosine similarity index with copy-on-write snapshots.
//!
//! Stores `(chunk id, vector, metadata)` triples and answers exact
//! k-nearest-neighbor queries. Vectors are unit-normalized at insert and
//! query time, so cosine similarity reduces to a dot product and scores
//! lie in `[-1, 1]`.
//!
//! # Scale policy
//!
//! The scan is exact and linear. For a single research session's corpus
//! (up to a few thousand chunks) this is faster and simpler than an
//! approximate index; an ANN structure remains an upgrade path behind the
//! same surface.
//!
//! # Concurrency
//!
//! The entry table lives behind `RwLock<Arc<Entries>>`. A search clones
//! the `Arc` and scans lock-free, so readers never block readers and an
//! in-flight search keeps a consistent snapshot while ingestion appends.
//! Mutations clone-and-swap via `Arc::make_mut` under the write lock.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::embedding::{blob_to_vec, normalize_in_place, vec_to_blob};
use crate::error::CoreError;

/// Bumped when the snapshot layout changes incompatibly.
const SNAPSHOT_VERSION: u32 = 1;

/// Metadata snapshot stored alongside each vector.
///
/// Documents are referenced by id only; the index does not own document
/// lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub document_id: String,
    pub start: usize,
    pub end: usize,
    pub page: Option<u32>,
    pub text: String,
}

/// An indexed `(chunk id, vector, metadata)` triple.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk_id: String,
    /// Unit-normalized at insert time.
    pub vector: Vec<f32>,
    pub meta: ChunkMeta,
}

/// One scored result from [`VectorIndex::search`].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub score: f32,
    pub meta: ChunkMeta,
}

#[derive(Debug, Default, Clone)]
struct Entries {
    ordered: Vec<IndexEntry>,
    by_id: HashMap<String, usize>,
}

impl Entries {
    fn rebuild_map(&mut self) {
        self.by_id = self
            .ordered
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk_id.clone(), i))
            .collect();
    }
}

/// Exact nearest-neighbor index over chunk embeddings.
#[derive(Debug)]
pub struct VectorIndex {
    dims: usize,
    inner: RwLock<Arc<Entries>>,
}

impl VectorIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            inner: RwLock::new(Arc::new(Entries::default())),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a vector under a chunk id.
    ///
    /// # Errors
    ///
    /// - [`CoreError::DuplicateId`] if the id is already present —
    ///   re-insertion requires an explicit [`remove`](Self::remove) first.
    /// - [`CoreError::DimensionMismatch`] if the vector length differs
    ///   from the index dimensionality.
    pub fn insert(
        &self,
        chunk_id: &str,
        mut vector: Vec<f32>,
        meta: ChunkMeta,
    ) -> Result<(), CoreError> {
        if vector.len() != self.dims {
            return Err(CoreError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }
        normalize_in_place(&mut vector);

        let mut guard = self.inner.write().unwrap();
        if guard.by_id.contains_key(chunk_id) {
            return Err(CoreError::DuplicateId(chunk_id.to_string()));
        }
        let inner = Arc::make_mut(&mut *guard);
        inner.by_id.insert(chunk_id.to_string(), inner.ordered.len());
        inner.ordered.push(IndexEntry {
            chunk_id: chunk_id.to_string(),
            vector,
            meta,
        });
        Ok(())
    }

    /// Remove an entry by chunk id.
    ///
    /// # Errors
    ///
    /// [`CoreError::NotFound`] if the id is absent.
    pub fn remove(&self, chunk_id: &str) -> Result<(), CoreError> {
        let mut guard = self.inner.write().unwrap();
        let idx = match guard.by_id.get(chunk_id) {
            Some(&i) => i,
            None => return Err(CoreError::NotFound(chunk_id.to_string())),
        };
        let inner = Arc::make_mut(&mut *guard);
        inner.ordered.remove(idx);
        inner.rebuild_map();
        Ok(())
    }

    /// Remove every entry belonging to a document. Returns the count removed.
    pub fn remove_document(&self, document_id: &str) -> usize {
        let mut guard = self.inner.write().unwrap();
        let before = guard.ordered.len();
        let inner = Arc::make_mut(&mut *guard);
        inner.ordered.retain(|e| e.meta.document_id != document_id);
        inner.rebuild_map();
        before - inner.ordered.len()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap();
        *guard = Arc::new(Entries::default());
    }

    /// Fetch a single entry by chunk id.
    pub fn get(&self, chunk_id: &str) -> Option<IndexEntry> {
        let snapshot = Arc::clone(&self.inner.read().unwrap());
        snapshot
            .by_id
            .get(chunk_id)
            .map(|&i| snapshot.ordered[i].clone())
    }

    /// All entries in insertion order (a consistent snapshot).
    pub fn entries(&self) -> Vec<IndexEntry> {
        let snapshot = Arc::clone(&self.inner.read().unwrap());
        snapshot.ordered.clone()
    }

    /// Exact k-nearest-neighbor search by cosine similarity.
    ///
    /// Results are ordered by descending score; ties resolve to insertion
    /// order, so repeated searches over identical state return identical
    /// rankings. `filter` restricts candidates to a document-id subset
    /// without touching the stored entries.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&HashSet<String>>,
    ) -> Result<Vec<SearchHit>, CoreError> {
        if query.len() != self.dims {
            return Err(CoreError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }
        let mut q = query.to_vec();
        normalize_in_place(&mut q);

        let snapshot = Arc::clone(&self.inner.read().unwrap());

        let mut scored: Vec<(usize, f32)> = snapshot
            .ordered
            .iter()
            .enumerate()
            .filter(|(_, e)| match filter {
                Some(docs) => docs.contains(&e.meta.document_id),
                None => true,
            })
            .map(|(i, e)| {
                let dot: f32 = q.iter().zip(e.vector.iter()).map(|(x, y)| x * y).sum();
                (i, dot)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &snapshot.ordered[i];
                SearchHit {
                    chunk_id: entry.chunk_id.clone(),
                    score,
                    meta: entry.meta.clone(),
                }
            })
            .collect())
    }

    /// Serialize the index to a snapshot file.
    ///
    /// The format is a JSON envelope with vectors encoded as base64
    /// little-endian `f32` blobs — lossless and reloadable via
    /// [`load_snapshot`](Self::load_snapshot).
    pub fn save_snapshot(&self, path: &Path) -> Result<(), CoreError> {
        let snapshot = Arc::clone(&self.inner.read().unwrap());
        let file = SnapshotFile {
            version: SNAPSHOT_VERSION,
            dims: self.dims,
            entries: snapshot
                .ordered
                .iter()
                .map(|e| SnapshotEntry {
                    chunk_id: e.chunk_id.clone(),
                    meta: e.meta.clone(),
                    vector: BASE64.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        };
        let out = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(out);
        serde_json::to_writer(&mut writer, &file)
            .map_err(|e| CoreError::CorruptSnapshot(format!("write failed: {}", e)))?;
        std::io::Write::flush(&mut writer)?;
        tracing::debug!(path = %path.display(), entries = file.entries.len(), "index snapshot saved");
        Ok(())
    }

    /// Reconstruct an index from a snapshot file.
    ///
    /// Fails fast with [`CoreError::CorruptSnapshot`] on any
    /// inconsistency — version mismatch, undecodable vectors, dimension
    /// mismatch, or duplicate ids — rather than serving partial state.
    pub fn load_snapshot(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let file: SnapshotFile = serde_json::from_str(&content)
            .map_err(|e| CoreError::CorruptSnapshot(e.to_string()))?;

        if file.version != SNAPSHOT_VERSION {
            return Err(CoreError::CorruptSnapshot(format!(
                "unsupported snapshot version {}",
                file.version
            )));
        }
        if file.dims == 0 {
            return Err(CoreError::CorruptSnapshot("dims must be > 0".to_string()));
        }

        let mut entries = Entries::default();
        for entry in file.entries {
            let blob = BASE64
                .decode(&entry.vector)
                .map_err(|e| CoreError::CorruptSnapshot(format!("vector for {}: {}", entry.chunk_id, e)))?;
            if blob.len() != file.dims * 4 {
                return Err(CoreError::CorruptSnapshot(format!(
                    "vector for {} has {} bytes, expected {}",
                    entry.chunk_id,
                    blob.len(),
                    file.dims * 4
                )));
            }
            if entries.by_id.contains_key(&entry.chunk_id) {
                return Err(CoreError::CorruptSnapshot(format!(
                    "duplicate chunk id {}",
                    entry.chunk_id
                )));
            }
            entries
                .by_id
                .insert(entry.chunk_id.clone(), entries.ordered.len());
            entries.ordered.push(IndexEntry {
                chunk_id: entry.chunk_id,
                vector: blob_to_vec(&blob),
                meta: entry.meta,
            });
        }

        tracing::debug!(path = %path.display(), entries = entries.ordered.len(), "index snapshot loaded");
        Ok(Self {
            dims: file.dims,
            inner: RwLock::new(Arc::new(entries)),
        })
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    dims: usize,
    entries: Vec<SnapshotEntry>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry {
    chunk_id: String,
    #[serde(flatten)]
    meta: ChunkMeta,
    vector: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(doc: &str) -> ChunkMeta {
        ChunkMeta {
            document_id: doc.to_string(),
            start: 0,
            end: 10,
            page: None,
            text: "text".to_string(),
        }
    }

    fn basis(dims: usize, axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn insert_then_duplicate_fails() {
        let index = VectorIndex::new(4);
        index.insert("c1", basis(4, 0), meta("d1")).unwrap();
        let err = index.insert("c1", basis(4, 1), meta("d1")).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateId(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn reinsert_after_remove_is_allowed() {
        let index = VectorIndex::new(4);
        index.insert("c1", basis(4, 0), meta("d1")).unwrap();
        index.remove("c1").unwrap();
        index.insert("c1", basis(4, 1), meta("d1")).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn remove_absent_is_not_found() {
        let index = VectorIndex::new(4);
        let err = index.remove("ghost").unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let index = VectorIndex::new(4);
        let err = index.insert("c1", vec![1.0; 3], meta("d1")).unwrap_err();
        assert!(matches!(
            err,
            CoreError::DimensionMismatch { expected: 4, got: 3 }
        ));
        let err = index.search(&[1.0; 5], 1, None).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
    }

    #[test]
    fn search_returns_all_ids_ranked() {
        let dims = 8;
        let index = VectorIndex::new(dims);
        // c0 aligned with the query, c1 partially, c2 orthogonal.
        index.insert("c0", basis(dims, 0), meta("d")).unwrap();
        let mut mixed = basis(dims, 0);
        mixed[1] = 1.0;
        index.insert("c1", mixed, meta("d")).unwrap();
        index.insert("c2", basis(dims, 2), meta("d")).unwrap();

        let hits = index.search(&basis(dims, 0), 3, None).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c0", "c1", "c2"]);
        assert!(hits[0].score > hits[1].score);
        assert!(hits[1].score > hits[2].score);
        for h in &hits {
            assert!(h.score >= -1.0 && h.score <= 1.0);
        }
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let dims = 4;
        let index = VectorIndex::new(dims);
        index.insert("later-alpha", basis(dims, 0), meta("d")).unwrap();
        index.insert("aardvark", basis(dims, 0), meta("d")).unwrap();

        let hits = index.search(&basis(dims, 0), 2, None).unwrap();
        assert_eq!(hits[0].chunk_id, "later-alpha");
        assert_eq!(hits[1].chunk_id, "aardvark");
    }

    #[test]
    fn repeated_search_is_deterministic() {
        let dims = 16;
        let index = VectorIndex::new(dims);
        for i in 0..10 {
            let mut v = vec![0.1; dims];
            v[i] = 1.0;
            index.insert(&format!("c{}", i), v, meta("d")).unwrap();
        }
        let query = vec![0.3; dims];
        let first = index.search(&query, 10, None).unwrap();
        for _ in 0..5 {
            let again = index.search(&query, 10, None).unwrap();
            let a: Vec<_> = first.iter().map(|h| (&h.chunk_id, h.score)).collect();
            let b: Vec<_> = again.iter().map(|h| (&h.chunk_id, h.score)).collect();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn filter_restricts_documents() {
        let dims = 4;
        let index = VectorIndex::new(dims);
        index.insert("a0", basis(dims, 0), meta("doc-a")).unwrap();
        index.insert("b0", basis(dims, 0), meta("doc-b")).unwrap();

        let only_b: HashSet<String> = ["doc-b".to_string()].into_iter().collect();
        let hits = index.search(&basis(dims, 0), 10, Some(&only_b)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "b0");
    }

    #[test]
    fn remove_document_clears_its_entries() {
        let dims = 4;
        let index = VectorIndex::new(dims);
        index.insert("a0", basis(dims, 0), meta("doc-a")).unwrap();
        index.insert("a1", basis(dims, 1), meta("doc-a")).unwrap();
        index.insert("b0", basis(dims, 2), meta("doc-b")).unwrap();

        assert_eq!(index.remove_document("doc-a"), 2);
        assert_eq!(index.len(), 1);
        let hits = index.search(&basis(dims, 0), 10, None).unwrap();
        assert_eq!(hits[0].chunk_id, "b0");
    }

    #[test]
    fn snapshot_roundtrip_preserves_search_results() {
        let dims = 8;
        let index = VectorIndex::new(dims);
        for i in 0..5 {
            let mut v = vec![0.05 * i as f32; dims];
            v[i] = 1.0;
            let mut m = meta("doc");
            m.start = i * 10;
            m.end = i * 10 + 10;
            m.page = Some(i as u32 + 1);
            index.insert(&format!("c{}", i), v, m).unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        index.save_snapshot(&path).unwrap();

        let restored = VectorIndex::load_snapshot(&path).unwrap();
        assert_eq!(restored.len(), index.len());
        assert_eq!(restored.dims(), dims);

        let query = vec![0.2; dims];
        let before = index.search(&query, 5, None).unwrap();
        let after = restored.search(&query, 5, None).unwrap();
        let a: Vec<_> = before.iter().map(|h| (&h.chunk_id, h.score)).collect();
        let b: Vec<_> = after.iter().map(|h| (&h.chunk_id, h.score)).collect();
        assert_eq!(a, b);
        assert_eq!(after[0].meta.page, before[0].meta.page);
    }

    #[test]
    fn corrupt_snapshot_fails_at_load() {
        let dir = tempfile::tempdir().unwrap();

        let truncated = dir.path().join("truncated.json");
        std::fs::write(&truncated, "{\"version\":1,\"dims\":4,\"entr").unwrap();
        assert!(matches!(
            VectorIndex::load_snapshot(&truncated).unwrap_err(),
            CoreError::CorruptSnapshot(_)
        ));

        let bad_version = dir.path().join("version.json");
        std::fs::write(&bad_version, "{\"version\":99,\"dims\":4,\"entries\":[]}").unwrap();
        assert!(matches!(
            VectorIndex::load_snapshot(&bad_version).unwrap_err(),
            CoreError::CorruptSnapshot(_)
        ));

        // Vector byte count disagrees with dims.
        let index = VectorIndex::new(4);
        index.insert("c0", vec![1.0, 0.0, 0.0, 0.0], meta("d")).unwrap();
        let good = dir.path().join("good.json");
        index.save_snapshot(&good).unwrap();
        let mangled = std::fs::read_to_string(&good)
            .unwrap()
            .replace("\"dims\":4", "\"dims\":8");
        let bad_dims = dir.path().join("dims.json");
        std::fs::write(&bad_dims, mangled).unwrap();
        assert!(matches!(
            VectorIndex::load_snapshot(&bad_dims).unwrap_err(),
            CoreError::CorruptSnapshot(_)
        ));
    }
}
