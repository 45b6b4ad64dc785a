use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::IndexError;

/// A record that can live in a [`VectorStore`].
pub trait Indexed: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Key: Ord + Clone + Send + Sync + std::fmt::Debug + 'static;

    fn key(&self) -> Self::Key;
    fn content_hash(&self) -> &str;
    fn embedding(&self) -> Option<&[f32]>;
    fn set_embedding(&mut self, embedding: Vec<f32>);
    /// Text sent to the embedder for this record.
    fn embed_text(&self) -> String;
    /// Path or document id; used for prefix filters and tie-breaks.
    fn scope(&self) -> &str;
    /// Start line or chunk id; secondary tie-break.
    fn position(&self) -> usize;
}

/// Immutable view of the store. Queries hold one of these for their whole
/// duration, so a concurrent upsert can never be observed half-applied.
pub struct Snapshot<T: Indexed> {
    pub generation: u64,
    entries: BTreeMap<T::Key, Arc<T>>,
}

impl<T: Indexed> Snapshot<T> {
    fn empty() -> Self {
        Self {
            generation: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.entries.get(key).map(|e| e.as_ref())
    }

    pub fn keys(&self) -> impl Iterator<Item = &T::Key> {
        self.entries.keys()
    }

    /// Cosine-similarity search, best first.
    ///
    /// Equal scores are ordered by shorter scope, then lower position, then
    /// scope text, so results are reproducible across runs.
    pub fn search(&self, query: &[f32], limit: usize, scope_prefix: Option<&str>) -> Vec<(T, f32)> {
        if limit == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f32, &T)> = self
            .entries
            .values()
            .filter(|e| scope_prefix.map_or(true, |p| e.scope().starts_with(p)))
            .filter_map(|e| e.embedding().map(|emb| (cosine_similarity(query, emb), e.as_ref())))
            // A corrupt vector scores NaN; it must not outrank real hits.
            .filter(|(score, _)| score.is_finite())
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then_with(|| a.1.scope().len().cmp(&b.1.scope().len()))
                .then_with(|| a.1.position().cmp(&b.1.position()))
                .then_with(|| a.1.scope().cmp(b.1.scope()))
        });
        scored.truncate(limit);

        scored
            .into_iter()
            .map(|(score, e)| (e.clone(), score))
            .collect()
    }
}

/// In-memory vector store with disk persistence and copy-on-write snapshots.
pub struct VectorStore<T: Indexed> {
    current: RwLock<Arc<Snapshot<T>>>,
    // Serialises writers; readers only touch `current`.
    writer: Mutex<()>,
    persist_path: PathBuf,
    closed: AtomicBool,
}

impl<T: Indexed> VectorStore<T> {
    pub fn open_or_create(persist_path: &Path) -> Result<Self, IndexError> {
        if let Some(parent) = persist_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut snapshot = Snapshot::empty();
        if persist_path.exists() {
            let data = std::fs::read_to_string(persist_path)?;
            let records: Vec<T> = serde_json::from_str(&data)?;
            for record in records {
                snapshot.entries.insert(record.key(), Arc::new(record));
            }
            tracing::info!(
                "Loaded {} vectors from {}",
                snapshot.entries.len(),
                persist_path.display()
            );
        }

        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
            persist_path: persist_path.to_path_buf(),
            closed: AtomicBool::new(false),
        })
    }

    /// Current snapshot; cheap to take, never blocks on a writer for long.
    pub fn snapshot(&self) -> Result<Arc<Snapshot<T>>, IndexError> {
        if self.is_closed() {
            return Err(IndexError::Unavailable(format!(
                "store {} is closed",
                self.persist_path.display()
            )));
        }
        Ok(self.current.read().clone())
    }

    /// Insert/overwrite `upserts` and drop `removals`, then persist and
    /// publish the result as a new snapshot. Returns false when nothing
    /// changed, in which case neither the file nor the generation is touched.
    pub fn apply(&self, upserts: Vec<T>, removals: &[T::Key]) -> Result<bool, IndexError> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(false);
        }
        let _guard = self.writer.lock();
        let base = self.snapshot()?;

        let mut entries = base.entries.clone();
        for key in removals {
            entries.remove(key);
        }
        for record in upserts {
            entries.insert(record.key(), Arc::new(record));
        }

        let next = Snapshot {
            generation: base.generation + 1,
            entries,
        };
        self.persist(&next)?;
        *self.current.write() = Arc::new(next);
        Ok(true)
    }

    /// Write the current snapshot to disk.
    pub fn flush(&self) -> Result<(), IndexError> {
        let _guard = self.writer.lock();
        let snapshot = self.current.read().clone();
        self.persist(&snapshot)
    }

    /// Flush and refuse further reads and writes.
    pub fn close(&self) -> Result<(), IndexError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.flush()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn entry_count(&self) -> usize {
        self.current.read().len()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    // Atomic write via temp file + rename.
    fn persist(&self, snapshot: &Snapshot<T>) -> Result<(), IndexError> {
        let records: Vec<&T> = snapshot.entries.values().map(|e| e.as_ref()).collect();
        let data = serde_json::to_string(&records)?;
        let tmp_path = self.persist_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)?;
        std::fs::rename(&tmp_path, &self.persist_path)?;
        Ok(())
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodeChunk;

    fn embedded(path: &str, start: usize, emb: Vec<f32>) -> CodeChunk {
        let mut chunk = CodeChunk::new(path, start, start + 4, format!("{path}:{start}"));
        chunk.embedding = Some(emb);
        chunk
    }

    #[test]
    fn test_cosine_similarity_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_apply_bumps_generation_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.json");
        let store: VectorStore<CodeChunk> = VectorStore::open_or_create(&path).unwrap();
        assert_eq!(store.generation(), 0);

        assert!(store.apply(vec![embedded("a.rb", 1, vec![1.0, 0.0])], &[]).unwrap());
        assert_eq!(store.generation(), 1);
        assert!(path.exists());

        // No-op apply leaves everything alone
        assert!(!store.apply(vec![], &[]).unwrap());
        assert_eq!(store.generation(), 1);

        let reopened: VectorStore<CodeChunk> = VectorStore::open_or_create(&path).unwrap();
        assert_eq!(reopened.entry_count(), 1);
    }

    #[test]
    fn test_same_range_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store: VectorStore<CodeChunk> =
            VectorStore::open_or_create(&dir.path().join("v.json")).unwrap();
        store.apply(vec![embedded("a.rb", 1, vec![1.0, 0.0])], &[]).unwrap();
        store.apply(vec![embedded("a.rb", 1, vec![0.0, 1.0])], &[]).unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_snapshot_survives_later_writes() {
        let dir = tempfile::tempdir().unwrap();
        let store: VectorStore<CodeChunk> =
            VectorStore::open_or_create(&dir.path().join("v.json")).unwrap();
        store.apply(vec![embedded("a.rb", 1, vec![1.0, 0.0])], &[]).unwrap();

        let before = store.snapshot().unwrap();
        store.apply(vec![embedded("b.rb", 1, vec![1.0, 0.0])], &[]).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().unwrap().len(), 2);
    }

    #[test]
    fn test_ties_break_on_shorter_path_then_line() {
        let dir = tempfile::tempdir().unwrap();
        let store: VectorStore<CodeChunk> =
            VectorStore::open_or_create(&dir.path().join("v.json")).unwrap();
        store
            .apply(
                vec![
                    embedded("app/models/long_name.rb", 1, vec![1.0, 0.0]),
                    embedded("app/a.rb", 40, vec![1.0, 0.0]),
                    embedded("app/a.rb", 10, vec![1.0, 0.0]),
                ],
                &[],
            )
            .unwrap();

        let hits = store.snapshot().unwrap().search(&[1.0, 0.0], 10, None);
        let order: Vec<(&str, usize)> = hits
            .iter()
            .map(|(c, _)| (c.path.as_str(), c.start_line))
            .collect();
        assert_eq!(
            order,
            vec![("app/a.rb", 10), ("app/a.rb", 40), ("app/models/long_name.rb", 1)]
        );
    }

    #[test]
    fn test_nan_vector_never_ranks() {
        let dir = tempfile::tempdir().unwrap();
        let store: VectorStore<CodeChunk> =
            VectorStore::open_or_create(&dir.path().join("v.json")).unwrap();
        store
            .apply(
                vec![
                    embedded("app/bad.rb", 1, vec![f32::NAN, 1.0]),
                    embedded("app/good.rb", 1, vec![1.0, 0.0]),
                    embedded("app/other.rb", 1, vec![0.0, 1.0]),
                ],
                &[],
            )
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        for _ in 0..3 {
            let hits = snapshot.search(&[1.0, 0.0], 10, None);
            let paths: Vec<&str> = hits.iter().map(|(c, _)| c.path.as_str()).collect();
            assert_eq!(paths, vec!["app/good.rb", "app/other.rb"]);
        }
    }

    #[test]
    fn test_closed_store_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store: VectorStore<CodeChunk> =
            VectorStore::open_or_create(&dir.path().join("v.json")).unwrap();
        store.close().unwrap();
        assert!(matches!(store.snapshot(), Err(IndexError::Unavailable(_))));
    }
}
