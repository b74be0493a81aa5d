//! Embedding stores for jobs and resumes.
//!
//! An [`EmbeddingStore`] owns one [`VectorIndex`] plus a metadata table
//! mapping external ids to [`DocumentRecord`]s. Positions in the table always
//! equal rows in the index; a reverse `position -> id` array is kept in
//! lockstep so search hits resolve in O(k).
//!
//! All state sits behind one `RwLock`. Searches and lookups share it;
//! add/remove/save/load/clear hold it exclusively for their whole duration,
//! including the rebuild that follows a removal.

mod record;
mod storage;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::semantic::{
    l2_norm, normalize, prepare_text, EmbeddingError, Encoder, IndexError, VectorIndex,
    UNIT_NORM_TOLERANCE,
};

pub use record::{
    DocumentKind, DocumentRecord, Job, JobAttributes, Resume, ResumeAttributes, Sections,
};
pub use storage::{Snapshot, VectorStorage, VectorStorageError};

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} '{id}' already exists")]
    AlreadyExists { kind: &'static str, id: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("document id must not be empty")]
    EmptyId,

    #[error("document text must not be empty")]
    EmptyText,

    #[error("encoder error: {0}")]
    Encoder(#[from] EmbeddingError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("store is inconsistent: {0}")]
    Inconsistent(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

/// How the index is rebuilt after a removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildStrategy {
    /// Replay the surviving rows already held by the index
    #[default]
    Reuse,
    /// Re-encode every surviving document's source text
    Reencode,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub rebuild: RebuildStrategy,
    /// Save both artifacts after every add and remove
    pub autosave: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            rebuild: RebuildStrategy::Reuse,
            autosave: true,
        }
    }
}

/// What [`EmbeddingStore::load`] found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Both artifacts read back with this many documents
    Loaded(usize),
    /// Nothing on disk yet
    Fresh,
    /// Artifacts were unusable; the store was reset to empty
    Recovered(String),
}

/// A search hit resolved to its external id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarDocument {
    pub external_id: String,
    pub score: f32,
}

/// Per-store statistics.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub kind: &'static str,
    pub total_documents: usize,
    pub embedding_dim: usize,
    pub model: String,
    pub index_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_added: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_with_documents: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_documents_per_user: Option<f64>,
    pub vectors_path: PathBuf,
    pub metadata_path: PathBuf,
}

struct StoreState<A> {
    index: VectorIndex,
    records: HashMap<String, DocumentRecord<A>>,
    /// Reverse map: `ids_by_position[record.position] == record.external_id`
    ids_by_position: Vec<String>,
}

impl<A> StoreState<A> {
    fn empty(dimensions: usize) -> Self {
        Self {
            index: VectorIndex::new(dimensions),
            records: HashMap::new(),
            ids_by_position: Vec::new(),
        }
    }

    fn from_snapshot(snapshot: Snapshot<A>) -> Self {
        let ids_by_position = snapshot
            .records
            .iter()
            .map(|record| record.external_id.clone())
            .collect();
        let records = snapshot
            .records
            .into_iter()
            .map(|record| (record.external_id.clone(), record))
            .collect();
        Self {
            index: snapshot.index,
            records,
            ids_by_position,
        }
    }

    /// Records in position order.
    fn ordered_records(&self) -> Vec<&DocumentRecord<A>> {
        self.ids_by_position
            .iter()
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    /// Verify that index, metadata and reverse map agree.
    fn check_consistency(&self) -> Result<(), StoreError> {
        let rows = self.index.len();
        if rows != self.records.len() || rows != self.ids_by_position.len() {
            return Err(StoreError::Inconsistent(format!(
                "{} vectors, {} records, {} reverse entries",
                rows,
                self.records.len(),
                self.ids_by_position.len()
            )));
        }

        for (position, id) in self.ids_by_position.iter().enumerate() {
            match self.records.get(id) {
                Some(record) if record.position == position => {}
                Some(record) => {
                    return Err(StoreError::Inconsistent(format!(
                        "'{}' sits at row {} but records position {}",
                        id, position, record.position
                    )))
                }
                None => {
                    return Err(StoreError::Inconsistent(format!(
                        "row {} points at unknown id '{}'",
                        position, id
                    )))
                }
            }
        }

        Ok(())
    }
}

/// Embedding store for one document kind.
pub struct EmbeddingStore<K: DocumentKind> {
    encoder: Arc<dyn Encoder>,
    storage: VectorStorage,
    options: StoreOptions,
    state: RwLock<StoreState<K::Attributes>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: DocumentKind> EmbeddingStore<K> {
    /// Open the store under `<base_dir>/<kind>/`, loading persisted state.
    ///
    /// Unusable artifacts never fail the open: the store starts empty and the
    /// condition is logged.
    pub fn open(base_dir: &Path, encoder: Arc<dyn Encoder>, options: StoreOptions) -> Self {
        let dimensions = encoder.dimensions();
        let store = Self {
            encoder,
            storage: VectorStorage::new(base_dir.join(K::NAME)),
            options,
            state: RwLock::new(StoreState::empty(dimensions)),
            _kind: PhantomData,
        };

        if let Err(err) = store.load() {
            log::error!("Failed to load {} store: {}", K::LABEL, err);
        }
        store
    }

    pub fn kind(&self) -> &'static str {
        K::NAME
    }

    pub fn dimensions(&self) -> usize {
        self.encoder.dimensions()
    }

    pub fn model_name(&self) -> &str {
        self.encoder.model_name()
    }

    pub fn storage(&self) -> &VectorStorage {
        &self.storage
    }

    /// Shared read access held for as long as the returned reader lives.
    ///
    /// Writers block until it is dropped, so a batch can freeze the store.
    pub fn reader(&self) -> Result<StoreReader<'_, K>, StoreError> {
        Ok(StoreReader {
            state: self.read()?,
        })
    }

    /// Add a new document.
    ///
    /// The text is encoded before the writer lock is taken; an encoder
    /// failure leaves the store untouched. A failed autosave rolls the
    /// document back out.
    pub fn add(
        &self,
        external_id: &str,
        text: &str,
        attributes: K::Attributes,
    ) -> Result<DocumentRecord<K::Attributes>, StoreError> {
        let external_id = external_id.trim();
        if external_id.is_empty() {
            return Err(StoreError::EmptyId);
        }
        if self.read()?.records.contains_key(external_id) {
            log::warn!("{} {} already exists in index", K::LABEL, external_id);
            return Err(self.already_exists(external_id));
        }

        let vector = self.encode(text)?;

        let mut state = self.write()?;
        // Another writer may have won the race while we were encoding
        if state.records.contains_key(external_id) {
            log::warn!("{} {} already exists in index", K::LABEL, external_id);
            return Err(self.already_exists(external_id));
        }

        let position = state.index.add(&vector)?;
        let record = DocumentRecord {
            external_id: external_id.to_string(),
            position,
            source_text: text.to_string(),
            attributes,
            created_at: Utc::now(),
            embedding_model: self.encoder.model_name().to_string(),
        };
        state.records.insert(external_id.to_string(), record.clone());
        state.ids_by_position.push(external_id.to_string());

        if let Err(err) = self.finish_mutation(&state) {
            state.records.remove(external_id);
            state.ids_by_position.truncate(position);
            state.index.truncate(position);
            log::warn!("Rolled back {} {}: {}", K::LABEL, external_id, err);
            return Err(err);
        }

        log::info!(
            "Added {} {} at position {} (total: {})",
            K::LABEL,
            external_id,
            position,
            state.index.len()
        );
        Ok(record)
    }

    /// Remove a document and rebuild the index from the survivors.
    ///
    /// O(n) in the live document count. Survivors keep their relative
    /// (insertion) order and get contiguous positions again. If the rebuild
    /// or the autosave fails the store is left as it was.
    pub fn remove(&self, external_id: &str) -> Result<DocumentRecord<K::Attributes>, StoreError> {
        let mut state = self.write()?;

        let removed_position = match state.records.get(external_id) {
            Some(record) => record.position,
            None => {
                log::warn!("{} {} not found in index", K::LABEL, external_id);
                return Err(self.not_found(external_id));
            }
        };

        let survivors: Vec<String> = state
            .ids_by_position
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != removed_position)
            .map(|(_, id)| id.clone())
            .collect();

        let index = self.rebuild_index(&state, &survivors)?;

        let mut records = state.records.clone();
        let removed = records
            .remove(external_id)
            .ok_or_else(|| self.not_found(external_id))?;
        for (position, id) in survivors.iter().enumerate() {
            if let Some(record) = records.get_mut(id) {
                record.position = position;
            }
        }
        let next = StoreState {
            index,
            records,
            ids_by_position: survivors,
        };

        // Swap only once the new state is consistent and persisted
        self.finish_mutation(&next)?;
        *state = next;

        log::info!(
            "Removed {} {} and rebuilt index with {} documents",
            K::LABEL,
            external_id,
            state.index.len()
        );
        Ok(removed)
    }

    /// Stored (unit) vector for a document.
    pub fn get_embedding(&self, external_id: &str) -> Result<Vec<f32>, StoreError> {
        self.reader()?.embedding(external_id)
    }

    /// Metadata for a document.
    pub fn get_record(
        &self,
        external_id: &str,
    ) -> Result<Option<DocumentRecord<K::Attributes>>, StoreError> {
        Ok(self.read()?.records.get(external_id).cloned())
    }

    pub fn contains(&self, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.read()?.records.contains_key(external_id))
    }

    /// All ids in insertion order.
    pub fn list_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.ids_by_position.clone())
    }

    /// Number of live documents.
    pub fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.index.len())
    }

    /// Top-k documents most similar to `query`.
    pub fn search_similar(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarDocument>, StoreError> {
        self.reader()?.search_similar(query, k)
    }

    /// Persist both artifacts.
    pub fn save(&self) -> Result<(), StoreError> {
        let state = self.write()?;
        self.save_locked(&state)
    }

    /// Replace in-memory state with what is on disk.
    ///
    /// Missing, mismatched or corrupt artifacts reset the store to empty and
    /// are reported through [`LoadOutcome::Recovered`], never as an error.
    pub fn load(&self) -> Result<LoadOutcome, StoreError> {
        let mut state = self.write()?;
        let dimensions = self.encoder.dimensions();

        if !self.storage.exists() {
            log::info!("No existing {} index, starting fresh", K::LABEL);
            *state = StoreState::empty(dimensions);
            return Ok(LoadOutcome::Fresh);
        }

        let loaded = self
            .storage
            .load::<K::Attributes>(self.encoder.model_name(), dimensions)
            .map(StoreState::from_snapshot)
            .map_err(StoreError::from)
            .and_then(|loaded| loaded.check_consistency().map(|_| loaded));

        match loaded {
            Ok(loaded) => {
                let count = loaded.index.len();
                *state = loaded;
                log::info!("Loaded {} {} documents from storage", count, K::LABEL);
                Ok(LoadOutcome::Loaded(count))
            }
            Err(err) => {
                log::warn!(
                    "Could not load {} index from {}: {}; starting with an empty store",
                    K::LABEL,
                    self.storage.dir().display(),
                    err
                );
                *state = StoreState::empty(dimensions);
                Ok(LoadOutcome::Recovered(err.to_string()))
            }
        }
    }

    /// Drop every document and delete the on-disk artifacts.
    ///
    /// The in-memory state is only reset once the artifacts are gone.
    pub fn clear(&self) -> Result<(), StoreError> {
        let mut state = self.write()?;
        self.storage.delete()?;
        *state = StoreState::empty(self.encoder.dimensions());
        log::info!("Cleared {} embedding index", K::LABEL);
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats, StoreError> {
        let state = self.read()?;

        let owners: Option<HashSet<&str>> = K::TRACKS_OWNER.then(|| {
            state
                .records
                .values()
                .filter_map(|record| K::owner(&record.attributes))
                .collect()
        });
        let avg_documents_per_user = owners.as_ref().map(|owners| {
            if owners.is_empty() {
                0.0
            } else {
                let avg = state.records.len() as f64 / owners.len() as f64;
                (avg * 100.0).round() / 100.0
            }
        });

        Ok(StoreStats {
            kind: K::NAME,
            total_documents: state.index.len(),
            embedding_dim: self.encoder.dimensions(),
            model: self.encoder.model_name().to_string(),
            index_size_bytes: self.storage.size_bytes(),
            last_updated: self.storage.last_modified(),
            last_added: state.records.values().map(|record| record.created_at).max(),
            users_with_documents: owners.as_ref().map(|owners| owners.len()),
            avg_documents_per_user,
            vectors_path: self.storage.vectors_path(),
            metadata_path: self.storage.metadata_path(),
        })
    }

    /// Number of documents owned by `user_id`.
    pub fn count_by_user(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .read()?
            .records
            .values()
            .filter(|record| K::owner(&record.attributes) == Some(user_id))
            .count())
    }

    /// Ids owned by `user_id`, in insertion order.
    pub fn list_by_user(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let state = self.read()?;
        Ok(state
            .ordered_records()
            .into_iter()
            .filter(|record| K::owner(&record.attributes) == Some(user_id))
            .map(|record| record.external_id.clone())
            .collect())
    }

    /// Document count per owner; documents without one count as "unknown".
    pub fn user_distribution(&self) -> Result<BTreeMap<String, usize>, StoreError> {
        let state = self.read()?;
        let mut distribution = BTreeMap::new();
        for record in state.records.values() {
            let owner = K::owner(&record.attributes).unwrap_or("unknown");
            *distribution.entry(owner.to_string()).or_insert(0) += 1;
        }
        Ok(distribution)
    }

    /// Top-k among the documents owned by `user_id`.
    pub fn search_by_user(
        &self,
        user_id: &str,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarDocument>, StoreError> {
        let reader = self.reader()?;
        let hits = reader.search_where(query, k, |record| {
            K::owner(&record.attributes) == Some(user_id)
        })?;
        if hits.is_empty() {
            log::warn!("No {} documents found for user {}", K::LABEL, user_id);
        }
        Ok(hits)
    }

    /// Prepare, encode and dimension-check a text.
    pub(crate) fn encode(&self, text: &str) -> Result<Vec<f32>, StoreError> {
        let prepared = prepare_text(text).ok_or(StoreError::EmptyText)?;
        let vector = self.encoder.encode(&prepared)?;
        if vector.len() != self.encoder.dimensions() {
            return Err(IndexError::DimensionMismatch {
                expected: self.encoder.dimensions(),
                got: vector.len(),
            }
            .into());
        }
        Ok(vector)
    }

    /// Build a fresh index holding `survivors` in order.
    fn rebuild_index(
        &self,
        state: &StoreState<K::Attributes>,
        survivors: &[String],
    ) -> Result<VectorIndex, StoreError> {
        let records = survivors
            .iter()
            .map(|id| {
                state.records.get(id).ok_or_else(|| {
                    StoreError::Inconsistent(format!("reverse map points at unknown id '{}'", id))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let dimensions = self.encoder.dimensions();
        match self.options.rebuild {
            RebuildStrategy::Reuse => {
                // Rows are already unit length; copy them as is
                let mut data = Vec::with_capacity(records.len() * dimensions);
                for record in &records {
                    let row = state.index.row(record.position).ok_or(
                        IndexError::PositionNotFound {
                            position: record.position,
                            len: state.index.len(),
                        },
                    )?;
                    data.extend_from_slice(row);
                }
                Ok(VectorIndex::from_raw(dimensions, data)?)
            }
            RebuildStrategy::Reencode => {
                let texts = records
                    .iter()
                    .map(|record| prepare_text(&record.source_text).ok_or(StoreError::EmptyText))
                    .collect::<Result<Vec<_>, _>>()?;
                let vectors = self.encoder.encode_batch(&texts)?;
                if vectors.len() != texts.len() {
                    return Err(EmbeddingError::EmbeddingFailed(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        vectors.len()
                    ))
                    .into());
                }
                Ok(VectorIndex::rebuild_from(dimensions, vectors)?)
            }
        }
    }

    /// Consistency check plus optional autosave, run before a writer
    /// releases the lock.
    fn finish_mutation(&self, state: &StoreState<K::Attributes>) -> Result<(), StoreError> {
        if let Err(err) = state.check_consistency() {
            debug_assert!(false, "{} store drifted: {}", K::LABEL, err);
            log::error!("{} store drifted: {}", K::LABEL, err);
            return Err(err);
        }

        if self.options.autosave {
            self.save_locked(state)?;
        }
        Ok(())
    }

    fn save_locked(&self, state: &StoreState<K::Attributes>) -> Result<(), StoreError> {
        self.storage.save(
            &state.index,
            &state.ordered_records(),
            self.encoder.model_name(),
        )?;
        log::debug!(
            "Saved {} index with {} documents",
            K::LABEL,
            state.index.len()
        );
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, StoreState<K::Attributes>>, StoreError> {
        self.state.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, StoreState<K::Attributes>>, StoreError> {
        self.state.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn already_exists(&self, id: &str) -> StoreError {
        StoreError::AlreadyExists {
            kind: K::LABEL,
            id: id.to_string(),
        }
    }

    fn not_found(&self, id: &str) -> StoreError {
        StoreError::NotFound {
            kind: K::LABEL,
            id: id.to_string(),
        }
    }
}

/// Read access to a store that stays valid while it is held.
///
/// `StoreReader` is `Sync`, so one reader can be shared by worker threads.
pub struct StoreReader<'a, K: DocumentKind> {
    state: RwLockReadGuard<'a, StoreState<K::Attributes>>,
}

impl<'a, K: DocumentKind> StoreReader<'a, K> {
    pub fn len(&self) -> usize {
        self.state.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.index.is_empty()
    }

    pub fn dimensions(&self) -> usize {
        self.state.index.dimensions()
    }

    pub fn record(&self, external_id: &str) -> Option<&DocumentRecord<K::Attributes>> {
        self.state.records.get(external_id)
    }

    /// Borrow the stored vector of a document.
    pub fn vector(&self, external_id: &str) -> Result<&[f32], StoreError> {
        let record = self.state.records.get(external_id).ok_or_else(|| StoreError::NotFound {
            kind: K::LABEL,
            id: external_id.to_string(),
        })?;
        self.state
            .index
            .row(record.position)
            .ok_or_else(|| {
                StoreError::from(IndexError::PositionNotFound {
                    position: record.position,
                    len: self.state.index.len(),
                })
            })
    }

    pub fn embedding(&self, external_id: &str) -> Result<Vec<f32>, StoreError> {
        let record = self.state.records.get(external_id).ok_or_else(|| StoreError::NotFound {
            kind: K::LABEL,
            id: external_id.to_string(),
        })?;
        Ok(self.state.index.reconstruct(record.position)?)
    }

    pub fn search_similar(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<SimilarDocument>, StoreError> {
        self.search_where(query, k, |_| true)
    }

    /// Top-k among the records accepted by `filter`.
    pub fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        filter: F,
    ) -> Result<Vec<SimilarDocument>, StoreError>
    where
        F: Fn(&DocumentRecord<K::Attributes>) -> bool,
    {
        if self.state.index.is_empty() {
            log::debug!("No {} documents in index for similarity search", K::LABEL);
            return Ok(Vec::new());
        }

        let query = normalize(query)?;
        let ids = &self.state.ids_by_position;
        let hits = self.state.index.search_where(&query, k, |position| {
            self.state
                .records
                .get(&ids[position])
                .map(&filter)
                .unwrap_or(false)
        })?;

        Ok(hits
            .into_iter()
            .map(|hit| SimilarDocument {
                external_id: ids[hit.position].clone(),
                score: hit.score,
            })
            .collect())
    }

    /// Check that every stored vector is unit length.
    pub fn all_unit_norm(&self) -> bool {
        self.state
            .index
            .rows()
            .all(|row| (l2_norm(row) - 1.0).abs() <= UNIT_NORM_TOLERANCE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::HashEncoder;

    fn open_store(dir: &Path) -> EmbeddingStore<Job> {
        let encoder: Arc<dyn Encoder> = Arc::new(HashEncoder::new(64).unwrap());
        EmbeddingStore::open(dir, encoder, StoreOptions::default())
    }

    #[test]
    fn test_open_empty_directory_is_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path());

        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.load().unwrap(), LoadOutcome::Fresh);
        assert_eq!(store.kind(), "jobs");
    }

    #[test]
    fn test_add_rejects_empty_id_and_text() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path());

        assert!(matches!(
            store.add("  ", "Rust engineer", JobAttributes::default()),
            Err(StoreError::EmptyId)
        ));
        assert!(matches!(
            store.add("j1", " \n ", JobAttributes::default()),
            Err(StoreError::EmptyText)
        ));
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_add_records_model_and_position() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path());

        let first = store.add("j1", "Rust engineer", JobAttributes::default()).unwrap();
        let second = store.add("j2", "Go engineer", JobAttributes::default()).unwrap();

        assert_eq!(first.position, 0);
        assert_eq!(second.position, 1);
        assert_eq!(first.embedding_model, "hash-v1-64");
        assert_eq!(store.list_ids().unwrap(), vec!["j1", "j2"]);
    }

    #[test]
    fn test_reader_reports_unit_norm() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open_store(tmp.path());
        store.add("j1", "Rust engineer", JobAttributes::default()).unwrap();
        store.add("j2", "Data analyst, SQL", JobAttributes::default()).unwrap();

        let reader = store.reader().unwrap();
        assert_eq!(reader.len(), 2);
        assert!(reader.all_unit_norm());
    }

    #[test]
    fn test_consistency_check_flags_drift() {
        let mut state: StoreState<JobAttributes> = StoreState::empty(2);
        state.index.add(&[1.0, 0.0]).unwrap();

        assert!(matches!(
            state.check_consistency(),
            Err(StoreError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_autosave_disabled_leaves_disk_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let encoder: Arc<dyn Encoder> = Arc::new(HashEncoder::new(64).unwrap());
        let store: EmbeddingStore<Job> = EmbeddingStore::open(
            tmp.path(),
            encoder,
            StoreOptions {
                autosave: false,
                ..Default::default()
            },
        );

        store.add("j1", "Rust engineer", JobAttributes::default()).unwrap();
        assert!(!store.storage().exists());

        store.save().unwrap();
        assert!(store.storage().exists());
    }
}
