//! Cross-collection matching: ranked matches, pairwise scores and batches.
//!
//! The engine holds no document state of its own. Every call reads from the
//! stores it is handed; batches fan out over a bounded rayon pool while the
//! target store is held for reading.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::semantic::{cosine_similarity, prepare_text, EmbeddingError, Encoder};
use crate::store::{DocumentKind, DocumentRecord, EmbeddingStore, StoreError, StoreReader};

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EmbeddingError),

    #[error("Query text must not be empty")]
    EmptyQuery,

    #[error("Failed to build matching thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Discrete label for a similarity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchQuality {
    VeryPoor,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl MatchQuality {
    pub fn classify(score: f32) -> Self {
        if score >= 0.9 {
            Self::Excellent
        } else if score >= 0.8 {
            Self::Good
        } else if score >= 0.7 {
            Self::Fair
        } else if score >= 0.6 {
            Self::Poor
        } else {
            Self::VeryPoor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Fair => "fair",
            Self::Poor => "poor",
            Self::VeryPoor => "very_poor",
        }
    }
}

impl fmt::Display for MatchQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One target document in a ranked match list.
#[derive(Debug, Clone, Serialize)]
pub struct RankedMatch<A> {
    pub external_id: String,
    pub score: f32,
    pub quality: MatchQuality,
    pub source_text: String,
    pub attributes: A,
    pub created_at: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

/// Matches for a single query of a batch.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMatches<A> {
    pub query_id: String,
    pub matches: Vec<RankedMatch<A>>,
    pub best_match: Option<RankedMatch<A>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchStats {
    pub queries_requested: usize,
    /// Query ids found in the query store
    pub queries_processed: usize,
    pub queries_skipped: usize,
    /// Pairwise scores computed across all processed queries
    pub total_comparisons: usize,
    /// Returned matches divided by requested queries
    pub avg_matches_per_query: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport<A> {
    pub results: Vec<QueryMatches<A>>,
    pub stats: BatchStats,
}

/// Detailed comparison of two stored documents.
#[derive(Debug, Clone, Serialize)]
pub struct MatchStatistics<Q, T> {
    pub query: DocumentRecord<Q>,
    pub target: DocumentRecord<T>,
    pub score: f32,
    pub quality: MatchQuality,
    pub computed_at: DateTime<Utc>,
}

/// Direct cosine similarity of two vectors; `0.0` if either has zero norm.
pub fn pairwise_score(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b)
}

pub struct MatchingEngine {
    encoder: Arc<dyn Encoder>,
    pool: rayon::ThreadPool,
}

impl MatchingEngine {
    /// Create an engine whose batches use at most `parallelism` workers.
    pub fn new(encoder: Arc<dyn Encoder>, parallelism: usize) -> Result<Self, MatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallelism.max(1))
            .thread_name(|i| format!("jobmatch-batch-{}", i))
            .build()?;
        Ok(Self { encoder, pool })
    }

    pub fn parallelism(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Rank `target_store` against a document already stored in `query_store`.
    ///
    /// A missing query id or an empty target store yields an empty list.
    pub fn best_matches_for<Q, T>(
        &self,
        query_store: &EmbeddingStore<Q>,
        query_id: &str,
        target_store: &EmbeddingStore<T>,
        k: usize,
    ) -> Result<Vec<RankedMatch<T::Attributes>>, MatchError>
    where
        Q: DocumentKind,
        T: DocumentKind,
    {
        // Copy the vector out so the query store is released before the
        // target store is locked; both may be the same store.
        let query = {
            let reader = query_store.reader()?;
            match reader.vector(query_id) {
                Ok(vector) => vector.to_vec(),
                Err(StoreError::NotFound { .. }) => {
                    log::warn!("{} {} not found in embedding store", Q::LABEL, query_id);
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            }
        };

        let target = target_store.reader()?;
        if target.is_empty() {
            log::warn!("No {} documents in embedding store", T::LABEL);
            return Ok(Vec::new());
        }

        let matches = rank(&target, &query, k, &|_| true)?;
        log::info!(
            "Found {} {} matches for {} {}",
            matches.len(),
            T::LABEL,
            Q::LABEL,
            query_id
        );
        Ok(matches)
    }

    /// Rank `target_store` against freshly encoded text. Nothing is stored.
    pub fn best_matches_for_text<T: DocumentKind>(
        &self,
        raw_text: &str,
        target_store: &EmbeddingStore<T>,
        k: usize,
    ) -> Result<Vec<RankedMatch<T::Attributes>>, MatchError> {
        let query = self.encode_query(raw_text)?;
        self.best_matches_for_vector(&query, target_store, k, &|_| true)
    }

    /// Rank the target documents accepted by `filter` against a query vector.
    pub fn best_matches_for_vector<T: DocumentKind>(
        &self,
        query: &[f32],
        target_store: &EmbeddingStore<T>,
        k: usize,
        filter: &dyn Fn(&DocumentRecord<T::Attributes>) -> bool,
    ) -> Result<Vec<RankedMatch<T::Attributes>>, MatchError> {
        let target = target_store.reader()?;
        if target.is_empty() {
            log::warn!("No {} documents in embedding store", T::LABEL);
            return Ok(Vec::new());
        }
        Ok(rank(&target, query, k, filter)?)
    }

    /// Encode ad-hoc query text with the engine's encoder.
    pub fn encode_query(&self, raw_text: &str) -> Result<Vec<f32>, MatchError> {
        let prepared = prepare_text(raw_text).ok_or(MatchError::EmptyQuery)?;
        Ok(self.encoder.encode(&prepared)?)
    }

    /// Rank each query id against the target store, or against `target_ids`
    /// when given.
    ///
    /// Ids missing from either store are skipped with a warning. The target
    /// store is read-locked for the whole batch.
    pub fn batch_match<Q, T>(
        &self,
        query_store: &EmbeddingStore<Q>,
        query_ids: &[String],
        target_store: &EmbeddingStore<T>,
        target_ids: Option<&[String]>,
        k: usize,
    ) -> Result<BatchReport<T::Attributes>, MatchError>
    where
        Q: DocumentKind,
        T: DocumentKind,
    {
        let queries: Vec<(String, Vec<f32>)> = {
            let reader = query_store.reader()?;
            query_ids
                .iter()
                .filter_map(|id| match reader.vector(id) {
                    Ok(vector) => Some((id.clone(), vector.to_vec())),
                    Err(_) => {
                        log::warn!("{} {} not found in embedding store", Q::LABEL, id);
                        None
                    }
                })
                .collect()
        };

        let target = target_store.reader()?;

        let allowed: Option<HashSet<&str>> = target_ids.map(|ids| {
            ids.iter()
                .map(String::as_str)
                .filter(|id| {
                    let present = target.record(id).is_some();
                    if !present {
                        log::warn!("{} {} not found in embedding store", T::LABEL, id);
                    }
                    present
                })
                .collect()
        });
        let targets_considered = allowed.as_ref().map_or(target.len(), |ids| ids.len());

        let filter = |record: &DocumentRecord<T::Attributes>| {
            allowed
                .as_ref()
                .map_or(true, |ids| ids.contains(record.external_id.as_str()))
        };

        let results = self.pool.install(|| {
            queries
                .par_iter()
                .map(|(query_id, vector)| {
                    let matches = rank(&target, vector, k, &filter)?;
                    let best_match = matches.first().cloned();
                    Ok(QueryMatches {
                        query_id: query_id.clone(),
                        matches,
                        best_match,
                    })
                })
                .collect::<Result<Vec<_>, StoreError>>()
        })?;

        let returned: usize = results.iter().map(|r| r.matches.len()).sum();
        let stats = BatchStats {
            queries_requested: query_ids.len(),
            queries_processed: results.len(),
            queries_skipped: query_ids.len() - results.len(),
            total_comparisons: results.len() * targets_considered,
            avg_matches_per_query: if query_ids.is_empty() {
                0.0
            } else {
                returned as f64 / query_ids.len() as f64
            },
        };

        log::info!(
            "Batch processed {} {}-{} comparisons",
            stats.total_comparisons,
            Q::LABEL,
            T::LABEL
        );
        Ok(BatchReport { results, stats })
    }

    /// Score one stored document against another.
    pub fn match_statistics<Q, T>(
        &self,
        query_store: &EmbeddingStore<Q>,
        query_id: &str,
        target_store: &EmbeddingStore<T>,
        target_id: &str,
    ) -> Result<MatchStatistics<Q::Attributes, T::Attributes>, MatchError>
    where
        Q: DocumentKind,
        T: DocumentKind,
    {
        let (query, query_vector) = {
            let reader = query_store.reader()?;
            let vector = reader.vector(query_id)?.to_vec();
            let record = reader.record(query_id).cloned().ok_or_else(|| StoreError::NotFound {
                kind: Q::LABEL,
                id: query_id.to_string(),
            })?;
            (record, vector)
        };

        let reader = target_store.reader()?;
        let score = pairwise_score(&query_vector, reader.vector(target_id)?);
        let target = reader.record(target_id).cloned().ok_or_else(|| StoreError::NotFound {
            kind: T::LABEL,
            id: target_id.to_string(),
        })?;

        Ok(MatchStatistics {
            query,
            target,
            score,
            quality: MatchQuality::classify(score),
            computed_at: Utc::now(),
        })
    }
}

/// Search a held reader and attach target metadata to every hit.
fn rank<T: DocumentKind>(
    target: &StoreReader<'_, T>,
    query: &[f32],
    k: usize,
    filter: &dyn Fn(&DocumentRecord<T::Attributes>) -> bool,
) -> Result<Vec<RankedMatch<T::Attributes>>, StoreError> {
    let computed_at = Utc::now();
    let hits = target.search_where(query, k, filter)?;

    Ok(hits
        .into_iter()
        .filter_map(|hit| {
            let record = target.record(&hit.external_id)?;
            Some(RankedMatch {
                external_id: hit.external_id,
                score: hit.score,
                quality: MatchQuality::classify(hit.score),
                source_text: record.source_text.clone(),
                attributes: record.attributes.clone(),
                created_at: record.created_at,
                computed_at,
            })
        })
        .collect())
}
