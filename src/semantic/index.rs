//! Append-only vector index with exact inner-product search.
//!
//! Rows live in one contiguous row-major buffer. Every row is unit-normalized
//! on the way in, so the inner product of two rows is their cosine similarity.
//! There is no per-row delete: callers that need to drop a row rebuild the
//! whole index from the surviving vectors.

use std::cmp::Ordering;

/// Tolerance used when checking that a vector is unit length.
pub const UNIT_NORM_TOLERANCE: f32 = 1e-5;

/// Flat, fixed-dimension vector index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Row-major storage, `len() * dimensions` values
    data: Vec<f32>,
    dimensions: usize,
}

/// A single hit returned by [`VectorIndex::search`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    /// Row of the matching vector
    pub position: usize,
    /// Inner product with the query (cosine similarity for unit vectors)
    pub score: f32,
}

impl VectorIndex {
    /// Create a new empty index with the given dimensions.
    pub fn new(dimensions: usize) -> Self {
        debug_assert!(dimensions > 0, "vector index needs at least one dimension");
        Self {
            data: Vec::new(),
            dimensions,
        }
    }

    /// Create an index with room for `capacity` rows.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        debug_assert!(dimensions > 0, "vector index needs at least one dimension");
        Self {
            data: Vec::with_capacity(dimensions * capacity),
            dimensions,
        }
    }

    /// Get the fixed row dimension.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.data.len() / self.dimensions.max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw row-major values, used by the persistence layer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Append a vector and return its row.
    ///
    /// The vector is normalized before it is stored. Fails on a dimension
    /// mismatch or a zero-norm vector, leaving the index untouched.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, IndexError> {
        self.check_dimensions(vector.len())?;
        let normalized = normalize(vector)?;

        let position = self.len();
        self.data.extend_from_slice(&normalized);
        Ok(position)
    }

    /// Borrow the row stored at `position`.
    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        let end = start.checked_add(self.dimensions)?;
        self.data.get(start..end)
    }

    /// Drop every row at or after `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.data.truncate(len.saturating_mul(self.dimensions));
    }

    /// Copy out the vector stored at `position`.
    pub fn reconstruct(&self, position: usize) -> Result<Vec<f32>, IndexError> {
        self.row(position)
            .map(|row| row.to_vec())
            .ok_or(IndexError::PositionNotFound {
                position,
                len: self.len(),
            })
    }

    /// Iterate over all rows in position order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimensions.max(1))
    }

    /// Exact top-k search by inner product.
    ///
    /// Results are ordered by score descending, ties by ascending position.
    /// `k` is clamped to the row count; an empty index yields no results.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, IndexError> {
        self.search_where(query, k, |_| true)
    }

    /// Same as [`search`](Self::search) but only rows accepted by `filter`
    /// are scored.
    pub fn search_where<F>(
        &self,
        query: &[f32],
        k: usize,
        filter: F,
    ) -> Result<Vec<SearchResult>, IndexError>
    where
        F: Fn(usize) -> bool,
    {
        self.check_dimensions(query.len())?;

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut results: Vec<SearchResult> = self
            .rows()
            .enumerate()
            .filter(|(position, _)| filter(*position))
            .map(|(position, row)| SearchResult {
                position,
                score: dot(query, row),
            })
            .collect();

        if results.len() > k {
            results.select_nth_unstable_by(k - 1, rank_order);
            results.truncate(k);
        }
        results.sort_by(rank_order);

        Ok(results)
    }

    /// Build a fresh index from an ordered list of vectors.
    ///
    /// Only the embedding store calls this, after a removal.
    pub(crate) fn rebuild_from<I>(dimensions: usize, vectors: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = Vec<f32>>,
    {
        let vectors = vectors.into_iter();
        let mut index = Self::with_capacity(dimensions, vectors.size_hint().0);
        for vector in vectors {
            index.add(&vector)?;
        }
        Ok(index)
    }

    /// Wrap an already normalized row-major buffer read back from disk.
    pub(crate) fn from_raw(dimensions: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dimensions == 0 || data.len() % dimensions != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dimensions,
                got: data.len(),
            });
        }
        Ok(Self { data, dimensions })
    }

    fn check_dimensions(&self, got: usize) -> Result<(), IndexError> {
        if got != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got,
            });
        }
        Ok(())
    }
}

fn rank_order(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.position.cmp(&b.position))
}

/// Compute the L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Inner product of two equally sized vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale a vector to unit length.
pub fn normalize(v: &[f32]) -> Result<Vec<f32>, IndexError> {
    let norm = l2_norm(v);
    if !norm.is_finite() || norm < f32::EPSILON {
        return Err(IndexError::ZeroNormVector);
    }
    Ok(v.iter().map(|x| x / norm).collect())
}

/// Cosine similarity of two vectors of any length.
///
/// Returns 0.0 when either vector has zero norm or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        log::warn!(
            "embedding dimension mismatch ({} vs {}); returning zero similarity",
            a.len(),
            b.len()
        );
        return 0.0;
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a < f32::EPSILON || norm_b < f32::EPSILON {
        return 0.0;
    }

    dot(a, b) / (norm_a * norm_b)
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,

    #[error("Position {position} not found (index holds {len} vectors)")]
    PositionNotFound { position: usize, len: usize },
}
