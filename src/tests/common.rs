//! Deterministic encoders and fixtures shared by the cross-module tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::semantic::{normalize, tokenize, EmbeddingError, Encoder};
use crate::store::{EmbeddingStore, Job, JobAttributes, Resume, ResumeAttributes, StoreOptions};

/// One dimension per known keyword plus a catch-all dimension for texts
/// with no known keyword. Unknown words are ignored.
pub struct KeywordEncoder {
    vocabulary: Vec<&'static str>,
}

pub const KEYWORDS: &[&str] = &[
    "python",
    "kubernetes",
    "java",
    "enterprise",
    "cloud",
    "monolith",
    "maintenance",
    "rust",
    "sql",
    "design",
];

impl KeywordEncoder {
    pub fn new() -> Self {
        Self {
            vocabulary: KEYWORDS.to_vec(),
        }
    }
}

impl Encoder for KeywordEncoder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dimensions(&self) -> usize {
        self.vocabulary.len() + 1
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0.0f32; self.dimensions()];
        for token in tokenize(text) {
            if let Some(slot) = self.vocabulary.iter().position(|word| *word == token) {
                vector[slot] += 1.0;
            }
        }
        if vector.iter().all(|v| *v == 0.0) {
            vector[self.vocabulary.len()] = 1.0;
        }
        normalize(&vector).map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// Maps known texts to fixed vectors; anything else fails to encode.
pub struct TableEncoder {
    dimensions: usize,
    table: HashMap<String, Vec<f32>>,
}

impl TableEncoder {
    pub fn new(dimensions: usize, entries: &[(&str, Vec<f32>)]) -> Self {
        Self {
            dimensions,
            table: entries
                .iter()
                .map(|(text, vector)| (text.to_string(), vector.clone()))
                .collect(),
        }
    }
}

impl Encoder for TableEncoder {
    fn model_name(&self) -> &str {
        "table-test"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.table
            .get(text)
            .cloned()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed(format!("unknown text '{}'", text)))
    }
}

/// Counts how many texts reach the wrapped encoder, optionally failing once
/// a limit is passed.
pub struct CountingEncoder {
    inner: Arc<dyn Encoder>,
    calls: AtomicUsize,
    limit: Option<usize>,
}

impl CountingEncoder {
    pub fn new(inner: Arc<dyn Encoder>) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            limit: None,
        }
    }

    pub fn failing_after(inner: Arc<dyn Encoder>, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(inner)
        }
    }

    fn record(&self, texts: usize) -> Result<(), EmbeddingError> {
        let total = self.calls.fetch_add(texts, Ordering::SeqCst) + texts;
        match self.limit {
            Some(limit) if total > limit => Err(EmbeddingError::EmbeddingFailed(format!(
                "encoder gave up after {} texts",
                limit
            ))),
            _ => Ok(()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Encoder for CountingEncoder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.record(1)?;
        self.inner.encode(text)
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.record(texts.len())?;
        self.inner.encode_batch(texts)
    }
}

/// Unit vector in 3 dimensions whose dot product with `[1, 0, 0]` is `cos`.
pub fn with_cosine(cos: f32) -> Vec<f32> {
    vec![cos, (1.0 - cos * cos).sqrt(), 0.0]
}

pub fn keyword_encoder() -> Arc<dyn Encoder> {
    Arc::new(KeywordEncoder::new())
}

pub fn job_store(dir: &Path, encoder: Arc<dyn Encoder>) -> EmbeddingStore<Job> {
    EmbeddingStore::open(dir, encoder, StoreOptions::default())
}

pub fn resume_store(dir: &Path, encoder: Arc<dyn Encoder>) -> EmbeddingStore<Resume> {
    EmbeddingStore::open(dir, encoder, StoreOptions::default())
}

pub fn resume(user_id: Option<&str>) -> ResumeAttributes {
    ResumeAttributes {
        user_id: user_id.map(str::to_string),
        ..Default::default()
    }
}

pub fn job(title: &str) -> JobAttributes {
    JobAttributes {
        title: Some(title.to_string()),
        ..Default::default()
    }
}

/// Load the two jobs and two resumes used across the matching tests.
pub fn seed_scenario(jobs: &EmbeddingStore<Job>, resumes: &EmbeddingStore<Resume>) {
    jobs.add("j1", "Python backend, Kubernetes, 5 years", job("Backend"))
        .unwrap();
    jobs.add("j2", "Java enterprise, no cloud", job("Enterprise"))
        .unwrap();
    resumes
        .add("r1", "Python developer, Kubernetes experience", resume(Some("alice")))
        .unwrap();
    resumes
        .add("r2", "Java monolith maintenance", resume(Some("bob")))
        .unwrap();
}

pub fn test_config(dir: &Path) -> Config {
    Config::default().with_base_path(dir)
}
