//! The query surface shared by the CLI and the HTTP daemon.
//!
//! `MatchService` owns both stores and the matching engine. Everything above
//! it (argument parsing, routing, rendering) only talks to this module.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::matching::{
    BatchReport, MatchError, MatchStatistics, MatchingEngine, RankedMatch,
};
use crate::semantic::{EmbeddingError, Encoder, FastEmbedEncoder, HashEncoder, HASH_MODEL};
use crate::store::{
    DocumentKind, EmbeddingStore, Job, JobAttributes, Resume, ResumeAttributes, Sections,
    StoreError, StoreStats,
};

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Match(#[from] MatchError),

    #[error("Encoder error: {0}")]
    Encoder(#[from] EmbeddingError),

    #[error("Timed out after {0}s while loading the embedding model")]
    EncoderTimeout(u64),

    #[error("Invalid request: {0}")]
    InvalidInput(String),
}

/// Broad class of a [`ServiceError`], used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Invalid,
    Internal,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) | Self::Match(MatchError::Store(err)) => store_error_kind(err),
            Self::Match(MatchError::EmptyQuery) | Self::InvalidInput(_) => ErrorKind::Invalid,
            _ => ErrorKind::Internal,
        }
    }
}

fn store_error_kind(err: &StoreError) -> ErrorKind {
    use crate::semantic::IndexError;

    match err {
        StoreError::NotFound { .. } => ErrorKind::NotFound,
        StoreError::AlreadyExists { .. } => ErrorKind::Conflict,
        StoreError::EmptyId
        | StoreError::EmptyText
        | StoreError::Index(IndexError::DimensionMismatch { .. })
        | StoreError::Index(IndexError::ZeroNormVector) => ErrorKind::Invalid,
        _ => ErrorKind::Internal,
    }
}

/// One of the two document collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    #[serde(alias = "job")]
    #[value(alias = "job")]
    Jobs,
    #[serde(alias = "resume")]
    #[value(alias = "resume")]
    Resumes,
}

impl Collection {
    /// The collection a query from this one is matched against.
    pub fn opposite(self) -> Self {
        match self {
            Self::Jobs => Self::Resumes,
            Self::Resumes => Self::Jobs,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jobs => Job::NAME,
            Self::Resumes => Resume::NAME,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddDocument {
    pub id: String,
    pub text: String,
    /// Job title
    #[serde(default)]
    pub title: Option<String>,
    /// Hiring company
    #[serde(default)]
    pub company: Option<String>,
    /// Resume owner
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sections: Sections,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub collection: Collection,
    pub id: String,
    pub position: usize,
    pub created_at: DateTime<Utc>,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Removed {
    pub collection: Collection,
    pub id: String,
    pub remaining: usize,
}

/// Query input: a stored document or ad-hoc text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    Id(String),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    /// Collection the query belongs to; results come from the other one
    pub from: Collection,
    pub query: Query,
    #[serde(default)]
    pub k: Option<usize>,
    /// Only match resumes owned by this user
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Ranked matches from either collection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "collection", content = "matches", rename_all = "lowercase")]
pub enum Matches {
    Jobs(Vec<RankedMatch<JobAttributes>>),
    Resumes(Vec<RankedMatch<ResumeAttributes>>),
}

impl Matches {
    pub fn len(&self) -> usize {
        match self {
            Self::Jobs(matches) => matches.len(),
            Self::Resumes(matches) => matches.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<&str> {
        match self {
            Self::Jobs(matches) => matches.iter().map(|m| m.external_id.as_str()).collect(),
            Self::Resumes(matches) => matches.iter().map(|m| m.external_id.as_str()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    #[serde(default = "default_batch_from")]
    pub from: Collection,
    pub query_ids: Vec<String>,
    /// Restrict targets to these ids; the whole opposite store otherwise
    #[serde(default)]
    pub target_ids: Option<Vec<String>>,
    #[serde(default)]
    pub k: Option<usize>,
}

fn default_batch_from() -> Collection {
    Collection::Jobs
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "collection", content = "report", rename_all = "lowercase")]
pub enum BatchResponse {
    Jobs(BatchReport<JobAttributes>),
    Resumes(BatchReport<ResumeAttributes>),
}

#[derive(Debug, Clone, Serialize)]
pub struct UserResumes {
    pub user_id: String,
    pub count: usize,
    pub resume_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceInfo {
    pub embedding_model: String,
    pub embedding_dimension: usize,
    pub similarity_metric: &'static str,
    pub batch_parallelism: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub jobs: StoreStats,
    pub resumes: StoreStats,
    pub total_possible_matches: usize,
    pub user_distribution: BTreeMap<String, usize>,
    pub performance: PerformanceInfo,
}

/// Build the encoder named by the config.
///
/// fastembed models may be downloaded on first use; loading is abandoned
/// after `download_timeout_secs`.
pub fn build_encoder(config: &Config) -> Result<Arc<dyn Encoder>, ServiceError> {
    if config.model.eq_ignore_ascii_case(HASH_MODEL) {
        return Ok(Arc::new(HashEncoder::new(config.hash_dimensions)?));
    }

    let model = config.model.clone();
    let cache_dir = config.base_path().to_path_buf();
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("jobmatch-model-loader".to_string())
        .spawn(move || {
            let _ = tx.send(FastEmbedEncoder::new(&model, cache_dir));
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to spawn loader: {}", e)))?;

    match rx.recv_timeout(Duration::from_secs(config.download_timeout_secs)) {
        Ok(encoder) => Ok(Arc::new(encoder?)),
        Err(RecvTimeoutError::Timeout) => {
            Err(ServiceError::EncoderTimeout(config.download_timeout_secs))
        }
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader exited without a result".to_string(),
        )
        .into()),
    }
}

pub struct MatchService {
    jobs: EmbeddingStore<Job>,
    resumes: EmbeddingStore<Resume>,
    engine: MatchingEngine,
    default_k: usize,
}

impl MatchService {
    /// Open both stores with the encoder named by the config.
    pub fn open(config: &Config) -> Result<Self, ServiceError> {
        let encoder = build_encoder(config)?;
        Self::with_encoder(config, encoder)
    }

    /// Open both stores with an explicit encoder.
    pub fn with_encoder(config: &Config, encoder: Arc<dyn Encoder>) -> Result<Self, ServiceError> {
        let base = config.base_path();
        let options = config.store_options();

        let jobs = EmbeddingStore::open(base, encoder.clone(), options);
        let resumes = EmbeddingStore::open(base, encoder.clone(), options);
        let engine = MatchingEngine::new(encoder, config.parallelism())?;

        log::info!(
            "Match service ready: {} jobs, {} resumes, model {}",
            jobs.count()?,
            resumes.count()?,
            jobs.model_name()
        );

        Ok(Self {
            jobs,
            resumes,
            engine,
            default_k: config.default_k,
        })
    }

    pub fn jobs(&self) -> &EmbeddingStore<Job> {
        &self.jobs
    }

    pub fn resumes(&self) -> &EmbeddingStore<Resume> {
        &self.resumes
    }

    pub fn engine(&self) -> &MatchingEngine {
        &self.engine
    }

    pub fn add_document(
        &self,
        collection: Collection,
        document: AddDocument,
    ) -> Result<DocumentSummary, ServiceError> {
        let (position, created_at, embedding_model) = match collection {
            Collection::Jobs => {
                if document.user_id.is_some() {
                    return Err(ServiceError::InvalidInput(
                        "user_id only applies to resumes".to_string(),
                    ));
                }
                let attributes = JobAttributes {
                    title: document.title,
                    company: document.company,
                    sections: document.sections,
                };
                let record = self.jobs.add(&document.id, &document.text, attributes)?;
                (record.position, record.created_at, record.embedding_model)
            }
            Collection::Resumes => {
                if document.title.is_some() || document.company.is_some() {
                    return Err(ServiceError::InvalidInput(
                        "title and company only apply to jobs".to_string(),
                    ));
                }
                let attributes = ResumeAttributes {
                    user_id: document.user_id,
                    sections: document.sections,
                };
                let record = self.resumes.add(&document.id, &document.text, attributes)?;
                (record.position, record.created_at, record.embedding_model)
            }
        };

        Ok(DocumentSummary {
            collection,
            id: document.id.trim().to_string(),
            position,
            created_at,
            embedding_model,
        })
    }

    pub fn remove_document(
        &self,
        collection: Collection,
        id: &str,
    ) -> Result<Removed, ServiceError> {
        let remaining = match collection {
            Collection::Jobs => {
                self.jobs.remove(id)?;
                self.jobs.count()?
            }
            Collection::Resumes => {
                self.resumes.remove(id)?;
                self.resumes.count()?
            }
        };

        Ok(Removed {
            collection,
            id: id.to_string(),
            remaining,
        })
    }

    /// Match a stored document or ad-hoc text against the opposite collection.
    pub fn search(&self, request: SearchRequest) -> Result<Matches, ServiceError> {
        let k = self.resolve_k(request.k)?;

        if let Some(user_id) = request.user_id.as_deref() {
            if request.from != Collection::Jobs {
                return Err(ServiceError::InvalidInput(
                    "user_id filters resumes; search from jobs to use it".to_string(),
                ));
            }
            return self.search_user_resumes(user_id, &request.query, k);
        }

        let matches = match (request.from, request.query) {
            (Collection::Jobs, Query::Id(id)) => Matches::Resumes(
                self.engine
                    .best_matches_for(&self.jobs, &id, &self.resumes, k)?,
            ),
            (Collection::Resumes, Query::Id(id)) => Matches::Jobs(
                self.engine
                    .best_matches_for(&self.resumes, &id, &self.jobs, k)?,
            ),
            (Collection::Jobs, Query::Text(text)) => {
                Matches::Resumes(self.engine.best_matches_for_text(&text, &self.resumes, k)?)
            }
            (Collection::Resumes, Query::Text(text)) => {
                Matches::Jobs(self.engine.best_matches_for_text(&text, &self.jobs, k)?)
            }
        };
        Ok(matches)
    }

    fn search_user_resumes(
        &self,
        user_id: &str,
        query: &Query,
        k: usize,
    ) -> Result<Matches, ServiceError> {
        let vector = match query {
            Query::Id(id) => match self.jobs.get_embedding(id) {
                Ok(vector) => vector,
                Err(StoreError::NotFound { .. }) => {
                    log::warn!("job {} not found in embedding store", id);
                    return Ok(Matches::Resumes(Vec::new()));
                }
                Err(err) => return Err(err.into()),
            },
            Query::Text(text) => self.engine.encode_query(text)?,
        };

        let matches = self.engine.best_matches_for_vector(&vector, &self.resumes, k, &|record| {
            Resume::owner(&record.attributes) == Some(user_id)
        })?;
        if matches.is_empty() {
            log::warn!("No resumes found for user {}", user_id);
        }
        Ok(Matches::Resumes(matches))
    }

    pub fn batch_match(&self, request: BatchRequest) -> Result<BatchResponse, ServiceError> {
        let k = self.resolve_k(request.k)?;
        if request.query_ids.is_empty() {
            return Err(ServiceError::InvalidInput("query_ids must not be empty".to_string()));
        }
        let targets = request.target_ids.as_deref();

        let response = match request.from {
            Collection::Jobs => BatchResponse::Resumes(self.engine.batch_match(
                &self.jobs,
                &request.query_ids,
                &self.resumes,
                targets,
                k,
            )?),
            Collection::Resumes => BatchResponse::Jobs(self.engine.batch_match(
                &self.resumes,
                &request.query_ids,
                &self.jobs,
                targets,
                k,
            )?),
        };
        Ok(response)
    }

    /// Score one job against one resume.
    pub fn pair(
        &self,
        job_id: &str,
        resume_id: &str,
    ) -> Result<MatchStatistics<JobAttributes, ResumeAttributes>, ServiceError> {
        Ok(self
            .engine
            .match_statistics(&self.jobs, job_id, &self.resumes, resume_id)?)
    }

    pub fn resumes_for_user(&self, user_id: &str) -> Result<UserResumes, ServiceError> {
        let resume_ids = self.resumes.list_by_user(user_id)?;
        Ok(UserResumes {
            user_id: user_id.to_string(),
            count: resume_ids.len(),
            resume_ids,
        })
    }

    pub fn stats(&self) -> Result<SystemStats, ServiceError> {
        let jobs = self.jobs.stats()?;
        let resumes = self.resumes.stats()?;

        Ok(SystemStats {
            total_possible_matches: jobs.total_documents * resumes.total_documents,
            user_distribution: self.resumes.user_distribution()?,
            performance: PerformanceInfo {
                embedding_model: jobs.model.clone(),
                embedding_dimension: jobs.embedding_dim,
                similarity_metric: "cosine",
                batch_parallelism: self.engine.parallelism(),
            },
            jobs,
            resumes,
        })
    }

    pub fn clear(&self, collection: Collection) -> Result<(), ServiceError> {
        match collection {
            Collection::Jobs => self.jobs.clear()?,
            Collection::Resumes => self.resumes.clear()?,
        }
        Ok(())
    }

    /// Persist both stores.
    pub fn save_all(&self) -> Result<(), ServiceError> {
        self.jobs.save()?;
        self.resumes.save()?;
        Ok(())
    }

    fn resolve_k(&self, k: Option<usize>) -> Result<usize, ServiceError> {
        match k.unwrap_or(self.default_k) {
            0 => Err(ServiceError::InvalidInput("k must be greater than 0".to_string())),
            k => Ok(k),
        }
    }
}
