//! Document records and the two document kinds (jobs and resumes).

use std::collections::BTreeMap;
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Parsed sections of a document, keyed by section name ("skills",
/// "experience", "responsibilities", ...).
pub type Sections = BTreeMap<String, serde_json::Value>;

/// A kind of document kept in its own store.
///
/// Both stores share every algorithm; a kind only fixes the on-disk
/// directory name and the shape of the structured attributes.
pub trait DocumentKind: Send + Sync + 'static {
    /// Plural name, used as the store directory ("jobs", "resumes")
    const NAME: &'static str;

    /// Singular name for log lines
    const LABEL: &'static str;

    /// Whether `owner()` is meaningful for this kind
    const TRACKS_OWNER: bool = false;

    type Attributes: Clone
        + Debug
        + Default
        + PartialEq
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static;

    /// The user a document belongs to, if the kind tracks one.
    fn owner(_attributes: &Self::Attributes) -> Option<&str> {
        None
    }
}

/// Job postings.
#[derive(Debug, Clone, Copy)]
pub struct Job;

/// Candidate resumes.
#[derive(Debug, Clone, Copy)]
pub struct Resume;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default)]
    pub sections: Sections,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub sections: Sections,
}

impl DocumentKind for Job {
    const NAME: &'static str = "jobs";
    const LABEL: &'static str = "job";
    type Attributes = JobAttributes;
}

impl DocumentKind for Resume {
    const NAME: &'static str = "resumes";
    const LABEL: &'static str = "resume";
    const TRACKS_OWNER: bool = true;
    type Attributes = ResumeAttributes;

    fn owner(attributes: &ResumeAttributes) -> Option<&str> {
        attributes.user_id.as_deref()
    }
}

/// Metadata for one stored document.
///
/// `position` always equals the row of the document's vector in the store's
/// index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord<A> {
    pub external_id: String,
    pub position: usize,
    pub source_text: String,
    pub attributes: A,
    pub created_at: DateTime<Utc>,
    /// Model that produced the stored vector
    pub embedding_model: String,
}
