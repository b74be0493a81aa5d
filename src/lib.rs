//! Embedding store and matching engine for job postings and resumes.
//!
//! Documents are encoded into unit vectors by an injected [`semantic::Encoder`],
//! kept in one [`store::EmbeddingStore`] per collection, and matched across
//! collections by [`matching::MatchingEngine`] using exact cosine similarity.

pub mod cli;
pub mod config;
pub mod lock;
pub mod matching;
pub mod semantic;
pub mod service;
pub mod store;
pub mod web;

#[cfg(test)]
mod tests;
