//! Vector primitives shared by both document stores.
//!
//! # Architecture
//!
//! - `embeddings`: the `Encoder` boundary, fastembed and feature-hashing encoders
//! - `index`: append-only vector index with exact inner-product search
//! - `preprocess`: text preparation for embedding input

pub mod embeddings;
mod index;
mod preprocess;

pub use embeddings::{EmbeddingError, Encoder, FastEmbedEncoder, HashEncoder, HASH_MODEL};
pub use index::{
    cosine_similarity, dot, l2_norm, normalize, IndexError, SearchResult, VectorIndex,
    UNIT_NORM_TOLERANCE,
};
pub use preprocess::{prepare_text, tokenize};

/// Default embedding model (the multilingual MiniLM the matching thresholds were tuned on)
pub const DEFAULT_MODEL: &str = "paraphrase-multilingual-minilm-l12-v2";
