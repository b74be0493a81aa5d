use clap::{ArgGroup, Parser, Subcommand};

use crate::service::Collection;

#[derive(Parser, Debug)]
#[command(version, about = "Embedding store and matcher for jobs and resumes", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a document to a collection
    Add {
        /// Target collection
        #[clap(value_enum)]
        collection: Collection,

        /// Unique document id
        #[clap(long)]
        id: String,

        /// Document text to embed
        #[clap(short, long)]
        text: String,

        /// Job title
        #[clap(long)]
        title: Option<String>,

        /// Hiring company
        #[clap(long)]
        company: Option<String>,

        /// Resume owner
        #[clap(short, long)]
        user_id: Option<String>,

        /// Parsed sections as a JSON object, e.g. '{"skills": ["rust"]}'
        #[clap(long)]
        sections: Option<String>,
    },

    /// Remove a document and rebuild the collection's index
    Remove {
        #[clap(value_enum)]
        collection: Collection,

        id: String,
    },

    /// Match a stored document or ad-hoc text against the opposite collection
    #[clap(group(ArgGroup::new("query").required(true).args(["id", "text"])))]
    Search {
        /// Collection the query belongs to
        #[clap(value_enum)]
        collection: Collection,

        /// Id of a stored document
        #[clap(long)]
        id: Option<String>,

        /// Ad-hoc text, not stored
        #[clap(short, long)]
        text: Option<String>,

        /// Number of matches
        #[clap(short)]
        k: Option<usize>,

        /// Only match resumes owned by this user
        #[clap(short, long)]
        user_id: Option<String>,
    },

    /// Match many stored documents at once
    Batch {
        /// Collection the query ids belong to
        #[clap(long, value_enum, default_value = "jobs")]
        from: Collection,

        /// Comma separated query ids
        #[clap(long, value_delimiter = ',', required = true)]
        ids: Vec<String>,

        /// Comma separated target ids (whole opposite collection if omitted)
        #[clap(long, value_delimiter = ',')]
        targets: Option<Vec<String>>,

        /// Matches per query
        #[clap(short)]
        k: Option<usize>,
    },

    /// Score one job against one resume
    Pair { job_id: String, resume_id: String },

    /// Show statistics for both collections
    Stats {},

    /// Show resume counts per user, or the resumes of one user
    Users { user_id: Option<String> },

    /// Delete every document of a collection
    Clear {
        #[clap(value_enum)]
        collection: Collection,

        /// Auto confirm
        #[clap(short, long, default_value = "false")]
        yes: bool,
    },

    /// Serve the HTTP API
    Daemon {},
}
