use anyhow::{bail, Context};
use clap::Parser;
use serde::Serialize;

use jobmatch::{
    cli::{self, Command},
    config::Config,
    lock::FileLock,
    service::{AddDocument, BatchRequest, MatchService, Query, SearchRequest},
    store::Sections,
    web,
};

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_logging();

    let config = Config::load()?;
    let _lock = FileLock::try_acquire(config.base_path()).context("failed to lock base directory")?;
    let service = MatchService::open(&config)?;

    match args.command {
        Command::Daemon {} => web::start_daemon(service, &config),

        Command::Add {
            collection,
            id,
            text,
            title,
            company,
            user_id,
            sections,
        } => {
            let sections: Sections = match sections {
                Some(raw) => {
                    serde_json::from_str(&raw).context("--sections must be a JSON object")?
                }
                None => Sections::new(),
            };
            let document = AddDocument {
                id,
                text,
                title,
                company,
                user_id,
                sections,
            };
            print_json(&service.add_document(collection, document)?)
        }

        Command::Remove { collection, id } => {
            print_json(&service.remove_document(collection, &id)?)
        }

        Command::Search {
            collection,
            id,
            text,
            k,
            user_id,
        } => {
            let query = match (id, text) {
                (Some(id), None) => Query::Id(id),
                (None, Some(text)) => Query::Text(text),
                _ => bail!("pass exactly one of --id or --text"),
            };
            let matches = service.search(SearchRequest {
                from: collection,
                query,
                k,
                user_id,
            })?;
            print_json(&matches)
        }

        Command::Batch {
            from,
            ids,
            targets,
            k,
        } => {
            let report = service.batch_match(BatchRequest {
                from,
                query_ids: ids,
                target_ids: targets,
                k,
            })?;
            print_json(&report)
        }

        Command::Pair { job_id, resume_id } => print_json(&service.pair(&job_id, &resume_id)?),

        Command::Stats {} => print_json(&service.stats()?),

        Command::Users { user_id } => match user_id {
            Some(user_id) => print_json(&service.resumes_for_user(&user_id)?),
            None => print_json(&service.resumes().user_distribution()?),
        },

        Command::Clear { collection, yes } => {
            if !yes {
                bail!(
                    "refusing to delete every document in '{}' without --yes",
                    collection.as_str()
                );
            }
            service.clear(collection)?;
            println!("{} cleared", collection.as_str());
            Ok(())
        }
    }
}
