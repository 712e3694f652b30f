//! Scan command - register a directory and queue its eligible files
//!
//! Files that vanished since the previous scan are handed to the
//! consistency maintainer as deletions before the crawl.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use lumen::{ConsistencyMaintainer, CrawlStats, EligibilityFilter, Finder, TreeCrawler};
use lumen_store::{FileStore, UserId, WorkQueue};
use serde::Serialize;
use tracing::info;

use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use crate::cli::state::CliState;
use crate::cli::CliContext;

#[derive(Debug)]
pub struct ScanArgs {
    pub path: PathBuf,
    pub user: String,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ScanSummary {
    storage: u64,
    root: PathBuf,
    owner: String,
    vanished: usize,
    crawl: CrawlStats,
    queued: Vec<(String, usize)>,
}

pub fn run(args: ScanArgs, ctx: &CliContext) -> Result<()> {
    if !args.path.exists() {
        return Err(HelpfulError::path_not_found(&args.path).into());
    }
    if !args.path.is_dir() {
        return Err(HelpfulError::not_a_directory(&args.path).into());
    }

    let mut state = CliState::load(&ctx.state_path)?;
    let owner = UserId::new(args.user);
    let storage = state.add_storage(&args.path, &owner)?;
    let stores = state.collaborators();

    // Vanished entries first, while the registry still knows them
    let maintainer = ConsistencyMaintainer::new(&stores, &ctx.config)?;
    let gone: Vec<String> = storage
        .registry()?
        .entries
        .into_iter()
        .map(|entry| entry.path)
        .filter(|path| !path.is_empty() && !storage.root().join(path).exists())
        .collect();
    for path in &gone {
        if let Some(node) = storage.node_by_path(storage.storage_id(), path)? {
            maintainer.node_deleted(&node);
        }
    }
    for path in &gone {
        storage.forget(path)?;
    }
    let vanished = gone.len();

    let mut finders = Vec::new();
    for modality in maintainer.modalities() {
        let models = ctx
            .config
            .enabled_models_for(modality)
            .iter()
            .map(|m| m.name.to_string())
            .collect();
        let filter = EligibilityFilter::from_settings(&ctx.config.modality(modality)?);
        finders.push(Finder::queueing(filter, models, Arc::clone(&stores.queue)));
    }
    let root = storage.root_node()?;
    let crawl = TreeCrawler::new(stores.files.clone()).crawl(&owner, &root, &finders);

    let mut queued = Vec::new();
    for spec in ctx.config.enabled_models() {
        queued.push((spec.name.to_string(), stores.queue.count(spec.name)?));
    }
    state.save()?;
    info!(storage = %storage.storage_id(), root = %storage.root().display(), "Scan saved");

    let summary = ScanSummary {
        storage: storage.storage_id().get(),
        root: storage.root().to_path_buf(),
        owner: owner.to_string(),
        vanished,
        crawl,
        queued,
    };
    if args.json {
        return print_json(&summary);
    }

    println!(
        "Storage {} at {} (owner {})",
        summary.storage,
        summary.root.display(),
        summary.owner
    );
    print_table(
        &["DIRECTORIES", "FILES", "MATCHES", "PRUNED", "ERRORS", "VANISHED"],
        vec![vec![
            summary.crawl.directories.to_string(),
            summary.crawl.files.to_string(),
            summary.crawl.matches.to_string(),
            summary.crawl.pruned.to_string(),
            summary.crawl.errors.to_string(),
            summary.vanished.to_string(),
        ]],
    );
    print_table(
        &["MODEL", "QUEUED"],
        summary
            .queued
            .iter()
            .map(|(model, count)| vec![model.clone(), count.to_string()])
            .collect(),
    );
    Ok(())
}
