//! Event command - feed a file-system change through the consistency
//! maintainer
//!
//! `moved` performs the rename itself when the source still exists, so the
//! maintainer sees the tree both before and after the move. A move already
//! done on disk is delivered without the "before" half.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use lumen::ConsistencyMaintainer;
use lumen_store::{FileStore, LocalFileStore, Node};
use tracing::info;

use crate::cli::error::HelpfulError;
use crate::cli::state::CliState;
use crate::cli::CliContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    Created,
    Deleted,
    Written,
    Moved,
}

#[derive(Debug)]
pub struct EventArgs {
    pub kind: EventKind,
    pub path: PathBuf,
    /// Destination of a move
    pub to: Option<PathBuf>,
}

pub fn run(args: EventArgs, ctx: &CliContext) -> Result<()> {
    let state = CliState::load(&ctx.state_path)?;
    let stores = state.collaborators();
    let maintainer = ConsistencyMaintainer::new(&stores, &ctx.config)?;
    let (storage, relative) = state
        .locate(&args.path)?
        .ok_or_else(|| HelpfulError::not_in_storage(&args.path))?;

    match args.kind {
        EventKind::Created => maintainer.node_created(&existing(&storage, &relative, &args.path)?),
        EventKind::Written => maintainer.node_written(&existing(&storage, &relative, &args.path)?),
        EventKind::Deleted => {
            let node = known(&storage, &relative, &args.path)?;
            maintainer.node_deleted(&node);
            if !args.path.exists() {
                storage.forget(&relative)?;
            }
        }
        EventKind::Moved => {
            let to = args.to.as_ref().ok_or_else(|| {
                HelpfulError::new("A move needs a destination")
                    .with_suggestion("TRY: lumen event moved <from> --to <to>")
            })?;
            let (target_storage, target_relative) = state
                .locate(to)?
                .ok_or_else(|| HelpfulError::not_in_storage(to))?;
            if target_storage.storage_id() != storage.storage_id() {
                return Err(HelpfulError::new("Moves between storages are not supported")
                    .with_context(format!(
                        "{} and {} are in different scanned directories",
                        args.path.display(),
                        to.display()
                    ))
                    .with_suggestion(
                        "TRY: Send 'deleted' for the source, then 'created' for the destination",
                    )
                    .into());
            }
            move_node(&maintainer, &storage, &relative, &target_relative, &args.path, to)?;
        }
    }

    state.save()?;
    info!(kind = ?args.kind, path = %args.path.display(), "Event delivered");
    Ok(())
}

fn move_node(
    maintainer: &ConsistencyMaintainer,
    storage: &Arc<LocalFileStore>,
    from: &str,
    to: &str,
    from_path: &Path,
    to_path: &Path,
) -> Result<()> {
    let source = known(storage, from, from_path)?;
    if from_path.exists() {
        maintainer.before_move(&source);
        fs::rename(from_path, to_path).with_context(|| {
            format!("Failed to move {} to {}", from_path.display(), to_path.display())
        })?;
    } else if !to_path.exists() {
        return Err(HelpfulError::path_not_found(to_path).into());
    }
    storage.rename(from, to)?;
    let target = existing(storage, to, to_path)?;
    maintainer.after_move(&source, &target);
    Ok(())
}

/// Node for a path that must be on disk.
fn existing(storage: &LocalFileStore, relative: &str, path: &Path) -> Result<Node> {
    if !path.exists() {
        return Err(HelpfulError::path_not_found(path).into());
    }
    known(storage, relative, path)
}

/// Node for a path on disk or remembered from an earlier scan.
fn known(storage: &LocalFileStore, relative: &str, path: &Path) -> Result<Node> {
    match storage.node_by_path(storage.storage_id(), relative)? {
        Some(node) => Ok(node),
        None => Err(HelpfulError::path_not_found(path)
            .with_suggestion("TRY: Scan the directory so the path is known: lumen scan <dir>")
            .into()),
    }
}
