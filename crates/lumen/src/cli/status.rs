//! Status command - queue depths and result counts

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{print_json, print_table};
use crate::cli::state::CliState;
use crate::cli::CliContext;

#[derive(Debug)]
pub struct StatusArgs {
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StorageStatus {
    id: u64,
    root: String,
    owner: String,
}

#[derive(Debug, Serialize)]
struct Status {
    storages: Vec<StorageStatus>,
    queues: BTreeMap<String, usize>,
    tagged_files: usize,
    detections: usize,
    clusters: usize,
}

pub fn run(args: StatusArgs, ctx: &CliContext) -> Result<()> {
    let state = CliState::load(&ctx.state_path)?;

    let mut queues = state.store.queue_depths()?;
    for spec in ctx.config.enabled_models() {
        queues.entry(spec.name.to_string()).or_insert(0);
    }
    let status = Status {
        storages: state
            .library
            .storages()
            .map(|s| StorageStatus {
                id: s.storage_id().get(),
                root: s.root().display().to_string(),
                owner: s.owner().to_string(),
            })
            .collect(),
        queues,
        tagged_files: state.store.tagged_file_count()?,
        detections: state.store.detection_count()?,
        clusters: state.store.all_clusters()?.len(),
    };

    if args.json {
        return print_json(&status);
    }

    if status.storages.is_empty() {
        println!("No storages registered. Run 'lumen scan <dir>' first.");
    } else {
        print_table(
            &["STORAGE", "ROOT", "OWNER"],
            status
                .storages
                .iter()
                .map(|s| vec![s.id.to_string(), s.root.clone(), s.owner.clone()])
                .collect(),
        );
    }
    print_table(
        &["MODEL", "QUEUED"],
        status
            .queues
            .iter()
            .map(|(model, depth)| vec![model.clone(), depth.to_string()])
            .collect(),
    );
    print_table(
        &["TAGGED FILES", "DETECTIONS", "CLUSTERS"],
        vec![vec![
            status.tagged_files.to_string(),
            status.detections.to_string(),
            status.clusters.to_string(),
        ]],
    );
    Ok(())
}
