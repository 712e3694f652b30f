//! Cluster command - group face detections per user

use std::collections::BTreeSet;

use anyhow::Result;
use lumen::FaceClusterer;
use lumen_store::UserId;

use crate::cli::output::{print_json, print_table};
use crate::cli::state::CliState;
use crate::cli::CliContext;

#[derive(Debug)]
pub struct ClusterArgs {
    /// Only this user; every user with detections otherwise
    pub user: Option<String>,
    pub json: bool,
}

pub fn run(args: ClusterArgs, ctx: &CliContext) -> Result<()> {
    let state = CliState::load(&ctx.state_path)?;
    let stores = state.collaborators();
    let clusterer = FaceClusterer::new(
        stores.detections.clone(),
        stores.clusters.clone(),
        ctx.config.faces.whisper_params(),
    )?;

    let users: BTreeSet<UserId> = match args.user {
        Some(user) => [UserId::new(user)].into_iter().collect(),
        None => {
            let snapshot = state.store.snapshot()?;
            snapshot
                .detections
                .iter()
                .map(|d| d.user_id.clone())
                .chain(snapshot.clusters.iter().map(|c| c.user_id.clone()))
                .collect()
        }
    };

    let mut reports = Vec::new();
    for user in &users {
        reports.push(clusterer.cluster_user(user)?);
    }
    state.save()?;

    if args.json {
        return print_json(&reports);
    }
    if reports.is_empty() {
        println!("No face detections to cluster.");
        return Ok(());
    }
    let rows = reports
        .iter()
        .map(|r| {
            vec![
                r.user.clone(),
                r.detections.to_string(),
                r.groups.to_string(),
                r.created.to_string(),
                r.reused.to_string(),
                r.removed.to_string(),
                r.unclustered.to_string(),
            ]
        })
        .collect();
    print_table(
        &["USER", "DETECTIONS", "GROUPS", "CREATED", "REUSED", "REMOVED", "UNCLUSTERED"],
        rows,
    );
    Ok(())
}
