//! Classify command - run queued files through their models
//!
//! Each model gets its own blocking task; distinct models run concurrently.
//! Ctrl-C cancels every running model, killing the child processes.

use anyhow::{Context, Result};
use comfy_table::Color;
use lumen::classify::model_spec;
use lumen::{build_job, RunReport};
use lumen_worker::CancellationToken;
use tracing::{info, warn};

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_elapsed, print_json, print_table_colored};
use crate::cli::state::CliState;
use crate::cli::CliContext;

#[derive(Debug)]
pub struct ClassifyArgs {
    pub models: Vec<String>,
    /// Keep running batches until a batch makes no progress
    pub drain: bool,
    pub json: bool,
}

pub fn run(args: ClassifyArgs, ctx: &CliContext) -> Result<()> {
    let models: Vec<String> = if args.models.is_empty() {
        ctx.config
            .enabled_models()
            .iter()
            .map(|m| m.name.to_string())
            .collect()
    } else {
        for name in &args.models {
            if model_spec(name).is_none() {
                return Err(HelpfulError::unknown_model(name).into());
            }
        }
        args.models.clone()
    };
    if which::which(&ctx.config.runtime).is_err() {
        return Err(HelpfulError::runtime_not_found(&ctx.config.runtime).into());
    }

    let state = CliState::load(&ctx.state_path)?;
    let stores = state.collaborators();
    let cancel = CancellationToken::new();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let reports = runtime.block_on(async {
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping models");
                    cancel.cancel();
                }
            })
        };

        let mut handles = Vec::new();
        for model in &models {
            let job = build_job(model, &ctx.config, &stores, cancel.clone())?;
            let drain = args.drain;
            let cancel = cancel.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut reports = Vec::new();
                loop {
                    let report = job.run()?;
                    let progressed = report.applied + report.rejected + report.skipped > 0;
                    let again = drain
                        && progressed
                        && report.succeeded()
                        && report.remaining > 0
                        && !cancel.is_cancelled();
                    reports.push(report);
                    if !again {
                        return Ok::<_, lumen::LumenError>(reports);
                    }
                }
            }));
        }

        let mut reports: Vec<RunReport> = Vec::new();
        for handle in handles {
            reports.extend(handle.await.context("Model task panicked")??);
        }
        watcher.abort();
        Ok::<_, anyhow::Error>(reports)
    })?;

    state.save()?;
    info!(runs = reports.len(), "Classification finished");

    if args.json {
        return print_json(&reports);
    }
    let rows = reports
        .iter()
        .map(|r| {
            let (status, color) = match &r.error {
                None => ("ok".to_string(), Some(Color::Green)),
                Some(e) => (e.clone(), Some(Color::Red)),
            };
            vec![
                (r.model.clone(), None),
                (r.batch.to_string(), None),
                (r.applied.to_string(), None),
                (r.rejected.to_string(), None),
                (r.skipped.to_string(), None),
                (r.unresolved.to_string(), None),
                (r.remaining.to_string(), None),
                (format_elapsed(r.elapsed_ms()), None),
                (status, color),
            ]
        })
        .collect();
    print_table_colored(
        &[
            "MODEL", "BATCH", "APPLIED", "REJECTED", "SKIPPED", "UNRESOLVED", "REMAINING",
            "ELAPSED", "STATUS",
        ],
        rows,
    );
    Ok(())
}
