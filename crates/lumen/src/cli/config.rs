//! Configuration loading and the `config` command

use std::path::{Path, PathBuf};

use anyhow::Result;
use lumen::{LumenConfig, Modality};
use lumen_logging::lumen_home;

use crate::cli::error::HelpfulError;
use crate::cli::output::{format_size, print_json, print_table};
use crate::cli::CliContext;

#[derive(Debug)]
pub struct ConfigArgs {
    pub json: bool,
}

pub fn default_config_path() -> Result<PathBuf> {
    Ok(lumen_home()?.join("lumen.toml"))
}

pub fn default_state_path() -> Result<PathBuf> {
    Ok(lumen_home()?.join("state.json"))
}

/// Load `explicit` (which must exist) or the default config file if present.
pub fn load(explicit: Option<&Path>) -> Result<(LumenConfig, PathBuf)> {
    let (path, required) = match explicit {
        Some(path) => (path.to_path_buf(), true),
        None => (default_config_path()?, false),
    };
    if required && !path.exists() {
        return Err(HelpfulError::path_not_found(&path).into());
    }
    let config = LumenConfig::load_or_default(&path)
        .map_err(|e| HelpfulError::invalid_config(&path, &e.to_string()))?;
    Ok((config, path))
}

pub fn run(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    if args.json {
        return print_json(&ctx.config);
    }

    println!("# {}", ctx.config_path.display());
    println!("{}", ctx.config.to_toml()?);

    let rows = ctx
        .config
        .enabled_models()
        .into_iter()
        .map(|spec| {
            vec![
                spec.name.to_string(),
                spec.modality.to_string(),
                ctx.config.batch_size_for(spec).to_string(),
                format!("{}s", ctx.config.timeout_for(spec).as_secs()),
                ctx.config.script_for(spec).display().to_string(),
            ]
        })
        .collect();
    print_table(&["MODEL", "MODALITY", "BATCH", "TIMEOUT/FILE", "SCRIPT"], rows);

    let mut rows = Vec::new();
    for modality in Modality::ALL {
        let settings = ctx.config.modality(modality)?;
        rows.push(vec![
            modality.to_string(),
            settings.mime_types.len().to_string(),
            settings.ignore_markers.join(" "),
            match settings.max_size {
                0 => "unbounded".to_string(),
                size => format_size(size),
            },
        ]);
    }
    print_table(&["MODALITY", "FORMATS", "MARKERS", "MAX SIZE"], rows);
    Ok(())
}
