use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use keel_store::{BodyErrorPolicy, Store, StoreConfig, SweepReport};
use keel_types::{FieldMap, Record, TypeTag, Value};
use serde::Serialize;
use tracing::{debug, info};

use crate::cli::*;

/// Key field assumed for types the configuration does not declare.
const DEFAULT_KEY_FIELD: &str = "id";

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Check => cmd_check(config, cli.format),
        Command::Sweep(args) => cmd_sweep(config, args, cli.format),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<StoreConfig> {
    let loaded = match path {
        Some(path) => StoreConfig::load_from_path(path),
        None => StoreConfig::load(),
    };
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(StoreConfig::config_file_path);
    let config = loaded
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    debug!(
        path = %path.display(),
        types = config.types.len(),
        rules = config.disposal.len(),
        "configuration loaded"
    );
    Ok(config)
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CheckSummary {
    auto_clean_up: bool,
    on_body_error: BodyErrorPolicy,
    types: Vec<(String, String)>,
    rules: Vec<String>,
}

fn check(config: StoreConfig) -> anyhow::Result<CheckSummary> {
    let types = config
        .types
        .iter()
        .map(|ty| (ty.name.clone(), ty.key_field.clone()))
        .collect();
    let store = Store::open(config).context("invalid configuration")?;
    Ok(CheckSummary {
        auto_clean_up: store.auto_clean_up(),
        on_body_error: store.body_error_policy(),
        types,
        rules: store
            .disposable_types()
            .into_iter()
            .map(|(_, description)| description)
            .collect(),
    })
}

fn cmd_check(config: StoreConfig, format: OutputFormat) -> anyhow::Result<()> {
    let summary = check(config)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{} Configuration valid", "✓".green().bold());
    println!("  Auto clean-up: {}", on_off(summary.auto_clean_up));
    println!("  On body error: {:?}", summary.on_body_error);
    for (name, key_field) in &summary.types {
        println!("  Type {} keyed by {}", name.cyan(), key_field.yellow());
    }
    if summary.rules.is_empty() {
        println!("  No disposal rules.");
    }
    for (i, rule) in summary.rules.iter().enumerate() {
        println!("  {}. {}", i + 1, rule);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// sweep
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq, Serialize)]
struct TypeSummary {
    type_name: String,
    imported: usize,
    disposed: usize,
    surviving: usize,
}

#[derive(Debug, Serialize)]
struct SweepSummary {
    types: Vec<TypeSummary>,
    swept: bool,
    failures: Vec<String>,
}

/// Import every group of `input`, then sweep once if clean-up is on.
fn sweep_input(store: &Store, input: &Value) -> anyhow::Result<SweepSummary> {
    let Some(groups) = input.as_object() else {
        bail!("input must be a JSON object mapping type names to arrays of records");
    };

    let clean_up = store.auto_clean_up();
    store.set_auto_clean_up(false);
    let imported = import_groups(store, groups);
    store.set_auto_clean_up(clean_up);
    let imported = imported?;

    let report = if clean_up {
        store.sweep_now().context("sweep failed")?
    } else {
        SweepReport::default()
    };

    let mut types = Vec::with_capacity(imported.len());
    for (tag, count) in imported {
        let surviving = store.read(|view| view.count(&tag))?;
        types.push(TypeSummary {
            type_name: tag.to_string(),
            imported: count,
            disposed: report.disposed_of(&tag),
            surviving,
        });
    }

    Ok(SweepSummary {
        types,
        swept: clean_up,
        failures: report
            .failures
            .iter()
            .map(|f| match &f.record {
                Some(id) => format!("{id} ({}): {}", f.stage, f.message),
                None => format!("{} ({}): {}", f.type_tag, f.stage, f.message),
            })
            .collect(),
    })
}

/// Import each group with its configured key field. Returns per-type counts.
fn import_groups(store: &Store, groups: &FieldMap) -> anyhow::Result<Vec<(TypeTag, usize)>> {
    let mut imported = Vec::with_capacity(groups.len());
    for (name, records) in groups {
        let tag = TypeTag::new(name.as_str()).with_context(|| format!("bad type name {name:?}"))?;
        let key_field = store.key_field(&tag).unwrap_or(DEFAULT_KEY_FIELD).to_string();
        let records = store
            .import_with(&tag, records, |fields| {
                Ok(Record::from_fields(tag.clone(), &key_field, fields)?)
            })
            .with_context(|| format!("failed to import {name}"))?;
        imported.push((tag, records.len()));
    }
    Ok(imported)
}

fn cmd_sweep(config: StoreConfig, args: SweepArgs, format: OutputFormat) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let input: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.input.display()))?;

    let store = Store::open_or_exit(config);
    if args.no_clean_up {
        store.set_auto_clean_up(false);
    }
    let summary = sweep_input(&store, &input)?;
    info!(
        types = summary.types.len(),
        failures = summary.failures.len(),
        swept = summary.swept,
        "sweep finished"
    );

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    for ty in &summary.types {
        println!(
            "{:<20} imported {:>5}  disposed {:>5}  surviving {:>5}",
            ty.type_name.cyan(),
            ty.imported,
            ty.disposed.to_string().red(),
            ty.surviving.to_string().green()
        );
    }
    if !summary.swept {
        println!("{}", "Clean-up disabled; nothing swept.".dimmed());
    }
    for failure in &summary.failures {
        println!("  {} {}", "skipped".yellow(), failure);
    }
    Ok(())
}

fn on_off(flag: bool) -> colored::ColoredString {
    if flag {
        "on".green()
    } else {
        "off".red()
    }
}
