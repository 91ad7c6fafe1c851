//! graft - merge parallel corpus structures into one
//!
//! Loads the named structure snapshots, lets one producer per structure
//! deliver its documents in the proposed import order, and stores the
//! merged base structure.
//!
//! # Usage
//!
//! ```bash
//! # Merge three annotation layers of the same corpus, first one is the base
//! graft tokens pos lemma --store ./data
//!
//! # Concatenate documents named in a manual mapping
//! graft tokens --mode append --map "interview=part1,part2,part3"
//!
//! # With configuration file and a separate output name
//! graft tokens pos --config config/graft.toml --output merged
//!
//! # Only show the computed groups and import order
//! graft tokens pos --dry-run
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use graft_core::{Identifier, Project, StructureSnapshot};
use graft_merge::{split_sources, DocumentHost, DocumentMapping, FusionMode, MergeConfig, MergeEngine, MergeSummary, ResidencyBudget};
use graft_storage::{JsonDirStorage, Storage};

/// graft - merge parallel corpus structures into one
#[derive(Parser, Debug)]
#[command(name = "graft")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Names of the stored structures to merge
    #[arg(required = true)]
    structures: Vec<String>,

    /// Directory holding the structure snapshots
    #[arg(long, env = "GRAFT_STORE", default_value = "./graft-data")]
    store: PathBuf,

    /// Configuration file path
    #[arg(short, long, env = "GRAFT_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "GRAFT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Fusion mode (structural, append)
    #[arg(long, env = "GRAFT_MODE")]
    mode: Option<FusionMode>,

    /// Position of the base structure among the given structures
    #[arg(long, env = "GRAFT_BASE")]
    base: Option<usize>,

    /// Manual mapping TARGET=SOURCE[,SOURCE...]; may be repeated
    #[arg(long = "map", value_name = "TARGET=SOURCES", value_parser = parse_mapping)]
    mappings: Vec<DocumentMapping>,

    /// Maximum number of documents resident in memory at once
    #[arg(long, env = "GRAFT_MAX_RESIDENT", default_value = "16")]
    max_resident: usize,

    /// Maximum number of concurrently running fusion tasks
    #[arg(long, env = "GRAFT_MAX_FUSIONS")]
    max_concurrent_fusions: Option<usize>,

    /// Keep the names of manually mapped targets
    #[arg(long)]
    keep_names: bool,

    /// Name to store the merged structure under (default: the base's name)
    #[arg(short, long, env = "GRAFT_OUTPUT")]
    output: Option<String>,

    /// Print groups and import order without merging
    #[arg(long)]
    dry_run: bool,
}

fn parse_mapping(raw: &str) -> std::result::Result<DocumentMapping, String> {
    let (target, sources) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected TARGET=SOURCES, got '{}'", raw))?;
    let target = target.trim();
    if target.is_empty() {
        return Err("mapping target cannot be empty".to_string());
    }
    let sources = split_sources(sources);
    if sources.is_empty() {
        return Err(format!("mapping '{}' has no sources", target));
    }
    Ok(DocumentMapping::new(target, sources))
}

/// File configuration with command line overrides applied
fn load_config(args: &Args) -> Result<MergeConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read configuration {}", path.display()))?;
            toml::from_str(&raw).with_context(|| format!("Invalid configuration {}", path.display()))?
        }
        None => MergeConfig::default(),
    };

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(base) = args.base {
        config.base = base;
    }
    if let Some(limit) = args.max_concurrent_fusions {
        config.max_concurrent_fusions = limit;
    }
    if args.keep_names {
        config.rename_targets = false;
    }
    config.mappings.extend(args.mappings.iter().cloned());

    config.validate()?;
    Ok(config)
}

async fn load_project(storage: &dyn Storage, names: &[String]) -> Result<Arc<Project>> {
    let project = Project::new();
    for name in names {
        let Some(snapshot) = storage.load(name).await? else {
            anyhow::bail!("Structure '{}' not found in storage", name);
        };
        let structure = project.add_structure(snapshot.into_structure()?);
        info!(
            structure = %name,
            corpora = structure.corpus_count(),
            documents = structure.document_count(),
            "Loaded structure"
        );
    }
    Ok(Arc::new(project))
}

/// One producer per structure, delivering documents in the proposed order
fn spawn_producers(
    project: &Project,
    engine: &mut MergeEngine,
    host: Arc<ResidencyBudget>,
    arrivals: mpsc::Sender<Identifier>,
) -> Result<Vec<JoinHandle<usize>>> {
    let mut handles = Vec::new();
    for structure in project.structures() {
        let order = match engine.propose_import_order(structure.id())? {
            Some(order) => order,
            None => structure.documents().iter().map(|d| d.id()).collect(),
        };
        let name = structure.name().to_string();
        let host = host.clone();
        let arrivals = arrivals.clone();

        handles.push(tokio::spawn(async move {
            let mut delivered = 0;
            for id in order {
                host.request_admission(&id).await;
                if arrivals.send(id).await.is_err() {
                    warn!(structure = %name, "Merge engine stopped, producer exits");
                    host.release_residency(&id);
                    break;
                }
                delivered += 1;
            }
            debug!(structure = %name, documents = delivered, "Producer finished");
            delivered
        }));
    }
    Ok(handles)
}

async fn merge(
    storage: &dyn Storage,
    names: &[String],
    config: MergeConfig,
    max_resident: usize,
    output: Option<&str>,
) -> Result<MergeSummary> {
    let project = load_project(storage, names).await?;
    let host = Arc::new(ResidencyBudget::new(max_resident));
    let mut engine = MergeEngine::new(project.clone(), config, host.clone())?;
    engine.prepare()?;
    let base = engine.base();

    let (tx, rx) = mpsc::channel(max_resident.max(1));
    let producers = spawn_producers(&project, &mut engine, host.clone(), tx)?;

    let summary = match engine.run(rx).await {
        Ok(summary) => summary,
        Err(e) => {
            for producer in &producers {
                producer.abort();
            }
            return Err(e.into());
        }
    };
    let mut delivered = 0;
    for producer in producers {
        delivered += producer.await?;
    }

    let Some(structure) = project.structure(base) else {
        anyhow::bail!("Base structure vanished during the merge");
    };
    let output = output.unwrap_or_else(|| structure.name());
    storage.save(output, &StructureSnapshot::capture(&structure)).await?;

    info!(
        output = %output,
        delivered,
        groups = summary.groups,
        fused = summary.fused_documents,
        deleted = summary.deleted_documents,
        synthesized = summary.synthesized_nodes,
        budget_raised_to = ?summary.budget_raised_to,
        residual = summary.residual_structures,
        "Merged structure stored"
    );
    Ok(summary)
}

async fn dry_run(storage: &dyn Storage, names: &[String], config: MergeConfig, max_resident: usize) -> Result<()> {
    let project = load_project(storage, names).await?;
    let host = Arc::new(ResidencyBudget::new(max_resident));
    let mut engine = MergeEngine::new(project.clone(), config, host.clone())?;
    engine.prepare()?;

    match engine.index() {
        Some(index) => {
            for group in index.groups() {
                let members: Vec<String> = group
                    .members()
                    .iter()
                    .filter_map(|id| project.node(id))
                    .map(|node| node.global_id())
                    .collect();
                println!("{} {} '{}': {}", group.id(), group.role(), group.key(), members.join(", "));
            }
        }
        None => println!("Nothing to merge: single structure without mapping"),
    }

    for structure in project.structures() {
        if let Some(order) = engine.propose_import_order(structure.id())? {
            let names: Vec<String> = order
                .iter()
                .filter_map(|id| project.node(id))
                .map(|node| node.path())
                .collect();
            println!("{}: {}", structure.name(), names.join(" "));
        }
    }
    println!("resident budget: {}", host.max_resident_documents());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    let config = load_config(&args)?;
    let storage = JsonDirStorage::open(&args.store).await?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        structures = args.structures.len(),
        mode = %config.mode,
        store = %args.store.display(),
        "Starting graft"
    );

    if args.dry_run {
        return dry_run(&storage, &args.structures, config, args.max_resident).await;
    }
    merge(&storage, &args.structures, config, args.max_resident, args.output.as_deref()).await?;
    Ok(())
}
