//! Offline batch converter - Main Entry Point
//!
//! Maps one set of source nodes into atlas space without persisting anything:
//!
//! ```text
//! tracemap <config.toml> <nodes.json> <registration.nrrd> [output.json]
//! ```
//!
//! Without an output path the converted tracing is printed to stdout. Exit
//! codes follow the worker contract: 0 on success, 1 when an input is
//! missing, 2 on any other failure.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tracemap::atlas::RegionCatalog;
use tracemap::config::ServiceConfig;
use tracemap::storage::MemoryStore;
use tracemap::transform::{NrrdGridProvider, NullProgress, RunSummary, TransformPipeline};
use tracemap::types::{RegistrationTransform, SourceNode};
use tracemap::TransformError;

fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tracemap=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 4 || args.len() > 5 {
        eprintln!(
            "Usage: {} <config.toml> <nodes.json> <registration.nrrd> [output.json]",
            args.first().map(String::as_str).unwrap_or("tracemap")
        );
        return ExitCode::from(2);
    }

    let result = run(
        Path::new(&args[1]),
        Path::new(&args[2]),
        Path::new(&args[3]),
        args.get(4).map(PathBuf::from),
    );
    match result {
        Ok(summary) => {
            tracing::info!(
                "Converted {} nodes ({} faulted)",
                summary.output_nodes,
                summary.faulted_nodes
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!("Conversion failed: {:#}", err);
            let declined = err
                .downcast_ref::<TransformError>()
                .map(TransformError::is_declined)
                .unwrap_or(false);
            ExitCode::from(if declined { 1 } else { 2 })
        }
    }
}

fn run(
    config_path: &Path,
    nodes_path: &Path,
    field_path: &Path,
    output_path: Option<PathBuf>,
) -> anyhow::Result<RunSummary> {
    let config = ServiceConfig::load_or_default(config_path);

    let nodes = load_nodes(nodes_path)?;
    tracing::info!("Loaded {} source nodes from {}", nodes.len(), nodes_path.display());
    let registration =
        RegistrationTransform::new("batch", field_path).with_offset(config.batch.offset);

    let catalog = match &config.atlas.ontology {
        Some(path) => RegionCatalog::load(path)?,
        None => {
            tracing::warn!("No ontology configured; regions will not resolve");
            RegionCatalog::new()
        }
    };

    let legacy_volume = config.atlas.ccfv25_volume.clone().ok_or_else(|| {
        TransformError::InputMissing("atlas.ccfv25_volume is not configured".to_string())
    })?;
    let alternate_volume = config.atlas.ccfv30_volume.clone().ok_or_else(|| {
        TransformError::InputMissing("atlas.ccfv30_volume is not configured".to_string())
    })?;

    let provider = NrrdGridProvider::new(legacy_volume, alternate_volume);
    let pipeline = TransformPipeline::new(Arc::new(provider), Arc::new(MemoryStore::new()));
    let output = pipeline.run(None, &nodes, &registration, &catalog, &mut NullProgress)?;

    let rendered = serde_json::to_string_pretty(&output).context("serializing output")?;
    match output_path {
        Some(path) => {
            std::fs::write(&path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            tracing::info!("Wrote transformed tracing to {}", path.display());
        }
        None => println!("{}", rendered),
    }
    Ok(output.summary)
}

fn load_nodes(path: &Path) -> anyhow::Result<Vec<SourceNode>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        TransformError::InputMissing(format!("nodes file {}: {}", path.display(), e))
    })?;
    let nodes: Vec<SourceNode> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    Ok(nodes)
}
