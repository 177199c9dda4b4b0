//! Run complet : lecture, fusion, publication, archivage

use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fusion::{fuse, ExclusionRegistry, FusionContext};
use tracing::{info, warn};

use crate::config::{Config, RunPaths};
use crate::export::archive::{collect_inputs, create_archive, local_date, ArchiveContent};
use crate::export::{publish, WriteOptions};
use crate::load::load_sources;
use crate::report::RunReport;

/// Options d'un run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Archive `.tar.bz2` des entrées et sorties
    pub archive: bool,
}

/// Charge le registre d'exclusions ; absent si aucun chemin n'est configuré
pub fn load_registry(paths: &RunPaths, authority: &str) -> Result<ExclusionRegistry> {
    match &paths.exclusions {
        Some(path) => {
            let registry = ExclusionRegistry::load(path, authority)
                .with_context(|| format!("Failed to load exclusions: {}", path.display()))?;
            info!(entries = registry.len(), path = %path.display(), "Exclusion registry loaded");
            Ok(registry)
        }
        None => {
            warn!("No exclusion registry configured");
            Ok(ExclusionRegistry::empty())
        }
    }
}

/// Exécute un run
///
/// Les erreurs de configuration ou d'I/O sont retournées telles quelles. Un
/// refus du moteur (source vide, identifiant dupliqué...) donne un rapport
/// `Failed` et aucun fichier n'est écrit.
pub fn run(
    config: &Config,
    paths: &RunPaths,
    options: RunOptions,
    now: DateTime<Utc>,
) -> Result<RunReport> {
    let start = Instant::now();
    let date = local_date(now, &config.output.timezone)?;
    let mut report = RunReport::new(&date.format("%Y-%m-%d").to_string());

    let fusion_config = config.fusion_config()?;
    let registry = load_registry(paths, &fusion_config.authority)?;
    let authority = fusion_config.authority.clone();
    let ctx = FusionContext::new(fusion_config, registry).context("Invalid fusion configuration")?;

    let sources = load_sources(config, paths, &authority)?;
    for source in &sources {
        report.record_source(&source.source_id, source.len());
        if source.is_empty() {
            report.record_warning(Some(&source.source_id), "No features loaded");
        }
    }

    let fused = match fuse(&ctx, sources) {
        Ok(fused) => fused,
        Err(e) => {
            warn!(error = %e, "Fusion aborted, previous outputs kept");
            report.fail(e.to_string());
            report.set_duration(start.elapsed());
            report.finalize();
            return Ok(report);
        }
    };

    info!(
        features = fused.len(),
        crowd = fused.stats.crowd,
        municipal = fused.stats.municipal,
        "Fusion complete"
    );

    let write_options = WriteOptions {
        crowd_as_points: config.output.crowd_as_points,
    };
    let published = publish(&fused, &paths.output_dir, write_options)?;
    report.record_fusion(fused.stats);

    if options.archive {
        let mut inputs = collect_inputs(&paths.input_dir)?;
        inputs.retain(|path| path.is_file());
        let content = ArchiveContent {
            inputs,
            registry: paths.exclusions.clone().filter(|p| p.is_file()),
            outputs: published.iter().map(|f| f.path.clone()).collect(),
        };
        report.archive = Some(create_archive(&paths.output_dir, date, &content)?);
    }

    report.record_published(published);
    report.set_duration(start.elapsed());
    report.finalize();

    Ok(report)
}
