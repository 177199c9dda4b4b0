//! Définition et implémentation des commandes CLI
//!
//! - commande par défaut : fusion et publication des fichiers d'affichage
//! - `check-exclusions` : entrées du registre sans objet municipal
//! - `id-changes` : changements d'identifiants entre deux instantanés

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use bikeparking::config::{Config, RunPaths};
use bikeparking::load::{load_snapshot, load_sources};
use bikeparking::pipeline::{load_registry, run, RunOptions};
use bikeparking::report::RunStatus;
use clap::{Args, Subcommand};
use fusion::snapshot::{compare, SnapshotDiff};
use fusion::xref::MunicipalIds;
use fusion::{ExclusionEntry, ExclusionRegistry, SourceCollection, SourceKind};
use tracing::info;

#[derive(Subcommand)]
pub enum Commands {
    /// List exclusion entries that match no municipal feature
    CheckExclusions {
        /// Config preset name (toronto) or path to a JSON config
        #[arg(long)]
        config: Option<String>,

        /// Directory of normalized collections (défaut : env BIKEPARKING_INPUT_DIR)
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Exclusion registry (défaut : env BIKEPARKING_EXCLUSIONS)
        #[arg(short, long)]
        exclusions: Option<PathBuf>,
    },

    /// Compare two snapshots of one dataset and report id changes
    IdChanges {
        /// First (older) snapshot
        first: PathBuf,

        /// Second (newer) snapshot
        second: PathBuf,

        /// Dataset name
        #[arg(long, default_value = "bicycle-parking-high-capacity-outdoor")]
        dataset: String,

        /// Property holding the primary key
        #[arg(long, default_value = "ID")]
        id_field: String,

        /// Save the full diff as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments de la commande par défaut (fusion)
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Config preset name (toronto) or path to a JSON config
    #[arg(long)]
    pub config: Option<String>,

    /// Directory of normalized collections (défaut : env BIKEPARKING_INPUT_DIR)
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    /// Output directory (défaut : env BIKEPARKING_OUTPUT_DIR)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Exclusion registry (défaut : env BIKEPARKING_EXCLUSIONS)
    #[arg(short, long)]
    pub exclusions: Option<PathBuf>,

    /// Archive inputs and outputs as tar.bz2
    #[arg(long)]
    pub archive: bool,

    /// Save the run report as JSON
    #[arg(long)]
    pub report: Option<PathBuf>,
}

const DEFAULT_PRESET: &str = "toronto";

fn load_config(name: Option<&str>) -> Result<Config> {
    let name = name.unwrap_or(DEFAULT_PRESET);
    Config::resolve(name).with_context(|| format!("Failed to load config {}", name))
}

/// Exécute la fusion et publie les fichiers
pub fn cmd_run(args: RunArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let paths = RunPaths::from_env().with_overrides(args.input_dir, args.output_dir, args.exclusions);

    info!(
        input = %paths.input_dir.display(),
        output = %paths.output_dir.display(),
        sources = config.sources.len(),
        "Starting fusion run"
    );

    let report = run(
        &config,
        &paths,
        RunOptions {
            archive: args.archive,
        },
        chrono::Utc::now(),
    )?;

    report.display();
    if let Some(path) = &args.report {
        report
            .save_to_file(path)
            .with_context(|| format!("Failed to save report {}", path.display()))?;
        info!(path = %path.display(), "Report saved");
    }

    if report.status == RunStatus::Failed {
        anyhow::bail!("Run failed: {}", report.summary());
    }

    println!("\n{}", report.summary());
    Ok(())
}

/// Liste les entrées du registre sans correspondance
pub fn cmd_check_exclusions(
    config_name: Option<&str>,
    input_dir: Option<PathBuf>,
    exclusions: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_name)?;
    let paths = RunPaths::from_env().with_overrides(input_dir, None, exclusions);
    if paths.exclusions.is_none() {
        anyhow::bail!("No exclusion registry given (--exclusions or BIKEPARKING_EXCLUSIONS)");
    }

    let registry = load_registry(&paths, &config.fusion.authority)?;
    let sources = load_sources(&config, &paths, &config.fusion.authority)?;
    let unmatched = unmatched_exclusions(&registry, &sources, &config.fusion.authority);

    println!("\n{}", "=".repeat(60));
    println!("EXCLUSION CHECK - {} entries", registry.len());
    println!("{}", "=".repeat(60));

    if unmatched.is_empty() {
        println!("\nAll entries match a municipal feature");
    } else {
        println!("\n--- UNMATCHED ({}) ---", unmatched.len());
        for entry in &unmatched {
            println!("  {} [{}] {}", entry.target(), entry.reason, entry.notes);
        }
    }

    Ok(())
}

/// Entrées du registre absentes des sources municipales, dans l'ordre du registre
fn unmatched_exclusions<'a>(
    registry: &'a ExclusionRegistry,
    sources: &[SourceCollection],
    authority: &str,
) -> Vec<&'a ExclusionEntry> {
    let municipal = sources
        .iter()
        .filter(|s| s.kind == SourceKind::Municipal)
        .flat_map(|s| s.features.iter());
    registry.unmatched(&MunicipalIds::build(municipal, authority))
}

/// Compare deux instantanés d'un jeu
pub fn cmd_id_changes(
    first: &Path,
    second: &Path,
    dataset: &str,
    id_field: &str,
    output: Option<&Path>,
) -> Result<()> {
    let before = load_snapshot(first, dataset, id_field)?;
    let after = load_snapshot(second, dataset, id_field)?;
    info!(first = before.len(), second = after.len(), dataset, "Snapshots loaded");

    let diff = compare(&before, &after);
    display_diff(dataset, &diff);

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&diff)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Diff saved");
    }

    Ok(())
}

fn display_diff(dataset: &str, diff: &SnapshotDiff) {
    println!("\n{}", "=".repeat(60));
    println!("ID CHANGES - {}", dataset);
    println!("{}", "=".repeat(60));

    println!(
        "\nDuplicates: {} in first snapshot, {} in second",
        diff.first_duplicates.len(),
        diff.second_duplicates.len()
    );
    println!("No match in second snapshot: {}", diff.no_match.len());
    println!("Id changes: {}", diff.id_changes.len());

    if !diff.id_changes.is_empty() {
        println!("\n--- ID CHANGES ---");
        for change in diff.id_changes.iter().take(20) {
            println!(
                "  ({:.7}, {:.7}) {} -> {}",
                change.lon,
                change.lat,
                change.before.join(";"),
                change.after.join(";")
            );
        }
        if diff.id_changes.len() > 20 {
            println!("  ... and {} more", diff.id_changes.len() - 20);
        }
    }

    if diff.is_clean() {
        println!("\nSnapshots are consistent");
    }
}
