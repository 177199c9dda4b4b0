//! Point d'entrée CLI pour bikeparking

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;

use cli::{Commands, RunArgs};

/// Fusionner les stationnements vélo municipaux et OpenStreetMap
#[derive(Parser)]
#[command(name = "bikeparking")]
#[command(author, version)]
#[command(about = "Fusionner les stationnements vélo du catalogue municipal et d'OpenStreetMap")]
#[command(long_about = "Produit une collection GeoJSON unique et dédupliquée à partir des collections normalisées.\n\nPar défaut, exécute la fusion et publie les fichiers d'affichage.")]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Sous-commande (défaut: fusion)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments de la fusion (commande par défaut)
    #[command(flatten)]
    run: Option<RunArgs>,
}

fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    // Configurer le logging
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Some(Commands::CheckExclusions {
            config,
            input_dir,
            exclusions,
        }) => {
            info!("Checking exclusion registry");
            cli::cmd_check_exclusions(config.as_deref(), input_dir, exclusions)?;
        }
        Some(Commands::IdChanges {
            first,
            second,
            dataset,
            id_field,
            output,
        }) => {
            info!(first = %first.display(), second = %second.display(), "Comparing snapshots");
            cli::cmd_id_changes(&first, &second, &dataset, &id_field, output.as_deref())?;
        }
        None => {
            // Commande par défaut: fusion
            cli::cmd_run(cli.run.unwrap_or_default())?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
