//! Rapport de run
//!
//! Collecte les compteurs de chaque étape, les avertissements et les fichiers
//! publiés, pour affichage console et sauvegarde JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use fusion::FusionStats;
use serde::Serialize;

use crate::export::publish::PublishedFile;

/// Statut global du run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Publication sans avertissement
    Success,
    /// Publication avec features écartées ou sources manquantes
    PartialSuccess,
    /// Run annulé, rien n'est publié
    Failed,
}

/// Avertissement de run
#[derive(Debug, Clone, Serialize)]
pub struct RunWarning {
    /// Source concernée (optionnel)
    pub source: Option<String>,
    pub message: String,
}

/// Rapport complet d'un run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Date locale du run
    pub run_date: String,
    pub duration_secs: f64,
    pub status: RunStatus,

    /// Features lues par source
    pub sources: BTreeMap<String, usize>,

    /// Compteurs du moteur de fusion
    pub fusion: Option<FusionStats>,

    pub published: Vec<PublishedFile>,
    pub archive: Option<PathBuf>,

    /// Empreinte blake3 de la collection complète publiée
    pub checksum: Option<String>,

    pub warnings: Vec<RunWarning>,
    /// Erreur fatale
    pub error: Option<String>,
}

impl RunReport {
    pub fn new(run_date: &str) -> Self {
        Self {
            run_date: run_date.to_string(),
            duration_secs: 0.0,
            status: RunStatus::Success,
            sources: BTreeMap::new(),
            fusion: None,
            published: Vec::new(),
            archive: None,
            checksum: None,
            warnings: Vec::new(),
            error: None,
        }
    }

    /// Enregistre une source lue
    pub fn record_source(&mut self, name: &str, features: usize) {
        self.sources.insert(name.to_string(), features);
    }

    pub fn record_warning(&mut self, source: Option<&str>, message: impl Into<String>) {
        self.warnings.push(RunWarning {
            source: source.map(str::to_string),
            message: message.into(),
        });
    }

    /// Enregistre les compteurs de la fusion
    pub fn record_fusion(&mut self, stats: FusionStats) {
        if stats.rejected > 0 {
            self.record_warning(None, format!("{} malformed features skipped", stats.rejected));
        }
        if stats.resolution.ambiguous_refs > 0 {
            self.record_warning(
                None,
                format!("{} ambiguous cross-references", stats.resolution.ambiguous_refs),
            );
        }
        if stats.resolution.unmatched_exclusions > 0 {
            self.record_warning(
                None,
                format!(
                    "{} exclusion entries matched no feature",
                    stats.resolution.unmatched_exclusions
                ),
            );
        }
        self.fusion = Some(stats);
    }

    /// Enregistre les fichiers publiés ; le premier est la collection complète
    pub fn record_published(&mut self, files: Vec<PublishedFile>) {
        self.checksum = files.first().map(|f| f.checksum.clone());
        self.published = files;
    }

    /// Enregistre une erreur fatale
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final
    pub fn finalize(&mut self) {
        self.status = if self.error.is_some() {
            RunStatus::Failed
        } else if !self.warnings.is_empty() {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        };
    }

    /// Nombre de features publiées dans la collection complète
    pub fn total_features(&self) -> usize {
        self.fusion.as_ref().map_or(0, FusionStats::total)
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("FUSION REPORT - {}", self.run_date);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        if !self.sources.is_empty() {
            println!("\n--- SOURCES ---");
            for (name, count) in &self.sources {
                println!("  {}: {} features", name, count);
            }
        }

        if let Some(stats) = &self.fusion {
            let r = &stats.resolution;
            println!("\n--- OVERLAP ---");
            println!(
                "Crowd-sourced: {} retained, {} excluded (municipal operator)",
                r.crowd_retained, r.crowd_excluded_ownership
            );
            println!(
                "Municipal: {} retained, {} excluded (registry), {} superseded by ref, {} superseded by proximity",
                r.municipal_retained,
                r.municipal_excluded_registry,
                r.municipal_superseded_ref,
                r.municipal_superseded_proximity
            );

            println!("\n--- MERGES ---");
            println!(
                "Clusters: {} groups from {} features",
                stats.cluster.groups, stats.cluster.members
            );
            println!(
                "Cross-dataset: {} groups, {} merges, {} in exempt areas",
                stats.dedup.groups, stats.dedup.merges, stats.dedup.exempt
            );

            println!("\n--- OUTPUT ---");
            println!(
                "Features: {} ({} crowd-sourced, {} municipal)",
                stats.total(),
                stats.crowd,
                stats.municipal
            );
        }

        for file in &self.published {
            println!("  {} ({} features)", file.path.display(), file.features);
        }
        if let Some(checksum) = &self.checksum {
            println!("Checksum: {}", checksum);
        }
        if let Some(archive) = &self.archive {
            println!("Archive: {}", archive.display());
        }

        if !self.warnings.is_empty() {
            println!("\n--- WARNINGS ({}) ---", self.warnings.len());
            for w in self.warnings.iter().take(10) {
                match &w.source {
                    Some(source) => println!("  [{}] {}", source, w.message),
                    None => println!("  {}", w.message),
                }
            }
            if self.warnings.len() > 10 {
                println!("  ... and {} more", self.warnings.len() - 10);
            }
        }

        if let Some(error) = &self.error {
            println!("\n--- ERROR ---");
            println!("  {}", error);
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        match &self.error {
            Some(error) => format!("{}: failed ({})", self.run_date, error),
            None => format!(
                "{}: {} features published, {} warnings",
                self.run_date,
                self.total_features(),
                self.warnings.len()
            ),
        }
    }
}
