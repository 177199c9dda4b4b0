//! Configuration du système

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fusion::{FusionConfig, SourceKind};
use geo::{LineString, Polygon};
use serde::{Deserialize, Serialize};

/// Variables d'environnement des chemins
pub const ENV_INPUT_DIR: &str = "BIKEPARKING_INPUT_DIR";
pub const ENV_OUTPUT_DIR: &str = "BIKEPARKING_OUTPUT_DIR";
pub const ENV_EXCLUSIONS: &str = "BIKEPARKING_EXCLUSIONS";

/// Configuration principale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Sources normalisées attendues dans le dossier d'entrée
    pub sources: Vec<SourceConfig>,

    /// Paramètres du moteur de fusion
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Zones sans doublons entre sous-jeux (anneaux lon/lat)
    #[serde(default)]
    pub dedup_exempt_areas: Vec<ExemptArea>,

    #[serde(default)]
    pub output: OutputConfig,
}

/// Source normalisée
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    /// Nom du jeu (`source_id`), fichier `<name>-normalized.geojson`
    pub name: String,

    pub kind: SourceKind,

    /// Source pouvant être vide sans annuler le run
    #[serde(default)]
    pub optional: bool,

    /// Propriété portant l'identifiant natif (ex. `meta_osm_id`), lue avant
    /// l'identifiant de la feature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_property: Option<String>,

    /// Identifiant dérivé des coordonnées quand la feature n'en porte aucun
    #[serde(default)]
    pub derive_ids: bool,
}

/// Zone exemptée de déduplication
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExemptArea {
    pub name: String,
    pub ring: Vec<[f64; 2]>,
}

/// Paramètres des fichiers produits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Les features contributives sont publiées sous forme de points
    /// (centroïde des lignes et surfaces)
    #[serde(default = "default_true")]
    pub crowd_as_points: bool,

    /// Fuseau horaire de datation des archives
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "America/Toronto".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            crowd_as_points: default_true(),
            timezone: default_timezone(),
        }
    }
}

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "toronto" => Self::load_embedded(include_str!("presets/toronto.json")),
            _ => anyhow::bail!("Unknown preset: {}. Use: toronto", preset),
        }
    }

    /// Preset embarqué ou chemin vers un fichier JSON
    pub fn resolve(name: &str) -> Result<Self> {
        match name {
            "toronto" => Self::from_preset(name),
            _ => Self::load(Path::new(name)),
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded config")
    }

    /// Configuration du moteur complétée par l'application
    ///
    /// Les sources optionnelles et les zones exemptées sont reportées dans
    /// la configuration de fusion.
    pub fn fusion_config(&self) -> Result<FusionConfig> {
        let mut fusion = self.fusion.clone();

        for source in self.sources.iter().filter(|s| s.optional) {
            if !fusion.is_optional(&source.name) {
                fusion.optional_sources.push(source.name.clone());
            }
        }

        for area in &self.dedup_exempt_areas {
            fusion.deduplication.exempt_areas.push(area.polygon()?);
        }

        Ok(fusion)
    }
}

impl ExemptArea {
    pub fn polygon(&self) -> Result<Polygon> {
        if self.ring.len() < 4 {
            anyhow::bail!(
                "Exempt area {} needs a closed ring of at least 4 positions",
                self.name
            );
        }
        let ring: LineString = self.ring.iter().map(|p| (p[0], p[1])).collect();
        Ok(Polygon::new(ring, vec![]))
    }
}

/// Chemins d'un run
#[derive(Debug, Clone)]
pub struct RunPaths {
    /// Dossier des collections normalisées
    pub input_dir: PathBuf,
    /// Dossier des fichiers publiés
    pub output_dir: PathBuf,
    /// Registre d'exclusions (optionnel)
    pub exclusions: Option<PathBuf>,
}

impl RunPaths {
    /// Chemins depuis l'environnement (.env compris)
    pub fn from_env() -> Self {
        Self {
            input_dir: std::env::var(ENV_INPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/normalized")),
            output_dir: std::env::var(ENV_OUTPUT_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/display")),
            exclusions: std::env::var(ENV_EXCLUSIONS).ok().map(PathBuf::from),
        }
    }

    /// Applique les options de ligne de commande
    pub fn with_overrides(
        mut self,
        input_dir: Option<PathBuf>,
        output_dir: Option<PathBuf>,
        exclusions: Option<PathBuf>,
    ) -> Self {
        if let Some(dir) = input_dir {
            self.input_dir = dir;
        }
        if let Some(dir) = output_dir {
            self.output_dir = dir;
        }
        if exclusions.is_some() {
            self.exclusions = exclusions;
        }
        self
    }

    /// Fichier normalisé d'une source
    pub fn source_file(&self, name: &str) -> PathBuf {
        self.input_dir.join(format!("{}-normalized.geojson", name))
    }
}
