//! Configuration et contexte d'un run de fusion
//!
//! Le contexte est construit une fois par run et passé explicitement à chaque
//! étape : aucun état global, le moteur peut tourner plusieurs fois dans un
//! même processus.

use geo::{Contains, Point, Polygon};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::projection::Projector;
use crate::registry::ExclusionRegistry;
use crate::FusionError;

/// Paramètres de la détection de propriété municipale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OwnershipConfig {
    /// Attribut portant le propriétaire / gestionnaire
    #[serde(default = "default_ownership_key")]
    pub key: String,

    /// Regex recherchée (insensible à la casse) dans la valeur
    #[serde(default = "default_ownership_pattern")]
    pub pattern: String,

    /// Types jamais exclus pour propriété (pas d'id municipal à référencer)
    #[serde(default = "default_ownership_exempt")]
    pub exempt_types: Vec<String>,
}

/// Paramètres du regroupement de micro-features
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_cluster_type")]
    pub feature_type: String,

    /// Rayon de regroupement en mètres
    #[serde(default = "default_cluster_radius")]
    pub radius_m: f64,
}

/// Paramètres de la déduplication entre sous-jeux municipaux
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeduplicationConfig {
    #[serde(default = "default_dedup_type")]
    pub feature_type: String,

    /// Rayon de regroupement en mètres
    #[serde(default = "default_dedup_radius")]
    pub radius_m: f64,

    /// `source_id` des features fusionnées
    #[serde(default = "default_merged_source")]
    pub merged_source_id: String,

    /// Zones (WGS84) où les doublons sont connus pour ne pas exister,
    /// renseignées par l'application
    #[serde(skip)]
    pub exempt_areas: Vec<Polygon>,
}

/// Suppression d'objets municipaux sans id par proximité d'un objet contributif
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProximityRule {
    pub feature_type: String,
    pub radius_m: f64,
}

/// Configuration du moteur
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FusionConfig {
    /// Espace de noms des clés `ref:<autorité>:...`
    #[serde(default = "default_authority")]
    pub authority: String,

    /// Attribut donnant le type de stationnement
    #[serde(default = "default_type_key")]
    pub type_key: String,

    /// EPSG projeté utilisé pour les distances et centroïdes
    #[serde(default = "default_metric_epsg")]
    pub metric_epsg: u32,

    #[serde(default)]
    pub ownership: OwnershipConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub deduplication: DeduplicationConfig,

    #[serde(default = "default_proximity_rules")]
    pub proximity_supersession: Vec<ProximityRule>,

    /// Sources autorisées à être vides
    #[serde(default)]
    pub optional_sources: Vec<String>,
}

fn default_authority() -> String {
    "open.toronto.ca".to_string()
}

fn default_type_key() -> String {
    "bicycle_parking".to_string()
}

fn default_metric_epsg() -> u32 {
    32617
}

fn default_ownership_key() -> String {
    "operator".to_string()
}

fn default_ownership_pattern() -> String {
    r"city\s*of\s*toronto".to_string()
}

fn default_ownership_exempt() -> Vec<String> {
    vec!["lockers".to_string()]
}

fn default_cluster_type() -> String {
    "bollard".to_string()
}

fn default_cluster_radius() -> f64 {
    5.0
}

fn default_dedup_type() -> String {
    "rack".to_string()
}

fn default_dedup_radius() -> f64 {
    30.0
}

fn default_merged_source() -> String {
    "city-multi".to_string()
}

fn default_proximity_rules() -> Vec<ProximityRule> {
    vec![ProximityRule {
        feature_type: "lockers".to_string(),
        radius_m: 200.0,
    }]
}

impl Default for OwnershipConfig {
    fn default() -> Self {
        Self {
            key: default_ownership_key(),
            pattern: default_ownership_pattern(),
            exempt_types: default_ownership_exempt(),
        }
    }
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            feature_type: default_cluster_type(),
            radius_m: default_cluster_radius(),
        }
    }
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            feature_type: default_dedup_type(),
            radius_m: default_dedup_radius(),
            merged_source_id: default_merged_source(),
            exempt_areas: Vec::new(),
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            authority: default_authority(),
            type_key: default_type_key(),
            metric_epsg: default_metric_epsg(),
            ownership: OwnershipConfig::default(),
            clustering: ClusteringConfig::default(),
            deduplication: DeduplicationConfig::default(),
            proximity_supersession: default_proximity_rules(),
            optional_sources: Vec::new(),
        }
    }
}

impl FusionConfig {
    /// Vérifie les paramètres numériques
    pub fn validate(&self) -> Result<(), FusionError> {
        let radii = [
            ("clustering.radius_m", self.clustering.radius_m),
            ("deduplication.radius_m", self.deduplication.radius_m),
        ];
        for (name, radius) in radii {
            if !radius.is_finite() || radius <= 0.0 {
                return Err(FusionError::invalid_config(format!(
                    "{} must be a positive number, got {}",
                    name, radius
                )));
            }
        }
        for rule in &self.proximity_supersession {
            if !rule.radius_m.is_finite() || rule.radius_m <= 0.0 {
                return Err(FusionError::invalid_config(format!(
                    "proximity radius for {} must be positive",
                    rule.feature_type
                )));
            }
        }
        if self.authority.trim().is_empty() {
            return Err(FusionError::invalid_config("authority must not be empty"));
        }
        Ok(())
    }

    /// Vrai si la source peut être vide sans annuler le run
    pub fn is_optional(&self, source_id: &str) -> bool {
        self.optional_sources.iter().any(|s| s == source_id)
    }
}

/// Contexte explicite d'un run : configuration, registre, outils compilés
pub struct FusionContext {
    pub config: FusionConfig,
    pub registry: ExclusionRegistry,
    ownership: Regex,
    projector: Projector,
}

impl FusionContext {
    /// Construit le contexte (compile la regex, prépare la projection)
    pub fn new(config: FusionConfig, registry: ExclusionRegistry) -> Result<Self, FusionError> {
        config.validate()?;

        let ownership = RegexBuilder::new(&config.ownership.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| FusionError::invalid_config(format!("ownership pattern: {}", e)))?;

        let projector = Projector::new(config.metric_epsg)?;

        Ok(Self {
            config,
            registry,
            ownership,
            projector,
        })
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Vrai si la valeur du tag de propriété désigne l'autorité municipale
    pub fn is_municipally_owned(&self, value: &str) -> bool {
        self.ownership.is_match(value)
    }

    /// Vrai si le type est exempté de l'exclusion pour propriété
    pub fn is_ownership_exempt(&self, feature_type: Option<&str>) -> bool {
        feature_type.map_or(false, |t| {
            self.config.ownership.exempt_types.iter().any(|e| e == t)
        })
    }

    /// Vrai si le point (WGS84) est dans une zone exemptée de déduplication
    pub fn in_dedup_exempt_area(&self, point: &Point) -> bool {
        self.config
            .deduplication
            .exempt_areas
            .iter()
            .any(|area| area.contains(point))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FusionConfig::default();
        assert_eq!(config.clustering.radius_m, 5.0);
        assert_eq!(config.deduplication.radius_m, 30.0);
        assert_eq!(config.metric_epsg, 32617);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FusionConfig =
            serde_json::from_str(r#"{"clustering": {"radius_m": 3.0}}"#).unwrap();
        assert_eq!(config.clustering.radius_m, 3.0);
        assert_eq!(config.clustering.feature_type, "bollard");
        assert_eq!(config.authority, "open.toronto.ca");
        assert_eq!(config.proximity_supersession.len(), 1);
    }

    #[test]
    fn test_ownership_match() {
        let ctx = FusionContext::new(FusionConfig::default(), ExclusionRegistry::empty()).unwrap();
        assert!(ctx.is_municipally_owned("City of Toronto"));
        assert!(ctx.is_municipally_owned("CITYOFTORONTO"));
        assert!(ctx.is_municipally_owned("Transportation Services, City of  Toronto"));
        assert!(!ctx.is_municipally_owned("Bike Share Toronto"));
        assert!(ctx.is_ownership_exempt(Some("lockers")));
        assert!(!ctx.is_ownership_exempt(Some("rack")));
        assert!(!ctx.is_ownership_exempt(None));
    }

    #[test]
    fn test_invalid_radius() {
        let mut config = FusionConfig::default();
        config.clustering.radius_m = 0.0;
        assert!(matches!(
            FusionContext::new(config, ExclusionRegistry::empty()),
            Err(FusionError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_pattern() {
        let mut config = FusionConfig::default();
        config.ownership.pattern = "city(".to_string();
        assert!(FusionContext::new(config, ExclusionRegistry::empty()).is_err());
    }
}
