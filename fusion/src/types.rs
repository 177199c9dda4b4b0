//! Types de données pour le crate fusion

use std::collections::BTreeMap;
use std::fmt;

use geo::Geometry;
use serde::{Deserialize, Serialize};

/// Attributs d'une feature (clé -> valeur), triés par clé
pub type Attributes = BTreeMap<String, String>;

/// Attribut de provenance propagé depuis la normalisation
pub const META_SOURCE: &str = "meta_source";

/// Origine d'une source de données
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Sous-jeu de données du catalogue municipal
    Municipal,
    /// Données cartographiques contributives (OpenStreetMap)
    CrowdSourced,
}

impl SourceKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Municipal => "municipal",
            Self::CrowdSourced => "crowd-sourced",
        }
    }
}

/// Clé `(source_id, native_id)`, clé de tri stable à chaque étape
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureKey {
    pub source_id: String,
    pub native_id: String,
}

impl FeatureKey {
    pub fn new(source_id: impl Into<String>, native_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            native_id: native_id.into(),
        }
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.native_id)
    }
}

/// Candidat d'objet réel issu d'une source normalisée
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFeature {
    /// Jeu de données d'origine
    pub source_id: String,

    /// Identifiant stable dans la source (pas entre deux runs)
    pub native_id: String,

    /// Géométrie en WGS84 (Point, LineString ou Polygon)
    pub geometry: Geometry,

    /// Attributs normalisés, références croisées comprises
    pub attributes: Attributes,
}

impl NormalizedFeature {
    pub fn new(
        source_id: impl Into<String>,
        native_id: impl Into<String>,
        geometry: Geometry,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            native_id: native_id.into(),
            geometry,
            attributes: Attributes::new(),
        }
    }

    /// Ajoute un attribut (builder)
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey::new(self.source_id.clone(), self.native_id.clone())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Provenance telle que fournie par la normalisation
    pub fn meta_source(&self) -> Option<&str> {
        self.attr(META_SOURCE)
    }
}

/// Collection normalisée d'une source
#[derive(Debug, Clone)]
pub struct SourceCollection {
    pub source_id: String,
    pub kind: SourceKind,
    pub features: Vec<NormalizedFeature>,
}

impl SourceCollection {
    pub fn new(source_id: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
            features: Vec::new(),
        }
    }

    pub fn with_features(mut self, features: Vec<NormalizedFeature>) -> Self {
        self.features = features;
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Manière dont une feature de sortie a été produite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOrigin {
    /// Feature normalisée inchangée
    PassThrough,
    /// Regroupement de micro-features (anneaux, poteaux)
    Cluster,
    /// Fusion de doublons entre sous-jeux municipaux
    CrossDataset,
}

/// Unité de sortie de la fusion
#[derive(Debug, Clone, PartialEq)]
pub struct MergedFeature {
    pub source_id: String,
    pub native_id: String,
    pub kind: SourceKind,
    pub origin: MergeOrigin,
    pub geometry: Geometry,
    pub attributes: Attributes,

    /// Features contributrices, triées par clé
    pub contributors: Vec<FeatureKey>,
}

impl MergedFeature {
    /// Feature transmise telle quelle
    pub fn pass_through(feature: NormalizedFeature, kind: SourceKind) -> Self {
        let contributors = vec![feature.key()];
        Self {
            source_id: feature.source_id,
            native_id: feature.native_id,
            kind,
            origin: MergeOrigin::PassThrough,
            geometry: feature.geometry,
            attributes: feature.attributes,
            contributors,
        }
    }

    pub fn key(&self) -> FeatureKey {
        FeatureKey::new(self.source_id.clone(), self.native_id.clone())
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn meta_source(&self) -> Option<&str> {
        self.attr(META_SOURCE)
    }

    pub fn is_merge(&self) -> bool {
        self.origin != MergeOrigin::PassThrough
    }

    /// Vrai si la feature provient (en tout ou partie) de `key`
    pub fn derives_from(&self, source_id: &str, native_id: &str) -> bool {
        self.contributors
            .iter()
            .any(|c| c.source_id == source_id && c.native_id == native_id)
    }
}
