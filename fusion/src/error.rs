//! Types d'erreurs pour le crate fusion

use thiserror::Error;

/// Erreurs fatales pouvant survenir pendant un run de fusion
///
/// Toute erreur retournée par [`crate::fuse`] annule la publication : la
/// collection publiée précédemment reste en place.
#[derive(Debug, Error)]
pub enum FusionError {
    /// Erreur d'I/O lors de la lecture du registre d'exclusions
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Registre d'exclusions illisible
    #[error("Invalid exclusion registry: {0}")]
    InvalidRegistry(String),

    /// Configuration invalide (regex, EPSG, rayon négatif...)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Source vide ou indisponible en amont
    #[error("Source {source_id} is empty or unavailable")]
    EmptySource { source_id: String },

    /// Aucune collection fournie pour un type de source
    #[error("No {kind} source supplied")]
    MissingSourceKind { kind: &'static str },

    /// Identifiant dupliqué dans une même source
    #[error("Duplicate feature {native_id} in source {source_id}")]
    DuplicateFeature { source_id: String, native_id: String },

    /// Identifiant dupliqué dans la collection assemblée
    #[error("Feature {source_id}:{native_id} emitted twice")]
    DuplicateOutput { source_id: String, native_id: String },

    /// Échec de projection vers le système métrique
    #[error("Projection failed for {feature}: {reason}")]
    Projection { feature: String, reason: String },
}

impl FusionError {
    /// Crée une erreur de configuration
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    /// Crée une erreur de projection avec contexte
    pub fn projection(feature: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Projection {
            feature: feature.into(),
            reason: reason.into(),
        }
    }
}
