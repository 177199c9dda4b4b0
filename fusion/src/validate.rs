//! Validation des collections d'entrée
//!
//! - features mal formées : écartées avec un warning, le run continue
//! - identifiant dupliqué dans une source : fatal
//! - source vide ou absente : fatal
//!
//! Les multipoints municipaux sont éclatés en un point par membre avant toute
//! autre étape.

use std::collections::HashSet;

use geo::{CoordsIter, Geometry};
use tracing::{debug, warn};

use crate::context::FusionConfig;
use crate::types::{FeatureKey, NormalizedFeature, SourceCollection, SourceKind};
use crate::xref::PART_SEPARATOR;
use crate::FusionError;

/// Feature écartée et motif
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub source_id: String,
    pub native_id: String,
    pub reason: String,
}

/// Motif de rejet d'une feature, `None` si elle est exploitable
pub fn check_feature(feature: &NormalizedFeature) -> Option<String> {
    if feature.native_id.trim().is_empty() {
        return Some("missing id".to_string());
    }
    if feature.source_id.trim().is_empty() {
        return Some("missing source".to_string());
    }
    check_geometry(&feature.geometry)
}

fn check_geometry(geometry: &Geometry) -> Option<String> {
    if matches!(geometry, Geometry::GeometryCollection(_)) {
        return Some("unsupported geometry collection".to_string());
    }
    if geometry.coords_count() == 0 {
        return Some("empty geometry".to_string());
    }
    for coord in geometry.coords_iter() {
        if !coord.x.is_finite() || !coord.y.is_finite() {
            return Some("non-finite coordinate".to_string());
        }
        if !(-180.0..=180.0).contains(&coord.x) || !(-90.0..=90.0).contains(&coord.y) {
            return Some(format!("coordinate out of range ({}, {})", coord.x, coord.y));
        }
    }
    None
}

/// Écarte les features mal formées d'une collection
pub fn sanitize(collection: SourceCollection) -> (SourceCollection, Vec<Rejection>) {
    let SourceCollection {
        source_id,
        kind,
        features,
    } = collection;

    let mut kept = Vec::with_capacity(features.len());
    let mut rejected = Vec::new();

    for feature in features {
        match check_feature(&feature) {
            None => kept.push(feature),
            Some(reason) => {
                warn!(
                    source = source_id.as_str(),
                    id = feature.native_id.as_str(),
                    "Skipping malformed feature: {}",
                    reason
                );
                rejected.push(Rejection {
                    source_id: source_id.clone(),
                    native_id: feature.native_id,
                    reason,
                });
            }
        }
    }

    (
        SourceCollection {
            source_id,
            kind,
            features: kept,
        },
        rejected,
    )
}

/// Éclate les multipoints d'une source municipale
///
/// Chaque membre devient une feature ponctuelle `<id>#<n>` (n à partir de 1)
/// portant les attributs de la feature d'origine. Un multipoint à un seul
/// membre garde son identifiant. Les sources contributives sont inchangées.
pub fn explode_multipoints(collection: SourceCollection) -> SourceCollection {
    if collection.kind != SourceKind::Municipal {
        return collection;
    }

    let SourceCollection {
        source_id,
        kind,
        features,
    } = collection;

    let mut exploded = 0usize;
    let mut out = Vec::with_capacity(features.len());
    for feature in features {
        let points = match &feature.geometry {
            Geometry::MultiPoint(points) => points.0.clone(),
            _ => {
                out.push(feature);
                continue;
            }
        };

        if let [point] = points.as_slice() {
            out.push(NormalizedFeature {
                geometry: Geometry::Point(*point),
                ..feature
            });
            continue;
        }

        exploded += 1;
        for (n, point) in points.into_iter().enumerate() {
            out.push(NormalizedFeature {
                source_id: feature.source_id.clone(),
                native_id: format!("{}{}{}", feature.native_id, PART_SEPARATOR, n + 1),
                geometry: Geometry::Point(point),
                attributes: feature.attributes.clone(),
            });
        }
    }

    if exploded > 0 {
        debug!(source = source_id.as_str(), exploded, "Multipoints exploded");
    }

    SourceCollection {
        source_id,
        kind,
        features: out,
    }
}

/// Vérifie l'unicité de `(source_id, native_id)` dans une source
pub fn check_unique(collection: &SourceCollection) -> Result<(), FusionError> {
    let mut seen: HashSet<FeatureKey> = HashSet::with_capacity(collection.len());
    for feature in &collection.features {
        if !seen.insert(feature.key()) {
            return Err(FusionError::DuplicateFeature {
                source_id: feature.source_id.clone(),
                native_id: feature.native_id.clone(),
            });
        }
    }
    Ok(())
}

/// Vérifie que chaque source nécessaire est présente et non vide
pub fn check_available(
    sources: &[SourceCollection],
    config: &FusionConfig,
) -> Result<(), FusionError> {
    for kind in [SourceKind::Municipal, SourceKind::CrowdSourced] {
        if !sources.iter().any(|s| s.kind == kind) {
            return Err(FusionError::MissingSourceKind { kind: kind.label() });
        }
    }

    for source in sources {
        if source.is_empty() && !config.is_optional(&source.source_id) {
            return Err(FusionError::EmptySource {
                source_id: source.source_id.clone(),
            });
        }
    }

    Ok(())
}
