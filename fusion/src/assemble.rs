//! Assemblage de la collection fusionnée
//!
//! Ordre fixe : features contributives conservées, puis features municipales
//! fusionnées, chacune triée par `(source_id, native_id)`. Une clé ne peut
//! apparaître qu'une fois.

use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::cluster::ClusterStats;
use crate::dedup::DedupStats;
use crate::resolve::ResolutionStats;
use crate::types::{FeatureKey, MergedFeature, NormalizedFeature, SourceKind};
use crate::FusionError;

/// Compteurs d'un run, par étape
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    /// Features mal formées écartées à la validation
    pub rejected: usize,
    pub resolution: ResolutionStats,
    pub cluster: ClusterStats,
    pub dedup: DedupStats,
    pub crowd: usize,
    pub municipal: usize,
}

impl FusionStats {
    pub fn total(&self) -> usize {
        self.crowd + self.municipal
    }
}

/// Collection canonique produite par un run
#[derive(Debug, Clone)]
pub struct FusedCollection {
    pub features: Vec<MergedFeature>,
    pub stats: FusionStats,
}

impl FusedCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Features d'un type de source, dans l'ordre de sortie
    pub fn of_kind(&self, kind: SourceKind) -> impl Iterator<Item = &MergedFeature> {
        self.features.iter().filter(move |f| f.kind == kind)
    }

    /// Vrai si une feature de sortie provient de `(source_id, native_id)`
    pub fn contains_origin(&self, source_id: &str, native_id: &str) -> bool {
        self.features
            .iter()
            .any(|f| f.derives_from(source_id, native_id))
    }
}

/// Concatène les deux ensembles dans l'ordre de sortie
pub fn assemble(
    crowd: Vec<NormalizedFeature>,
    municipal: Vec<MergedFeature>,
) -> Result<Vec<MergedFeature>, FusionError> {
    let mut crowd: Vec<MergedFeature> = crowd
        .into_iter()
        .map(|f| MergedFeature::pass_through(f, SourceKind::CrowdSourced))
        .collect();
    crowd.sort_by_key(MergedFeature::key);

    let mut municipal = municipal;
    municipal.sort_by_key(MergedFeature::key);

    let crowd_count = crowd.len();
    let mut features = crowd;
    features.extend(municipal);

    let mut seen: HashSet<FeatureKey> = HashSet::with_capacity(features.len());
    for feature in &features {
        if !seen.insert(feature.key()) {
            return Err(FusionError::DuplicateOutput {
                source_id: feature.source_id.clone(),
                native_id: feature.native_id.clone(),
            });
        }
    }

    info!(
        crowd = crowd_count,
        municipal = features.len() - crowd_count,
        total = features.len(),
        "Collection assembled"
    );

    Ok(features)
}
