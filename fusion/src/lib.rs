//! # fusion
//!
//! Moteur de fusion et de déduplication des stationnements vélo : produit un
//! jeu canonique unique à partir des sous-jeux du catalogue municipal et des
//! données contributives (OpenStreetMap), déjà normalisés.
//!
//! ## Étapes
//!
//! 1. Validation des collections (features mal formées écartées, multipoints
//!    municipaux éclatés)
//! 2. Résolution du recouvrement (références croisées, propriété, registre
//!    d'exclusions)
//! 3. Regroupement des micro-features à 5 m
//! 4. Déduplication des supports entre sous-jeux à 30 m
//! 5. Assemblage dans un ordre déterministe
//!
//! Toutes les distances sont planes, en mètres, dans le système projeté de la
//! configuration (UTM 17N par défaut). Les groupes de proximité sont
//! transitifs (union-find).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fusion::{fuse, ExclusionRegistry, FusionConfig, FusionContext};
//!
//! let registry = ExclusionRegistry::load(path, "open.toronto.ca")?;
//! let ctx = FusionContext::new(FusionConfig::default(), registry)?;
//! let fused = fuse(&ctx, sources)?;
//! println!("{} features", fused.len());
//! ```

pub mod assemble;
pub mod cluster;
pub mod context;
pub mod dedup;
pub mod error;
pub mod merge;
pub mod projection;
pub mod registry;
pub mod resolve;
pub mod snapshot;
pub mod spatial;
pub mod types;
pub mod validate;
pub mod xref;

pub use assemble::{FusedCollection, FusionStats};
pub use context::{FusionConfig, FusionContext};
pub use error::FusionError;
pub use registry::{ExclusionEntry, ExclusionReason, ExclusionRegistry};
pub use types::{
    Attributes, FeatureKey, MergeOrigin, MergedFeature, NormalizedFeature, SourceCollection,
    SourceKind,
};

use tracing::info;

/// Exécute un run complet de fusion.
///
/// # Errors
///
/// Retourne `FusionError` si une source nécessaire est vide ou absente, si un
/// identifiant est dupliqué, ou si une projection échoue. Aucune collection
/// n'est produite dans ce cas.
pub fn fuse(
    ctx: &FusionContext,
    sources: Vec<SourceCollection>,
) -> Result<FusedCollection, FusionError> {
    let mut stats = FusionStats::default();

    // 1. Validation
    let mut checked = Vec::with_capacity(sources.len());
    for source in sources {
        let (clean, rejected) = validate::sanitize(source);
        let clean = validate::explode_multipoints(clean);
        validate::check_unique(&clean)?;
        info!(
            source = clean.source_id.as_str(),
            kind = clean.kind.label(),
            features = clean.len(),
            rejected = rejected.len(),
            "Source loaded"
        );
        stats.rejected += rejected.len();
        checked.push(clean);
    }
    validate::check_available(&checked, &ctx.config)?;

    let mut crowd = Vec::new();
    let mut municipal = Vec::new();
    for source in checked {
        match source.kind {
            SourceKind::CrowdSourced => crowd.extend(source.features),
            SourceKind::Municipal => municipal.extend(source.features),
        }
    }

    // 2. Recouvrement
    let resolution = resolve::resolve(ctx, crowd, municipal);
    stats.resolution = resolution.stats;

    // 3. Micro-features
    let (clustered, cluster_stats) = cluster::cluster(ctx, resolution.municipal)?;
    stats.cluster = cluster_stats;

    // 4. Doublons inter-jeux
    let (deduped, dedup_stats) = dedup::dedup(ctx, clustered)?;
    stats.dedup = dedup_stats;

    // 5. Assemblage
    stats.crowd = resolution.crowd.len();
    stats.municipal = deduped.len();
    let features = assemble::assemble(resolution.crowd, deduped)?;

    Ok(FusedCollection { features, stats })
}
