//! Résolution du recouvrement entre données contributives et municipales
//!
//! Décide, feature par feature, ce qui survit dans le jeu fusionné. Aucune
//! géométrie n'est modifiée à cette étape.
//!
//! Contributif :
//! - référence croisée qualifiante : conservé
//! - propriétaire municipal sans référence (hors types exemptés) : exclu
//! - sinon conservé
//!
//! Municipal :
//! - présent dans le registre d'exclusions : exclu
//! - référencé par une feature contributive conservée (champ de la clé, ou
//!   identifiant natif si le jeu ne porte pas ce champ) : exclu
//! - à portée d'un objet contributif municipal du même type
//!   (`proximity_supersession`) : exclu
//! - sinon conservé

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::context::{FusionContext, ProximityRule};
use crate::spatial::PointIndex;
use crate::types::{FeatureKey, NormalizedFeature};
use crate::xref::{collect_refs, MunicipalIds};

/// Compteurs de diagnostic (non persistés)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionStats {
    pub crowd_retained: usize,
    pub crowd_excluded_ownership: usize,
    pub municipal_retained: usize,
    pub municipal_excluded_registry: usize,
    pub municipal_superseded_ref: usize,
    pub municipal_superseded_proximity: usize,
    /// Identifiants municipaux revendiqués par plusieurs features contributives
    pub ambiguous_refs: usize,
    /// Entrées du registre sans feature municipale correspondante
    pub unmatched_exclusions: usize,
}

/// Ensembles conservés, disjoints et triés par clé
#[derive(Debug, Clone)]
pub struct Resolution {
    pub crowd: Vec<NormalizedFeature>,
    pub municipal: Vec<NormalizedFeature>,
    pub stats: ResolutionStats,
}

/// Partitionne les features contributives et municipales
pub fn resolve(
    ctx: &FusionContext,
    mut crowd: Vec<NormalizedFeature>,
    mut municipal: Vec<NormalizedFeature>,
) -> Resolution {
    crowd.sort_by_key(NormalizedFeature::key);
    municipal.sort_by_key(NormalizedFeature::key);

    let mut stats = ResolutionStats::default();
    let ids = MunicipalIds::build(&municipal, &ctx.config.authority);

    // Références des features contributives conservées : cible -> revendicateurs
    let mut claims: BTreeMap<FeatureKey, Vec<FeatureKey>> = BTreeMap::new();
    let mut crowd_retained = Vec::with_capacity(crowd.len());

    for feature in crowd {
        let refs = collect_refs(&feature.attributes, &ctx.config.authority);

        if !refs.qualifying && is_owned_unreferenced(ctx, &feature) {
            debug!(feature = %feature.key(), "Excluding municipally owned feature without reference");
            stats.crowd_excluded_ownership += 1;
            continue;
        }

        let mut targets = BTreeSet::new();
        for target in &refs.targets {
            let found = ids.resolve(target);
            if found.is_empty() {
                debug!(feature = %feature.key(), reference = %target, "Reference targets no municipal feature");
            }
            targets.extend(found);
        }
        for target in targets {
            claims.entry(target).or_default().push(feature.key());
        }
        crowd_retained.push(feature);
    }

    for (target, claimants) in &claims {
        if claimants.len() > 1 {
            let names: Vec<String> = claimants.iter().map(ToString::to_string).collect();
            warn!(
                municipal = %target,
                "Municipal feature referenced by {} features, review: {}",
                claimants.len(),
                names.join(", ")
            );
            stats.ambiguous_refs += 1;
        }
    }

    let superseding = SupersedingIndex::build(ctx, &crowd_retained);

    let excluded = ctx.registry.excluded(&ids);
    let mut municipal_retained = Vec::with_capacity(municipal.len());

    for feature in municipal {
        let key = feature.key();

        if excluded.contains(&key) {
            debug!(feature = %key, "Excluded by registry");
            stats.municipal_excluded_registry += 1;
        } else if claims.contains_key(&key) {
            debug!(feature = %key, "Superseded by cross-referenced feature");
            stats.municipal_superseded_ref += 1;
        } else if superseding.covers(ctx, &feature) {
            debug!(feature = %key, "Superseded by nearby municipally owned feature");
            stats.municipal_superseded_proximity += 1;
        } else {
            municipal_retained.push(feature);
        }
    }

    for entry in ctx.registry.unmatched(&ids) {
        info!(
            exclusion = %entry.target(),
            reason = %entry.reason,
            "Exclusion matches no municipal feature"
        );
        stats.unmatched_exclusions += 1;
    }

    stats.crowd_retained = crowd_retained.len();
    stats.municipal_retained = municipal_retained.len();

    info!(
        crowd_retained = stats.crowd_retained,
        crowd_excluded = stats.crowd_excluded_ownership,
        municipal_retained = stats.municipal_retained,
        registry = stats.municipal_excluded_registry,
        superseded_ref = stats.municipal_superseded_ref,
        superseded_proximity = stats.municipal_superseded_proximity,
        "Overlap resolved"
    );

    Resolution {
        crowd: crowd_retained,
        municipal: municipal_retained,
        stats,
    }
}

fn feature_type<'a>(ctx: &FusionContext, feature: &'a NormalizedFeature) -> Option<&'a str> {
    feature.attr(&ctx.config.type_key)
}

fn is_municipally_owned(ctx: &FusionContext, feature: &NormalizedFeature) -> bool {
    feature
        .attr(&ctx.config.ownership.key)
        .map_or(false, |owner| ctx.is_municipally_owned(owner))
}

fn is_owned_unreferenced(ctx: &FusionContext, feature: &NormalizedFeature) -> bool {
    is_municipally_owned(ctx, feature) && !ctx.is_ownership_exempt(feature_type(ctx, feature))
}

/// Positions des objets contributifs municipaux, par règle de proximité
struct SupersedingIndex<'c> {
    rules: Vec<(&'c ProximityRule, PointIndex)>,
}

impl<'c> SupersedingIndex<'c> {
    fn build(ctx: &'c FusionContext, crowd: &[NormalizedFeature]) -> Self {
        let rules = ctx
            .config
            .proximity_supersession
            .iter()
            .map(|rule| {
                let positions: Vec<[f64; 2]> = crowd
                    .iter()
                    .filter(|f| feature_type(ctx, f) == Some(rule.feature_type.as_str()))
                    .filter(|f| is_municipally_owned(ctx, f))
                    .filter_map(|f| ctx.projector().position(&f.geometry))
                    .collect();
                (rule, PointIndex::new(&positions))
            })
            .collect();
        Self { rules }
    }

    fn covers(&self, ctx: &FusionContext, feature: &NormalizedFeature) -> bool {
        let Some(kind) = feature_type(ctx, feature) else {
            return false;
        };
        self.rules
            .iter()
            .filter(|(rule, _)| rule.feature_type == kind)
            .any(|(rule, index)| {
                ctx.projector()
                    .position(&feature.geometry)
                    .map_or(false, |p| index.any_within(p, rule.radius_m))
            })
    }
}
