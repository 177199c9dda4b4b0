//! Regroupement des micro-features (anneaux, poteaux)
//!
//! Les micro-features municipales d'un même jeu situées à moins de
//! `clustering.radius_m` les unes des autres (par chaînage) sont remplacées
//! par un point unique au centroïde du groupe. Les valeurs divergentes sont
//! conservées avec leur effectif, les capacités additionnées et `quantity`
//! donne le nombre d'objets regroupés.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::context::FusionContext;
use crate::merge::{combine, MergePolicy};
use crate::spatial::proximity_groups;
use crate::types::{MergeOrigin, MergedFeature, NormalizedFeature, SourceKind};
use crate::FusionError;

/// Attribut du nombre d'objets regroupés
pub const QUANTITY: &str = "quantity";

/// Compteurs du regroupement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClusterStats {
    /// Groupes de taille >= 2
    pub groups: usize,
    /// Features absorbées dans ces groupes
    pub members: usize,
}

/// Regroupe les micro-features de l'ensemble municipal conservé
pub fn cluster(
    ctx: &FusionContext,
    municipal: Vec<NormalizedFeature>,
) -> Result<(Vec<MergedFeature>, ClusterStats), FusionError> {
    let cfg = &ctx.config.clustering;
    let policy = MergePolicy::cluster(&ctx.config.authority);

    let mut output = Vec::with_capacity(municipal.len());
    let mut by_dataset: BTreeMap<String, Vec<MergedFeature>> = BTreeMap::new();

    for feature in municipal {
        let feature = MergedFeature::pass_through(feature, SourceKind::Municipal);
        if feature.attr(&ctx.config.type_key) == Some(cfg.feature_type.as_str()) {
            by_dataset
                .entry(feature.source_id.clone())
                .or_default()
                .push(feature);
        } else {
            output.push(feature);
        }
    }

    let mut stats = ClusterStats::default();

    for (dataset, mut candidates) in by_dataset {
        candidates.sort_by_key(MergedFeature::key);
        let positions = ctx.projector().positions_of(&candidates)?;
        let groups = proximity_groups(&positions, cfg.radius_m, |_, _| true);

        let mut slots: Vec<Option<MergedFeature>> = candidates.into_iter().map(Some).collect();

        for group in groups {
            let members: Vec<MergedFeature> =
                group.iter().filter_map(|&i| slots[i].take()).collect();

            if members.len() < 2 {
                output.extend(members);
                continue;
            }

            let member_positions: Vec<[f64; 2]> = group.iter().map(|&i| positions[i]).collect();
            let collapsed = collapse(ctx, &policy, &dataset, &members, &member_positions)?;

            debug!(
                dataset = dataset.as_str(),
                members = members.len(),
                id = collapsed.native_id.as_str(),
                "Collapsed micro-feature group"
            );
            stats.groups += 1;
            stats.members += members.len();
            output.push(collapsed);
        }
    }

    output.sort_by_key(MergedFeature::key);

    info!(
        groups = stats.groups,
        members = stats.members,
        features = output.len(),
        "Micro-features clustered"
    );

    Ok((output, stats))
}

fn collapse(
    ctx: &FusionContext,
    policy: &MergePolicy,
    dataset: &str,
    members: &[MergedFeature],
    positions: &[[f64; 2]],
) -> Result<MergedFeature, FusionError> {
    let combined = combine(ctx.projector(), policy, members, positions)?;

    let mut attributes = combined.attributes;
    attributes.insert(QUANTITY.to_string(), members.len().to_string());

    let native_id = members
        .iter()
        .map(|m| m.native_id.as_str())
        .collect::<Vec<_>>()
        .join(";");

    Ok(MergedFeature {
        source_id: dataset.to_string(),
        native_id,
        kind: SourceKind::Municipal,
        origin: MergeOrigin::Cluster,
        geometry: combined.geometry,
        attributes,
        contributors: combined.contributors,
    })
}
