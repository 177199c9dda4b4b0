//! Déduplication des supports entre sous-jeux municipaux
//!
//! Chaque sous-jeu couvre un programme d'installation différent et peut
//! relever le même support physique qu'un autre. Les supports de jeux
//! différents situés à moins de `deduplication.radius_m` (par chaînage) sont
//! fusionnés en une seule feature. Deux supports d'un même jeu ne sont jamais
//! reliés directement, mais un groupe peut les réunir par l'intermédiaire d'un
//! troisième jeu.
//!
//! Aucune réconciliation des valeurs : une capacité `6` d'un côté et `8` de
//! l'autre donne `6;8`.

use geo::Centroid;
use serde::Serialize;
use tracing::{debug, info};

use crate::context::FusionContext;
use crate::merge::{combine, MergePolicy};
use crate::spatial::proximity_groups;
use crate::types::{MergeOrigin, MergedFeature, SourceKind};
use crate::FusionError;

/// Compteurs de la déduplication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Groupes de taille >= 2
    pub groups: usize,
    /// Somme de (taille du groupe - 1)
    pub merges: usize,
    /// Supports ignorés car situés dans une zone exemptée
    pub exempt: usize,
}

/// Fusionne les doublons inter-jeux de l'ensemble municipal
pub fn dedup(
    ctx: &FusionContext,
    municipal: Vec<MergedFeature>,
) -> Result<(Vec<MergedFeature>, DedupStats), FusionError> {
    let cfg = &ctx.config.deduplication;
    let policy = MergePolicy::cross_dataset(&ctx.config.authority);
    let mut stats = DedupStats::default();

    let mut output = Vec::with_capacity(municipal.len());
    let mut candidates = Vec::new();

    for feature in municipal {
        if feature.attr(&ctx.config.type_key) != Some(cfg.feature_type.as_str()) {
            output.push(feature);
        } else if is_exempt(ctx, &feature) {
            stats.exempt += 1;
            output.push(feature);
        } else {
            candidates.push(feature);
        }
    }

    candidates.sort_by_key(MergedFeature::key);
    let positions = ctx.projector().positions_of(&candidates)?;

    let groups = {
        let candidates = &candidates;
        proximity_groups(&positions, cfg.radius_m, |i, j| {
            candidates[i].source_id != candidates[j].source_id
        })
    };

    let mut slots: Vec<Option<MergedFeature>> = candidates.into_iter().map(Some).collect();

    for group in groups {
        let members: Vec<MergedFeature> = group.iter().filter_map(|&i| slots[i].take()).collect();

        if members.len() < 2 {
            output.extend(members);
            continue;
        }

        let member_positions: Vec<[f64; 2]> = group.iter().map(|&i| positions[i]).collect();
        let combined = combine(ctx.projector(), &policy, &members, &member_positions)?;

        let native_id = combined
            .contributors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";");

        debug!(
            members = members.len(),
            id = native_id.as_str(),
            "Merged cross-dataset duplicates"
        );
        stats.groups += 1;
        stats.merges += members.len() - 1;

        output.push(MergedFeature {
            source_id: cfg.merged_source_id.clone(),
            native_id,
            kind: SourceKind::Municipal,
            origin: MergeOrigin::CrossDataset,
            geometry: combined.geometry,
            attributes: combined.attributes,
            contributors: combined.contributors,
        });
    }

    output.sort_by_key(MergedFeature::key);

    info!(
        groups = stats.groups,
        merges = stats.merges,
        exempt = stats.exempt,
        features = output.len(),
        "Cross-dataset duplicates merged"
    );

    Ok((output, stats))
}

fn is_exempt(ctx: &FusionContext, feature: &MergedFeature) -> bool {
    if ctx.config.deduplication.exempt_areas.is_empty() {
        return false;
    }
    feature
        .geometry
        .centroid()
        .map_or(false, |p| ctx.in_dedup_exempt_area(&p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FusionConfig;
    use crate::registry::ExclusionRegistry;
    use crate::types::NormalizedFeature;
    use geo::{Geometry, LineString, Point, Polygon};

    const RACKS: &str = "bicycle-parking-racks";
    const HIGH: &str = "bicycle-parking-high-capacity-outdoor";
    const FURNITURE: &str = "street-furniture-bicycle-parking";

    fn context(config: FusionConfig) -> FusionContext {
        FusionContext::new(config, ExclusionRegistry::empty()).unwrap()
    }

    fn rack(ctx: &FusionContext, source: &str, id: &str, dx: f64, capacity: &str) -> MergedFeature {
        let (x0, y0) = ctx.projector().to_metric(-79.3832, 43.6534).unwrap();
        let (lon, lat) = ctx.projector().to_geographic(x0 + dx, y0).unwrap();
        let feature = NormalizedFeature::new(source, id, Geometry::Point(Point::new(lon, lat)))
            .with_attr("bicycle_parking", "rack")
            .with_attr("capacity", capacity);
        MergedFeature::pass_through(feature, SourceKind::Municipal)
    }

    #[test]
    fn test_conflicting_capacity_is_preserved() {
        let ctx = context(FusionConfig::default());
        let features = vec![rack(&ctx, RACKS, "10", 0.0, "6"), rack(&ctx, HIGH, "20", 12.0, "8")];

        let (output, stats) = dedup(&ctx, features).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(stats.merges, 1);

        let merged = &output[0];
        assert_eq!(merged.source_id, "city-multi");
        assert_eq!(merged.origin, MergeOrigin::CrossDataset);
        assert_eq!(merged.attr("capacity"), Some("8;6"));
        assert_eq!(
            merged.native_id,
            "bicycle-parking-high-capacity-outdoor:20;bicycle-parking-racks:10"
        );
        assert!(merged.derives_from(RACKS, "10"));
        assert!(merged.derives_from(HIGH, "20"));
    }

    #[test]
    fn test_same_dataset_never_linked() {
        let ctx = context(FusionConfig::default());
        let features = vec![rack(&ctx, RACKS, "1", 0.0, "2"), rack(&ctx, RACKS, "2", 5.0, "2")];

        let (output, stats) = dedup(&ctx, features).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(stats.groups, 0);
    }

    #[test]
    fn test_chain_through_third_dataset() {
        let ctx = context(FusionConfig::default());
        // racks:1 -- 25 m -- furniture:5 -- 25 m -- high:9
        let features = vec![
            rack(&ctx, RACKS, "1", 0.0, "4"),
            rack(&ctx, FURNITURE, "5", 25.0, "4"),
            rack(&ctx, HIGH, "9", 50.0, "10"),
        ];

        let (output, stats) = dedup(&ctx, features).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(stats, DedupStats { groups: 1, merges: 2, exempt: 0 });
        assert_eq!(output[0].attr("capacity"), Some("10;4"));
    }

    #[test]
    fn test_beyond_radius_passes_through() {
        let ctx = context(FusionConfig::default());
        let features = vec![rack(&ctx, RACKS, "1", 0.0, "2"), rack(&ctx, HIGH, "2", 31.0, "2")];

        let (output, _) = dedup(&ctx, features).unwrap();
        assert_eq!(output.len(), 2);
        assert!(output.iter().all(|f| !f.is_merge()));
    }

    #[test]
    fn test_exempt_area() {
        let mut config = FusionConfig::default();
        config.deduplication.exempt_areas.push(Polygon::new(
            LineString::from(vec![
                (-79.39, 43.65),
                (-79.38, 43.65),
                (-79.38, 43.66),
                (-79.39, 43.66),
                (-79.39, 43.65),
            ]),
            vec![],
        ));
        let ctx = context(config);
        let features = vec![rack(&ctx, RACKS, "1", 0.0, "2"), rack(&ctx, HIGH, "2", 10.0, "2")];

        let (output, stats) = dedup(&ctx, features).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(stats.exempt, 2);
    }
}
