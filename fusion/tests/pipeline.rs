//! Tests d'intégration du pipeline complet

use fusion::{
    fuse, ExclusionEntry, ExclusionReason, ExclusionRegistry, FusionConfig, FusionContext,
    FusionError, MergeOrigin, NormalizedFeature, SourceCollection, SourceKind,
};
use geo::{Geometry, MultiPoint, Point};

const OSM: &str = "osm";
const RACKS: &str = "bicycle-parking-racks";
const HIGH: &str = "bicycle-parking-high-capacity-outdoor";
const FURNITURE: &str = "street-furniture-bicycle-parking";
const RACKS_REF: &str = "ref:open.toronto.ca:bicycle-parking-racks:id";
const STATIONS: &str = "bicycle-parking-bike-stations-indoor";

fn registry() -> ExclusionRegistry {
    ExclusionRegistry::from_entries(vec![
        ExclusionEntry::new(RACKS, "5", ExclusionReason::Removed, "gone since 2023"),
        ExclusionEntry::new(RACKS, "404", ExclusionReason::Missing, "not found upstream"),
    ])
}

fn context() -> FusionContext {
    FusionContext::new(FusionConfig::default(), registry()).unwrap()
}

/// Feature à (dx, dy) mètres de l'hôtel de ville
fn at(ctx: &FusionContext, source: &str, id: &str, dx: f64, dy: f64) -> NormalizedFeature {
    let (x0, y0) = ctx.projector().to_metric(-79.3832, 43.6534).unwrap();
    let (lon, lat) = ctx.projector().to_geographic(x0 + dx, y0 + dy).unwrap();
    NormalizedFeature::new(source, id, Geometry::Point(Point::new(lon, lat)))
        .with_attr("meta_source", source)
}

fn rack(ctx: &FusionContext, source: &str, id: &str, dx: f64, capacity: &str) -> NormalizedFeature {
    at(ctx, source, id, dx, 0.0)
        .with_attr("bicycle_parking", "rack")
        .with_attr("capacity", capacity)
}

fn bollard(ctx: &FusionContext, id: &str, dx: f64) -> NormalizedFeature {
    at(ctx, FURNITURE, id, dx, 500.0)
        .with_attr("bicycle_parking", "bollard")
        .with_attr("capacity", "2")
}

fn sources(ctx: &FusionContext) -> Vec<SourceCollection> {
    let crowd = vec![
        at(ctx, OSM, "node/1", 0.0, -500.0)
            .with_attr("bicycle_parking", "stands")
            .with_attr(RACKS_REF, "100"),
        at(ctx, OSM, "node/2", 100.0, -500.0)
            .with_attr("bicycle_parking", "stands")
            .with_attr("operator", "City of Toronto"),
        at(ctx, OSM, "node/3", 200.0, -500.0).with_attr("bicycle_parking", "wall_loops"),
    ];

    let racks = vec![
        rack(ctx, RACKS, "100", 0.0, "4"),
        rack(ctx, RACKS, "5", 300.0, "4"),
        rack(ctx, RACKS, "10", 1000.0, "6"),
        rack(ctx, RACKS, "11", 3000.0, "2"),
    ];
    let high = vec![rack(ctx, HIGH, "20", 1012.0, "8")];
    let furniture = vec![
        bollard(ctx, "1", 2000.0),
        bollard(ctx, "2", 2004.0),
        bollard(ctx, "3", 2008.0),
    ];

    vec![
        SourceCollection::new(OSM, SourceKind::CrowdSourced).with_features(crowd),
        SourceCollection::new(RACKS, SourceKind::Municipal).with_features(racks),
        SourceCollection::new(HIGH, SourceKind::Municipal).with_features(high),
        SourceCollection::new(FURNITURE, SourceKind::Municipal).with_features(furniture),
    ]
}

#[test]
fn test_exclusion_invariant() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    for entry in ctx.registry.entries() {
        assert!(
            !fused.contains_origin(&entry.dataset, &entry.id),
            "{}:{} should be excluded",
            entry.dataset,
            entry.id
        );
    }
    assert_eq!(fused.stats.resolution.municipal_excluded_registry, 1);
    assert_eq!(fused.stats.resolution.unmatched_exclusions, 1);
}

#[test]
fn test_reference_supersession() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    assert!(fused.contains_origin(OSM, "node/1"));
    assert!(!fused.contains_origin(RACKS, "100"));
}

#[test]
fn test_ownership_exclusion() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    assert!(!fused.contains_origin(OSM, "node/2"));
    assert!(fused.contains_origin(OSM, "node/3"));
    assert_eq!(fused.stats.resolution.crowd_excluded_ownership, 1);
}

#[test]
fn test_clustering_transitivity() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    let clusters: Vec<_> = fused
        .features
        .iter()
        .filter(|f| f.origin == MergeOrigin::Cluster)
        .collect();
    assert_eq!(clusters.len(), 1);
    assert_eq!(clusters[0].native_id, "1;2;3");
    assert_eq!(clusters[0].contributors.len(), 3);
    assert_eq!(clusters[0].attr("quantity"), Some("3"));
    assert_eq!(clusters[0].meta_source(), Some(FURNITURE));
}

#[test]
fn test_merge_accounting() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();
    let stats = &fused.stats;

    // Contributif : node/1, node/3 ; municipal après regroupement :
    // racks:10, racks:11, high:20, le groupe de poteaux
    let municipal_after_clustering =
        stats.resolution.municipal_retained - stats.cluster.members + stats.cluster.groups;
    assert_eq!(stats.resolution.crowd_retained, 2);
    assert_eq!(municipal_after_clustering, 4);
    assert_eq!(stats.dedup.merges, 1);

    assert_eq!(
        fused.len(),
        stats.resolution.crowd_retained + municipal_after_clustering - stats.dedup.merges
    );
    assert_eq!(fused.len(), 5);
    assert_eq!(fused.stats.total(), fused.len());
}

#[test]
fn test_conflict_preservation() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    let merged = fused
        .features
        .iter()
        .find(|f| f.origin == MergeOrigin::CrossDataset)
        .unwrap();
    assert_eq!(merged.source_id, "city-multi");
    assert_eq!(merged.attr("capacity"), Some("8;6"));
    assert_eq!(merged.attr("meta_merged_count"), Some("2"));
    assert_eq!(
        merged.meta_source(),
        Some("bicycle-parking-high-capacity-outdoor;bicycle-parking-racks")
    );
    assert!(merged.derives_from(RACKS, "10"));
    assert!(merged.derives_from(HIGH, "20"));
}

#[test]
fn test_idempotence_and_order_independence() {
    let ctx = context();
    let first = fuse(&ctx, sources(&ctx)).unwrap();
    let second = fuse(&ctx, sources(&ctx)).unwrap();

    let mut shuffled = sources(&ctx);
    shuffled.reverse();
    for source in &mut shuffled {
        source.features.reverse();
    }
    let third = fuse(&ctx, shuffled).unwrap();

    assert_eq!(first.features, second.features);
    assert_eq!(first.features, third.features);
    assert_eq!(first.stats, third.stats);
}

#[test]
fn test_output_order() {
    let ctx = context();
    let fused = fuse(&ctx, sources(&ctx)).unwrap();

    let keys: Vec<String> = fused.features.iter().map(|f| f.key().to_string()).collect();
    assert_eq!(
        keys,
        vec![
            "osm:node/1",
            "osm:node/3",
            "bicycle-parking-racks:11",
            "city-multi:bicycle-parking-high-capacity-outdoor:20;bicycle-parking-racks:10",
            "street-furniture-bicycle-parking:1;2;3",
        ]
    );
    assert_eq!(fused.of_kind(SourceKind::CrowdSourced).count(), 2);
    assert_eq!(fused.of_kind(SourceKind::Municipal).count(), 3);
}

#[test]
fn test_empty_municipal_source_aborts() {
    let ctx = context();
    let mut sources = sources(&ctx);
    sources[1].features.clear();

    let err = fuse(&ctx, sources).unwrap_err();
    assert!(matches!(err, FusionError::EmptySource { ref source_id } if source_id == RACKS));
}

#[test]
fn test_missing_crowd_source_aborts() {
    let ctx = context();
    let sources: Vec<_> = sources(&ctx)
        .into_iter()
        .filter(|s| s.kind == SourceKind::Municipal)
        .collect();

    assert!(matches!(
        fuse(&ctx, sources),
        Err(FusionError::MissingSourceKind { .. })
    ));
}

#[test]
fn test_duplicate_id_aborts() {
    let ctx = context();
    let mut sources = sources(&ctx);
    let duplicate = rack(&ctx, RACKS, "11", 4000.0, "2");
    sources[1].features.push(duplicate);

    assert!(matches!(
        fuse(&ctx, sources),
        Err(FusionError::DuplicateFeature { .. })
    ));
}

#[test]
fn test_malformed_feature_is_skipped() {
    let ctx = context();
    let mut sources = sources(&ctx);
    sources[0].features.push(NormalizedFeature::new(
        OSM,
        "node/9",
        Geometry::Point(Point::new(f64::NAN, 43.6)),
    ));

    let fused = fuse(&ctx, sources).unwrap();
    assert_eq!(fused.stats.rejected, 1);
    assert_eq!(fused.len(), 5);
}

#[test]
fn test_context_is_reusable() {
    // Deux contextes indépendants dans le même processus
    let ctx = context();
    let strict = FusionContext::new(FusionConfig::default(), ExclusionRegistry::empty()).unwrap();

    let with_registry = fuse(&ctx, sources(&ctx)).unwrap();
    let without = fuse(&strict, sources(&ctx)).unwrap();

    assert!(!with_registry.contains_origin(RACKS, "5"));
    assert!(without.contains_origin(RACKS, "5"));
}

/// Multipoint municipal dont les membres sont à (dx, 0) mètres
fn high_multipoint(ctx: &FusionContext, id: &str, offsets: &[f64]) -> NormalizedFeature {
    let points: Vec<Point> = offsets
        .iter()
        .map(|dx| match at(ctx, HIGH, id, *dx, 2000.0).geometry {
            Geometry::Point(p) => p,
            _ => unreachable!(),
        })
        .collect();
    NormalizedFeature::new(HIGH, id, Geometry::MultiPoint(MultiPoint::new(points)))
        .with_attr("meta_source", HIGH)
        .with_attr("bicycle_parking", "rack")
        .with_attr("capacity", "10")
}

fn small_scene(
    ctx: &FusionContext,
    crowd: Vec<NormalizedFeature>,
    high: Vec<NormalizedFeature>,
) -> Vec<SourceCollection> {
    let racks = vec![at(ctx, RACKS, "9", 5.0, 2000.0)
        .with_attr("bicycle_parking", "rack")
        .with_attr("capacity", "2")];
    vec![
        SourceCollection::new(OSM, SourceKind::CrowdSourced).with_features(crowd),
        SourceCollection::new(RACKS, SourceKind::Municipal).with_features(racks),
        SourceCollection::new(HIGH, SourceKind::Municipal).with_features(high),
    ]
}

#[test]
fn test_multipoint_members_are_deduplicated_separately() {
    let ctx = context();
    let crowd = vec![at(&ctx, OSM, "node/1", 0.0, -3000.0).with_attr("bicycle_parking", "stands")];
    let high = vec![high_multipoint(&ctx, "1", &[0.0, 400.0])];

    let fused = fuse(&ctx, small_scene(&ctx, crowd, high)).unwrap();

    assert_eq!(fused.stats.dedup.merges, 1);
    assert_eq!(fused.len(), 3);
    let merged = fused
        .features
        .iter()
        .find(|f| f.origin == MergeOrigin::CrossDataset)
        .unwrap();
    assert!(merged.derives_from(HIGH, "1#1"));
    assert!(merged.derives_from(RACKS, "9"));
    assert!(fused.contains_origin(HIGH, "1#2"));
    assert!(fused
        .features
        .iter()
        .all(|f| matches!(f.geometry, Geometry::Point(_))));
}

#[test]
fn test_exploded_members_follow_original_id() {
    let registry = ExclusionRegistry::from_entries(vec![ExclusionEntry::new(
        HIGH,
        "1",
        ExclusionReason::Removed,
        "",
    )]);
    let ctx = FusionContext::new(FusionConfig::default(), registry).unwrap();
    let crowd = vec![at(&ctx, OSM, "node/1", 0.0, -3000.0).with_attr("bicycle_parking", "stands")];
    let high = vec![
        high_multipoint(&ctx, "1", &[1000.0, 1400.0]),
        high_multipoint(&ctx, "2", &[2000.0, 2400.0]),
    ];

    let fused = fuse(&ctx, small_scene(&ctx, crowd, high)).unwrap();

    assert!(!fused.contains_origin(HIGH, "1#1"));
    assert!(!fused.contains_origin(HIGH, "1#2"));
    assert!(fused.contains_origin(HIGH, "2#1"));
    assert_eq!(fused.stats.resolution.municipal_excluded_registry, 2);
    assert_eq!(fused.stats.resolution.unmatched_exclusions, 0);
}

#[test]
fn test_reference_targets_the_named_field() {
    let ctx = context();
    let id_key = format!("ref:open.toronto.ca:{}:id", STATIONS);
    let objectid_key = format!("ref:open.toronto.ca:{}:objectid", STATIONS);

    let crowd = vec![at(&ctx, OSM, "node/5", 0.0, -3000.0)
        .with_attr("bicycle_parking", "building")
        .with_attr(objectid_key.as_str(), "2")];
    let stations = vec![
        at(&ctx, STATIONS, "1", 0.0, -3000.0)
            .with_attr(id_key.as_str(), "1")
            .with_attr(objectid_key.as_str(), "2"),
        at(&ctx, STATIONS, "2", 500.0, -3000.0)
            .with_attr(id_key.as_str(), "2")
            .with_attr(objectid_key.as_str(), "3"),
    ];
    let mut sources = small_scene(&ctx, crowd, vec![rack(&ctx, HIGH, "20", 0.0, "8")]);
    sources.push(SourceCollection::new(STATIONS, SourceKind::Municipal).with_features(stations));

    let fused = fuse(&ctx, sources).unwrap();

    assert!(fused.contains_origin(OSM, "node/5"));
    assert!(!fused.contains_origin(STATIONS, "1"));
    assert!(fused.contains_origin(STATIONS, "2"));
    assert_eq!(fused.stats.resolution.municipal_superseded_ref, 1);
}
