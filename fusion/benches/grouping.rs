//! Benchmarks du regroupement par proximité et d'un run complet

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fusion::spatial::proximity_groups;
use fusion::{
    fuse, ExclusionRegistry, FusionConfig, FusionContext, NormalizedFeature, SourceCollection,
    SourceKind,
};
use geo::{Geometry, Point};

/// Grille pseudo-aléatoire déterministe (LCG) de positions en mètres
fn positions(n: usize, extent: f64) -> Vec<[f64; 2]> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n).map(|_| [next() * extent, next() * extent]).collect()
}

fn bench_proximity_groups(c: &mut Criterion) {
    let mut group = c.benchmark_group("proximity_groups");

    for &n in &[1_000usize, 10_000, 50_000] {
        let points = positions(n, 20_000.0);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &points, |b, points| {
            b.iter(|| black_box(proximity_groups(black_box(points), 30.0, |_, _| true)))
        });
    }

    group.finish();
}

fn bench_fuse(c: &mut Criterion) {
    let ctx = FusionContext::new(FusionConfig::default(), ExclusionRegistry::empty()).unwrap();
    let (x0, y0) = ctx.projector().to_metric(-79.3832, 43.6534).unwrap();

    let to_feature = |source: &str, i: usize, p: &[f64; 2], kind: &str| {
        let (lon, lat) = ctx.projector().to_geographic(x0 + p[0], y0 + p[1]).unwrap();
        NormalizedFeature::new(source, i.to_string(), Geometry::Point(Point::new(lon, lat)))
            .with_attr("bicycle_parking", kind)
            .with_attr("capacity", "2")
    };

    let datasets = ["bicycle-parking-racks", "bicycle-parking-high-capacity-outdoor"];
    let mut sources: Vec<SourceCollection> = datasets
        .iter()
        .map(|&name| {
            let features = positions(3_000, 10_000.0)
                .iter()
                .enumerate()
                .map(|(i, p)| to_feature(name, i, p, "rack"))
                .collect();
            SourceCollection::new(name, SourceKind::Municipal).with_features(features)
        })
        .collect();

    let furniture = positions(3_000, 10_000.0)
        .iter()
        .enumerate()
        .map(|(i, p)| to_feature("street-furniture-bicycle-parking", i, p, "bollard"))
        .collect();
    sources.push(
        SourceCollection::new("street-furniture-bicycle-parking", SourceKind::Municipal)
            .with_features(furniture),
    );

    let osm = positions(2_000, 10_000.0)
        .iter()
        .enumerate()
        .map(|(i, p)| to_feature("osm", i, p, "stands"))
        .collect();
    sources.push(SourceCollection::new("osm", SourceKind::CrowdSourced).with_features(osm));

    c.bench_function("fuse_11k", |b| {
        b.iter(|| black_box(fuse(&ctx, black_box(sources.clone())).unwrap()))
    });
}

criterion_group!(benches, bench_proximity_groups, bench_fuse);
criterion_main!(benches);
