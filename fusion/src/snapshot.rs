//! Suivi des identifiants d'un jeu municipal entre deux instantanés
//!
//! Les identifiants municipaux ne sont pas stables d'une semaine à l'autre.
//! Ce diagnostic apparie deux instantanés d'un même jeu par géométrie exacte
//! (coordonnées arrondies à 1e-7 degré) pour repérer les changements
//! d'identifiant. Il ne corrige rien : le moteur de fusion n'en dépend pas.

use std::collections::BTreeMap;

use geo::{Centroid, Geometry};
use serde::Serialize;

use crate::types::NormalizedFeature;

/// Précision d'appariement (1e-7 degré, environ 1 cm)
const SCALE: f64 = 1e7;

type LocationKey = (i64, i64);

/// Emplacement et identifiants qui s'y trouvent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotLocation {
    pub lon: f64,
    pub lat: f64,
    pub ids: Vec<String>,
}

/// Emplacement présent dans les deux instantanés sous des identifiants différents
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdChange {
    pub lon: f64,
    pub lat: f64,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

/// Résultat de la comparaison de deux instantanés
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotDiff {
    /// Emplacements portant plusieurs identifiants dans le premier instantané
    pub first_duplicates: Vec<SnapshotLocation>,
    /// Idem pour le second
    pub second_duplicates: Vec<SnapshotLocation>,
    /// Emplacements du premier instantané absents du second
    pub no_match: Vec<SnapshotLocation>,
    pub id_changes: Vec<IdChange>,
}

impl SnapshotDiff {
    pub fn is_clean(&self) -> bool {
        self.first_duplicates.is_empty()
            && self.second_duplicates.is_empty()
            && self.no_match.is_empty()
            && self.id_changes.is_empty()
    }
}

/// Compare deux instantanés d'un même jeu
pub fn compare(first: &[NormalizedFeature], second: &[NormalizedFeature]) -> SnapshotDiff {
    let first = index_locations(first);
    let second = index_locations(second);

    let mut diff = SnapshotDiff {
        first_duplicates: duplicates(&first),
        second_duplicates: duplicates(&second),
        ..Default::default()
    };

    for (key, ids) in &first {
        match second.get(key) {
            None => diff.no_match.push(location(*key, ids)),
            Some(after) if after != ids => {
                let (lon, lat) = unscale(*key);
                diff.id_changes.push(IdChange {
                    lon,
                    lat,
                    before: ids.clone(),
                    after: after.clone(),
                });
            }
            Some(_) => {}
        }
    }

    diff
}

/// Identifiants par emplacement (multipoints éclatés, centroïde sinon)
fn index_locations(features: &[NormalizedFeature]) -> BTreeMap<LocationKey, Vec<String>> {
    let mut sorted: Vec<&NormalizedFeature> = features.iter().collect();
    sorted.sort_by(|a, b| a.native_id.cmp(&b.native_id));

    let mut index: BTreeMap<LocationKey, Vec<String>> = BTreeMap::new();
    for feature in sorted {
        for (lon, lat) in points_of(&feature.geometry) {
            let ids = index.entry(scale(lon, lat)).or_default();
            if !ids.contains(&feature.native_id) {
                ids.push(feature.native_id.clone());
            }
        }
    }
    index
}

fn points_of(geometry: &Geometry) -> Vec<(f64, f64)> {
    match geometry {
        Geometry::Point(p) => vec![(p.x(), p.y())],
        Geometry::MultiPoint(mp) => mp.iter().map(|p| (p.x(), p.y())).collect(),
        other => other.centroid().map(|p| vec![(p.x(), p.y())]).unwrap_or_default(),
    }
}

fn duplicates(index: &BTreeMap<LocationKey, Vec<String>>) -> Vec<SnapshotLocation> {
    index
        .iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|(key, ids)| location(*key, ids))
        .collect()
}

fn location(key: LocationKey, ids: &[String]) -> SnapshotLocation {
    let (lon, lat) = unscale(key);
    SnapshotLocation {
        lon,
        lat,
        ids: ids.to_vec(),
    }
}

fn scale(lon: f64, lat: f64) -> LocationKey {
    ((lon * SCALE).round() as i64, (lat * SCALE).round() as i64)
}

fn unscale(key: LocationKey) -> (f64, f64) {
    (key.0 as f64 / SCALE, key.1 as f64 / SCALE)
}
