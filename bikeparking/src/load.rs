//! Lecture des collections normalisées (GeoJSON)
//!
//! Chaque source est un FeatureCollection `<nom>-normalized.geojson`. Les
//! propriétés sont converties en chaînes, les features sans géométrie ou sans
//! identifiant sont écartées avec un avertissement.
//!
//! Identifiant natif, dans l'ordre :
//! 1. propriété configurée pour la source (`id_property`)
//! 2. identifiant de la feature
//! 3. référence `ref:<autorité>:<source>:id`, puis toute autre
//!    `ref:<autorité>:<source>:<champ>`
//! 4. propriété `id`
//! 5. coordonnées arrondies à 1e-7 degré, si la source l'autorise
//!    (`derive_ids`), suffixées `/<n>` quand plusieurs features partagent
//!    le même emplacement

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use fusion::{NormalizedFeature, SourceCollection};
use geo::{Centroid, Geometry};
use geojson::{feature::Id, Feature, GeoJson, JsonObject, JsonValue};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::config::{Config, RunPaths, SourceConfig};

/// Lecture de l'identifiant natif d'une source
#[derive(Debug, Clone, Copy, Default)]
pub struct IdRule<'a> {
    /// Propriété lue en priorité
    pub property: Option<&'a str>,
    /// Seule `property` est lue
    pub exclusive: bool,
    /// Identifiant dérivé des coordonnées en dernier recours
    pub derive: bool,
}

impl<'a> IdRule<'a> {
    pub fn for_source(source: &'a SourceConfig) -> Self {
        Self {
            property: source.id_property.as_deref(),
            exclusive: false,
            derive: source.derive_ids,
        }
    }

    /// Identifiant lu uniquement dans `property`
    pub fn only(property: &'a str) -> Self {
        Self {
            property: Some(property),
            exclusive: true,
            derive: false,
        }
    }
}

/// Charge toutes les sources de la configuration en parallèle
///
/// Un fichier absent donne une collection vide : c'est le moteur qui décide
/// si la source est indispensable.
pub fn load_sources(config: &Config, paths: &RunPaths, authority: &str) -> Result<Vec<SourceCollection>> {
    config
        .sources
        .par_iter()
        .map(|source| -> Result<SourceCollection> {
            let path = paths.source_file(&source.name);
            let collection = SourceCollection::new(source.name.as_str(), source.kind);

            if !path.exists() {
                warn!(source = source.name.as_str(), path = %path.display(), "Source file not found");
                return Ok(collection);
            }

            let features = load_features(&path, &source.name, authority, IdRule::for_source(source))?;
            debug!(source = source.name.as_str(), features = features.len(), "Source file read");
            Ok(collection.with_features(features))
        })
        .collect()
}

/// Charge un instantané d'un jeu, identifiant lu dans `id_field`
pub fn load_snapshot(path: &Path, dataset: &str, id_field: &str) -> Result<Vec<NormalizedFeature>> {
    load_features(path, dataset, "", IdRule::only(id_field))
}

/// Lit un FeatureCollection et le convertit en features normalisées
pub fn load_features(
    path: &Path,
    source_id: &str,
    authority: &str,
    rule: IdRule<'_>,
) -> Result<Vec<NormalizedFeature>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let geojson: GeoJson = content
        .parse()
        .with_context(|| format!("Invalid GeoJSON in {}", path.display()))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => anyhow::bail!("{} is not a FeatureCollection", path.display()),
    };

    let ref_prefix = format!("ref:{}:{}:", authority, source_id);
    let mut features = Vec::with_capacity(collection.features.len());
    let mut locations: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0usize;
    let mut derived = 0usize;

    for (index, feature) in collection.features.into_iter().enumerate() {
        match convert_feature(feature, source_id, &ref_prefix, rule) {
            Ok((mut f, false)) => {
                f.native_id = unique_location(&mut locations, f.native_id);
                derived += 1;
                features.push(f);
            }
            Ok((f, true)) => features.push(f),
            Err(reason) => {
                skipped += 1;
                warn!(source = source_id, index, reason, "Feature skipped");
            }
        }
    }

    if skipped > 0 {
        warn!(source = source_id, skipped, "Features without geometry or id");
    }
    if derived > 0 {
        debug!(source = source_id, derived, "Ids derived from coordinates");
    }

    Ok(features)
}

/// Convertit une feature ; le booléen indique un identifiant porté par la
/// donnée (`false` : dérivé des coordonnées)
fn convert_feature(
    feature: Feature,
    source_id: &str,
    ref_prefix: &str,
    rule: IdRule<'_>,
) -> std::result::Result<(NormalizedFeature, bool), &'static str> {
    let properties = feature.properties.unwrap_or_default();

    let geometry = feature.geometry.ok_or("null geometry")?;
    let geometry: Geometry = geometry.value.try_into().map_err(|_| "unsupported geometry")?;

    let configured = rule
        .property
        .and_then(|field| properties.get(field))
        .and_then(value_to_string);
    let carried = match configured {
        Some(id) => Some(id),
        None if rule.exclusive => None,
        None => feature_id(feature.id.as_ref()).or_else(|| property_id(&properties, ref_prefix)),
    };

    let (native_id, carried) = match carried {
        Some(id) => (id, true),
        None if rule.derive => (location_id(&geometry).ok_or("missing id")?, false),
        None => return Err("missing id"),
    };

    let mut normalized = NormalizedFeature::new(source_id, native_id, geometry);
    for (key, value) in &properties {
        if let Some(text) = value_to_string(value) {
            normalized.attributes.insert(key.clone(), text);
        }
    }

    Ok((normalized, carried))
}

fn feature_id(id: Option<&Id>) -> Option<String> {
    match id? {
        Id::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Id::String(_) => None,
        Id::Number(n) => Some(n.to_string()),
    }
}

/// Identifiant municipal porté en propriété : `ref:<autorité>:<jeu>:id`, puis
/// les autres champs de référence dans l'ordre des clés, sinon `id`
fn property_id(properties: &JsonObject, ref_prefix: &str) -> Option<String> {
    properties
        .get(&format!("{}id", ref_prefix))
        .and_then(value_to_string)
        .or_else(|| {
            properties
                .iter()
                .filter(|(key, _)| key.starts_with(ref_prefix))
                .find_map(|(_, value)| value_to_string(value))
        })
        .or_else(|| properties.get("id").and_then(value_to_string))
}

/// Identifiant `lon,lat` (1e-7 degré) de la position d'une géométrie
fn location_id(geometry: &Geometry) -> Option<String> {
    let point = match geometry {
        Geometry::Point(p) => *p,
        other => other.centroid()?,
    };
    Some(format!("{:.7},{:.7}", point.x(), point.y()))
}

/// Suffixe `/<n>` les emplacements déjà rencontrés, dans l'ordre du fichier
fn unique_location(seen: &mut HashMap<String, usize>, id: String) -> String {
    let count = seen.entry(id.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
        id
    } else {
        format!("{}/{}", id, count)
    }
}

/// Valeur de propriété en chaîne ; `null` et chaîne vide ignorés
fn value_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(if *b { "yes" } else { "no" }.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bikeparking_load_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    const RACKS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {"type": "Feature", "id": 7,
             "geometry": {"type": "Point", "coordinates": [-79.38, 43.65]},
             "properties": {"capacity": 4, "covered": false, "note": null, "bicycle_parking": "rack"}},
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-79.39, 43.66]},
             "properties": {"ref:open.toronto.ca:bicycle-parking-racks:id": "12"}},
            {"type": "Feature",
             "geometry": null,
             "properties": {"id": "13"}},
            {"type": "Feature",
             "geometry": {"type": "Point", "coordinates": [-79.40, 43.67]},
             "properties": {"capacity": "2"}}
        ]
    }"#;

    #[test]
    fn test_load_features() {
        let path = write_temp("racks.geojson", RACKS);
        let features =
            load_features(&path, "bicycle-parking-racks", "open.toronto.ca", IdRule::default()).unwrap();

        assert_eq!(features.len(), 2);
        assert_eq!(features[0].native_id, "7");
        assert_eq!(features[0].attr("capacity"), Some("4"));
        assert_eq!(features[0].attr("covered"), Some("no"));
        assert_eq!(features[0].attr("note"), None);
        assert_eq!(features[1].native_id, "12");
        assert!(matches!(features[1].geometry, Geometry::Point(_)));
    }

    #[test]
    fn test_snapshot_id_field() {
        let path = write_temp(
            "snapshot.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "id": 1,
                 "geometry": {"type": "Point", "coordinates": [-79.38, 43.65]},
                 "properties": {"ID": 501}}
            ]}"#,
        );
        let features = load_snapshot(&path, "high", "ID").unwrap();
        assert_eq!(features[0].native_id, "501");
    }

    #[test]
    fn test_osm_id_property() {
        // Forme produite par la normalisation OSM : pas d'`id`, identité en propriété
        let path = write_temp(
            "openstreetmap.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.38, 43.65]},
                 "properties": {"amenity": "bicycle_parking", "bicycle_parking": "stands",
                                "meta_feature_last_updated": "2024-03-01T12:00:00+00:00",
                                "meta_osm_id": "node/123"}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.39, 43.65]},
                 "properties": {"amenity": "bicycle_parking"}}
            ]}"#,
        );
        let source = SourceConfig {
            name: "openstreetmap".to_string(),
            kind: fusion::SourceKind::CrowdSourced,
            optional: false,
            id_property: Some("meta_osm_id".to_string()),
            derive_ids: false,
        };

        let features =
            load_features(&path, "openstreetmap", "open.toronto.ca", IdRule::for_source(&source)).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].native_id, "node/123");
        assert_eq!(features[0].attr("meta_osm_id"), Some("node/123"));
    }

    #[test]
    fn test_derived_ids() {
        let path = write_temp(
            "lockers.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.3832, 43.6534]},
                 "properties": {"bicycle_parking": "lockers", "capacity": 10}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.3832, 43.6534]},
                 "properties": {"bicycle_parking": "lockers", "capacity": 4}},
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.4, 43.7]},
                 "properties": {"bicycle_parking": "lockers"}}
            ]}"#,
        );
        let rule = IdRule {
            derive: true,
            ..IdRule::default()
        };

        let features = load_features(&path, "toronto-bicycle-lockers", "open.toronto.ca", rule).unwrap();
        let ids: Vec<&str> = features.iter().map(|f| f.native_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "-79.3832000,43.6534000",
                "-79.3832000,43.6534000/2",
                "-79.4000000,43.7000000",
            ]
        );

        // Sans dérivation, les mêmes features sont écartées
        let features =
            load_features(&path, "toronto-bicycle-lockers", "open.toronto.ca", IdRule::default()).unwrap();
        assert!(features.is_empty());
    }

    #[test]
    fn test_ref_id_field_preferred() {
        let path = write_temp(
            "stations.geojson",
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature",
                 "geometry": {"type": "Point", "coordinates": [-79.38, 43.65]},
                 "properties": {
                    "ref:open.toronto.ca:bicycle-parking-bike-stations-indoor:id": 1,
                    "ref:open.toronto.ca:bicycle-parking-bike-stations-indoor:objectid": 2}}
            ]}"#,
        );
        let features = load_features(
            &path,
            "bicycle-parking-bike-stations-indoor",
            "open.toronto.ca",
            IdRule::default(),
        )
        .unwrap();
        assert_eq!(features[0].native_id, "1");
    }

    #[test]
    fn test_not_a_collection() {
        let path = write_temp(
            "point.geojson",
            r#"{"type": "Point", "coordinates": [-79.38, 43.65]}"#,
        );
        assert!(load_features(&path, "x", "open.toronto.ca", IdRule::default()).is_err());
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&JsonValue::Bool(true)), Some("yes".to_string()));
        assert_eq!(value_to_string(&JsonValue::String("  ".into())), None);
        assert_eq!(value_to_string(&serde_json::json!(2.5)), Some("2.5".to_string()));
    }
}
