//! Politique de fusion des attributs
//!
//! Une fusion ne perd jamais d'information vérifiable : quand les membres
//! d'un groupe divergent sur une valeur, toutes les valeurs sont conservées.
//!
//! Format des valeurs fusionnées (observable dans la sortie) :
//!
//! | règle | valeurs identiques | valeurs divergentes |
//! |-------|--------------------|---------------------|
//! | `Distinct` | `6` | `6;8` (ordre des membres) |
//! | `Tally` | `no` | `no (n=2); yes (n=1)` |
//! | `Sum` | somme entière | somme entière, sinon `Distinct` |
//!
//! Les membres sont toujours fournis triés par `FeatureKey`, ce qui fixe
//! l'ordre des valeurs.

use std::collections::{BTreeMap, BTreeSet};

use geo::Geometry;

use crate::projection::Projector;
use crate::types::{Attributes, FeatureKey, MergedFeature};
use crate::xref::{is_ref_key, split_ids};
use crate::FusionError;

/// Séparateur des valeurs divergentes
pub const CONFLICT_SEPARATOR: &str = ";";

/// Séparateur des décomptes
pub const TALLY_SEPARATOR: &str = "; ";

/// Nombre de features contributrices d'une fusion
pub const META_MERGED_COUNT: &str = "meta_merged_count";

/// Règle de fusion d'une clé
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMerge {
    /// Valeurs distinctes jointes par `;`
    Distinct,
    /// Valeurs distinctes avec leur effectif
    Tally,
    /// Somme entière
    Sum,
}

/// Politique de fusion : règle par défaut + surcharges par clé
#[derive(Debug, Clone)]
pub struct MergePolicy {
    default: ValueMerge,
    overrides: BTreeMap<String, ValueMerge>,
    authority: String,
}

impl MergePolicy {
    pub fn new(default: ValueMerge, authority: impl Into<String>) -> Self {
        Self {
            default,
            overrides: BTreeMap::new(),
            authority: authority.into(),
        }
    }

    pub fn with_rule(mut self, key: impl Into<String>, rule: ValueMerge) -> Self {
        self.overrides.insert(key.into(), rule);
        self
    }

    /// Micro-features : effectifs conservés, capacités additionnées
    /// (chaque anneau est une structure physique distincte)
    pub fn cluster(authority: &str) -> Self {
        Self::new(ValueMerge::Tally, authority).with_rule("capacity", ValueMerge::Sum)
    }

    /// Doublons inter-jeux : aucune réconciliation, capacités comprises
    pub fn cross_dataset(authority: &str) -> Self {
        Self::new(ValueMerge::Distinct, authority)
    }

    fn rule_for(&self, key: &str) -> ValueMerge {
        if is_ref_key(key, &self.authority) {
            return ValueMerge::Distinct;
        }
        self.overrides.get(key).copied().unwrap_or(self.default)
    }

    /// Union des attributs des membres
    pub fn merge(&self, members: &[&Attributes]) -> Attributes {
        let keys: BTreeSet<&str> = members
            .iter()
            .flat_map(|attrs| attrs.keys().map(String::as_str))
            .collect();

        let mut merged = Attributes::new();
        for key in keys {
            let values: Vec<&str> = members
                .iter()
                .filter_map(|attrs| attrs.get(key).map(String::as_str))
                .collect();

            let is_ref = is_ref_key(key, &self.authority);
            let value = match self.rule_for(key) {
                ValueMerge::Distinct => distinct(&values, is_ref),
                ValueMerge::Tally => tally(&values),
                ValueMerge::Sum => sum(&values).unwrap_or_else(|| distinct(&values, false)),
            };
            merged.insert(key.to_string(), value);
        }

        merged.insert(META_MERGED_COUNT.to_string(), members.len().to_string());
        merged
    }
}

/// Résultat de la fusion d'un groupe
#[derive(Debug, Clone)]
pub struct Combined {
    /// Centroïde des positions projetées, en WGS84
    pub geometry: Geometry,
    pub attributes: Attributes,
    /// Contributeurs de tous les membres, triés
    pub contributors: Vec<FeatureKey>,
}

/// Fusionne les membres d'un groupe (triés par clé)
///
/// `positions[i]` est la position projetée de `members[i]`.
pub fn combine(
    projector: &Projector,
    policy: &MergePolicy,
    members: &[MergedFeature],
    positions: &[[f64; 2]],
) -> Result<Combined, FusionError> {
    let centroid = projector.centroid_of(positions)?;

    let attrs: Vec<&Attributes> = members.iter().map(|m| &m.attributes).collect();
    let attributes = policy.merge(&attrs);

    let mut contributors: Vec<FeatureKey> = members
        .iter()
        .flat_map(|m| m.contributors.iter().cloned())
        .collect();
    contributors.sort();
    contributors.dedup();

    Ok(Combined {
        geometry: Geometry::Point(centroid),
        attributes,
        contributors,
    })
}

/// Valeurs distinctes dans l'ordre d'apparition
fn distinct(values: &[&str], split_lists: bool) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for value in values {
        let parts: Vec<&str> = if split_lists {
            split_ids(value).collect()
        } else {
            vec![*value]
        };
        for part in parts {
            if !seen.contains(&part) {
                seen.push(part);
            }
        }
    }
    seen.join(CONFLICT_SEPARATOR)
}

/// Valeurs distinctes avec effectif, ou la valeur seule si unanime
fn tally(values: &[&str]) -> String {
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for &value in values {
        match counts.iter_mut().find(|entry| entry.0 == value) {
            Some(entry) => entry.1 += 1,
            None => counts.push((value, 1)),
        }
    }

    if counts.len() == 1 {
        return counts[0].0.to_string();
    }

    counts
        .iter()
        .map(|(value, n)| format!("{} (n={})", value, n))
        .collect::<Vec<_>>()
        .join(TALLY_SEPARATOR)
}

fn sum(values: &[&str]) -> Option<String> {
    let mut total: i64 = 0;
    for value in values {
        total = total.checked_add(value.trim().parse::<i64>().ok()?)?;
    }
    Some(total.to_string())
}
