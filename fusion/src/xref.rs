//! Clés de référence croisée `ref:<autorité>:<jeu>:<champ>`
//!
//! Une feature contributive peut porter une ou plusieurs clés liant l'objet
//! à un identifiant municipal, par ex.
//! `ref:open.toronto.ca:bicycle-parking-racks:objectid=1234`.
//! La valeur peut lister plusieurs identifiants séparés par `;`.
//! La valeur `no` signifie « vérifié, absent des données municipales ».
//!
//! Une clé sans jeu (`ref:open.toronto.ca`) qualifie la feature quelle que
//! soit sa valeur, mais ne vise aucun objet.
//!
//! Une référence vise un champ précis du jeu : elle est comparée aux clés de
//! référence portées par les features municipales du jeu (`:id`,
//! `:objectid`...). Si aucune feature du jeu ne porte ce champ, la valeur est
//! comparée à l'identifiant natif.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::types::{Attributes, FeatureKey, NormalizedFeature};

/// Valeur marquant une référence explicitement refusée
const DECLINED: &str = "no";

/// Séparateur des parties d'une feature multipoint éclatée (`<id>#<n>`)
pub const PART_SEPARATOR: char = '#';

/// Clé de référence croisée décodée
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefKey {
    /// Sous-jeu de données municipal visé (absent si la clé s'arrête à l'autorité)
    pub dataset: Option<String>,
    /// Champ identifiant (`id`, `objectid`...)
    pub field: Option<String>,
}

/// Identifiant municipal visé par une référence ou une exclusion
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefTarget {
    pub dataset: String,
    /// Champ de la clé de référence, `None` pour l'identifiant natif
    pub field: Option<String>,
    pub id: String,
}

impl RefTarget {
    pub fn new(dataset: impl Into<String>, field: Option<&str>, id: impl Into<String>) -> Self {
        Self {
            dataset: dataset.into(),
            field: field.map(str::to_string),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for RefTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(f, "{}:{}={}", self.dataset, field, self.id),
            None => write!(f, "{}:{}", self.dataset, self.id),
        }
    }
}

/// Références croisées portées par une feature
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureRefs {
    /// Au moins une clé qualifiante (identifiant ou refus explicite)
    pub qualifying: bool,
    /// Identifiants municipaux référencés, triés et sans doublon
    pub targets: Vec<RefTarget>,
}

/// Décode une clé d'attribut pour une autorité donnée
///
/// Normalise l'espace de noms : espaces, casse, et `ref.` toléré pour `ref:`.
pub fn parse_ref_key(key: &str, authority: &str) -> Option<RefKey> {
    let key = key.trim().to_lowercase();
    let authority = authority.trim().to_lowercase();

    let rest = key
        .strip_prefix("ref:")
        .or_else(|| key.strip_prefix("ref."))?;
    let rest = rest.strip_prefix(authority.as_str())?;

    if rest.is_empty() {
        return Some(RefKey {
            dataset: None,
            field: None,
        });
    }

    let rest = rest.strip_prefix(':')?;
    let mut parts = rest.splitn(2, ':');
    let dataset = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let field = parts.next().map(str::trim).filter(|s| !s.is_empty());

    Some(RefKey {
        dataset: dataset.map(str::to_string),
        field: field.map(str::to_string),
    })
}

/// Découpe une valeur de référence en identifiants
pub fn split_ids(value: &str) -> impl Iterator<Item = &str> {
    value.split(';').map(str::trim).filter(|s| !s.is_empty())
}

/// Collecte les références croisées d'une feature contributive
pub fn collect_refs(attributes: &Attributes, authority: &str) -> FeatureRefs {
    let mut refs = FeatureRefs::default();

    for (key, value) in attributes {
        let Some(ref_key) = parse_ref_key(key, authority) else {
            continue;
        };

        if value.trim().eq_ignore_ascii_case(DECLINED) {
            refs.qualifying = true;
            continue;
        }

        let Some(dataset) = ref_key.dataset else {
            if split_ids(value).next().is_some() {
                refs.qualifying = true;
            }
            continue;
        };

        for id in split_ids(value) {
            refs.qualifying = true;
            refs.targets
                .push(RefTarget::new(dataset.as_str(), ref_key.field.as_deref(), id));
        }
    }

    refs.targets.sort();
    refs.targets.dedup();
    refs
}

/// Vrai si la clé est une référence croisée vers l'autorité
pub fn is_ref_key(key: &str, authority: &str) -> bool {
    parse_ref_key(key, authority).is_some()
}

/// Identifiant d'origine d'une partie de multipoint éclaté
pub fn base_id(native_id: &str) -> &str {
    match native_id.rsplit_once(PART_SEPARATOR) {
        Some((base, part))
            if !base.is_empty() && !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => native_id,
    }
}

/// Index des identifiants des features municipales
///
/// Associe chaque `(jeu, champ, valeur)` porté en clé de référence, et chaque
/// identifiant natif, aux features qui le portent.
#[derive(Debug, Default)]
pub struct MunicipalIds {
    by_field: HashMap<RefTarget, BTreeSet<FeatureKey>>,
    fields: HashSet<(String, String)>,
    by_native: HashMap<FeatureKey, BTreeSet<FeatureKey>>,
}

impl MunicipalIds {
    pub fn build<'a>(
        features: impl IntoIterator<Item = &'a NormalizedFeature>,
        authority: &str,
    ) -> Self {
        let mut index = Self::default();

        for feature in features {
            let key = feature.key();

            for (attr, value) in &feature.attributes {
                let Some(RefKey {
                    dataset: Some(dataset),
                    field: Some(field),
                }) = parse_ref_key(attr, authority)
                else {
                    continue;
                };
                if !dataset.eq_ignore_ascii_case(&feature.source_id) {
                    continue;
                }
                for id in split_ids(value) {
                    index
                        .by_field
                        .entry(RefTarget::new(feature.source_id.as_str(), Some(field.as_str()), id))
                        .or_default()
                        .insert(key.clone());
                }
                index.fields.insert((feature.source_id.clone(), field));
            }

            for native in [feature.native_id.as_str(), base_id(&feature.native_id)] {
                index
                    .by_native
                    .entry(FeatureKey::new(feature.source_id.as_str(), native))
                    .or_default()
                    .insert(key.clone());
            }
        }

        index
    }

    /// Features municipales visées, triées par clé
    pub fn resolve(&self, target: &RefTarget) -> Vec<FeatureKey> {
        let found = match &target.field {
            Some(field) if self.fields.contains(&(target.dataset.clone(), field.clone())) => {
                self.by_field.get(target)
            }
            _ => self
                .by_native
                .get(&FeatureKey::new(target.dataset.as_str(), target.id.as_str())),
        };
        found.map(|keys| keys.iter().cloned().collect()).unwrap_or_default()
    }
}
