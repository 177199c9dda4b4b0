//! Registre d'exclusions manuelles
//!
//! Liste curée à la main d'identifiants municipaux à supprimer de la
//! sortie. Le registre persiste entre les runs et n'est jamais modifié par le
//! pipeline.
//!
//! Deux formes JSON sont acceptées, mélangeables dans un même tableau :
//!
//! ```json
//! [
//!   {"dataset": "bicycle-parking-racks", "id": "412", "reason": "removed", "notes": "..."},
//!   {"ids": [{"ref:open.toronto.ca:street-furniture-bicycle-parking:id": "BP-01234"}],
//!    "reason": "area_survey", "notes": "..."}
//! ]
//! ```
//!
//! Une entrée groupée vise le champ de sa clé (`:id`, `:objectid`...), avec
//! les mêmes règles de correspondance que les références croisées. Une entrée
//! plate vise l'identifiant natif, ou le champ `field` s'il est donné.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::FeatureKey;
use crate::xref::{parse_ref_key, MunicipalIds, RefTarget};
use crate::FusionError;

/// Motif d'une exclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Objet retiré sur le terrain
    Removed,
    /// Objet introuvable lors d'une vérification
    Missing,
    /// Zone relevée en détail, données municipales remplacées
    AreaSurvey,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Removed => "removed",
            Self::Missing => "missing",
            Self::AreaSurvey => "area_survey",
        };
        f.write_str(label)
    }
}

/// Règle de suppression d'un objet municipal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExclusionEntry {
    pub dataset: String,
    /// Champ de référence visé, identifiant natif si absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub id: String,
    pub reason: ExclusionReason,
    pub notes: String,
}

impl ExclusionEntry {
    pub fn new(
        dataset: impl Into<String>,
        id: impl Into<String>,
        reason: ExclusionReason,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            field: None,
            id: id.into(),
            reason,
            notes: notes.into(),
        }
    }

    /// Vise un champ de référence plutôt que l'identifiant natif (builder)
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn target(&self) -> RefTarget {
        RefTarget::new(self.dataset.as_str(), self.field.as_deref(), self.id.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Flat {
        dataset: String,
        #[serde(default)]
        field: Option<String>,
        id: Value,
        reason: ExclusionReason,
        #[serde(default)]
        notes: String,
    },
    Grouped {
        ids: Vec<BTreeMap<String, Value>>,
        reason: ExclusionReason,
        #[serde(default)]
        notes: String,
    },
}

/// Registre chargé pour un run
#[derive(Debug, Clone, Default)]
pub struct ExclusionRegistry {
    entries: Vec<ExclusionEntry>,
}

impl ExclusionRegistry {
    /// Registre vide
    pub fn empty() -> Self {
        Self::default()
    }

    /// Construit un registre depuis des entrées
    pub fn from_entries(entries: Vec<ExclusionEntry>) -> Self {
        Self { entries }
    }

    /// Charge un registre depuis un fichier JSON
    pub fn load(path: &Path, authority: &str) -> Result<Self, FusionError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content, authority)
    }

    /// Parse un registre JSON
    ///
    /// Les clés de la forme groupée sont des clés de référence croisée
    /// (`ref:<autorité>:<jeu>:<champ>`) ou directement un nom de jeu.
    pub fn from_json(json: &str, authority: &str) -> Result<Self, FusionError> {
        let raw: Vec<RawEntry> =
            serde_json::from_str(json).map_err(|e| FusionError::InvalidRegistry(e.to_string()))?;

        let mut entries = Vec::new();
        for item in raw {
            match item {
                RawEntry::Flat {
                    dataset,
                    field,
                    id,
                    reason,
                    notes,
                } => {
                    let mut entry = ExclusionEntry::new(dataset, id_to_string(&id)?, reason, notes);
                    if let Some(field) = field.map(|f| f.trim().to_lowercase()).filter(|f| !f.is_empty()) {
                        entry = entry.with_field(field);
                    }
                    entries.push(entry);
                }
                RawEntry::Grouped { ids, reason, notes } => {
                    for map in ids {
                        for (key, id) in map {
                            let (dataset, field) = match parse_ref_key(&key, authority) {
                                Some(ref_key) => {
                                    let dataset = ref_key.dataset.ok_or_else(|| {
                                        FusionError::InvalidRegistry(format!(
                                            "reference key without dataset: {}",
                                            key
                                        ))
                                    })?;
                                    (dataset, ref_key.field)
                                }
                                None => (key.trim().to_string(), None),
                            };
                            let mut entry =
                                ExclusionEntry::new(dataset, id_to_string(&id)?, reason, notes.clone());
                            entry.field = field;
                            entries.push(entry);
                        }
                    }
                }
            }
        }

        Ok(Self::from_entries(entries))
    }

    /// Features municipales exclues par au moins une entrée
    pub fn excluded(&self, ids: &MunicipalIds) -> BTreeSet<FeatureKey> {
        self.entries
            .iter()
            .flat_map(|e| ids.resolve(&e.target()))
            .collect()
    }

    pub fn entries(&self) -> &[ExclusionEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entrées n'ayant correspondu à aucune feature municipale
    pub fn unmatched<'a>(&'a self, ids: &MunicipalIds) -> Vec<&'a ExclusionEntry> {
        self.entries
            .iter()
            .filter(|e| ids.resolve(&e.target()).is_empty())
            .collect()
    }
}

fn id_to_string(value: &Value) -> Result<String, FusionError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(FusionError::InvalidRegistry(format!(
            "invalid exclusion id: {}",
            other
        ))),
    }
}
