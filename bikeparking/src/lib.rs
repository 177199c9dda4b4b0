//! # bikeparking
//!
//! Fusion des stationnements vélo de Toronto : lit les collections
//! normalisées (catalogue municipal et OpenStreetMap), exécute le moteur
//! [`fusion`] et publie les fichiers d'affichage GeoJSON.
//!
//! ## Features
//!
//! - Configuration JSON (preset `toronto` embarqué) et `.env`
//! - Lecture parallèle des sources
//! - Publication atomique : un run refusé laisse les fichiers précédents
//! - Archive `.tar.bz2` datée des entrées et sorties
//! - Diagnostic des changements d'identifiants entre deux instantanés
//!
//! ## Usage CLI
//!
//! ```bash
//! # Fusion avec le preset toronto
//! bikeparking --input-dir ./normalized --output-dir ./display --exclusions ./exclusions.json
//!
//! # Entrées du registre sans correspondance
//! bikeparking check-exclusions --exclusions ./exclusions.json
//!
//! # Changements d'identifiants entre deux semaines
//! bikeparking id-changes old.geojson new.geojson --id-field ID
//! ```

pub mod config;
pub mod export;
pub mod load;
pub mod pipeline;
pub mod report;

pub use config::{Config, RunPaths};
pub use pipeline::{run, RunOptions};
pub use report::{RunReport, RunStatus};
